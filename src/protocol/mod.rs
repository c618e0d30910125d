//! # Line Protocol Module
//!
//! Implementation of the ICM20948 firmware's ASCII line protocol.
//!
//! This module handles:
//! - Command encoding (`\r\n` terminated UTF-8)
//! - Frame decoding with Latin-1 fallback
//! - Line classification (`DATA:`, `CONFIG:`, `DEBUG:`, status text)
//! - Telemetry and configuration payload parsing

pub mod types;
pub mod codec;
pub mod parser;
pub mod commands;
