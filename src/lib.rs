//! # IMU Link Library
//!
//! Stream telemetry from an ICM20948 IMU device over a serial line and keep
//! its configuration in sync.
//!
//! A dedicated reader thread turns the byte stream into text lines and hands
//! them over a bounded queue to a periodic, non-blocking ingestion step that
//! parses them, buffers samples, mirrors the device configuration and reports
//! events to a [`TelemetrySink`](ingest::TelemetrySink). [`session::Session`]
//! ties the pieces together for one connection.

pub mod config;
pub mod error;
pub mod ingest;
pub mod protocol;
pub mod serial;
pub mod session;
pub mod sync;
