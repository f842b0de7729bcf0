//! Sensor Daemon - Session registry, command workers and event fan-out
//!
//! This crate provides the server side of the sensor daemon:
//! - `registry` - Per-client sensor records (server mirror of subscriptions)
//! - `server` - Command and event socket accept loops, per-connection workers
//! - `dispatcher` - Ingestion queue and the single event fan-out task
//! - `module` - Sensor Module contract, catalog and simulated backends
//! - `virtual_sensor` - Derived sensors synthesized from raw events
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                           sensord                                │
//! ├──────────────────────────────────────────────────────────────────┤
//! │                                                                  │
//! │  ┌────────────────┐   commands   ┌────────────────┐              │
//! │  │ CommandWorker  │─────────────▶│    Registry    │              │
//! │  │ (per command   │              │ (client → sensor│             │
//! │  │  connection)   │──┐           │    records)     │             │
//! │  └────────────────┘  │           └───────┬────────┘              │
//! │                      │ start/stop        │ listeners             │
//! │                      ▼                   ▼                       │
//! │  ┌────────────────┐ ingest ┌────────────────┐  frames  ┌───────┐ │
//! │  │ SensorModule   │───────▶│   Dispatcher   │─────────▶│ Event │ │
//! │  │ (simulated /   │ queue  │ synthesize,    │          │ sinks │ │
//! │  │  virtual)      │        │ sort, fan out  │          └───────┘ │
//! │  └────────────────┘        └────────────────┘                    │
//! │                                                                  │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Panic-Free Guarantees
//!
//! All production code in this crate follows the panic-free policy:
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - All fallible operations return `Result` or `Option`
//! - Channel operations handle closure gracefully

pub mod clock;
pub mod config;
pub mod context;
pub mod dispatcher;
pub mod module;
pub mod permission;
pub mod registry;
pub mod server;
pub mod situation;
pub mod virtual_sensor;

pub use config::{ConfigError, DaemonConfig};
pub use context::DaemonContext;
