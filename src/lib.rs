//! ferry - Retry and pivot utilities for data-movement workflow jobs
//!
//! Scheduled jobs move rows between a warehouse, object storage, a shared
//! drive and messaging gateways. ferry holds the parts of those jobs that
//! are more than a single SDK call.
//!
//! # Modules
//!
//! - `core`: Bounded retry executor and polled file locks
//! - `pivot`: Stacked multi-metric pivot tables
//! - `domain`: Data structures (Value, Row, Table)
//! - `adapters`: CSV export, drive upload naming, SMS delivery classification
//! - `config`: Layered configuration
//! - `cli`: Command-line interface
//!
//! # Usage
//!
//! ```bash
//! # Reshape query output into a pivot CSV
//! ferry pivot --spec pivot.yaml --input rows.json --output report.csv
//!
//! # Serialize jobs that write the same file
//! ferry lock daily_report -- ./export.sh
//! ```

pub mod adapters;
pub mod cli;
pub mod config;
pub mod core;
pub mod domain;
pub mod pivot;

// Re-export main types at crate root for convenience
pub use crate::core::{Attempt, FileLock, LockSettings, RetryError, RetryExecutor, RetryPolicy};
pub use crate::domain::{Row, Table, Value};
pub use crate::pivot::{reshape, FieldRef, PivotError, PivotReshaper, PivotSpec, SortField};
