//! Database utilities for the SQLite file that backs the document store.
//!
//! This module provides:
//! - [`connection::connect_sqlite`] which opens a connection and applies WAL, foreign_keys=ON,
//!   and a 5000ms busy_timeout.
//! - Embedded Diesel migrations: [`migrate::run_sqlite`], [`migrate::run_pending`], and
//!   [`migrate::run_all`] which accepts `sqlite:` URLs as well as bare file paths.
//!
//! Example:
//! ```no_run
//! use ophys_sync::db::{connection, migrate};
//!
//! let db_path = std::env::temp_dir().join("ophys_sync_example.db");
//! migrate::run_all(db_path.to_str().unwrap()).expect("migrations");
//!
//! let _conn = connection::connect_sqlite(db_path.to_str().unwrap()).expect("connect");
//! ```

pub mod connection;
pub mod migrate;
