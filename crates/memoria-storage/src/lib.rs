// SPDX-FileCopyrightText: 2026 Memoria Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! SQLite persistence layer for the Memoria memory service.
//!
//! Provides WAL-mode SQLite storage with embedded migrations and a
//! single-writer concurrency model via `tokio-rusqlite`. Typed memory
//! queries live in `memoria-memory`; this crate owns the connection.

pub mod database;
pub mod migrations;

pub use database::{Database, map_tr_err};
