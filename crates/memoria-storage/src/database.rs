// SPDX-FileCopyrightText: 2026 Memoria Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Database connection management with PRAGMA setup, WAL mode, and lifecycle.
//!
//! All writes are serialized through tokio-rusqlite's single background thread.
//! Do NOT create additional Connection instances for writes.

use std::path::Path;

use memoria_config::model::StorageConfig;
use memoria_core::MemoriaError;
use tokio_rusqlite::Connection;
use tracing::{debug, info};

use crate::migrations::run_migrations;

/// Convert tokio-rusqlite errors into `MemoriaError::Storage`.
pub fn map_tr_err(e: tokio_rusqlite::Error<rusqlite::Error>) -> MemoriaError {
    MemoriaError::Storage {
        source: Box::new(e),
    }
}

/// Handle to the single SQLite connection used by every store.
///
/// Cloning a `Database` shares the same background thread.
#[derive(Clone)]
pub struct Database {
    conn: Connection,
}

impl Database {
    /// Open (or create) the database file at `path` with WAL enabled and
    /// run pending migrations.
    pub async fn open(path: &str) -> Result<Self, MemoriaError> {
        Self::open_with(path, true).await
    }

    /// Open the database described by a `[storage]` config section.
    pub async fn open_with_config(config: &StorageConfig) -> Result<Self, MemoriaError> {
        Self::open_with(&config.database_path, config.wal_mode).await
    }

    /// Open a private in-memory database with the full schema applied.
    pub async fn open_in_memory() -> Result<Self, MemoriaError> {
        let conn = Connection::open_in_memory()
            .await
            .map_err(|e| MemoriaError::Storage {
                source: Box::new(e),
            })?;
        let db = Self { conn };
        db.prepare(false).await?;
        Ok(db)
    }

    async fn open_with(path: &str, wal_mode: bool) -> Result<Self, MemoriaError> {
        if let Some(parent) = Path::new(path).parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| MemoriaError::Storage {
                    source: Box::new(e),
                })?;
            }
        }

        let conn = Connection::open(path)
            .await
            .map_err(|e| MemoriaError::Storage {
                source: Box::new(e),
            })?;
        let db = Self { conn };
        db.prepare(wal_mode).await?;
        info!(path, wal_mode, "database opened");
        Ok(db)
    }

    /// Apply connection PRAGMAs, then embedded migrations.
    async fn prepare(&self, wal_mode: bool) -> Result<(), MemoriaError> {
        self.conn
            .call(move |conn| -> Result<(), MemoriaError> {
                let pragmas = if wal_mode {
                    "PRAGMA journal_mode = WAL;
                     PRAGMA synchronous = NORMAL;
                     PRAGMA foreign_keys = ON;
                     PRAGMA busy_timeout = 5000;"
                } else {
                    "PRAGMA foreign_keys = ON;
                     PRAGMA busy_timeout = 5000;"
                };
                conn.execute_batch(pragmas)
                    .map_err(|e| MemoriaError::Storage {
                        source: Box::new(e),
                    })?;
                run_migrations(conn)
            })
            .await
            .map_err(|e| MemoriaError::Storage {
                source: format!("database setup failed: {e}").into(),
            })?;
        debug!("schema up to date");
        Ok(())
    }

    /// Returns the underlying connection for typed query modules.
    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Checkpoint the WAL so the main database file is self-contained.
    pub async fn close(&self) -> Result<(), MemoriaError> {
        self.conn
            .call(|conn| -> Result<(), rusqlite::Error> {
                conn.execute_batch("PRAGMA wal_checkpoint(TRUNCATE);")?;
                Ok(())
            })
            .await
            .map_err(map_tr_err)?;
        debug!("WAL checkpoint complete");
        Ok(())
    }
}
