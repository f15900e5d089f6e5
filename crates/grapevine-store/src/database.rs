// SPDX-FileCopyrightText: 2026 Grapevine Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Database connection management with PRAGMA setup, WAL mode, and lifecycle.
//!
//! All access goes through tokio-rusqlite's single background thread, which
//! serializes writes. Do NOT open additional connections for writes: the
//! atomicity of invite consumption and batch commits depends on the single
//! writer.

use tokio_rusqlite::Connection;

use grapevine_core::GrapevineError;

use crate::migrations;

/// Convert tokio-rusqlite errors into [`GrapevineError::Storage`].
pub fn map_tr_err(e: tokio_rusqlite::Error) -> GrapevineError {
    GrapevineError::storage(e)
}

/// Handle to the relational store.
#[derive(Clone)]
pub struct Database {
    conn: Connection,
}

impl Database {
    /// Open (or create) the database at `path`, enable WAL and foreign
    /// keys, and apply migrations.
    pub async fn open(path: &str) -> Result<Self, GrapevineError> {
        let conn = Connection::open(path).await.map_err(GrapevineError::storage)?;
        Self::configure(&conn).await?;
        migrations::apply(&conn).await?;
        Ok(Self { conn })
    }

    /// In-memory database for tests.
    pub async fn open_in_memory() -> Result<Self, GrapevineError> {
        let conn = Connection::open_in_memory().await.map_err(GrapevineError::storage)?;
        Self::configure(&conn).await?;
        migrations::apply(&conn).await?;
        Ok(Self { conn })
    }

    async fn configure(conn: &Connection) -> Result<(), GrapevineError> {
        conn.call(|conn| {
            conn.pragma_update(None, "journal_mode", "WAL")?;
            conn.pragma_update(None, "foreign_keys", "ON")?;
            conn.pragma_update(None, "busy_timeout", 5000)?;
            Ok(())
        })
        .await
        .map_err(map_tr_err)
    }

    /// The underlying tokio-rusqlite connection.
    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Close the background connection thread.
    pub async fn close(self) -> Result<(), GrapevineError> {
        self.conn
            .close()
            .await
            .map_err(|e| GrapevineError::storage(e))
    }
}
