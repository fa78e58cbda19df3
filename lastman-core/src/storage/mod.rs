pub mod journal;
pub mod round_store;

pub use journal::SettlementJournal;
pub use round_store::RoundStore;

use crate::error::{GameError, Result};
use rusqlite::Connection;
use std::path::Path;
use tokio::sync::Mutex;

pub struct Storage {
    conn: Mutex<Connection>,
}

impl Storage {
    pub async fn new(db_path: &Path) -> Result<Self> {
        // Create parent directory if it doesn't exist
        if let Some(parent) = db_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| GameError::internal(format!("Failed to create directory: {}", e)))?;
        }

        let conn = Connection::open(db_path)?;
        let storage = Self {
            conn: Mutex::new(conn),
        };

        storage.init_schema().await?;
        Ok(storage)
    }

    pub async fn in_memory() -> Result<Self> {
        let storage = Self {
            conn: Mutex::new(Connection::open_in_memory()?),
        };
        storage.init_schema().await?;
        Ok(storage)
    }

    async fn init_schema(&self) -> Result<()> {
        let conn = self.conn.lock().await;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS rounds (
                round_id INTEGER PRIMARY KEY,
                status TEXT NOT NULL,
                data TEXT NOT NULL,
                updated_at INTEGER NOT NULL
            )",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS bonus_slots (
                round_id INTEGER NOT NULL,
                deposit_number INTEGER NOT NULL,
                phase TEXT NOT NULL,
                data TEXT NOT NULL,
                FOREIGN KEY (round_id) REFERENCES rounds(round_id),
                PRIMARY KEY (round_id, deposit_number)
            )",
            [],
        )?;

        // Requests still waiting on an oracle callback
        conn.execute(
            "CREATE TABLE IF NOT EXISTS oracle_requests (
                request_id INTEGER PRIMARY KEY,
                kind TEXT NOT NULL,
                round_id INTEGER NOT NULL,
                deposit_number INTEGER NOT NULL,
                data TEXT NOT NULL
            )",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS settlements (
                id TEXT PRIMARY KEY,
                recipient TEXT NOT NULL,
                amount TEXT NOT NULL,
                memo TEXT NOT NULL,
                timestamp INTEGER NOT NULL
            )",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS audit_log (
                id TEXT PRIMARY KEY,
                data TEXT NOT NULL,
                timestamp INTEGER NOT NULL
            )",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS oracle_anomalies (
                id TEXT PRIMARY KEY,
                data TEXT NOT NULL,
                timestamp INTEGER NOT NULL
            )",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS metadata (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            )",
            [],
        )?;

        Ok(())
    }

    pub async fn get_connection(&self) -> tokio::sync::MutexGuard<'_, Connection> {
        self.conn.lock().await
    }

    pub async fn put_meta(&self, key: &str, value: &str) -> Result<()> {
        let conn = self.get_connection().await;
        conn.execute(
            "INSERT OR REPLACE INTO metadata (key, value) VALUES (?1, ?2)",
            rusqlite::params![key, value],
        )?;
        Ok(())
    }

    pub async fn get_meta(&self, key: &str) -> Result<Option<String>> {
        let conn = self.get_connection().await;
        let result = conn.query_row(
            "SELECT value FROM metadata WHERE key = ?1",
            rusqlite::params![key],
            |row| row.get::<_, String>(0),
        );

        match result {
            Ok(value) => Ok(Some(value)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(GameError::Storage(e)),
        }
    }
}
