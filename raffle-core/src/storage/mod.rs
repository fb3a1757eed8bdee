pub mod raffle_store;

pub use raffle_store::{RaffleRecord, RaffleStore, RoundRecord};

use crate::error::Result;
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
            tokio::fs::create_dir_all(parent).await?;
        }

        let conn = Connection::open(db_path)?;
        let storage = Self {
            conn: Mutex::new(conn),
        };

        storage.init_schema().await?;
        Ok(storage)
    }

    async fn init_schema(&self) -> Result<()> {
        let conn = self.conn.lock().await;

        // Deployed raffles and their latest durable state
        conn.execute(
            "CREATE TABLE IF NOT EXISTS raffles (
                id TEXT PRIMARY KEY,
                network TEXT NOT NULL,
                snapshot TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            )",
            [],
        )?;

        // Completed rounds
        conn.execute(
            "CREATE TABLE IF NOT EXISTS rounds (
                raffle_id TEXT NOT NULL,
                round INTEGER NOT NULL,
                request_id INTEGER NOT NULL,
                winner TEXT NOT NULL,
                prize TEXT NOT NULL,
                players INTEGER NOT NULL,
                closed_at INTEGER NOT NULL,
                FOREIGN KEY (raffle_id) REFERENCES raffles(id),
                PRIMARY KEY (raffle_id, round)
            )",
            [],
        )?;

        Ok(())
    }

    pub async fn get_connection(&self) -> tokio::sync::MutexGuard<'_, Connection> {
        self.conn.lock().await
    }
}
