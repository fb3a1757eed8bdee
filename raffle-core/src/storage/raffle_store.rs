use crate::error::{CoreError, Result};
use crate::storage::Storage;
use crate::types::{Address, Amount, RequestId};
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};
use serde::{Deserialize, Serialize};

/// A deployed raffle and its last saved snapshot
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RaffleRecord {
    pub id: String,
    pub network: String,
    pub snapshot: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One completed round
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundRecord {
    pub raffle_id: String,
    pub round: u64,
    pub request_id: RequestId,
    pub winner: Address,
    pub prize: Amount,
    pub players: usize,
    /// Unix seconds
    pub closed_at: u64,
}

pub struct RaffleStore<'a> {
    storage: &'a Storage,
}

fn to_sql_int(value: u64, field: &str) -> Result<i64> {
    i64::try_from(value)
        .map_err(|_| CoreError::internal(format!("{} does not fit in storage: {}", field, value)))
}

// prize is kept as decimal TEXT since wei totals exceed INTEGER
fn parse_prize(text: String) -> rusqlite::Result<Amount> {
    text.parse::<u128>().map(Amount::from_wei).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(4, rusqlite::types::Type::Text, Box::new(e))
    })
}

fn timestamp(secs: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(secs, 0).unwrap_or_else(Utc::now)
}

impl<'a> RaffleStore<'a> {
    pub fn new(storage: &'a Storage) -> Self {
        Self { storage }
    }

    pub async fn save_raffle(&self, record: &RaffleRecord) -> Result<()> {
        let conn = self.storage.get_connection().await;

        conn.execute(
            "INSERT INTO raffles (id, network, snapshot, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(id) DO UPDATE SET snapshot = ?3, updated_at = ?5",
            params![
                record.id,
                record.network,
                serde_json::to_string(&record.snapshot)?,
                record.created_at.timestamp(),
                record.updated_at.timestamp(),
            ],
        )?;

        tracing::debug!("Saved raffle {}", record.id);
        Ok(())
    }

    pub async fn load_raffle(&self, raffle_id: &str) -> Result<Option<RaffleRecord>> {
        let conn = self.storage.get_connection().await;

        let mut stmt = conn.prepare(
            "SELECT id, network, snapshot, created_at, updated_at
             FROM raffles WHERE id = ?1",
        )?;

        let row = stmt
            .query_row(params![raffle_id], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, i64>(3)?,
                    row.get::<_, i64>(4)?,
                ))
            })
            .optional()?;

        match row {
            Some((id, network, snapshot, created_at, updated_at)) => Ok(Some(RaffleRecord {
                id,
                network,
                snapshot: serde_json::from_str(&snapshot)?,
                created_at: timestamp(created_at),
                updated_at: timestamp(updated_at),
            })),
            None => Ok(None),
        }
    }

    pub async fn list_raffles(&self) -> Result<Vec<RaffleRecord>> {
        let conn = self.storage.get_connection().await;

        let mut stmt = conn.prepare(
            "SELECT id, network, snapshot, created_at, updated_at
             FROM raffles ORDER BY created_at DESC",
        )?;

        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, i64>(3)?,
                row.get::<_, i64>(4)?,
            ))
        })?;

        let mut raffles = Vec::new();
        for row in rows {
            let (id, network, snapshot, created_at, updated_at) = row?;
            raffles.push(RaffleRecord {
                id,
                network,
                snapshot: serde_json::from_str(&snapshot)?,
                created_at: timestamp(created_at),
                updated_at: timestamp(updated_at),
            });
        }

        Ok(raffles)
    }

    pub async fn save_round(&self, round: &RoundRecord) -> Result<()> {
        let conn = self.storage.get_connection().await;

        conn.execute(
            "INSERT OR REPLACE INTO rounds
             (raffle_id, round, request_id, winner, prize, players, closed_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                round.raffle_id,
                to_sql_int(round.round, "round")?,
                to_sql_int(round.request_id.value(), "request id")?,
                round.winner.as_str(),
                round.prize.to_wei().to_string(),
                to_sql_int(round.players as u64, "players")?,
                to_sql_int(round.closed_at, "closed_at")?,
            ],
        )?;

        Ok(())
    }

    /// Rounds of one raffle, or of every raffle when `raffle_id` is `None`
    pub async fn list_rounds(&self, raffle_id: Option<&str>) -> Result<Vec<RoundRecord>> {
        let conn = self.storage.get_connection().await;

        let mut stmt = conn.prepare(
            "SELECT raffle_id, round, request_id, winner, prize, players, closed_at
             FROM rounds WHERE (?1 IS NULL OR raffle_id = ?1)
             ORDER BY closed_at ASC, round ASC",
        )?;

        let rows = stmt.query_map(params![raffle_id], |row| {
            Ok(RoundRecord {
                raffle_id: row.get(0)?,
                round: row.get::<_, i64>(1)? as u64,
                request_id: RequestId::new(row.get::<_, i64>(2)? as u64),
                winner: Address::new(row.get::<_, String>(3)?),
                prize: parse_prize(row.get::<_, String>(4)?)?,
                players: row.get::<_, i64>(5)? as usize,
                closed_at: row.get::<_, i64>(6)? as u64,
            })
        })?;

        let mut rounds = Vec::new();
        for round in rows {
            rounds.push(round?);
        }

        Ok(rounds)
    }
}
