//! Operator steering queue
//!
//! A FIFO of [`SteeringCommand`]s persisted in the agent database, so the CLI
//! can enqueue commands from another process. The scheduler drains one batch
//! per iteration before deciding whether to proceed.

use anyhow::{Context, Result};
use chrono::Utc;
use sdk::SteeringCommand;
use sqlx::{Row, SqlitePool};
use tracing::{debug, warn};

/// Most commands applied in a single iteration
pub const DEFAULT_DRAIN_BATCH: usize = 32;

#[derive(Clone)]
pub struct CommandQueue {
    pool: SqlitePool,
}

impl CommandQueue {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Append a command; returns its sequence number
    pub async fn enqueue(&self, command: &SteeringCommand) -> Result<i64> {
        let payload =
            serde_json::to_string(command).context("Failed to serialize steering command")?;

        let seq = sqlx::query("INSERT INTO steering_commands (command, enqueued_at) VALUES (?, ?)")
            .bind(payload)
            .bind(Utc::now().timestamp_millis())
            .execute(&self.pool)
            .await
            .context("Failed to enqueue steering command")?
            .last_insert_rowid();

        debug!("Enqueued steering command {} as #{}", command.name(), seq);
        Ok(seq)
    }

    /// Remove and return up to `max` commands in enqueue order
    ///
    /// Rows that no longer decode are dropped with a warning.
    pub async fn drain(&self, max: usize) -> Result<Vec<SteeringCommand>> {
        let mut tx = self
            .pool
            .begin()
            .await
            .context("Failed to begin steering transaction")?;

        let rows = sqlx::query("SELECT seq, command FROM steering_commands ORDER BY seq LIMIT ?")
            .bind(max as i64)
            .fetch_all(&mut *tx)
            .await
            .context("Failed to read steering commands")?;

        let mut commands = Vec::with_capacity(rows.len());
        for row in &rows {
            let seq: i64 = row.get("seq");
            let payload: String = row.get("command");
            match serde_json::from_str::<SteeringCommand>(&payload) {
                Ok(command) => commands.push(command),
                Err(e) => warn!("Dropping malformed steering command #{}: {}", seq, e),
            }

            sqlx::query("DELETE FROM steering_commands WHERE seq = ?")
                .bind(seq)
                .execute(&mut *tx)
                .await
                .context("Failed to remove steering command")?;
        }

        tx.commit()
            .await
            .context("Failed to commit steering drain")?;
        Ok(commands)
    }

    /// Number of commands waiting
    pub async fn pending(&self) -> Result<i64> {
        sqlx::query_scalar("SELECT COUNT(*) FROM steering_commands")
            .fetch_one(&self.pool)
            .await
            .context("Failed to count steering commands")
    }
}
