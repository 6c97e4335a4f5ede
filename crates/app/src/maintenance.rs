use std::{sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use metrics::counter;
use sqlx::Error as SqlxError;
use thiserror::Error;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use market_admin_storage::Database;

const BATCH_LIMIT: i64 = 500;
const MIN_INTERVAL: Duration = Duration::from_secs(1);

/// Background worker that deletes expired admin sessions.
#[derive(Clone)]
pub struct SessionSweeper {
    database: Database,
    clock: Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>,
    interval: Duration,
}

impl SessionSweeper {
    pub fn new(database: Database, interval: Duration) -> Self {
        Self {
            database,
            clock: Arc::new(Utc::now),
            interval: interval.max(MIN_INTERVAL),
        }
    }

    #[cfg(test)]
    pub fn with_clock(mut self, clock: Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>) -> Self {
        self.clock = clock;
        self
    }

    /// Runs the sweep loop in the background.
    pub fn spawn(self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            self.run_loop().await;
        })
    }

    async fn run_loop(self) {
        let mut ticker = interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            if let Err(err) = self.run_once().await {
                error!(stage = "session", error = %err, "session sweep failed");
            }
        }
    }

    /// Deletes expired sessions in batches until none remain or the
    /// database reports it is busy. Returns the number of rows removed.
    pub async fn run_once(&self) -> Result<u64, SweepError> {
        let now = (self.clock)();
        let sessions = self.database.sessions();
        let mut deleted = 0u64;
        let mut busy = false;

        loop {
            match sessions.delete_expired_batch(now, BATCH_LIMIT).await {
                Ok(0) => break,
                Ok(batch) => {
                    deleted += batch;
                    counter!("sessions_swept_total").increment(batch);
                }
                Err(err) if is_sqlite_busy(&err) => {
                    busy = true;
                    counter!("db_busy_total", "op" => "session_sweep").increment(1);
                    warn!(stage = "session", error = %err, "session sweep hit busy timeout");
                    break;
                }
                Err(err) => return Err(SweepError::Delete(err)),
            }
        }

        if deleted > 0 {
            info!(stage = "session", deleted, busy, "expired sessions removed");
        } else {
            debug!(stage = "session", busy, "no expired sessions");
        }
        Ok(deleted)
    }
}

#[derive(Debug, Error)]
pub enum SweepError {
    #[error("failed to delete expired sessions")]
    Delete(#[source] SqlxError),
}

fn is_sqlite_busy(err: &SqlxError) -> bool {
    match err {
        SqlxError::Database(db_err) => matches!(db_err.code().as_deref(), Some("5") | Some("6")),
        _ => false,
    }
}
