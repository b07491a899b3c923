//! SQLite access for the engine. One connection lives on a dedicated thread;
//! async callers ship closures to it and await the reply.

use std::{
    path::{Path, PathBuf},
    sync::{mpsc, Arc},
    thread::{self, JoinHandle},
    time::Duration,
};

use anyhow::{anyhow, bail, Context, Result};
use log::{error, info, warn};
use rusqlite::{Connection, Transaction};
use tokio::sync::oneshot;

use super::migrations::run_migrations;

/// How the connection is set up before migrations run.
#[derive(Debug, Clone)]
pub struct ConnectionOptions {
    /// How long a statement waits on a locked database before failing.
    pub busy_timeout: Duration,
    pub wal: bool,
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self {
            busy_timeout: Duration::from_secs(5),
            wal: true,
        }
    }
}

type Job = Box<dyn FnOnce(&mut Connection) + Send + 'static>;

/// Closing `jobs` ends the thread's receive loop.
struct Worker {
    jobs: Option<mpsc::Sender<Job>>,
    thread: Option<JoinHandle<()>>,
}

impl Drop for Worker {
    fn drop(&mut self) {
        self.jobs.take();
        if let Some(thread) = self.thread.take() {
            if let Err(err) = thread.join() {
                error!("Database thread panicked: {err:?}");
            }
        }
    }
}

/// Handle to the connection thread. Clones share it; the thread exits once
/// the last clone drops.
#[derive(Clone)]
pub struct Database {
    worker: Arc<Worker>,
    path: Arc<PathBuf>,
}

impl Database {
    pub fn new(path: PathBuf) -> Result<Self> {
        Self::open(path, ConnectionOptions::default())
    }

    pub fn open(path: PathBuf, options: ConnectionOptions) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create database directory {}", parent.display()))?;
        }

        let (jobs_tx, jobs_rx) = mpsc::channel::<Job>();
        let (ready_tx, ready_rx) = mpsc::sync_channel::<Result<()>>(1);
        let thread_path = path.clone();

        let thread = thread::Builder::new()
            .name("deskwatch-db".into())
            .spawn(move || {
                let mut conn = match open_connection(&thread_path, &options) {
                    Ok(conn) => conn,
                    Err(err) => {
                        let _ = ready_tx.send(Err(err));
                        return;
                    }
                };
                if ready_tx.send(Ok(())).is_err() {
                    return;
                }

                while let Ok(job) = jobs_rx.recv() {
                    job(&mut conn);
                }
                info!("Database thread for {} exiting", thread_path.display());
            })
            .context("failed to spawn database thread")?;

        ready_rx
            .recv()
            .context("database thread exited before it was ready")??;
        info!("Database ready at {}", path.display());

        Ok(Self {
            worker: Arc::new(Worker {
                jobs: Some(jobs_tx),
                thread: Some(thread),
            }),
            path: Arc::new(path),
        })
    }

    pub fn path(&self) -> &Path {
        self.path.as_path()
    }

    /// Run `task` on the connection thread and await its result.
    pub async fn execute<F, T>(&self, task: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let (reply_tx, reply_rx) = oneshot::channel();
        let job: Job = Box::new(move |conn| {
            // The caller may have given up waiting; nothing to do then.
            let _ = reply_tx.send(task(conn));
        });

        self.worker
            .jobs
            .as_ref()
            .ok_or_else(|| anyhow!("database is shutting down"))?
            .send(job)
            .map_err(|_| anyhow!("database thread is gone"))?;

        reply_rx
            .await
            .map_err(|_| anyhow!("database thread dropped the request"))?
    }

    /// Like [`Database::execute`], inside a transaction that commits only
    /// when `task` succeeds.
    pub async fn transaction<F, T>(&self, task: F) -> Result<T>
    where
        F: FnOnce(&Transaction<'_>) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        self.execute(move |conn| {
            let tx = conn.transaction().context("failed to begin transaction")?;
            let value = task(&tx)?;
            tx.commit().context("failed to commit transaction")?;
            Ok(value)
        })
        .await
    }

    pub async fn schema_version(&self) -> Result<i32> {
        self.execute(|conn| {
            conn.pragma_query_value(None, "user_version", |row| row.get(0))
                .context("failed to read user_version")
        })
        .await
    }
}

/// Closure and frame logs cascade off `employees`, so a connection that
/// will not enforce foreign keys is refused.
fn open_connection(path: &Path, options: &ConnectionOptions) -> Result<Connection> {
    let mut conn = Connection::open(path)
        .with_context(|| format!("failed to open SQLite database {}", path.display()))?;

    conn.busy_timeout(options.busy_timeout)
        .context("failed to set busy timeout")?;

    if options.wal {
        let mode: String = conn
            .pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))
            .context("failed to set journal mode")?;
        if !mode.eq_ignore_ascii_case("wal") {
            warn!("SQLite kept journal mode {mode} for {}", path.display());
        }
    }

    conn.pragma_update(None, "foreign_keys", true)
        .context("failed to enable foreign keys")?;
    let enforced: bool = conn
        .pragma_query_value(None, "foreign_keys", |row| row.get(0))
        .context("failed to read foreign_keys")?;
    if !enforced {
        bail!("SQLite connection does not enforce foreign keys");
    }

    run_migrations(&mut conn).context("failed to run database migrations")?;
    Ok(conn)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::params;

    fn temp_db() -> Database {
        let path = std::env::temp_dir().join(format!("deskwatch-conn-{}.sqlite3", uuid::Uuid::new_v4()));
        Database::new(path).unwrap()
    }

    #[tokio::test]
    async fn connection_is_configured_and_migrated() {
        let db = temp_db();
        assert_eq!(db.schema_version().await.unwrap(), 2);

        let (foreign_keys, busy_ms) = db
            .execute(|conn| {
                let fk: bool = conn.pragma_query_value(None, "foreign_keys", |row| row.get(0))?;
                let busy: i64 = conn.pragma_query_value(None, "busy_timeout", |row| row.get(0))?;
                Ok((fk, busy))
            })
            .await
            .unwrap();
        assert!(foreign_keys);
        assert_eq!(busy_ms, 5_000);
    }

    #[tokio::test]
    async fn failed_transaction_leaves_nothing_behind() {
        let db = temp_db();
        let result: Result<()> = db
            .transaction(|tx| {
                tx.execute(
                    "INSERT INTO employees (name, embedding, created_at) VALUES (?1, ?2, ?3)",
                    params!["ana", vec![0u8; 4], "2026-01-05T09:00:00Z"],
                )?;
                bail!("abandon");
            })
            .await;
        assert!(result.is_err());

        let count: i64 = db
            .execute(|conn| Ok(conn.query_row("SELECT COUNT(*) FROM employees", [], |row| row.get(0))?))
            .await
            .unwrap();
        assert_eq!(count, 0);
    }

    #[tokio::test]
    async fn orphan_closure_is_rejected() {
        let db = temp_db();
        let result = db
            .execute(|conn| {
                conn.execute(
                    "INSERT INTO closure_logs (employee_id, start_time, end_time, duration_secs, logged_at)
                     VALUES (42, 'a', 'b', 1.0, 'c')",
                    [],
                )?;
                Ok(())
            })
            .await;
        assert!(result.is_err());
    }
}
