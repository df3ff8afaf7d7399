//! `SQLite` adapter for the lesson store.
//!
//! Lessons own steps; steps own checkpoints, code modules and dependencies;
//! sessions track one student's pass through one lesson. Every child row
//! is removed with its parent through `ON DELETE CASCADE`. Deleting a step
//! first moves any session that was on it to a neighbouring step of the
//! same lesson, inside the same transaction; the `ON DELETE SET NULL` rule
//! on `sessions.current_step_id` is only reached when no such step exists.

use std::sync::Arc;
use std::time::Duration;

use sqlx::{SqlitePool, sqlite::SqlitePoolOptions};
use thiserror::Error;

use crate::repository::{
    AuthTokenRepository, LessonRepository, ProgressPersistence, SessionRepository, Storage,
    StepRepository,
};

mod auth_repo;
mod lesson_repo;
mod mapping;
mod migrate;
mod session_repo;
mod step_repo;

const MAX_CONNECTIONS: u32 = 5;
const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(5);

/// Cascading deletes need `foreign_keys`; WAL and the busy timeout let a
/// reader and the single writer share the file.
const CONNECTION_PRAGMAS: [&str; 3] = [
    "PRAGMA foreign_keys = ON;",
    "PRAGMA journal_mode = WAL;",
    "PRAGMA busy_timeout = 5000;",
];

/// Implements every repository contract over one connection pool.
#[derive(Clone)]
pub struct SqliteRepository {
    pool: SqlitePool,
}

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SqliteInitError {
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
}

impl SqliteRepository {
    /// Connect to `SQLite` using the given URL.
    ///
    /// Each pooled connection runs `CONNECTION_PRAGMAS` before first use.
    ///
    /// # Errors
    ///
    /// Returns `SqliteInitError` if the connection cannot be established or a
    /// connection pragma fails.
    pub async fn connect(database_url: &str) -> Result<Self, SqliteInitError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(MAX_CONNECTIONS)
            .acquire_timeout(ACQUIRE_TIMEOUT)
            .after_connect(|conn, _meta| {
                Box::pin(async move {
                    for pragma in CONNECTION_PRAGMAS {
                        sqlx::query(pragma).execute(&mut *conn).await?;
                    }
                    Ok(())
                })
            })
            .connect(database_url)
            .await?;
        Ok(Self { pool })
    }

    #[must_use]
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Apply pending versions of the lesson schema, tracked in
    /// `schema_migrations`.
    ///
    /// # Errors
    ///
    /// Returns `SqliteInitError` if migration queries fail.
    pub async fn migrate(&self) -> Result<(), SqliteInitError> {
        migrate::run_migrations(&self.pool).await
    }
}

impl Storage {
    /// Connect, migrate and hand every contract out as the same repository.
    ///
    /// # Errors
    ///
    /// Returns `SqliteInitError` if connection or migrations cannot be
    /// completed.
    pub async fn sqlite(database_url: &str) -> Result<Self, SqliteInitError> {
        let repo = SqliteRepository::connect(database_url).await?;
        repo.migrate().await?;
        let lessons: Arc<dyn LessonRepository> = Arc::new(repo.clone());
        let steps: Arc<dyn StepRepository> = Arc::new(repo.clone());
        let sessions: Arc<dyn SessionRepository> = Arc::new(repo.clone());
        let progress: Arc<dyn ProgressPersistence> = Arc::new(repo.clone());
        let auth_tokens: Arc<dyn AuthTokenRepository> = Arc::new(repo);
        Ok(Self {
            lessons,
            steps,
            sessions,
            progress,
            auth_tokens,
        })
    }
}
