use chrono::Utc;
use sqlx::SqlitePool;

use super::SqliteInitError;

const SCHEMA_V1: &[&str] = &[
    r"
        CREATE TABLE IF NOT EXISTS lessons (
            id INTEGER PRIMARY KEY,
            owner_id INTEGER NOT NULL,
            title TEXT NOT NULL,
            description TEXT,
            status TEXT NOT NULL CHECK (status IN ('DRAFT', 'PENDING_PUBLISH', 'PUBLISHED')),
            created_at TEXT NOT NULL
        );
    ",
    r"
        CREATE TABLE IF NOT EXISTS steps (
            id INTEGER PRIMARY KEY,
            lesson_id INTEGER NOT NULL,
            name TEXT NOT NULL,
            instructions TEXT NOT NULL,
            is_completed INTEGER NOT NULL DEFAULT 0 CHECK (is_completed IN (0, 1)),
            current_checkpoint_id INTEGER,
            created_at TEXT NOT NULL,
            FOREIGN KEY (lesson_id) REFERENCES lessons(id) ON DELETE CASCADE
        );
    ",
    r"
        CREATE TABLE IF NOT EXISTS checkpoints (
            id INTEGER PRIMARY KEY,
            step_id INTEGER NOT NULL,
            is_completed INTEGER NOT NULL DEFAULT 0 CHECK (is_completed IN (0, 1)),
            test TEXT,
            created_at TEXT NOT NULL,
            FOREIGN KEY (step_id) REFERENCES steps(id) ON DELETE CASCADE
        );
    ",
    r"
        CREATE TABLE IF NOT EXISTS code_modules (
            id INTEGER PRIMARY KEY,
            step_id INTEGER NOT NULL,
            name TEXT NOT NULL,
            value TEXT NOT NULL,
            is_entry INTEGER NOT NULL DEFAULT 0 CHECK (is_entry IN (0, 1)),
            UNIQUE (step_id, name),
            FOREIGN KEY (step_id) REFERENCES steps(id) ON DELETE CASCADE
        );
    ",
    r"
        CREATE UNIQUE INDEX IF NOT EXISTS idx_code_modules_single_entry
            ON code_modules(step_id) WHERE is_entry = 1;
    ",
    r"
        CREATE TABLE IF NOT EXISTS dependencies (
            id INTEGER PRIMARY KEY,
            step_id INTEGER NOT NULL,
            package TEXT NOT NULL,
            version TEXT NOT NULL,
            FOREIGN KEY (step_id) REFERENCES steps(id) ON DELETE CASCADE
        );
    ",
    r"
        CREATE TABLE IF NOT EXISTS sessions (
            id INTEGER PRIMARY KEY,
            owner_id INTEGER NOT NULL,
            lesson_id INTEGER NOT NULL,
            current_step_id INTEGER,
            created_at TEXT NOT NULL,
            UNIQUE (owner_id, lesson_id),
            FOREIGN KEY (lesson_id) REFERENCES lessons(id) ON DELETE CASCADE,
            FOREIGN KEY (current_step_id) REFERENCES steps(id) ON DELETE SET NULL
        );
    ",
    r"
        CREATE TABLE IF NOT EXISTS session_steps (
            session_id INTEGER NOT NULL,
            step_id INTEGER NOT NULL,
            is_completed INTEGER NOT NULL DEFAULT 0 CHECK (is_completed IN (0, 1)),
            PRIMARY KEY (session_id, step_id),
            FOREIGN KEY (session_id) REFERENCES sessions(id) ON DELETE CASCADE,
            FOREIGN KEY (step_id) REFERENCES steps(id) ON DELETE CASCADE
        );
    ",
    r"
        CREATE TABLE IF NOT EXISTS auth_tokens (
            token TEXT PRIMARY KEY,
            user_id INTEGER NOT NULL,
            created_at TEXT NOT NULL
        );
    ",
    r"
        CREATE INDEX IF NOT EXISTS idx_steps_lesson_created
            ON steps(lesson_id, created_at, id);
    ",
    r"
        CREATE INDEX IF NOT EXISTS idx_checkpoints_step_created
            ON checkpoints(step_id, created_at, id);
    ",
    r"
        CREATE INDEX IF NOT EXISTS idx_sessions_owner
            ON sessions(owner_id);
    ",
];

/// Runs pending schema migrations, each inside its own transaction.
pub async fn run_migrations(pool: &SqlitePool) -> Result<(), SqliteInitError> {
    async fn is_applied(pool: &SqlitePool, version: i64) -> Result<bool, sqlx::Error> {
        let row = sqlx::query("SELECT 1 FROM schema_migrations WHERE version = ?1")
            .bind(version)
            .fetch_optional(pool)
            .await?;
        Ok(row.is_some())
    }

    sqlx::query(
        r"
            CREATE TABLE IF NOT EXISTS schema_migrations (
                version INTEGER PRIMARY KEY,
                applied_at TEXT NOT NULL
            );
        ",
    )
    .execute(pool)
    .await?;

    let migrations: [(i64, &[&str]); 1] = [(1, SCHEMA_V1)];

    for (version, statements) in migrations {
        if is_applied(pool, version).await? {
            continue;
        }

        let mut tx = pool.begin().await?;
        for statement in statements {
            sqlx::query(*statement).execute(&mut *tx).await?;
        }
        sqlx::query(
            r"
                INSERT INTO schema_migrations (version, applied_at)
                VALUES (?1, ?2)
                ON CONFLICT(version) DO NOTHING
            ",
        )
        .bind(version)
        .bind(Utc::now())
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
    }

    Ok(())
}
