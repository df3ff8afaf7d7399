use amigo_core::model::{Checkpoint, LessonId, Session, SessionDraft, SessionId, Step, UserId};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection, SqlitePool};

use super::SqliteRepository;
use super::mapping::{
    db_err, lesson_id, map_session_step_row, optional_step_id, ser, session_id, to_i64, to_u64,
    user_id,
};
use super::step_repo::{mark_completed_on, point_at_checkpoint_on};
use crate::repository::{ProgressPersistence, SessionRepository, StorageError};

const SESSION_COLUMNS: &str = "id, owner_id, lesson_id, current_step_id, created_at";

async fn hydrate(pool: &SqlitePool, row: &SqliteRow) -> Result<Session, StorageError> {
    let id = session_id(row, "id")?;
    let steps = sqlx::query(
        r"
        SELECT ss.step_id, ss.is_completed
        FROM session_steps ss
        JOIN steps s ON s.id = ss.step_id
        WHERE ss.session_id = ?1
        ORDER BY s.created_at ASC, s.id ASC
        ",
    )
    .bind(to_i64("session_id", id.value())?)
    .fetch_all(pool)
    .await
    .map_err(db_err)?
    .iter()
    .map(map_session_step_row)
    .collect::<Result<Vec<_>, _>>()?;

    Ok(Session::from_persisted(
        id,
        user_id(row, "owner_id")?,
        lesson_id(row, "lesson_id")?,
        optional_step_id(row, "current_step_id")?,
        steps,
        row.try_get("created_at").map_err(ser)?,
    ))
}

/// Rewrites the pointer and every per-step record of a stored session.
async fn write_session_on(
    conn: &mut SqliteConnection,
    session: &Session,
) -> Result<(), StorageError> {
    let key = to_i64("session_id", session.id().value())?;
    let current = session
        .current_step()
        .map(|id| to_i64("step_id", id.value()))
        .transpose()?;

    let res = sqlx::query("UPDATE sessions SET current_step_id = ?1 WHERE id = ?2")
        .bind(current)
        .bind(key)
        .execute(&mut *conn)
        .await
        .map_err(db_err)?;
    if res.rows_affected() == 0 {
        return Err(StorageError::NotFound);
    }

    sqlx::query("DELETE FROM session_steps WHERE session_id = ?1")
        .bind(key)
        .execute(&mut *conn)
        .await
        .map_err(db_err)?;
    for entry in session.steps() {
        sqlx::query(
            r"
            INSERT INTO session_steps (session_id, step_id, is_completed)
            VALUES (?1, ?2, ?3)
            ",
        )
        .bind(key)
        .bind(to_i64("step_id", entry.step_id.value())?)
        .bind(entry.is_completed)
        .execute(&mut *conn)
        .await
        .map_err(db_err)?;
    }
    Ok(())
}

#[async_trait::async_trait]
impl SessionRepository for SqliteRepository {
    async fn insert_session(&self, draft: &SessionDraft) -> Result<Session, StorageError> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        let res = sqlx::query(
            r"
            INSERT INTO sessions (owner_id, lesson_id, current_step_id, created_at)
            VALUES (?1, ?2, ?3, ?4)
            ",
        )
        .bind(to_i64("owner_id", draft.owner_id.value())?)
        .bind(to_i64("lesson_id", draft.lesson_id.value())?)
        .bind(to_i64("step_id", draft.current_step.value())?)
        .bind(draft.created_at)
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;
        let id = SessionId::new(to_u64("session_id", res.last_insert_rowid())?);

        for step_id in &draft.steps {
            sqlx::query(
                r"
                INSERT INTO session_steps (session_id, step_id, is_completed)
                VALUES (?1, ?2, 0)
                ",
            )
            .bind(to_i64("session_id", id.value())?)
            .bind(to_i64("step_id", step_id.value())?)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;
        }

        tx.commit().await.map_err(db_err)?;
        self.get_session(id).await?.ok_or(StorageError::NotFound)
    }

    async fn get_session(&self, id: SessionId) -> Result<Option<Session>, StorageError> {
        let row = sqlx::query(&format!("SELECT {SESSION_COLUMNS} FROM sessions WHERE id = ?1"))
            .bind(to_i64("session_id", id.value())?)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        match row {
            Some(row) => hydrate(&self.pool, &row).await.map(Some),
            None => Ok(None),
        }
    }

    async fn find_session(
        &self,
        owner: UserId,
        lesson_id: LessonId,
    ) -> Result<Option<Session>, StorageError> {
        let row = sqlx::query(&format!(
            "SELECT {SESSION_COLUMNS} FROM sessions WHERE owner_id = ?1 AND lesson_id = ?2"
        ))
        .bind(to_i64("owner_id", owner.value())?)
        .bind(to_i64("lesson_id", lesson_id.value())?)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;
        match row {
            Some(row) => hydrate(&self.pool, &row).await.map(Some),
            None => Ok(None),
        }
    }

    async fn list_sessions(&self, owner: UserId) -> Result<Vec<Session>, StorageError> {
        let rows = sqlx::query(&format!(
            "SELECT {SESSION_COLUMNS} FROM sessions WHERE owner_id = ?1 ORDER BY id ASC"
        ))
        .bind(to_i64("owner_id", owner.value())?)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        let mut sessions = Vec::with_capacity(rows.len());
        for row in &rows {
            sessions.push(hydrate(&self.pool, row).await?);
        }
        Ok(sessions)
    }

    async fn update_session(&self, session: &Session) -> Result<(), StorageError> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;
        write_session_on(&mut *tx, session).await?;
        tx.commit().await.map_err(db_err)?;
        Ok(())
    }

    async fn delete_session(&self, id: SessionId) -> Result<bool, StorageError> {
        let res = sqlx::query("DELETE FROM sessions WHERE id = ?1")
            .bind(to_i64("session_id", id.value())?)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(res.rows_affected() > 0)
    }
}

#[async_trait::async_trait]
impl ProgressPersistence for SqliteRepository {
    async fn apply_completion(
        &self,
        step: &Step,
        session: Option<&Session>,
    ) -> Result<(), StorageError> {
        if session.is_some_and(|s| s.lesson_id() != step.lesson_id) {
            return Err(StorageError::Conflict);
        }

        let mut tx = self.pool.begin().await.map_err(db_err)?;
        let written = async {
            mark_completed_on(&mut *tx, step.id, step.is_completed).await?;
            if let Some(session) = session {
                write_session_on(&mut *tx, session).await?;
            }
            Ok::<_, StorageError>(())
        }
        .await;

        match written {
            Ok(()) => tx.commit().await.map_err(db_err),
            Err(e) => {
                tx.rollback().await.map_err(db_err)?;
                Err(e)
            }
        }
    }

    async fn apply_checkpoint(
        &self,
        step: &Step,
        checkpoint: &Checkpoint,
    ) -> Result<(), StorageError> {
        if checkpoint.step_id != step.id {
            return Err(StorageError::Conflict);
        }

        let mut tx = self.pool.begin().await.map_err(db_err)?;
        point_at_checkpoint_on(&mut *tx, step.id, step.current_checkpoint_id).await?;
        let res = sqlx::query(
            "UPDATE checkpoints SET is_completed = ?1, test = ?2 WHERE id = ?3 AND step_id = ?4",
        )
        .bind(checkpoint.is_completed)
        .bind(&checkpoint.test)
        .bind(to_i64("checkpoint_id", checkpoint.id.value())?)
        .bind(to_i64("step_id", step.id.value())?)
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;
        if res.rows_affected() == 0 {
            return Err(StorageError::NotFound);
        }
        tx.commit().await.map_err(db_err)?;
        Ok(())
    }
}
