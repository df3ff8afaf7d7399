use amigo_core::model::{Lesson, LessonDraft, LessonId, LessonStatus, StepDraft, UserId};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use super::SqliteRepository;
use super::mapping::{
    db_err, lesson_id, map_outline_row, parse_status, ser, to_i64, to_u64, user_id,
};
use super::step_repo::insert_step_tx;
use crate::repository::{LessonRepository, StorageError};

const LESSON_COLUMNS: &str = "id, owner_id, title, description, status, created_at";

async fn hydrate(pool: &SqlitePool, row: &SqliteRow) -> Result<Lesson, StorageError> {
    let id = lesson_id(row, "id")?;
    let outlines = sqlx::query(
        r"
        SELECT id, name, is_completed, created_at
        FROM steps
        WHERE lesson_id = ?1
        ORDER BY created_at ASC, id ASC
        ",
    )
    .bind(to_i64("lesson_id", id.value())?)
    .fetch_all(pool)
    .await
    .map_err(db_err)?
    .iter()
    .map(map_outline_row)
    .collect::<Result<Vec<_>, _>>()?;

    let status: String = row.try_get("status").map_err(ser)?;
    Lesson::from_persisted(
        id,
        user_id(row, "owner_id")?,
        row.try_get::<String, _>("title").map_err(ser)?,
        row.try_get("description").map_err(ser)?,
        parse_status(&status)?,
        row.try_get("created_at").map_err(ser)?,
        outlines,
    )
    .map_err(ser)
}

async fn hydrate_all(pool: &SqlitePool, rows: &[SqliteRow]) -> Result<Vec<Lesson>, StorageError> {
    let mut lessons = Vec::with_capacity(rows.len());
    for row in rows {
        lessons.push(hydrate(pool, row).await?);
    }
    Ok(lessons)
}

#[async_trait::async_trait]
impl LessonRepository for SqliteRepository {
    async fn create_lesson(
        &self,
        lesson: &LessonDraft,
        seed: &StepDraft,
    ) -> Result<Lesson, StorageError> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        let res = sqlx::query(
            r"
            INSERT INTO lessons (owner_id, title, description, status, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ",
        )
        .bind(to_i64("owner_id", lesson.owner_id.value())?)
        .bind(&lesson.title)
        .bind(&lesson.description)
        .bind(lesson.status.as_str())
        .bind(lesson.created_at)
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;
        let id = LessonId::new(to_u64("lesson_id", res.last_insert_rowid())?);

        insert_step_tx(&mut *tx, id, seed).await?;
        tx.commit().await.map_err(db_err)?;

        self.get_lesson(id).await?.ok_or(StorageError::NotFound)
    }

    async fn get_lesson(&self, id: LessonId) -> Result<Option<Lesson>, StorageError> {
        let row = sqlx::query(&format!("SELECT {LESSON_COLUMNS} FROM lessons WHERE id = ?1"))
            .bind(to_i64("lesson_id", id.value())?)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        match row {
            Some(row) => hydrate(&self.pool, &row).await.map(Some),
            None => Ok(None),
        }
    }

    async fn list_lessons(
        &self,
        status: Option<LessonStatus>,
    ) -> Result<Vec<Lesson>, StorageError> {
        let rows = match status {
            Some(status) => {
                sqlx::query(&format!(
                    "SELECT {LESSON_COLUMNS} FROM lessons WHERE status = ?1 ORDER BY id ASC"
                ))
                .bind(status.as_str())
                .fetch_all(&self.pool)
                .await
            }
            None => {
                sqlx::query(&format!("SELECT {LESSON_COLUMNS} FROM lessons ORDER BY id ASC"))
                    .fetch_all(&self.pool)
                    .await
            }
        }
        .map_err(db_err)?;
        hydrate_all(&self.pool, &rows).await
    }

    async fn list_lessons_by_owner(&self, owner: UserId) -> Result<Vec<Lesson>, StorageError> {
        let rows = sqlx::query(&format!(
            "SELECT {LESSON_COLUMNS} FROM lessons WHERE owner_id = ?1 ORDER BY id ASC"
        ))
        .bind(to_i64("owner_id", owner.value())?)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        hydrate_all(&self.pool, &rows).await
    }

    async fn update_lesson(&self, lesson: &Lesson) -> Result<(), StorageError> {
        let res = sqlx::query(
            r"
            UPDATE lessons
            SET title = ?1, description = ?2, status = ?3
            WHERE id = ?4
            ",
        )
        .bind(lesson.title())
        .bind(lesson.description())
        .bind(lesson.status().as_str())
        .bind(to_i64("lesson_id", lesson.id().value())?)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        if res.rows_affected() == 0 {
            return Err(StorageError::NotFound);
        }
        Ok(())
    }

    async fn delete_lesson(&self, id: LessonId) -> Result<bool, StorageError> {
        let res = sqlx::query("DELETE FROM lessons WHERE id = ?1")
            .bind(to_i64("lesson_id", id.value())?)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(res.rows_affected() > 0)
    }
}
