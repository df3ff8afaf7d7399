use amigo_core::model::{
    Checkpoint, CheckpointId, CodeModule, CodeModuleId, Dependency, DependencyDraft,
    DependencyId, LessonId, ModuleDraft, Step, StepDraft, StepId,
};
use amigo_core::progression::step_after_removal;
use chrono::{DateTime, Utc};
use sqlx::{Row, SqliteConnection, SqlitePool};

use super::SqliteRepository;
use super::mapping::{
    db_err, lesson_id, map_checkpoint_row, map_dependency_row, map_module_row, map_outline_row,
    optional_checkpoint_id, ser, to_i64, to_u64,
};
use crate::repository::{StepRepository, StorageError};

/// Inserts a step with its modules and dependencies on an open connection.
///
/// Callers own the transaction; nothing is committed here.
pub(super) async fn insert_step_tx(
    conn: &mut SqliteConnection,
    lesson_id: LessonId,
    draft: &StepDraft,
) -> Result<StepId, StorageError> {
    let res = sqlx::query(
        r"
        INSERT INTO steps (lesson_id, name, instructions, is_completed, current_checkpoint_id, created_at)
        VALUES (?1, ?2, ?3, 0, NULL, ?4)
        ",
    )
    .bind(to_i64("lesson_id", lesson_id.value())?)
    .bind(&draft.name)
    .bind(&draft.instructions)
    .bind(draft.created_at)
    .execute(&mut *conn)
    .await
    .map_err(db_err)?;
    let step_id = StepId::new(to_u64("step_id", res.last_insert_rowid())?);

    for module in &draft.modules {
        insert_module_on(&mut *conn, step_id, module).await?;
    }
    for dependency in &draft.dependencies {
        insert_dependency_on(&mut *conn, step_id, dependency).await?;
    }
    Ok(step_id)
}

async fn insert_module_on(
    conn: &mut SqliteConnection,
    step_id: StepId,
    draft: &ModuleDraft,
) -> Result<CodeModule, StorageError> {
    let res = sqlx::query(
        r"
        INSERT INTO code_modules (step_id, name, value, is_entry)
        VALUES (?1, ?2, ?3, ?4)
        ",
    )
    .bind(to_i64("step_id", step_id.value())?)
    .bind(&draft.name)
    .bind(&draft.value)
    .bind(draft.is_entry)
    .execute(&mut *conn)
    .await
    .map_err(db_err)?;

    Ok(CodeModule {
        id: CodeModuleId::new(to_u64("module_id", res.last_insert_rowid())?),
        step_id,
        name: draft.name.clone(),
        value: draft.value.clone(),
        is_entry: draft.is_entry,
    })
}

async fn insert_dependency_on(
    conn: &mut SqliteConnection,
    step_id: StepId,
    draft: &DependencyDraft,
) -> Result<Dependency, StorageError> {
    let res = sqlx::query(
        r"
        INSERT INTO dependencies (step_id, package, version)
        VALUES (?1, ?2, ?3)
        ",
    )
    .bind(to_i64("step_id", step_id.value())?)
    .bind(&draft.package)
    .bind(&draft.version)
    .execute(&mut *conn)
    .await
    .map_err(db_err)?;

    Ok(Dependency {
        id: DependencyId::new(to_u64("dependency_id", res.last_insert_rowid())?),
        step_id,
        package: draft.package.clone(),
        version: draft.version.clone(),
    })
}

/// Writes the step's own columns. `NotFound` when the row is gone.
async fn write_step_on(
    conn: &mut SqliteConnection,
    step: &Step,
) -> Result<(), StorageError> {
    let checkpoint = step
        .current_checkpoint_id
        .map(|id| to_i64("checkpoint_id", id.value()))
        .transpose()?;
    let res = sqlx::query(
        r"
        UPDATE steps
        SET name = ?1, instructions = ?2, is_completed = ?3, current_checkpoint_id = ?4
        WHERE id = ?5
        ",
    )
    .bind(&step.name)
    .bind(&step.instructions)
    .bind(step.is_completed)
    .bind(checkpoint)
    .bind(to_i64("step_id", step.id.value())?)
    .execute(&mut *conn)
    .await
    .map_err(db_err)?;

    if res.rows_affected() == 0 {
        return Err(StorageError::NotFound);
    }
    Ok(())
}

/// Writes only the completion flag. `NotFound` when the row is gone.
pub(super) async fn mark_completed_on(
    conn: &mut SqliteConnection,
    step_id: StepId,
    is_completed: bool,
) -> Result<(), StorageError> {
    let res = sqlx::query("UPDATE steps SET is_completed = ?1 WHERE id = ?2")
        .bind(is_completed)
        .bind(to_i64("step_id", step_id.value())?)
        .execute(&mut *conn)
        .await
        .map_err(db_err)?;
    if res.rows_affected() == 0 {
        return Err(StorageError::NotFound);
    }
    Ok(())
}

/// Writes only the checkpoint pointer. `NotFound` when the row is gone.
pub(super) async fn point_at_checkpoint_on(
    conn: &mut SqliteConnection,
    step_id: StepId,
    checkpoint_id: Option<CheckpointId>,
) -> Result<(), StorageError> {
    let checkpoint = checkpoint_id
        .map(|id| to_i64("checkpoint_id", id.value()))
        .transpose()?;
    let res = sqlx::query("UPDATE steps SET current_checkpoint_id = ?1 WHERE id = ?2")
        .bind(checkpoint)
        .bind(to_i64("step_id", step_id.value())?)
        .execute(&mut *conn)
        .await
        .map_err(db_err)?;
    if res.rows_affected() == 0 {
        return Err(StorageError::NotFound);
    }
    Ok(())
}

/// Re-points sessions away from the step, then deletes it.
///
/// Sessions move to the step created right after it, or else right before
/// it; with no other step left in the lesson the pointer is cleared.
async fn delete_step_on(conn: &mut SqliteConnection, id: StepId) -> Result<bool, StorageError> {
    let key = to_i64("step_id", id.value())?;
    let Some(row) = sqlx::query("SELECT lesson_id FROM steps WHERE id = ?1")
        .bind(key)
        .fetch_optional(&mut *conn)
        .await
        .map_err(db_err)?
    else {
        return Ok(false);
    };

    let outlines = sqlx::query(
        "SELECT id, name, is_completed, created_at FROM steps WHERE lesson_id = ?1",
    )
    .bind(to_i64("lesson_id", lesson_id(&row, "lesson_id")?.value())?)
    .fetch_all(&mut *conn)
    .await
    .map_err(db_err)?
    .iter()
    .map(map_outline_row)
    .collect::<Result<Vec<_>, _>>()?;
    let replacement = step_after_removal(&outlines, id)
        .map(|step| to_i64("step_id", step.value()))
        .transpose()?;

    if let Some(replacement) = replacement {
        sqlx::query(
            r"
            INSERT OR IGNORE INTO session_steps (session_id, step_id, is_completed)
            SELECT id, ?1, 0 FROM sessions WHERE current_step_id = ?2
            ",
        )
        .bind(replacement)
        .bind(key)
        .execute(&mut *conn)
        .await
        .map_err(db_err)?;
    }
    sqlx::query("UPDATE sessions SET current_step_id = ?1 WHERE current_step_id = ?2")
        .bind(replacement)
        .bind(key)
        .execute(&mut *conn)
        .await
        .map_err(db_err)?;

    let res = sqlx::query("DELETE FROM steps WHERE id = ?1")
        .bind(key)
        .execute(&mut *conn)
        .await
        .map_err(db_err)?;
    Ok(res.rows_affected() > 0)
}

async fn load_step(pool: &SqlitePool, id: StepId) -> Result<Option<Step>, StorageError> {
    let key = to_i64("step_id", id.value())?;
    let Some(row) = sqlx::query(
        r"
        SELECT id, lesson_id, name, instructions, is_completed, current_checkpoint_id, created_at
        FROM steps
        WHERE id = ?1
        ",
    )
    .bind(key)
    .fetch_optional(pool)
    .await
    .map_err(db_err)?
    else {
        return Ok(None);
    };

    let code_modules = sqlx::query(
        "SELECT id, step_id, name, value, is_entry FROM code_modules WHERE step_id = ?1 ORDER BY id ASC",
    )
    .bind(key)
    .fetch_all(pool)
    .await
    .map_err(db_err)?
    .iter()
    .map(map_module_row)
    .collect::<Result<Vec<_>, _>>()?;

    let dependencies = sqlx::query(
        "SELECT id, step_id, package, version FROM dependencies WHERE step_id = ?1 ORDER BY id ASC",
    )
    .bind(key)
    .fetch_all(pool)
    .await
    .map_err(db_err)?
    .iter()
    .map(map_dependency_row)
    .collect::<Result<Vec<_>, _>>()?;

    let checkpoints = sqlx::query(
        r"
        SELECT id, step_id, is_completed, test, created_at
        FROM checkpoints
        WHERE step_id = ?1
        ORDER BY created_at ASC, id ASC
        ",
    )
    .bind(key)
    .fetch_all(pool)
    .await
    .map_err(db_err)?
    .iter()
    .map(map_checkpoint_row)
    .collect::<Result<Vec<_>, _>>()?;

    let mut step = Step {
        id,
        lesson_id: lesson_id(&row, "lesson_id")?,
        name: row.try_get("name").map_err(ser)?,
        instructions: row.try_get("instructions").map_err(ser)?,
        is_completed: row.try_get("is_completed").map_err(ser)?,
        current_checkpoint_id: optional_checkpoint_id(&row, "current_checkpoint_id")?,
        created_at: row.try_get("created_at").map_err(ser)?,
        code_modules,
        dependencies,
        checkpoints,
    };
    step.normalize_order();
    Ok(Some(step))
}

#[async_trait::async_trait]
impl StepRepository for SqliteRepository {
    async fn insert_step(
        &self,
        lesson_id: LessonId,
        draft: &StepDraft,
    ) -> Result<Step, StorageError> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;
        let id = insert_step_tx(&mut *tx, lesson_id, draft).await?;
        tx.commit().await.map_err(db_err)?;
        load_step(&self.pool, id).await?.ok_or(StorageError::NotFound)
    }

    async fn get_step(&self, id: StepId) -> Result<Option<Step>, StorageError> {
        load_step(&self.pool, id).await
    }

    async fn update_step(&self, step: &Step) -> Result<(), StorageError> {
        let mut conn = self.pool.acquire().await.map_err(db_err)?;
        write_step_on(&mut *conn, step).await
    }

    async fn set_current_checkpoint(
        &self,
        step_id: StepId,
        checkpoint_id: CheckpointId,
    ) -> Result<(), StorageError> {
        let res = sqlx::query(
            r"
            UPDATE steps SET current_checkpoint_id = ?1
            WHERE id = ?2
              AND EXISTS (SELECT 1 FROM checkpoints WHERE id = ?1 AND step_id = ?2)
            ",
        )
        .bind(to_i64("checkpoint_id", checkpoint_id.value())?)
        .bind(to_i64("step_id", step_id.value())?)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        if res.rows_affected() == 0 {
            return Err(StorageError::NotFound);
        }
        Ok(())
    }

    async fn delete_step(&self, id: StepId) -> Result<bool, StorageError> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;
        match delete_step_on(&mut *tx, id).await {
            Ok(deleted) => {
                tx.commit().await.map_err(db_err)?;
                Ok(deleted)
            }
            Err(e) => {
                tx.rollback().await.map_err(db_err)?;
                Err(e)
            }
        }
    }

    async fn insert_checkpoint(
        &self,
        step_id: StepId,
        test: Option<String>,
        created_at: DateTime<Utc>,
    ) -> Result<Checkpoint, StorageError> {
        let res = sqlx::query(
            r"
            INSERT INTO checkpoints (step_id, is_completed, test, created_at)
            VALUES (?1, 0, ?2, ?3)
            ",
        )
        .bind(to_i64("step_id", step_id.value())?)
        .bind(&test)
        .bind(created_at)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(Checkpoint {
            id: CheckpointId::new(to_u64("checkpoint_id", res.last_insert_rowid())?),
            step_id,
            is_completed: false,
            test,
            created_at,
        })
    }

    async fn insert_module(
        &self,
        step_id: StepId,
        draft: &ModuleDraft,
    ) -> Result<CodeModule, StorageError> {
        let mut conn = self.pool.acquire().await.map_err(db_err)?;
        insert_module_on(&mut *conn, step_id, draft).await
    }

    async fn update_module(&self, module: &CodeModule) -> Result<(), StorageError> {
        let res = sqlx::query("UPDATE code_modules SET name = ?1, value = ?2 WHERE id = ?3")
            .bind(&module.name)
            .bind(&module.value)
            .bind(to_i64("module_id", module.id.value())?)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;

        if res.rows_affected() == 0 {
            return Err(StorageError::NotFound);
        }
        Ok(())
    }

    async fn delete_module(&self, id: CodeModuleId) -> Result<bool, StorageError> {
        let res = sqlx::query("DELETE FROM code_modules WHERE id = ?1")
            .bind(to_i64("module_id", id.value())?)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(res.rows_affected() > 0)
    }

    async fn set_entry_module(
        &self,
        step_id: StepId,
        module_id: CodeModuleId,
    ) -> Result<(), StorageError> {
        let step_key = to_i64("step_id", step_id.value())?;
        let module_key = to_i64("module_id", module_id.value())?;
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        let owned = sqlx::query("SELECT 1 FROM code_modules WHERE id = ?1 AND step_id = ?2")
            .bind(module_key)
            .bind(step_key)
            .fetch_optional(&mut *tx)
            .await
            .map_err(db_err)?;
        if owned.is_none() {
            return Err(StorageError::NotFound);
        }

        // Clear first so the single-entry index never sees two rows.
        sqlx::query("UPDATE code_modules SET is_entry = 0 WHERE step_id = ?1")
            .bind(step_key)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;
        sqlx::query("UPDATE code_modules SET is_entry = 1 WHERE id = ?1")
            .bind(module_key)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;

        tx.commit().await.map_err(db_err)?;
        Ok(())
    }

    async fn insert_dependency(
        &self,
        step_id: StepId,
        draft: &DependencyDraft,
    ) -> Result<Dependency, StorageError> {
        let mut conn = self.pool.acquire().await.map_err(db_err)?;
        insert_dependency_on(&mut *conn, step_id, draft).await
    }
}
