use amigo_core::model::{
    Checkpoint, CheckpointId, CodeModule, CodeModuleId, Dependency, DependencyId, LessonId,
    LessonStatus, SessionId, SessionStep, StepId, StepOutline, UserId,
};
use sqlx::Row;
use sqlx::sqlite::SqliteRow;

use crate::repository::StorageError;

pub(crate) fn ser<E: core::fmt::Display>(e: E) -> StorageError {
    StorageError::Serialization(e.to_string())
}

/// Maps driver errors, turning constraint violations into domain-level storage errors.
pub(crate) fn db_err(e: sqlx::Error) -> StorageError {
    match &e {
        sqlx::Error::RowNotFound => StorageError::NotFound,
        sqlx::Error::Database(db) if db.is_unique_violation() => StorageError::Conflict,
        sqlx::Error::Database(db) if db.is_foreign_key_violation() => StorageError::NotFound,
        _ => StorageError::Connection(e.to_string()),
    }
}

pub(crate) fn to_i64(field: &'static str, v: u64) -> Result<i64, StorageError> {
    i64::try_from(v).map_err(|_| StorageError::Serialization(format!("{field} overflow")))
}

pub(crate) fn to_u64(field: &'static str, v: i64) -> Result<u64, StorageError> {
    u64::try_from(v).map_err(|_| StorageError::Serialization(format!("{field} sign overflow")))
}

fn get_id(row: &SqliteRow, column: &'static str) -> Result<u64, StorageError> {
    to_u64(column, row.try_get::<i64, _>(column).map_err(ser)?)
}

pub(crate) fn user_id(row: &SqliteRow, column: &'static str) -> Result<UserId, StorageError> {
    get_id(row, column).map(UserId::new)
}

pub(crate) fn lesson_id(row: &SqliteRow, column: &'static str) -> Result<LessonId, StorageError> {
    get_id(row, column).map(LessonId::new)
}

pub(crate) fn step_id(row: &SqliteRow, column: &'static str) -> Result<StepId, StorageError> {
    get_id(row, column).map(StepId::new)
}

pub(crate) fn session_id(row: &SqliteRow, column: &'static str) -> Result<SessionId, StorageError> {
    get_id(row, column).map(SessionId::new)
}

pub(crate) fn optional_step_id(
    row: &SqliteRow,
    column: &'static str,
) -> Result<Option<StepId>, StorageError> {
    row.try_get::<Option<i64>, _>(column)
        .map_err(ser)?
        .map(|v| to_u64(column, v).map(StepId::new))
        .transpose()
}

pub(crate) fn optional_checkpoint_id(
    row: &SqliteRow,
    column: &'static str,
) -> Result<Option<CheckpointId>, StorageError> {
    row.try_get::<Option<i64>, _>(column)
        .map_err(ser)?
        .map(|v| to_u64(column, v).map(CheckpointId::new))
        .transpose()
}

pub(crate) fn parse_status(s: &str) -> Result<LessonStatus, StorageError> {
    s.parse::<LessonStatus>().map_err(ser)
}

pub(crate) fn map_outline_row(row: &SqliteRow) -> Result<StepOutline, StorageError> {
    Ok(StepOutline {
        id: step_id(row, "id")?,
        name: row.try_get("name").map_err(ser)?,
        is_completed: row.try_get("is_completed").map_err(ser)?,
        created_at: row.try_get("created_at").map_err(ser)?,
    })
}

pub(crate) fn map_checkpoint_row(row: &SqliteRow) -> Result<Checkpoint, StorageError> {
    Ok(Checkpoint {
        id: CheckpointId::new(get_id(row, "id")?),
        step_id: step_id(row, "step_id")?,
        is_completed: row.try_get("is_completed").map_err(ser)?,
        test: row.try_get("test").map_err(ser)?,
        created_at: row.try_get("created_at").map_err(ser)?,
    })
}

pub(crate) fn map_module_row(row: &SqliteRow) -> Result<CodeModule, StorageError> {
    Ok(CodeModule {
        id: CodeModuleId::new(get_id(row, "id")?),
        step_id: step_id(row, "step_id")?,
        name: row.try_get("name").map_err(ser)?,
        value: row.try_get("value").map_err(ser)?,
        is_entry: row.try_get("is_entry").map_err(ser)?,
    })
}

pub(crate) fn map_dependency_row(row: &SqliteRow) -> Result<Dependency, StorageError> {
    Ok(Dependency {
        id: DependencyId::new(get_id(row, "id")?),
        step_id: step_id(row, "step_id")?,
        package: row.try_get("package").map_err(ser)?,
        version: row.try_get("version").map_err(ser)?,
    })
}

pub(crate) fn map_session_step_row(row: &SqliteRow) -> Result<SessionStep, StorageError> {
    Ok(SessionStep {
        step_id: step_id(row, "step_id")?,
        is_completed: row.try_get("is_completed").map_err(ser)?,
    })
}
