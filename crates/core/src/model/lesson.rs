use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use crate::model::ids::{LessonId, StepId, UserId};
use crate::model::step::StepOutline;

//
// ─── ERRORS ────────────────────────────────────────────────────────────────────
//

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum LessonError {
    #[error("lesson title cannot be empty")]
    EmptyTitle,

    #[error("unknown lesson status: {0}")]
    UnknownStatus(String),
}

//
// ─── STATUS ────────────────────────────────────────────────────────────────────
//

/// Publication state of a lesson.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LessonStatus {
    #[default]
    Draft,
    PendingPublish,
    Published,
}

impl LessonStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            LessonStatus::Draft => "DRAFT",
            LessonStatus::PendingPublish => "PENDING_PUBLISH",
            LessonStatus::Published => "PUBLISHED",
        }
    }
}

impl fmt::Display for LessonStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LessonStatus {
    type Err = LessonError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "DRAFT" => Ok(LessonStatus::Draft),
            "PENDING_PUBLISH" => Ok(LessonStatus::PendingPublish),
            "PUBLISHED" => Ok(LessonStatus::Published),
            _ => Err(LessonError::UnknownStatus(s.to_owned())),
        }
    }
}

//
// ─── LESSON ────────────────────────────────────────────────────────────────────
//

/// An authored, ordered sequence of steps.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Lesson {
    id: LessonId,
    owner_id: UserId,
    title: String,
    description: Option<String>,
    status: LessonStatus,
    created_at: DateTime<Utc>,
    steps: Vec<StepOutline>,
}

impl Lesson {
    /// Rehydrate a lesson from storage. Steps are put in creation order.
    ///
    /// # Errors
    ///
    /// Returns `LessonError::EmptyTitle` if the stored title is blank.
    pub fn from_persisted(
        id: LessonId,
        owner_id: UserId,
        title: impl Into<String>,
        description: Option<String>,
        status: LessonStatus,
        created_at: DateTime<Utc>,
        mut steps: Vec<StepOutline>,
    ) -> Result<Self, LessonError> {
        steps.sort_by_key(StepOutline::creation_key);
        Ok(Self {
            id,
            owner_id,
            title: validate_title(title)?,
            description,
            status,
            created_at,
            steps,
        })
    }

    #[must_use]
    pub fn id(&self) -> LessonId {
        self.id
    }

    #[must_use]
    pub fn owner_id(&self) -> UserId {
        self.owner_id
    }

    #[must_use]
    pub fn title(&self) -> &str {
        &self.title
    }

    #[must_use]
    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    #[must_use]
    pub fn status(&self) -> LessonStatus {
        self.status
    }

    #[must_use]
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Steps in creation order.
    #[must_use]
    pub fn steps(&self) -> &[StepOutline] {
        &self.steps
    }

    #[must_use]
    pub fn first_step(&self) -> Option<&StepOutline> {
        self.steps.first()
    }

    #[must_use]
    pub fn contains_step(&self, id: StepId) -> bool {
        self.steps.iter().any(|s| s.id == id)
    }

    /// # Errors
    ///
    /// Returns `LessonError::EmptyTitle` for a blank title.
    pub fn retitle(&mut self, title: impl Into<String>) -> Result<(), LessonError> {
        self.title = validate_title(title)?;
        Ok(())
    }

    /// Blank descriptions are stored as `None`.
    pub fn set_description(&mut self, description: impl Into<String>) {
        let description = description.into();
        self.description = if description.trim().is_empty() {
            None
        } else {
            Some(description)
        };
    }

    pub fn set_status(&mut self, status: LessonStatus) {
        self.status = status;
    }
}

/// A lesson that has not been stored yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LessonDraft {
    pub owner_id: UserId,
    pub title: String,
    pub description: Option<String>,
    pub status: LessonStatus,
    pub created_at: DateTime<Utc>,
}

impl LessonDraft {
    /// # Errors
    ///
    /// Returns `LessonError::EmptyTitle` for a blank title.
    pub fn new(
        owner_id: UserId,
        title: impl Into<String>,
        description: Option<String>,
        created_at: DateTime<Utc>,
    ) -> Result<Self, LessonError> {
        Ok(Self {
            owner_id,
            title: validate_title(title)?,
            description: description.filter(|d| !d.trim().is_empty()),
            status: LessonStatus::Draft,
            created_at,
        })
    }
}

fn validate_title(title: impl Into<String>) -> Result<String, LessonError> {
    let title = title.into();
    let trimmed = title.trim();
    if trimmed.is_empty() {
        return Err(LessonError::EmptyTitle);
    }
    Ok(trimmed.to_owned())
}
