use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

use crate::model::checkpoint::Checkpoint;
use crate::model::code_module::{
    CodeModule, Dependency, DependencyDraft, ModuleDraft, keep_single_entry,
};
use crate::model::ids::{CheckpointId, CodeModuleId, LessonId, StepId};
use crate::template::Template;

/// Placeholder markdown every new step starts with.
pub const DEFAULT_INSTRUCTIONS: &str = "## Step #

### Instructions
1. Add instructions for the step here.
2. You can use markdown to add [links](https://google.com)
3. Or use it to add `code` snippets.

```
You can also write code in blocks.
```

Remember to be short and sweet.
";

/// Name given to the step seeded into a new lesson.
pub const SEED_STEP_NAME: &str = "Step 1";

/// Path of the empty module seeded into a new lesson.
pub const SEED_MODULE_NAME: &str = "app.tsx";

//
// ─── ERRORS ────────────────────────────────────────────────────────────────────
//

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum StepError {
    #[error("step name cannot be empty")]
    EmptyName,

    #[error("checkpoint {0} does not belong to this step")]
    UnknownCheckpoint(CheckpointId),

    #[error("code module {0} does not belong to this step")]
    UnknownModule(CodeModuleId),

    #[error("a code module named {0:?} already exists in this step")]
    DuplicateModule(String),
}

//
// ─── STEP ──────────────────────────────────────────────────────────────────────
//

/// One stage of a lesson with its files, dependencies and checkpoints.
///
/// Repositories hand steps out with `checkpoints` in creation order and
/// modules/dependencies in id order; `normalize_order` restores that after
/// any in-memory edit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Step {
    pub id: StepId,
    pub lesson_id: LessonId,
    pub name: String,
    pub instructions: String,
    pub is_completed: bool,
    pub current_checkpoint_id: Option<CheckpointId>,
    pub created_at: DateTime<Utc>,
    pub code_modules: Vec<CodeModule>,
    pub dependencies: Vec<Dependency>,
    pub checkpoints: Vec<Checkpoint>,
}

impl Step {
    pub fn normalize_order(&mut self) {
        self.checkpoints.sort_by_key(Checkpoint::creation_key);
        self.code_modules.sort_by_key(|m| m.id);
        self.dependencies.sort_by_key(|d| d.id);
    }

    #[must_use]
    pub fn creation_key(&self) -> (DateTime<Utc>, StepId) {
        (self.created_at, self.id)
    }

    #[must_use]
    pub fn checkpoint(&self, id: CheckpointId) -> Option<&Checkpoint> {
        self.checkpoints.iter().find(|c| c.id == id)
    }

    #[must_use]
    pub fn module(&self, id: CodeModuleId) -> Option<&CodeModule> {
        self.code_modules.iter().find(|m| m.id == id)
    }

    #[must_use]
    pub fn module_named(&self, name: &str) -> Option<&CodeModule> {
        self.code_modules.iter().find(|m| m.name == name)
    }

    #[must_use]
    pub fn entry_module(&self) -> Option<&CodeModule> {
        self.code_modules.iter().find(|m| m.is_entry)
    }

    /// Point the step at one of its own checkpoints.
    ///
    /// # Errors
    ///
    /// Returns `StepError::UnknownCheckpoint` if the checkpoint belongs elsewhere.
    pub fn set_current_checkpoint(&mut self, id: CheckpointId) -> Result<(), StepError> {
        if self.checkpoint(id).is_none() {
            return Err(StepError::UnknownCheckpoint(id));
        }
        self.current_checkpoint_id = Some(id);
        Ok(())
    }

    /// Mark a checkpoint passed and point the step at the next one still open.
    ///
    /// With every checkpoint passed the pointer is cleared, which makes
    /// resolution fall back to the full module set.
    ///
    /// # Errors
    ///
    /// Returns `StepError::UnknownCheckpoint` if the checkpoint belongs elsewhere.
    pub fn complete_checkpoint(&mut self, id: CheckpointId) -> Result<Checkpoint, StepError> {
        let checkpoint = self
            .checkpoints
            .iter_mut()
            .find(|c| c.id == id)
            .ok_or(StepError::UnknownCheckpoint(id))?;
        checkpoint.is_completed = true;
        let passed = checkpoint.clone();

        self.current_checkpoint_id = self
            .checkpoints
            .iter()
            .find(|c| !c.is_completed)
            .map(|c| c.id);
        Ok(passed)
    }

    /// Marks the step complete. Returns false when it already was.
    pub fn complete(&mut self) -> bool {
        if self.is_completed {
            return false;
        }
        self.is_completed = true;
        true
    }

    /// # Errors
    ///
    /// Returns `StepError::EmptyName` for a blank name.
    pub fn rename(&mut self, name: impl Into<String>) -> Result<(), StepError> {
        self.name = validate_name(name)?;
        Ok(())
    }

    #[must_use]
    pub fn outline(&self) -> StepOutline {
        StepOutline {
            id: self.id,
            name: self.name.clone(),
            is_completed: self.is_completed,
            created_at: self.created_at,
        }
    }
}

/// The slice of a step a lesson listing carries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StepOutline {
    pub id: StepId,
    pub name: String,
    pub is_completed: bool,
    pub created_at: DateTime<Utc>,
}

impl StepOutline {
    #[must_use]
    pub fn creation_key(&self) -> (DateTime<Utc>, StepId) {
        (self.created_at, self.id)
    }
}

//
// ─── DRAFT ─────────────────────────────────────────────────────────────────────
//

/// A step that has not been stored yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepDraft {
    pub name: String,
    pub instructions: String,
    pub modules: Vec<ModuleDraft>,
    pub dependencies: Vec<DependencyDraft>,
    pub created_at: DateTime<Utc>,
}

impl StepDraft {
    /// Build a step from a template. Test files never carry over into a new step.
    ///
    /// # Errors
    ///
    /// Returns `StepError::EmptyName` for a blank name.
    pub fn from_template(
        name: impl Into<String>,
        template: Template,
        created_at: DateTime<Utc>,
    ) -> Result<Self, StepError> {
        let name = validate_name(name)?;
        let template = template.without_tests();
        let mut modules = template.modules;
        keep_single_entry(&mut modules);

        Ok(Self {
            name,
            instructions: DEFAULT_INSTRUCTIONS.to_owned(),
            modules,
            dependencies: template.dependencies,
            created_at,
        })
    }

    /// The single step every new lesson starts with: one empty `app.tsx`.
    #[must_use]
    pub fn seed(created_at: DateTime<Utc>) -> Self {
        Self {
            name: SEED_STEP_NAME.to_owned(),
            instructions: DEFAULT_INSTRUCTIONS.to_owned(),
            modules: vec![ModuleDraft {
                name: SEED_MODULE_NAME.to_owned(),
                value: String::new(),
                is_entry: false,
            }],
            dependencies: Vec::new(),
            created_at,
        }
    }
}

fn validate_name(name: impl Into<String>) -> Result<String, StepError> {
    let name = name.into();
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(StepError::EmptyName);
    }
    Ok(trimmed.to_owned())
}

//
// ─── TESTS ─────────────────────────────────────────────────────────────────────
//
