//! Checkpoint-scoped module resolution.
//!
//! A step carries every file an author attached to it, including the test
//! files of all of its checkpoints. The sandbox should only ever run the
//! test of the checkpoint the student is currently working on, so the
//! module set is narrowed to the non-test files plus that one test.

use serde::Serialize;

use crate::model::{Checkpoint, CheckpointId, CodeModule, Step};

/// First checkpoint in creation order that has not been passed yet.
///
/// `checkpoints` must already be in creation order.
#[must_use]
pub fn first_incomplete(checkpoints: &[Checkpoint]) -> Option<&Checkpoint> {
    checkpoints.iter().find(|c| !c.is_completed)
}

/// The checkpoint that scopes the step's modules right now.
///
/// An explicit pointer wins when it still names one of the step's
/// checkpoints; otherwise the first incomplete checkpoint is used.
#[must_use]
pub fn current_checkpoint(step: &Step) -> Option<&Checkpoint> {
    step.current_checkpoint_id
        .and_then(|id| step.checkpoint(id))
        .or_else(|| first_incomplete(&step.checkpoints))
}

/// The pointer value a first read should write back, if any.
///
/// Returns `Some` only when the step has no usable pointer (unset, or naming
/// a checkpoint that no longer exists) and an incomplete checkpoint exists.
/// Once written, a pointer is never recomputed here.
#[must_use]
pub fn pending_assignment(step: &Step) -> Option<CheckpointId> {
    let usable = step
        .current_checkpoint_id
        .is_some_and(|id| step.checkpoint(id).is_some());
    if usable {
        return None;
    }
    first_incomplete(&step.checkpoints).map(|c| c.id)
}

/// Modules the sandbox should load for a step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolvedModules {
    pub checkpoint_id: Option<CheckpointId>,
    pub modules: Vec<CodeModule>,
    /// Path of the sandbox's main file.
    pub entry: Option<String>,
    /// Test the current checkpoint requires but the step does not contain.
    pub missing_test: Option<String>,
}

impl ResolvedModules {
    pub fn test_modules(&self) -> impl Iterator<Item = &CodeModule> {
        self.modules.iter().filter(|m| m.is_test())
    }
}

/// Keep every non-test module plus the one whose name is exactly `test`.
#[must_use]
pub fn scope_to_test<'a>(modules: &'a [CodeModule], test: &str) -> Vec<&'a CodeModule> {
    modules
        .iter()
        .filter(|m| !m.is_test() || m.name == test)
        .collect()
}

/// Resolve the module set for the step's current checkpoint.
///
/// Without a current checkpoint, or when it names no test, the full set is
/// returned unfiltered.
#[must_use]
pub fn resolve_modules(step: &Step) -> ResolvedModules {
    let checkpoint = current_checkpoint(step);
    let test = checkpoint
        .and_then(|c| c.test.as_deref())
        .filter(|t| !t.is_empty());

    let (modules, missing_test) = match test {
        Some(test) => {
            let scoped: Vec<CodeModule> = scope_to_test(&step.code_modules, test)
                .into_iter()
                .cloned()
                .collect();
            let missing = (!scoped.iter().any(|m| m.name == test)).then(|| test.to_owned());
            (scoped, missing)
        }
        None => (step.code_modules.clone(), None),
    };

    let entry = modules.iter().find(|m| m.is_entry).map(|m| m.name.clone());

    ResolvedModules {
        checkpoint_id: checkpoint.map(|c| c.id),
        modules,
        entry,
        missing_test,
    }
}
