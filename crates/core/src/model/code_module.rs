use serde::Serialize;
use thiserror::Error;

use crate::model::ids::{CodeModuleId, DependencyId, StepId};

/// Substring that marks a module as a test file (`a.spec.ts`, `spec/app.tsx`).
pub const TEST_FILE_MARKER: &str = "spec";

/// Returns true when a module path names a test file.
#[must_use]
pub fn is_test_file(name: &str) -> bool {
    name.contains(TEST_FILE_MARKER)
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum CodeModuleError {
    #[error("code module name cannot be empty")]
    EmptyName,

    #[error("dependency package cannot be empty")]
    EmptyPackage,
}

/// A named source file attached to a step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CodeModule {
    pub id: CodeModuleId,
    pub step_id: StepId,
    pub name: String,
    pub value: String,
    pub is_entry: bool,
}

impl CodeModule {
    #[must_use]
    pub fn is_test(&self) -> bool {
        is_test_file(&self.name)
    }

    /// Copy of this module's content without its identity, for cloning into another step.
    #[must_use]
    pub fn to_draft(&self) -> ModuleDraft {
        ModuleDraft {
            name: self.name.clone(),
            value: self.value.clone(),
            is_entry: self.is_entry,
        }
    }
}

/// Module content that has not been assigned to a step yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleDraft {
    pub name: String,
    pub value: String,
    pub is_entry: bool,
}

impl ModuleDraft {
    /// # Errors
    ///
    /// Returns `CodeModuleError::EmptyName` when the path is blank.
    pub fn new(
        name: impl Into<String>,
        value: impl Into<String>,
        is_entry: bool,
    ) -> Result<Self, CodeModuleError> {
        let name = name.into().trim().to_owned();
        if name.is_empty() {
            return Err(CodeModuleError::EmptyName);
        }
        Ok(Self {
            name,
            value: value.into(),
            is_entry,
        })
    }

    #[must_use]
    pub fn is_test(&self) -> bool {
        is_test_file(&self.name)
    }
}

/// A package the step's sandbox installs before running.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Dependency {
    pub id: DependencyId,
    pub step_id: StepId,
    pub package: String,
    pub version: String,
}

impl Dependency {
    #[must_use]
    pub fn to_draft(&self) -> DependencyDraft {
        DependencyDraft {
            package: self.package.clone(),
            version: self.version.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependencyDraft {
    pub package: String,
    pub version: String,
}

impl DependencyDraft {
    /// An empty version means "latest".
    ///
    /// # Errors
    ///
    /// Returns `CodeModuleError::EmptyPackage` when the package name is blank.
    pub fn new(
        package: impl Into<String>,
        version: impl Into<String>,
    ) -> Result<Self, CodeModuleError> {
        let package = package.into().trim().to_owned();
        if package.is_empty() {
            return Err(CodeModuleError::EmptyPackage);
        }
        let version = version.into().trim().to_owned();
        Ok(Self {
            package,
            version: if version.is_empty() {
                "latest".to_owned()
            } else {
                version
            },
        })
    }
}

/// Enforces the single-entry rule over a batch of drafts: only the first entry survives.
pub(crate) fn keep_single_entry(drafts: &mut [ModuleDraft]) {
    let mut seen = false;
    for draft in drafts.iter_mut() {
        if draft.is_entry {
            if seen {
                draft.is_entry = false;
            }
            seen = true;
        }
    }
}
