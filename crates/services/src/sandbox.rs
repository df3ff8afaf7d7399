use std::collections::BTreeMap;

use amigo_core::model::{CheckpointId, Dependency, Step, StepId};
use amigo_core::resolver::ResolvedModules;
use serde::Serialize;

/// What the in-browser sandbox needs to run a step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SandboxView {
    pub step_id: StepId,
    pub checkpoint_id: Option<CheckpointId>,
    /// Path to source, already scoped to the current checkpoint's test.
    pub files: BTreeMap<String, String>,
    pub entry: Option<String>,
    pub dependencies: BTreeMap<String, String>,
    /// Every test file of the step, for the editing view.
    pub test_files: Vec<String>,
    pub missing_test: Option<String>,
}

impl SandboxView {
    #[must_use]
    pub fn new(step: &Step, resolved: ResolvedModules) -> Self {
        let files = resolved
            .modules
            .into_iter()
            .map(|m| (m.name, m.value))
            .collect();
        let test_files = step
            .code_modules
            .iter()
            .filter(|m| m.is_test())
            .map(|m| m.name.clone())
            .collect();

        Self {
            step_id: step.id,
            checkpoint_id: resolved.checkpoint_id,
            files,
            entry: resolved.entry,
            dependencies: dependency_map(&step.dependencies),
            test_files,
            missing_test: resolved.missing_test,
        }
    }
}

fn dependency_map(dependencies: &[Dependency]) -> BTreeMap<String, String> {
    dependencies
        .iter()
        .map(|d| (d.package.clone(), d.version.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use amigo_core::model::{
        Checkpoint, CodeModule, CodeModuleId, DEFAULT_INSTRUCTIONS, DependencyId, LessonId,
    };
    use amigo_core::resolver::resolve_modules;
    use amigo_core::time::fixed_now;

    fn module(id: u64, name: &str, is_entry: bool) -> CodeModule {
        CodeModule {
            id: CodeModuleId::new(id),
            step_id: StepId::new(1),
            name: name.to_owned(),
            value: format!("// {name}"),
            is_entry,
        }
    }

    #[test]
    fn view_scopes_files_but_lists_every_test() {
        let step = Step {
            id: StepId::new(1),
            lesson_id: LessonId::new(1),
            name: "Props".into(),
            instructions: DEFAULT_INSTRUCTIONS.into(),
            is_completed: false,
            current_checkpoint_id: None,
            created_at: fixed_now(),
            code_modules: vec![
                module(1, "index.ts", true),
                module(2, "a.spec.ts", false),
                module(3, "b.spec.ts", false),
            ],
            dependencies: vec![Dependency {
                id: DependencyId::new(1),
                step_id: StepId::new(1),
                package: "react".into(),
                version: "18.2.0".into(),
            }],
            checkpoints: vec![Checkpoint {
                id: CheckpointId::new(7),
                step_id: StepId::new(1),
                is_completed: false,
                test: Some("a.spec.ts".into()),
                created_at: fixed_now(),
            }],
        };

        let view = SandboxView::new(&step, resolve_modules(&step));
        let files: Vec<_> = view.files.keys().map(String::as_str).collect();
        assert_eq!(files, ["a.spec.ts", "index.ts"]);
        assert_eq!(view.entry.as_deref(), Some("index.ts"));
        assert_eq!(view.checkpoint_id, Some(CheckpointId::new(7)));
        assert_eq!(view.test_files, ["a.spec.ts", "b.spec.ts"]);
        assert_eq!(view.dependencies.get("react").map(String::as_str), Some("18.2.0"));
        assert_eq!(view.missing_test, None);
    }
}
