//! Starting content for new steps.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

use crate::model::{DependencyDraft, ModuleDraft, Step};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum TemplateError {
    #[error("unknown template: {0}")]
    Unknown(String),
}

/// Files and packages a new step is created with.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Template {
    pub modules: Vec<ModuleDraft>,
    pub dependencies: Vec<DependencyDraft>,
}

impl Template {
    /// Content of an existing step, ready to be copied into the next one.
    #[must_use]
    pub fn from_step(step: &Step) -> Self {
        Self {
            modules: step.code_modules.iter().map(|m| m.to_draft()).collect(),
            dependencies: step.dependencies.iter().map(|d| d.to_draft()).collect(),
        }
    }

    #[must_use]
    pub fn without_tests(mut self) -> Self {
        self.modules.retain(|m| !m.is_test());
        self
    }
}

/// Lookup of named templates.
pub trait TemplateCatalog: Send + Sync {
    /// # Errors
    ///
    /// Returns `TemplateError::Unknown` when no template has that name.
    fn template(&self, name: &str) -> Result<Template, TemplateError>;

    /// Template used when a step is created from neither a name nor a prior step.
    fn default_template(&self) -> Template;
}

/// Templates shipped with the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuiltinTemplate {
    React,
    TypeScript,
    JavaScript,
}

impl BuiltinTemplate {
    pub const ALL: [BuiltinTemplate; 3] = [
        BuiltinTemplate::React,
        BuiltinTemplate::TypeScript,
        BuiltinTemplate::JavaScript,
    ];

    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            BuiltinTemplate::React => "react",
            BuiltinTemplate::TypeScript => "typescript",
            BuiltinTemplate::JavaScript => "javascript",
        }
    }

    #[must_use]
    pub fn template(self) -> Template {
        match self {
            BuiltinTemplate::React => Template {
                modules: vec![
                    module(
                        "app.tsx",
                        "import React from 'react';\n\nexport default function App() {\n  return <h1>Hello, world!</h1>;\n}\n",
                        false,
                    ),
                    module(
                        "index.tsx",
                        "import React from 'react';\nimport { render } from 'react-dom';\n\nimport App from './app';\n\nrender(<App />, document.getElementById('root'));\n",
                        true,
                    ),
                ],
                dependencies: vec![
                    dependency("react", "17.0.2"),
                    dependency("react-dom", "17.0.2"),
                    dependency("@testing-library/react", "11.2.7"),
                ],
            },
            BuiltinTemplate::TypeScript => Template {
                modules: vec![module(
                    "index.ts",
                    "export const greet = (name: string): string => `Hello, ${name}!`;\n",
                    true,
                )],
                dependencies: Vec::new(),
            },
            BuiltinTemplate::JavaScript => Template {
                modules: vec![module(
                    "index.js",
                    "export const greet = (name) => `Hello, ${name}!`;\n",
                    true,
                )],
                dependencies: Vec::new(),
            },
        }
    }
}

impl fmt::Display for BuiltinTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for BuiltinTemplate {
    type Err = TemplateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        Self::ALL
            .into_iter()
            .find(|t| t.name().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| TemplateError::Unknown(wanted.to_owned()))
    }
}

/// Catalog over `BuiltinTemplate`; React is the default.
#[derive(Debug, Clone, Copy, Default)]
pub struct BuiltinTemplates;

impl TemplateCatalog for BuiltinTemplates {
    fn template(&self, name: &str) -> Result<Template, TemplateError> {
        name.parse::<BuiltinTemplate>().map(BuiltinTemplate::template)
    }

    fn default_template(&self) -> Template {
        BuiltinTemplate::React.template()
    }
}

fn module(name: &str, value: &str, is_entry: bool) -> ModuleDraft {
    ModuleDraft {
        name: name.to_owned(),
        value: value.to_owned(),
        is_entry,
    }
}

fn dependency(package: &str, version: &str) -> DependencyDraft {
    DependencyDraft {
        package: package.to_owned(),
        version: version.to_owned(),
    }
}
