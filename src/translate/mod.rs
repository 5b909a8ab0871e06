//! Turning source steps into pipeline script text.
//!
//! Each step kind is handled by a [`StepTranslator`] looked up by its kind
//! tag in a [`TranslatorRegistry`]. Kinds nobody registered fall through to
//! [`UnknownStep`], so an unfamiliar step never fails a job.

mod steps;
pub mod workflow;

pub use steps::{
    ArtifactsStep, CleanupStep, GitStep, MavenStep, ShellStep, StaticStep, UnknownStep,
};
pub use workflow::{SynthesisOptions, build_parameters, synthesize, target_job_name};

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::warn;

use crate::error::MigrateError;
use crate::resolve::Resolver;
use crate::script::Script;
use crate::source::SourceStep;

/// What a translator may touch while handling one step.
pub struct StepContext<'a> {
    pub script: &'a mut Script,
    pub resolver: &'a mut Resolver,
}

impl StepContext<'_> {
    /// Resolve every property reference in `text`.
    pub fn resolve(&mut self, text: &str) -> Result<String, MigrateError> {
        Ok(self.resolver.resolve(text)?)
    }

    /// Resolve a step config value, if it is set.
    pub fn resolve_key(
        &mut self,
        step: &SourceStep,
        key: &str,
    ) -> Result<Option<String>, MigrateError> {
        step.get(key).map(|raw| self.resolve(raw)).transpose()
    }

    /// Resolve a step config value that the step cannot do without.
    pub fn require_key(&mut self, step: &SourceStep, key: &str) -> Result<String, MigrateError> {
        match self.resolve_key(step, key)? {
            Some(value) => Ok(value),
            None => Err(MigrateError::Translation(format!(
                "{} step '{}' has no {key}",
                step.kind, step.name
            ))),
        }
    }
}

pub trait StepTranslator: Send + Sync {
    fn translate(&self, step: &SourceStep, cx: &mut StepContext<'_>) -> Result<(), MigrateError>;
}

/// Step kind tag to translator.
#[derive(Clone)]
pub struct TranslatorRegistry {
    translators: BTreeMap<String, Arc<dyn StepTranslator>>,
    fallback: Arc<dyn StepTranslator>,
}

impl std::fmt::Debug for TranslatorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TranslatorRegistry")
            .field("kinds", &self.translators.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

impl Default for TranslatorRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl TranslatorRegistry {
    /// An empty registry: every kind goes to [`UnknownStep`].
    pub fn new() -> Self {
        Self {
            translators: BTreeMap::new(),
            fallback: Arc::new(UnknownStep),
        }
    }

    pub fn with_defaults() -> Self {
        Self::new()
            .with("shell", ShellStep)
            .with("maven", MavenStep)
            .with("git", GitStep)
            .with("artifacts", ArtifactsStep)
            .with("cleanup", CleanupStep)
            .with("stamp", StaticStep::STAMP)
            .with("assign-status", StaticStep::ASSIGN_STATUS)
            .with("changelog", StaticStep::CHANGELOG)
    }

    pub fn register(&mut self, kind: impl Into<String>, translator: Arc<dyn StepTranslator>) {
        self.translators.insert(kind.into(), translator);
    }

    pub fn with(mut self, kind: impl Into<String>, translator: impl StepTranslator + 'static) -> Self {
        self.register(kind, Arc::new(translator));
        self
    }

    pub fn kinds(&self) -> impl Iterator<Item = &str> {
        self.translators.keys().map(String::as_str)
    }

    pub fn get(&self, kind: &str) -> &dyn StepTranslator {
        self.translators
            .get(kind)
            .map(Arc::as_ref)
            .unwrap_or(self.fallback.as_ref())
    }

    /// Translate one step.
    ///
    /// Preflight-only steps are skipped with a comment. A recoverable error
    /// discards whatever the translator wrote and leaves a marker comment in
    /// its place; anything else is returned and fails the job.
    pub fn run_step(&self, step: &SourceStep, cx: &mut StepContext<'_>) -> Result<(), MigrateError> {
        if step.preflight_only {
            cx.script.push(format!(
                "// Skipped a source step that runs in preflight only:\n// {}",
                step.name
            ));
            return Ok(());
        }

        let mark = cx.script.len();
        match self.get(&step.kind).translate(step, cx) {
            Ok(()) => Ok(()),
            Err(err) if err.is_step_recoverable() => {
                warn!(step = %step.name, kind = %step.kind, %err, "step replaced by marker");
                cx.script.truncate(mark);
                cx.script
                    .push(format!("// Step '{}' could not be migrated: {err}", step.name));
                Ok(())
            }
            Err(err) => Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolve::{Property, ScopeKind, ScopeSet};

    struct Broken;

    impl StepTranslator for Broken {
        fn translate(&self, _: &SourceStep, cx: &mut StepContext<'_>) -> Result<(), MigrateError> {
            cx.script.open("dir('half') {");
            Err(MigrateError::Connection("target went away".into()))
        }
    }

    fn run(registry: &TranslatorRegistry, step: &SourceStep) -> (Result<(), MigrateError>, String) {
        let mut script = Script::new();
        let mut resolver = Resolver::new(
            ScopeSet::new().with(ScopeKind::Workflow, "BRANCH", Property::new("main")),
        );
        let result = registry.run_step(
            step,
            &mut StepContext {
                script: &mut script,
                resolver: &mut resolver,
            },
        );
        (result, script.render())
    }

    #[test]
    fn defaults_cover_the_known_kinds() {
        let registry = TranslatorRegistry::with_defaults();
        let kinds: Vec<_> = registry.kinds().collect();
        assert_eq!(
            kinds,
            vec![
                "artifacts",
                "assign-status",
                "changelog",
                "cleanup",
                "git",
                "maven",
                "shell",
                "stamp"
            ]
        );
    }

    #[test]
    fn unknown_kind_falls_back() {
        let (result, out) = run(
            &TranslatorRegistry::with_defaults(),
            &SourceStep::new("com.example.FancyStep", "Fancy"),
        );
        assert!(result.is_ok());
        assert!(out.contains("com.example.FancyStep"));
    }

    #[test]
    fn preflight_steps_are_skipped() {
        let mut step = SourceStep::new("shell", "Lint").with("command", "make lint");
        step.preflight_only = true;
        let (result, out) = run(&TranslatorRegistry::with_defaults(), &step);
        assert!(result.is_ok());
        assert!(out.contains("preflight only"));
        assert!(out.contains("// Lint"));
        assert!(!out.contains("make lint"));
    }

    #[test]
    fn recoverable_errors_become_markers() {
        let step = SourceStep::new("shell", "Deploy").with("command", "deploy ${p:MISSING}");
        let (result, out) = run(&TranslatorRegistry::with_defaults(), &step);
        assert!(result.is_ok());
        assert_eq!(
            out,
            "// Step 'Deploy' could not be migrated: Could not resolve property: MISSING\n"
        );
    }

    #[test]
    fn missing_config_is_a_translation_marker() {
        let (result, out) = run(
            &TranslatorRegistry::with_defaults(),
            &SourceStep::new("shell", "Empty"),
        );
        assert!(result.is_ok());
        assert!(out.starts_with("// Step 'Empty' could not be migrated: Translation error"));
    }

    #[test]
    fn unknown_scope_is_recoverable() {
        let step = SourceStep::new("shell", "Env").with("command", "echo ${env:HOME}");
        let (result, out) = run(&TranslatorRegistry::with_defaults(), &step);
        assert!(result.is_ok());
        assert!(out.contains("Unknown property type: env"));
    }

    #[test]
    fn fatal_errors_propagate() {
        let registry = TranslatorRegistry::new().with("broken", Broken);
        let (result, _) = run(&registry, &SourceStep::new("broken", "B"));
        assert!(matches!(result, Err(MigrateError::Connection(_))));
    }
}
