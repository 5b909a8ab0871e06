use super::{StepContext, StepTranslator};
use crate::error::MigrateError;
use crate::source::SourceStep;

/// Source default for the Maven step's Java home; leaving it out of the
/// environment has the same effect.
const DEFAULT_JAVA_HOME: &str = "${env/JAVA_HOME}";

/// Quote `value` as a Groovy string literal.
pub(crate) fn quote(value: &str) -> String {
    let escaped = value.replace('\\', "\\\\");
    if value.contains('\n') {
        format!("'''{}'''", escaped.replace("'''", "\\'\\'\\'"))
    } else {
        format!("'{}'", escaped.replace('\'', "\\'"))
    }
}

/// `KEY=VALUE` lines of a resolved config value, quoted for `withEnv`.
fn env_entries(raw: Option<String>) -> Vec<String> {
    raw.iter()
        .flat_map(|text| text.lines())
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(quote)
        .collect()
}

/// Writes a comment naming the step kind nobody knows how to translate.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnknownStep;

impl StepTranslator for UnknownStep {
    fn translate(&self, step: &SourceStep, cx: &mut StepContext<'_>) -> Result<(), MigrateError> {
        cx.script.push(format!(
            "// This step cannot be migrated automatically.\n\
             // The source step kind in question is:\n\
             // {}",
            step.kind
        ));
        Ok(())
    }
}

/// Emits fixed text regardless of the step's configuration.
#[derive(Debug, Clone, Copy)]
pub struct StaticStep {
    code: &'static str,
}

impl StaticStep {
    pub const STAMP: StaticStep = StaticStep::new(
        "// Skipped a Stamp step.\n\
         // The pipeline runtime does not really have an equivalent.",
    );
    pub const ASSIGN_STATUS: StaticStep = StaticStep::new(
        "// Skipped an Assign Status step.\n\
         // The pipeline runtime's default behavior is usually sufficient.",
    );
    pub const CHANGELOG: StaticStep = StaticStep::new(
        "// Skipped a Change Log Publish step.\n\
         // The pipeline runtime does this automatically.",
    );

    pub const fn new(code: &'static str) -> Self {
        Self { code }
    }
}

impl StepTranslator for StaticStep {
    fn translate(&self, _step: &SourceStep, cx: &mut StepContext<'_>) -> Result<(), MigrateError> {
        cx.script.push(self.code);
        Ok(())
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct CleanupStep;

impl StepTranslator for CleanupStep {
    fn translate(&self, step: &SourceStep, cx: &mut StepContext<'_>) -> Result<(), MigrateError> {
        cx.script
            .push(format!("// Cleanup Step: {}\ndeleteDir()", step.name));
        Ok(())
    }
}

/// `command`, plus optional `dir` and newline-separated `env`.
#[derive(Debug, Default, Clone, Copy)]
pub struct ShellStep;

impl StepTranslator for ShellStep {
    fn translate(&self, step: &SourceStep, cx: &mut StepContext<'_>) -> Result<(), MigrateError> {
        let command = cx.require_key(step, "command")?;
        let dir = cx.resolve_key(step, "dir")?;
        let env = env_entries(cx.resolve_key(step, "env")?);

        let start = cx.script.current_level();
        cx.script.push(format!("// Shell Step: {}", step.name));
        if let Some(dir) = dir {
            cx.script.open(format!("dir({}) {{", quote(&dir)));
        }
        if !env.is_empty() {
            cx.script.open(format!("withEnv([{}]) {{", env.join(", ")));
        }
        cx.script.push(format!("sh {}", quote(&command)));
        cx.script.close_to(start, "}");
        Ok(())
    }
}

/// A Maven build, run with `sh` or `bat` depending on the agent.
#[derive(Debug, Default, Clone, Copy)]
pub struct MavenStep;

impl StepTranslator for MavenStep {
    fn translate(&self, step: &SourceStep, cx: &mut StepContext<'_>) -> Result<(), MigrateError> {
        let goal = cx.require_key(step, "goal")?;

        let mut command = vec!["mvn".to_string()];
        if let Some(params) = cx.resolve_key(step, "params")? {
            command.push(params);
        }
        if let Some(file) = cx.resolve_key(step, "build_file")? {
            command.push(format!("-f {file}"));
        }
        if let Some(extra) = cx.resolve_key(step, "build_params")? {
            command.extend(
                extra
                    .lines()
                    .map(str::trim)
                    .filter(|l| !l.is_empty())
                    .map(str::to_string),
            );
        }
        command.push(goal);
        let command = quote(&command.join(" "));

        let work_dir = cx
            .resolve_key(step, "work_dir")?
            .unwrap_or_else(|| ".".to_string());

        let mut env = Vec::new();
        if step.get("java_home").is_some_and(|raw| raw != DEFAULT_JAVA_HOME) {
            if let Some(java_home) = cx.resolve_key(step, "java_home")? {
                env.push(quote(&format!("JAVA_HOME={java_home}")));
            }
        }
        if let Some(opts) = cx.resolve_key(step, "jvm_params")? {
            env.push(quote(&format!("MAVEN_OPTS={opts}")));
        }
        if let Some(home) = cx.resolve_key(step, "maven_home")? {
            env.push(quote(&format!("PATH+MAVEN={home}/bin")));
            env.push(quote(&format!("MAVEN_HOME={home}")));
        }
        env.extend(env_entries(cx.resolve_key(step, "env")?));

        let start = cx.script.current_level();
        cx.script.push(format!("// Maven Build Step: {}", step.name));
        cx.script.open(format!("dir({}) {{", quote(&work_dir)));
        cx.script.open(format!("withEnv([{}]) {{", env.join(", ")));
        cx.script.open("if (isUnix()) {");
        cx.script.push(format!("sh {command}"));
        cx.script
            .append("} else {", 1, crate::script::Placement::Dedent);
        cx.script.push(format!("bat {command}"));
        cx.script.close_to(start, "}");
        Ok(())
    }
}

/// Checks out a git repository.
///
/// The checkout leaves the workspace inside the repository directory, so the
/// step ends with an open `dir` block that the enclosing stage closes.
#[derive(Debug, Default, Clone, Copy)]
pub struct GitStep;

impl StepTranslator for GitStep {
    fn translate(&self, step: &SourceStep, cx: &mut StepContext<'_>) -> Result<(), MigrateError> {
        let url = cx.require_key(step, "repository_url")?;
        let repo_dir = cx.require_key(step, "repository_name")?;
        let branch = cx
            .resolve_key(step, "branch")?
            .unwrap_or_else(|| "master".to_string());
        // Paths come with stray newlines from some source configs.
        let work_dir = cx
            .resolve_key(step, "work_dir")?
            .map(|dir| dir.replace('\n', ""))
            .unwrap_or_else(|| ".".to_string());
        let clean = step.get("clean").is_some_and(|v| v.eq_ignore_ascii_case("true"));

        let mut header = String::from("// Git Populate Workspace Step");
        if let Some(date) = step.get("workspace_date") {
            header.push_str("\n// The workspace date is not carried over. The source would have used: ");
            header.push_str(date);
        }
        for (key, what) in [
            ("exclude_paths", "changelog file path"),
            ("exclude_users", "changelog user"),
        ] {
            if let Some(excluded) = step.get(key) {
                header.push_str(&format!(
                    "\n/* The {what} exclude is not supported. Ignored:\n * {excluded}\n */"
                ));
            }
        }

        let mut extensions = format!(
            "[$class: 'RelativeTargetDirectory', relativeTargetDir: {}]",
            quote(&repo_dir)
        );
        if clean {
            extensions.push_str(", [$class: 'CleanBeforeCheckout']");
        }

        let start = cx.script.current_level();
        cx.script.push(header);
        cx.script.open(format!("dir({}) {{", quote(&work_dir)));
        cx.script.open("checkout([");
        cx.script.push(format!(
            "$class: 'GitSCM',\n\
             branches: [[name: {}]],\n\
             doGenerateSubmoduleConfigurations: false,\n\
             extensions: [{extensions}],\n\
             submoduleCfg: [],\n\
             userRemoteConfigs: [[url: {}]]",
            quote(&branch),
            quote(&url)
        ));
        cx.script.close("])");
        cx.script.close_to(start, "}");
        cx.script.open(format!("dir({}) {{", quote(&repo_dir)));
        Ok(())
    }
}

/// Archives build artifacts matching `include` (newline-separated globs).
#[derive(Debug, Default, Clone, Copy)]
pub struct ArtifactsStep;

impl StepTranslator for ArtifactsStep {
    fn translate(&self, step: &SourceStep, cx: &mut StepContext<'_>) -> Result<(), MigrateError> {
        let base_dir = cx
            .resolve_key(step, "base_dir")?
            .unwrap_or_else(|| ".".to_string());
        let include = cx
            .resolve_key(step, "include")?
            .map(|globs| globs.replace('\n', ","))
            .unwrap_or_else(|| "**/*".to_string());
        let exclude = cx
            .resolve_key(step, "exclude")?
            .map(|globs| globs.replace('\n', ","));

        let mut archive = format!("archiveArtifacts artifacts: {}", quote(&include));
        if let Some(exclude) = exclude {
            archive.push_str(&format!(", excludes: {}", quote(&exclude)));
        }
        archive.push_str(", onlyIfSuccessful: true");

        cx.script.open(format!("dir({}) {{", quote(&base_dir)));
        cx.script.push(archive);
        cx.script.close("}");
        Ok(())
    }
}
