//! Whole-workflow synthesis: the node wrapper, one stage per source job, and
//! the parameter list derived from the properties the script ended up using.

use tracing::debug;

use super::{StepContext, TranslatorRegistry};
use crate::error::MigrateError;
use crate::resolve::Resolver;
use crate::script::Script;
use crate::source::{SourceJob, WorkflowDefinition};
use crate::target::{ParameterDefinition, ParameterKind};

pub const NODE_PARAMETER_DESCRIPTION: &str = "Which label to use to run this job.";
pub const UNKNOWN_PARAMETER_DESCRIPTION: &str = "Provide Value";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SynthesisOptions {
    pub job_prefix: String,
    pub node_parameter: String,
}

impl Default for SynthesisOptions {
    fn default() -> Self {
        Self {
            job_prefix: "A2J".to_string(),
            node_parameter: "A2J_NODE".to_string(),
        }
    }
}

/// `<prefix>-<project>-<workflow>` with spaces turned into dashes.
pub fn target_job_name(prefix: &str, workflow: &WorkflowDefinition) -> String {
    format!("{prefix}-{}-{}", workflow.project, workflow.name).replace(' ', "-")
}

fn translate_job(
    registry: &TranslatorRegistry,
    job: &SourceJob,
    cx: &mut StepContext<'_>,
    on_step: &mut dyn FnMut(),
) -> Result<(), MigrateError> {
    let start = cx.script.current_level();
    cx.script
        .open(format!("stage(\"{}\") {{", job.name.replace('"', "\\\"")));
    for step in &job.steps {
        registry.run_step(step, cx)?;
        on_step();
    }
    cx.script.close_to(start, "}");
    Ok(())
}

/// Write the script for `workflow` into `script`. `progress` is called with
/// a percentage after every step.
pub fn synthesize(
    workflow: &WorkflowDefinition,
    registry: &TranslatorRegistry,
    options: &SynthesisOptions,
    script: &mut Script,
    resolver: &mut Resolver,
    progress: &mut dyn FnMut(usize),
) -> Result<(), MigrateError> {
    let total = workflow.step_count();
    let mut done = 0;
    let mut cx = StepContext { script, resolver };

    cx.script
        .open(format!("node(params.{})\n{{", options.node_parameter));
    for job in &workflow.jobs {
        debug!(stage = %job.name, steps = job.steps.len(), "translating stage");
        translate_job(registry, job, &mut cx, &mut || {
            done += 1;
            progress(done * 100 / total.max(1));
        })?;
    }
    cx.script.close_to(0, "}");
    Ok(())
}

/// Parameters for the generated job: the node label first, then every
/// property the script used, then every property nobody could resolve.
pub fn build_parameters(node_parameter: &str, resolver: &Resolver) -> Vec<ParameterDefinition> {
    let mut params = vec![ParameterDefinition::new(
        node_parameter,
        ParameterKind::String,
        "",
        NODE_PARAMETER_DESCRIPTION,
    )];

    for (name, needed) in resolver.needed() {
        if name == node_parameter {
            continue;
        }
        let property = &needed.property;
        let kind = if property.secret {
            ParameterKind::Password
        } else if property.value.contains('\n') {
            ParameterKind::Text
        } else {
            ParameterKind::String
        };
        let description = match property.description.as_deref() {
            Some(desc) if !desc.is_empty() => format!("From source: {desc}"),
            _ => "From source".to_string(),
        };
        params.push(ParameterDefinition::new(
            name.as_str(),
            kind,
            property.value.as_str(),
            description,
        ));
    }

    for name in resolver.unknown() {
        if name == node_parameter {
            continue;
        }
        params.push(ParameterDefinition::new(
            name.as_str(),
            ParameterKind::String,
            "",
            UNKNOWN_PARAMETER_DESCRIPTION,
        ));
    }

    params
}
