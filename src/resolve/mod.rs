//! Recursive `${scope:name}` property resolution.
//!
//! A [`Resolver`] owns one job's layered [`ScopeSet`] and records every
//! property name the generated script ends up depending on: names found in a
//! scope land in [`Resolver::needed`], names found nowhere land in
//! [`Resolver::unknown`] and are left for an operator to fill in.

mod expr;

pub use expr::{ExpressionEvaluator, HelperScript, ScriptHelpers, make_safe};

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, LazyLock};

use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};

use crate::error::ResolveError;

/// Default bound on substitution passes (and on nested lookups).
pub const DEFAULT_MAX_PASSES: usize = 50;
/// Default bound on the length of a resolved string.
pub const DEFAULT_MAX_LEN: usize = 1024 * 1024;

static SCOPED_REF: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\{([^:}]+):([^}]+)\}").expect("valid reference pattern"));

/// A named layer of properties.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScopeKind {
    Workflow,
    Project,
    System,
    Agent,
}

/// Lookup order for `property:` / `p:` references, most specific first.
const PROPERTY_ORDER: &[ScopeKind] = &[ScopeKind::Workflow, ScopeKind::Project, ScopeKind::System];
/// Lookup order for `agent:` / `a:` references.
const AGENT_ORDER: &[ScopeKind] = &[
    ScopeKind::Agent,
    ScopeKind::Workflow,
    ScopeKind::Project,
    ScopeKind::System,
];

/// A raw property value as stored in the source system.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "PropertyRepr")]
pub struct Property {
    pub value: String,
    pub secret: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

// Catalog files may give a property as a bare string.
#[derive(Deserialize)]
#[serde(untagged)]
enum PropertyRepr {
    Plain(String),
    Full {
        value: String,
        #[serde(default)]
        secret: bool,
        #[serde(default)]
        description: Option<String>,
    },
}

impl From<PropertyRepr> for Property {
    fn from(repr: PropertyRepr) -> Self {
        match repr {
            PropertyRepr::Plain(value) => Property::new(value),
            PropertyRepr::Full {
                value,
                secret,
                description,
            } => Property {
                value,
                secret,
                description,
            },
        }
    }
}

impl Property {
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            secret: false,
            description: None,
        }
    }

    pub fn secret(value: impl Into<String>) -> Self {
        Self {
            secret: true,
            ..Self::new(value)
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// All property layers visible to one workflow.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScopeSet {
    #[serde(default)]
    pub workflow: BTreeMap<String, Property>,
    #[serde(default)]
    pub project: BTreeMap<String, Property>,
    #[serde(default)]
    pub system: BTreeMap<String, Property>,
    #[serde(default)]
    pub agent: BTreeMap<String, Property>,
}

impl ScopeSet {
    pub fn new() -> Self {
        Self::default()
    }

    fn layer(&self, scope: ScopeKind) -> &BTreeMap<String, Property> {
        match scope {
            ScopeKind::Workflow => &self.workflow,
            ScopeKind::Project => &self.project,
            ScopeKind::System => &self.system,
            ScopeKind::Agent => &self.agent,
        }
    }

    pub fn insert(&mut self, scope: ScopeKind, name: impl Into<String>, property: Property) {
        let layer = match scope {
            ScopeKind::Workflow => &mut self.workflow,
            ScopeKind::Project => &mut self.project,
            ScopeKind::System => &mut self.system,
            ScopeKind::Agent => &mut self.agent,
        };
        layer.insert(name.into(), property);
    }

    pub fn with(mut self, scope: ScopeKind, name: impl Into<String>, property: Property) -> Self {
        self.insert(scope, name, property);
        self
    }

    pub fn get(&self, scope: ScopeKind, name: &str) -> Option<&Property> {
        self.layer(scope).get(name)
    }

    /// First match for `name` walking `order`.
    pub fn find(&self, order: &[ScopeKind], name: &str) -> Option<(ScopeKind, &Property)> {
        order
            .iter()
            .find_map(|&scope| self.get(scope, name).map(|p| (scope, p)))
    }
}

/// A property the generated script depends on, with the scope it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NeededProperty {
    pub scope: ScopeKind,
    pub property: Property,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RefKind {
    Scoped(&'static [ScopeKind]),
    Script,
}

fn classify(prefix: &str) -> Option<(RefKind, bool)> {
    let (prefix, optional) = match prefix.strip_suffix('?') {
        Some(stripped) => (stripped, true),
        None => (prefix, false),
    };
    let kind = match prefix.trim() {
        "property" | "p" => RefKind::Scoped(PROPERTY_ORDER),
        "agent" | "a" => RefKind::Scoped(AGENT_ORDER),
        "script" | "bsh" => RefKind::Script,
        _ => return None,
    };
    Some((kind, optional))
}

/// Limits guarding against cyclic or exploding definitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolverLimits {
    pub max_passes: usize,
    pub max_len: usize,
}

impl Default for ResolverLimits {
    fn default() -> Self {
        Self {
            max_passes: DEFAULT_MAX_PASSES,
            max_len: DEFAULT_MAX_LEN,
        }
    }
}

pub struct Resolver {
    scopes: ScopeSet,
    needed: BTreeMap<String, NeededProperty>,
    unknown: BTreeSet<String>,
    evaluator: Arc<dyn ExpressionEvaluator>,
    limits: ResolverLimits,
    depth: usize,
}

impl std::fmt::Debug for Resolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Resolver")
            .field("needed", &self.needed.keys().collect::<Vec<_>>())
            .field("unknown", &self.unknown)
            .field("limits", &self.limits)
            .finish_non_exhaustive()
    }
}

impl Default for Resolver {
    fn default() -> Self {
        Self::new(ScopeSet::default())
    }
}

impl Resolver {
    pub fn new(scopes: ScopeSet) -> Self {
        Self {
            scopes,
            needed: BTreeMap::new(),
            unknown: BTreeSet::new(),
            evaluator: Arc::new(HelperScript),
            limits: ResolverLimits::default(),
            depth: 0,
        }
    }

    pub fn with_limits(mut self, limits: ResolverLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn with_evaluator(mut self, evaluator: Arc<dyn ExpressionEvaluator>) -> Self {
        self.evaluator = evaluator;
        self
    }

    /// Install the job's scopes. Called once, when the workflow is loaded.
    pub fn load_scopes(&mut self, scopes: ScopeSet) {
        self.scopes = scopes;
    }

    pub fn scopes(&self) -> &ScopeSet {
        &self.scopes
    }

    pub fn needed(&self) -> &BTreeMap<String, NeededProperty> {
        &self.needed
    }

    pub fn unknown(&self) -> &BTreeSet<String> {
        &self.unknown
    }

    /// Find `name` along `order` and register it as needed or unknown.
    /// Repeated lookups of the same name reuse the first registration.
    fn lookup(&mut self, order: &[ScopeKind], name: &str) -> Option<String> {
        if let Some(found) = self.needed.get(name) {
            return Some(found.property.value.clone());
        }
        if self.unknown.contains(name) {
            return None;
        }

        match self.scopes.find(order, name) {
            Some((scope, property)) => {
                let value = property.value.clone();
                self.needed.insert(
                    name.to_string(),
                    NeededProperty {
                        scope,
                        property: property.clone(),
                    },
                );
                Some(value)
            }
            None => {
                self.unknown.insert(name.to_string());
                None
            }
        }
    }

    /// Replace every `${scope:name}` reference until none remain, then
    /// evaluate the first `${script:...}` expression, if any.
    pub fn resolve(&mut self, text: &str) -> Result<String, ResolveError> {
        let substituted = self.substitute_scopes(text)?;
        self.evaluate_script(&substituted)
    }

    /// Re-scan until a pass finds nothing to replace. Only whole passes
    /// count against the limit.
    fn substitute_scopes(&mut self, text: &str) -> Result<String, ResolveError> {
        let mut current = text.to_owned();
        let mut passes = 0;

        while let Some(next) = self.substitute_pass(&current)? {
            if passes == self.limits.max_passes {
                return Err(ResolveError::PassLimit {
                    limit: self.limits.max_passes,
                    text: text.to_owned(),
                });
            }
            passes += 1;
            current = next;
        }

        Ok(current)
    }

    /// Replace every scoped reference in `text` once. `None` when there was
    /// nothing to replace.
    fn substitute_pass(&mut self, text: &str) -> Result<Option<String>, ResolveError> {
        let mut out = String::with_capacity(text.len());
        let mut last = 0;
        let mut replaced = false;

        for caps in SCOPED_REF.captures_iter(text) {
            let Some(ScopedRef { scopes, optional, name }) = scoped_reference(&caps, text)? else {
                continue;
            };
            let value = match self.lookup(scopes, &name) {
                Some(value) => value,
                None if optional => String::new(),
                None => return Err(ResolveError::Unresolved(name)),
            };

            let whole = caps.get(0).map_or(0..0, |m| m.range());
            out.push_str(&text[last..whole.start]);
            out.push_str(&value);
            last = whole.end;
            replaced = true;

            if out.len() > self.limits.max_len {
                return Err(ResolveError::TooLarge {
                    limit: self.limits.max_len,
                });
            }
        }

        if !replaced {
            return Ok(None);
        }
        out.push_str(&text[last..]);
        if out.len() > self.limits.max_len {
            return Err(ResolveError::TooLarge {
                limit: self.limits.max_len,
            });
        }
        Ok(Some(out))
    }

    fn evaluate_script(&mut self, text: &str) -> Result<String, ResolveError> {
        let Some((whole, expr)) = first_script_reference(text) else {
            return Ok(text.to_owned());
        };
        let evaluator = Arc::clone(&self.evaluator);
        let value = evaluator.evaluate(&expr, self)?;
        Ok(text.replace(&whole, &value))
    }
}

impl ScriptHelpers for Resolver {
    fn property(&mut self, name: &str) -> Result<String, ResolveError> {
        if self.depth >= self.limits.max_passes {
            return Err(ResolveError::PassLimit {
                limit: self.limits.max_passes,
                text: name.to_owned(),
            });
        }
        let Some(value) = self.lookup(PROPERTY_ORDER, name) else {
            return Ok(String::new());
        };

        self.depth += 1;
        let resolved = self.resolve(&value);
        self.depth -= 1;
        resolved
    }
}

struct ScopedRef {
    scopes: &'static [ScopeKind],
    optional: bool,
    name: String,
}

/// Classify one regex match. `None` for `${script:...}`, which is left for
/// the expression step.
fn scoped_reference(caps: &Captures<'_>, text: &str) -> Result<Option<ScopedRef>, ResolveError> {
    let prefix = &caps[1];
    let Some((kind, optional)) = classify(prefix) else {
        return Err(ResolveError::UnknownScope {
            prefix: prefix.to_string(),
            text: text.to_string(),
        });
    };
    let RefKind::Scoped(scopes) = kind else {
        return Ok(None);
    };

    let raw_name = caps[2].trim();
    let (name, optional) = match raw_name.strip_suffix('?') {
        Some(stripped) => (stripped, true),
        None => (raw_name, optional),
    };
    Ok(Some(ScopedRef {
        scopes,
        optional,
        name: name.to_string(),
    }))
}

fn first_script_reference(text: &str) -> Option<(String, String)> {
    SCOPED_REF.captures_iter(text).find_map(|caps| {
        matches!(classify(&caps[1]), Some((RefKind::Script, _)))
            .then(|| (caps[0].to_string(), caps[2].to_string()))
    })
}
