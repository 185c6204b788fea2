use anyhow::Result;
use regex::Regex;
use std::collections::BTreeSet;
use std::fmt;
use std::sync::OnceLock;

use azbp_azure::config::{
    block_for, ArtifactConfig, BlueprintConfig, PolicyAssignmentArtifactConfig,
    PolicyParameterConfig, ResourceConfig,
};
use azbp_azure::expand::decode_default_value;
use azbp_azure::models::TargetScope;
use azbp_core::{scope, Address};

/// A configuration error tied to one attribute of one resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub address: Address,
    pub attribute: String,
    pub message: String,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}: {}", self.address, self.attribute, self.message)
    }
}

fn resource_group_name() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[-\w\._\(\)]+$").expect("static regex"))
}

/// Plan-time checks over a whole stack.
pub struct Policy { pub allow_management_group_target: bool }

impl Policy {
    pub fn new(allow_management_group_target: bool) -> Self { Self { allow_management_group_target } }

    pub fn check(&self, resources: &[ResourceConfig]) -> Vec<Diagnostic> {
        let mut out = Diagnostics::default();
        let blueprints: BTreeSet<&str> = resources.iter()
            .filter_map(|r| match r {
                ResourceConfig::Blueprint(b) => Some(b.name.as_str()),
                _ => None,
            })
            .collect();

        let mut seen = BTreeSet::new();
        for r in resources {
            let address = r.address();
            if !seen.insert(address.clone()) {
                out.push(&address, "name", "duplicate resource address".to_string());
            }
            match r {
                ResourceConfig::Blueprint(b) => self.check_blueprint(&address, b, &mut out),
                ResourceConfig::Artifact(a) => check_artifact(&address, a, &blueprints, &mut out),
                ResourceConfig::PolicyAssignmentArtifact(p) => {
                    check_policy_assignment_artifact(&address, p, &blueprints, &mut out)
                }
            }
        }
        out.0
    }

    /// Fails with every diagnostic when any check fails.
    pub fn enforce(&self, resources: &[ResourceConfig]) -> Result<()> {
        let diags = self.check(resources);
        if !diags.is_empty() {
            let lines: Vec<String> = diags.iter().map(ToString::to_string).collect();
            anyhow::bail!("Policy: configuration is invalid:\n  {}", lines.join("\n  "));
        }
        Ok(())
    }

    fn check_blueprint(&self, address: &Address, b: &BlueprintConfig, out: &mut Diagnostics) {
        check_scope(address, &b.scope, out);
        let props = &b.properties;
        if props.target_scope == TargetScope::ManagementGroup && !self.allow_management_group_target {
            out.push(address, "properties.target_scope",
                "managementGroup is reserved and currently rejected by the service".to_string());
        }
        no_duplicate_names(address, "properties.parameters.name", props.parameters.iter().map(|p| p.name.as_str()), out);
        for p in &props.parameters {
            if let Some(dv) = &p.default_value {
                if let Err(e) = decode_default_value(p.type_, dv) {
                    out.push(address, &format!("properties.parameters.{}.default_value", p.name), e.to_string());
                }
            }
        }
        no_duplicate_names(address, "properties.resource_groups.name", props.resource_groups.iter().map(|rg| rg.name.as_str()), out);
        for rg in &props.resource_groups {
            if rg.name.len() > 90 || !resource_group_name().is_match(&rg.name) {
                out.push(address, "properties.resource_groups.name", format!(
                    "{:?} may only contain alphanumeric characters, dash, underscores, parentheses and periods, and be at most 90 characters",
                    rg.name
                ));
            }
        }
        no_empty_strings(address, "properties.versions", &props.versions, out);
    }
}

#[derive(Default)]
struct Diagnostics(Vec<Diagnostic>);

impl Diagnostics {
    fn push(&mut self, address: &Address, attribute: &str, message: String) {
        self.0.push(Diagnostic { address: address.clone(), attribute: attribute.to_string(), message });
    }
}

fn check_scope(address: &Address, value: &str, out: &mut Diagnostics) {
    let (_, errors) = scope::validate(value, "scope");
    for e in errors {
        out.push(address, "scope", e.to_string());
    }
}

fn check_artifact_scope(address: &Address, scope: &Option<String>, blueprint: &str, blueprints: &BTreeSet<&str>, out: &mut Diagnostics) {
    match scope {
        Some(s) => check_scope(address, s, out),
        None if !blueprints.contains(blueprint) => out.push(address, "scope", format!(
            "required because blueprint {blueprint:?} is not declared in this stack"
        )),
        None => {}
    }
}

// names key the maps sent to the service
fn no_duplicate_names<'a>(address: &Address, attribute: &str, names: impl Iterator<Item = &'a str>, out: &mut Diagnostics) {
    let mut seen = BTreeSet::new();
    let mut reported = BTreeSet::new();
    for name in names {
        if !seen.insert(name) && reported.insert(name) {
            out.push(address, attribute, format!("duplicate name {name:?}"));
        }
    }
}

fn policy_parameter_names(params: &[PolicyParameterConfig]) -> impl Iterator<Item = &str> {
    params.iter().map(|p| p.name.as_str())
}

fn no_empty_strings(address: &Address, attribute: &str, values: &[String], out: &mut Diagnostics) {
    if values.iter().any(|v| v.trim().is_empty()) {
        out.push(address, attribute, "must not contain empty strings".to_string());
    }
}

fn check_artifact(address: &Address, a: &ArtifactConfig, blueprints: &BTreeSet<&str>, out: &mut Diagnostics) {
    check_artifact_scope(address, &a.scope, &a.blueprint_name, blueprints, out);

    let wanted = block_for(a.kind);
    let blocks = a.blocks();
    if !blocks.contains(&wanted) {
        out.push(address, wanted, format!("required for kind {}", a.kind));
    }
    for other in blocks.iter().filter(|b| **b != wanted) {
        out.push(address, other, format!("conflicts with kind {}", a.kind));
    }

    if let Some(t) = &a.template_artifact {
        no_empty_strings(address, "template_artifact.depends_on", &t.depends_on, out);
        if let Err(e) = serde_json::from_str::<serde_json::Value>(&t.template) {
            out.push(address, "template_artifact.template", format!("contains an invalid JSON: {e}"));
        }
    }
    if let Some(p) = &a.policy_assignment_artifact {
        no_empty_strings(address, "policy_assignment_artifact.depends_on", &p.depends_on, out);
        no_duplicate_names(address, "policy_assignment_artifact.parameters.name", policy_parameter_names(&p.parameters), out);
    }
    if let Some(r) = &a.role_assignment_artifact {
        no_empty_strings(address, "role_assignment_artifact.depends_on", &r.depends_on, out);
        no_empty_strings(address, "role_assignment_artifact.principal_ids", &r.principal_ids, out);
    }
}

fn check_policy_assignment_artifact(address: &Address, p: &PolicyAssignmentArtifactConfig, blueprints: &BTreeSet<&str>, out: &mut Diagnostics) {
    check_artifact_scope(address, &p.scope, &p.blueprint_name, blueprints, out);
    no_empty_strings(address, "properties.depends_on", &p.properties.depends_on, out);
    no_duplicate_names(address, "properties.parameters.name", policy_parameter_names(&p.properties.parameters), out);
    if p.properties.policy_definition_id.trim().is_empty() {
        out.push(address, "properties.policy_definition_id", "must not be empty".to_string());
    }
}
