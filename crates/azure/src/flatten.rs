//! API responses → provider state.
//!
//! State lists come out sorted by name so two reads of the same remote object
//! always flatten to the same JSON.

use base64::engine::general_purpose::STANDARD as B64;
use base64::Engine;
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;
use std::collections::BTreeMap;

use crate::expand::normalize_location;
use crate::models::{
    ArtifactBody, ArtifactKind, Blueprint, ParameterValue, PolicyAssignmentArtifactProperties,
    RoleAssignmentArtifactProperties, Status, TargetScope, TemplateArtifactProperties,
    TemplateParameterType,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlueprintState {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub name: String,
    pub scope: String,
    pub blueprint_type: Option<String>,
    pub properties: BlueprintPropertiesState,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlueprintPropertiesState {
    pub display_name: Option<String>,
    pub description: Option<String>,
    pub target_scope: Option<TargetScope>,
    pub parameters: Vec<ParameterState>,
    pub resource_groups: Vec<ResourceGroupState>,
    pub versions: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<StatusState>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterState {
    pub name: String,
    #[serde(rename = "type")]
    pub type_: TemplateParameterType,
    pub default_value: Option<String>,
    pub allowed_values: Vec<String>,
    pub display_name: Option<String>,
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceGroupState {
    pub name: String,
    pub location: Option<String>,
    pub display_name: Option<String>,
    pub description: Option<String>,
    pub tags: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusState {
    pub time_created: Option<String>,
    pub last_modified: Option<String>,
}

pub fn flatten_blueprint(scope: &str, name: &str, bp: &Blueprint) -> BlueprintState {
    let p = &bp.properties;
    BlueprintState {
        id: bp.id.clone(),
        name: bp.name.clone().unwrap_or_else(|| name.to_string()),
        scope: scope.to_string(),
        blueprint_type: bp.type_.clone(),
        properties: BlueprintPropertiesState {
            display_name: p.display_name.clone(),
            description: p.description.clone(),
            target_scope: p.target_scope,
            parameters: p.parameters.iter()
                .map(|(name, def)| ParameterState {
                    name: name.clone(),
                    type_: def.type_,
                    default_value: def.default_value.as_ref().map(encode_default_value),
                    allowed_values: def.allowed_values.iter().map(json_text).collect(),
                    display_name: def.metadata.display_name.clone(),
                    description: def.metadata.description.clone(),
                })
                .collect(),
            resource_groups: p.resource_groups.iter()
                .map(|(key, rg)| ResourceGroupState {
                    name: rg.name.clone().unwrap_or_else(|| key.clone()),
                    location: rg.location.as_deref().map(normalize_location),
                    display_name: rg.metadata.display_name.clone(),
                    description: rg.metadata.description.clone(),
                    tags: rg.tags.clone(),
                })
                .collect(),
            versions: p.versions.keys().cloned().collect(),
            status: p.status.as_ref().map(flatten_status),
        },
    }
}

fn flatten_status(s: &Status) -> StatusState {
    StatusState { time_created: s.time_created.clone(), last_modified: s.last_modified.clone() }
}

/// Inverse of `expand::decode_default_value`: arrays become comma-joined text,
/// strings stay as-is, anything else is serialized JSON.
pub fn encode_default_value(v: &Json) -> String {
    let text = match v {
        Json::Array(items) => items.iter().map(json_text).collect::<Vec<_>>().join(","),
        other => json_text(other),
    };
    B64.encode(text)
}

fn json_text(v: &Json) -> String {
    match v {
        Json::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactState {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub name: String,
    pub scope: String,
    pub blueprint_name: String,
    pub kind: ArtifactKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template_artifact: Option<TemplateState>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub policy_assignment_artifact: Option<PolicyAssignmentState>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role_assignment_artifact: Option<RoleAssignmentState>,
}

/// State of the dedicated `azurerm_blueprint_policy_assignment_artifact` resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyAssignmentArtifactState {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub name: String,
    pub scope: String,
    pub blueprint_name: String,
    pub properties: PolicyAssignmentState,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemplateState {
    pub display_name: Option<String>,
    pub description: Option<String>,
    pub depends_on: Vec<String>,
    pub resource_group: Option<String>,
    pub template: String,
    pub parameters: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyAssignmentState {
    pub display_name: Option<String>,
    pub description: Option<String>,
    pub depends_on: Vec<String>,
    pub policy_definition_id: String,
    pub resource_group: Option<String>,
    pub parameters: Vec<PolicyParameterState>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyParameterState {
    pub name: String,
    pub value: Option<Json>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoleAssignmentState {
    pub display_name: Option<String>,
    pub description: Option<String>,
    pub depends_on: Vec<String>,
    pub role_definition_id: String,
    pub principal_ids: Vec<String>,
    pub resource_group: Option<String>,
}

pub fn flatten_artifact(
    scope: &str,
    blueprint_name: &str,
    name: &str,
    id: Option<String>,
    body: &ArtifactBody,
) -> ArtifactState {
    let mut state = ArtifactState {
        id,
        name: name.to_string(),
        scope: scope.to_string(),
        blueprint_name: blueprint_name.to_string(),
        kind: body.kind(),
        template_artifact: None,
        policy_assignment_artifact: None,
        role_assignment_artifact: None,
    };
    match body {
        ArtifactBody::Template(t) => state.template_artifact = Some(flatten_template(t)),
        ArtifactBody::PolicyAssignment(p) => state.policy_assignment_artifact = Some(flatten_policy_assignment(p)),
        ArtifactBody::RoleAssignment(r) => state.role_assignment_artifact = Some(flatten_role_assignment(r)),
    }
    state
}

fn flatten_template(t: &TemplateArtifactProperties) -> TemplateState {
    TemplateState {
        display_name: t.display_name.clone(),
        description: t.description.clone(),
        depends_on: t.depends_on.clone(),
        resource_group: t.resource_group.clone(),
        template: t.template.to_string(),
        parameters: t.parameters.iter()
            .map(|(k, v)| (k.clone(), v.value.as_ref().map(json_text).unwrap_or_default()))
            .collect(),
    }
}

pub fn flatten_policy_assignment(p: &PolicyAssignmentArtifactProperties) -> PolicyAssignmentState {
    PolicyAssignmentState {
        display_name: p.display_name.clone(),
        description: p.description.clone(),
        depends_on: p.depends_on.clone(),
        policy_definition_id: p.policy_definition_id.clone(),
        resource_group: p.resource_group.clone(),
        parameters: p.parameters.iter()
            .map(|(name, ParameterValue { value })| PolicyParameterState { name: name.clone(), value: value.clone() })
            .collect(),
    }
}

fn flatten_role_assignment(r: &RoleAssignmentArtifactProperties) -> RoleAssignmentState {
    // principalIds is either a list or a single template expression
    let principal_ids = match &r.principal_ids {
        Json::Array(items) => items.iter().map(json_text).collect(),
        Json::Null => Vec::new(),
        other => vec![json_text(other)],
    };
    RoleAssignmentState {
        display_name: r.display_name.clone(),
        description: r.description.clone(),
        depends_on: r.depends_on.clone(),
        role_definition_id: r.role_definition_id.clone(),
        principal_ids,
        resource_group: r.resource_group.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{BlueprintProperties, Metadata, ParameterDefinition, ResourceGroupDefinition};
    use serde_json::json;

    #[test]
    fn blueprint_state_is_sorted_and_normalized() {
        let mut props = BlueprintProperties::default();
        for name in ["zeta", "alpha"] {
            props.parameters.insert(name.into(), ParameterDefinition {
                type_: TemplateParameterType::Array,
                metadata: Metadata::default(),
                default_value: Some(json!(["a", "b"])),
                allowed_values: vec![json!("a"), json!(1)],
            });
        }
        props.resource_groups.insert("rg".into(), ResourceGroupDefinition {
            name: None,
            location: Some("West Europe".into()),
            ..Default::default()
        });
        props.status = Some(Status { time_created: Some("t0".into()), last_modified: Some("t1".into()) });
        let bp = Blueprint { id: Some("/x".into()), name: None, type_: None, properties: props };

        let state = flatten_blueprint("/subscriptions/s", "bp", &bp);
        assert_eq!(state.name, "bp");
        let names: Vec<_> = state.properties.parameters.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, ["alpha", "zeta"]);
        assert_eq!(state.properties.parameters[0].default_value.as_deref(), Some(B64.encode("a,b").as_str()));
        assert_eq!(state.properties.parameters[0].allowed_values, vec!["a".to_string(), "1".to_string()]);
        assert_eq!(state.properties.resource_groups[0].name, "rg");
        assert_eq!(state.properties.resource_groups[0].location.as_deref(), Some("westeurope"));
        assert_eq!(state.properties.status.as_ref().unwrap().time_created.as_deref(), Some("t0"));
    }

    #[test]
    fn computed_fields_are_omitted_until_known() {
        let bp = Blueprint { id: None, name: Some("bp".into()), type_: None, properties: BlueprintProperties::default() };
        let v = serde_json::to_value(flatten_blueprint("/subscriptions/s", "bp", &bp)).unwrap();
        assert!(v.get("id").is_none());
        assert!(v["properties"].get("status").is_none());
        assert_eq!(v["properties"]["description"], Json::Null);
    }

    #[test]
    fn role_assignment_principal_expression() {
        let body = ArtifactBody::RoleAssignment(RoleAssignmentArtifactProperties {
            display_name: None,
            description: None,
            depends_on: vec![],
            role_definition_id: "/providers/Microsoft.Authorization/roleDefinitions/r".into(),
            principal_ids: json!("[parameters('owners')]"),
            resource_group: None,
        });
        let state = flatten_artifact("/subscriptions/s", "bp", "owners", None, &body);
        assert_eq!(state.kind, ArtifactKind::RoleAssignment);
        assert_eq!(state.role_assignment_artifact.unwrap().principal_ids, vec!["[parameters('owners')]".to_string()]);
    }
}
