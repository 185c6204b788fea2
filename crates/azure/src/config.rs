//! Typed configuration for the blueprint resources, deserialized once from the
//! stack file.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::models::{ArtifactKind, TargetScope, TemplateParameterType, BLUEPRINT_TYPE};

pub const BLUEPRINT: &str = "azurerm_blueprint";
pub const ARTIFACT: &str = "azurerm_blueprint_artifact";
pub const POLICY_ASSIGNMENT_ARTIFACT: &str = "azurerm_blueprint_policy_assignment_artifact";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ResourceConfig {
    #[serde(rename = "azurerm_blueprint")]
    Blueprint(BlueprintConfig),
    #[serde(rename = "azurerm_blueprint_artifact")]
    Artifact(ArtifactConfig),
    #[serde(rename = "azurerm_blueprint_policy_assignment_artifact")]
    PolicyAssignmentArtifact(PolicyAssignmentArtifactConfig),
}

impl ResourceConfig {
    pub fn type_name(&self) -> &'static str {
        match self {
            ResourceConfig::Blueprint(_) => BLUEPRINT,
            ResourceConfig::Artifact(_) => ARTIFACT,
            ResourceConfig::PolicyAssignmentArtifact(_) => POLICY_ASSIGNMENT_ARTIFACT,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            ResourceConfig::Blueprint(c) => &c.name,
            ResourceConfig::Artifact(c) => &c.name,
            ResourceConfig::PolicyAssignmentArtifact(c) => &c.name,
        }
    }

    pub fn address(&self) -> azbp_core::Address {
        azbp_core::Address::new(self.type_name(), self.name())
    }
}

fn default_blueprint_type() -> String { BLUEPRINT_TYPE.to_string() }

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BlueprintConfig {
    pub name: String,
    pub scope: String,
    #[serde(rename = "blueprint_type", default = "default_blueprint_type")]
    pub type_name: String,
    pub properties: BlueprintPropertiesConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BlueprintPropertiesConfig {
    pub display_name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub target_scope: TargetScope,
    #[serde(default)]
    pub parameters: Vec<ParameterConfig>,
    #[serde(default)]
    pub resource_groups: Vec<ResourceGroupConfig>,
    #[serde(default)]
    pub versions: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ParameterConfig {
    pub name: String,
    #[serde(rename = "type")]
    pub type_: TemplateParameterType,
    /// Base64 of the textual default, whatever the parameter type.
    #[serde(default)]
    pub default_value: Option<String>,
    #[serde(default)]
    pub allowed_values: Vec<String>,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ResourceGroupConfig {
    pub name: String,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ArtifactConfig {
    pub name: String,
    #[serde(default)]
    pub scope: Option<String>,
    pub blueprint_name: String,
    pub kind: ArtifactKind,
    #[serde(default)]
    pub template_artifact: Option<TemplateArtifactConfig>,
    #[serde(default)]
    pub policy_assignment_artifact: Option<PolicyAssignmentPropertiesConfig>,
    #[serde(default)]
    pub role_assignment_artifact: Option<RoleAssignmentArtifactConfig>,
}

impl ArtifactConfig {
    /// Names of the artifact blocks that are set.
    pub fn blocks(&self) -> Vec<&'static str> {
        let mut set = Vec::new();
        if self.template_artifact.is_some() { set.push("template_artifact"); }
        if self.policy_assignment_artifact.is_some() { set.push("policy_assignment_artifact"); }
        if self.role_assignment_artifact.is_some() { set.push("role_assignment_artifact"); }
        set
    }
}

pub fn block_for(kind: ArtifactKind) -> &'static str {
    match kind {
        ArtifactKind::Template => "template_artifact",
        ArtifactKind::PolicyAssignment => "policy_assignment_artifact",
        ArtifactKind::RoleAssignment => "role_assignment_artifact",
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TemplateArtifactConfig {
    pub display_name: String,
    pub description: String,
    #[serde(default)]
    pub depends_on: Vec<String>,
    #[serde(default)]
    pub resource_group: Option<String>,
    /// ARM template as a JSON document.
    pub template: String,
    #[serde(default)]
    pub parameters: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RoleAssignmentArtifactConfig {
    pub display_name: String,
    pub description: String,
    #[serde(default)]
    pub depends_on: Vec<String>,
    pub role_definition_id: String,
    #[serde(default)]
    pub principal_ids: Vec<String>,
    #[serde(default)]
    pub resource_group: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PolicyAssignmentArtifactConfig {
    pub name: String,
    #[serde(default)]
    pub scope: Option<String>,
    pub blueprint_name: String,
    pub properties: PolicyAssignmentPropertiesConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PolicyAssignmentPropertiesConfig {
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub depends_on: Vec<String>,
    pub policy_definition_id: String,
    #[serde(default)]
    pub resource_group: Option<String>,
    #[serde(default)]
    pub parameters: Vec<PolicyParameterConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PolicyParameterConfig {
    pub name: String,
    #[serde(default)]
    pub value: Option<serde_json::Value>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resources_are_tagged_by_type() {
        let yaml = r#"
- type: azurerm_blueprint
  name: landing
  scope: /subscriptions/11111111-1111-1111-1111-111111111111
  properties:
    display_name: Landing zone
    target_scope: subscription
    parameters:
      - name: skus
        type: array
        default_value: YSxi
    resource_groups:
      - name: core
        location: West Europe
        tags: { env: dev }
- type: azurerm_blueprint_policy_assignment_artifact
  name: deny-skus
  blueprint_name: landing
  properties:
    policy_definition_id: /providers/Microsoft.Authorization/policyDefinitions/abc
    parameters:
      - name: effect
        value: deny
"#;
        let res: Vec<ResourceConfig> = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(res.len(), 2);
        assert_eq!(res[0].address().0, "azurerm_blueprint.landing");
        let ResourceConfig::Blueprint(bp) = &res[0] else { panic!("not a blueprint") };
        assert_eq!(bp.type_name, BLUEPRINT_TYPE);
        let props = &bp.properties;
        assert_eq!(props.target_scope, TargetScope::Subscription);
        assert_eq!(props.parameters[0].type_, TemplateParameterType::Array);
        assert_eq!(res[1].type_name(), POLICY_ASSIGNMENT_ARTIFACT);
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let yaml = "type: azurerm_blueprint\nname: x\nscope: /subscriptions/a\nproperties: { display_name: x, target_scope: subscription, bogus: 1 }\n";
        assert!(serde_yaml::from_str::<ResourceConfig>(yaml).is_err());
    }

    #[test]
    fn artifact_kind_in_any_case() {
        let yaml = "type: azurerm_blueprint_artifact\nname: r\nblueprint_name: landing\nkind: RoleAssignment\n";
        let ResourceConfig::Artifact(a) = serde_yaml::from_str::<ResourceConfig>(yaml).unwrap() else {
            panic!("not an artifact")
        };
        assert_eq!(a.kind, ArtifactKind::RoleAssignment);
    }

    #[test]
    fn artifact_blocks_are_listed() {
        let yaml = r#"
type: azurerm_blueprint_artifact
name: tpl
blueprint_name: landing
kind: template
template_artifact:
  display_name: Storage
  description: storage account
  template: '{"resources": []}'
"#;
        let ResourceConfig::Artifact(a) = serde_yaml::from_str::<ResourceConfig>(yaml).unwrap() else {
            panic!("not an artifact")
        };
        assert_eq!(a.kind, ArtifactKind::Template);
        assert_eq!(a.blocks(), vec!["template_artifact"]);
        assert_eq!(block_for(a.kind), "template_artifact");
    }
}
