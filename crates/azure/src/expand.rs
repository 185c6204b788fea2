//! Configuration → API request objects.

use base64::engine::general_purpose::STANDARD as B64;
use base64::Engine;
use serde_json::{Map as JsonMap, Value as Json};
use std::collections::BTreeMap;
use thiserror::Error;

use crate::config::{
    block_for, ArtifactConfig, BlueprintConfig, ParameterConfig, PolicyAssignmentPropertiesConfig,
    ResourceGroupConfig, RoleAssignmentArtifactConfig, TemplateArtifactConfig,
};
use crate::models::{
    Artifact, ArtifactBody, ArtifactKind, Blueprint, BlueprintProperties, Metadata, ParameterDefinition,
    ParameterValue, PolicyAssignmentArtifactProperties, ResourceGroupDefinition,
    RoleAssignmentArtifactProperties, TemplateArtifactProperties, TemplateParameterType,
};

#[derive(Error, Debug)]
pub enum DefaultValueError {
    #[error("must be base64 encoded")]
    Base64(#[from] base64::DecodeError),
    #[error("must decode to UTF-8 text")]
    Utf8(#[from] std::string::FromUtf8Error),
}

#[derive(Error, Debug)]
pub enum ExpandError {
    #[error("default_value of parameter {parameter:?} {source}")]
    DefaultValue { parameter: String, #[source] source: DefaultValueError },
    #[error("template of artifact {artifact:?} is not valid JSON")]
    Template { artifact: String, #[source] source: serde_json::Error },
    #[error("artifact {artifact:?} of kind {kind} needs a {block} block")]
    MissingBlock { artifact: String, kind: ArtifactKind, block: &'static str },
}

/// Azure accepts `West Europe` and `westeurope` alike; state keeps the latter.
pub fn normalize_location(location: &str) -> String {
    location.replace(' ', "").to_lowercase()
}

pub fn expand_blueprint(cfg: &BlueprintConfig) -> Result<Blueprint, ExpandError> {
    let props = &cfg.properties;
    let parameters = props.parameters.iter()
        .map(|p| Ok((p.name.clone(), expand_parameter(p)?)))
        .collect::<Result<BTreeMap<_, _>, ExpandError>>()?;
    let resource_groups = props.resource_groups.iter()
        .map(|rg| (rg.name.clone(), expand_resource_group(rg)))
        .collect();

    Ok(Blueprint {
        id: None,
        name: Some(cfg.name.clone()),
        type_: Some(cfg.type_name.clone()),
        properties: BlueprintProperties {
            display_name: Some(props.display_name.clone()),
            description: props.description.clone(),
            target_scope: Some(props.target_scope),
            parameters,
            resource_groups,
            // versions are published out of band; layout is unused by the service
            versions: JsonMap::new(),
            layout: JsonMap::new(),
            status: None,
        },
    })
}

fn expand_parameter(p: &ParameterConfig) -> Result<ParameterDefinition, ExpandError> {
    let default_value = match &p.default_value {
        Some(encoded) => Some(decode_default_value(p.type_, encoded).map_err(|source| {
            ExpandError::DefaultValue { parameter: p.name.clone(), source }
        })?),
        None => None,
    };
    Ok(ParameterDefinition {
        type_: p.type_,
        metadata: Metadata {
            display_name: p.display_name.clone(),
            description: p.description.clone(),
            strong_type: None,
        },
        default_value,
        allowed_values: p.allowed_values.iter().cloned().map(Json::String).collect(),
    })
}

pub fn decode_default_value(type_: TemplateParameterType, encoded: &str) -> Result<Json, DefaultValueError> {
    let text = String::from_utf8(B64.decode(encoded.trim())?)?;
    Ok(match type_ {
        TemplateParameterType::String | TemplateParameterType::SecureString => Json::String(text),
        TemplateParameterType::Array => {
            let items = text.trim().trim_matches(&['[', ']'][..]);
            if items.trim().is_empty() {
                Json::Array(Vec::new())
            } else {
                // empty items are kept so the value round-trips through state
                Json::Array(items.split(',').map(|s| Json::String(s.trim().to_string())).collect())
            }
        }
        _ => serde_json::from_str(&text).unwrap_or(Json::String(text)),
    })
}

fn expand_resource_group(rg: &ResourceGroupConfig) -> ResourceGroupDefinition {
    ResourceGroupDefinition {
        name: Some(rg.name.clone()),
        location: rg.location.as_deref().map(normalize_location),
        metadata: Metadata {
            display_name: rg.display_name.clone(),
            description: rg.description.clone(),
            strong_type: None,
        },
        depends_on: Vec::new(),
        tags: rg.tags.clone(),
    }
}

pub fn expand_artifact(cfg: &ArtifactConfig) -> Result<Artifact, ExpandError> {
    let missing = || ExpandError::MissingBlock {
        artifact: cfg.name.clone(),
        kind: cfg.kind,
        block: block_for(cfg.kind),
    };
    let body = match cfg.kind {
        ArtifactKind::Template => {
            let block = cfg.template_artifact.as_ref().ok_or_else(missing)?;
            ArtifactBody::Template(expand_template(&cfg.name, block)?)
        }
        ArtifactKind::PolicyAssignment => {
            let block = cfg.policy_assignment_artifact.as_ref().ok_or_else(missing)?;
            ArtifactBody::PolicyAssignment(expand_policy_assignment(block))
        }
        ArtifactKind::RoleAssignment => {
            let block = cfg.role_assignment_artifact.as_ref().ok_or_else(missing)?;
            ArtifactBody::RoleAssignment(expand_role_assignment(block))
        }
    };
    Ok(Artifact { id: None, name: Some(cfg.name.clone()), type_: None, body })
}

pub fn expand_policy_assignment_artifact(name: &str, props: &PolicyAssignmentPropertiesConfig) -> Artifact {
    Artifact {
        id: None,
        name: Some(name.to_string()),
        type_: None,
        body: ArtifactBody::PolicyAssignment(expand_policy_assignment(props)),
    }
}

fn expand_template(artifact: &str, t: &TemplateArtifactConfig) -> Result<TemplateArtifactProperties, ExpandError> {
    let template = serde_json::from_str(&t.template)
        .map_err(|source| ExpandError::Template { artifact: artifact.to_string(), source })?;
    Ok(TemplateArtifactProperties {
        display_name: Some(t.display_name.clone()),
        description: Some(t.description.clone()),
        depends_on: t.depends_on.clone(),
        template,
        resource_group: t.resource_group.clone(),
        parameters: t.parameters.iter()
            .map(|(k, v)| (k.clone(), ParameterValue { value: Some(Json::String(v.clone())) }))
            .collect(),
    })
}

fn expand_policy_assignment(p: &PolicyAssignmentPropertiesConfig) -> PolicyAssignmentArtifactProperties {
    PolicyAssignmentArtifactProperties {
        display_name: p.display_name.clone(),
        description: p.description.clone(),
        depends_on: p.depends_on.clone(),
        policy_definition_id: p.policy_definition_id.clone(),
        resource_group: p.resource_group.clone(),
        parameters: p.parameters.iter()
            .map(|param| (param.name.clone(), ParameterValue { value: param.value.clone() }))
            .collect(),
    }
}

fn expand_role_assignment(r: &RoleAssignmentArtifactConfig) -> RoleAssignmentArtifactProperties {
    RoleAssignmentArtifactProperties {
        display_name: Some(r.display_name.clone()),
        description: Some(r.description.clone()),
        depends_on: r.depends_on.clone(),
        role_definition_id: r.role_definition_id.clone(),
        principal_ids: Json::Array(r.principal_ids.iter().cloned().map(Json::String).collect()),
        resource_group: r.resource_group.clone(),
    }
}
