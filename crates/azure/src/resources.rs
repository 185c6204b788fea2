//! Lifecycle wiring: each configured resource becomes an `azbp_core::Resource`
//! holding its validated scope and a handle to the API client.

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use azbp_core::{Address, Current, Desired, Op, Resource, Scope};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::debug;

use crate::client::{ApiError, BlueprintApi};
use crate::config::{ArtifactConfig, BlueprintConfig, PolicyAssignmentArtifactConfig, ResourceConfig, BLUEPRINT};
use crate::expand::{expand_artifact, expand_blueprint, expand_policy_assignment_artifact};
use crate::flatten::{flatten_artifact, flatten_blueprint, flatten_policy_assignment, BlueprintState, PolicyAssignmentArtifactState};
use crate::models::{Artifact, ArtifactBody, ArtifactKind};

/// `(scope, name)` of a blueprint, recovered from its resource id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlueprintIdentity {
    pub scope: Scope,
    pub name: String,
}

impl BlueprintIdentity {
    pub fn from_resource_id(id: &str) -> Result<Self> {
        let scope = Scope::from_resource_id(id)
            .ok_or_else(|| anyhow!("{id:?} is not anchored at a subscription or management group"))?;
        let rest = id.strip_prefix(scope.as_str()).unwrap_or_default();
        let segments: Vec<&str> = rest.trim_matches('/').split('/').collect();
        match segments.as_slice() {
            ["providers", ns, "blueprints", name, ..]
                if ns.eq_ignore_ascii_case("Microsoft.Blueprint") && !name.is_empty() =>
            {
                Ok(Self { scope, name: name.to_string() })
            }
            _ => bail!("{id:?} is not a blueprint resource id"),
        }
    }
}

fn not_found_is_none<T>(res: Result<T, ApiError>) -> Result<Option<T>, ApiError> {
    match res {
        Ok(v) => Ok(Some(v)),
        Err(e) if e.is_not_found() => Ok(None),
        Err(e) => Err(e),
    }
}

pub struct BlueprintResource {
    address: Address,
    scope: Scope,
    config: BlueprintConfig,
    api: Arc<dyn BlueprintApi>,
}

impl BlueprintResource {
    pub fn new(config: BlueprintConfig, api: Arc<dyn BlueprintApi>) -> Result<Self> {
        let scope = Scope::new(config.scope.as_str())
            .with_context(|| format!("blueprint {:?}", config.name))?;
        Ok(Self { address: Address::new(BLUEPRINT, &config.name), scope, config, api })
    }

    fn state(&self, bp: &crate::models::Blueprint) -> Result<Current> {
        let state = flatten_blueprint(self.scope.as_str(), &self.config.name, bp);
        Ok(Current(serde_json::to_value(state)?))
    }
}

#[async_trait]
impl Resource for BlueprintResource {
    fn address(&self) -> &Address { &self.address }

    fn desired(&self) -> Result<Desired> {
        let model = expand_blueprint(&self.config)?;
        let state = flatten_blueprint(self.scope.as_str(), &self.config.name, &model);
        Ok(Desired(serde_json::to_value(state)?))
    }

    async fn read(&self) -> Result<Option<Current>> {
        let name = &self.config.name;
        let resp = not_found_is_none(self.api.get_blueprint(&self.scope, name).await)
            .with_context(|| format!("reading blueprint {name:?} in scope {:?}", self.scope.as_str()))?;
        match resp {
            Some(bp) => Ok(Some(self.state(&bp)?)),
            None => {
                debug!(blueprint = %name, scope = %self.scope, "blueprint was not found");
                Ok(None)
            }
        }
    }

    async fn apply(&self, op: Op) -> Result<Option<Current>> {
        let name = &self.config.name;
        match op {
            Op::Create(_) | Op::Update { .. } => {
                let model = expand_blueprint(&self.config)?;
                let read = self.api.create_or_update_blueprint(&self.scope, name, &model).await
                    .with_context(|| format!("creating or updating blueprint {name:?}"))?;
                Ok(Some(self.state(&read)?))
            }
            Op::Delete(_) => {
                not_found_is_none(self.api.delete_blueprint(&self.scope, name).await)
                    .with_context(|| format!("deleting blueprint {name:?} in scope {:?}", self.scope.as_str()))?;
                Ok(None)
            }
            Op::Noop => self.read().await,
        }
    }
}

enum ArtifactShape {
    Generic(ArtifactConfig),
    PolicyAssignment(PolicyAssignmentArtifactConfig),
}

/// Both artifact resource types; they differ only in how the artifact body is
/// configured and shaped in state.
pub struct ArtifactResource {
    address: Address,
    scope: Scope,
    blueprint: String,
    name: String,
    deps: BTreeSet<Address>,
    shape: ArtifactShape,
    api: Arc<dyn BlueprintApi>,
}

impl ArtifactResource {
    fn expected_kind(&self) -> ArtifactKind {
        match &self.shape {
            ArtifactShape::Generic(c) => c.kind,
            ArtifactShape::PolicyAssignment(_) => ArtifactKind::PolicyAssignment,
        }
    }

    fn expand(&self) -> Result<Artifact> {
        Ok(match &self.shape {
            ArtifactShape::Generic(c) => expand_artifact(c)?,
            ArtifactShape::PolicyAssignment(c) => expand_policy_assignment_artifact(&c.name, &c.properties),
        })
    }

    fn state(&self, id: Option<String>, body: &ArtifactBody) -> Result<serde_json::Value> {
        let scope = self.scope.as_str();
        Ok(match (&self.shape, body) {
            (ArtifactShape::PolicyAssignment(_), ArtifactBody::PolicyAssignment(p)) => {
                serde_json::to_value(PolicyAssignmentArtifactState {
                    id,
                    name: self.name.clone(),
                    scope: scope.to_string(),
                    blueprint_name: self.blueprint.clone(),
                    properties: flatten_policy_assignment(p),
                })?
            }
            (ArtifactShape::PolicyAssignment(_), other) => {
                bail!("artifact kind expected to be policyAssignment, got {}", other.kind())
            }
            (ArtifactShape::Generic(_), body) => {
                serde_json::to_value(flatten_artifact(scope, &self.blueprint, &self.name, id, body))?
            }
        })
    }
}

#[async_trait]
impl Resource for ArtifactResource {
    fn address(&self) -> &Address { &self.address }
    fn deps(&self) -> BTreeSet<Address> { self.deps.clone() }

    fn desired(&self) -> Result<Desired> {
        let model = self.expand()?;
        Ok(Desired(self.state(None, &model.body)?))
    }

    async fn read(&self) -> Result<Option<Current>> {
        let resp = not_found_is_none(self.api.get_artifact(&self.scope, &self.blueprint, &self.name).await)
            .with_context(|| format!(
                "reading artifact {:?} from blueprint {:?} in scope {:?}",
                self.name, self.blueprint, self.scope.as_str()
            ))?;
        let Some(artifact) = resp else {
            debug!(artifact = %self.name, blueprint = %self.blueprint, scope = %self.scope, "artifact was not found");
            return Ok(None);
        };
        let expected = self.expected_kind();
        if artifact.body.kind() != expected {
            bail!("artifact {:?}: kind expected to be {expected}, got {}", self.name, artifact.body.kind());
        }
        Ok(Some(Current(self.state(artifact.id.clone(), &artifact.body)?)))
    }

    async fn apply(&self, op: Op) -> Result<Option<Current>> {
        match op {
            Op::Create(_) | Op::Update { .. } => {
                let model = self.expand()?;
                let read = self.api
                    .create_or_update_artifact(&self.scope, &self.blueprint, &self.name, &model).await
                    .with_context(|| format!("creating or updating blueprint artifact {:?}", self.name))?;
                Ok(Some(Current(self.state(read.id.clone(), &read.body)?)))
            }
            Op::Delete(_) => {
                not_found_is_none(self.api.delete_artifact(&self.scope, &self.blueprint, &self.name).await)
                    .with_context(|| format!(
                        "deleting artifact {:?} from blueprint {:?} in scope {:?}",
                        self.name, self.blueprint, self.scope.as_str()
                    ))?;
                Ok(None)
            }
            Op::Noop => self.read().await,
        }
    }
}

/// Builds lifecycle resources for a whole stack. Artifacts without an explicit
/// scope take the scope of the stack blueprint they belong to, and depend on it.
pub fn build_resources(configs: &[ResourceConfig], api: Arc<dyn BlueprintApi>) -> Result<Vec<Box<dyn Resource>>> {
    let blueprints: BTreeMap<&str, (&str, Address)> = configs.iter()
        .filter_map(|c| match c {
            ResourceConfig::Blueprint(b) => Some((b.name.as_str(), (b.scope.as_str(), c.address()))),
            _ => None,
        })
        .collect();

    let artifact = |address: Address, scope: &Option<String>, blueprint: &str, name: &str, shape: ArtifactShape| -> Result<Box<dyn Resource>> {
        let owner = blueprints.get(blueprint);
        let scope = match (scope, owner) {
            (Some(s), _) => s.as_str(),
            (None, Some((s, _))) => *s,
            (None, None) => bail!("{address}: no scope given and blueprint {blueprint:?} is not part of this stack"),
        };
        let scope = Scope::new(scope).with_context(|| address.to_string())?;
        let deps = owner.map(|(_, a)| a.clone()).into_iter().collect();
        Ok(Box::new(ArtifactResource {
            address,
            scope,
            blueprint: blueprint.to_string(),
            name: name.to_string(),
            deps,
            shape,
            api: api.clone(),
        }))
    };

    configs.iter()
        .map(|c| -> Result<Box<dyn Resource>> {
            match c {
                ResourceConfig::Blueprint(b) => Ok(Box::new(BlueprintResource::new(b.clone(), api.clone())?)),
                ResourceConfig::Artifact(a) => artifact(
                    c.address(), &a.scope, &a.blueprint_name, &a.name, ArtifactShape::Generic(a.clone()),
                ),
                ResourceConfig::PolicyAssignmentArtifact(p) => artifact(
                    c.address(), &p.scope, &p.blueprint_name, &p.name, ArtifactShape::PolicyAssignment(p.clone()),
                ),
            }
        })
        .collect()
}

/// Reads a blueprint by resource id and returns its flattened state.
pub async fn import_blueprint(api: &dyn BlueprintApi, id: &str) -> Result<BlueprintState> {
    let ident = BlueprintIdentity::from_resource_id(id)?;
    let bp = api.get_blueprint(&ident.scope, &ident.name).await
        .with_context(|| format!("reading blueprint {:?} in scope {:?}", ident.name, ident.scope.as_str()))?;
    Ok(flatten_blueprint(ident.scope.as_str(), &ident.name, &bp))
}
