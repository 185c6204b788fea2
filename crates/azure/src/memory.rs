//! In-process stand-in for the blueprint service.

use async_trait::async_trait;
use azbp_core::Scope;
use chrono::Utc;
use std::collections::BTreeMap;
use std::sync::Mutex;

use crate::client::{artifact_path, blueprint_path, ApiError, BlueprintApi};
use crate::models::{Artifact, Blueprint, Status, ARTIFACT_TYPE, BLUEPRINT_TYPE};

type BlueprintKey = (String, String);
type ArtifactKey = (String, String, String);

#[derive(Default)]
pub struct MemoryApi {
    blueprints: Mutex<BTreeMap<BlueprintKey, Blueprint>>,
    artifacts: Mutex<BTreeMap<ArtifactKey, Artifact>>,
}

impl MemoryApi {
    pub fn new() -> Self { Self::default() }

    pub fn blueprint_count(&self) -> usize {
        self.blueprints.lock().map(|b| b.len()).unwrap_or_default()
    }

    pub fn artifact_count(&self) -> usize {
        self.artifacts.lock().map(|a| a.len()).unwrap_or_default()
    }
}

fn poisoned<T>(_: T) -> ApiError {
    ApiError::Unavailable("lock poisoned".into())
}

fn bp_key(scope: &Scope, name: &str) -> BlueprintKey {
    (scope.as_str().to_string(), name.to_string())
}

fn art_key(scope: &Scope, blueprint: &str, name: &str) -> ArtifactKey {
    (scope.as_str().to_string(), blueprint.to_string(), name.to_string())
}

#[async_trait]
impl BlueprintApi for MemoryApi {
    async fn get_blueprint(&self, scope: &Scope, name: &str) -> Result<Blueprint, ApiError> {
        self.blueprints.lock().map_err(poisoned)?
            .get(&bp_key(scope, name))
            .cloned()
            .ok_or_else(|| ApiError::NotFound(blueprint_path(scope, name)))
    }

    async fn create_or_update_blueprint(&self, scope: &Scope, name: &str, model: &Blueprint) -> Result<Blueprint, ApiError> {
        let now = Utc::now().to_rfc3339();
        let mut store = self.blueprints.lock().map_err(poisoned)?;
        let key = bp_key(scope, name);
        let created = store.get(&key)
            .and_then(|b| b.properties.status.as_ref())
            .and_then(|s| s.time_created.clone())
            .unwrap_or_else(|| now.clone());

        let mut stored = model.clone();
        stored.id = Some(blueprint_path(scope, name));
        stored.name = Some(name.to_string());
        stored.type_ = Some(BLUEPRINT_TYPE.to_string());
        stored.properties.status = Some(Status { time_created: Some(created), last_modified: Some(now) });
        store.insert(key, stored.clone());
        Ok(stored)
    }

    async fn delete_blueprint(&self, scope: &Scope, name: &str) -> Result<(), ApiError> {
        self.blueprints.lock().map_err(poisoned)?
            .remove(&bp_key(scope, name))
            .ok_or_else(|| ApiError::NotFound(blueprint_path(scope, name)))?;
        self.artifacts.lock().map_err(poisoned)?
            .retain(|(s, bp, _), _| !(s == scope.as_str() && bp == name));
        Ok(())
    }

    async fn get_artifact(&self, scope: &Scope, blueprint: &str, name: &str) -> Result<Artifact, ApiError> {
        self.artifacts.lock().map_err(poisoned)?
            .get(&art_key(scope, blueprint, name))
            .cloned()
            .ok_or_else(|| ApiError::NotFound(artifact_path(scope, blueprint, name)))
    }

    async fn create_or_update_artifact(&self, scope: &Scope, blueprint: &str, name: &str, model: &Artifact) -> Result<Artifact, ApiError> {
        if !self.blueprints.lock().map_err(poisoned)?.contains_key(&bp_key(scope, blueprint)) {
            return Err(ApiError::NotFound(blueprint_path(scope, blueprint)));
        }
        let mut stored = model.clone();
        stored.id = Some(artifact_path(scope, blueprint, name));
        stored.name = Some(name.to_string());
        stored.type_ = Some(ARTIFACT_TYPE.to_string());
        self.artifacts.lock().map_err(poisoned)?
            .insert(art_key(scope, blueprint, name), stored.clone());
        Ok(stored)
    }

    async fn delete_artifact(&self, scope: &Scope, blueprint: &str, name: &str) -> Result<(), ApiError> {
        self.artifacts.lock().map_err(poisoned)?
            .remove(&art_key(scope, blueprint, name))
            .map(|_| ())
            .ok_or_else(|| ApiError::NotFound(artifact_path(scope, blueprint, name)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ArtifactBody, BlueprintProperties, PolicyAssignmentArtifactProperties};

    fn scope() -> Scope { Scope::new("/subscriptions/11111111-1111-1111-1111-111111111111").unwrap() }

    fn policy_artifact() -> Artifact {
        Artifact {
            id: None,
            name: None,
            type_: None,
            body: ArtifactBody::PolicyAssignment(PolicyAssignmentArtifactProperties {
                display_name: None,
                description: None,
                depends_on: vec![],
                policy_definition_id: "/providers/Microsoft.Authorization/policyDefinitions/x".into(),
                resource_group: None,
                parameters: BTreeMap::new(),
            }),
        }
    }

    #[tokio::test]
    async fn update_keeps_creation_time() {
        let api = MemoryApi::new();
        let bp = Blueprint { id: None, name: None, type_: None, properties: BlueprintProperties::default() };
        let first = api.create_or_update_blueprint(&scope(), "bp", &bp).await.unwrap();
        let second = api.create_or_update_blueprint(&scope(), "bp", &bp).await.unwrap();
        let created = |b: &Blueprint| b.properties.status.as_ref().unwrap().time_created.clone();
        assert_eq!(created(&first), created(&second));
        assert_eq!(first.id.as_deref(), Some("/subscriptions/11111111-1111-1111-1111-111111111111/providers/Microsoft.Blueprint/blueprints/bp"));
    }

    #[tokio::test]
    async fn artifacts_need_their_blueprint() {
        let api = MemoryApi::new();
        let err = api.create_or_update_artifact(&scope(), "bp", "a", &policy_artifact()).await.unwrap_err();
        assert!(err.is_not_found());

        let bp = Blueprint { id: None, name: None, type_: None, properties: BlueprintProperties::default() };
        api.create_or_update_blueprint(&scope(), "bp", &bp).await.unwrap();
        api.create_or_update_artifact(&scope(), "bp", "a", &policy_artifact()).await.unwrap();
        assert_eq!(api.artifact_count(), 1);

        api.delete_blueprint(&scope(), "bp").await.unwrap();
        assert_eq!(api.artifact_count(), 0);
        assert!(api.get_blueprint(&scope(), "bp").await.unwrap_err().is_not_found());
    }
}
