use std::sync::Arc;

use azbp_azure::{build_resources, import_blueprint, BlueprintApi, MemoryApi, ResourceConfig};
use azbp_core::{apply_all, destroy_all, plan_all, Op, Scope};

const SUB: &str = "/subscriptions/11111111-1111-1111-1111-111111111111";

fn stack(description: &str) -> Vec<ResourceConfig> {
    let yaml = format!(r#"
- type: azurerm_blueprint_policy_assignment_artifact
  name: deny-skus
  blueprint_name: landing
  properties:
    display_name: Allowed VM SKUs
    policy_definition_id: /providers/Microsoft.Authorization/policyDefinitions/cccc23c7-8427-4f53-ad12-b6a63eb452b3
    parameters:
      - name: listOfAllowedSKUs
        value: "[parameters('skus')]"
- type: azurerm_blueprint
  name: landing
  scope: {SUB}
  properties:
    display_name: Landing zone
    description: {description}
    target_scope: subscription
    parameters:
      - name: skus
        type: array
        display_name: Allowed SKUs
        default_value: U3RhbmRhcmRfQjJtcyxTdGFuZGFyZF9EUzFfdjI=
        allowed_values: [Standard_B2ms, Standard_DS1_v2, Standard_F2s_v2]
      - name: owner
        type: string
        default_value: b3BzQGV4YW1wbGUuY29t
    resource_groups:
      - name: core
        location: West Europe
        display_name: Core services
        tags: {{ env: dev }}
- type: azurerm_blueprint_artifact
  name: storage
  blueprint_name: landing
  kind: template
  template_artifact:
    display_name: Storage account
    description: Diagnostics storage
    resource_group: core
    template: '{{"$schema": "https://schema.management.azure.com/schemas/2015-01-01/deploymentTemplate.json#", "resources": []}}'
    parameters:
      sku: Standard_LRS
"#);
    serde_yaml::from_str(&yaml).unwrap()
}

#[tokio::test]
async fn create_then_converge_then_destroy() {
    let api = Arc::new(MemoryApi::new());
    let resources = build_resources(&stack("first"), api.clone()).unwrap();

    let plan = plan_all(&resources).await.unwrap();
    assert_eq!(plan[0].0 .0, "azurerm_blueprint.landing");
    assert!(plan.iter().all(|(_, op)| matches!(op, Op::Create(_))));

    let applied = apply_all(&resources, &plan).await.unwrap();
    assert_eq!(applied.len(), 3);
    assert_eq!(api.blueprint_count(), 1);
    assert_eq!(api.artifact_count(), 2);

    let again = plan_all(&resources).await.unwrap();
    for (address, op) in &again {
        assert_eq!(*op, Op::Noop, "{address} should have converged");
    }
    let unchanged = apply_all(&resources, &again).await.unwrap();
    assert_eq!(unchanged.len(), 3);
    assert!(unchanged.values().all(|cur| cur.as_ref().is_some_and(|c| c.0.get("id").is_some())));

    let gone = destroy_all(&resources).await.unwrap();
    assert_eq!(gone.len(), 3);
    assert_eq!(gone.last().unwrap().0, "azurerm_blueprint.landing");
    assert_eq!(api.blueprint_count(), 0);
}

#[tokio::test]
async fn changed_description_plans_an_update() {
    let api = Arc::new(MemoryApi::new());
    let first = build_resources(&stack("first"), api.clone()).unwrap();
    let plan = plan_all(&first).await.unwrap();
    apply_all(&first, &plan).await.unwrap();

    let second = build_resources(&stack("second"), api.clone()).unwrap();
    let plan = plan_all(&second).await.unwrap();
    let blueprint_op = &plan.iter().find(|(a, _)| a.0 == "azurerm_blueprint.landing").unwrap().1;
    assert!(matches!(blueprint_op, Op::Update { .. }));
    assert!(plan.iter().filter(|(a, _)| a.0 != "azurerm_blueprint.landing").all(|(_, op)| *op == Op::Noop));
}

#[tokio::test]
async fn import_reads_state_by_id() {
    let api = Arc::new(MemoryApi::new());
    let resources = build_resources(&stack("first"), api.clone()).unwrap();
    let plan = plan_all(&resources).await.unwrap();
    apply_all(&resources, &plan).await.unwrap();

    let scope = Scope::new(SUB).unwrap();
    let id = api.get_blueprint(&scope, "landing").await.unwrap().id.unwrap();
    let state = import_blueprint(&*api, &id).await.unwrap();
    assert_eq!(state.scope, SUB);
    assert_eq!(state.properties.description.as_deref(), Some("first"));
    assert_eq!(state.properties.resource_groups[0].location.as_deref(), Some("westeurope"));
    assert!(state.properties.status.is_some());
}

#[tokio::test]
async fn artifact_outside_stack_needs_a_scope() {
    let yaml = r#"
- type: azurerm_blueprint_policy_assignment_artifact
  name: orphan
  blueprint_name: elsewhere
  properties:
    policy_definition_id: /providers/Microsoft.Authorization/policyDefinitions/x
"#;
    let configs: Vec<ResourceConfig> = serde_yaml::from_str(yaml).unwrap();
    let err = build_resources(&configs, Arc::new(MemoryApi::new())).err().unwrap();
    assert!(err.to_string().contains("no scope given"));
}

#[tokio::test]
async fn deleted_remotely_plans_a_create() {
    let api = Arc::new(MemoryApi::new());
    let resources = build_resources(&stack("first"), api.clone()).unwrap();
    let plan = plan_all(&resources).await.unwrap();
    apply_all(&resources, &plan).await.unwrap();

    let scope = Scope::new(SUB).unwrap();
    api.delete_artifact(&scope, "landing", "storage").await.unwrap();
    let plan = plan_all(&resources).await.unwrap();
    let op = &plan.iter().find(|(a, _)| a.0 == "azurerm_blueprint_artifact.storage").unwrap().1;
    assert!(matches!(op, Op::Create(_)));
}
