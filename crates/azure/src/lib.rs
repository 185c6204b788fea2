use serde::{Serialize, Deserialize};
use serde_json::{json, Value as Json, Map as JsonMap};

pub mod client;
pub mod config;
pub mod expand;
pub mod flatten;
pub mod memory;
pub mod models;
pub mod resources;

pub use client::{ApiError, ArmClient, BlueprintApi};
pub use config::ResourceConfig;
pub use memory::MemoryApi;
pub use resources::{build_resources, import_blueprint, BlueprintIdentity};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AzureProvider {
    #[serde(default)] pub features: JsonMap<String, Json>,
    pub subscription_id: Option<String>,
    /// Resource Manager endpoint; public cloud when unset.
    #[serde(default)] pub endpoint: Option<String>,
    #[serde(default)] pub api_version: Option<String>,
}

impl AzureProvider {
    pub fn to_tf_json(&self) -> Json {
        let mut provider = json!({ "features": self.features });
        if let Some(sid) = &self.subscription_id { provider["subscription_id"] = json!(sid); }
        json!({ "provider": { "azurerm": provider } })
    }
}

impl ResourceConfig {
    /// Terraform JSON (`resource.<type>.<name>`) for this resource.
    pub fn to_tf_json(&self) -> serde_json::Result<Json> {
        let mut props = match serde_json::to_value(self)? {
            Json::Object(map) => map,
            _ => JsonMap::new(),
        };
        props.remove("type");
        // the provider schema calls the blueprint's ARM type `type`
        if let Some(t) = props.remove("blueprint_type") {
            props.insert("type".to_string(), t);
        }
        strip_nulls(&mut props);
        Ok(json!({
            "resource": {
                self.type_name(): {
                    self.name(): props
                }
            }
        }))
    }
}

fn strip_nulls(map: &mut JsonMap<String, Json>) {
    map.retain(|_, v| !v.is_null());
    for v in map.values_mut() {
        match v {
            Json::Object(m) => strip_nulls(m),
            Json::Array(items) => items.iter_mut().for_each(|i| {
                if let Json::Object(m) = i { strip_nulls(m) }
            }),
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_block() {
        let p = AzureProvider { subscription_id: Some("sub".into()), ..Default::default() };
        assert_eq!(p.to_tf_json(), json!({ "provider": { "azurerm": { "features": {}, "subscription_id": "sub" } } }));
    }

    #[test]
    fn blueprint_exports_as_terraform_json() {
        let cfg: ResourceConfig = serde_yaml::from_str(r#"
type: azurerm_blueprint
name: landing
scope: /subscriptions/11111111-1111-1111-1111-111111111111
properties:
  display_name: Landing zone
  target_scope: subscription
"#).unwrap();
        let tf = cfg.to_tf_json().unwrap();
        let block = &tf["resource"]["azurerm_blueprint"]["landing"];
        assert_eq!(block["type"], "Microsoft.Blueprint/blueprints");
        assert_eq!(block["scope"], "/subscriptions/11111111-1111-1111-1111-111111111111");
        assert_eq!(block["properties"]["target_scope"], "subscription");
        assert!(block["properties"].get("description").is_none());
    }
}
