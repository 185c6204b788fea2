use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ResourceIdError {
    #[error("resource id {0:?} is not an absolute path")]
    NotAbsolute(String),
    #[error("the number of path segments is not divisible by 2 in {0:?}")]
    OddSegments(String),
    #[error("key/value cannot be empty strings; key: {key:?}, value: {value:?}")]
    EmptySegment { key: String, value: String },
    #[error("no subscription id found in {0:?}")]
    MissingSubscription(String),
}

/// Structured view of an ARM resource id such as
/// `/subscriptions/{id}/resourceGroups/{rg}/providers/{ns}/{type}/{name}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceId {
    pub subscription_id: String,
    pub resource_group: Option<String>,
    pub provider: Option<String>,
    pub path: BTreeMap<String, String>,
}

impl ResourceId {
    pub fn parse(id: &str) -> Result<Self, ResourceIdError> {
        let path = id
            .strip_prefix('/')
            .ok_or_else(|| ResourceIdError::NotAbsolute(id.to_string()))?;
        let path = path.strip_suffix('/').unwrap_or(path);
        let components: Vec<&str> = path.split('/').collect();
        if components.len() % 2 != 0 {
            return Err(ResourceIdError::OddSegments(path.to_string()));
        }

        let mut subscription_id = None;
        let mut map = BTreeMap::new();
        for pair in components.chunks(2) {
            let (key, value) = (pair[0], pair[1]);
            if key.is_empty() || value.is_empty() {
                return Err(ResourceIdError::EmptySegment {
                    key: key.to_string(),
                    value: value.to_string(),
                });
            }
            // Only the first `subscriptions` key names the subscription; nested ones
            // (e.g. Service Bus topic subscriptions) belong to the path.
            if key == "subscriptions" && subscription_id.is_none() {
                subscription_id = Some(value.to_string());
            } else {
                map.insert(key.to_string(), value.to_string());
            }
        }

        let subscription_id =
            subscription_id.ok_or_else(|| ResourceIdError::MissingSubscription(path.to_string()))?;
        let resource_group = map
            .remove("resourceGroups")
            .or_else(|| map.remove("resourcegroups"));
        let provider = map.remove("providers");

        Ok(Self { subscription_id, resource_group, provider, path: map })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_resource_group_scoped_id() {
        let id = ResourceId::parse(
            "/subscriptions/11111111-1111-1111-1111-111111111111/resourceGroups/rg1/providers/Microsoft.Storage/storageAccounts/acct",
        )
        .unwrap();
        assert_eq!(id.subscription_id, "11111111-1111-1111-1111-111111111111");
        assert_eq!(id.resource_group.as_deref(), Some("rg1"));
        assert_eq!(id.provider.as_deref(), Some("Microsoft.Storage"));
        assert_eq!(id.path.get("storageAccounts").map(String::as_str), Some("acct"));
    }

    #[test]
    fn accepts_bare_subscription_with_trailing_slash() {
        let id = ResourceId::parse("/subscriptions/abc/").unwrap();
        assert_eq!(id.subscription_id, "abc");
        assert!(id.resource_group.is_none());
    }

    #[test]
    fn lowercase_resource_groups_key() {
        let id = ResourceId::parse("/subscriptions/abc/resourcegroups/rg").unwrap();
        assert_eq!(id.resource_group.as_deref(), Some("rg"));
    }

    #[test]
    fn nested_subscriptions_key_stays_in_path() {
        let id = ResourceId::parse(
            "/subscriptions/abc/resourceGroups/rg/providers/Microsoft.ServiceBus/namespaces/ns/topics/t/subscriptions/sub1",
        )
        .unwrap();
        assert_eq!(id.subscription_id, "abc");
        assert_eq!(id.path.get("subscriptions").map(String::as_str), Some("sub1"));
    }

    #[test]
    fn rejects_malformed_ids() {
        assert!(matches!(
            ResourceId::parse("subscriptions/abc"),
            Err(ResourceIdError::NotAbsolute(_))
        ));
        assert!(matches!(
            ResourceId::parse("/subscriptions/abc/resourceGroups"),
            Err(ResourceIdError::OddSegments(_))
        ));
        assert!(matches!(
            ResourceId::parse("/subscriptions//resourceGroups/rg"),
            Err(ResourceIdError::EmptySegment { .. })
        ));
        assert!(matches!(
            ResourceId::parse("/subscription/abc"),
            Err(ResourceIdError::MissingSubscription(_))
        ));
    }
}
