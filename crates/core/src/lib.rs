use async_trait::async_trait;
use serde::{Serialize, Deserialize};
use serde_json::Value as Json;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use thiserror::Error;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::algo::toposort;
use tracing::{debug, info};

pub mod resource_id;
pub mod scope;

pub use resource_id::{ResourceId, ResourceIdError};
pub use scope::{parse_scope, InvalidScope, Scope, ScopeError, ScopeErrorKind, ScopeKind};

/// `<type>.<name>`, e.g. `azurerm_blueprint.landing_zone`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Address(pub String);

impl Address {
    pub fn new(type_name: &str, name: &str) -> Self { Self(format!("{type_name}.{name}")) }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(&self.0) }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Desired(pub Json);
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Current(pub Json);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Op { Create(Desired), Update{from: Current, to: Desired}, Delete(Current), Noop }

impl Op {
    pub fn verb(&self) -> &'static str {
        match self {
            Op::Create(_) => "create",
            Op::Update { .. } => "update",
            Op::Delete(_) => "delete",
            Op::Noop => "no-op",
        }
    }
}

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("dependency cycle detected")]
    Cycle,
    #[error("{from} depends on unknown resource {to}")]
    UnknownDependency { from: Address, to: Address },
    #[error("duplicate resource address {0}")]
    Duplicate(Address),
    #[error("plan references unknown resource {0}")]
    NotInPlan(Address),
}

#[async_trait]
pub trait Resource: Send + Sync {
    fn address(&self) -> &Address;
    fn deps(&self) -> BTreeSet<Address> { BTreeSet::new() }
    /// State the configuration asks for, in the same shape `read` produces.
    fn desired(&self) -> anyhow::Result<Desired>;
    async fn read(&self) -> anyhow::Result<Option<Current>>;
    async fn plan(&self, cur: Option<Current>) -> anyhow::Result<Op> {
        Ok(diff(self.desired()?, cur))
    }
    /// Returns the state after the operation; `None` once deleted.
    async fn apply(&self, op: Op) -> anyhow::Result<Option<Current>>;
}

/// `Noop` when every field set in `desired` already holds in `current`.
/// Fields only present in `current` (computed by the service) are ignored.
pub fn diff(desired: Desired, current: Option<Current>) -> Op {
    match current {
        None => Op::Create(desired),
        Some(cur) if is_subset(&desired.0, &cur.0) => Op::Noop,
        Some(cur) => Op::Update { from: cur, to: desired },
    }
}

fn is_subset(want: &Json, have: &Json) -> bool {
    match (want, have) {
        (Json::Object(w), Json::Object(h)) => w.iter().all(|(k, v)| match h.get(k) {
            Some(hv) => is_subset(v, hv),
            None => v.is_null(),
        }),
        (Json::Array(w), Json::Array(h)) => {
            w.len() == h.len() && w.iter().zip(h).all(|(a, b)| is_subset(a, b))
        }
        (w, h) => w == h,
    }
}

fn ordered(resources: &[Box<dyn Resource>]) -> Result<Vec<usize>, EngineError> {
    let mut g: DiGraph<usize, ()> = DiGraph::new();
    let mut id_to_ix: HashMap<&Address, NodeIndex> = HashMap::new();
    for (i, r) in resources.iter().enumerate() {
        let ix = g.add_node(i);
        if id_to_ix.insert(r.address(), ix).is_some() {
            return Err(EngineError::Duplicate(r.address().clone()));
        }
    }
    for r in resources {
        let to_ix = id_to_ix[r.address()];
        for d in r.deps() {
            let from_ix = *id_to_ix.get(&d).ok_or_else(|| EngineError::UnknownDependency {
                from: r.address().clone(),
                to: d.clone(),
            })?;
            g.add_edge(from_ix, to_ix, ());
        }
    }
    let ordered_ix = toposort(&g, None).map_err(|_| EngineError::Cycle)?;
    Ok(ordered_ix.into_iter().map(|ix| g[ix]).collect())
}

pub async fn plan_all(resources: &[Box<dyn Resource>]) -> anyhow::Result<Vec<(Address, Op)>> {
    let mut out = Vec::new();
    for i in ordered(resources)? {
        let r = &resources[i];
        let cur = r.read().await?;
        let op = r.plan(cur).await?;
        debug!(address = %r.address(), op = op.verb(), "planned");
        out.push((r.address().clone(), op));
    }
    Ok(out)
}

/// Applies `plan` in order. Every planned address gets an entry, unchanged
/// ones included, so callers can rebuild their state from the result alone.
pub async fn apply_all(
    resources: &[Box<dyn Resource>],
    plan: &[(Address, Op)],
) -> anyhow::Result<BTreeMap<Address, Option<Current>>> {
    let mut out = BTreeMap::new();
    for (id, op) in plan {
        let r = resources.iter().find(|x| x.address() == id)
            .ok_or_else(|| EngineError::NotInPlan(id.clone()))?;
        let state = if *op == Op::Noop {
            r.read().await?
        } else {
            info!(address = %id, op = op.verb(), "applying");
            r.apply(op.clone()).await?
        };
        out.insert(id.clone(), state);
    }
    Ok(out)
}

/// Deletes whatever still exists, dependents first.
pub async fn destroy_all(resources: &[Box<dyn Resource>]) -> anyhow::Result<Vec<Address>> {
    let mut gone = Vec::new();
    for i in ordered(resources)?.into_iter().rev() {
        let r = &resources[i];
        match r.read().await? {
            Some(cur) => {
                info!(address = %r.address(), "destroying");
                r.apply(Op::Delete(cur)).await?;
                gone.push(r.address().clone());
            }
            None => debug!(address = %r.address(), "already absent"),
        }
    }
    Ok(gone)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::{Arc, Mutex};

    struct Fake {
        address: Address,
        deps: BTreeSet<Address>,
        want: Json,
        remote: Arc<Mutex<BTreeMap<Address, Json>>>,
    }

    #[async_trait]
    impl Resource for Fake {
        fn address(&self) -> &Address { &self.address }
        fn deps(&self) -> BTreeSet<Address> { self.deps.clone() }
        fn desired(&self) -> anyhow::Result<Desired> { Ok(Desired(self.want.clone())) }
        async fn read(&self) -> anyhow::Result<Option<Current>> {
            Ok(self.remote.lock().unwrap().get(&self.address).cloned().map(Current))
        }
        async fn apply(&self, op: Op) -> anyhow::Result<Option<Current>> {
            let mut remote = self.remote.lock().unwrap();
            match op {
                Op::Create(d) | Op::Update { to: d, .. } => {
                    let mut v = d.0;
                    v["id"] = json!(format!("/fake/{}", self.address));
                    remote.insert(self.address.clone(), v.clone());
                    Ok(Some(Current(v)))
                }
                Op::Delete(_) => { remote.remove(&self.address); Ok(None) }
                Op::Noop => Ok(remote.get(&self.address).cloned().map(Current)),
            }
        }
    }

    fn fake(remote: &Arc<Mutex<BTreeMap<Address, Json>>>, name: &str, deps: &[&str], want: Json) -> Box<dyn Resource> {
        Box::new(Fake {
            address: Address(name.to_string()),
            deps: deps.iter().map(|d| Address(d.to_string())).collect(),
            want,
            remote: remote.clone(),
        })
    }

    #[test]
    fn diff_ignores_computed_fields() {
        let want = Desired(json!({"name": "a", "tags": {"x": "1"}}));
        let have = Current(json!({"name": "a", "id": "/x", "tags": {"x": "1"}}));
        assert_eq!(diff(want.clone(), Some(have)), Op::Noop);
        assert_eq!(diff(want.clone(), None), Op::Create(want));
    }

    #[test]
    fn diff_detects_changes() {
        let want = Desired(json!({"name": "a", "list": [1, 2]}));
        let have = Current(json!({"name": "a", "list": [1]}));
        assert!(matches!(diff(want, Some(have)), Op::Update { .. }));

        let want = Desired(json!({"description": null}));
        assert_eq!(diff(want.clone(), Some(Current(json!({})))), Op::Noop);
        assert!(matches!(diff(want, Some(Current(json!({"description": "x"})))), Op::Update { .. }));
    }

    #[tokio::test]
    async fn plan_orders_dependencies_first() {
        let remote = Arc::new(Mutex::new(BTreeMap::new()));
        let resources = vec![
            fake(&remote, "artifact.a", &["blueprint.b"], json!({"n": 1})),
            fake(&remote, "blueprint.b", &[], json!({"n": 2})),
        ];
        let plan = plan_all(&resources).await.unwrap();
        let order: Vec<_> = plan.iter().map(|(a, _)| a.0.as_str()).collect();
        assert_eq!(order, ["blueprint.b", "artifact.a"]);
        assert!(plan.iter().all(|(_, op)| matches!(op, Op::Create(_))));

        let applied = apply_all(&resources, &plan).await.unwrap();
        assert_eq!(applied.len(), 2);
        let again = plan_all(&resources).await.unwrap();
        assert!(again.iter().all(|(_, op)| *op == Op::Noop));
    }

    #[tokio::test]
    async fn apply_reports_unchanged_resources() {
        let remote = Arc::new(Mutex::new(BTreeMap::new()));
        let resources = vec![
            fake(&remote, "blueprint.b", &[], json!({"n": 1})),
            fake(&remote, "artifact.a", &["blueprint.b"], json!({"n": 2})),
        ];
        let plan = plan_all(&resources).await.unwrap();
        apply_all(&resources, &plan).await.unwrap();

        let converged = plan_all(&resources).await.unwrap();
        let applied = apply_all(&resources, &converged).await.unwrap();
        assert_eq!(applied.len(), 2);
        let b = applied[&Address("blueprint.b".into())].as_ref().unwrap();
        assert_eq!(b.0["id"], "/fake/blueprint.b");
    }

    #[tokio::test]
    async fn destroy_runs_in_reverse_order() {
        let remote = Arc::new(Mutex::new(BTreeMap::new()));
        let resources = vec![
            fake(&remote, "blueprint.b", &[], json!({})),
            fake(&remote, "artifact.a", &["blueprint.b"], json!({})),
        ];
        let plan = plan_all(&resources).await.unwrap();
        apply_all(&resources, &plan).await.unwrap();
        let gone = destroy_all(&resources).await.unwrap();
        assert_eq!(gone, vec![Address("artifact.a".into()), Address("blueprint.b".into())]);
        assert!(remote.lock().unwrap().is_empty());
        assert!(destroy_all(&resources).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn cycles_and_unknown_dependencies_fail() {
        let remote = Arc::new(Mutex::new(BTreeMap::new()));
        let cyclic = vec![
            fake(&remote, "a", &["b"], json!({})),
            fake(&remote, "b", &["a"], json!({})),
        ];
        let err = plan_all(&cyclic).await.unwrap_err();
        assert!(matches!(err.downcast_ref::<EngineError>(), Some(EngineError::Cycle)));

        let dangling = vec![fake(&remote, "a", &["missing"], json!({}))];
        let err = plan_all(&dangling).await.unwrap_err();
        assert!(matches!(err.downcast_ref::<EngineError>(), Some(EngineError::UnknownDependency { .. })));
    }
}
