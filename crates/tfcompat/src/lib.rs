use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;
use std::collections::BTreeMap;
use std::path::Path;

pub const STATE_FILE: &str = "azbp.tfstate.json";
pub const STATE_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateFile {
    pub version: u32,
    #[serde(default)]
    pub resources: BTreeMap<String, ResourceState>,
}

impl Default for StateFile {
    fn default() -> Self { Self { version: STATE_VERSION, resources: BTreeMap::new() } }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceState {
    #[serde(rename = "type")]
    pub type_name: String,
    pub id: Option<String>,
    pub attributes: Json,
}

impl StateFile {
    /// Records `attributes` for `address`, or forgets it when `None`.
    pub fn record(&mut self, address: &str, attributes: Option<Json>) {
        match attributes {
            Some(attributes) => {
                let type_name = address.split('.').next().unwrap_or_default().to_string();
                let id = attributes.get("id").and_then(Json::as_str).map(str::to_string);
                self.resources.insert(address.to_string(), ResourceState { type_name, id, attributes });
            }
            None => { self.resources.remove(address); }
        }
    }

    /// Drops every listed address, whether or not it was recorded.
    pub fn forget<'a>(&mut self, addresses: impl IntoIterator<Item = &'a str>) {
        for address in addresses {
            self.resources.remove(address);
        }
    }
}

pub fn read_state(dir: &Path) -> Result<StateFile> {
    let path = dir.join(STATE_FILE);
    if !path.exists() { return Ok(StateFile::default()); }
    let bytes = std::fs::read(&path).with_context(|| format!("read {}", path.display()))?;
    let state: StateFile = serde_json::from_slice(&bytes)
        .with_context(|| format!("parse {}", path.display()))?;
    if state.version != STATE_VERSION {
        anyhow::bail!("{} has state version {}, expected {}", path.display(), state.version, STATE_VERSION);
    }
    Ok(state)
}

pub fn write_state(state: &StateFile, dir: &Path) -> Result<()> {
    std::fs::create_dir_all(dir)?;
    std::fs::write(dir.join(STATE_FILE), serde_json::to_string_pretty(state)?)?;
    Ok(())
}

pub fn write_tf_json(tf: &Json, out: &Path) -> Result<()> {
    std::fs::create_dir_all(out)?;
    std::fs::write(out.join("main.tf.json"), serde_json::to_string_pretty(tf)?)?;
    Ok(())
}

/// Deep merge; objects merge key by key, anything else in `b` wins.
pub fn merge(a: Json, b: Json) -> Json {
    match (a, b) {
        (Json::Object(mut ma), Json::Object(mb)) => {
            for (k, v) in mb {
                let existing = ma.remove(&k).unwrap_or(Json::Null);
                ma.insert(k, merge(existing, v));
            }
            Json::Object(ma)
        }
        (_, v) => v,
    }
}
