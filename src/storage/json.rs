//! JSON-file-backed storage.
//!
//! Persists the graph as a flat JSON array of `[key, value]` entries:
//!
//! ```json
//! [
//!   ["ALIASES", {"employee-1": "SOUL-..."}],
//!   ["SOUL-...", {"cdate": 1700000000000, "mdate": 1700000000000}],
//!   ["SOUL-...-DATA", {"name": "John Smith"}],
//!   ["SOUL-...-ALIASES", ["employee-1"]],
//!   ["SOUL-...-SOUTH", ["SOUL-..."]],
//!   ["SOUL-...-KEYS", [["supervisor", ["SOUL-...", "NORTH"]]]]
//! ]
//! ```
//!
//! Loading is forgiving: the top level may be a pairs array or an object
//! map, and collection values may arrive as arrays or objects, so minor
//! format revisions stay readable. Writing streams one entry at a time
//! through a buffered writer instead of building a single giant document.
//!
//! The graph itself lives in an embedded [`MemoryStore`]; this type only
//! adds the load/persist lifecycle.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;

use crate::model::{DataMap, Direction, MetaMap, SoulId, Value};
use crate::{Error, Result};
use super::graph::GraphState;
use super::memory::MemoryStore;
use super::{BindSpec, BindingScope, StoragePort, UnbindSpec};

const ALIAS_CATALOG_KEY: &str = "ALIASES";

/// JSON-file-backed soul graph storage. Loads on `initialize`, writes the
/// file back on `close(true)`, discards on `close(false)`.
pub struct JsonStore {
    path: PathBuf,
    mem: MemoryStore,
    loaded: AtomicBool,
}

impl JsonStore {
    pub fn new(path: impl Into<PathBuf>) -> JsonStore {
        JsonStore {
            path: path.into(),
            mem: MemoryStore::new(),
            loaded: AtomicBool::new(false),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist_error(&self, message: impl Into<String>) -> Error {
        Error::Persist { path: self.path.clone(), message: message.into() }
    }

    async fn load(&self) -> Result<GraphState> {
        match tokio::fs::metadata(&self.path).await {
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                // first run: leave an empty db file behind
                tokio::fs::write(&self.path, b"[]")
                    .await
                    .map_err(|e| self.persist_error(format!("cannot create db file: {e}")))?;
                return Ok(GraphState::default());
            }
            Err(err) => return Err(self.persist_error(format!("cannot stat db file: {err}"))),
            Ok(_) => {}
        }

        let raw = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|e| self.persist_error(format!("cannot read db file: {e}")))?;
        let raw = raw.trim_start_matches('\u{feff}');
        if raw.trim().is_empty() {
            return Ok(GraphState::default());
        }

        let persisted: Persisted = serde_json::from_str(raw)
            .map_err(|e| self.persist_error(format!("malformed db file: {e}")))?;
        let entries = match persisted {
            Persisted::Entries(pairs) => pairs,
            Persisted::Map(map) => map.into_iter().collect(),
        };
        restore(entries).map_err(|message| self.persist_error(message))
    }

    async fn save(&self) -> Result<()> {
        let entries = {
            let state = self.mem.state().read();
            snapshot(&state)
        };

        let io = |e: std::io::Error| self.persist_error(format!("cannot write db file: {e}"));
        let file = tokio::fs::File::create(&self.path).await.map_err(io)?;
        let mut out = tokio::io::BufWriter::new(file);

        out.write_all(b"[").await.map_err(io)?;
        for (i, entry) in entries.iter().enumerate() {
            if i > 0 {
                out.write_all(b",").await.map_err(io)?;
            }
            out.write_all(b"\n").await.map_err(io)?;
            let bytes = serde_json::to_vec(entry)
                .map_err(|e| self.persist_error(format!("cannot encode entry: {e}")))?;
            out.write_all(&bytes).await.map_err(io)?;
        }
        out.write_all(b"\n]\n").await.map_err(io)?;
        out.flush().await.map_err(io)?;

        tracing::debug!(path = %self.path.display(), entries = entries.len(), "graph persisted");
        Ok(())
    }
}

#[async_trait]
impl StoragePort for JsonStore {
    async fn initialize(&self) -> Result<()> {
        let state = self.load().await?;
        *self.mem.state().write() = state;
        self.loaded.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn close(&self, persist: bool) -> Result<()> {
        if persist && self.loaded.load(Ordering::SeqCst) {
            self.save().await?;
        }
        self.loaded.store(false, Ordering::SeqCst);
        *self.mem.state().write() = GraphState::default();
        Ok(())
    }

    async fn alias_exists(&self, alias: &str) -> Result<bool> {
        self.mem.alias_exists(alias).await
    }

    async fn set_alias(&self, alias: &str, soul: &SoulId) -> Result<()> {
        self.mem.set_alias(alias, soul).await
    }

    async fn resolve_alias(&self, alias: &str) -> Result<Option<SoulId>> {
        self.mem.resolve_alias(alias).await
    }

    async fn remove_alias(&self, alias: &str) -> Result<()> {
        self.mem.remove_alias(alias).await
    }

    async fn soul_aliases(&self, soul: &SoulId) -> Result<Vec<String>> {
        self.mem.soul_aliases(soul).await
    }

    async fn clear_aliases(&self, soul: &SoulId) -> Result<()> {
        self.mem.clear_aliases(soul).await
    }

    async fn soul_exists(&self, soul: &SoulId) -> Result<bool> {
        self.mem.soul_exists(soul).await
    }

    async fn create_soul(&self, soul: &SoulId) -> Result<()> {
        self.mem.create_soul(soul).await
    }

    async fn delete_soul(&self, soul: &SoulId) -> Result<()> {
        self.mem.delete_soul(soul).await
    }

    async fn soul_metadata(&self, soul: &SoulId) -> Result<MetaMap> {
        self.mem.soul_metadata(soul).await
    }

    async fn soul_metadata_value(&self, soul: &SoulId, key: &str) -> Result<Option<Value>> {
        self.mem.soul_metadata_value(soul, key).await
    }

    async fn set_soul_metadata(&self, souls: &[SoulId], patch: &MetaMap) -> Result<()> {
        self.mem.set_soul_metadata(souls, patch).await
    }

    async fn soul_has_data(&self, soul: &SoulId) -> Result<bool> {
        self.mem.soul_has_data(soul).await
    }

    async fn soul_data(&self, soul: &SoulId) -> Result<DataMap> {
        self.mem.soul_data(soul).await
    }

    async fn set_soul_data(&self, soul: &SoulId, data: &DataMap, merge: bool) -> Result<()> {
        self.mem.set_soul_data(soul, data, merge).await
    }

    async fn clear_soul_data(&self, soul: &SoulId) -> Result<()> {
        self.mem.clear_soul_data(soul).await
    }

    async fn bind_souls(&self, a: &SoulId, b: &SoulId, spec: &BindSpec) -> Result<()> {
        self.mem.bind_souls(a, b, spec).await
    }

    async fn unbind_souls(&self, a: &SoulId, spec: &UnbindSpec) -> Result<()> {
        self.mem.unbind_souls(a, spec).await
    }

    async fn bound_souls(&self, a: &SoulId, direction: Direction) -> Result<Vec<SoulId>> {
        self.mem.bound_souls(a, direction).await
    }

    async fn bound_soul(&self, a: &SoulId, key: &str) -> Result<Option<SoulId>> {
        self.mem.bound_soul(a, key).await
    }

    async fn bound_keys(&self, a: &SoulId) -> Result<Vec<String>> {
        self.mem.bound_keys(a).await
    }

    async fn bound_key_souls(&self, a: &SoulId) -> Result<Vec<(String, SoulId, Direction)>> {
        self.mem.bound_key_souls(a).await
    }

    async fn clear_soul_bindings(&self, a: &SoulId, scope: BindingScope) -> Result<()> {
        self.mem.clear_soul_bindings(a, scope).await
    }
}

// ============================================================================
// Persisted form
// ============================================================================

#[derive(serde::Deserialize)]
#[serde(untagged)]
enum Persisted {
    Entries(Vec<(String, serde_json::Value)>),
    Map(BTreeMap<String, serde_json::Value>),
}

type Entry = (String, serde_json::Value);

/// Flatten the graph into deterministic `[key, value]` entries.
fn snapshot(state: &GraphState) -> Vec<Entry> {
    let mut entries: Vec<Entry> = Vec::new();

    let catalog: BTreeMap<&str, &str> = state
        .aliases
        .iter()
        .map(|(alias, soul)| (alias.as_str(), soul.as_str()))
        .collect();
    entries.push((ALIAS_CATALOG_KEY.to_string(), serde_json::json!(catalog)));

    let mut ids: Vec<&SoulId> = state.souls.keys().collect();
    ids.sort();
    for id in ids {
        let record = &state.souls[id];
        entries.push((id.to_string(), serde_json::json!(record.meta)));

        if !record.data.is_empty() {
            entries.push((format!("{id}-DATA"), serde_json::json!(record.data)));
        }
        if !record.aliases.is_empty() {
            let mut names: Vec<&str> = record.aliases.iter().map(String::as_str).collect();
            names.sort();
            entries.push((format!("{id}-ALIASES"), serde_json::json!(names)));
        }
        for direction in Direction::ALL {
            let set = &record.bound[direction.index()];
            if !set.is_empty() {
                let mut neighbors: Vec<&str> = set.iter().map(SoulId::as_str).collect();
                neighbors.sort();
                entries.push((format!("{id}-{direction}"), serde_json::json!(neighbors)));
            }
        }
        if !record.key_to_soul.is_empty() {
            let mut pairs: Vec<(&str, (&str, &str))> = record
                .key_to_soul
                .iter()
                .map(|(key, (target, direction))| {
                    (key.as_str(), (target.as_str(), direction.as_str()))
                })
                .collect();
            pairs.sort();
            entries.push((format!("{id}-KEYS"), serde_json::json!(pairs)));
        }
    }

    entries
}

/// Rebuild the typed graph from flattened entries. Tolerates object and
/// array encodings for every collection value.
fn restore(entries: Vec<Entry>) -> std::result::Result<GraphState, String> {
    let mut state = GraphState::default();

    for (key, value) in entries {
        if key == ALIAS_CATALOG_KEY {
            for (alias, soul) in string_pairs(&value)
                .ok_or_else(|| format!("entry {key:?} is not an alias catalog"))?
            {
                let soul = parse_soul(&soul)?;
                state.aliases.insert(alias.clone(), soul.clone());
                state.souls.entry(soul).or_default().aliases.insert(alias);
            }
        } else if let Some(id) = key.strip_suffix("-DATA") {
            let id = parse_soul(id)?;
            let data: DataMap = serde_json::from_value(value)
                .map_err(|e| format!("entry {key:?} holds malformed data: {e}"))?;
            state.souls.entry(id).or_default().data = data;
        } else if let Some(id) = key.strip_suffix("-ALIASES") {
            // redundant with the catalog; accepted and reconciled
            let id = parse_soul(id)?;
            for alias in string_list(&value)
                .ok_or_else(|| format!("entry {key:?} is not an alias list"))?
            {
                state.souls.entry(id.clone()).or_default().aliases.insert(alias);
            }
        } else if let Some(id) = key.strip_suffix("-KEYS") {
            let id = parse_soul(id)?;
            let record = state.souls.entry(id).or_default();
            for (bind_key, (target, direction)) in keyed_pairs(&value)
                .ok_or_else(|| format!("entry {key:?} is not a key index"))?
            {
                let target = parse_soul(&target)?;
                let direction = Direction::parse(&direction)
                    .ok_or_else(|| format!("entry {key:?} names unknown direction {direction:?}"))?;
                record.soul_to_key.insert(target.clone(), (bind_key.clone(), direction));
                record.key_to_soul.insert(bind_key, (target, direction));
            }
        } else if let Some((id, direction)) = split_direction_suffix(&key) {
            let id = parse_soul(id)?;
            let record = state.souls.entry(id).or_default();
            for neighbor in string_list(&value)
                .ok_or_else(|| format!("entry {key:?} is not a neighbor list"))?
            {
                record.bound[direction.index()].insert(parse_soul(&neighbor)?);
            }
        } else if SoulId::is_valid(&key) {
            let id = parse_soul(&key)?;
            let meta: MetaMap = serde_json::from_value(value)
                .map_err(|e| format!("entry {key:?} holds malformed metadata: {e}"))?;
            state.souls.entry(id).or_default().meta = meta;
        } else {
            return Err(format!("unrecognized entry {key:?}"));
        }
    }

    Ok(state)
}

fn parse_soul(raw: &str) -> std::result::Result<SoulId, String> {
    SoulId::parse(raw).map_err(|_| format!("invalid soul id {raw:?}"))
}

fn split_direction_suffix(key: &str) -> Option<(&str, Direction)> {
    let (id, suffix) = key.rsplit_once('-')?;
    Some((id, Direction::parse(suffix)?))
}

/// `{"a": "b"}` or `[["a", "b"]]` → pairs of strings.
fn string_pairs(value: &serde_json::Value) -> Option<Vec<(String, String)>> {
    match value {
        serde_json::Value::Object(map) => map
            .iter()
            .map(|(k, v)| Some((k.clone(), v.as_str()?.to_string())))
            .collect(),
        serde_json::Value::Array(items) => items
            .iter()
            .map(|item| {
                let pair = item.as_array()?;
                Some((pair.first()?.as_str()?.to_string(), pair.get(1)?.as_str()?.to_string()))
            })
            .collect(),
        _ => None,
    }
}

/// `["a", "b"]` or `{"a": true, "b": true}` → list of strings.
fn string_list(value: &serde_json::Value) -> Option<Vec<String>> {
    match value {
        serde_json::Value::Array(items) => items
            .iter()
            .map(|item| Some(item.as_str()?.to_string()))
            .collect(),
        serde_json::Value::Object(map) => Some(map.keys().cloned().collect()),
        _ => None,
    }
}

/// `[["key", ["target", "DIR"]]]` or `{"key": ["target", "DIR"]}`.
fn keyed_pairs(value: &serde_json::Value) -> Option<Vec<(String, (String, String))>> {
    let decode_target = |v: &serde_json::Value| -> Option<(String, String)> {
        let pair = v.as_array()?;
        Some((pair.first()?.as_str()?.to_string(), pair.get(1)?.as_str()?.to_string()))
    };
    match value {
        serde_json::Value::Object(map) => map
            .iter()
            .map(|(k, v)| Some((k.clone(), decode_target(v)?)))
            .collect(),
        serde_json::Value::Array(items) => items
            .iter()
            .map(|item| {
                let pair = item.as_array()?;
                Some((pair.first()?.as_str()?.to_string(), decode_target(pair.get(1)?)?))
            })
            .collect(),
        _ => None,
    }
}
