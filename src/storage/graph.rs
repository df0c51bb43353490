//! Typed in-memory graph state.
//!
//! The single source of truth for the graph consistency invariants. Both
//! bundled stores (`MemoryStore`, `JsonStore`) hold one `GraphState` behind a
//! lock and delegate here; a backend with a different physical encoding must
//! reproduce the same observable behavior.
//!
//! Layout per soul: metadata, payload data, alias set, one neighbor set per
//! direction, and two keyed-binding indices — key → (target, direction) and
//! target → (key, direction). The indices only live on the origin side of a
//! keyed binding.

use chrono::Utc;
use hashbrown::{HashMap, HashSet};

use crate::model::{merge, DataMap, Direction, MetaMap, SoulId, Value, CDATE, MDATE};
use crate::storage::{BindSpec, BindingScope, UnbindSpec};

fn now() -> Value {
    Value::Int(Utc::now().timestamp_millis())
}

/// Everything stored about one soul.
#[derive(Debug, Clone, Default)]
pub(crate) struct SoulRecord {
    pub meta: MetaMap,
    pub data: DataMap,
    pub aliases: HashSet<String>,
    /// Neighbor sets, indexed by `Direction::index()`.
    pub bound: [HashSet<SoulId>; 4],
    /// key → (target, direction) for keyed bindings originating here.
    pub key_to_soul: HashMap<String, (SoulId, Direction)>,
    /// target → (key, direction), the inverse of `key_to_soul`.
    pub soul_to_key: HashMap<SoulId, (String, Direction)>,
}

impl SoulRecord {
    fn fresh() -> SoulRecord {
        let mut record = SoulRecord::default();
        let ts = now();
        record.meta.insert(CDATE.to_string(), ts.clone());
        record.meta.insert(MDATE.to_string(), ts);
        record
    }

    fn touch_mdate(&mut self) {
        self.meta.insert(MDATE.to_string(), now());
    }
}

/// The whole graph: soul records plus the global alias catalog.
#[derive(Debug, Clone, Default)]
pub(crate) struct GraphState {
    pub souls: HashMap<SoulId, SoulRecord>,
    pub aliases: HashMap<String, SoulId>,
}

impl GraphState {
    pub fn exists(&self, soul: &SoulId) -> bool {
        self.souls.contains_key(soul)
    }

    /// Idempotent create. A soul that was never touched has never been
    /// "created" in storage.
    pub fn touch(&mut self, soul: &SoulId) {
        self.souls.entry(soul.clone()).or_insert_with(SoulRecord::fresh);
    }

    // ========================================================================
    // Aliases
    // ========================================================================

    pub fn alias_exists(&self, alias: &str) -> bool {
        self.aliases.contains_key(alias)
    }

    pub fn resolve_alias(&self, alias: &str) -> Option<SoulId> {
        self.aliases.get(alias).cloned()
    }

    pub fn set_alias(&mut self, alias: &str, soul: &SoulId) {
        self.touch(soul);
        if let Some(previous) = self.aliases.insert(alias.to_string(), soul.clone()) {
            if previous != *soul {
                if let Some(record) = self.souls.get_mut(&previous) {
                    record.aliases.remove(alias);
                }
            }
        }
        if let Some(record) = self.souls.get_mut(soul) {
            record.aliases.insert(alias.to_string());
        }
    }

    pub fn remove_alias(&mut self, alias: &str) {
        if let Some(soul) = self.aliases.remove(alias) {
            if let Some(record) = self.souls.get_mut(&soul) {
                record.aliases.remove(alias);
            }
        }
    }

    pub fn soul_aliases(&self, soul: &SoulId) -> Vec<String> {
        let mut names: Vec<String> = self
            .souls
            .get(soul)
            .map(|r| r.aliases.iter().cloned().collect())
            .unwrap_or_default();
        names.sort();
        names
    }

    pub fn clear_aliases(&mut self, soul: &SoulId) {
        let Some(record) = self.souls.get_mut(soul) else { return };
        for alias in std::mem::take(&mut record.aliases) {
            self.aliases.remove(&alias);
        }
    }

    // ========================================================================
    // Metadata
    // ========================================================================

    pub fn metadata(&self, soul: &SoulId) -> MetaMap {
        self.souls.get(soul).map(|r| r.meta.clone()).unwrap_or_default()
    }

    pub fn metadata_value(&self, soul: &SoulId, key: &str) -> Option<Value> {
        self.souls.get(soul).and_then(|r| r.meta.get(key).cloned())
    }

    pub fn merge_metadata(&mut self, souls: &[SoulId], patch: &MetaMap) {
        for soul in souls {
            self.touch(soul);
            if let Some(record) = self.souls.get_mut(soul) {
                merge(&mut record.meta, patch);
                record.touch_mdate();
            }
        }
    }

    // ========================================================================
    // Data payload
    // ========================================================================

    pub fn has_data(&self, soul: &SoulId) -> bool {
        self.souls.get(soul).is_some_and(|r| !r.data.is_empty())
    }

    pub fn data(&self, soul: &SoulId) -> DataMap {
        self.souls.get(soul).map(|r| r.data.clone()).unwrap_or_default()
    }

    pub fn set_data(&mut self, soul: &SoulId, data: &DataMap, merge_existing: bool) {
        self.touch(soul);
        if let Some(record) = self.souls.get_mut(soul) {
            if merge_existing {
                merge(&mut record.data, data);
            } else {
                record.data = data.clone();
            }
            record.touch_mdate();
        }
    }

    pub fn clear_data(&mut self, soul: &SoulId) {
        if let Some(record) = self.souls.get_mut(soul) {
            record.data.clear();
            record.touch_mdate();
        }
    }

    // ========================================================================
    // Bindings
    // ========================================================================

    /// Create both halves of a binding from `a` to `b`.
    pub fn bind(&mut self, a: &SoulId, b: &SoulId, spec: &BindSpec) {
        self.touch(a);
        self.touch(b);
        let direction = spec.direction;

        if let Some(origin) = self.souls.get_mut(a) {
            origin.bound[direction.index()].insert(b.clone());
            if let Some(key) = &spec.key {
                // a key points at exactly one target and a target carries at
                // most one key; both displaced pairings must go
                if let Some((old_target, _)) =
                    origin.key_to_soul.insert(key.clone(), (b.clone(), direction))
                {
                    if old_target != *b {
                        origin.soul_to_key.remove(&old_target);
                    }
                }
                if let Some((old_key, _)) =
                    origin.soul_to_key.insert(b.clone(), (key.clone(), direction))
                {
                    if old_key != *key {
                        origin.key_to_soul.remove(&old_key);
                    }
                }
            }
            origin.touch_mdate();
        }
        if let Some(target) = self.souls.get_mut(b) {
            target.bound[direction.opposite().index()].insert(a.clone());
            target.touch_mdate();
        }
    }

    /// Remove both halves of a binding. Unbinding something that is not
    /// bound is a no-op.
    pub fn unbind(&mut self, a: &SoulId, spec: &UnbindSpec) {
        let (target, direction) = match spec {
            UnbindSpec::Soul { target, direction } => (target.clone(), *direction),
            UnbindSpec::Key(key) => {
                // the named key comes out of its own index here; the
                // inverse entry falls to drop_key_entry below
                let Some(record) = self.souls.get_mut(a) else { return };
                let Some(entry) = record.key_to_soul.remove(key) else { return };
                entry
            }
        };

        if let Some(origin) = self.souls.get_mut(a) {
            origin.bound[direction.index()].remove(&target);
            origin.touch_mdate();
        }
        self.drop_key_entry(a, &target, direction);

        if let Some(other) = self.souls.get_mut(&target) {
            other.bound[direction.opposite().index()].remove(a);
            other.touch_mdate();
        }
        self.drop_key_entry(&target, a, direction.opposite());
    }

    /// Remove `origin`'s key-index entries for `target` if they were
    /// recorded in `direction`.
    fn drop_key_entry(&mut self, origin: &SoulId, target: &SoulId, direction: Direction) {
        let Some(record) = self.souls.get_mut(origin) else { return };
        let matches = record
            .soul_to_key
            .get(target)
            .is_some_and(|(_, d)| *d == direction);
        if matches {
            if let Some((key, _)) = record.soul_to_key.remove(target) {
                record.key_to_soul.remove(&key);
            }
        }
    }

    pub fn bound_souls(&self, a: &SoulId, direction: Direction) -> Vec<SoulId> {
        let mut out: Vec<SoulId> = self
            .souls
            .get(a)
            .map(|r| r.bound[direction.index()].iter().cloned().collect())
            .unwrap_or_default();
        out.sort();
        out
    }

    pub fn bound_soul(&self, a: &SoulId, key: &str) -> Option<SoulId> {
        self.souls
            .get(a)
            .and_then(|r| r.key_to_soul.get(key))
            .map(|(target, _)| target.clone())
    }

    pub fn bound_keys(&self, a: &SoulId) -> Vec<String> {
        let mut keys: Vec<String> = self
            .souls
            .get(a)
            .map(|r| r.key_to_soul.keys().cloned().collect())
            .unwrap_or_default();
        keys.sort();
        keys
    }

    pub fn bound_key_souls(&self, a: &SoulId) -> Vec<(String, SoulId, Direction)> {
        let mut entries: Vec<(String, SoulId, Direction)> = self
            .souls
            .get(a)
            .map(|r| {
                r.key_to_soul
                    .iter()
                    .map(|(key, (target, direction))| (key.clone(), target.clone(), *direction))
                    .collect()
            })
            .unwrap_or_default();
        entries.sort();
        entries
    }

    /// Remove all bindings of `a` in the scoped directions, including the
    /// mirrored halves held by the neighbors.
    pub fn clear_bindings(&mut self, a: &SoulId, scope: BindingScope) {
        for &direction in scope.directions() {
            let neighbors: Vec<SoulId> = {
                let Some(record) = self.souls.get_mut(a) else { return };
                std::mem::take(&mut record.bound[direction.index()])
                    .into_iter()
                    .collect()
            };
            for neighbor in &neighbors {
                self.drop_key_entry(a, neighbor, direction);
                if let Some(other) = self.souls.get_mut(neighbor) {
                    other.bound[direction.opposite().index()].remove(a);
                    other.touch_mdate();
                }
                self.drop_key_entry(neighbor, a, direction.opposite());
            }
            if !neighbors.is_empty() {
                if let Some(record) = self.souls.get_mut(a) {
                    record.touch_mdate();
                }
            }
        }
    }

    // ========================================================================
    // Deletion
    // ========================================================================

    /// Cascading removal, in dependency order: data, bindings, aliases,
    /// then the record itself.
    pub fn delete(&mut self, soul: &SoulId) {
        if !self.exists(soul) {
            return;
        }
        self.clear_data(soul);
        self.clear_bindings(soul, BindingScope::All);
        self.clear_aliases(soul);
        self.souls.remove(soul);
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    fn soul(tag: u8) -> SoulId {
        SoulId::parse(format!("SOUL-{:02X}{}", tag, "0".repeat(30))).unwrap()
    }

    #[test]
    fn test_touch_sets_timestamps_once() {
        let mut g = GraphState::default();
        let a = soul(1);
        g.touch(&a);
        let cdate = g.metadata_value(&a, CDATE).unwrap();
        assert!(g.metadata_value(&a, MDATE).is_some());
        g.touch(&a);
        assert_eq!(g.metadata_value(&a, CDATE), Some(cdate));
    }

    #[test]
    fn test_bind_is_symmetric() {
        let mut g = GraphState::default();
        let (a, b) = (soul(1), soul(2));
        g.bind(&a, &b, &BindSpec::direction(Direction::South));

        assert_eq!(g.bound_souls(&a, Direction::South), vec![b.clone()]);
        assert_eq!(g.bound_souls(&b, Direction::North), vec![a.clone()]);
        assert!(g.bound_souls(&a, Direction::North).is_empty());
    }

    #[test]
    fn test_unbind_removes_both_halves() {
        let mut g = GraphState::default();
        let (a, b) = (soul(1), soul(2));
        g.bind(&a, &b, &BindSpec::direction(Direction::East));
        g.unbind(&a, &UnbindSpec::Soul { target: b.clone(), direction: Direction::East });

        assert!(g.bound_souls(&a, Direction::East).is_empty());
        assert!(g.bound_souls(&b, Direction::West).is_empty());
    }

    #[test]
    fn test_keyed_bind_and_unbind_by_key() {
        let mut g = GraphState::default();
        let (a, b) = (soul(1), soul(2));
        g.bind(&a, &b, &BindSpec::keyed(Direction::North, "supervisor"));

        assert_eq!(g.bound_soul(&a, "supervisor"), Some(b.clone()));
        assert_eq!(g.bound_keys(&a), vec!["supervisor".to_string()]);
        assert_eq!(
            g.bound_key_souls(&a),
            vec![("supervisor".to_string(), b.clone(), Direction::North)]
        );

        g.unbind(&a, &UnbindSpec::Key("supervisor".to_string()));
        assert_eq!(g.bound_soul(&a, "supervisor"), None);
        assert!(g.bound_souls(&a, Direction::North).is_empty());
        assert!(g.bound_souls(&b, Direction::South).is_empty());
        assert!(g.bound_keys(&a).is_empty());
    }

    #[test]
    fn test_rekeying_drops_stale_index_entry() {
        let mut g = GraphState::default();
        let (a, b, c) = (soul(1), soul(2), soul(3));
        g.bind(&a, &b, &BindSpec::keyed(Direction::South, "item"));
        g.bind(&a, &c, &BindSpec::keyed(Direction::South, "item"));

        assert_eq!(g.bound_soul(&a, "item"), Some(c.clone()));
        // b stays bound directionally, but no longer addressable by key
        assert_eq!(g.bound_souls(&a, Direction::South), {
            let mut v = vec![b.clone(), c.clone()];
            v.sort();
            v
        });
        assert_eq!(g.bound_key_souls(&a).len(), 1);
    }

    #[test]
    fn test_rebind_same_target_under_new_key() {
        let mut g = GraphState::default();
        let (a, b) = (soul(1), soul(2));
        g.bind(&a, &b, &BindSpec::keyed(Direction::South, "x"));
        g.bind(&a, &b, &BindSpec::keyed(Direction::South, "y"));

        // the old key is fully retired, not just shadowed
        assert_eq!(g.bound_soul(&a, "x"), None);
        assert_eq!(g.bound_soul(&a, "y"), Some(b.clone()));
        assert_eq!(g.bound_keys(&a), vec!["y".to_string()]);

        // unbinding the retired key is a no-op on the live binding
        g.unbind(&a, &UnbindSpec::Key("x".to_string()));
        assert_eq!(g.bound_soul(&a, "y"), Some(b.clone()));
        assert_eq!(g.bound_souls(&a, Direction::South), vec![b.clone()]);
        assert_eq!(g.bound_souls(&b, Direction::North), vec![a.clone()]);

        g.unbind(&a, &UnbindSpec::Key("y".to_string()));
        assert_eq!(g.bound_soul(&a, "y"), None);
        assert!(g.bound_souls(&a, Direction::South).is_empty());
        assert!(g.bound_souls(&b, Direction::North).is_empty());
        assert!(g.bound_keys(&a).is_empty());
    }

    #[test]
    fn test_realias_moves_the_name() {
        let mut g = GraphState::default();
        let (a, b) = (soul(1), soul(2));
        g.set_alias("employee-1", &a);
        assert_eq!(g.resolve_alias("employee-1"), Some(a.clone()));

        g.set_alias("employee-1", &b);
        assert_eq!(g.resolve_alias("employee-1"), Some(b.clone()));
        assert!(g.soul_aliases(&a).is_empty());
        assert_eq!(g.soul_aliases(&b), vec!["employee-1".to_string()]);
    }

    #[test]
    fn test_clear_bindings_scoped_by_direction() {
        let mut g = GraphState::default();
        let (a, b, c) = (soul(1), soul(2), soul(3));
        g.bind(&a, &b, &BindSpec::direction(Direction::South));
        g.bind(&a, &c, &BindSpec::direction(Direction::East));

        g.clear_bindings(&a, BindingScope::Direction(Direction::South));
        assert!(g.bound_souls(&a, Direction::South).is_empty());
        assert!(g.bound_souls(&b, Direction::North).is_empty());
        // east binding untouched
        assert_eq!(g.bound_souls(&a, Direction::East), vec![c.clone()]);
        assert_eq!(g.bound_souls(&c, Direction::West), vec![a.clone()]);
    }

    #[test]
    fn test_delete_cascades() {
        let mut g = GraphState::default();
        let (a, b) = (soul(1), soul(2));
        g.set_alias("doomed", &a);
        g.set_data(&a, &DataMap::from([("k".to_string(), Value::from(1))]), true);
        g.bind(&a, &b, &BindSpec::keyed(Direction::South, "child"));

        g.delete(&a);

        assert!(!g.exists(&a));
        assert_eq!(g.resolve_alias("doomed"), None);
        assert!(g.bound_souls(&b, Direction::North).is_empty());
        // no other soul retains a reference to a
        for record in g.souls.values() {
            for set in &record.bound {
                assert!(!set.contains(&a));
            }
            assert!(!record.soul_to_key.contains_key(&a));
        }
    }

    #[test]
    fn test_delete_missing_soul_is_noop() {
        let mut g = GraphState::default();
        g.delete(&soul(9));
        assert!(g.souls.is_empty());
    }

    /// Checks the binding-symmetry invariant over the whole graph.
    fn assert_no_orphan_half_edges(g: &GraphState) {
        for (id, record) in &g.souls {
            for direction in Direction::ALL {
                for neighbor in &record.bound[direction.index()] {
                    let mirrored = g
                        .souls
                        .get(neighbor)
                        .is_some_and(|r| r.bound[direction.opposite().index()].contains(id));
                    assert!(mirrored, "orphaned half-edge {id} -{direction}-> {neighbor}");
                }
            }
        }
    }

    proptest! {
        #[test]
        fn prop_bind_unbind_never_orphans(ops in proptest::collection::vec((0u8..3, 0u8..3, 0u8..4, proptest::bool::ANY), 1..40)) {
            let mut g = GraphState::default();
            let ids = [soul(1), soul(2), soul(3)];
            for (a, b, d, is_bind) in ops {
                let direction = Direction::ALL[d as usize];
                if is_bind {
                    g.bind(&ids[a as usize], &ids[b as usize], &BindSpec::direction(direction));
                } else {
                    g.unbind(&ids[a as usize], &UnbindSpec::Soul {
                        target: ids[b as usize].clone(),
                        direction,
                    });
                }
                assert_no_orphan_half_edges(&g);
            }
        }
    }
}
