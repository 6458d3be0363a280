use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Deserialize)]
pub struct RawPresenceMeta {
    pub phx_ref: Option<String>,
    pub phx_ref_prev: Option<String>,
    #[serde(flatten)]
    pub data: HashMap<String, Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawPresenceEntries {
    pub metas: Vec<RawPresenceMeta>,
}

/// Payload of a `presence_state` frame
pub type RawPresenceState = HashMap<String, RawPresenceEntries>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PresenceMeta {
    pub presence_ref: String,
    #[serde(flatten)]
    pub data: HashMap<String, Value>,
}

pub type PresenceState = HashMap<String, Vec<PresenceMeta>>;

/// Payload of a `presence_diff` frame
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawPresenceDiff {
    #[serde(default)]
    pub joins: RawPresenceState,
    #[serde(default)]
    pub leaves: RawPresenceState,
}

/// Joins and leaves produced by one sync, reported to listeners
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PresenceChanges {
    pub joins: PresenceState,
    pub leaves: PresenceState,
}

impl PresenceChanges {
    pub fn is_empty(&self) -> bool {
        self.joins.is_empty() && self.leaves.is_empty()
    }
}

/// Key to metas map of the participants on one channel.
#[derive(Debug, Clone, Default)]
pub struct Presence {
    state: PresenceState,
    pending_diffs: Vec<RawPresenceDiff>,
    join_ref: Option<String>,
}

impl Presence {
    /// Replaces the whole map with `new_state`. Joins are the metas whose ref was
    /// unknown, leaves the known metas missing from the new state.
    pub fn sync_state(&mut self, new_state: RawPresenceState, join_ref: &str) -> PresenceChanges {
        let new_state = Self::transform_state(new_state);
        let new_refs = Self::refs(&new_state);
        let current_refs = Self::refs(&self.state);

        let joins = Self::partition(&new_state, |meta| !current_refs.contains(&meta.presence_ref));
        let leaves = Self::partition(&self.state, |meta| !new_refs.contains(&meta.presence_ref));

        self.state = new_state;
        self.join_ref = Some(join_ref.to_string());

        PresenceChanges { joins, leaves }
    }

    /// Applies an incremental diff: each joined key is inserted or overwritten with
    /// its new metas, then each left key is deleted.
    pub fn sync_diff(&mut self, diff: RawPresenceDiff) -> PresenceChanges {
        let joins = Self::transform_state(diff.joins);
        let leaves = Self::transform_state(diff.leaves);

        for (key, metas) in &joins {
            self.state.insert(key.clone(), metas.clone());
        }
        for key in leaves.keys() {
            self.state.remove(key);
        }

        PresenceChanges { joins, leaves }
    }

    /// True until the first `presence_state` of the join `join_ref` has been applied
    pub fn in_pending_sync_state(&self, join_ref: Option<&str>) -> bool {
        self.join_ref.is_none() || self.join_ref.as_deref() != join_ref
    }

    pub fn add_pending_diff(&mut self, diff: RawPresenceDiff) {
        self.pending_diffs.push(diff);
    }

    /// Applies the diffs queued before the first full sync, in arrival order
    pub fn flush_pending_diffs(&mut self) -> Vec<PresenceChanges> {
        std::mem::take(&mut self.pending_diffs)
            .into_iter()
            .map(|diff| self.sync_diff(diff))
            .collect()
    }

    pub fn state(&self) -> &PresenceState {
        &self.state
    }

    /// Every key with its metas, ordered by key
    pub fn list(&self) -> Vec<(String, Vec<PresenceMeta>)> {
        let mut entries: Vec<_> = self
            .state
            .iter()
            .map(|(key, metas)| (key.clone(), metas.clone()))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries
    }

    fn refs(state: &PresenceState) -> HashSet<String> {
        state
            .values()
            .flat_map(|metas| metas.iter().map(|meta| meta.presence_ref.clone()))
            .collect()
    }

    fn partition<F>(state: &PresenceState, keep: F) -> PresenceState
    where
        F: Fn(&PresenceMeta) -> bool,
    {
        state
            .iter()
            .filter_map(|(key, metas)| {
                let kept: Vec<PresenceMeta> =
                    metas.iter().filter(|meta| keep(meta)).cloned().collect();
                (!kept.is_empty()).then(|| (key.clone(), kept))
            })
            .collect()
    }

    fn transform_state(raw_state: RawPresenceState) -> PresenceState {
        raw_state
            .into_iter()
            .map(|(key, raw_entries)| {
                let entries: Vec<PresenceMeta> = raw_entries
                    .metas
                    .into_iter()
                    .map(|raw_meta| PresenceMeta {
                        presence_ref: raw_meta.phx_ref.unwrap_or_default(),
                        data: raw_meta.data,
                    })
                    .collect();
                (key, entries)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn raw_state(value: Value) -> RawPresenceState {
        serde_json::from_value(value).unwrap()
    }

    fn raw_diff(value: Value) -> RawPresenceDiff {
        serde_json::from_value(value).unwrap()
    }

    fn sorted(state: &PresenceState) -> Vec<(String, Vec<String>)> {
        let mut entries: Vec<_> = state
            .iter()
            .map(|(key, metas)| {
                let mut refs: Vec<String> = metas.iter().map(|m| m.presence_ref.clone()).collect();
                refs.sort();
                (key.clone(), refs)
            })
            .collect();
        entries.sort();
        entries
    }

    #[test]
    fn test_sync_state_reports_joins_and_leaves() {
        let mut presence = Presence::default();
        let changes = presence.sync_state(
            raw_state(json!({
                "alice": {"metas": [{"phx_ref": "a1", "status": "online"}]},
                "bob": {"metas": [{"phx_ref": "b1"}]}
            })),
            "1",
        );
        assert_eq!(changes.joins.len(), 2);
        assert!(changes.leaves.is_empty());
        assert_eq!(presence.state()["alice"][0].data["status"], "online");

        let changes = presence.sync_state(
            raw_state(json!({
                "alice": {"metas": [{"phx_ref": "a1", "status": "online"}]},
                "carol": {"metas": [{"phx_ref": "c1"}]}
            })),
            "1",
        );
        assert_eq!(changes.joins.keys().collect::<Vec<_>>(), vec!["carol"]);
        assert_eq!(changes.leaves.keys().collect::<Vec<_>>(), vec!["bob"]);
        assert_eq!(
            presence.list().iter().map(|(k, _)| k.as_str()).collect::<Vec<_>>(),
            vec!["alice", "carol"]
        );
    }

    #[test]
    fn test_sync_diff_matches_full_sync_of_merged_state() {
        let initial = json!({
            "alice": {"metas": [{"phx_ref": "a1"}]},
            "bob": {"metas": [{"phx_ref": "b1"}, {"phx_ref": "b2"}]},
            "dave": {"metas": [{"phx_ref": "d1"}]}
        });
        let diff = json!({
            "joins": {
                "carol": {"metas": [{"phx_ref": "c1"}]},
                "alice": {"metas": [{"phx_ref": "a2"}]}
            },
            "leaves": {
                "bob": {"metas": [{"phx_ref": "b1"}]},
                "dave": {"metas": [{"phx_ref": "d1"}]}
            }
        });
        let merged = json!({
            "alice": {"metas": [{"phx_ref": "a2"}]},
            "carol": {"metas": [{"phx_ref": "c1"}]}
        });

        let mut incremental = Presence::default();
        incremental.sync_state(raw_state(initial), "1");
        incremental.sync_diff(raw_diff(diff));

        let mut full = Presence::default();
        full.sync_state(raw_state(merged), "1");

        assert_eq!(sorted(incremental.state()), sorted(full.state()));
    }

    #[test]
    fn test_join_overwrites_existing_key() {
        let mut presence = Presence::default();
        presence.sync_state(
            raw_state(json!({"alice": {"metas": [{"phx_ref": "a1", "status": "away"}]}})),
            "1",
        );
        presence.sync_diff(raw_diff(json!({
            "joins": {"alice": {"metas": [{"phx_ref": "a2", "status": "online"}]}},
            "leaves": {}
        })));

        let metas = &presence.state()["alice"];
        assert_eq!(metas.len(), 1);
        assert_eq!(metas[0].presence_ref, "a2");
        assert_eq!(metas[0].data["status"], "online");
    }

    #[test]
    fn test_leave_deletes_key_whatever_its_refs() {
        let mut presence = Presence::default();
        presence.sync_state(
            raw_state(json!({
                "alice": {"metas": [{"phx_ref": "a1"}]},
                "bob": {"metas": [{"phx_ref": "b1"}]}
            })),
            "1",
        );
        let changes = presence.sync_diff(raw_diff(json!({
            "leaves": {
                "alice": {"metas": [{"phx_ref": "other"}]},
                "bob": {"metas": [{}]}
            }
        })));

        assert!(presence.state().is_empty());
        assert_eq!(changes.leaves.len(), 2);
    }

    #[test]
    fn test_leave_for_unknown_key_is_ignored() {
        let mut presence = Presence::default();
        let changes = presence.sync_diff(raw_diff(json!({
            "leaves": {"ghost": {"metas": [{"phx_ref": "g1"}]}}
        })));
        assert!(presence.state().is_empty());
        assert_eq!(changes.leaves.len(), 1);
    }

    #[test]
    fn test_pending_diffs_apply_after_first_sync() {
        let mut presence = Presence::default();
        assert!(presence.in_pending_sync_state(Some("1")));

        presence.add_pending_diff(raw_diff(json!({
            "joins": {"bob": {"metas": [{"phx_ref": "b1"}]}}
        })));
        presence.sync_state(raw_state(json!({"alice": {"metas": [{"phx_ref": "a1"}]}})), "1");
        assert!(!presence.in_pending_sync_state(Some("1")));
        assert!(presence.in_pending_sync_state(Some("2")));

        let applied = presence.flush_pending_diffs();
        assert_eq!(applied.len(), 1);
        assert!(presence.state().contains_key("bob"));
        assert!(presence.flush_pending_diffs().is_empty());
    }
}
