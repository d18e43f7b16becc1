//! Client-side presence bookkeeping
//!
//! The server sends one `presence_state` after join and `presence_diff`
//! frames afterwards. The tracker folds them into the full state that the
//! engine consumes.

use std::collections::HashMap;

use super::frame::{PresenceDiff, RawPresence};
use crate::models::{PresenceMeta, PresenceState};

#[derive(Debug, Default)]
pub struct PresenceTracker {
    /// key -> (phx_ref, meta), one pair per connected client
    entries: HashMap<String, Vec<(String, PresenceMeta)>>,
}

impl PresenceTracker {
    /// Replace everything with a fresh server snapshot.
    pub fn apply_state(&mut self, state: RawPresence) {
        self.entries.clear();
        for (key, entry) in state {
            let metas: Vec<_> = entry.metas.into_iter().map(|m| (m.phx_ref, m.meta)).collect();
            if !metas.is_empty() {
                self.entries.insert(key, metas);
            }
        }
    }

    pub fn apply_diff(&mut self, diff: PresenceDiff) {
        for (key, entry) in diff.joins {
            let metas = self.entries.entry(key).or_default();
            for joined in entry.metas {
                match metas.iter_mut().find(|(r, _)| *r == joined.phx_ref) {
                    Some(slot) => slot.1 = joined.meta,
                    None => metas.push((joined.phx_ref, joined.meta)),
                }
            }
        }

        for (key, entry) in diff.leaves {
            let Some(metas) = self.entries.get_mut(&key) else {
                continue;
            };
            metas.retain(|(r, _)| !entry.metas.iter().any(|left| left.phx_ref == *r));
            if metas.is_empty() {
                self.entries.remove(&key);
            }
        }
    }

    pub fn snapshot(&self) -> PresenceState {
        self.entries
            .iter()
            .map(|(key, metas)| {
                (
                    key.clone(),
                    metas.iter().map(|(_, meta)| meta.clone()).collect(),
                )
            })
            .collect()
    }
}
