//! Per-track lifecycle records, keyed by tracker id and owned by the
//! pipeline. Nothing here is ever attached to tracker-owned objects.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::detection::TrackId;

/// Lifecycle state for one tracked subject.
#[derive(Debug, Clone)]
pub struct TrackRecord {
    pub track_id: TrackId,
    /// Directory holding this track's captured face crops.
    pub storage_path: PathBuf,
    /// Crops persisted so far; bounded above by the capture limit.
    pub images_saved: u32,
    /// Mean face embedding. Computed at most once, then immutable.
    pub fingerprint: Option<Vec<f32>>,
    /// Id of the identity profile created for this track, if any.
    pub identity_ref: Option<String>,
    /// Set when fingerprint extraction produced nothing. Never retried.
    pub abandoned: bool,
}

impl TrackRecord {
    fn new(track_id: TrackId, storage_root: &Path) -> Self {
        Self {
            track_id,
            storage_path: storage_root.join(track_id.to_string()),
            images_saved: 0,
            fingerprint: None,
            identity_ref: None,
            abandoned: false,
        }
    }

    /// Whether the resolver should run: the capture set is complete, no
    /// fingerprint exists yet, and no earlier attempt gave up.
    pub fn ready_for_resolution(&self, capture_limit: u32) -> bool {
        self.images_saved >= capture_limit && self.fingerprint.is_none() && !self.abandoned
    }
}

/// Keyed store of live track records.
pub struct TrackRegistry {
    storage_root: PathBuf,
    records: HashMap<TrackId, TrackRecord>,
}

impl TrackRegistry {
    pub fn new(storage_root: impl Into<PathBuf>) -> Self {
        Self {
            storage_root: storage_root.into(),
            records: HashMap::new(),
        }
    }

    /// Existing record for `track_id`, or a fresh one on first sighting.
    pub fn get_or_create(&mut self, track_id: TrackId) -> &mut TrackRecord {
        self.records.entry(track_id).or_insert_with(|| {
            debug!(track_id, "new track record");
            TrackRecord::new(track_id, &self.storage_root)
        })
    }

    /// Drop the record once the tracker expires the id. Crops stay on disk
    /// until the next startup sweep.
    pub fn remove(&mut self, track_id: TrackId) -> Option<TrackRecord> {
        let removed = self.records.remove(&track_id);
        if removed.is_some() {
            debug!(track_id, "track record expired");
        }
        removed
    }

    /// Drop every record whose id the tracker no longer reports.
    pub fn retain_active(&mut self, active: &HashSet<TrackId>) {
        let expired: Vec<TrackId> = self
            .records
            .keys()
            .filter(|id| !active.contains(id))
            .copied()
            .collect();
        for track_id in expired {
            self.remove(track_id);
        }
    }

    pub fn get(&self, track_id: TrackId) -> Option<&TrackRecord> {
        self.records.get(&track_id)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_or_create_is_idempotent() {
        let mut registry = TrackRegistry::new("store");
        registry.get_or_create(7).images_saved = 3;

        let record = registry.get_or_create(7);
        assert_eq!(record.images_saved, 3);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn records_get_distinct_storage_paths() {
        let mut registry = TrackRegistry::new("store");
        let a = registry.get_or_create(1).storage_path.clone();
        let b = registry.get_or_create(2).storage_path.clone();

        assert_ne!(a, b);
        assert_eq!(a, PathBuf::from("store").join("1"));
    }

    #[test]
    fn fresh_record_has_no_identity_state() {
        let mut registry = TrackRegistry::new("store");
        let record = registry.get_or_create(4);

        assert_eq!(record.images_saved, 0);
        assert!(record.fingerprint.is_none());
        assert!(record.identity_ref.is_none());
        assert!(!record.abandoned);
    }

    #[test]
    fn retain_active_drops_expired_ids() {
        let mut registry = TrackRegistry::new("store");
        registry.get_or_create(1);
        registry.get_or_create(2);
        registry.get_or_create(3);

        let active: HashSet<TrackId> = [2].into_iter().collect();
        registry.retain_active(&active);

        assert!(registry.get(1).is_none());
        assert!(registry.get(2).is_some());
        assert!(registry.get(3).is_none());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn resolution_trigger_fires_once_per_state() {
        let mut registry = TrackRegistry::new("store");
        let record = registry.get_or_create(1);
        assert!(!record.ready_for_resolution(5));

        record.images_saved = 5;
        assert!(record.ready_for_resolution(5));

        record.fingerprint = Some(vec![0.0; 4]);
        assert!(!record.ready_for_resolution(5));

        record.fingerprint = None;
        record.abandoned = true;
        assert!(!record.ready_for_resolution(5));
    }
}
