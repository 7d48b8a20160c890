//! Bringing the data directory, ledger and cache state back in agreement.

use crate::content::ContentStore;
use crate::error::StorageResult;
use depot_core::ObjectId;
use std::collections::{HashMap, HashSet};
use tokio::fs;

/// Outcome of a [`ContentStore::startup_reconciliation`] run.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReconcileReport {
    pub kept: usize,
    pub removed_unassigned: usize,
    pub removed_size_mismatch: usize,
    pub entries_added: usize,
    pub mime_filled: usize,
    pub stale_entries_dropped: usize,
    pub used_bytes: u64,
}

impl ReconcileReport {
    /// True when the run deleted or rewrote nothing.
    pub fn is_noop(&self) -> bool {
        self.removed_unassigned == 0
            && self.removed_size_mismatch == 0
            && self.entries_added == 0
            && self.mime_filled == 0
            && self.stale_entries_dropped == 0
    }
}

impl ContentStore {
    /// Reconcile disk contents with the expected assignment.
    ///
    /// `expected` maps every object currently assigned to this node to its
    /// size according to the chain of record. Files that are not assigned,
    /// whose names are not object ids, or whose size differs are deleted.
    /// The ledger is reset to the sum of the kept files. Kept files missing
    /// from the cache state are added and get a sniffed mime type; state
    /// entries without a kept file are dropped.
    ///
    /// Must run before any ingestion starts.
    pub async fn startup_reconciliation(
        &self,
        expected: &HashMap<ObjectId, u64>,
    ) -> StorageResult<ReconcileReport> {
        let mut report = ReconcileReport::default();
        let mut kept = HashMap::new();

        let mut dir = fs::read_dir(&self.root).await?;
        while let Some(entry) = dir.next_entry().await? {
            let file_type = entry.file_type().await?;
            if !file_type.is_file() {
                continue;
            }
            let path = entry.path();
            let name = entry.file_name().to_string_lossy().into_owned();
            let size = entry.metadata().await?.len();

            let object_id = match ObjectId::new(name.as_str()) {
                Ok(id) => id,
                Err(_) => {
                    tracing::warn!(file = %path.display(), "removing unrecognised file");
                    fs::remove_file(&path).await?;
                    report.removed_unassigned += 1;
                    continue;
                }
            };

            match expected.get(&object_id) {
                None => {
                    tracing::info!(object_id = %object_id, size, "removing unassigned object");
                    fs::remove_file(&path).await?;
                    report.removed_unassigned += 1;
                }
                Some(&expected_size) if expected_size != size => {
                    tracing::warn!(
                        object_id = %object_id,
                        size,
                        expected_size,
                        "removing object with size mismatch"
                    );
                    fs::remove_file(&path).await?;
                    report.removed_size_mismatch += 1;
                }
                Some(_) => {
                    report.used_bytes += size;
                    kept.insert(object_id, size);
                }
            }
        }

        self.ledger.set(report.used_bytes);

        for object_id in self.state.cached_ids() {
            if !kept.contains_key(&object_id) {
                self.state.drop_entry(&object_id);
                report.stale_entries_dropped += 1;
            }
        }

        for (object_id, &size) in &kept {
            if !self.state.set_entry_size(object_id, size) {
                self.state.insert_entry(object_id.clone(), size);
                report.entries_added += 1;
            }
            if self.state.get_mime(object_id).is_none() {
                let mime_type = self.detect_mime_type(object_id).await?;
                self.state.set_mime(object_id.clone(), mime_type);
                report.mime_filled += 1;
            }
        }
        report.kept = kept.len();

        tracing::info!(
            kept = report.kept,
            removed_unassigned = report.removed_unassigned,
            removed_size_mismatch = report.removed_size_mismatch,
            stale_entries_dropped = report.stale_entries_dropped,
            used_bytes = report.used_bytes,
            "startup reconciliation finished"
        );
        Ok(report)
    }

    /// Delete cached objects that are no longer assigned to this node.
    ///
    /// Objects with an active fetch are skipped. Returns the number deleted.
    pub async fn prune_unassigned(&self, assigned: &HashSet<ObjectId>) -> StorageResult<usize> {
        let mut removed = 0;
        for object_id in self.state.cached_ids() {
            if assigned.contains(&object_id) || self.state.get_pending_fetch(&object_id).is_some() {
                continue;
            }
            if self.delete(&object_id, "unassigned").await? {
                removed += 1;
            }
        }
        if removed > 0 {
            tracing::info!(removed, "pruned unassigned objects");
        }
        Ok(removed)
    }
}
