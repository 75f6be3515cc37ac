//! The persisted entry store: one JSON array on disk.
//!
//! Every write first copies the previous file to `<file>.bak`. Records that cannot be decoded
//! are kept aside on load and written back unchanged on save, so one bad record never costs
//! the rest of the store.

use crate::entry::Entry;
use crate::listing::Listing;
use crate::{Result, ScoutError};
use serde::Serialize;
use serde_json::Value;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Entries read from the store plus the raw records that failed to decode.
#[derive(Debug, Default)]
pub struct Snapshot {
    pub entries: Vec<Entry>,
    pub quarantined: Vec<Value>,
}

impl Snapshot {
    /// Listing ids of the quarantined records that still carry one.
    pub fn quarantined_ids(&self) -> HashSet<&str> {
        self.quarantined.iter().filter_map(record_id).collect()
    }

    /// Drops the listings whose id belongs to a quarantined record.
    ///
    /// Such a listing would otherwise look new and end up stored twice: once classified, once
    /// as the raw record written back.
    pub fn without_quarantined(&self, listings: Vec<Listing>) -> Vec<Listing> {
        let held = self.quarantined_ids();
        if held.is_empty() {
            return listings;
        }
        listings
            .into_iter()
            .filter(|listing| {
                let keep = !held.contains(listing.id.as_str());
                if !keep {
                    warn!(id = %listing.id, "Listing matches a quarantined record, leaving it alone");
                }
                keep
            })
            .collect()
    }
}

/// `metadata.offer.id` of a raw record.
fn record_id(record: &Value) -> Option<&str> {
    record.pointer("/metadata/offer/id").and_then(Value::as_str)
}

pub struct EntryStore {
    path: PathBuf,
}

impl EntryStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Loads the store.
    ///
    /// A missing file is an empty store. A file that is not a JSON array is an error, since
    /// overwriting it would lose data. Records that fail to decode are logged and quarantined.
    pub async fn load(&self) -> Result<Snapshot> {
        let raw = match tokio::fs::read_to_string(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!(path = %self.path.display(), "No store yet, starting empty");
                return Ok(Snapshot::default());
            }
            Err(e) => return Err(e.into()),
        };

        let records = match serde_json::from_str::<Value>(&raw) {
            Ok(Value::Array(records)) => records,
            Ok(_) => return Err(self.unusable("top level is not a JSON array")),
            Err(e) => return Err(self.unusable(&e.to_string())),
        };

        let mut snapshot = Snapshot::default();
        for (index, record) in records.into_iter().enumerate() {
            match Entry::parse_full(&record) {
                Ok(entry) => snapshot.entries.push(entry),
                Err(e) => {
                    warn!(path = %self.path.display(), index, error = %e, "Quarantining unreadable entry");
                    snapshot.quarantined.push(record);
                }
            }
        }

        info!(
            entries = snapshot.entries.len(),
            quarantined = snapshot.quarantined.len(),
            "Loaded store"
        );
        Ok(snapshot)
    }

    /// Writes `entries` followed by the untouched `quarantined` records.
    pub async fn save(&self, entries: &[Entry], quarantined: &[Value]) -> Result<()> {
        let mut records = Vec::with_capacity(entries.len() + quarantined.len());
        for entry in entries {
            records.push(entry.to_json()?);
        }
        records.extend(quarantined.iter().cloned());

        write_json(&self.path, &records).await?;
        debug!(path = %self.path.display(), records = records.len(), "Saved store");
        Ok(())
    }

    fn unusable(&self, reason: &str) -> ScoutError {
        ScoutError::StoreError {
            path: self.path.display().to_string(),
            reason: reason.to_string(),
        }
    }
}

/// `<file>.bak` next to `path`.
pub fn backup_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".bak");
    PathBuf::from(name)
}

/// Writes `value` as pretty JSON, copying any previous file to its backup first.
pub async fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await?;
        }
    }

    if tokio::fs::try_exists(path).await? {
        tokio::fs::copy(path, backup_path(path)).await?;
    }

    let encoded = serde_json::to_string_pretty(value)?;
    tokio::fs::write(path, encoded).await?;
    Ok(())
}
