//! In-memory implementation of [`Persistence`].
//!
//! Committed state sits behind a [`parking_lot::RwLock`]. A transaction records a list of
//! [`Change`]s and applies them on commit to a copy of the state, validates the copy, and
//! swaps it in. A failed validation leaves the committed state untouched.
use std::collections::BTreeMap;

use itertools::Itertools;
use parking_lot::RwLock;
use tracing::debug;

use crate::database::{Persistence, Transaction};
use crate::dataset::{DataType, RawData, Source};
use crate::virtobs_errors::VirtObsError;

/// Sources keyed by (project, name).
type SourceTable = BTreeMap<(String, String), Source>;

#[derive(Debug, Default, Clone)]
struct DbState {
    next_id: u64,
    sources: SourceTable,
}

impl DbState {
    fn new_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }
}

#[derive(Debug, Default)]
pub struct MemoryDatabase {
    state: RwLock<DbState>,
}

/// One staged change.
#[derive(Debug, Clone)]
enum Change {
    Upsert(Box<Source>),
    RemoveRawData {
        project: String,
        source_name: String,
        observatory: String,
        data_type: DataType,
    },
    DeleteSource {
        project: String,
        name: String,
    },
}

impl MemoryDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_source(&self, name: &str, project: &str) -> Option<Source> {
        self.state
            .read()
            .sources
            .get(&(project.to_string(), name.to_string()))
            .cloned()
    }

    pub fn source_names(&self, project: &str) -> Vec<String> {
        self.state
            .read()
            .sources
            .keys()
            .filter(|(p, _)| p == project)
            .map(|(_, n)| n.clone())
            .collect()
    }

    pub fn source_count(&self) -> usize {
        self.state.read().sources.len()
    }

    pub fn raw_data_count(&self) -> usize {
        self.state.read().sources.values().map(|s| s.raw_data.len()).sum()
    }

    /// Raw data records of one (source, observatory, data type).
    pub fn raw_data_count_for(&self, name: &str, observatory: &str, data_type: DataType) -> usize {
        self.state
            .read()
            .sources
            .values()
            .filter(|s| s.name == name)
            .flat_map(|s| &s.raw_data)
            .filter(|r| r.observatory.eq_ignore_ascii_case(observatory) && r.data_type == data_type)
            .count()
    }

    pub fn lightcurve_count(&self) -> usize {
        self.state
            .read()
            .sources
            .values()
            .map(|s| s.lightcurves.len())
            .sum()
    }
}

impl Persistence for MemoryDatabase {
    fn begin(&self) -> Box<dyn Transaction + '_> {
        Box::new(MemoryTransaction {
            db: self,
            changes: Vec::new(),
        })
    }
}

pub struct MemoryTransaction<'a> {
    db: &'a MemoryDatabase,
    changes: Vec<Change>,
}

impl MemoryTransaction<'_> {
    fn apply(state: &mut DbState, change: Change, touched: &mut Vec<(String, String)>) {
        match change {
            Change::Upsert(source) => {
                let key = (source.project.clone(), source.name.clone());
                let existing_id = state.sources.get(&key).and_then(|s| s.id);
                let mut stored = source.without_payload();
                stored.id = match existing_id.or(stored.id) {
                    Some(id) => Some(id),
                    None => Some(state.new_id()),
                };
                for raw in &mut stored.raw_data {
                    if raw.id.is_none() {
                        raw.id = Some(state.new_id());
                    }
                    raw.source_id = stored.id;
                }
                for lc in &mut stored.lightcurves {
                    if lc.id.is_none() {
                        lc.id = Some(state.new_id());
                    }
                    lc.source_id = stored.id;
                }
                state.sources.insert(key.clone(), stored);
                if !touched.contains(&key) {
                    touched.push(key);
                }
            }
            Change::RemoveRawData {
                project,
                source_name,
                observatory,
                data_type,
            } => {
                if let Some(source) = state.sources.get_mut(&(project, source_name)) {
                    source.remove_raw_data(&observatory, data_type);
                }
            }
            Change::DeleteSource { project, name } => {
                let key = (project, name);
                state.sources.remove(&key);
                touched.retain(|k| k != &key);
            }
        }
    }

    fn validate(source: &Source) -> Result<(), VirtObsError> {
        let duplicated = source
            .raw_data
            .iter()
            .map(|r| (r.observatory.to_lowercase(), r.data_type))
            .duplicates()
            .next();
        if let Some((obs, dt)) = duplicated {
            return Err(VirtObsError::Persistence(format!(
                "Source {} has more than one {dt} record from observatory {obs}",
                source.name
            )));
        }

        let incomplete_raw = source.raw_data.iter().any(|r| !r.location.is_complete());
        let incomplete_lc = source.lightcurves.iter().any(|l| !l.location.is_complete());
        if incomplete_raw || incomplete_lc {
            return Err(VirtObsError::Persistence(format!(
                "No filename or key for a dataset of source {}, save it before committing",
                source.name
            )));
        }
        Ok(())
    }
}

impl Transaction for MemoryTransaction<'_> {
    fn find_source(&self, name: &str, project: &str) -> Result<Option<Source>, VirtObsError> {
        Ok(self.db.get_source(name, project))
    }

    fn stage_source(&mut self, source: &Source) -> Result<(), VirtObsError> {
        self.changes.push(Change::Upsert(Box::new(source.without_payload())));
        Ok(())
    }

    fn remove_raw_data(&mut self, raw: &RawData, project: &str) -> Result<(), VirtObsError> {
        self.changes.push(Change::RemoveRawData {
            project: project.to_string(),
            source_name: raw.source_name.clone(),
            observatory: raw.observatory.clone(),
            data_type: raw.data_type,
        });
        Ok(())
    }

    fn delete_source(&mut self, name: &str, project: &str) -> Result<(), VirtObsError> {
        self.changes.push(Change::DeleteSource {
            project: project.to_string(),
            name: name.to_string(),
        });
        Ok(())
    }

    fn commit(self: Box<Self>) -> Result<Vec<Source>, VirtObsError> {
        let MemoryTransaction { db, changes } = *self;
        let mut guard = db.state.write();
        let mut next = guard.clone();
        let mut touched = Vec::new();
        let num_changes = changes.len();
        for change in changes {
            Self::apply(&mut next, change, &mut touched);
        }

        let committed: Vec<Source> = touched
            .iter()
            .filter_map(|k| next.sources.get(k))
            .cloned()
            .collect();
        for source in &committed {
            Self::validate(source)?;
        }

        *guard = next;
        debug!(changes = num_changes, sources = committed.len(), "transaction committed");
        Ok(committed)
    }

    fn rollback(self: Box<Self>) {
        debug!(changes = self.changes.len(), "transaction rolled back");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::AltData;
    use crate::dataset::DatasetLocation;

    fn source_with_raw(complete: bool) -> Source {
        let mut source = Source::new("star", "proj");
        let mut raw = RawData::new("star", "demo", DataType::Photometry, None, AltData::new()).unwrap();
        if complete {
            raw.location = DatasetLocation::new(None, Some("f.tables"), Some("star"));
        }
        source.attach_raw_data(raw);
        source
    }

    #[test]
    fn test_commit_assigns_ids() {
        let db = MemoryDatabase::new();
        let mut tx = db.begin();
        tx.stage_source(&source_with_raw(true)).unwrap();
        assert_eq!(db.source_count(), 0);
        let stored = tx.commit().unwrap();

        assert_eq!(stored.len(), 1);
        assert!(stored[0].id.is_some());
        assert_eq!(stored[0].raw_data[0].source_id, stored[0].id);
        assert_eq!(db.raw_data_count(), 1);
    }

    #[test]
    fn test_commit_requires_filename() {
        let db = MemoryDatabase::new();
        let mut tx = db.begin();
        tx.stage_source(&source_with_raw(false)).unwrap();
        assert!(matches!(tx.commit(), Err(VirtObsError::Persistence(_))));
        assert_eq!(db.source_count(), 0);
    }

    #[test]
    fn test_rollback_and_cascade() {
        let db = MemoryDatabase::new();
        let mut tx = db.begin();
        tx.stage_source(&source_with_raw(true)).unwrap();
        tx.rollback();
        assert_eq!(db.source_count(), 0);

        let mut tx = db.begin();
        tx.stage_source(&source_with_raw(true)).unwrap();
        tx.commit().unwrap();

        let mut tx = db.begin();
        tx.delete_source("star", "proj").unwrap();
        tx.commit().unwrap();
        assert_eq!(db.source_count(), 0);
        assert_eq!(db.raw_data_count(), 0);
    }

    #[test]
    fn test_remove_raw_data() {
        let db = MemoryDatabase::new();
        let source = source_with_raw(true);
        let mut tx = db.begin();
        tx.stage_source(&source).unwrap();
        tx.commit().unwrap();

        let mut tx = db.begin();
        let found = tx.find_source("star", "proj").unwrap().unwrap();
        tx.remove_raw_data(&found.raw_data[0], "proj").unwrap();
        tx.commit().unwrap();
        assert_eq!(db.raw_data_count_for("star", "demo", DataType::Photometry), 0);
        assert_eq!(db.source_count(), 1);
    }
}
