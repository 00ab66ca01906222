//! # Source resolution and fetch orchestration
//!
//! [`Fetcher`] ties one [`Observatory`] to a [`Catalog`], a [`Persistence`] backend and a
//! [`TableStore`]. For each catalog row it either reuses what was persisted by an earlier
//! run or asks the observatory for fresh data.
//!
//! ## Per row state machine
//! -----------------
//! For every configured data type:
//!
//! 1. no raw data record → fetch.
//! 2. record present, container missing → [`VirtObsError::Consistency`] (never repaired
//!    automatically, the database and the data folder disagree).
//! 3. record present, container present, key missing → stale: the record is removed and
//!    the data is fetched again.
//! 4. record present and loadable, `check_download_pars` set and the recorded download
//!    parameters differ from the current ones → stale, fetch again.
//! 5. otherwise the loaded payload is reused.
//!
//! With `save`, new payloads are written to disk and the source is committed. Any failure
//! during that step rolls the transaction back and removes the files written by this call.
//! After a successful commit the files of records replaced in steps 3 and 4 are deleted,
//! unless the new payload went to the same key.
//!
//! All disk reads and writes of payloads go through the shared [`FileLock`], database work
//! does not.
mod batch;
mod populate;
pub mod progress;

use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;
use tracing::{debug, warn};

use crate::catalog::{Catalog, CatalogRow};
use crate::conversion::ra_components;
use crate::database::{Persistence, Transaction};
use crate::dataset::{DataType, RawData, Source};
use crate::observatory::Observatory;
use crate::parameters::{ParMap, ParValue};
use crate::tables::TableStore;
use crate::virtobs_errors::VirtObsError;

/// Process wide lock serializing payload file access.
pub type FileLock = Arc<Mutex<()>>;

pub fn new_file_lock() -> FileLock {
    Arc::new(Mutex::new(()))
}

/// Outcome of the per row lookup, before anything is written.
struct Resolved {
    source: Source,
    /// Data types fetched by this call.
    new_data: Vec<DataType>,
    /// Persisted records dropped as stale, their files are still on disk.
    replaced: Vec<RawData>,
}

pub struct Fetcher {
    observatory: Arc<dyn Observatory>,
    catalog: Arc<dyn Catalog>,
    database: Arc<dyn Persistence>,
    store: TableStore,
    file_lock: FileLock,
    project: String,
    sources: Vec<Source>,
    datasets: Vec<RawData>,
}

impl Fetcher {
    pub fn new(
        observatory: Arc<dyn Observatory>,
        catalog: Arc<dyn Catalog>,
        database: Arc<dyn Persistence>,
        store: TableStore,
        file_lock: FileLock,
        project: &str,
    ) -> Self {
        Fetcher {
            observatory,
            catalog,
            database,
            store,
            file_lock,
            project: project.to_string(),
            sources: Vec::new(),
            datasets: Vec::new(),
        }
    }

    pub fn observatory(&self) -> &dyn Observatory {
        self.observatory.as_ref()
    }

    pub fn catalog(&self) -> &dyn Catalog {
        self.catalog.as_ref()
    }

    pub fn store(&self) -> &TableStore {
        &self.store
    }

    pub fn project(&self) -> &str {
        &self.project
    }

    /// Sources kept in memory by the last [`Fetcher::fetch_batch`].
    pub fn sources(&self) -> &[Source] {
        &self.sources
    }

    /// Raw datasets of this observatory kept in memory by the last [`Fetcher::fetch_batch`].
    pub fn datasets(&self) -> &[RawData] {
        &self.datasets
    }

    /// Resolve one catalog row into a source holding loaded raw data of every data type.
    ///
    /// Arguments
    /// -----------------
    /// * `row`: the catalog entry.
    /// * `save`: write new payloads to disk and commit the source. Without it nothing is
    ///   persisted (useful for debugging).
    /// * `fetch_args`: per call overrides passed to the observatory fetch.
    /// * `dataset_args`: `folder`, `filename` and/or `key` of newly fetched datasets.
    ///
    /// Return
    /// ----------
    /// * The source with its raw data attached and loaded. When saved, it carries the
    ///   database ids.
    ///
    /// Errors
    /// ----------
    /// * [`VirtObsError::Consistency`] when a persisted record points at a missing file.
    /// * Any fetch, disk or commit error, after rollback and removal of the new files.
    pub fn check_and_fetch_source(
        &self,
        row: &CatalogRow,
        save: bool,
        fetch_args: &ParMap,
        dataset_args: &ParMap,
    ) -> Result<Source, VirtObsError> {
        let mut tx = self.database.begin();
        let mut resolved = match self.resolve_source(tx.as_mut(), row, fetch_args, dataset_args) {
            Ok(resolved) => resolved,
            Err(e) => {
                tx.rollback();
                return Err(e);
            }
        };

        if !save {
            tx.rollback();
            return Ok(resolved.source);
        }
        self.persist(tx, &mut resolved.source, &resolved.new_data)?;
        self.remove_replaced(&resolved.source, &resolved.replaced);
        Ok(resolved.source)
    }

    fn resolve_source(
        &self,
        tx: &mut dyn Transaction,
        row: &CatalogRow,
        fetch_args: &ParMap,
        dataset_args: &ParMap,
    ) -> Result<Resolved, VirtObsError> {
        let pars = self.observatory.pars();
        let obs = self.observatory.name();
        let check_download_pars = pars.check_download_pars()?;
        let download_pars = pars.download_pars(fetch_args)?;

        let mut source = match tx.find_source(&row.name, &self.project)? {
            Some(found) => {
                debug!(source = %row.name, "found source in database");
                found
            }
            None => Source::from_catalog_row(row, &self.project),
        };
        if source.cat_row.is_none() {
            source.cat_row = Some(row.clone());
        }

        let source_name = source.name.clone();
        let mut new_data = Vec::new();
        let mut replaced = Vec::new();
        for data_type in pars.data_types()? {
            let mut stale = false;
            if let Some(raw) = source.get_raw_data_mut(obs, data_type) {
                let loaded = {
                    let _guard = self.file_lock.lock();
                    if !raw.check_file_exists(&self.store) {
                        let path = raw
                            .container_path(&self.store)
                            .map(|p| p.to_string())
                            .unwrap_or_default();
                        return Err(VirtObsError::Consistency(format!(
                            "{data_type} data for source {source_name} from {obs} exists in DB but file does not exist: {path}"
                        )));
                    }
                    raw.load(&self.store)
                };
                match loaded {
                    Ok(()) => {}
                    Err(e @ VirtObsError::StaleData(_)) => {
                        warn!(source = %source_name, observatory = obs, error = %e, "stale raw data record, fetching again");
                        stale = true;
                    }
                    Err(e) => return Err(e),
                }

                if !stale && check_download_pars && !same_download_pars(raw, &download_pars) {
                    debug!(source = %source_name, observatory = obs, "download parameters changed, fetching again");
                    stale = true;
                }
            }

            if stale {
                if let Some(old) = source.remove_raw_data(obs, data_type) {
                    if old.id.is_some() {
                        tx.remove_raw_data(&old, &self.project)?;
                        replaced.push(old.without_payload());
                    }
                }
            }

            if source.get_raw_data(obs, data_type).is_none() {
                debug!(source = %source_name, observatory = obs, %data_type, "fetching from observatory");
                let (data, mut altdata) = self.observatory.fetch_data_from_observatory(row, fetch_args)?;
                altdata.insert("cat_row".into(), row.to_json());
                altdata.insert("download_pars".into(), Value::Object(download_pars.clone()));

                let mut raw = RawData::new(&source_name, obs, data_type, Some(data), altdata)?;
                if let Some(folder) = pars.data_folder()? {
                    raw.location.folder = Some(folder.to_string());
                }
                apply_dataset_args(&mut raw, dataset_args)?;
                source.attach_raw_data(raw);
                new_data.push(data_type);
            }
        }
        Ok(Resolved {
            source,
            new_data,
            replaced,
        })
    }

    /// Write the new payloads, stage the source and commit.
    fn persist(
        &self,
        mut tx: Box<dyn Transaction + '_>,
        source: &mut Source,
        new_data: &[DataType],
    ) -> Result<(), VirtObsError> {
        let mut written = Vec::new();
        let staged = self
            .save_new_data(source, new_data, &mut written)
            .and_then(|()| tx.stage_source(source));

        let committed = match staged {
            Ok(()) => tx.commit(),
            Err(e) => {
                tx.rollback();
                Err(e)
            }
        };

        match committed {
            Ok(stored) => {
                if let Some(copy) = stored.iter().find(|s| s.name == source.name) {
                    source.adopt_ids(copy);
                }
                Ok(())
            }
            Err(e) => {
                self.remove_orphans(&written);
                Err(e)
            }
        }
    }

    fn save_new_data(
        &self,
        source: &mut Source,
        new_data: &[DataType],
        written: &mut Vec<RawData>,
    ) -> Result<(), VirtObsError> {
        if new_data.is_empty() {
            return Ok(());
        }
        let pars = self.observatory.pars();
        let obs = self.observatory.name();
        let ra = ra_components(source.ra, pars.save_ra_minutes()?, pars.save_ra_seconds()?);
        let overwrite = pars.overwrite_files()?;
        let prefix = pars.filekey_prefix()?;
        let suffix = pars.filekey_suffix()?;
        let source_name = source.name.clone();

        let _guard = self.file_lock.lock();
        for &data_type in new_data {
            let raw = source.get_raw_data_mut(obs, data_type).ok_or_else(|| {
                VirtObsError::Consistency(format!(
                    "{data_type} data from {obs} vanished from source {source_name} before saving"
                ))
            })?;
            raw.save(&self.store, overwrite, &ra, prefix, suffix)?;
            written.push(raw.without_payload());
        }
        Ok(())
    }

    /// Delete the files of replaced records unless the new data was written to the same key.
    fn remove_replaced(&self, source: &Source, replaced: &[RawData]) {
        if replaced.is_empty() {
            return;
        }
        let obs = self.observatory.name();
        let _guard = self.file_lock.lock();
        for old in replaced {
            let same_key = source.get_raw_data(obs, old.data_type).is_some_and(|new| {
                new.location.key == old.location.key
                    && new.container_path(&self.store).ok() == old.container_path(&self.store).ok()
            });
            if same_key {
                continue;
            }
            match old.delete_data_from_disk(&self.store) {
                Ok(true) => debug!(source = %old.source_name, key = ?old.location.key, "removed file of replaced raw data"),
                Ok(false) => {}
                Err(e) => warn!(source = %old.source_name, error = %e, "could not remove file of replaced raw data"),
            }
        }
    }

    fn remove_orphans(&self, written: &[RawData]) {
        let _guard = self.file_lock.lock();
        for raw in written {
            if let Err(e) = raw.delete_data_from_disk(&self.store) {
                warn!(source = %raw.source_name, error = %e, "could not remove file of failed save");
            }
        }
    }
}

/// True if every watched download parameter matches the value recorded with the data.
fn same_download_pars(raw: &RawData, current: &serde_json::Map<String, Value>) -> bool {
    match raw.download_pars() {
        Some(recorded) => current
            .iter()
            .all(|(k, v)| recorded.get(k).unwrap_or(&Value::Null) == v),
        None => current.is_empty(),
    }
}

fn apply_dataset_args(raw: &mut RawData, dataset_args: &ParMap) -> Result<(), VirtObsError> {
    for (name, value) in dataset_args {
        let text = match value {
            ParValue::Str(s) => s.as_str(),
            other => {
                return Err(VirtObsError::InvalidInputValue(format!(
                    "dataset argument '{name}' must be a string, got {other:?}"
                )))
            }
        };
        match name.as_str() {
            "folder" => raw.location.folder = Some(text.to_string()),
            "filename" => raw.location.set_filename(text),
            "key" => raw.location.key = Some(text.to_string()),
            _ => {
                return Err(VirtObsError::InvalidInputValue(format!(
                    "Unknown dataset argument '{name}'"
                )))
            }
        }
    }
    Ok(())
}
