//! Raw datasets, as delivered by an observatory.
use arrow_array::RecordBatch;
use hifitime::Epoch;
use itertools::Itertools;
use serde_json::Value;

use crate::constants::{AltData, CONTAINER_EXTENSION};
use crate::conversion::RaComponents;
use crate::dataset::columns::mjd_column;
use crate::dataset::{DataType, DatasetLocation};
use crate::tables::TableStore;
use crate::virtobs_errors::VirtObsError;

/// A raw tabular payload plus its bookkeeping.
///
/// The payload (`data`) is only held in memory. The persisted record keeps the
/// [`DatasetLocation`] and the summary fields (`time_start`, `time_end`, `num_points`),
/// and the payload is reloaded from the [`TableStore`] on demand.
#[derive(Debug, Clone)]
pub struct RawData {
    /// Database id, `None` until committed.
    pub id: Option<u64>,
    pub source_name: String,
    pub source_id: Option<u64>,
    pub observatory: String,
    pub data_type: DataType,
    pub location: DatasetLocation,
    /// Free-form side metadata. Holds `download_pars` and `cat_row` for fetched data.
    pub altdata: AltData,
    pub time_start: Option<Epoch>,
    pub time_end: Option<Epoch>,
    pub num_points: usize,
    data: Option<RecordBatch>,
}

impl RawData {
    pub fn new(
        source_name: &str,
        observatory: &str,
        data_type: DataType,
        data: Option<RecordBatch>,
        altdata: AltData,
    ) -> Result<Self, VirtObsError> {
        let mut raw = RawData {
            id: None,
            source_name: source_name.to_string(),
            source_id: None,
            observatory: observatory.to_lowercase(),
            data_type,
            location: DatasetLocation::default(),
            altdata,
            time_start: None,
            time_end: None,
            num_points: 0,
            data: None,
        };
        if let Some(batch) = data {
            raw.set_data(batch)?;
        }
        Ok(raw)
    }

    /// Attach a payload and refresh the summary fields from it.
    pub fn set_data(&mut self, batch: RecordBatch) -> Result<(), VirtObsError> {
        self.num_points = batch.num_rows();
        let (start, end) = match mjd_column(&batch)? {
            Some(mjd) => mjd
                .iter()
                .copied()
                .filter(|t| !t.is_nan())
                .minmax_by(f64::total_cmp)
                .into_option()
                .map_or((None, None), |(lo, hi)| {
                    (Some(Epoch::from_mjd_utc(lo)), Some(Epoch::from_mjd_utc(hi)))
                }),
            None => (None, None),
        };
        self.time_start = start;
        self.time_end = end;
        self.data = Some(batch);
        Ok(())
    }

    pub fn data(&self) -> Option<&RecordBatch> {
        self.data.as_ref()
    }

    pub fn is_loaded(&self) -> bool {
        self.data.is_some()
    }

    /// Drop the in-memory payload, keeping the record.
    pub fn unload(&mut self) {
        self.data = None;
    }

    /// A copy without the payload, as stored by the persistence layer.
    pub fn without_payload(&self) -> Self {
        RawData {
            data: None,
            ..self.clone()
        }
    }

    pub fn download_pars(&self) -> Option<&serde_json::Map<String, Value>> {
        self.altdata.get("download_pars").and_then(Value::as_object)
    }

    /// Default container name: `RA123[_45m][_07s]_DEMO_photometry.tables`.
    ///
    /// Without a right ascension the source name replaces the RA prefix.
    pub fn default_filename(&self, ra: &RaComponents) -> String {
        let prefix = match ra.ra_deg {
            Some(deg) => {
                let mut p = format!("RA{deg:03}");
                if let Some(m) = ra.ra_minute {
                    p.push_str(&format!("_{m:02}m"));
                }
                if let Some(s) = ra.ra_second {
                    p.push_str(&format!("_{s:02}s"));
                }
                p
            }
            None => self.source_name.clone(),
        };
        format!(
            "{prefix}_{}_{}.{CONTAINER_EXTENSION}",
            self.observatory.to_uppercase(),
            self.data_type
        )
    }

    pub fn container_path(&self, store: &TableStore) -> Result<camino::Utf8PathBuf, VirtObsError> {
        self.location.container_path(store, Some(&self.observatory))
    }

    /// True if the record points at an existing container.
    pub fn check_file_exists(&self, store: &TableStore) -> bool {
        self.container_path(store)
            .map(|p| store.exists(&p))
            .unwrap_or(false)
    }

    /// Load the payload (and the stored altdata) from disk.
    ///
    /// A container without the record key gives [`VirtObsError::StaleData`].
    pub fn load(&mut self, store: &TableStore) -> Result<(), VirtObsError> {
        let container = self.container_path(store)?;
        let key = self.location.key_or_err()?.to_string();
        let (batch, altdata) = store.load(&container, &key).map_err(|e| match e {
            VirtObsError::KeyNotFound { container, key } => VirtObsError::StaleData(format!(
                "{} data for source {} from {}: no key '{key}' in {container}",
                self.data_type, self.source_name, self.observatory
            )),
            other => other,
        })?;
        self.set_data(batch)?;
        for (k, v) in altdata {
            self.altdata.entry(k).or_insert(v);
        }
        Ok(())
    }

    /// Write the payload to disk, generating the filename and key when missing.
    ///
    /// Arguments
    /// -----------------
    /// * `store`: file store.
    /// * `overwrite`: replace an existing key.
    /// * `ra`: positional components used for the default filename.
    /// * `key_prefix`, `key_suffix`: wrap the source name in the default key.
    pub fn save(
        &mut self,
        store: &TableStore,
        overwrite: bool,
        ra: &RaComponents,
        key_prefix: &str,
        key_suffix: &str,
    ) -> Result<(), VirtObsError> {
        let batch = self.data.as_ref().ok_or_else(|| {
            VirtObsError::Persistence(format!(
                "No data to save for source {} ({})",
                self.source_name, self.observatory
            ))
        })?;
        if self.location.filename().is_none() {
            let filename = self.default_filename(ra);
            self.location.set_filename(&filename);
        }
        if self.location.key.is_none() {
            self.location.key = Some(format!("{key_prefix}{}{key_suffix}", self.source_name));
        }
        let container = self.container_path(store)?;
        store.save(
            &container,
            self.location.key_or_err()?,
            batch,
            &self.altdata,
            overwrite,
        )
    }

    /// Remove the payload from disk. Missing files are not an error.
    pub fn delete_data_from_disk(&self, store: &TableStore) -> Result<bool, VirtObsError> {
        match (self.container_path(store), self.location.key.as_deref()) {
            (Ok(container), Some(key)) => store.delete_key(&container, key),
            _ => Ok(false),
        }
    }
}
