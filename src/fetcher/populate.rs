use camino::Utf8Path;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::catalog::{CatalogRow, RowLocator};
use crate::constants::LIGHTCURVE_SUFFIX;
use crate::dataset::{DataType, DatasetLocation, Lightcurve, RawData, Source};
use crate::fetcher::Fetcher;
use crate::observatory::Reduced;
use crate::parameters::ParMap;
use crate::virtobs_errors::VirtObsError;

static NUMBER_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d+").expect("valid number regex"));

/// How a dataset found on disk points at its catalog row.
#[derive(Debug, Clone, PartialEq, Eq)]
enum CatalogId {
    Name(String),
    Number(usize),
}

impl CatalogId {
    fn locator(&self) -> RowLocator<'_> {
        match self {
            CatalogId::Name(name) => RowLocator::Name(name),
            CatalogId::Number(n) => RowLocator::Number(*n),
        }
    }
}

impl Fetcher {
    /// Register datasets already present in the data folder.
    ///
    /// Every key of every container found in the observatory folder is matched to a
    /// catalog row (`catalog_matching` = `name` or `number`) using either the key itself or
    /// one of its stored attributes (`dataset_identifier` = `key` or `attribute`). Rows whose
    /// source is already in the database are skipped. For the others a source and a raw
    /// photometry record pointing at the existing file are created, the data is reduced to
    /// lightcurves, the lightcurves are saved and the source is committed.
    ///
    /// Arguments
    /// -----------------
    /// * `extension`: container extension to scan for, e.g. `"tables"`.
    /// * `num_files`: read at most this many containers (`None` for all).
    /// * `num_sources`: read at most this many keys per container (`None` for all).
    ///
    /// Return
    /// ----------
    /// * The number of sources created.
    pub fn populate_sources(
        &self,
        extension: &str,
        num_files: Option<usize>,
        num_sources: Option<usize>,
    ) -> Result<usize, VirtObsError> {
        let pars = self.observatory.pars();
        let matching = pars.catalog_matching()?.to_string();
        if matching != "name" && matching != "number" {
            return Err(VirtObsError::Configuration(format!(
                "catalog_matching must be either 'number' or 'name', got '{matching}'"
            )));
        }
        let folder = self
            .store
            .resolve_folder(pars.data_folder()?, Some(self.observatory.name()));
        info!(folder = %folder, "reading from data folder");

        let mut created = 0;
        let containers = self.store.list_containers(&folder, extension)?;
        let raw_containers = containers
            .iter()
            .filter(|c| !c.file_stem().is_some_and(|s| s.ends_with(LIGHTCURVE_SUFFIX)));
        for container in raw_containers.take(num_files.unwrap_or(usize::MAX)) {
            let keys = {
                let _guard = self.file_lock.lock();
                self.store.keys(container)?
            };
            for key in keys.iter().take(num_sources.unwrap_or(usize::MAX)) {
                if self.register_dataset(container, key, &matching)? {
                    created += 1;
                }
            }
        }
        info!(created, "done populating sources");
        Ok(created)
    }

    /// Create and commit the source of one stored dataset. `false` when skipped.
    fn register_dataset(
        &self,
        container: &Utf8Path,
        key: &str,
        matching: &str,
    ) -> Result<bool, VirtObsError> {
        let (batch, altdata) = {
            let _guard = self.file_lock.lock();
            self.store.load(container, key)?
        };
        if batch.num_rows() == 0 {
            debug!(container = %container, key, "empty dataset, skipping");
            return Ok(false);
        }

        let cat_id = self.dataset_identifier(key, &altdata, matching)?;
        let row: CatalogRow = self.catalog.get_row(cat_id.locator())?.clone();

        let mut tx = self.database.begin();
        if tx.find_source(&row.name, &self.project)?.is_some() {
            tx.rollback();
            return Ok(false);
        }

        let obs = self.observatory.name();
        let mut raw = RawData::new(&row.name, obs, DataType::Photometry, Some(batch), altdata)?;
        raw.location = DatasetLocation::new(
            container.parent().map(|p| p.as_str()),
            container.file_name(),
            Some(key),
        );

        let mut source = Source::from_catalog_row(&row, &self.project);
        source.attach_raw_data(raw);

        let lightcurves = match self
            .observatory
            .reduce(&mut source, DataType::Photometry, &ParMap::new())
        {
            Ok(Reduced::Lightcurves(lcs)) => lcs,
            Ok(Reduced::Datasets(_)) => Vec::new(),
            Err(e) => {
                tx.rollback();
                return Err(e);
            }
        };

        let overwrite = self.observatory.pars().overwrite_files()?;
        let mut written: Vec<&Lightcurve> = Vec::new();
        let saved = {
            let _guard = self.file_lock.lock();
            lightcurves.iter().try_for_each(|lc| {
                lc.save(&self.store, overwrite)?;
                written.push(lc);
                Ok::<(), VirtObsError>(())
            })
        };

        let committed = match saved.and_then(|()| tx.stage_source(&source)) {
            Ok(()) => tx.commit(),
            Err(e) => {
                tx.rollback();
                Err(e)
            }
        };
        if let Err(e) = committed {
            let _guard = self.file_lock.lock();
            for lc in written {
                if let Err(err) = lc.delete_data_from_disk(&self.store) {
                    warn!(source = %row.name, error = %err, "could not remove lightcurve of failed commit");
                }
            }
            return Err(e);
        }

        debug!(source = %row.name, lightcurves = lightcurves.len(), "registered source from disk");
        Ok(true)
    }

    fn dataset_identifier(
        &self,
        key: &str,
        altdata: &serde_json::Map<String, Value>,
        matching: &str,
    ) -> Result<CatalogId, VirtObsError> {
        let pars = self.observatory.pars();
        let value = match pars.dataset_identifier()? {
            "key" => Value::String(key.to_string()),
            "attribute" => {
                let attribute = pars.dataset_attribute()?;
                altdata.get(attribute).cloned().ok_or_else(|| {
                    VirtObsError::InvalidInputValue(format!(
                        "Dataset '{key}' has no attribute '{attribute}'"
                    ))
                })?
            }
            other => {
                return Err(VirtObsError::Configuration(format!(
                    "dataset_identifier must be \"attribute\" or \"key\", got '{other}'"
                )))
            }
        };

        match (matching, value) {
            ("name", Value::String(s)) => Ok(CatalogId::Name(s)),
            ("name", other) => Ok(CatalogId::Name(other.to_string())),
            (_, Value::Number(n)) => n.as_u64().map(|n| CatalogId::Number(n as usize)).ok_or_else(|| {
                VirtObsError::InvalidInputValue(format!("Dataset '{key}' has an invalid catalog number {n}"))
            }),
            (_, Value::String(s)) => NUMBER_RE
                .find(&s)
                .and_then(|m| m.as_str().parse().ok())
                .map(CatalogId::Number)
                .ok_or_else(|| {
                    VirtObsError::InvalidInputValue(format!(
                        "No catalog number found in dataset identifier '{s}'"
                    ))
                }),
            (_, other) => Err(VirtObsError::InvalidInputValue(format!(
                "Cannot read a catalog number from {other}"
            ))),
        }
    }
}
