//! # Keyed tabular file store
//!
//! Persistence of dataset payloads (Arrow [`RecordBatch`]es) on disk.
//!
//! ## Overview
//! -----------------
//! A **container** is a directory (named like a file, e.g. `RA123_DEMO_photometry.tables`)
//! holding one Parquet file per **key**. Many datasets of nearby sources share a container,
//! each under its own key, so a container plays the role of a multi-table file.
//!
//! Every key carries a free-form side channel, the dataset `altdata` mapping, stored as a
//! JSON document in the Parquet key/value metadata. It can be read with
//! [`TableStore::read_attrs`] without decoding any row.
//!
//! ## Layout
//! -----------------
//! ```text
//! <root>/<FOLDER>/RA123_DEMO_photometry.tables/
//!     demo_source_1.parquet
//!     demo_source_7.parquet
//! ```
//!
//! ## Concurrency
//! -----------------
//! The store itself takes no lock. Callers that share a container between threads
//! (the fetcher) serialize access through their file lock.
//!
//! ## Error Handling
//! -----------------
//! - Loading a key that is not in an existing container fails with
//!   [`VirtObsError::KeyNotFound`], which raw data loading reports as stale data.
//! - Saving over an existing key without `overwrite` fails with [`VirtObsError::FileExists`].
use std::fs::{self, File};
use std::sync::Arc;

use arrow_array::RecordBatch;
use arrow_schema::Schema;
use arrow_select::concat::concat_batches;
use camino::{Utf8Path, Utf8PathBuf};
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::arrow::ArrowWriter;
use parquet::basic::Compression;
use parquet::file::metadata::KeyValue;
use parquet::file::properties::WriterProperties;
use tracing::debug;

use crate::constants::{AltData, DEFAULT_DATA_FOLDER};
use crate::virtobs_errors::VirtObsError;

/// Parquet metadata entry holding the dataset side channel.
const ALTDATA_KEY: &str = "virtobs.altdata";
const KEY_EXTENSION: &str = "parquet";

#[derive(Debug, Clone)]
pub struct TableStore {
    root: Utf8PathBuf,
}

impl TableStore {
    /// Create a store whose relative folders are resolved under `root`.
    pub fn new(root: impl Into<Utf8PathBuf>) -> Self {
        TableStore { root: root.into() }
    }

    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    /// Resolve the folder holding the containers of a dataset.
    ///
    /// Arguments
    /// -----------------
    /// * `folder`: explicit folder. An absolute folder is used as is, a relative one is
    ///   joined to the store root.
    /// * `observatory`: used (in upper case) when no folder is given.
    ///
    /// Return
    /// ----------
    /// * The folder path. Without folder or observatory, `<root>/DATA`.
    pub fn resolve_folder(&self, folder: Option<&str>, observatory: Option<&str>) -> Utf8PathBuf {
        match folder {
            Some(f) if Utf8Path::new(f).is_absolute() => Utf8PathBuf::from(f),
            Some(f) => self.root.join(f),
            None => match observatory {
                Some(obs) if !obs.is_empty() => self.root.join(obs.to_uppercase()),
                _ => self.root.join(DEFAULT_DATA_FOLDER),
            },
        }
    }

    fn key_path(container: &Utf8Path, key: &str) -> Utf8PathBuf {
        container.join(format!("{key}.{KEY_EXTENSION}"))
    }

    /// True if the container exists on disk.
    pub fn exists(&self, container: &Utf8Path) -> bool {
        container.is_dir()
    }

    pub fn has_key(&self, container: &Utf8Path, key: &str) -> bool {
        Self::key_path(container, key).is_file()
    }

    /// Keys stored in a container, sorted.
    pub fn keys(&self, container: &Utf8Path) -> Result<Vec<String>, VirtObsError> {
        let mut keys = Vec::new();
        for entry in container.read_dir_utf8()? {
            let path = entry?.into_path();
            if path.extension() == Some(KEY_EXTENSION) {
                if let Some(stem) = path.file_stem() {
                    keys.push(stem.to_string());
                }
            }
        }
        keys.sort();
        Ok(keys)
    }

    /// Containers with the given extension directly under `folder`, sorted.
    pub fn list_containers(
        &self,
        folder: &Utf8Path,
        extension: &str,
    ) -> Result<Vec<Utf8PathBuf>, VirtObsError> {
        if !folder.is_dir() {
            return Ok(Vec::new());
        }
        let extension = extension.trim_start_matches('.');
        let mut containers: Vec<Utf8PathBuf> = folder
            .read_dir_utf8()?
            .filter_map(|e| e.ok().map(|e| e.into_path()))
            .filter(|p| p.is_dir() && p.extension() == Some(extension))
            .collect();
        containers.sort();
        Ok(containers)
    }

    /// Write one table and its side metadata under `key`.
    ///
    /// The table is first written to a temporary file in the same container and then
    /// renamed, so a crash never leaves a truncated table behind the key.
    ///
    /// Arguments
    /// -----------------
    /// * `container`: container directory, created if needed.
    /// * `key`: key of the table inside the container.
    /// * `batch`: the table.
    /// * `altdata`: side metadata, stored as JSON.
    /// * `overwrite`: replace an existing key instead of failing.
    pub fn save(
        &self,
        container: &Utf8Path,
        key: &str,
        batch: &RecordBatch,
        altdata: &AltData,
        overwrite: bool,
    ) -> Result<(), VirtObsError> {
        let target = Self::key_path(container, key);
        if target.exists() && !overwrite {
            return Err(VirtObsError::FileExists(target.to_string()));
        }
        fs::create_dir_all(container)?;

        let props = WriterProperties::builder()
            .set_compression(Compression::SNAPPY)
            .set_key_value_metadata(Some(vec![KeyValue::new(
                ALTDATA_KEY.to_string(),
                serde_json::to_string(altdata)?,
            )]))
            .build();

        let tmp = container.join(format!(".{key}.{KEY_EXTENSION}.tmp"));
        let write = || -> Result<(), VirtObsError> {
            let file = File::create(&tmp)?;
            let mut writer = ArrowWriter::try_new(file, batch.schema(), Some(props))?;
            writer.write(batch)?;
            writer.close()?;
            fs::rename(&tmp, &target)?;
            Ok(())
        };
        if let Err(e) = write() {
            let _ = fs::remove_file(&tmp);
            return Err(e);
        }

        debug!(container = %container, key, rows = batch.num_rows(), "saved table");
        Ok(())
    }

    fn open(
        &self,
        container: &Utf8Path,
        key: &str,
    ) -> Result<ParquetRecordBatchReaderBuilder<File>, VirtObsError> {
        if !self.exists(container) {
            return Err(VirtObsError::IoError(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("Container {container} does not exist"),
            )));
        }
        let path = Self::key_path(container, key);
        if !path.is_file() {
            return Err(VirtObsError::KeyNotFound {
                container: container.to_string(),
                key: key.to_string(),
            });
        }
        Ok(ParquetRecordBatchReaderBuilder::try_new(File::open(path)?)?)
    }

    fn altdata_of(builder: &ParquetRecordBatchReaderBuilder<File>) -> Result<AltData, VirtObsError> {
        let entry = builder
            .metadata()
            .file_metadata()
            .key_value_metadata()
            .and_then(|kv| kv.iter().find(|e| e.key == ALTDATA_KEY))
            .and_then(|e| e.value.as_deref());
        match entry {
            Some(json) => Ok(serde_json::from_str(json)?),
            None => Ok(AltData::new()),
        }
    }

    /// Read only the side metadata of a key.
    pub fn read_attrs(&self, container: &Utf8Path, key: &str) -> Result<AltData, VirtObsError> {
        Self::altdata_of(&self.open(container, key)?)
    }

    /// Read a table and its side metadata.
    pub fn load(
        &self,
        container: &Utf8Path,
        key: &str,
    ) -> Result<(RecordBatch, AltData), VirtObsError> {
        let builder = self.open(container, key)?;
        let altdata = Self::altdata_of(&builder)?;
        // Parquet key/value entries surface as schema metadata, keep them out of the table
        let schema = Arc::new(Schema::clone(builder.schema()).with_metadata(Default::default()));
        let batches = builder.build()?.collect::<Result<Vec<_>, _>>()?;
        let batch = concat_batches(&schema, &batches)?;
        debug!(container = %container, key, rows = batch.num_rows(), "loaded table");
        Ok((batch, altdata))
    }

    /// Remove a key. The container is removed too once it holds no key.
    ///
    /// Return
    /// ----------
    /// * `true` if the key existed.
    pub fn delete_key(&self, container: &Utf8Path, key: &str) -> Result<bool, VirtObsError> {
        let path = Self::key_path(container, key);
        if !path.is_file() {
            return Ok(false);
        }
        fs::remove_file(&path)?;
        if self.keys(container)?.is_empty() {
            fs::remove_dir_all(container)?;
        }
        Ok(true)
    }
}
