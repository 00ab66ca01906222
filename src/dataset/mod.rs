//! # Datasets and sources
//!
//! In-memory entities of the pipeline:
//! - [`Source`]: one catalog object, owning its raw datasets and lightcurves,
//! - [`RawData`]: a tabular payload as delivered by an observatory,
//! - [`Lightcurve`]: a reduced, per-filter, time-sorted photometric dataset.
//!
//! Datasets point at their on-disk copy through a [`DatasetLocation`] (folder, container
//! filename and key inside the container), resolved against a
//! [`TableStore`](crate::tables::TableStore).
pub mod columns;
pub mod lightcurve;
pub mod raw_data;
pub mod source;

use std::fmt;
use std::str::FromStr;

use camino::{Utf8Path, Utf8PathBuf};

use crate::tables::TableStore;
use crate::virtobs_errors::VirtObsError;

pub use lightcurve::Lightcurve;
pub use raw_data::RawData;
pub use source::Source;

/// Kind of data an observatory delivers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DataType {
    Photometry,
    Spectra,
    Images,
    Cutouts,
}

impl DataType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DataType::Photometry => "photometry",
            DataType::Spectra => "spectra",
            DataType::Images => "images",
            DataType::Cutouts => "cutouts",
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for DataType {
    type Err = VirtObsError;

    /// Parse loose spellings: `"phot"`, `"lightcurves"`, `"lcs"`, `"spec"`, `"img"`, ...
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_lowercase();
        let lower = lower.as_str();
        if lower.starts_with("phot") || lower.starts_with("lightcurve") || lower == "lcs" {
            Ok(DataType::Photometry)
        } else if lower.starts_with("spec") || lower == "sed" {
            Ok(DataType::Spectra)
        } else if lower.starts_with("im") {
            Ok(DataType::Images)
        } else if lower.starts_with("cutout") || lower.starts_with("thumb") {
            Ok(DataType::Cutouts)
        } else {
            Err(VirtObsError::InvalidInputValue(format!(
                "Unknown data type '{s}'"
            )))
        }
    }
}

/// Where a dataset lives on disk.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DatasetLocation {
    /// Folder of the container, absolute or relative to the store root.
    pub folder: Option<String>,
    filename: Option<String>,
    /// Key of the table inside the container.
    pub key: Option<String>,
}

impl DatasetLocation {
    pub fn new(folder: Option<&str>, filename: Option<&str>, key: Option<&str>) -> Self {
        let mut loc = DatasetLocation {
            folder: folder.map(str::to_string),
            filename: None,
            key: key.map(str::to_string),
        };
        if let Some(f) = filename {
            loc.set_filename(f);
        }
        loc
    }

    pub fn filename(&self) -> Option<&str> {
        self.filename.as_deref()
    }

    /// Set the container filename. A filename with a path moves that path into `folder`.
    pub fn set_filename(&mut self, filename: &str) {
        let path = Utf8Path::new(filename);
        match (path.parent(), path.file_name()) {
            (Some(parent), Some(name)) if !parent.as_str().is_empty() => {
                self.folder = Some(parent.to_string());
                self.filename = Some(name.to_string());
            }
            _ => self.filename = Some(filename.to_string()),
        }
    }

    pub fn clear_filename(&mut self) {
        self.filename = None;
    }

    pub fn is_complete(&self) -> bool {
        self.filename.is_some() && self.key.is_some()
    }

    /// Full path of the container.
    ///
    /// Arguments
    /// -----------------
    /// * `store`: store whose root resolves relative folders.
    /// * `observatory`: default folder name when no folder is set.
    pub fn container_path(
        &self,
        store: &TableStore,
        observatory: Option<&str>,
    ) -> Result<Utf8PathBuf, VirtObsError> {
        let filename = self
            .filename
            .as_deref()
            .ok_or_else(|| VirtObsError::Persistence("No filename set for dataset".into()))?;
        Ok(store
            .resolve_folder(self.folder.as_deref(), observatory)
            .join(filename))
    }

    pub fn key_or_err(&self) -> Result<&str, VirtObsError> {
        self.key
            .as_deref()
            .ok_or_else(|| VirtObsError::Persistence("No key set for dataset".into()))
    }
}
