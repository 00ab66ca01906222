//! # Source catalogs
//!
//! A catalog is the list of targets the pipeline downloads data for. The fetcher only needs
//! row access ([`Catalog`]); [`CsvCatalog`] is the file-backed implementation.
//!
//! ## CSV layout
//! -----------------
//! Column names are configurable through [`ColumnMap`]. Right ascension and declination
//! accept decimal degrees or sexagesimal strings (`HH:MM:SS.S`, `±DD:MM:SS.S`). The alias
//! column holds `;`-separated names.
use std::collections::HashMap;

use ahash::RandomState;
use camino::Utf8Path;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::constants::{Degree, Magnitude};
use crate::conversion::{dec2deg, ra2deg};
use crate::virtobs_errors::VirtObsError;

pub type FastHashMap<K, V> = HashMap<K, V, RandomState>;

/// One catalog entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogRow {
    pub index: usize,
    pub name: String,
    pub ra: Degree,
    pub dec: Degree,
    pub mag: Option<Magnitude>,
    pub mag_err: Option<Magnitude>,
    pub filter: Option<String>,
    #[serde(default)]
    pub alias: Vec<String>,
}

impl CatalogRow {
    pub fn new(index: usize, name: &str, ra: Degree, dec: Degree) -> Self {
        CatalogRow {
            index,
            name: name.to_string(),
            ra,
            dec,
            mag: None,
            mag_err: None,
            filter: None,
            alias: Vec::new(),
        }
    }

    pub fn with_mag(mut self, mag: Magnitude, mag_err: Magnitude, filter: &str) -> Self {
        self.mag = Some(mag);
        self.mag_err = Some(mag_err);
        self.filter = Some(filter.to_string());
        self
    }

    /// JSON rendering stored in the raw data `altdata["cat_row"]`.
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

/// Field tuple of a catalog row: index, name, ra, dec, mag, mag_err, filter, alias.
pub type RowValues<'a> = (
    usize,
    &'a str,
    Degree,
    Degree,
    Option<Magnitude>,
    Option<Magnitude>,
    Option<&'a str>,
    &'a [String],
);

/// How to find a row.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RowLocator<'a> {
    /// Position in the catalog.
    Number(usize),
    Name(&'a str),
}

pub trait Catalog: Send + Sync {
    fn name(&self) -> &str;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Fetch one row, failing with [`VirtObsError::RowNotFound`].
    fn get_row(&self, locator: RowLocator<'_>) -> Result<&CatalogRow, VirtObsError>;

    fn values_from_row<'a>(&self, row: &'a CatalogRow) -> RowValues<'a> {
        (
            row.index,
            &row.name,
            row.ra,
            row.dec,
            row.mag,
            row.mag_err,
            row.filter.as_deref(),
            &row.alias,
        )
    }
}

/// Column names of a CSV catalog.
#[derive(Debug, Clone)]
pub struct ColumnMap {
    pub name: String,
    pub ra: String,
    pub dec: String,
    pub mag: String,
    pub mag_err: String,
    pub filter: String,
    pub alias: String,
}

impl Default for ColumnMap {
    fn default() -> Self {
        ColumnMap {
            name: "name".into(),
            ra: "ra".into(),
            dec: "dec".into(),
            mag: "mag".into(),
            mag_err: "mag_err".into(),
            filter: "filter".into(),
            alias: "alias".into(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CsvCatalog {
    name: String,
    rows: Vec<CatalogRow>,
    by_name: FastHashMap<String, usize>,
}

impl CsvCatalog {
    /// Build a catalog from rows already in memory. Row indices are reassigned by position.
    pub fn from_rows(name: &str, rows: Vec<CatalogRow>) -> Self {
        let rows: Vec<CatalogRow> = rows
            .into_iter()
            .enumerate()
            .map(|(i, mut r)| {
                r.index = i;
                r
            })
            .collect();
        let by_name = rows
            .iter()
            .enumerate()
            .map(|(i, r)| (r.name.clone(), i))
            .collect();
        CsvCatalog {
            name: name.to_string(),
            rows,
            by_name,
        }
    }

    /// Read a catalog from a CSV file.
    ///
    /// Arguments
    /// -----------------
    /// * `path`: CSV file with a header line.
    /// * `columns`: names of the columns to read. Only name, ra and dec are mandatory.
    ///
    /// Return
    /// ----------
    /// * The catalog, named after the file stem.
    pub fn from_path(path: &Utf8Path, columns: &ColumnMap) -> Result<Self, VirtObsError> {
        let mut reader = csv::Reader::from_path(path)?;
        let headers = reader.headers()?.clone();
        let position = |col: &str| headers.iter().position(|h| h.trim() == col);
        let required = |col: &str| {
            position(col).ok_or_else(|| {
                VirtObsError::Configuration(format!("Catalog {path} has no column '{col}'"))
            })
        };

        let name_idx = required(&columns.name)?;
        let ra_idx = required(&columns.ra)?;
        let dec_idx = required(&columns.dec)?;
        let mag_idx = position(&columns.mag);
        let mag_err_idx = position(&columns.mag_err);
        let filter_idx = position(&columns.filter);
        let alias_idx = position(&columns.alias);

        let optional_f64 = |record: &csv::StringRecord, idx: Option<usize>| {
            idx.and_then(|i| record.get(i))
                .and_then(|v| v.trim().parse::<f64>().ok())
        };

        let mut rows = Vec::new();
        for (i, record) in reader.records().enumerate() {
            let record = record?;
            let field = |idx: usize| record.get(idx).unwrap_or("").trim();
            rows.push(CatalogRow {
                index: i,
                name: field(name_idx).to_string(),
                ra: ra2deg(field(ra_idx))?,
                dec: dec2deg(field(dec_idx))?,
                mag: optional_f64(&record, mag_idx),
                mag_err: optional_f64(&record, mag_err_idx),
                filter: filter_idx
                    .map(field)
                    .filter(|f| !f.is_empty())
                    .map(str::to_string),
                alias: alias_idx
                    .map(field)
                    .map(|a| {
                        a.split(';')
                            .map(str::trim)
                            .filter(|s| !s.is_empty())
                            .map(str::to_string)
                            .collect()
                    })
                    .unwrap_or_default(),
            });
        }
        debug!(catalog = %path, rows = rows.len(), "loaded catalog");

        Ok(Self::from_rows(path.file_stem().unwrap_or("catalog"), rows))
    }

    pub fn rows(&self) -> &[CatalogRow] {
        &self.rows
    }
}

impl Catalog for CsvCatalog {
    fn name(&self) -> &str {
        &self.name
    }

    fn len(&self) -> usize {
        self.rows.len()
    }

    fn get_row(&self, locator: RowLocator<'_>) -> Result<&CatalogRow, VirtObsError> {
        let idx = match locator {
            RowLocator::Number(n) => Some(n),
            RowLocator::Name(name) => self.by_name.get(name).copied(),
        };
        idx.and_then(|i| self.rows.get(i))
            .ok_or_else(|| VirtObsError::RowNotFound(format!("{locator:?} in catalog {}", self.name)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_csv_catalog() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "name,ra,dec,mag,mag_err,filter,alias").unwrap();
        writeln!(file, "star1,10.5,-20.25,17.1,0.05,R,a;b").unwrap();
        writeln!(file, "star2,01:00:00,+30:30:00,,,,").unwrap();
        let path = Utf8Path::from_path(file.path()).unwrap();

        let cat = CsvCatalog::from_path(path, &ColumnMap::default()).unwrap();
        assert_eq!(cat.len(), 2);

        let row = cat.get_row(RowLocator::Name("star1")).unwrap();
        assert_eq!(row.mag, Some(17.1));
        assert_eq!(row.alias, vec!["a".to_string(), "b".to_string()]);

        let row = cat.get_row(RowLocator::Number(1)).unwrap();
        assert_eq!(row.ra, 15.0);
        assert_eq!(row.dec, 30.5);
        assert_eq!(row.mag, None);
        assert_eq!(row.filter, None);

        let (index, name, ..) = cat.values_from_row(row);
        assert_eq!((index, name), (1, "star2"));

        assert!(matches!(
            cat.get_row(RowLocator::Name("nope")),
            Err(VirtObsError::RowNotFound(_))
        ));
    }
}
