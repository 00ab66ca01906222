//! # Dataset reduction engine
//!
//! Turns raw photometric datasets into analysis-ready [`Lightcurve`]s.
//!
//! ## Overview
//! -----------------
//! [`reduce_to_lightcurves`] performs, in order:
//! 1. input validation (photometry only, payload must be loaded),
//! 2. optional rejection of whole datasets whose median magnitude is far from the
//!    catalog magnitude of the source (`mag_range`),
//! 3. normalization of every dataset to the standard column layout
//!    (`mjd`, `mag`, `mag_err`, `filter`, `flag`, `exptime`) and concatenation,
//! 4. derivation of `flux`, `flux_err` and `snr` from the magnitudes,
//! 5. a split by filter (first appearance order), a stable sort by time, and the optional
//!    removal of flagged rows,
//! 6. statistics per lightcurve (see [`Lightcurve::calc_stats`]),
//! 7. numbering (`reduction_number` / `reduction_total`) after sorting by start time.
//!
//! Metadata shared by all outputs is carried by [`InitKwargs`]; only attributes identical
//! across all the input datasets are kept.
//!
//! ## Parameters
//! -----------------
//! Tunables live in [`ReducerParams`], built either from the observatory `reducer`
//! parameter mapping ([`ReducerParams::from_par_map`]) or through
//! [`ReducerParams::builder`].
pub mod stats;

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use arrow_array::{ArrayRef, BooleanArray, Float64Array, RecordBatch, StringArray, UInt32Array};
use arrow_select::take::take_record_batch;
use serde_json::Value;
use tracing::debug;

use crate::constants::{AltData, LIGHTCURVE_SUFFIX, MAG_TO_FLUX_ERR, PHOT_ZP};
use crate::dataset::columns::{f64_column, find_column, flag_column, mjd_column, str_column};
use crate::dataset::{DataType, DatasetLocation, Lightcurve, RawData, Source};
use crate::parameters::{ParMap, ParValue};
use crate::virtobs_errors::VirtObsError;

use stats::nanmedian;

/// Tunables of the photometric reduction.
///
/// Defaults
/// -----------------
/// * `mag_range`: `None` (keep every dataset)
/// * `drop_bad`: `false`
/// * `outlier_sigma`: 3.0
/// * `outlier_max_iterations`: 5
/// * `uniform_sampling_cv`: 0.01
/// * `zero_point`: [`PHOT_ZP`]
#[derive(Debug, Clone, PartialEq)]
pub struct ReducerParams {
    /// Reject datasets whose median magnitude is more than this away from the source magnitude.
    pub mag_range: Option<f64>,
    /// Remove flagged rows from the outputs.
    pub drop_bad: bool,
    /// Sigma clipping threshold of the robust statistics.
    pub outlier_sigma: f64,
    pub outlier_max_iterations: usize,
    /// A lightcurve is uniformly sampled when the coefficient of variation of its time steps
    /// is below this value.
    pub uniform_sampling_cv: f64,
    pub zero_point: f64,
}

impl Default for ReducerParams {
    fn default() -> Self {
        ReducerParams {
            mag_range: None,
            drop_bad: false,
            outlier_sigma: 3.0,
            outlier_max_iterations: 5,
            uniform_sampling_cv: 0.01,
            zero_point: PHOT_ZP,
        }
    }
}

impl ReducerParams {
    pub fn builder() -> ReducerParamsBuilder {
        ReducerParamsBuilder::new()
    }

    /// Build from a parameter mapping (the observatory `reducer` parameter merged with call
    /// overrides). Unknown keys are ignored, `drop_flagged` is accepted for `drop_bad`.
    pub fn from_par_map(map: &ParMap) -> Result<Self, VirtObsError> {
        let number = |key: &str| -> Result<Option<f64>, VirtObsError> {
            match map.get(key) {
                None | Some(ParValue::Null) => Ok(None),
                Some(v) => v.as_f64().map(Some).ok_or_else(|| {
                    VirtObsError::Configuration(format!("Reducer parameter '{key}' must be a number"))
                }),
            }
        };
        let flag = |key: &str| -> Result<Option<bool>, VirtObsError> {
            match map.get(key) {
                None | Some(ParValue::Null) => Ok(None),
                Some(v) => v.as_bool().map(Some).ok_or_else(|| {
                    VirtObsError::Configuration(format!("Reducer parameter '{key}' must be a bool"))
                }),
            }
        };

        let mut builder = ReducerParams::builder();
        if let Some(v) = number("mag_range")? {
            builder = builder.mag_range(Some(v));
        }
        if let Some(v) = flag("drop_bad")?.or(flag("drop_flagged")?) {
            builder = builder.drop_bad(v);
        }
        if let Some(v) = number("outlier_sigma")? {
            builder = builder.outlier_sigma(v);
        }
        if let Some(v) = number("outlier_max_iterations")? {
            builder = builder.outlier_max_iterations(v as usize);
        }
        if let Some(v) = number("uniform_sampling_cv")? {
            builder = builder.uniform_sampling_cv(v);
        }
        if let Some(v) = number("zero_point")? {
            builder = builder.zero_point(v);
        }
        builder.build()
    }
}

impl fmt::Display for ReducerParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Reducer Parameters")?;
        writeln!(f, "------------------")?;
        writeln!(f, "  mag_range              = {:?}", self.mag_range)?;
        writeln!(f, "  drop_bad               = {}", self.drop_bad)?;
        writeln!(f, "  outlier_sigma          = {}", self.outlier_sigma)?;
        writeln!(f, "  outlier_max_iterations = {}", self.outlier_max_iterations)?;
        writeln!(f, "  uniform_sampling_cv    = {}", self.uniform_sampling_cv)?;
        write!(f, "  zero_point             = {}", self.zero_point)
    }
}

/// Builder for [`ReducerParams`], with validation.
#[derive(Debug, Clone, Default)]
pub struct ReducerParamsBuilder {
    params: ReducerParams,
}

impl ReducerParamsBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mag_range(mut self, v: Option<f64>) -> Self {
        self.params.mag_range = v;
        self
    }
    pub fn drop_bad(mut self, v: bool) -> Self {
        self.params.drop_bad = v;
        self
    }
    pub fn outlier_sigma(mut self, v: f64) -> Self {
        self.params.outlier_sigma = v;
        self
    }
    pub fn outlier_max_iterations(mut self, v: usize) -> Self {
        self.params.outlier_max_iterations = v;
        self
    }
    pub fn uniform_sampling_cv(mut self, v: f64) -> Self {
        self.params.uniform_sampling_cv = v;
        self
    }
    pub fn zero_point(mut self, v: f64) -> Self {
        self.params.zero_point = v;
        self
    }

    /// Validate and produce the [`ReducerParams`].
    ///
    /// Validation rules
    /// -----------------
    /// * `mag_range > 0` when set.
    /// * `outlier_sigma > 0`, `outlier_max_iterations >= 1`.
    /// * `uniform_sampling_cv >= 0`.
    /// * `zero_point` is finite.
    pub fn build(self) -> Result<ReducerParams, VirtObsError> {
        let p = &self.params;
        if p.mag_range.is_some_and(|r| r.is_nan() || r <= 0.0) {
            return Err(VirtObsError::Configuration("mag_range must be > 0".into()));
        }
        if p.outlier_sigma.is_nan() || p.outlier_sigma <= 0.0 {
            return Err(VirtObsError::Configuration("outlier_sigma must be > 0".into()));
        }
        if p.outlier_max_iterations == 0 {
            return Err(VirtObsError::Configuration(
                "outlier_max_iterations must be >= 1".into(),
            ));
        }
        if p.uniform_sampling_cv.is_nan() || p.uniform_sampling_cv < 0.0 {
            return Err(VirtObsError::Configuration(
                "uniform_sampling_cv must be >= 0".into(),
            ));
        }
        if !p.zero_point.is_finite() {
            return Err(VirtObsError::Configuration("zero_point must be finite".into()));
        }
        Ok(self.params)
    }
}

/// Mapping from observatory filter names to standard names.
#[derive(Debug, Clone, PartialEq)]
pub enum FilterMap {
    /// Explicit name pairs; unknown names pass through.
    Map(BTreeMap<String, String>),
    /// Format string where `{}` is replaced by the observatory filter name.
    Template(String),
}

impl FilterMap {
    /// Read the `filtmap` parameter (null, a template string or a mapping).
    pub fn from_par_value(value: &ParValue) -> Result<Option<Self>, VirtObsError> {
        match value {
            ParValue::Null => Ok(None),
            ParValue::Str(s) => Ok(Some(FilterMap::Template(s.clone()))),
            ParValue::Map(m) => m
                .iter()
                .map(|(k, v)| {
                    v.as_str().map(|s| (k.clone(), s.to_string())).ok_or_else(|| {
                        VirtObsError::Configuration(format!("filtmap entry '{k}' must be a string"))
                    })
                })
                .collect::<Result<BTreeMap<_, _>, _>>()
                .map(|m| Some(FilterMap::Map(m))),
            other => Err(VirtObsError::Configuration(format!(
                "filtmap must be a string or a mapping, got {}",
                other.par_type()
            ))),
        }
    }

    pub fn apply(&self, filter: &str) -> String {
        match self {
            FilterMap::Map(m) => m.get(filter).cloned().unwrap_or_else(|| filter.to_string()),
            FilterMap::Template(t) => t.replace("{}", filter),
        }
    }
}

/// Metadata copied into every lightcurve of one reduction call.
///
/// Built from the contributing raw datasets with [`InitKwargs::from_raw_data`]: a field is
/// set only when it is identical across all of them.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InitKwargs {
    pub source_name: Option<String>,
    pub source_id: Option<u64>,
    pub project: Option<String>,
    pub observatory: Option<String>,
    pub raw_data_ids: Vec<u64>,
    pub folder: Option<String>,
    pub raw_data_filename: Option<String>,
    pub raw_data_key: Option<String>,
    pub altdata: AltData,
    pub filtmap: Option<FilterMap>,
}

fn common<T: PartialEq + Clone>(mut values: impl Iterator<Item = T>) -> Option<T> {
    let first = values.next()?;
    values.all(|v| v == first).then_some(first)
}

impl InitKwargs {
    pub fn from_raw_data(raws: &[&RawData]) -> Self {
        let altdata = match raws.split_first() {
            Some((first, rest)) => first
                .altdata
                .iter()
                .filter(|(k, v)| rest.iter().all(|r| r.altdata.get(*k) == Some(*v)))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            None => AltData::new(),
        };

        InitKwargs {
            source_name: common(raws.iter().map(|r| r.source_name.clone())),
            source_id: common(raws.iter().map(|r| r.source_id)).flatten(),
            project: None,
            observatory: common(raws.iter().map(|r| r.observatory.clone())),
            raw_data_ids: raws.iter().filter_map(|r| r.id).collect(),
            folder: common(raws.iter().map(|r| r.location.folder.clone())).flatten(),
            raw_data_filename: common(raws.iter().map(|r| r.location.filename().map(str::to_string)))
                .flatten(),
            raw_data_key: common(raws.iter().map(|r| r.location.key.clone())).flatten(),
            altdata,
            filtmap: None,
        }
    }

    pub fn with_filtmap(mut self, filtmap: Option<FilterMap>) -> Self {
        self.filtmap = filtmap;
        self
    }

    pub fn with_project(mut self, project: &str) -> Self {
        self.project = Some(project.to_string());
        self
    }

    fn map_filter(&self, filter: &str) -> String {
        match &self.filtmap {
            Some(fm) => fm.apply(filter),
            None => filter.to_string(),
        }
    }

    /// Container name of the lightcurves: the raw container name with a `_lcs` suffix.
    fn lightcurve_filename(&self) -> Option<String> {
        let raw = self.raw_data_filename.as_deref()?;
        Some(match raw.rsplit_once('.') {
            Some((stem, ext)) => format!("{stem}{LIGHTCURVE_SUFFIX}.{ext}"),
            None => format!("{raw}{LIGHTCURVE_SUFFIX}"),
        })
    }
}

/// One raw dataset in the standard column layout.
struct Normalized {
    mjd: Vec<f64>,
    mag: Vec<f64>,
    mag_err: Vec<f64>,
    filter: Vec<String>,
    flag: Vec<bool>,
    exptime: Option<Vec<f64>>,
}

fn altdata_number(altdata: &AltData, keys: &[&str]) -> Option<f64> {
    keys.iter().find_map(|k| match altdata.get(*k)? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    })
}

fn normalize(raw: &RawData, batch: &RecordBatch, init: &InitKwargs) -> Result<Normalized, VirtObsError> {
    let n = batch.num_rows();
    let mjd = mjd_column(batch)?.ok_or_else(|| {
        VirtObsError::InvalidInputValue(format!(
            "Raw data of {} has no time column (mjd/jd/hjd/bjd)",
            raw.source_name
        ))
    })?;
    let mag = match find_column(batch, &["mag", "magnitude"]) {
        Some(c) => f64_column(batch, c)?.unwrap_or_default(),
        None => {
            return Err(VirtObsError::InvalidInputValue(format!(
                "Raw data of {} has no magnitude column",
                raw.source_name
            )))
        }
    };
    let mag_err = match find_column(batch, &["mag_err", "magerr"]) {
        Some(c) => f64_column(batch, c)?.unwrap_or_default(),
        None => vec![f64::NAN; n],
    };
    let filter = match find_column(batch, &["filter", "filtercode", "band"]) {
        Some(c) => str_column(batch, c)?.unwrap_or_default(),
        None => {
            let f = raw.altdata.get("filter").and_then(Value::as_str).unwrap_or("");
            vec![f.to_string(); n]
        }
    };
    let filter = filter.iter().map(|f| init.map_filter(f)).collect();
    let flag = flag_column(batch, "flag")?.unwrap_or_else(|| vec![false; n]);
    let exptime = match find_column(batch, &["exptime", "exp_time"]) {
        Some(c) => f64_column(batch, c)?,
        None => altdata_number(&raw.altdata, &["exptime", "exp_time"]).map(|e| vec![e; n]),
    };

    Ok(Normalized {
        mjd,
        mag,
        mag_err,
        filter,
        flag,
        exptime,
    })
}

/// Reduce raw photometry into one lightcurve per filter.
///
/// Arguments
/// -----------------
/// * `raws`: the raw datasets, payloads loaded.
/// * `source`: the source they belong to, used for the `mag_range` check.
/// * `init`: metadata copied into the outputs, see [`InitKwargs`].
/// * `params`: reduction tunables.
///
/// Return
/// ----------
/// * The lightcurves sorted by start time and numbered, possibly empty.
/// * [`VirtObsError::InvalidInputType`] for non-photometric inputs,
///   [`VirtObsError::InvalidInputValue`] for missing payloads, missing columns or when no
///   exposure time is available at all.
pub fn reduce_to_lightcurves(
    raws: &[&RawData],
    source: Option<&Source>,
    init: &InitKwargs,
    params: &ReducerParams,
) -> Result<Vec<Lightcurve>, VirtObsError> {
    let mut batches = Vec::with_capacity(raws.len());
    for raw in raws {
        if raw.data_type != DataType::Photometry {
            return Err(VirtObsError::InvalidInputType(format!(
                "Expected photometry, got {} for source {}",
                raw.data_type, raw.source_name
            )));
        }
        let batch = raw.data().ok_or_else(|| {
            VirtObsError::InvalidInputValue(format!(
                "Raw data of {} from {} has no tabular payload loaded",
                raw.source_name, raw.observatory
            ))
        })?;
        batches.push((*raw, batch));
    }

    let mut tables = Vec::new();
    for (raw, batch) in batches {
        let table = normalize(raw, batch, init)?;
        if let (Some(range), Some(src_mag)) = (params.mag_range, source.and_then(|s| s.mag)) {
            let median = nanmedian(&table.mag);
            if !(src_mag - range..=src_mag + range).contains(&median) {
                debug!(
                    source = %raw.source_name,
                    median,
                    "dropping dataset outside of the magnitude range"
                );
                continue;
            }
        }
        tables.push(table);
    }
    if tables.is_empty() {
        return Ok(Vec::new());
    }
    if tables.iter().all(|t| t.exptime.is_none()) {
        return Err(VirtObsError::InvalidInputValue(
            "No exposure time found in the data columns (exptime/exp_time) or in altdata".into(),
        ));
    }

    let combined = concat_tables(tables, params.zero_point)?;
    let filters = str_column(&combined, "filter")?.unwrap_or_default();
    let mjd = f64_column(&combined, "mjd")?.unwrap_or_default();
    let flag = flag_column(&combined, "flag")?.unwrap_or_default();

    let mut unique_filters: Vec<&str> = Vec::new();
    for f in &filters {
        if !unique_filters.contains(&f.as_str()) {
            unique_filters.push(f);
        }
    }

    let mut lightcurves = Vec::new();
    for filter in unique_filters {
        let mut rows: Vec<u32> = (0..combined.num_rows())
            .filter(|&i| filters[i] == filter && !(params.drop_bad && flag[i]))
            .map(|i| i as u32)
            .collect();
        if rows.is_empty() {
            continue;
        }
        rows.sort_by(|a, b| mjd[*a as usize].total_cmp(&mjd[*b as usize]));
        let partition = take_record_batch(&combined, &UInt32Array::from(rows))?;

        let mut lc = Lightcurve::new(partition, filter, params)?;
        lc.source_name = init
            .source_name
            .clone()
            .or_else(|| source.map(|s| s.name.clone()))
            .unwrap_or_default();
        lc.source_id = init.source_id.or_else(|| source.and_then(|s| s.id));
        lc.project = init
            .project
            .clone()
            .or_else(|| source.map(|s| s.project.clone()))
            .unwrap_or_default();
        lc.observatory = init.observatory.clone().unwrap_or_default();
        lc.raw_data_ids = init.raw_data_ids.clone();
        lc.altdata = init.altdata.clone();
        lightcurves.push(lc);
    }

    lightcurves.sort_by(|a, b| a.time_start.total_cmp(&b.time_start));
    let total = lightcurves.len();
    let filename = init.lightcurve_filename();
    for (i, lc) in lightcurves.iter_mut().enumerate() {
        lc.reduction_number = i + 1;
        lc.reduction_total = total;
        if let (Some(filename), Some(key)) = (&filename, &init.raw_data_key) {
            lc.location = DatasetLocation::new(
                init.folder.as_deref(),
                Some(filename),
                Some(&format!("{key}_{}_{}", lc.filter, lc.reduction_number)),
            );
        }
    }
    debug!(
        source = %init.source_name.as_deref().unwrap_or(""),
        lightcurves = total,
        "reduced photometry"
    );
    Ok(lightcurves)
}

/// Concatenate normalized tables into one batch, adding flux columns.
fn concat_tables(tables: Vec<Normalized>, zero_point: f64) -> Result<RecordBatch, VirtObsError> {
    let mut mjd = Vec::new();
    let mut mag = Vec::new();
    let mut mag_err = Vec::new();
    let mut filter = Vec::new();
    let mut flag = Vec::new();
    let mut exptime = Vec::new();
    for t in tables {
        let n = t.mjd.len();
        mjd.extend(t.mjd);
        mag.extend(t.mag);
        mag_err.extend(t.mag_err);
        filter.extend(t.filter);
        flag.extend(t.flag);
        exptime.extend(t.exptime.unwrap_or_else(|| vec![f64::NAN; n]));
    }

    let flux: Vec<f64> = mag
        .iter()
        .map(|m| 10f64.powf(-0.4 * (m - zero_point)))
        .collect();
    let flux_err: Vec<f64> = flux
        .iter()
        .zip(&mag_err)
        .map(|(f, e)| f * e / MAG_TO_FLUX_ERR)
        .collect();
    let snr: Vec<f64> = flux.iter().zip(&flux_err).map(|(f, e)| f / e).collect();

    let columns: Vec<(&str, ArrayRef)> = vec![
        ("mjd", Arc::new(Float64Array::from(mjd)) as ArrayRef),
        ("mag", Arc::new(Float64Array::from(mag)) as ArrayRef),
        ("mag_err", Arc::new(Float64Array::from(mag_err)) as ArrayRef),
        ("filter", Arc::new(StringArray::from(filter)) as ArrayRef),
        ("flag", Arc::new(BooleanArray::from(flag)) as ArrayRef),
        ("exptime", Arc::new(Float64Array::from(exptime)) as ArrayRef),
        ("flux", Arc::new(Float64Array::from(flux)) as ArrayRef),
        ("flux_err", Arc::new(Float64Array::from(flux_err)) as ArrayRef),
        ("snr", Arc::new(Float64Array::from(snr)) as ArrayRef),
    ];
    Ok(RecordBatch::try_from_iter(columns)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_validation() {
        assert!(ReducerParams::builder().outlier_sigma(0.0).build().is_err());
        assert!(ReducerParams::builder().mag_range(Some(-1.0)).build().is_err());
        assert!(ReducerParams::builder()
            .outlier_max_iterations(0)
            .build()
            .is_err());
        let p = ReducerParams::builder().drop_bad(true).build().unwrap();
        assert!(p.drop_bad);
    }

    #[test]
    fn test_from_par_map() {
        let map = ParMap::from([
            ("drop_flagged".to_string(), ParValue::Bool(true)),
            ("mag_range".to_string(), ParValue::Int(2)),
            ("something_else".to_string(), ParValue::Str("x".into())),
        ]);
        let p = ReducerParams::from_par_map(&map).unwrap();
        assert!(p.drop_bad);
        assert_eq!(p.mag_range, Some(2.0));
        assert_eq!(p.outlier_sigma, 3.0);

        let bad = ParMap::from([("outlier_sigma".to_string(), ParValue::Str("x".into()))]);
        assert!(ReducerParams::from_par_map(&bad).is_err());
    }

    #[test]
    fn test_filtmap() {
        let fm = FilterMap::from_par_value(&ParValue::Str("ztf{}".into()))
            .unwrap()
            .unwrap();
        assert_eq!(fm.apply("g"), "ztfg");
        assert!(FilterMap::from_par_value(&ParValue::Null).unwrap().is_none());
    }

    #[test]
    fn test_init_kwargs_intersection() {
        let mut a = RawData::new("s", "demo", DataType::Photometry, None, AltData::new()).unwrap();
        let mut b = a.clone();
        a.altdata.insert("same".into(), Value::from(1));
        b.altdata.insert("same".into(), Value::from(1));
        a.altdata.insert("diff".into(), Value::from(1));
        b.altdata.insert("diff".into(), Value::from(2));
        a.location = DatasetLocation::new(None, Some("x.tables"), Some("k1"));
        b.location = DatasetLocation::new(None, Some("x.tables"), Some("k2"));

        let init = InitKwargs::from_raw_data(&[&a, &b]);
        assert_eq!(init.source_name.as_deref(), Some("s"));
        assert!(init.altdata.contains_key("same"));
        assert!(!init.altdata.contains_key("diff"));
        assert_eq!(init.raw_data_filename.as_deref(), Some("x.tables"));
        assert_eq!(init.raw_data_key, None);
        assert_eq!(init.lightcurve_filename().as_deref(), Some("x_lcs.tables"));
    }
}
