//! # Histogram accumulator
//!
//! Counts of data points binned along **score** axes (detection statistics such as `snr`
//! or `dmag`) and **common** axes (source properties such as `mag`, observation
//! properties such as `exptime` or `filt`).
//!
//! ## Overview
//! -----------------
//! * One count array per score axis, named `"{score}_counts"`.
//! * Every array is an `ndarray::ArrayD` of shape `[common axes..., score axis]`. Common
//!   axes are the source axes followed by the observation axes, each group in name order.
//! * Axes are parsed from the `score_coords`, `source_coords` and `obs_coords` parameters,
//!   see [`Axis::from_spec`].
//! * A dynamic axis grows the first time a new value is seen; the arrays are copied into a
//!   zeroed larger array around the new slice.
//! * [`Histogram::merge`] (and `&a + &b`) builds the union of the bins of both histograms
//!   and adds the counts.
//!
//! ## Overflow
//! -----------------
//! Counts are `u16` or `u32` (`dtype` parameter). Increments and merges saturate at the
//! maximum of the type instead of wrapping around.
//!
//! The distribution of scores over the background is what detection thresholds are set
//! from, and the number of points without a detection is what upper limits and rates are
//! computed from.
pub mod axis;

use std::fmt;
use std::ops::Add;

use ndarray::{ArrayD, Axis as NdAxis, IxDyn, Slice};
use smallvec::SmallVec;
use tracing::debug;

use crate::constants::unit_convert_bytes;
use crate::dataset::columns::{f64_column, flag_column};
use crate::dataset::{Lightcurve, Source};
use crate::parameters::{ParMap, ParType, ParValue, Parameters};
use crate::virtobs_errors::VirtObsError;

pub use axis::{Axis, AxisInput, AxisKind, Bin};
use axis::Slot;

/// Integer type of the counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CountType {
    U16,
    U32,
}

impl CountType {
    pub fn parse(s: &str) -> Result<Self, VirtObsError> {
        match s {
            "uint16" => Ok(CountType::U16),
            "uint32" => Ok(CountType::U32),
            other => Err(VirtObsError::Configuration(format!(
                "Unsupported dtype: {other}, must be uint16 or uint32."
            ))),
        }
    }

    /// Size of one count in bytes.
    pub fn itemsize(&self) -> usize {
        match self {
            CountType::U16 => 2,
            CountType::U32 => 4,
        }
    }
}

/// A count array indexed `[common axes..., score axis]`.
#[derive(Debug, Clone, PartialEq)]
pub enum Counts {
    U16(ArrayD<u16>),
    U32(ArrayD<u32>),
}

impl Counts {
    fn zeros(dtype: CountType, shape: &[usize]) -> Self {
        match dtype {
            CountType::U16 => Counts::U16(ArrayD::zeros(IxDyn(shape))),
            CountType::U32 => Counts::U32(ArrayD::zeros(IxDyn(shape))),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Counts::U16(a) => a.len(),
            Counts::U32(a) => a.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn shape(&self) -> &[usize] {
        match self {
            Counts::U16(a) => a.shape(),
            Counts::U32(a) => a.shape(),
        }
    }

    /// Count at a multi-dimensional index, `None` when out of bounds.
    pub fn get(&self, index: &[usize]) -> Option<u64> {
        match self {
            Counts::U16(a) => a.get(index).map(|c| u64::from(*c)),
            Counts::U32(a) => a.get(index).map(|c| u64::from(*c)),
        }
    }

    pub fn total(&self) -> u64 {
        match self {
            Counts::U16(a) => a.iter().map(|c| u64::from(*c)).sum(),
            Counts::U32(a) => a.iter().map(|c| u64::from(*c)).sum(),
        }
    }

    /// All counts in row major order.
    pub fn to_vec(&self) -> Vec<u64> {
        match self {
            Counts::U16(a) => a.iter().map(|c| u64::from(*c)).collect(),
            Counts::U32(a) => a.iter().map(|c| u64::from(*c)).collect(),
        }
    }

    fn increment(&mut self, index: &[usize]) {
        match self {
            Counts::U16(a) => {
                if let Some(c) = a.get_mut(index) {
                    *c = c.saturating_add(1);
                }
            }
            Counts::U32(a) => {
                if let Some(c) = a.get_mut(index) {
                    *c = c.saturating_add(1);
                }
            }
        }
    }

    fn saturating_add_assign(&mut self, other: &Counts) {
        match (self, other) {
            (Counts::U16(a), Counts::U16(b)) => a.zip_mut_with(b, |x, y| *x = x.saturating_add(*y)),
            (Counts::U32(a), Counts::U32(b)) => a.zip_mut_with(b, |x, y| *x = x.saturating_add(*y)),
            // dtypes are checked before merging
            _ => {}
        }
    }

    /// Insert a zero slice at `position` along `dim`.
    fn insert_zeros(&self, dim: usize, position: usize) -> Counts {
        match self {
            Counts::U16(a) => Counts::U16(insert_zeros(a, dim, position)),
            Counts::U32(a) => Counts::U32(insert_zeros(a, dim, position)),
        }
    }

    /// Move every slice to its position in a larger grid, one dimension at a time.
    ///
    /// `maps[d][i]` is the new index along dimension `d` of the old index `i`.
    fn reindex(&self, new_shape: &[usize], maps: &[Vec<usize>]) -> Counts {
        maps.iter()
            .zip(new_shape)
            .enumerate()
            .fold(self.clone(), |counts, (dim, (map, len))| match counts {
                Counts::U16(a) => Counts::U16(scatter_axis(&a, dim, *len, map)),
                Counts::U32(a) => Counts::U32(scatter_axis(&a, dim, *len, map)),
            })
    }
}

fn insert_zeros<T: Clone + Default>(data: &ArrayD<T>, dim: usize, position: usize) -> ArrayD<T> {
    let mut shape = data.shape().to_vec();
    shape[dim] += 1;
    let mut out = ArrayD::from_elem(IxDyn(&shape), T::default());
    out.slice_axis_mut(NdAxis(dim), Slice::from(..position))
        .assign(&data.slice_axis(NdAxis(dim), Slice::from(..position)));
    out.slice_axis_mut(NdAxis(dim), Slice::from(position + 1..))
        .assign(&data.slice_axis(NdAxis(dim), Slice::from(position..)));
    out
}

fn scatter_axis<T: Clone + Default>(data: &ArrayD<T>, dim: usize, new_len: usize, map: &[usize]) -> ArrayD<T> {
    let mut shape = data.shape().to_vec();
    shape[dim] = new_len;
    let mut out = ArrayD::from_elem(IxDyn(&shape), T::default());
    for (old, &new) in map.iter().enumerate() {
        out.index_axis_mut(NdAxis(dim), new)
            .assign(&data.index_axis(NdAxis(dim), old));
    }
    out
}

/// Outcome of [`Histogram::add_lightcurve`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FillReport {
    /// Increments applied (one per good point and score axis).
    pub added: usize,
    /// Values outside a fixed axis range, not counted.
    pub skipped: usize,
}

#[derive(Debug, Clone)]
pub struct Histogram {
    pub pars: Parameters,
    dtype: CountType,
    common: Vec<Axis>,
    scores: Vec<Axis>,
    counts: Vec<Counts>,
    initialized: bool,
}

impl Default for Histogram {
    fn default() -> Self {
        Self::new()
    }
}

fn spec_map(entries: &[(&str, Vec<f64>)]) -> ParValue {
    ParValue::Map(
        entries
            .iter()
            .map(|(k, v)| (k.to_string(), ParValue::from(v.clone())))
            .collect(),
    )
}

impl Histogram {
    /// A histogram with the default parameters, not yet initialized.
    ///
    /// Defaults
    /// -----------------
    /// * `dtype`: `"uint32"`
    /// * `score_coords`: `snr: [-10, 10, 0.1]`, `dmag: [-3, 3, 0.1]`
    /// * `source_coords`: `mag: [15, 21, 0.5]`
    /// * `obs_coords`: `exptime: [30, 1]`, `filt: []`
    pub fn new() -> Self {
        let mut pars = Parameters::new(["dtype", "score_coords", "source_coords", "obs_coords"]);
        let registered = [
            pars.add_par("dtype", "uint32", &[ParType::Str], "Integer type of the counts"),
            pars.add_par(
                "score_coords",
                spec_map(&[("snr", vec![-10.0, 10.0, 0.1]), ("dmag", vec![-3.0, 3.0, 0.1])]),
                &[ParType::Map],
                "Axes of the measured scores, one count array each",
            ),
            pars.add_par(
                "source_coords",
                spec_map(&[("mag", vec![15.0, 21.0, 0.5])]),
                &[ParType::Map],
                "Axes taken from the source properties",
            ),
            pars.add_par(
                "obs_coords",
                spec_map(&[("exptime", vec![30.0, 1.0]), ("filt", vec![])]),
                &[ParType::Map],
                "Axes taken from the observation",
            ),
        ];
        debug_assert!(registered.iter().all(Result::is_ok));
        pars.lock();

        Histogram {
            pars,
            dtype: CountType::U32,
            common: Vec::new(),
            scores: Vec::new(),
            counts: Vec::new(),
            initialized: false,
        }
    }

    /// Set the axis parameters and initialize in one call.
    ///
    /// Arguments
    /// -----------------
    /// * `score`, `source`, `obs`: axis specifications by coordinate name.
    /// * `dtype`: `"uint16"` or `"uint32"`.
    pub fn from_specs(
        score: ParMap,
        source: ParMap,
        obs: ParMap,
        dtype: &str,
    ) -> Result<Self, VirtObsError> {
        let mut hist = Histogram::new();
        hist.pars.set("score_coords", score)?;
        hist.pars.set("source_coords", source)?;
        hist.pars.set("obs_coords", obs)?;
        hist.pars.set("dtype", dtype)?;
        hist.initialize()?;
        Ok(hist)
    }

    /// Build the axes and zero-filled count arrays from the parameters.
    pub fn initialize(&mut self) -> Result<(), VirtObsError> {
        self.pars.verify()?;
        self.dtype = CountType::parse(self.pars.get_str("dtype")?)?;

        let axes = |key: &str, input: AxisInput| -> Result<Vec<Axis>, VirtObsError> {
            self.pars
                .get_map(key)?
                .iter()
                .map(|(name, spec)| Axis::from_spec(name, input, spec))
                .collect()
        };
        let scores = axes("score_coords", AxisInput::Score)?;
        let mut common = axes("source_coords", AxisInput::Source)?;
        common.extend(axes("obs_coords", AxisInput::Obs)?);

        self.counts = scores
            .iter()
            .map(|s| {
                let shape: Vec<usize> = common.iter().map(Axis::len).chain([s.len()]).collect();
                Counts::zeros(self.dtype, &shape)
            })
            .collect();
        self.common = common;
        self.scores = scores;
        self.initialized = true;
        debug!(
            scores = self.scores.len(),
            common_axes = self.common.len(),
            "histogram initialized"
        );
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    fn check_initialized(&self) -> Result<(), VirtObsError> {
        if self.initialized {
            Ok(())
        } else {
            Err(VirtObsError::Configuration(
                "Histogram is not initialized, call initialize() first".into(),
            ))
        }
    }

    pub fn dtype(&self) -> CountType {
        self.dtype
    }

    /// Source and observation axes, in array order.
    pub fn common_axes(&self) -> &[Axis] {
        &self.common
    }

    pub fn score_axes(&self) -> &[Axis] {
        &self.scores
    }

    pub fn axis(&self, name: &str) -> Option<&Axis> {
        self.common
            .iter()
            .chain(&self.scores)
            .find(|a| a.name == name)
    }

    pub fn array_names(&self) -> Vec<String> {
        self.scores.iter().map(|s| format!("{}_counts", s.name)).collect()
    }

    fn score_index(&self, score: &str) -> Option<usize> {
        let score = score.strip_suffix("_counts").unwrap_or(score);
        self.scores.iter().position(|s| s.name == score)
    }

    /// Count array of a score, by score name or array name.
    pub fn counts(&self, score: &str) -> Option<&Counts> {
        self.score_index(score).map(|i| &self.counts[i])
    }

    /// Shape `[common axes..., score axis]` of the count array of a score.
    pub fn shape(&self, score: &str) -> Option<Vec<usize>> {
        self.score_index(score).map(|i| self.counts[i].shape().to_vec())
    }

    /// Count one value.
    ///
    /// Arguments
    /// -----------------
    /// * `coords`: a value for every common axis, by axis name.
    /// * `score_name`: score axis to fill.
    /// * `score_value`: the measured score.
    ///
    /// Return
    /// ----------
    /// * [`VirtObsError::ValueOutOfRange`] if a value falls outside a fixed axis, in which
    ///   case nothing is modified.
    pub fn add_values<S: AsRef<str>>(
        &mut self,
        coords: &[(S, Bin)],
        score_name: &str,
        score_value: f64,
    ) -> Result<(), VirtObsError> {
        self.check_initialized()?;
        let s = self.score_index(score_name).ok_or_else(|| {
            VirtObsError::InvalidInputValue(format!("Unknown score axis '{score_name}'"))
        })?;

        // locate everything first so an out of range value leaves the arrays untouched
        let common_slots = self
            .common
            .iter()
            .map(|axis| {
                let value = coords
                    .iter()
                    .find(|(name, _)| name.as_ref() == axis.name)
                    .map(|(_, v)| v)
                    .ok_or_else(|| {
                        VirtObsError::InvalidInputValue(format!(
                            "No value given for coordinate '{}'",
                            axis.name
                        ))
                    })?;
                axis.slot(value)
            })
            .collect::<Result<SmallVec<[Slot; 6]>, _>>()?;
        let score_slot = self.scores[s].slot(&Bin::Value(score_value))?;

        let mut indices: SmallVec<[usize; 6]> = SmallVec::with_capacity(common_slots.len() + 1);
        for (d, slot) in common_slots.into_iter().enumerate() {
            indices.push(match slot {
                Slot::Existing(i) => i,
                Slot::Insert(i, bin) => {
                    self.grow_common(d, i, bin);
                    i
                }
            });
        }
        indices.push(match score_slot {
            Slot::Existing(i) => i,
            Slot::Insert(i, bin) => {
                self.grow_score(s, i, bin);
                i
            }
        });

        self.counts[s].increment(&indices);
        Ok(())
    }

    fn grow_common(&mut self, dim: usize, position: usize, bin: Bin) {
        for counts in &mut self.counts {
            *counts = counts.insert_zeros(dim, position);
        }
        self.common[dim].insert(position, bin);
    }

    fn grow_score(&mut self, s: usize, position: usize, bin: Bin) {
        self.counts[s] = self.counts[s].insert_zeros(self.common.len(), position);
        self.scores[s].insert(position, bin);
    }

    /// Add the counts of another histogram with the same axes (names and kinds).
    ///
    /// Bins missing on either side are created, so merging is commutative and associative.
    pub fn merge(&mut self, other: &Histogram) -> Result<(), VirtObsError> {
        self.check_initialized()?;
        other.check_initialized()?;
        if self.dtype != other.dtype {
            return Err(VirtObsError::Configuration(format!(
                "Cannot merge histograms with dtypes {:?} and {:?}",
                self.dtype, other.dtype
            )));
        }
        if self.common.len() != other.common.len() || self.scores.len() != other.scores.len() {
            return Err(VirtObsError::Configuration(
                "Cannot merge histograms with different axes".into(),
            ));
        }

        let mut common = Vec::with_capacity(self.common.len());
        let mut left_maps = Vec::with_capacity(self.common.len());
        let mut right_maps = Vec::with_capacity(self.common.len());
        for (a, b) in self.common.iter().zip(&other.common) {
            let (axis, left, right) = a.union(b)?;
            common.push(axis);
            left_maps.push(left);
            right_maps.push(right);
        }

        let mut scores = Vec::with_capacity(self.scores.len());
        let mut counts = Vec::with_capacity(self.scores.len());
        for s in 0..self.scores.len() {
            let (axis, left, right) = self.scores[s].union(&other.scores[s])?;
            let new_shape: Vec<usize> = common
                .iter()
                .map(Axis::len)
                .chain([axis.len()])
                .collect();

            let mut lm = left_maps.clone();
            lm.push(left);
            let mut rm = right_maps.clone();
            rm.push(right);

            let mut merged = self.counts[s].reindex(&new_shape, &lm);
            let theirs = other.counts[s].reindex(&new_shape, &rm);
            merged.saturating_add_assign(&theirs);
            scores.push(axis);
            counts.push(merged);
        }

        self.common = common;
        self.scores = scores;
        self.counts = counts;
        Ok(())
    }

    /// Memory footprint of the count arrays, in `units` (`kb`, `mb`, `gb`, else bytes).
    pub fn actual_size(&self, units: &str) -> Result<f64, VirtObsError> {
        self.check_initialized()?;
        let items: usize = self.counts.iter().map(Counts::len).sum();
        Ok((items * self.dtype.itemsize()) as f64 / unit_convert_bytes(units))
    }

    /// Expected memory footprint once the dynamic axes are filled.
    ///
    /// Arguments
    /// -----------------
    /// * `units`: `kb`, `mb`, `gb`, anything else gives bytes.
    /// * `dyn_coord_size`: assumed length of common axes with at most one bin.
    /// * `dyn_score_size`: assumed length of score axes with at most one bin.
    pub fn estimate_size(
        &self,
        units: &str,
        dyn_coord_size: usize,
        dyn_score_size: usize,
    ) -> Result<f64, VirtObsError> {
        self.check_initialized()?;
        let estimated = |axis: &Axis, dynamic: usize| {
            if axis.len() <= 1 {
                dynamic
            } else {
                axis.len()
            }
        };
        let common: usize = self
            .common
            .iter()
            .map(|a| estimated(a, dyn_coord_size))
            .product();
        let score: usize = self
            .scores
            .iter()
            .map(|a| estimated(a, dyn_score_size))
            .sum();
        Ok((common * score * self.dtype.itemsize()) as f64 / unit_convert_bytes(units))
    }

    /// Count every good point of a lightcurve.
    ///
    /// Source axes read the source fields (`mag`, `mag_err`, `ra`, `dec`), observation axes
    /// read the lightcurve columns (`filt` reads the lightcurve filter), and score axes read
    /// the lightcurve columns except `dmag = mag - mag_mean_robust`.
    ///
    /// Return
    /// ----------
    /// * The number of increments and of values skipped for being out of a fixed range.
    pub fn add_lightcurve(&mut self, lc: &Lightcurve, source: &Source) -> Result<FillReport, VirtObsError> {
        self.check_initialized()?;
        let batch = lc.data().ok_or_else(|| {
            VirtObsError::InvalidInputValue(format!(
                "Lightcurve of {} has no data loaded",
                lc.source_name
            ))
        })?;
        let n = batch.num_rows();
        let mag = f64_column(batch, "mag")?.unwrap_or_else(|| vec![f64::NAN; n]);
        let flag = flag_column(batch, "flag")?.unwrap_or_else(|| vec![false; n]);

        let column = |name: &str| -> Result<Vec<f64>, VirtObsError> {
            f64_column(batch, name)?.ok_or_else(|| {
                VirtObsError::InvalidInputValue(format!(
                    "Lightcurve has no column '{name}' for the histogram"
                ))
            })
        };

        enum Values {
            Constant(Bin),
            PerRow(Vec<f64>),
        }
        let mut common_values = Vec::with_capacity(self.common.len());
        for axis in &self.common {
            let values = match (axis.input, axis.name.as_str()) {
                (AxisInput::Source, name) => {
                    let value = match name {
                        "mag" => source.mag,
                        "mag_err" => source.mag_err,
                        "ra" => source.ra,
                        "dec" => source.dec,
                        _ => None,
                    };
                    Values::Constant(Bin::Value(value.ok_or_else(|| {
                        VirtObsError::InvalidInputValue(format!(
                            "Source {} has no value for coordinate '{name}'",
                            source.name
                        ))
                    })?))
                }
                (_, "filt" | "filter") => Values::Constant(Bin::from(lc.filter.as_str())),
                (_, name) => Values::PerRow(column(name)?),
            };
            common_values.push((axis.name.clone(), values));
        }
        let mut score_values = Vec::with_capacity(self.scores.len());
        for axis in &self.scores {
            let values = match axis.name.as_str() {
                "dmag" => mag.iter().map(|m| m - lc.mag_mean_robust).collect(),
                name => column(name)?,
            };
            score_values.push((axis.name.clone(), values));
        }

        let mut report = FillReport::default();
        for row in (0..n).filter(|&i| !flag[i] && !mag[i].is_nan()) {
            let coords: Vec<(&str, Bin)> = common_values
                .iter()
                .map(|(name, values)| {
                    let bin = match values {
                        Values::Constant(b) => b.clone(),
                        Values::PerRow(v) => Bin::Value(v[row]),
                    };
                    (name.as_str(), bin)
                })
                .collect();
            for (score, values) in &score_values {
                match self.add_values(&coords, score, values[row]) {
                    Ok(()) => report.added += 1,
                    Err(VirtObsError::ValueOutOfRange { .. }) => report.skipped += 1,
                    Err(e) => return Err(e),
                }
            }
        }
        debug!(
            source = %source.name,
            added = report.added,
            skipped = report.skipped,
            "lightcurve added to histogram"
        );
        Ok(report)
    }
}

impl Add for &Histogram {
    type Output = Result<Histogram, VirtObsError>;

    fn add(self, rhs: &Histogram) -> Self::Output {
        let mut out = self.clone();
        out.merge(rhs)?;
        Ok(out)
    }
}

impl fmt::Display for Histogram {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Histogram ({:?})", self.dtype)?;
        for axis in self.common.iter().chain(&self.scores) {
            writeln!(
                f,
                "  {:<8} {:<6} {:?} len={} {}",
                axis.name,
                axis.input,
                axis.kind,
                axis.len(),
                axis.long_name
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small() -> Histogram {
        Histogram::from_specs(
            ParMap::from([("snr".to_string(), ParValue::from(vec![0.0, 5.0, 1.0]))]),
            ParMap::from([("mag".to_string(), ParValue::from(vec![15.0, 17.0, 1.0]))]),
            ParMap::from([("filt".to_string(), ParValue::List(vec![]))]),
            "uint16",
        )
        .unwrap()
    }

    #[test]
    fn test_default_initialize() {
        let mut h = Histogram::new();
        h.initialize().unwrap();
        assert_eq!(h.array_names(), vec!["dmag_counts", "snr_counts"]);
        let names: Vec<_> = h.common_axes().iter().map(|a| a.name.as_str()).collect();
        assert_eq!(names, vec!["mag", "exptime", "filt"]);
        // filt is empty until the first value arrives
        assert_eq!(h.counts("snr").unwrap().len(), 0);
        assert_eq!(h.shape("snr_counts").unwrap(), vec![13, 1, 0, 201]);
    }

    #[test]
    fn test_bad_dtype() {
        let mut h = Histogram::new();
        h.pars.set("dtype", "float64").unwrap();
        assert!(matches!(h.initialize(), Err(VirtObsError::Configuration(_))));
    }

    #[test]
    fn test_add_values_and_growth() {
        let mut h = small();
        h.add_values(&[("mag", Bin::Value(16.0)), ("filt", Bin::from("r"))], "snr", 3.0)
            .unwrap();
        h.add_values(&[("mag", Bin::Value(16.0)), ("filt", Bin::from("g"))], "snr", 3.0)
            .unwrap();
        h.add_values(&[("mag", Bin::Value(16.0)), ("filt", Bin::from("r"))], "snr", 3.0)
            .unwrap();

        assert_eq!(h.shape("snr").unwrap(), vec![3, 2, 6]);
        let counts = h.counts("snr").unwrap();
        assert_eq!(counts.total(), 3);
        // mag=16 -> 1, filt g -> 0, r -> 1, snr=3 -> 3
        assert_eq!(counts.get(&[1, 0, 3]), Some(1));
        assert_eq!(counts.get(&[1, 1, 3]), Some(2));

        let err = h.add_values(&[("mag", Bin::Value(18.0)), ("filt", Bin::from("i"))], "snr", 1.0);
        assert!(matches!(err, Err(VirtObsError::ValueOutOfRange { .. })));
        // nothing moved
        assert_eq!(h.axis("filt").unwrap().len(), 2);
        assert!(h
            .add_values(&[("mag", Bin::Value(16.0))], "snr", 1.0)
            .is_err());
    }

    #[test]
    fn test_value_below_fixed_range_leaves_counts() {
        let mut h = small();
        h.add_values(&[("mag", Bin::Value(15.0)), ("filt", Bin::from("r"))], "snr", 1.0)
            .unwrap();
        let before = h.counts("snr").unwrap().clone();

        // mag axis starts at 15, the new filter must not be added either
        let err = h.add_values(&[("mag", Bin::Value(14.0)), ("filt", Bin::from("g"))], "snr", 1.0);
        assert!(matches!(err, Err(VirtObsError::ValueOutOfRange { .. })));
        let err = h.add_values(&[("mag", Bin::Value(15.0)), ("filt", Bin::from("g"))], "snr", -0.5);
        assert!(matches!(err, Err(VirtObsError::ValueOutOfRange { .. })));
        assert_eq!(h.counts("snr").unwrap(), &before);
        assert_eq!(h.axis("filt").unwrap().bins(), &[Bin::from("r")]);

        h.add_values(&[("mag", Bin::Value(15.0 - 1e-10)), ("filt", Bin::from("r"))], "snr", 1.0)
            .unwrap();
        assert_eq!(h.counts("snr").unwrap().get(&[0, 0, 1]), Some(2));
    }

    #[test]
    fn test_saturation() {
        let mut h = small();
        let coords = [("mag", Bin::Value(15.0)), ("filt", Bin::from("r"))];
        for _ in 0..u16::MAX {
            h.add_values(&coords, "snr", 0.0).unwrap();
        }
        h.add_values(&coords, "snr", 0.0).unwrap();
        assert_eq!(h.counts("snr").unwrap().total(), u64::from(u16::MAX));

        let doubled = (&h + &h).unwrap();
        assert_eq!(doubled.counts("snr").unwrap().total(), u64::from(u16::MAX));
    }

    #[test]
    fn test_merge_union() {
        let mut a = small();
        let mut b = small();
        a.add_values(&[("mag", Bin::Value(15.0)), ("filt", Bin::from("r"))], "snr", 1.0)
            .unwrap();
        b.add_values(&[("mag", Bin::Value(15.0)), ("filt", Bin::from("g"))], "snr", 1.0)
            .unwrap();
        b.add_values(&[("mag", Bin::Value(15.0)), ("filt", Bin::from("r"))], "snr", 1.0)
            .unwrap();

        a.merge(&b).unwrap();
        let filt: Vec<_> = a.axis("filt").unwrap().bins().to_vec();
        assert_eq!(filt, vec![Bin::from("g"), Bin::from("r")]);
        let counts = a.counts("snr").unwrap();
        assert_eq!(counts.total(), 3);
        assert_eq!(counts.get(&[0, 1, 1]), Some(2));
    }

    #[test]
    fn test_sizes() {
        let h = small();
        assert_eq!(h.actual_size("bytes").unwrap(), 0.0);
        // 3 * 3 (dynamic filt) * 6 * 2 bytes
        assert_eq!(h.estimate_size("bytes", 3, 100).unwrap(), 108.0);
        assert_eq!(h.estimate_size("kb", 3, 100).unwrap(), 108.0 / 1024.0);
    }
}
