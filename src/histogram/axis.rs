//! Histogram coordinate axes.
//!
//! An axis is either **fixed** (a regular grid `start, start + step, ..., stop` given up
//! front) or **dynamic** (bins are created the first time a value is seen). A dynamic axis
//! may carry a step, in which case values are snapped to the grid `start + k * step`
//! before being inserted.
//!
//! Bins are kept sorted. Numeric bins sort before label bins (e.g. filter names), which
//! makes the union of two axes independent of the order in which they are merged.
use std::cmp::Ordering;
use std::fmt;

use crate::parameters::ParValue;
use crate::virtobs_errors::VirtObsError;

/// Relative tolerance used when comparing numeric bins.
const BIN_TOLERANCE: f64 = 1e-9;

/// Which kind of quantity an axis measures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AxisInput {
    /// A detection statistic, each score axis gets its own count array.
    Score,
    /// A property of the source, shared by all count arrays.
    Source,
    /// A property of the observation, shared by all count arrays.
    Obs,
}

impl fmt::Display for AxisInput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AxisInput::Score => "score",
            AxisInput::Source => "source",
            AxisInput::Obs => "obs",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AxisKind {
    Fixed,
    Dynamic,
}

/// Coordinate of one bin.
#[derive(Debug, Clone, PartialEq)]
pub enum Bin {
    Value(f64),
    Label(String),
}

impl Bin {
    fn cmp_bins(&self, other: &Bin) -> Ordering {
        match (self, other) {
            (Bin::Value(a), Bin::Value(b)) => {
                if (a - b).abs() <= BIN_TOLERANCE * a.abs().max(b.abs()).max(1.0) {
                    Ordering::Equal
                } else {
                    a.total_cmp(b)
                }
            }
            (Bin::Value(_), Bin::Label(_)) => Ordering::Less,
            (Bin::Label(_), Bin::Value(_)) => Ordering::Greater,
            (Bin::Label(a), Bin::Label(b)) => a.cmp(b),
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Bin::Value(v) => Some(*v),
            Bin::Label(_) => None,
        }
    }
}

impl From<f64> for Bin {
    fn from(v: f64) -> Self {
        Bin::Value(v)
    }
}

impl From<&str> for Bin {
    fn from(s: &str) -> Self {
        Bin::Label(s.to_string())
    }
}

impl From<String> for Bin {
    fn from(s: String) -> Self {
        Bin::Label(s)
    }
}

impl fmt::Display for Bin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Bin::Value(v) => write!(f, "{v}"),
            Bin::Label(s) => write!(f, "{s}"),
        }
    }
}

/// Where a value goes on an axis.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Slot {
    Existing(usize),
    /// The value needs a new bin at this position (dynamic axes only).
    Insert(usize, Bin),
}

/// Long, human readable name of a coordinate, or the name itself when unknown.
pub fn long_name(name: &str) -> &str {
    match name {
        "mag" => "Magnitude",
        "dmag" => "Delta Magnitude",
        "snr" => "Signal to Noise Ratio",
        "exptime" => "Exposure Time",
        "filt" => "Filter",
        other => other,
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Axis {
    pub name: String,
    pub input: AxisInput,
    pub kind: AxisKind,
    /// Grid step, `None` for a dynamic axis without a step.
    pub step: Option<f64>,
    pub units: String,
    pub long_name: String,
    /// `(start, stop)` of a fixed axis.
    range: Option<(f64, f64)>,
    /// Origin of the grid of a dynamic axis with a step.
    origin: Option<f64>,
    bins: Vec<Bin>,
}

impl Axis {
    /// Parse an axis from its parameter specification.
    ///
    /// Arguments
    /// -----------------
    /// * `name`: coordinate name (a lightcurve column, a source field, `filt` or `dmag`).
    /// * `input`: which kind of quantity the axis measures.
    /// * `spec`: a list `[]` (dynamic), `[start, step]` (dynamic with a step) or
    ///   `[start, stop, step]` (fixed), optionally followed by a units string. Null reads as
    ///   `[]`.
    ///
    /// Return
    /// ----------
    /// * The axis, or [`VirtObsError::Configuration`] on a malformed specification.
    pub fn from_spec(name: &str, input: AxisInput, spec: &ParValue) -> Result<Self, VirtObsError> {
        let items: &[ParValue] = match spec {
            ParValue::Null => &[],
            ParValue::List(items) => items,
            other => {
                return Err(VirtObsError::Configuration(format!(
                    "Coordinate specs of '{name}' must be a list, got {}",
                    other.par_type()
                )))
            }
        };
        let (numbers, units) = match items.split_last() {
            Some((ParValue::Str(units), rest)) => (rest, units.clone()),
            _ => (items, String::new()),
        };
        let numbers = numbers
            .iter()
            .map(|v| {
                v.as_f64().ok_or_else(|| {
                    VirtObsError::Configuration(format!(
                        "Coordinate specs of '{name}' must be numbers, got {}",
                        v.par_type()
                    ))
                })
            })
            .collect::<Result<Vec<f64>, _>>()?;

        let axis = match numbers.as_slice() {
            [] => Axis::dynamic(name, input, None),
            [_, step] if step.is_nan() || *step <= 0.0 => {
                return Err(VirtObsError::Configuration(format!(
                    "Step of coordinate '{name}' must be > 0, got {step}"
                )))
            }
            [start, step] => Axis::dynamic(name, input, Some((*start, *step))),
            [start, stop, step] => Axis::fixed(name, input, *start, *stop, *step)?,
            _ => {
                return Err(VirtObsError::Configuration(format!(
                    "Coordinate specs of '{name}' must have 0, 2 or 3 numbers, got {}",
                    numbers.len()
                )))
            }
        };
        Ok(Axis { units, ..axis })
    }

    pub fn fixed(
        name: &str,
        input: AxisInput,
        start: f64,
        stop: f64,
        step: f64,
    ) -> Result<Self, VirtObsError> {
        if step.is_nan() || step <= 0.0 || !start.is_finite() || !stop.is_finite() || stop < start {
            return Err(VirtObsError::Configuration(format!(
                "Invalid fixed axis '{name}': start={start}, stop={stop}, step={step}"
            )));
        }
        let n = ((stop - start) / step + BIN_TOLERANCE).floor() as usize + 1;
        Ok(Axis {
            name: name.to_string(),
            input,
            kind: AxisKind::Fixed,
            step: Some(step),
            units: String::new(),
            long_name: long_name(name).to_string(),
            range: Some((start, stop)),
            origin: None,
            bins: (0..n).map(|i| Bin::Value(start + i as f64 * step)).collect(),
        })
    }

    /// A dynamic axis, optionally with a `(start, step)` grid. The grid start is the
    /// first bin.
    pub fn dynamic(name: &str, input: AxisInput, grid: Option<(f64, f64)>) -> Self {
        Axis {
            name: name.to_string(),
            input,
            kind: AxisKind::Dynamic,
            step: grid.map(|(_, step)| step),
            units: String::new(),
            long_name: long_name(name).to_string(),
            range: None,
            origin: grid.map(|(start, _)| start),
            bins: grid.map(|(start, _)| vec![Bin::Value(start)]).unwrap_or_default(),
        }
    }

    pub fn len(&self) -> usize {
        self.bins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bins.is_empty()
    }

    pub fn bins(&self) -> &[Bin] {
        &self.bins
    }

    pub fn is_dynamic(&self) -> bool {
        self.kind == AxisKind::Dynamic
    }

    /// Locate a value without modifying the axis.
    pub(crate) fn slot(&self, value: &Bin) -> Result<Slot, VirtObsError> {
        match self.kind {
            AxisKind::Fixed => {
                let Bin::Value(v) = value else {
                    return Err(VirtObsError::InvalidInputValue(format!(
                        "Fixed axis '{}' only accepts numbers, got '{value}'",
                        self.name
                    )));
                };
                let (start, stop) = self.range.unwrap_or((f64::NAN, f64::NAN));
                let tol = BIN_TOLERANCE * start.abs().max(stop.abs()).max(1.0);
                if v.is_nan() || *v < start - tol || *v > stop + tol {
                    return Err(VirtObsError::ValueOutOfRange {
                        axis: self.name.clone(),
                        value: *v,
                        start,
                        stop,
                    });
                }
                // last bin whose lower edge is not above the value
                let above = self
                    .bins
                    .partition_point(|b| b.cmp_bins(value) != Ordering::Greater);
                Ok(Slot::Existing(above.saturating_sub(1)))
            }
            AxisKind::Dynamic => {
                let value = match (value, self.origin, self.step) {
                    (Bin::Value(v), _, _) if v.is_nan() => {
                        return Err(VirtObsError::InvalidInputValue(format!(
                            "NaN value for dynamic axis '{}'",
                            self.name
                        )))
                    }
                    (Bin::Value(v), Some(origin), Some(step)) => {
                        Bin::Value(origin + ((v - origin) / step).round() * step)
                    }
                    _ => value.clone(),
                };
                match self.bins.binary_search_by(|b| b.cmp_bins(&value)) {
                    Ok(i) => Ok(Slot::Existing(i)),
                    Err(i) => Ok(Slot::Insert(i, value)),
                }
            }
        }
    }

    pub(crate) fn insert(&mut self, position: usize, bin: Bin) {
        self.bins.insert(position, bin);
    }

    /// Union of the bins of two axes with the same name.
    ///
    /// Return
    /// ----------
    /// * The union axis and, for each input axis, the position of each of its bins in the
    ///   union.
    pub(crate) fn union(&self, other: &Axis) -> Result<(Axis, Vec<usize>, Vec<usize>), VirtObsError> {
        if self.name != other.name || self.input != other.input {
            return Err(VirtObsError::Configuration(format!(
                "Cannot merge axis '{}' ({}) with axis '{}' ({})",
                self.name, self.input, other.name, other.input
            )));
        }

        let mut bins = Vec::with_capacity(self.len() + other.len());
        let mut left = Vec::with_capacity(self.len());
        let mut right = Vec::with_capacity(other.len());
        let (mut i, mut j) = (0, 0);
        while i < self.len() || j < other.len() {
            let order = match (self.bins.get(i), other.bins.get(j)) {
                (Some(a), Some(b)) => a.cmp_bins(b),
                (Some(_), None) => Ordering::Less,
                _ => Ordering::Greater,
            };
            match order {
                Ordering::Less => {
                    left.push(bins.len());
                    bins.push(self.bins[i].clone());
                    i += 1;
                }
                Ordering::Greater => {
                    right.push(bins.len());
                    bins.push(other.bins[j].clone());
                    j += 1;
                }
                Ordering::Equal => {
                    left.push(bins.len());
                    right.push(bins.len());
                    bins.push(self.bins[i].clone());
                    i += 1;
                    j += 1;
                }
            }
        }

        let range = match (self.range, other.range) {
            (Some((s1, e1)), Some((s2, e2))) => Some((s1.min(s2), e1.max(e2))),
            _ => None,
        };
        let kind = if range.is_some() {
            AxisKind::Fixed
        } else {
            AxisKind::Dynamic
        };
        let merged = Axis {
            kind,
            range,
            bins,
            ..self.clone()
        };
        Ok((merged, left, right))
    }
}
