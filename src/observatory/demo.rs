//! Demo observatory producing simulated photometry.
//!
//! Nothing is downloaded: [`DemoObservatory::fetch_data_from_observatory`] draws a
//! lightcurve with [`simulate_lightcurve`] and sleeps for a configurable time to stand in
//! for the network latency of a real observatory.
//!
//! ## Example
//! -----------------
//! ```rust,no_run
//! use rand::SeedableRng;
//! use virtobs::observatory::demo::{simulate_lightcurve, SimArgs};
//!
//! let mut rng = rand::rngs::StdRng::seed_from_u64(42);
//! let args = SimArgs { num_points: 10, ..SimArgs::default() };
//! let batch = simulate_lightcurve(&args, &mut rng).unwrap();
//! assert_eq!(batch.num_rows(), 10);
//! ```
use std::sync::Arc;
use std::time::Duration;

use arrow_array::{ArrayRef, BooleanArray, Float64Array, RecordBatch, StringArray};
use camino::Utf8Path;
use once_cell::sync::Lazy;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal, Poisson};
use regex::Regex;
use serde_json::Value;
use tracing::debug;

use crate::catalog::CatalogRow;
use crate::constants::AltData;
use crate::observatory::{Observatory, ObservatoryPars};
use crate::parameters::{ParMap, ParType, ParValue};
use crate::virtobs_errors::VirtObsError;

static URL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^https?://[A-Za-z0-9](?:[A-Za-z0-9-]*[A-Za-z0-9])?(?:\.[A-Za-z0-9-]+)*(?::\d+)?(?:/\S*)?$")
        .expect("valid URL regex")
});

/// Arguments of [`simulate_lightcurve`].
#[derive(Debug, Clone, PartialEq)]
pub struct SimArgs {
    pub num_points: usize,
    pub mjd_range: (f64, f64),
    /// Draw times uniformly in `mjd_range` instead of a regular grid.
    pub shuffle_time: bool,
    pub mag_err_range: (f64, f64),
    pub mean_mag: f64,
    pub exptime: f64,
    pub filter: String,
    pub seed: Option<u64>,
}

impl Default for SimArgs {
    fn default() -> Self {
        SimArgs {
            num_points: 100,
            mjd_range: (57000.0, 58000.0),
            shuffle_time: false,
            mag_err_range: (0.09, 0.11),
            mean_mag: 18.0,
            exptime: 30.0,
            filter: "R".to_string(),
            seed: None,
        }
    }
}

impl SimArgs {
    /// Read the simulation arguments from a parameter mapping, unknown keys are rejected.
    pub fn from_par_map(map: &ParMap) -> Result<Self, VirtObsError> {
        let mut args = SimArgs::default();
        let bad = |key: &str, expected: &str| {
            VirtObsError::InvalidInputValue(format!("sim_args '{key}' should be {expected}"))
        };
        let pair = |key: &str, v: &ParValue| -> Result<(f64, f64), VirtObsError> {
            match v.as_f64_list().as_deref() {
                Some([a, b]) => Ok((*a, *b)),
                _ => Err(bad(key, "a pair of numbers")),
            }
        };
        for (key, v) in map {
            match key.as_str() {
                "num_points" => {
                    args.num_points = v
                        .as_i64()
                        .and_then(|n| usize::try_from(n).ok())
                        .ok_or_else(|| bad(key, "a non-negative integer"))?
                }
                "mjd_range" => args.mjd_range = pair(key, v)?,
                "shuffle_time" => args.shuffle_time = v.as_bool().ok_or_else(|| bad(key, "a bool"))?,
                "mag_err_range" => args.mag_err_range = pair(key, v)?,
                "mean_mag" => args.mean_mag = v.as_f64().ok_or_else(|| bad(key, "a number"))?,
                "exptime" => args.exptime = v.as_f64().ok_or_else(|| bad(key, "a number"))?,
                "filter" => args.filter = v.as_str().ok_or_else(|| bad(key, "a string"))?.to_string(),
                "seed" => {
                    args.seed = match v {
                        ParValue::Null => None,
                        _ => Some(
                            v.as_i64()
                                .and_then(|n| u64::try_from(n).ok())
                                .ok_or_else(|| bad(key, "a non-negative integer"))?,
                        ),
                    }
                }
                other => {
                    return Err(VirtObsError::InvalidInputValue(format!(
                        "Unknown simulation argument '{other}'"
                    )))
                }
            }
        }
        Ok(args)
    }
}

/// Draw a simulated lightcurve.
///
/// Times are evenly spaced over `mjd_range` (or uniform random when `shuffle_time`),
/// errors are uniform in `mag_err_range` and magnitudes are normal around `mean_mag` with
/// a standard deviation equal to each point's error. No point is flagged.
///
/// Return
/// ----------
/// * A table with columns `mjd`, `mag`, `mag_err`, `filter`, `flag`, `exptime`.
pub fn simulate_lightcurve(args: &SimArgs, rng: &mut impl Rng) -> Result<RecordBatch, VirtObsError> {
    let n = args.num_points;
    let (t0, t1) = args.mjd_range;
    let (e0, e1) = args.mag_err_range;
    if t1 < t0 || e1 < e0 || e0 < 0.0 {
        return Err(VirtObsError::InvalidInputValue(format!(
            "Invalid simulation ranges: mjd_range={:?}, mag_err_range={:?}",
            args.mjd_range, args.mag_err_range
        )));
    }

    let mjd: Vec<f64> = if args.shuffle_time {
        (0..n).map(|_| rng.random_range(t0..=t1)).collect()
    } else {
        let step = if n > 1 { (t1 - t0) / (n - 1) as f64 } else { 0.0 };
        (0..n).map(|i| t0 + i as f64 * step).collect()
    };
    let mag_err: Vec<f64> = (0..n).map(|_| rng.random_range(e0..=e1)).collect();
    let mag = mag_err
        .iter()
        .map(|err| Ok(Normal::new(args.mean_mag, *err)?.sample(rng)))
        .collect::<Result<Vec<f64>, VirtObsError>>()?;

    let columns: Vec<(&str, ArrayRef)> = vec![
        ("mjd", Arc::new(Float64Array::from(mjd)) as ArrayRef),
        ("mag", Arc::new(Float64Array::from(mag)) as ArrayRef),
        ("mag_err", Arc::new(Float64Array::from(mag_err)) as ArrayRef),
        ("filter", Arc::new(StringArray::from(vec![args.filter.as_str(); n])) as ArrayRef),
        ("flag", Arc::new(BooleanArray::from(vec![false; n])) as ArrayRef),
        ("exptime", Arc::new(Float64Array::from(vec![args.exptime; n])) as ArrayRef),
    ];
    Ok(RecordBatch::try_from_iter(columns)?)
}

/// An observatory that simulates its data.
#[derive(Debug, Clone)]
pub struct DemoObservatory {
    pars: ObservatoryPars,
}

impl DemoObservatory {
    /// Create the demo observatory.
    ///
    /// Arguments
    /// -----------------
    /// * `cfg_file`: optional YAML configuration (section `observatories`, sub-key `demo`).
    /// * `inputs`: caller overrides.
    pub fn new(cfg_file: Option<&Utf8Path>, inputs: &ParMap) -> Result<Self, VirtObsError> {
        let mut pars = ObservatoryPars::new("demo")?;
        pars.add_par("demo_boolean", true, &[ParType::Bool], "A boolean parameter")?;
        pars.add_par("demo_string", "foo", &[ParType::Str], "A string parameter")?;
        pars.add_par("demo_url", "http://www.example.com", &[ParType::Str], "A URL parameter")?;
        pars.add_par(
            "wait_time",
            0.0,
            &[ParType::Float],
            "Time to wait to simulate downloading from web.",
        )?;
        pars.add_par(
            "wait_time_poisson",
            0.0,
            &[ParType::Float],
            "Mean of a Poisson distributed number of seconds added to the wait time.",
        )?;
        pars.add_par(
            "sim_args",
            ParMap::new(),
            &[ParType::Map],
            "Arguments to pass to the simulator.",
        )?;
        pars.params_mut().set(
            "download_pars_list",
            vec!["wait_time", "wait_time_poisson", "sim_args"],
        )?;
        pars.finalize(cfg_file, inputs)?;

        let url = pars.params().get_str("demo_url")?;
        if !URL_RE.is_match(url) {
            return Err(VirtObsError::Configuration(format!(
                "demo_url is not a valid URL: {url}"
            )));
        }
        // validate once, a malformed simulator setup fails here rather than per row
        SimArgs::from_par_map(&pars.params().get_map("sim_args")?)?;

        Ok(DemoObservatory { pars })
    }

    pub fn with_inputs(inputs: &ParMap) -> Result<Self, VirtObsError> {
        Self::new(None, inputs)
    }

    fn number_arg(&self, fetch_args: &ParMap, key: &str) -> Result<f64, VirtObsError> {
        match fetch_args.get(key) {
            Some(v) => v.as_f64().ok_or_else(|| {
                VirtObsError::InvalidInputValue(format!("Fetch argument '{key}' should be a number"))
            }),
            None => self.pars.params().get_f64(key),
        }
    }
}

impl Observatory for DemoObservatory {
    fn name(&self) -> &str {
        self.pars.obs_name()
    }

    fn pars(&self) -> &ObservatoryPars {
        &self.pars
    }

    /// Simulate a download.
    ///
    /// `fetch_args` may override `wait_time` and `wait_time_poisson`, and its `sim_args`
    /// mapping is merged over the configured one. The call sleeps for `wait_time` plus a
    /// Poisson draw of mean `wait_time_poisson` seconds.
    fn fetch_data_from_observatory(
        &self,
        cat_row: &CatalogRow,
        fetch_args: &ParMap,
    ) -> Result<(RecordBatch, AltData), VirtObsError> {
        let wait_time = self.number_arg(fetch_args, "wait_time")?;
        let wait_time_poisson = self.number_arg(fetch_args, "wait_time_poisson")?;
        let mut sim_args = self.pars.params().get_map("sim_args")?;
        if let Some(ParValue::Map(extra)) = fetch_args.get("sim_args") {
            sim_args.extend(extra.iter().map(|(k, v)| (k.clone(), v.clone())));
        }
        let sim_args = SimArgs::from_par_map(&sim_args)?;

        let mut rng = match sim_args.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        let extra_wait = if wait_time_poisson > 0.0 {
            Poisson::new(wait_time_poisson)?.sample(&mut rng)
        } else {
            0.0
        };
        let total_wait = (wait_time + extra_wait).max(0.0);

        debug!(source = %cat_row.name, index = cat_row.index, "simulating demo data");
        let data = simulate_lightcurve(&sim_args, &mut rng)?;
        let mut altdata = AltData::new();
        altdata.insert(
            "demo_boolean".into(),
            Value::Bool(self.pars.params().get_bool("demo_boolean")?),
        );
        altdata.insert("wait_time".into(), Value::from(total_wait));

        if total_wait > 0.0 {
            std::thread::sleep(Duration::from_secs_f64(total_wait));
        }
        debug!(
            source = %cat_row.name,
            wait_time = total_wait,
            "finished simulated download"
        );
        Ok((data, altdata))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::columns::f64_column;

    #[test]
    fn test_default_parameters() {
        let obs = DemoObservatory::with_inputs(&ParMap::new()).unwrap();
        assert_eq!(obs.name(), "demo");
        assert_eq!(
            obs.pars().download_pars_list().unwrap(),
            vec!["sim_args", "wait_time", "wait_time_poisson"]
        );
        assert_eq!(obs.pars().params().get_str("demo_string").unwrap(), "foo");
    }

    #[test]
    fn test_invalid_url() {
        let inputs = ParMap::from([("demo_url".to_string(), ParValue::from("not a url"))]);
        assert!(matches!(
            DemoObservatory::with_inputs(&inputs),
            Err(VirtObsError::Configuration(_))
        ));
    }

    #[test]
    fn test_simulate_lightcurve() {
        let mut rng = StdRng::seed_from_u64(1);
        let args = SimArgs {
            num_points: 50,
            ..SimArgs::default()
        };
        let batch = simulate_lightcurve(&args, &mut rng).unwrap();
        assert_eq!(batch.num_rows(), 50);
        let mjd = f64_column(&batch, "mjd").unwrap().unwrap();
        assert_eq!(mjd[0], 57000.0);
        assert_eq!(mjd[49], 58000.0);
        let err = f64_column(&batch, "mag_err").unwrap().unwrap();
        assert!(err.iter().all(|e| (0.09..=0.11).contains(e)));
    }

    #[test]
    fn test_fetch_with_overrides() {
        let obs = DemoObservatory::with_inputs(&ParMap::new()).unwrap();
        let row = CatalogRow::new(0, "star", 10.0, 20.0);
        let args = ParMap::from([(
            "sim_args".to_string(),
            ParValue::Map(ParMap::from([
                ("num_points".to_string(), ParValue::Int(7)),
                ("seed".to_string(), ParValue::Int(3)),
            ])),
        )]);
        let (data, altdata) = obs.fetch_data_from_observatory(&row, &args).unwrap();
        assert_eq!(data.num_rows(), 7);
        assert_eq!(altdata["demo_boolean"], Value::Bool(true));
        assert_eq!(altdata["wait_time"], serde_json::json!(0.0));

        let bad = ParMap::from([(
            "sim_args".to_string(),
            ParValue::Map(ParMap::from([("bananas".to_string(), ParValue::Int(7))])),
        )]);
        assert!(obs.fetch_data_from_observatory(&row, &bad).is_err());
    }
}
