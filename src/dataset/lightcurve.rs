//! Reduced photometric datasets.
//!
//! A [`Lightcurve`] holds the points of one filter, sorted by time, in the standard
//! column layout produced by the reducer:
//!
//! | column    | type    | content                                   |
//! |-----------|---------|-------------------------------------------|
//! | `mjd`     | float64 | Modified Julian Date                      |
//! | `mag`     | float64 | magnitude                                 |
//! | `mag_err` | float64 | magnitude error                           |
//! | `filter`  | utf8    | filter name (after the observatory filtmap)|
//! | `flag`    | bool    | bad point marker                          |
//! | `exptime` | float64 | exposure time in seconds                  |
//! | `flux`    | float64 | flux in microJansky                       |
//! | `flux_err`| float64 | flux error                                |
//! | `snr`     | float64 | flux / flux_err                           |
use arrow_array::RecordBatch;

use crate::constants::{AltData, SECONDS_PER_DAY, MJD};
use crate::dataset::columns::{f64_column, flag_column};
use crate::dataset::DatasetLocation;
use crate::reduction::stats::{
    coefficient_of_variation, diffs, nanmax, nanmean, nanmedian, nanmin, nanstd, robust_mean_rms,
};
use crate::reduction::ReducerParams;
use crate::tables::TableStore;
use crate::virtobs_errors::VirtObsError;

#[derive(Debug, Clone, Default)]
pub struct Lightcurve {
    pub id: Option<u64>,
    pub source_name: String,
    pub source_id: Option<u64>,
    pub project: String,
    pub observatory: String,
    pub filter: String,
    /// Ids of the raw datasets this lightcurve was reduced from.
    pub raw_data_ids: Vec<u64>,
    pub location: DatasetLocation,
    pub altdata: AltData,

    pub reduction_number: usize,
    pub reduction_total: usize,

    /// Number of points
    pub number: usize,
    /// Points with `flag == false` and a finite magnitude
    pub num_good: usize,
    pub time_start: MJD,
    pub time_end: MJD,
    /// Median exposure time (seconds)
    pub exp_time: f64,
    /// Median time between points (days)
    pub cadence: f64,
    /// Points per second, `1 / (cadence * 86400)`
    pub frame_rate: f64,
    pub is_uniformly_sampled: bool,

    pub flux_mean: f64,
    pub flux_min: f64,
    pub flux_max: f64,
    pub mag_mean: f64,
    pub mag_rms: f64,
    pub mag_mean_robust: f64,
    pub mag_rms_robust: f64,
    pub mag_min: f64,
    pub mag_max: f64,
    /// Extrema over every finite magnitude, flagged or not.
    pub mag_min_raw: f64,
    pub mag_max_raw: f64,

    data: Option<RecordBatch>,
}

impl Lightcurve {
    /// Wrap a reduced table (already in the standard layout) and compute its statistics.
    pub fn new(data: RecordBatch, filter: &str, params: &ReducerParams) -> Result<Self, VirtObsError> {
        let mut lc = Lightcurve {
            filter: filter.to_string(),
            ..Default::default()
        };
        lc.data = Some(data);
        lc.calc_stats(params)?;
        Ok(lc)
    }

    pub fn data(&self) -> Option<&RecordBatch> {
        self.data.as_ref()
    }

    pub fn without_payload(&self) -> Self {
        Lightcurve {
            data: None,
            ..self.clone()
        }
    }

    /// Single originating raw dataset, if there is exactly one.
    pub fn raw_data_id(&self) -> Option<u64> {
        match self.raw_data_ids.as_slice() {
            [id] => Some(*id),
            _ => None,
        }
    }

    /// True if both describe the same stored record.
    pub fn same_record(&self, other: &Lightcurve) -> bool {
        match (&self.location.key, &other.location.key) {
            (Some(a), Some(b)) => a == b && self.location.filename() == other.location.filename(),
            _ => {
                self.observatory == other.observatory
                    && self.filter == other.filter
                    && self.reduction_number == other.reduction_number
                    && self.time_start == other.time_start
            }
        }
    }

    /// Recompute every summary statistic from the table.
    pub fn calc_stats(&mut self, params: &ReducerParams) -> Result<(), VirtObsError> {
        let Some(batch) = self.data.as_ref() else {
            return Err(VirtObsError::InvalidInputValue(
                "Lightcurve has no data to compute statistics on".into(),
            ));
        };
        let mjd = f64_column(batch, "mjd")?.unwrap_or_default();
        let mag = f64_column(batch, "mag")?.unwrap_or_default();
        let flux = f64_column(batch, "flux")?.unwrap_or_default();
        let exptime = f64_column(batch, "exptime")?.unwrap_or_default();
        let flag = flag_column(batch, "flag")?.unwrap_or_else(|| vec![false; batch.num_rows()]);

        let good: Vec<bool> = flag
            .iter()
            .zip(&mag)
            .map(|(f, m)| !*f && !m.is_nan())
            .collect();
        let pick = |values: &[f64]| -> Vec<f64> {
            values
                .iter()
                .zip(&good)
                .filter_map(|(v, g)| g.then_some(*v))
                .collect()
        };
        let good_mag = pick(&mag);
        let good_flux = pick(&flux);

        self.number = batch.num_rows();
        self.num_good = good_mag.len();
        self.time_start = nanmin(&mjd);
        self.time_end = nanmax(&mjd);
        self.exp_time = nanmedian(&exptime);

        let dt = diffs(&mjd);
        self.cadence = nanmedian(&dt);
        self.frame_rate = 1.0 / (self.cadence * SECONDS_PER_DAY);
        self.is_uniformly_sampled =
            !dt.is_empty() && coefficient_of_variation(&dt) < params.uniform_sampling_cv;

        self.flux_mean = nanmean(&good_flux);
        self.flux_min = nanmin(&good_flux);
        self.flux_max = nanmax(&good_flux);

        self.mag_mean = nanmean(&good_mag);
        self.mag_rms = nanstd(&good_mag);
        let (robust_mean, robust_rms) =
            robust_mean_rms(&good_mag, params.outlier_sigma, params.outlier_max_iterations);
        self.mag_mean_robust = robust_mean;
        self.mag_rms_robust = robust_rms;
        self.mag_min = nanmin(&good_mag);
        self.mag_max = nanmax(&good_mag);
        self.mag_min_raw = nanmin(&mag);
        self.mag_max_raw = nanmax(&mag);
        Ok(())
    }

    pub fn container_path(&self, store: &TableStore) -> Result<camino::Utf8PathBuf, VirtObsError> {
        self.location.container_path(store, Some(&self.observatory))
    }

    /// Write the table to disk. The filename and key must have been set by the reducer.
    pub fn save(&self, store: &TableStore, overwrite: bool) -> Result<(), VirtObsError> {
        let batch = self.data.as_ref().ok_or_else(|| {
            VirtObsError::Persistence(format!("No data to save for lightcurve of {}", self.source_name))
        })?;
        let container = self.container_path(store)?;
        store.save(&container, self.location.key_or_err()?, batch, &self.altdata, overwrite)
    }

    pub fn load(&mut self, store: &TableStore) -> Result<(), VirtObsError> {
        let container = self.container_path(store)?;
        let (batch, _) = store.load(&container, self.location.key_or_err()?)?;
        self.data = Some(batch);
        Ok(())
    }

    pub fn delete_data_from_disk(&self, store: &TableStore) -> Result<bool, VirtObsError> {
        match (self.container_path(store), self.location.key.as_deref()) {
            (Ok(container), Some(key)) => store.delete_key(&container, key),
            _ => Ok(false),
        }
    }
}
