mod common;

use approx::assert_relative_eq;
use serde_json::json;
use virtobs::constants::{AltData, PHOT_ZP};
use virtobs::dataset::columns::f64_column;
use virtobs::dataset::{DataType, RawData, Source};
use virtobs::reduction::{reduce_to_lightcurves, InitKwargs, ReducerParams};
use virtobs::virtobs_errors::VirtObsError;

use crate::common::{photometry_batch, with_exptime};

fn raw_from(batch: arrow_array::RecordBatch, altdata: AltData) -> RawData {
    RawData::new("star", "demo", DataType::Photometry, Some(batch), altdata).unwrap()
}

fn flux(mag: f64) -> f64 {
    10f64.powf(-0.4 * (mag - PHOT_ZP))
}

#[test]
fn test_two_filters_give_two_lightcurves() {
    let mjd = [57005.0, 57001.0, 57009.0, 57003.0, 57007.0, 57002.0, 57006.0, 57004.0, 57008.0, 57000.0];
    let mag = [18.0, 18.2, 17.9, 18.1, 18.3, 19.0, 19.2, 18.8, 19.1, 18.9];
    let filter = ["g", "g", "g", "g", "g", "r", "r", "r", "r", "r"];
    let batch = with_exptime(&photometry_batch(&mjd, &mag, &filter, &[false; 10]), 30.0);
    let raw = raw_from(batch, AltData::new());

    let params = ReducerParams::builder().drop_bad(false).build().unwrap();
    let init = InitKwargs::from_raw_data(&[&raw]);
    let lcs = reduce_to_lightcurves(&[&raw], None, &init, &params).unwrap();
    assert_eq!(lcs.len(), 2);

    for lc in &lcs {
        assert_eq!(lc.number, 5);
        assert_eq!(lc.reduction_total, 2);
        let times = f64_column(lc.data().unwrap(), "mjd").unwrap().unwrap();
        assert!(times.windows(2).all(|w| w[0] <= w[1]));

        let expected: Vec<f64> = mag
            .iter()
            .zip(&filter)
            .filter(|(_, f)| **f == lc.filter)
            .map(|(m, _)| flux(*m))
            .collect();
        let expected_mean = expected.iter().sum::<f64>() / expected.len() as f64;
        assert_relative_eq!(lc.flux_mean, expected_mean, max_relative = 1e-12);
        assert_relative_eq!(lc.exp_time, 30.0);
    }

    // sorted by start time: r starts at 57000
    assert_eq!(lcs[0].filter, "r");
    assert_eq!(lcs[0].reduction_number, 1);
    assert_eq!(lcs[1].filter, "g");
    assert_eq!(lcs[1].reduction_number, 2);
    assert_relative_eq!(lcs[1].time_start, 57001.0);
    assert_relative_eq!(lcs[1].time_end, 57009.0);
}

#[test]
fn test_outliers_and_flags() {
    let outliers = [5, 8, 12];
    let flagged = [5, 10, 15];
    let mjd: Vec<f64> = (0..20).map(|i| 58000.0 + i as f64).collect();
    let mag: Vec<f64> = (0..20)
        .map(|i| {
            if outliers.contains(&i) {
                25.0
            } else {
                18.0 + 0.01 * ((i % 5) as f64 - 2.0)
            }
        })
        .collect();
    let flag: Vec<bool> = (0..20).map(|i| flagged.contains(&i)).collect();
    let batch = with_exptime(&photometry_batch(&mjd, &mag, &["V"; 20], &flag), 10.0);
    let raw = raw_from(batch, AltData::new());

    let params = ReducerParams::default();
    let init = InitKwargs::from_raw_data(&[&raw]);
    let lcs = reduce_to_lightcurves(&[&raw], None, &init, &params).unwrap();
    assert_eq!(lcs.len(), 1);
    let lc = &lcs[0];

    assert_eq!(lc.number, 20);
    assert_eq!(lc.num_good, 20 - flagged.len());

    let mean_of = |skip: &[usize]| -> Vec<f64> {
        (0..20)
            .filter(|i| !skip.contains(i))
            .map(|i| mag[i])
            .collect()
    };
    let good = mean_of(&flagged);
    let good_mean = good.iter().sum::<f64>() / good.len() as f64;
    assert_relative_eq!(lc.mag_mean, good_mean, max_relative = 1e-12);

    let clean = mean_of(&[5, 8, 10, 12, 15]);
    let clean_mean = clean.iter().sum::<f64>() / clean.len() as f64;
    let clean_rms =
        (clean.iter().map(|m| (m - clean_mean).powi(2)).sum::<f64>() / clean.len() as f64).sqrt();
    assert_relative_eq!(lc.mag_mean_robust, clean_mean, max_relative = 1e-12);
    assert_relative_eq!(lc.mag_rms_robust, clean_rms, max_relative = 1e-9);
    assert!(lc.mag_rms > lc.mag_rms_robust);

    // flagged outlier at 5 only shows in the raw extrema, the others are good points
    assert_relative_eq!(lc.mag_max, 25.0);
    assert_relative_eq!(lc.mag_max_raw, 25.0);
    assert_relative_eq!(lc.mag_min_raw, 17.98, max_relative = 1e-12);
}

#[test]
fn test_drop_bad_removes_flagged_points() {
    let mjd: Vec<f64> = (0..6).map(|i| 58000.0 + i as f64).collect();
    let flag = [false, true, false, true, false, false];
    let batch = with_exptime(&photometry_batch(&mjd, &[18.0; 6], &["V"; 6], &flag), 10.0);
    let raw = raw_from(batch, AltData::new());

    let params = ReducerParams::builder().drop_bad(true).build().unwrap();
    let init = InitKwargs::from_raw_data(&[&raw]);
    let lcs = reduce_to_lightcurves(&[&raw], None, &init, &params).unwrap();
    assert_eq!(lcs[0].number, 4);
    assert_eq!(lcs[0].num_good, 4);
}

#[test]
fn test_missing_exposure_time() {
    let batch = photometry_batch(&[1.0, 2.0], &[18.0, 18.1], &["V", "V"], &[false, false]);
    let raw = raw_from(batch, AltData::new());
    let init = InitKwargs::from_raw_data(&[&raw]);
    let err = reduce_to_lightcurves(&[&raw], None, &init, &ReducerParams::default()).unwrap_err();
    match err {
        VirtObsError::InvalidInputValue(msg) => assert!(msg.contains("exposure time")),
        other => panic!("unexpected error {other:?}"),
    }
}

#[test]
fn test_exposure_time_from_altdata_string() {
    let batch = photometry_batch(&[1.0, 2.0, 3.0], &[18.0, 18.1, 18.2], &["V"; 3], &[false; 3]);
    let mut altdata = AltData::new();
    altdata.insert("exptime".into(), json!("25.0"));
    let raw = raw_from(batch, altdata);
    let init = InitKwargs::from_raw_data(&[&raw]);
    let lcs = reduce_to_lightcurves(&[&raw], None, &init, &ReducerParams::default()).unwrap();
    assert_relative_eq!(lcs[0].exp_time, 25.0);
    assert_relative_eq!(lcs[0].cadence, 1.0);
    assert_relative_eq!(lcs[0].frame_rate, 1.0 / 86_400.0);
    assert!(lcs[0].is_uniformly_sampled);
}

#[test]
fn test_mag_range_drops_far_datasets() {
    let near = with_exptime(&photometry_batch(&[1.0, 2.0], &[18.0, 18.5], &["V"; 2], &[false; 2]), 5.0);
    let far = with_exptime(&photometry_batch(&[3.0, 4.0], &[21.0, 21.2], &["V"; 2], &[false; 2]), 5.0);
    let near = raw_from(near, AltData::new());
    let far = raw_from(far, AltData::new());

    let mut source = Source::new("star", "proj");
    source.mag = Some(18.0);
    let params = ReducerParams::builder().mag_range(Some(0.5)).build().unwrap();
    let init = InitKwargs::from_raw_data(&[&near, &far]);
    let lcs = reduce_to_lightcurves(&[&near, &far], Some(&source), &init, &params).unwrap();
    assert_eq!(lcs.len(), 1);
    assert_eq!(lcs[0].number, 2);
    assert_relative_eq!(lcs[0].time_end, 2.0);

    // the boundary is inclusive: median 18.25
    let params = ReducerParams::builder().mag_range(Some(0.25)).build().unwrap();
    let lcs = reduce_to_lightcurves(&[&near], Some(&source), &init, &params).unwrap();
    assert_eq!(lcs.len(), 1);
}

#[test]
fn test_non_photometry_input() {
    let batch = photometry_batch(&[1.0], &[18.0], &["V"], &[false]);
    let raw = RawData::new("star", "demo", DataType::Spectra, Some(batch), AltData::new()).unwrap();
    let init = InitKwargs::from_raw_data(&[&raw]);
    assert!(matches!(
        reduce_to_lightcurves(&[&raw], None, &init, &ReducerParams::default()),
        Err(VirtObsError::InvalidInputType(_))
    ));
}
