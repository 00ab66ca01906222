use std::sync::Arc;

use camino::Utf8PathBuf;
use virtobs::catalog::{CatalogRow, CsvCatalog};
use virtobs::database::MemoryDatabase;
use virtobs::dataset::DataType;
use virtobs::fetcher::{new_file_lock, Fetcher};
use virtobs::histogram::Histogram;
use virtobs::observatory::demo::DemoObservatory;
use virtobs::observatory::{Observatory, Reduced};
use virtobs::parameters::{ParMap, ParValue};
use virtobs::tables::TableStore;
use virtobs::virtobs_errors::VirtObsError;

/// Catalog of bright stars spread over a few degrees of RA.
fn demo_catalog(num_rows: usize) -> CsvCatalog {
    let rows = (0..num_rows)
        .map(|i| {
            CatalogRow::new(i, &format!("demo_star_{i}"), 120.0 + 0.4 * i as f64, -12.5)
                .with_mag(15.0 + 0.25 * i as f64, 0.05, "R")
        })
        .collect();
    CsvCatalog::from_rows("demo_catalog", rows)
}

/// Fetch simulated photometry for a small catalog, reduce every source to lightcurves and
/// accumulate them into a detection histogram.
///
/// Arguments
/// -----------------
/// * `data_root`: folder where the data containers are written.
///
/// Return
/// ----------
/// * The filled histogram.
fn run_pipeline(data_root: Utf8PathBuf) -> Result<Histogram, VirtObsError> {
    let mut sim_args = ParMap::new();
    sim_args.insert("num_points".into(), ParValue::Int(200));
    sim_args.insert("seed".into(), ParValue::Int(42));

    let mut inputs = ParMap::new();
    inputs.insert("sim_args".into(), ParValue::Map(sim_args));
    inputs.insert("num_threads_download".into(), ParValue::Int(4));
    inputs.insert("show_progress".into(), ParValue::Bool(true));

    let observatory = Arc::new(DemoObservatory::with_inputs(&inputs)?);
    let database = Arc::new(MemoryDatabase::new());
    let mut fetcher = Fetcher::new(
        observatory.clone(),
        Arc::new(demo_catalog(12)),
        database.clone(),
        TableStore::new(data_root),
        new_file_lock(),
        "demo_project",
    );

    let num_loaded = fetcher.fetch_batch(0, None, true, &ParMap::new(), &ParMap::new())?;
    println!(
        "fetched {num_loaded} sources ({} in the database)",
        database.source_count()
    );

    let mut histogram = Histogram::new();
    histogram.initialize()?;
    for source in fetcher.sources() {
        let mut source = source.clone();
        let Reduced::Lightcurves(lcs) = observatory.reduce(&mut source, DataType::Photometry, &ParMap::new())?
        else {
            continue;
        };
        for lc in &lcs {
            let report = histogram.add_lightcurve(lc, &source)?;
            println!(
                "{:<14} filter={} points={:>4} mag_mean={:.3} rms={:.3} added={} skipped={}",
                source.name, lc.filter, lc.number, lc.mag_mean, lc.mag_rms, report.added, report.skipped
            );
        }
    }
    Ok(histogram)
}

fn main() -> Result<(), VirtObsError> {
    let data_root = std::env::temp_dir().join("virtobs_demo_pipeline");
    let data_root = Utf8PathBuf::from_path_buf(data_root)
        .map_err(|p| VirtObsError::InvalidInputValue(format!("non UTF-8 path {}", p.display())))?;

    let histogram = run_pipeline(data_root.clone())?;
    for score in histogram.array_names() {
        if let Some(counts) = histogram.counts(&score) {
            println!("{score}: {} entries", counts.total());
        }
    }
    println!("histogram size: {:.2} kB", histogram.actual_size("kb")?);

    std::fs::remove_dir_all(&data_root)?;
    Ok(())
}
