#![allow(dead_code)]

use std::sync::Arc;

use arrow_array::{ArrayRef, BooleanArray, Float64Array, RecordBatch, StringArray};
use camino::Utf8PathBuf;
use tempfile::TempDir;
use virtobs::catalog::{CatalogRow, CsvCatalog};
use virtobs::database::{MemoryDatabase, Persistence, Transaction};
use virtobs::dataset::{RawData, Source};
use virtobs::fetcher::{new_file_lock, Fetcher};
use virtobs::observatory::demo::DemoObservatory;
use virtobs::parameters::{ParMap, ParValue};
use virtobs::tables::TableStore;
use virtobs::virtobs_errors::VirtObsError;

pub const PROJECT: &str = "test_project";

/// Build a parameter map from `(name, value)` pairs.
pub fn par_map<const N: usize>(pairs: [(&str, ParValue); N]) -> ParMap {
    pairs
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect()
}

/// Catalog of `n` stars, all within the same RA degree so their data share one container.
pub fn small_catalog(n: usize) -> CsvCatalog {
    let rows = (0..n)
        .map(|i| CatalogRow::new(i, &format!("star{i}"), 10.0 + 0.05 * i as f64, 20.0))
        .collect();
    CsvCatalog::from_rows("test_catalog", rows)
}

/// Photometry table in the standard column layout.
pub fn photometry_batch(mjd: &[f64], mag: &[f64], filter: &[&str], flag: &[bool]) -> RecordBatch {
    let n = mjd.len();
    let columns: Vec<(&str, ArrayRef)> = vec![
        ("mjd", Arc::new(Float64Array::from(mjd.to_vec())) as ArrayRef),
        ("mag", Arc::new(Float64Array::from(mag.to_vec())) as ArrayRef),
        ("mag_err", Arc::new(Float64Array::from(vec![0.1; n])) as ArrayRef),
        ("filter", Arc::new(StringArray::from(filter.to_vec())) as ArrayRef),
        ("flag", Arc::new(BooleanArray::from(flag.to_vec())) as ArrayRef),
    ];
    RecordBatch::try_from_iter(columns).unwrap()
}

pub fn with_exptime(batch: &RecordBatch, exptime: f64) -> RecordBatch {
    let mut columns: Vec<(String, ArrayRef)> = batch
        .schema()
        .fields()
        .iter()
        .zip(batch.columns())
        .map(|(f, c)| (f.name().clone(), c.clone()))
        .collect();
    columns.push((
        "exptime".to_string(),
        Arc::new(Float64Array::from(vec![exptime; batch.num_rows()])) as ArrayRef,
    ));
    RecordBatch::try_from_iter(columns).unwrap()
}

/// A fetcher on the demo observatory, a fresh temporary data root and an in-memory database.
pub struct DemoSetup {
    pub dir: TempDir,
    pub store: TableStore,
    pub db: Arc<MemoryDatabase>,
    pub fetcher: Fetcher,
}

impl DemoSetup {
    pub fn new(num_rows: usize, inputs: &ParMap) -> Self {
        let db = Arc::new(MemoryDatabase::new());
        Self::with_database(num_rows, inputs, db.clone(), db)
    }

    /// Same as [`DemoSetup::new`] but the fetcher writes through `persistence`.
    pub fn with_database(
        num_rows: usize,
        inputs: &ParMap,
        db: Arc<MemoryDatabase>,
        persistence: Arc<dyn Persistence>,
    ) -> Self {
        let dir = TempDir::new().unwrap();
        let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
        let store = TableStore::new(root);

        let mut inputs = inputs.clone();
        inputs
            .entry("sim_args".to_string())
            .or_insert_with(|| {
                ParValue::Map(par_map([
                    ("num_points", ParValue::Int(20)),
                    ("seed", ParValue::Int(7)),
                ]))
            });
        let observatory = Arc::new(DemoObservatory::with_inputs(&inputs).unwrap());
        let fetcher = Fetcher::new(
            observatory,
            Arc::new(small_catalog(num_rows)),
            persistence,
            store.clone(),
            new_file_lock(),
            PROJECT,
        );
        DemoSetup {
            dir,
            store,
            db,
            fetcher,
        }
    }

    pub fn demo_folder(&self) -> Utf8PathBuf {
        self.store.resolve_folder(None, Some("demo"))
    }
}

/// Persistence whose commits always fail after staging, to exercise the cleanup path.
pub struct FailingCommit {
    pub inner: Arc<MemoryDatabase>,
}

struct FailingTransaction<'a> {
    inner: Box<dyn Transaction + 'a>,
}

impl Persistence for FailingCommit {
    fn begin(&self) -> Box<dyn Transaction + '_> {
        Box::new(FailingTransaction {
            inner: self.inner.begin(),
        })
    }
}

impl Transaction for FailingTransaction<'_> {
    fn find_source(&self, name: &str, project: &str) -> Result<Option<Source>, VirtObsError> {
        self.inner.find_source(name, project)
    }

    fn stage_source(&mut self, source: &Source) -> Result<(), VirtObsError> {
        self.inner.stage_source(source)
    }

    fn remove_raw_data(&mut self, raw: &RawData, project: &str) -> Result<(), VirtObsError> {
        self.inner.remove_raw_data(raw, project)
    }

    fn delete_source(&mut self, name: &str, project: &str) -> Result<(), VirtObsError> {
        self.inner.delete_source(name, project)
    }

    fn commit(self: Box<Self>) -> Result<Vec<Source>, VirtObsError> {
        self.inner.rollback();
        Err(VirtObsError::Persistence("database unavailable".into()))
    }

    fn rollback(self: Box<Self>) {
        self.inner.rollback();
    }
}
