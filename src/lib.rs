pub mod catalog;
pub mod constants;
pub mod conversion;
pub mod database;
pub mod dataset;
pub mod fetcher;
pub mod histogram;
pub mod observatory;
pub mod parameters;
pub mod reduction;
pub mod tables;
pub mod virtobs_errors;

pub use catalog::{Catalog, CatalogRow, CsvCatalog, RowLocator};
pub use database::{MemoryDatabase, Persistence, Transaction};
pub use dataset::{DataType, Lightcurve, RawData, Source};
pub use fetcher::{new_file_lock, FileLock, Fetcher};
pub use histogram::Histogram;
pub use observatory::{demo::DemoObservatory, Observatory, ObservatoryPars};
pub use parameters::{ParMap, ParType, ParValue, Parameters};
pub use reduction::{InitKwargs, ReducerParams};
pub use tables::TableStore;
pub use virtobs_errors::VirtObsError;
