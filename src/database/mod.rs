//! # Persistence layer
//!
//! The fetcher stores [`Source`]s with their [`RawData`] and
//! [`Lightcurve`](crate::dataset::Lightcurve) records through a short-lived, scoped
//! transaction:
//!
//! ```text
//! let mut tx = database.begin();
//! let source = tx.find_source(name, project)?;   // read committed state
//! tx.stage_source(&source)?;                      // stage changes
//! let stored = tx.commit()?;                      // apply atomically, assign ids
//! ```
//!
//! Nothing staged is visible before [`Transaction::commit`]. Dropping a transaction or
//! calling [`Transaction::rollback`] discards every staged change.
//!
//! Payloads are never stored in the database, only the dataset records; the tabular
//! content lives in the [`TableStore`](crate::tables::TableStore).
pub mod memory;

use crate::dataset::{RawData, Source};
use crate::virtobs_errors::VirtObsError;

pub use memory::MemoryDatabase;

pub trait Persistence: Send + Sync {
    /// Open a new transaction.
    fn begin(&self) -> Box<dyn Transaction + '_>;
}

pub trait Transaction {
    /// Committed copy of a source (without payloads), `None` if it was never saved.
    fn find_source(&self, name: &str, project: &str) -> Result<Option<Source>, VirtObsError>;

    /// Insert or replace a source with its raw data and lightcurves.
    fn stage_source(&mut self, source: &Source) -> Result<(), VirtObsError>;

    /// Remove one raw data record from its source.
    fn remove_raw_data(&mut self, raw: &RawData, project: &str) -> Result<(), VirtObsError>;

    /// Remove a source and, by cascade, all its raw data and lightcurves.
    fn delete_source(&mut self, name: &str, project: &str) -> Result<(), VirtObsError>;

    /// Apply the staged changes atomically.
    ///
    /// Return
    /// ----------
    /// * The committed copies of the staged sources, with their database ids.
    fn commit(self: Box<Self>) -> Result<Vec<Source>, VirtObsError>;

    fn rollback(self: Box<Self>);
}
