use rayon::prelude::*;
use tracing::{debug, info};

use crate::catalog::{CatalogRow, RowLocator};
use crate::dataset::Source;
use crate::fetcher::progress::{fmt_dur, BatchProgress};
use crate::fetcher::Fetcher;
use crate::parameters::ParMap;
use crate::virtobs_errors::VirtObsError;

impl Fetcher {
    /// Resolve the catalog rows `[start, stop)`, in parallel ranges.
    ///
    /// The rows are processed in consecutive ranges of `num_threads_download` rows, each row
    /// of a range on its own worker of a `rayon` pool. A range is finished before the next
    /// one starts. The sources and datasets are kept in [`Fetcher::sources`] and
    /// [`Fetcher::datasets`], and both buffers are emptied before a range once they hold
    /// more than `download_batch_size` sources.
    ///
    /// Arguments
    /// -----------------
    /// * `start`: first catalog index.
    /// * `stop`: one past the last index, `None` for the end of the catalog.
    /// * `save`, `fetch_args`, `dataset_args`: see [`Fetcher::check_and_fetch_source`].
    ///
    /// Return
    /// ----------
    /// * The number of sources loaded or fetched.
    ///
    /// Errors
    /// ----------
    /// * The first error of any worker, after the whole range completed.
    /// * [`VirtObsError::Consistency`] if a source comes back without raw data of this
    ///   observatory for one of the configured data types.
    pub fn fetch_batch(
        &mut self,
        start: usize,
        stop: Option<usize>,
        save: bool,
        fetch_args: &ParMap,
        dataset_args: &ParMap,
    ) -> Result<usize, VirtObsError> {
        let pars = self.observatory.pars();
        let num_threads = pars.num_threads_download()?.max(1);
        let batch_size = pars.download_batch_size()?;
        let data_types = pars.data_types()?;
        let stop = stop.unwrap_or(usize::MAX).min(self.catalog.len());

        self.sources.clear();
        self.datasets.clear();
        if start >= stop {
            return Ok(0);
        }

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(num_threads)
            .build()?;
        let mut progress = BatchProgress::new(stop - start, pars.show_progress()?);
        let obs = self.observatory.name().to_string();
        let mut num_loaded = 0;

        for range_start in (start..stop).step_by(num_threads) {
            let range_end = (range_start + num_threads).min(stop);

            if self.sources.len() > batch_size {
                debug!(kept = self.sources.len(), batch_size, "flushing in-memory sources");
                self.sources.clear();
                self.datasets.clear();
            }

            let rows = (range_start..range_end)
                .map(|i| self.catalog.get_row(RowLocator::Number(i)).cloned())
                .collect::<Result<Vec<CatalogRow>, _>>()?;

            let this = &*self;
            let outcomes: Vec<Result<Source, VirtObsError>> = pool.install(|| {
                rows.par_iter()
                    .map(|row| this.check_and_fetch_source(row, save, fetch_args, dataset_args))
                    .collect()
            });
            let sources = outcomes.into_iter().collect::<Result<Vec<_>, _>>()?;

            for source in &sources {
                for &data_type in &data_types {
                    let raw = source.get_raw_data(&obs, data_type).ok_or_else(|| {
                        VirtObsError::Consistency(format!(
                            "Cannot find {data_type} data from observatory {obs} on source {}",
                            source.name
                        ))
                    })?;
                    self.datasets.push(raw.clone());
                }
            }
            num_loaded += sources.len();
            self.sources.extend(sources);

            let elapsed = progress.range_done(range_end - range_start);
            debug!(range_start, range_end, elapsed = %fmt_dur(elapsed), "catalog range done");
        }

        info!(
            observatory = %obs,
            num_loaded,
            avg_range = %fmt_dur(progress.average()),
            "batch fetch complete"
        );
        progress.finish();
        Ok(num_loaded)
    }
}
