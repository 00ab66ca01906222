//! # Observatory plugins
//!
//! An [`Observatory`] knows how to obtain raw data for a catalog row and how to reduce it.
//! The orchestration around it (database lookup, file consistency, batching) lives in
//! [`Fetcher`](crate::fetcher::Fetcher) and is the same for every observatory.
//!
//! ## Capabilities
//! -----------------
//! | method                        | default                                   |
//! |-------------------------------|-------------------------------------------|
//! | `fetch_data_from_observatory` | [`VirtObsError::NotImplemented`]          |
//! | `reduce_to_lightcurves`       | [`reduction::reduce_to_lightcurves`]      |
//! | `reduce_to_sed`               | [`VirtObsError::NotImplemented`]          |
//! | `reduce_to_images`            | [`VirtObsError::NotImplemented`]          |
//! | `reduce_to_thumbnail`         | [`VirtObsError::NotImplemented`]          |
//!
//! [`Observatory::reduce`] picks the capability from the data type.
pub mod demo;
pub mod pars;

use arrow_array::RecordBatch;

use crate::catalog::CatalogRow;
use crate::constants::AltData;
use crate::dataset::{DataType, Lightcurve, RawData, Source};
use crate::parameters::ParMap;
use crate::reduction::{self, InitKwargs, ReducerParams};
use crate::virtobs_errors::VirtObsError;

pub use pars::ObservatoryPars;

/// Products of [`Observatory::reduce`].
#[derive(Debug, Clone)]
pub enum Reduced {
    Lightcurves(Vec<Lightcurve>),
    /// Reduced spectra, images or thumbnails, as tabular datasets.
    Datasets(Vec<RawData>),
}

impl Reduced {
    pub fn len(&self) -> usize {
        match self {
            Reduced::Lightcurves(v) => v.len(),
            Reduced::Datasets(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

pub trait Observatory: Send + Sync {
    /// Lower case name, also used in the default filenames and folders.
    fn name(&self) -> &str;

    fn pars(&self) -> &ObservatoryPars;

    /// Download (or simulate) the raw data of one catalog row.
    ///
    /// Arguments
    /// -----------------
    /// * `cat_row`: the catalog entry.
    /// * `fetch_args`: per call overrides of the observatory parameters.
    ///
    /// Return
    /// ----------
    /// * The raw table and its side metadata.
    fn fetch_data_from_observatory(
        &self,
        cat_row: &CatalogRow,
        fetch_args: &ParMap,
    ) -> Result<(RecordBatch, AltData), VirtObsError> {
        let _ = (cat_row, fetch_args);
        Err(VirtObsError::NotImplemented(format!(
            "fetch_data_from_observatory() for observatory {}",
            self.name()
        )))
    }

    fn reduce_to_lightcurves(
        &self,
        raws: &[&RawData],
        source: Option<&Source>,
        init: &InitKwargs,
        params: &ReducerParams,
    ) -> Result<Vec<Lightcurve>, VirtObsError> {
        reduction::reduce_to_lightcurves(raws, source, init, params)
    }

    fn reduce_to_sed(
        &self,
        raws: &[&RawData],
        source: Option<&Source>,
        init: &InitKwargs,
        params: &ReducerParams,
    ) -> Result<Vec<RawData>, VirtObsError> {
        let _ = (raws, source, init, params);
        Err(VirtObsError::NotImplemented(format!(
            "No reduction method for spectra in observatory {}",
            self.name()
        )))
    }

    fn reduce_to_images(
        &self,
        raws: &[&RawData],
        source: Option<&Source>,
        init: &InitKwargs,
        params: &ReducerParams,
    ) -> Result<Vec<RawData>, VirtObsError> {
        let _ = (raws, source, init, params);
        Err(VirtObsError::NotImplemented(format!(
            "No reduction method for images in observatory {}",
            self.name()
        )))
    }

    fn reduce_to_thumbnail(
        &self,
        raws: &[&RawData],
        source: Option<&Source>,
        init: &InitKwargs,
        params: &ReducerParams,
    ) -> Result<Vec<RawData>, VirtObsError> {
        let _ = (raws, source, init, params);
        Err(VirtObsError::NotImplemented(format!(
            "No reduction method for cutouts in observatory {}",
            self.name()
        )))
    }

    /// Reduce the raw data of this observatory attached to `source`.
    ///
    /// The `reducer` parameter is merged with `overrides` into the [`ReducerParams`], the
    /// shared metadata is taken from the raw datasets ([`InitKwargs::from_raw_data`]).
    /// Lightcurves replace the source's previous lightcurves from this observatory.
    ///
    /// Arguments
    /// -----------------
    /// * `source`: source holding loaded raw data.
    /// * `data_type`: which raw data to reduce.
    /// * `overrides`: reducer parameters for this call only.
    fn reduce(
        &self,
        source: &mut Source,
        data_type: DataType,
        overrides: &ParMap,
    ) -> Result<Reduced, VirtObsError> {
        let mut reducer = self.pars().reducer()?;
        reducer.extend(overrides.iter().map(|(k, v)| (k.clone(), v.clone())));
        let params = ReducerParams::from_par_map(&reducer)?;

        let raws: Vec<&RawData> = source
            .raw_data
            .iter()
            .filter(|r| r.observatory.eq_ignore_ascii_case(self.name()) && r.data_type == data_type)
            .collect();
        if raws.is_empty() {
            return Err(VirtObsError::InvalidInputValue(format!(
                "Source {} has no {data_type} raw data from observatory {}",
                source.name,
                self.name()
            )));
        }
        let init = InitKwargs::from_raw_data(&raws)
            .with_project(&source.project)
            .with_filtmap(self.pars().filtmap()?);

        let reduced = match data_type {
            DataType::Photometry => {
                Reduced::Lightcurves(self.reduce_to_lightcurves(&raws, Some(&*source), &init, &params)?)
            }
            DataType::Spectra => Reduced::Datasets(self.reduce_to_sed(&raws, Some(&*source), &init, &params)?),
            DataType::Images => {
                Reduced::Datasets(self.reduce_to_images(&raws, Some(&*source), &init, &params)?)
            }
            DataType::Cutouts => {
                Reduced::Datasets(self.reduce_to_thumbnail(&raws, Some(&*source), &init, &params)?)
            }
        };

        if let Reduced::Lightcurves(lcs) = &reduced {
            let name = self.name().to_string();
            source
                .lightcurves
                .retain(|lc| !lc.observatory.eq_ignore_ascii_case(&name));
            source.lightcurves.extend(lcs.iter().cloned());
        }
        Ok(reduced)
    }
}
