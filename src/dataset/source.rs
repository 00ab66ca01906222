//! Catalog objects and the datasets attached to them.
use crate::catalog::CatalogRow;
use crate::constants::{Degree, Magnitude};
use crate::dataset::{DataType, Lightcurve, RawData};

#[derive(Debug, Clone, Default)]
pub struct Source {
    /// Database id, `None` until committed.
    pub id: Option<u64>,
    pub name: String,
    pub project: String,
    pub ra: Option<Degree>,
    pub dec: Option<Degree>,
    pub mag: Option<Magnitude>,
    pub mag_err: Option<Magnitude>,
    pub mag_filter: Option<String>,
    pub alias: Vec<String>,
    /// Index of the originating catalog row.
    pub cat_index: Option<usize>,
    pub cat_row: Option<CatalogRow>,
    pub raw_data: Vec<RawData>,
    pub lightcurves: Vec<Lightcurve>,
}

impl Source {
    pub fn new(name: &str, project: &str) -> Self {
        Source {
            name: name.to_string(),
            project: project.to_string(),
            ..Default::default()
        }
    }

    pub fn from_catalog_row(row: &CatalogRow, project: &str) -> Self {
        Source {
            id: None,
            name: row.name.clone(),
            project: project.to_string(),
            ra: Some(row.ra),
            dec: Some(row.dec),
            mag: row.mag,
            mag_err: row.mag_err,
            mag_filter: row.filter.clone(),
            alias: row.alias.clone(),
            cat_index: Some(row.index),
            cat_row: Some(row.clone()),
            raw_data: Vec::new(),
            lightcurves: Vec::new(),
        }
    }

    pub fn get_raw_data(&self, observatory: &str, data_type: DataType) -> Option<&RawData> {
        self.raw_data
            .iter()
            .find(|r| r.observatory.eq_ignore_ascii_case(observatory) && r.data_type == data_type)
    }

    pub fn get_raw_data_mut(
        &mut self,
        observatory: &str,
        data_type: DataType,
    ) -> Option<&mut RawData> {
        self.raw_data
            .iter_mut()
            .find(|r| r.observatory.eq_ignore_ascii_case(observatory) && r.data_type == data_type)
    }

    /// Detach and return the raw data of one (observatory, data type).
    pub fn remove_raw_data(&mut self, observatory: &str, data_type: DataType) -> Option<RawData> {
        let pos = self
            .raw_data
            .iter()
            .position(|r| r.observatory.eq_ignore_ascii_case(observatory) && r.data_type == data_type)?;
        Some(self.raw_data.remove(pos))
    }

    /// Attach raw data, replacing any entry of the same (observatory, data type).
    pub fn attach_raw_data(&mut self, mut raw: RawData) {
        raw.source_id = self.id;
        raw.source_name = self.name.clone();
        self.remove_raw_data(&raw.observatory.clone(), raw.data_type);
        self.raw_data.push(raw);
    }

    pub fn lightcurves_from<'a>(&'a self, observatory: &'a str) -> impl Iterator<Item = &'a Lightcurve> + 'a {
        self.lightcurves
            .iter()
            .filter(move |lc| lc.observatory.eq_ignore_ascii_case(observatory))
    }

    /// A copy without payloads, as stored by the persistence layer.
    pub fn without_payload(&self) -> Self {
        Source {
            raw_data: self.raw_data.iter().map(RawData::without_payload).collect(),
            lightcurves: self
                .lightcurves
                .iter()
                .map(Lightcurve::without_payload)
                .collect(),
            ..self.clone()
        }
    }

    /// Copy the database ids of a committed copy of this source onto this one.
    pub fn adopt_ids(&mut self, stored: &Source) {
        self.id = stored.id;
        for raw in &mut self.raw_data {
            if let Some(s) = stored.get_raw_data(&raw.observatory, raw.data_type) {
                raw.id = s.id;
                raw.source_id = stored.id;
            }
        }
        for lc in &mut self.lightcurves {
            if let Some(s) = stored.lightcurves.iter().find(|s| s.same_record(lc)) {
                lc.id = s.id;
                lc.source_id = stored.id;
            }
        }
    }
}
