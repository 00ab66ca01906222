//! # Parameter store
//!
//! Typed key/value configuration carrier shared by every configurable component
//! (observatories, the reducer, histograms).
//!
//! ## Overview
//! -----------------
//! A [`Parameters`] object keeps:
//! - a **schema**: for each registered name, its default value, the allowed [`ParType`]s and
//!   a one-line description (see [`Parameters::add_par`]),
//! - the **current values**,
//! - a **required** subset that must have been assigned before [`Parameters::verify`]
//!   succeeds,
//! - a **locked** flag. Once the owner has finished registering its schema it calls
//!   [`Parameters::lock`], after which assigning an unregistered name fails with
//!   [`VirtObsError::Configuration`] instead of silently adding a typo'd attribute.
//!
//! ## Layering
//! -----------------
//! Values are layered in this order by [`Parameters::load_then_update`]:
//! 1. registered defaults,
//! 2. the generic section of a YAML file ([`Parameters::load`]),
//! 3. the component-specific sub-section of that file,
//! 4. caller inputs, merged with [`Parameters::update`] (sets and maps are extended
//!    in place, everything else is replaced).
//!
//! The data root is taken from the `VIRTOBS_DATA` environment variable, see
//! [`Parameters::get_data_path`].
pub mod value;

use std::collections::{BTreeMap, BTreeSet};

use camino::{Utf8Path, Utf8PathBuf};
use tracing::debug;

use crate::constants::DATA_ROOT_ENV;
use crate::virtobs_errors::VirtObsError;

pub use value::{ParMap, ParType, ParValue};

/// Schema entry of a registered parameter.
#[derive(Debug, Clone, PartialEq)]
pub struct ParSchema {
    pub default: ParValue,
    pub types: Vec<ParType>,
    pub description: String,
}

#[derive(Debug, Clone, Default)]
pub struct Parameters {
    values: BTreeMap<String, ParValue>,
    schema: BTreeMap<String, ParSchema>,
    required: BTreeSet<String>,
    locked: bool,
    /// Level of verbosity (0 = quiet)
    pub verbose: u8,
}

impl Parameters {
    /// Create an empty parameter store.
    ///
    /// Arguments
    /// -----------------
    /// * `required`: names that must be assigned (by registration, a file or a caller)
    ///   before [`Parameters::verify`] succeeds.
    pub fn new<I, S>(required: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Parameters {
            required: required.into_iter().map(Into::into).collect(),
            ..Default::default()
        }
    }

    /// Register a parameter and assign its default value.
    ///
    /// Arguments
    /// -----------------
    /// * `name`: parameter name.
    /// * `default`: initial value, must itself satisfy `types`.
    /// * `types`: allowed types, empty to accept anything.
    /// * `description`: one-line documentation of the parameter.
    ///
    /// Return
    /// ----------
    /// * The default value (after coercion), or [`VirtObsError::Configuration`] if the store
    ///   is locked or the default does not match the allowed types.
    pub fn add_par(
        &mut self,
        name: &str,
        default: impl Into<ParValue>,
        types: &[ParType],
        description: &str,
    ) -> Result<ParValue, VirtObsError> {
        if self.locked {
            return Err(VirtObsError::Configuration(format!(
                "Cannot register parameter '{name}' on a locked schema"
            )));
        }
        let default = check_type(name, default.into(), types)?;
        self.schema.insert(
            name.to_string(),
            ParSchema {
                default: default.clone(),
                types: types.to_vec(),
                description: description.to_string(),
            },
        );
        self.values.insert(name.to_string(), default.clone());
        Ok(default)
    }

    /// Forbid assignment of unregistered names from now on.
    pub fn lock(&mut self) {
        self.locked = true;
    }

    pub fn unlock(&mut self) {
        self.locked = false;
    }

    pub fn is_locked(&self) -> bool {
        self.locked
    }

    /// Mark an additional name as required.
    pub fn require(&mut self, name: &str) {
        self.required.insert(name.to_string());
    }

    pub fn is_registered(&self, name: &str) -> bool {
        self.schema.contains_key(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    pub fn schema(&self, name: &str) -> Option<&ParSchema> {
        self.schema.get(name)
    }

    pub fn describe(&self, name: &str) -> Option<&str> {
        self.schema.get(name).map(|s| s.description.as_str())
    }

    /// Assign a value, checking the schema and the lock.
    pub fn set(&mut self, name: &str, value: impl Into<ParValue>) -> Result<(), VirtObsError> {
        let value = value.into();
        let value = match self.schema.get(name) {
            Some(schema) => check_type(name, value, &schema.types)?,
            None if self.locked => {
                return Err(VirtObsError::Configuration(format!(
                    "Parameter '{name}' is not registered and the parameter schema is locked"
                )))
            }
            None => value,
        };
        if self.verbose > 1 {
            debug!(parameter = name, value = ?value, "setting parameter");
        }
        self.values.insert(name.to_string(), value);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&ParValue> {
        self.values.get(name)
    }

    fn get_required(&self, name: &str) -> Result<&ParValue, VirtObsError> {
        self.values
            .get(name)
            .ok_or_else(|| VirtObsError::Configuration(format!("Parameter '{name}' is not set")))
    }

    fn wrong_type(name: &str, expected: &str, value: &ParValue) -> VirtObsError {
        VirtObsError::Configuration(format!(
            "Parameter '{name}' should be {expected}, got {}",
            value.par_type()
        ))
    }

    pub fn get_bool(&self, name: &str) -> Result<bool, VirtObsError> {
        let v = self.get_required(name)?;
        v.as_bool().ok_or_else(|| Self::wrong_type(name, "a bool", v))
    }

    pub fn get_i64(&self, name: &str) -> Result<i64, VirtObsError> {
        let v = self.get_required(name)?;
        v.as_i64().ok_or_else(|| Self::wrong_type(name, "an int", v))
    }

    pub fn get_usize(&self, name: &str) -> Result<usize, VirtObsError> {
        let v = self.get_i64(name)?;
        usize::try_from(v).map_err(|_| {
            VirtObsError::Configuration(format!("Parameter '{name}' must be non-negative"))
        })
    }

    pub fn get_f64(&self, name: &str) -> Result<f64, VirtObsError> {
        let v = self.get_required(name)?;
        v.as_f64().ok_or_else(|| Self::wrong_type(name, "a number", v))
    }

    pub fn get_str(&self, name: &str) -> Result<&str, VirtObsError> {
        let v = self.get_required(name)?;
        v.as_str().ok_or_else(|| Self::wrong_type(name, "a string", v))
    }

    /// String value, `None` when the parameter is unset or null.
    pub fn get_opt_str(&self, name: &str) -> Result<Option<&str>, VirtObsError> {
        match self.values.get(name) {
            None | Some(ParValue::Null) => Ok(None),
            Some(v) => v
                .as_str()
                .map(Some)
                .ok_or_else(|| Self::wrong_type(name, "a string", v)),
        }
    }

    pub fn get_set(&self, name: &str) -> Result<BTreeSet<String>, VirtObsError> {
        let v = self.get_required(name)?;
        v.as_string_set()
            .ok_or_else(|| Self::wrong_type(name, "a set of strings", v))
    }

    /// Map value, an unset or null parameter reads as an empty map.
    pub fn get_map(&self, name: &str) -> Result<ParMap, VirtObsError> {
        match self.values.get(name) {
            None | Some(ParValue::Null) => Ok(ParMap::new()),
            Some(v) => v
                .as_map()
                .cloned()
                .ok_or_else(|| Self::wrong_type(name, "a mapping", v)),
        }
    }

    /// Check that every required parameter has been assigned (null counts as assigned).
    pub fn verify(&self) -> Result<(), VirtObsError> {
        match self.required.iter().find(|p| !self.values.contains_key(*p)) {
            Some(p) => Err(VirtObsError::Configuration(format!(
                "Parameter {p} is not set."
            ))),
            None => Ok(()),
        }
    }

    /// Assign each value only if that name has no value yet.
    pub fn default_values(&mut self, defaults: &ParMap) -> Result<(), VirtObsError> {
        for (k, v) in defaults {
            if !self.values.contains_key(k) {
                self.set(k, v.clone())?;
            }
        }
        Ok(())
    }

    /// Override current values with every entry of `map`.
    pub fn read(&mut self, map: &ParMap) -> Result<(), VirtObsError> {
        for (k, v) in map {
            self.set(k, v.clone())?;
        }
        Ok(())
    }

    /// Merge `map` into the current values.
    ///
    /// Set-valued parameters are extended with the incoming set or string list, map-valued
    /// parameters are extended key by key. Any other value is replaced.
    pub fn update(&mut self, map: &ParMap) -> Result<(), VirtObsError> {
        for (k, v) in map {
            let merged = match (self.values.get(k), v) {
                (Some(ParValue::Set(current)), incoming) => incoming
                    .as_string_set()
                    .map(|extra| ParValue::Set(current.union(&extra).cloned().collect())),
                (Some(ParValue::Map(current)), ParValue::Map(extra)) => {
                    let mut current = current.clone();
                    current.extend(extra.iter().map(|(a, b)| (a.clone(), b.clone())));
                    Some(ParValue::Map(current))
                }
                _ => None,
            };
            self.set(k, merged.unwrap_or_else(|| v.clone()))?;
        }
        Ok(())
    }

    /// Read a YAML file and override values with its content.
    ///
    /// Arguments
    /// -----------------
    /// * `path`: path to the YAML file.
    /// * `key`: if given, only the mapping under this top-level key is read.
    ///
    /// Return
    /// ----------
    /// * An error if the file cannot be read or parsed, if `key` is missing, or if any
    ///   value violates the schema.
    pub fn load(&mut self, path: &Utf8Path, key: Option<&str>) -> Result<(), VirtObsError> {
        let section = read_yaml_section(path, key)?;
        self.read(&section)
    }

    /// Write the current values to a YAML file.
    pub fn save(&self, path: &Utf8Path) -> Result<(), VirtObsError> {
        let text = serde_yaml::to_string(&self.values)?;
        std::fs::write(path, text)?;
        Ok(())
    }

    /// Layered initialization from a config file and caller inputs.
    ///
    /// Arguments
    /// -----------------
    /// * `cfg_file`: optional YAML file.
    /// * `cfg_key`: top-level section of the file holding the generic values
    ///   (e.g. `observatories`). A missing section is not an error.
    /// * `specific_key`: sub-key of that section (and of `inputs`) holding values for one
    ///   component only (e.g. `demo`). Applied after the generic values.
    /// * `skip_keys`: keys that name other components and are never treated as
    ///   parameters.
    /// * `inputs`: caller overrides, merged last with [`Parameters::update`].
    ///
    /// Return
    /// ----------
    /// * The result of [`Parameters::verify`] after all layers are applied.
    pub fn load_then_update(
        &mut self,
        cfg_file: Option<&Utf8Path>,
        cfg_key: &str,
        specific_key: Option<&str>,
        skip_keys: &[String],
        inputs: &ParMap,
    ) -> Result<(), VirtObsError> {
        let is_skipped = |k: &str| skip_keys.iter().any(|s| s == k) || Some(k) == specific_key;

        if let Some(path) = cfg_file {
            let root = read_yaml_section(path, None)?;
            if let Some(section) = root.get(cfg_key).and_then(ParValue::as_map) {
                let generic: ParMap = section
                    .iter()
                    .filter(|(k, _)| !is_skipped(k))
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect();
                self.read(&generic)?;

                if let Some(specific) = specific_key
                    .and_then(|k| section.get(k))
                    .and_then(ParValue::as_map)
                {
                    self.read(specific)?;
                }
            }
        }

        let generic_inputs: ParMap = inputs
            .iter()
            .filter(|(k, _)| !is_skipped(k))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        self.update(&generic_inputs)?;
        if let Some(specific) = specific_key
            .and_then(|k| inputs.get(k))
            .and_then(ParValue::as_map)
        {
            self.update(specific)?;
        }

        self.verify()
    }

    /// Root folder of all data files, joined with the `data_folder` parameter if set.
    ///
    /// The root comes from the `VIRTOBS_DATA` environment variable, or is empty (the
    /// current directory) when that variable is unset.
    pub fn get_data_path(&self) -> Utf8PathBuf {
        let root = Utf8PathBuf::from(std::env::var(DATA_ROOT_ENV).unwrap_or_default());
        match self.values.get("data_folder").and_then(ParValue::as_str) {
            Some(folder) => root.join(folder),
            None => root,
        }
    }

    /// Snapshot of the current values.
    pub fn to_map(&self) -> ParMap {
        self.values.clone()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }
}

fn check_type(name: &str, value: ParValue, types: &[ParType]) -> Result<ParValue, VirtObsError> {
    let found = value.par_type();
    value.coerce(types).ok_or_else(|| {
        let allowed = types
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(", ");
        VirtObsError::Configuration(format!(
            "Parameter '{name}' must be one of [{allowed}], got {found}"
        ))
    })
}

fn read_yaml_section(path: &Utf8Path, key: Option<&str>) -> Result<ParMap, VirtObsError> {
    let text = std::fs::read_to_string(path)?;
    let mut root: ParMap = serde_yaml::from_str(&text)?;
    match key {
        None => Ok(root),
        Some(k) => match root.remove(k) {
            Some(ParValue::Map(m)) => Ok(m),
            Some(ParValue::Null) => Ok(ParMap::new()),
            Some(other) => Err(VirtObsError::Configuration(format!(
                "Section '{k}' of {path} should be a mapping, got {}",
                other.par_type()
            ))),
            None => Err(VirtObsError::Configuration(format!(
                "Section '{k}' not found in {path}"
            ))),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schema() -> Parameters {
        let mut pars = Parameters::new(["name"]);
        pars.add_par("num", 3, &[ParType::Int], "a number").unwrap();
        pars.add_par("ratio", 0.5, &[ParType::Float], "a ratio")
            .unwrap();
        pars.add_par(
            "tags",
            BTreeSet::from(["a".to_string()]),
            &[ParType::Set],
            "some tags",
        )
        .unwrap();
        pars
    }

    #[test]
    fn test_verify_required() {
        let mut pars = schema();
        assert!(matches!(pars.verify(), Err(VirtObsError::Configuration(_))));
        pars.set("name", ParValue::Null).unwrap();
        assert!(pars.verify().is_ok());
    }

    #[test]
    fn test_lock_rejects_unknown_names() {
        let mut pars = schema();
        pars.set("extra", true).unwrap();
        pars.lock();
        assert!(pars.set("num", 4).is_ok());
        assert!(matches!(
            pars.set("nmu", 4),
            Err(VirtObsError::Configuration(_))
        ));
        assert!(pars.add_par("late", 1, &[], "").is_err());
    }

    #[test]
    fn test_type_checks_and_coercion() {
        let mut pars = schema();
        assert!(pars.set("num", "three").is_err());
        pars.set("ratio", 2).unwrap();
        assert_eq!(pars.get_f64("ratio").unwrap(), 2.0);
        assert!(pars.get_bool("num").is_err());
    }

    #[test]
    fn test_update_merges_containers() {
        let mut pars = schema();
        pars.set("mapping", ParValue::Map(ParMap::from([("x".into(), 1.into())])))
            .unwrap();

        let mut input = ParMap::new();
        input.insert("tags".into(), vec!["b"].into());
        input.insert(
            "mapping".into(),
            ParValue::Map(ParMap::from([("y".into(), 2.into())])),
        );
        input.insert("num".into(), 7.into());
        pars.update(&input).unwrap();

        assert_eq!(pars.get_set("tags").unwrap().len(), 2);
        assert_eq!(pars.get_map("mapping").unwrap().len(), 2);
        assert_eq!(pars.get_i64("num").unwrap(), 7);

        // read replaces instead
        pars.read(&ParMap::from([("tags".into(), vec!["c"].into())]))
            .unwrap();
        assert_eq!(
            pars.get_set("tags").unwrap(),
            BTreeSet::from(["c".to_string()])
        );
    }

    #[test]
    fn test_default_values_do_not_override() {
        let mut pars = schema();
        pars.set("num", 10).unwrap();
        pars.default_values(&ParMap::from([
            ("num".into(), 1.into()),
            ("name".into(), "x".into()),
        ]))
        .unwrap();
        assert_eq!(pars.get_i64("num").unwrap(), 10);
        assert_eq!(pars.get_str("name").unwrap(), "x");
    }
}
