//! Parameters shared by every observatory.
use camino::{Utf8Path, Utf8PathBuf};
use tracing::debug;

use crate::constants::AltData;
use crate::dataset::DataType;
use crate::parameters::{ParMap, ParType, ParValue, Parameters};
use crate::reduction::FilterMap;
use crate::virtobs_errors::VirtObsError;

/// Names of the observatories known to the pipeline.
///
/// Configuration keys matching one of these names (in any case) hold values for that
/// observatory only, and are never read as generic parameters.
pub const OBSERVATORY_NAMES: [&str; 6] = ["demo", "ztf", "tess", "kepler", "panstarrs", "gaia"];

/// Top-level section of the configuration file holding observatory parameters.
pub const DEFAULT_CFG_KEY: &str = "observatories";

/// Default credentials file, relative to the working directory.
const DEFAULT_CREDENTIALS_FILE: &str = "credentials.yaml";

/// Parameter store of an observatory.
///
/// [`ObservatoryPars::new`] registers the generic parameters. A concrete observatory then
/// registers its own with [`ObservatoryPars::add_par`] and calls
/// [`ObservatoryPars::finalize`] to lock the schema and apply the configuration layers.
#[derive(Debug, Clone)]
pub struct ObservatoryPars {
    params: Parameters,
    obs_name: String,
    credentials: ParMap,
}

impl ObservatoryPars {
    pub fn new(obs_name: &str) -> Result<Self, VirtObsError> {
        let mut p = Parameters::new(["obs_name", "data_types"]);
        use ParType::*;

        p.add_par("obs_name", obs_name.to_uppercase(), &[Str], "Name of the observatory.")?;
        p.add_par("reducer", ParMap::new(), &[Map], "Arguments to pass to reduction method")?;
        p.add_par(
            "credentials",
            ParMap::new(),
            &[Map],
            "Credentials (or a credentials filename and key) for the observatory",
        )?;
        p.add_par(
            "observation_time",
            ParValue::Null,
            &[Null, Str, Int, Float],
            "Time of observations to fetch (null for all)",
        )?;
        p.add_par(
            "dataset_attribute",
            "source_name",
            &[Str],
            "Attribute of a dataset matched against the catalog when populating sources",
        )?;
        p.add_par(
            "dataset_identifier",
            "key",
            &[Str],
            "Read the dataset identity from the file 'key' or from the dataset attribute",
        )?;
        p.add_par(
            "catalog_matching",
            "name",
            &[Str],
            "Match datasets to catalog rows by 'name' or by 'number'",
        )?;
        p.add_par("overwrite_files", true, &[Bool], "Overwrite existing files")?;
        p.add_par(
            "save_ra_minutes",
            false,
            &[Bool],
            "Include the RA minutes in the default filename",
        )?;
        p.add_par(
            "save_ra_seconds",
            false,
            &[Bool],
            "Include the RA seconds in the default filename",
        )?;
        p.add_par("filekey_prefix", "", &[Str], "Prefix of the keys inside files")?;
        p.add_par("filekey_suffix", "", &[Str], "Suffix of the keys inside files")?;
        p.add_par(
            "download_batch_size",
            100,
            &[Int],
            "Number of sources kept in memory before the buffers are flushed",
        )?;
        p.add_par(
            "num_threads_download",
            0,
            &[Int],
            "Number of threads to use for downloading",
        )?;
        p.add_par(
            "download_pars_list",
            ParValue::List(Vec::new()),
            &[List],
            "Parameters recorded with each download, a change triggers a refetch",
        )?;
        p.add_par(
            "check_download_pars",
            false,
            &[Bool],
            "Compare the recorded download parameters with the current ones",
        )?;
        p.add_par(
            "filtmap",
            ParValue::Null,
            &[Null, Str, Map],
            "Mapping between observatory filter names and standard filter names",
        )?;
        p.add_par(
            "data_types",
            vec!["photometry"],
            &[Str, List],
            "Data types to download and reduce",
        )?;
        p.add_par("show_progress", false, &[Bool], "Show a progress bar for batch downloads")?;
        p.add_par(
            "data_folder",
            ParValue::Null,
            &[Null, Str],
            "Folder of the data files, relative to the data root",
        )?;

        Ok(ObservatoryPars {
            params: p,
            obs_name: obs_name.to_lowercase(),
            credentials: ParMap::new(),
        })
    }

    /// Register an observatory specific parameter (before [`ObservatoryPars::finalize`]).
    pub fn add_par(
        &mut self,
        name: &str,
        default: impl Into<ParValue>,
        types: &[ParType],
        description: &str,
    ) -> Result<ParValue, VirtObsError> {
        self.params.add_par(name, default, types, description)
    }

    /// Lock the schema and apply, in order, the generic `observatories` section of the
    /// config file, its sub-section named after this observatory, and the caller inputs.
    ///
    /// Arguments
    /// -----------------
    /// * `cfg_file`: optional YAML configuration file.
    /// * `inputs`: caller overrides. A key naming this observatory (any case) holds
    ///   overrides for it only, keys naming other observatories are ignored.
    pub fn finalize(&mut self, cfg_file: Option<&Utf8Path>, inputs: &ParMap) -> Result<(), VirtObsError> {
        self.params.lock();

        let inputs: ParMap = inputs
            .iter()
            .map(|(k, v)| {
                if k.eq_ignore_ascii_case(&self.obs_name) {
                    (self.obs_name.clone(), v.clone())
                } else {
                    (k.clone(), v.clone())
                }
            })
            .collect();
        let skip_keys: Vec<String> = OBSERVATORY_NAMES
            .iter()
            .flat_map(|n| [n.to_string(), n.to_uppercase()])
            .chain([self.obs_name.to_uppercase()])
            .collect();

        self.params.load_then_update(
            cfg_file,
            DEFAULT_CFG_KEY,
            Some(&self.obs_name),
            &skip_keys,
            &inputs,
        )?;

        let normalized: Vec<String> = self
            .data_types()?
            .iter()
            .map(|dt| dt.as_str().to_string())
            .collect();
        self.params.set("data_types", normalized)?;
        self.load_credentials()?;
        debug!(observatory = %self.obs_name, "observatory parameters loaded");
        Ok(())
    }

    /// Merge credentials read from a file (`credentials: {filename, key}`) with those given
    /// inline, the inline values taking precedence. A missing file is not an error.
    fn load_credentials(&mut self) -> Result<(), VirtObsError> {
        let inline = self.params.get_map("credentials")?;
        let filename = inline
            .get("filename")
            .and_then(ParValue::as_str)
            .unwrap_or(DEFAULT_CREDENTIALS_FILE);
        let key = inline
            .get("key")
            .and_then(ParValue::as_str)
            .unwrap_or(self.obs_name.as_str())
            .to_string();

        let path = Utf8PathBuf::from(filename);
        let mut credentials = ParMap::new();
        if path.is_file() {
            let text = std::fs::read_to_string(&path)?;
            let root: ParMap = serde_yaml::from_str(&text)?;
            if let Some(section) = root.get(&key).and_then(ParValue::as_map) {
                credentials = section.clone();
            }
        }
        credentials.extend(
            inline
                .into_iter()
                .filter(|(k, _)| k != "filename" && k != "key"),
        );
        self.credentials = credentials;
        Ok(())
    }

    pub fn params(&self) -> &Parameters {
        &self.params
    }

    pub fn params_mut(&mut self) -> &mut Parameters {
        &mut self.params
    }

    /// Lower case name of the observatory.
    pub fn obs_name(&self) -> &str {
        &self.obs_name
    }

    pub fn credentials(&self) -> &ParMap {
        &self.credentials
    }

    pub fn reducer(&self) -> Result<ParMap, VirtObsError> {
        self.params.get_map("reducer")
    }

    pub fn overwrite_files(&self) -> Result<bool, VirtObsError> {
        self.params.get_bool("overwrite_files")
    }

    pub fn save_ra_minutes(&self) -> Result<bool, VirtObsError> {
        self.params.get_bool("save_ra_minutes")
    }

    pub fn save_ra_seconds(&self) -> Result<bool, VirtObsError> {
        self.params.get_bool("save_ra_seconds")
    }

    pub fn filekey_prefix(&self) -> Result<&str, VirtObsError> {
        self.params.get_str("filekey_prefix")
    }

    pub fn filekey_suffix(&self) -> Result<&str, VirtObsError> {
        self.params.get_str("filekey_suffix")
    }

    pub fn download_batch_size(&self) -> Result<usize, VirtObsError> {
        self.params.get_usize("download_batch_size")
    }

    pub fn num_threads_download(&self) -> Result<usize, VirtObsError> {
        self.params.get_usize("num_threads_download")
    }

    pub fn check_download_pars(&self) -> Result<bool, VirtObsError> {
        self.params.get_bool("check_download_pars")
    }

    pub fn show_progress(&self) -> Result<bool, VirtObsError> {
        self.params.get_bool("show_progress")
    }

    pub fn dataset_attribute(&self) -> Result<&str, VirtObsError> {
        self.params.get_str("dataset_attribute")
    }

    pub fn dataset_identifier(&self) -> Result<&str, VirtObsError> {
        self.params.get_str("dataset_identifier")
    }

    pub fn catalog_matching(&self) -> Result<&str, VirtObsError> {
        self.params.get_str("catalog_matching")
    }

    pub fn data_folder(&self) -> Result<Option<&str>, VirtObsError> {
        self.params.get_opt_str("data_folder")
    }

    pub fn filtmap(&self) -> Result<Option<FilterMap>, VirtObsError> {
        match self.params.get("filtmap") {
            Some(v) => FilterMap::from_par_value(v),
            None => Ok(None),
        }
    }

    pub fn download_pars_list(&self) -> Result<Vec<String>, VirtObsError> {
        Ok(self.params.get_set("download_pars_list")?.into_iter().collect())
    }

    /// Data types, parsed from loose spellings and deduplicated.
    pub fn data_types(&self) -> Result<Vec<DataType>, VirtObsError> {
        let raw = match self.params.get("data_types") {
            Some(ParValue::Str(s)) => vec![s.clone()],
            Some(v) => v
                .as_string_set()
                .map(|s| s.into_iter().collect())
                .ok_or_else(|| {
                    VirtObsError::Configuration("data_types must be a list of strings".into())
                })?,
            None => Vec::new(),
        };
        let mut types = raw
            .iter()
            .map(|s| s.parse::<DataType>())
            .collect::<Result<Vec<_>, _>>()?;
        types.sort();
        types.dedup();
        Ok(types)
    }

    /// Values of the `download_pars_list` parameters, `fetch_args` taking precedence.
    ///
    /// Stored in the raw data `altdata["download_pars"]` and compared on later runs when
    /// `check_download_pars` is set.
    ///
    /// A value given in `fetch_args` is recorded as given. An observatory that merges a
    /// partial mapping over its configured one (the demo `sim_args`) records the override,
    /// not the merged value it actually used.
    pub fn download_pars(&self, fetch_args: &ParMap) -> Result<AltData, VirtObsError> {
        Ok(self
            .download_pars_list()?
            .into_iter()
            .map(|k| {
                let value = fetch_args
                    .get(&k)
                    .or_else(|| self.params.get(&k))
                    .map(ParValue::to_json)
                    .unwrap_or(serde_json::Value::Null);
                (k, value)
            })
            .collect())
    }

    /// Root folder of this observatory's files.
    pub fn data_path(&self) -> Utf8PathBuf {
        self.params.get_data_path()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_and_lock() {
        let mut pars = ObservatoryPars::new("Demo").unwrap();
        pars.finalize(None, &ParMap::new()).unwrap();
        assert_eq!(pars.obs_name(), "demo");
        assert_eq!(pars.params().get_str("obs_name").unwrap(), "DEMO");
        assert!(pars.overwrite_files().unwrap());
        assert_eq!(pars.data_types().unwrap(), vec![DataType::Photometry]);
        assert!(pars.params_mut().set("not_a_parameter", 1).is_err());
    }

    #[test]
    fn test_specific_inputs() {
        let mut pars = ObservatoryPars::new("demo").unwrap();
        let inputs = ParMap::from([
            ("num_threads_download".to_string(), ParValue::Int(2)),
            (
                "DEMO".to_string(),
                ParValue::Map(ParMap::from([(
                    "num_threads_download".to_string(),
                    ParValue::Int(5),
                )])),
            ),
            (
                "ztf".to_string(),
                ParValue::Map(ParMap::from([(
                    "num_threads_download".to_string(),
                    ParValue::Int(9),
                )])),
            ),
            ("data_types".to_string(), ParValue::from(vec!["lcs", "phot"])),
        ]);
        pars.finalize(None, &inputs).unwrap();
        assert_eq!(pars.num_threads_download().unwrap(), 5);
        assert_eq!(pars.data_types().unwrap(), vec![DataType::Photometry]);
    }

    #[test]
    fn test_config_file_layers() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "observatories:").unwrap();
        writeln!(file, "  download_batch_size: 7").unwrap();
        writeln!(file, "  filtmap: 'ztf{{}}'").unwrap();
        writeln!(file, "  demo:").unwrap();
        writeln!(file, "    download_batch_size: 11").unwrap();
        let path = Utf8Path::from_path(file.path()).unwrap();

        let mut pars = ObservatoryPars::new("demo").unwrap();
        pars.finalize(Some(path), &ParMap::new()).unwrap();
        assert_eq!(pars.download_batch_size().unwrap(), 11);
        assert_eq!(pars.filtmap().unwrap().unwrap().apply("g"), "ztfg");
    }

    #[test]
    fn test_download_pars() {
        let mut pars = ObservatoryPars::new("demo").unwrap();
        pars.add_par("wait_time", 0.0, &[ParType::Float], "").unwrap();
        let inputs = ParMap::from([(
            "download_pars_list".to_string(),
            ParValue::from(vec!["wait_time"]),
        )]);
        pars.finalize(None, &inputs).unwrap();

        let current = pars.download_pars(&ParMap::new()).unwrap();
        assert_eq!(current["wait_time"], serde_json::json!(0.0));
        let args = ParMap::from([("wait_time".to_string(), ParValue::Float(1.5))]);
        assert_eq!(pars.download_pars(&args).unwrap()["wait_time"], serde_json::json!(1.5));
    }

    #[test]
    fn test_inline_credentials() {
        let mut pars = ObservatoryPars::new("demo").unwrap();
        let inputs = ParMap::from([(
            "credentials".to_string(),
            ParValue::Map(ParMap::from([
                ("filename".to_string(), ParValue::from("/no/such/file.yaml")),
                ("username".to_string(), ParValue::from("guy")),
            ])),
        )]);
        pars.finalize(None, &inputs).unwrap();
        assert_eq!(pars.credentials().get("username"), Some(&ParValue::from("guy")));
        assert!(!pars.credentials().contains_key("filename"));
    }
}
