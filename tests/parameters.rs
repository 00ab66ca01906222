mod common;

use camino::Utf8PathBuf;
use tempfile::TempDir;
use virtobs::observatory::demo::DemoObservatory;
use virtobs::observatory::Observatory;
use virtobs::parameters::{ParType, ParValue, Parameters};
use virtobs::virtobs_errors::VirtObsError;

use crate::common::par_map;

fn write_file(dir: &TempDir, name: &str, text: &str) -> Utf8PathBuf {
    let path = Utf8PathBuf::from_path_buf(dir.path().join(name)).unwrap();
    std::fs::write(&path, text).unwrap();
    path
}

const CONFIG: &str = "
observatories:
  num_threads_download: 3
  download_batch_size: 7
  reducer:
    drop_bad: true
  demo:
    demo_string: bar
    wait_time: 0.0
  ztf:
    demo_string: not_for_demo
catalogs:
  filename: whatever.csv
";

#[test]
fn test_config_layers() {
    let dir = TempDir::new().unwrap();
    let cfg = write_file(&dir, "config.yaml", CONFIG);

    let inputs = par_map([
        ("num_threads_download", ParValue::Int(4)),
        ("DEMO", ParValue::Map(par_map([("demo_boolean", ParValue::Bool(false))]))),
        ("ztf", ParValue::Map(par_map([("unknown", ParValue::Int(1))]))),
    ]);
    let obs = DemoObservatory::new(Some(&cfg), &inputs).unwrap();
    let params = obs.pars().params();

    assert_eq!(obs.name(), "demo");
    assert_eq!(params.get_str("obs_name").unwrap(), "DEMO");
    assert_eq!(obs.pars().num_threads_download().unwrap(), 4);
    assert_eq!(obs.pars().download_batch_size().unwrap(), 7);
    assert_eq!(params.get_str("demo_string").unwrap(), "bar");
    assert!(!params.get_bool("demo_boolean").unwrap());
    assert_eq!(
        obs.pars().reducer().unwrap().get("drop_bad"),
        Some(&ParValue::Bool(true))
    );
}

#[test]
fn test_unknown_parameter_in_config() {
    let dir = TempDir::new().unwrap();
    let cfg = write_file(&dir, "config.yaml", "observatories:\n  demo:\n    demo_strnig: typo\n");
    assert!(matches!(
        DemoObservatory::new(Some(&cfg), &Default::default()),
        Err(VirtObsError::Configuration(_))
    ));
}

#[test]
fn test_wrong_type_in_inputs() {
    let inputs = par_map([("overwrite_files", ParValue::from("yes"))]);
    assert!(matches!(
        DemoObservatory::with_inputs(&inputs),
        Err(VirtObsError::Configuration(_))
    ));
}

#[test]
fn test_invalid_url() {
    let inputs = par_map([("demo_url", ParValue::from("not a url"))]);
    assert!(DemoObservatory::with_inputs(&inputs).is_err());
}

#[test]
fn test_credentials_file_and_inline_values() {
    let dir = TempDir::new().unwrap();
    let creds = write_file(
        &dir,
        "credentials.yaml",
        "demo:\n  username: alice\n  password: from_file\nztf:\n  username: bob\n",
    );
    let inputs = par_map([(
        "credentials",
        ParValue::Map(par_map([
            ("filename", ParValue::from(creds.as_str())),
            ("password", ParValue::from("inline")),
        ])),
    )]);
    let obs = DemoObservatory::with_inputs(&inputs).unwrap();
    let credentials = obs.pars().credentials();
    assert_eq!(credentials.get("username"), Some(&ParValue::from("alice")));
    assert_eq!(credentials.get("password"), Some(&ParValue::from("inline")));
    assert!(!credentials.contains_key("filename"));
}

#[test]
fn test_save_then_load() {
    let dir = TempDir::new().unwrap();
    let path = Utf8PathBuf::from_path_buf(dir.path().join("pars.yaml")).unwrap();

    let make = || {
        let mut p = Parameters::new(["threshold"]);
        p.add_par("threshold", 3.0, &[ParType::Float], "Clipping threshold").unwrap();
        p.add_par("bands", ParValue::List(vec![]), &[ParType::Set], "Bands to keep").unwrap();
        p.lock();
        p
    };

    let mut original = make();
    original.set("threshold", 4).unwrap();
    original.set("bands", vec!["g", "r"]).unwrap();
    original.save(&path).unwrap();

    let mut loaded = make();
    loaded.load(&path, None).unwrap();
    assert_eq!(loaded.to_map(), original.to_map());
    assert_eq!(loaded.get_f64("threshold").unwrap(), 4.0);
    assert!(loaded.get_set("bands").unwrap().contains("g"));

    assert!(matches!(
        loaded.load(&path, Some("missing")),
        Err(VirtObsError::Configuration(_))
    ));
}
