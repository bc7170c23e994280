//! Contract tests against the tropical Pacific sea level descriptor.

use podkit_core::{
    check_input_files, data_file_path, resolve_driver, runtime_environments, validate, CaseConfig,
    EnvNaming, EnvVars, Frequency, InputStatus, NameMap, PodDescriptor, PodRegistry, Program,
};
use std::path::{Path, PathBuf};

fn fixture_dir() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures/tropical_pacific_sea_level")
}

fn load() -> PodDescriptor {
    PodDescriptor::load(fixture_dir()).expect("fixture descriptor should parse")
}

#[test]
fn test_descriptor_metadata() {
    let pod = load();
    assert_eq!(pod.settings.driver, "tropical_pacific_sea_level.py");
    assert_eq!(pod.settings.long_name, "Tropical Pacific Sea Level");
    assert_eq!(pod.settings.realm.names(), vec!["ocean"]);
    assert_eq!(pod.data.frequency, Frequency::Monthly);
    assert!(pod.settings.runtime_requirements["python3"].contains(&"xarray".to_string()));
}

#[test]
fn test_every_variable_dimension_is_declared() {
    let pod = load();
    for (name, var) in &pod.varlist {
        for dim in &var.dimensions {
            assert!(
                pod.dimensions.contains_key(dim),
                "{} references undeclared dimension {}",
                name,
                dim
            );
        }
    }
    assert_eq!(pod.varlist["zos"].dimensions, vec!["time", "lat", "lon"]);
}

#[test]
fn test_units_and_standard_names_non_empty() {
    let pod = load();
    for var in pod.varlist.values() {
        assert!(!var.units.is_empty());
        assert!(!var.standard_name.is_empty());
    }
    for dim in pod.dimensions.values() {
        assert!(!dim.standard_name.is_empty());
    }
}

#[test]
fn test_region_limits_are_ordered() {
    let env = EnvVars::from_descriptor(&load());
    let bbox = env.bounding_box().unwrap();
    assert!(bbox.lat_min < bbox.lat_max);
    assert!(bbox.lon_min < bbox.lon_max);
    assert_eq!((bbox.lat_min, bbox.lat_max), (10.0, 20.0));
    assert_eq!((bbox.lon_min, bbox.lon_max), (120.0, 150.0));
}

#[test]
fn test_fixture_validates_cleanly() {
    let report = validate(&load());
    assert!(report.is_valid(), "{:#?}", report.issues);
    assert_eq!(report.warnings().count(), 0, "{:#?}", report.issues);
}

#[test]
fn test_settings_are_exported_in_order() {
    let env = EnvVars::from_descriptor(&load());
    let keys: Vec<String> = env.to_env().into_iter().map(|(k, _)| k).collect();
    assert_eq!(keys.first().map(String::as_str), Some("predef_obs_year_start"));
    assert_eq!(keys.last().map(String::as_str), Some("lon_max"));
    assert_eq!(env.get_or("predef_obs_year_start", 0_i64), 1993);
}

#[test]
fn test_runtime_environment() {
    let envs = runtime_environments(&load(), "tropical_pacific_sea_level", EnvNaming::PerPod);
    assert_eq!(envs.len(), 1);
    assert_eq!(envs[0].name, "_MDTF_python3_tropical_pacific_sea_level");
}

#[test]
fn test_preflight_against_case() {
    let pod = load();
    let work = tempfile::tempdir().unwrap();

    // pod directory with the driver
    let pod_dir = work.path().join("tropical_pacific_sea_level");
    std::fs::create_dir(&pod_dir).unwrap();
    std::fs::write(pod_dir.join("tropical_pacific_sea_level.py"), "").unwrap();
    let driver = resolve_driver(&pod_dir, "tropical_pacific_sea_level", &pod.settings.driver).unwrap();
    assert_eq!(driver.program, Program::Python);

    // model data for the required variables only
    let config = CaseConfig::from_yaml(
        "case_list:\n  - CASENAME: OMIP\n    model: CESM\n    FIRSTYR: 1993\n    LASTYR: 2009\n",
    )
    .unwrap();
    let case = &config.case_list[0];
    let datadir = work.path().join("data");
    for var in ["zos", "tauuo", "tauvo"] {
        let path = data_file_path(&datadir, &case.casename, var, Frequency::Monthly);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, b"").unwrap();
    }

    let check = check_input_files(&pod, case, &datadir, &NameMap::new());
    assert!(check.is_satisfied());
    assert!(matches!(
        check.status_of("areacello"),
        Some(InputStatus::MissingOptional { .. })
    ));
}

#[test]
fn test_registry_scan_of_fixture_tree() {
    let root = Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures");
    let registry = PodRegistry::scan(root).unwrap();
    let pod = registry.get("tropical_pacific_sea_level").expect("registered");
    assert_eq!(pod.digest, load().digest().unwrap());
    assert!(registry.rejected().is_empty());
}
