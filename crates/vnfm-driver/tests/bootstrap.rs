//! ---
//! vnfm_section: "02-lifecycle"
//! vnfm_subsection: "module"
//! vnfm_type: "test"
//! vnfm_scope: "code"
//! vnfm_description: "Driver startup from a configuration file."
//! vnfm_version: "v0.0.0-prealpha"
//! vnfm_owner: "tbd"
//! ---
use vnfm_driver::LifecycleDriver;

#[test]
fn bootstrap_installs_tracing_and_builds_the_http_driver() {
    let dir = tempfile::tempdir().unwrap();
    let logs = dir.path().join("logs");
    let config = dir.path().join("vnfm.toml");
    std::fs::write(
        &config,
        format!(
            r#"
[orchestration]
endpoint = "http://127.0.0.1:8004/v1/"

[image_store]
endpoint = "http://127.0.0.1:9292/v2/"

[logging]
directory = '{}'
format = "structured-json"
"#,
            logs.display()
        ),
    )
    .unwrap();

    let missing = dir.path().join("absent.toml");
    LifecycleDriver::bootstrap("vnfm-test", &[missing, config]).unwrap();

    assert!(logs.is_dir());
}

#[test]
fn bootstrap_without_configuration_fails() {
    let dir = tempfile::tempdir().unwrap();
    let err = match LifecycleDriver::bootstrap("vnfm-test", &[dir.path().join("absent.toml")]) {
        Ok(_) => panic!("bootstrap succeeded without a configuration file"),
        Err(err) => err,
    };
    assert!(err.to_string().contains("no configuration files found"));
}
