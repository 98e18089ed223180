// tests/config_loading.rs

use std::io::Write;
use std::time::Duration;

use tempfile::NamedTempFile;
use ferryman::config::{load_and_validate, EndpointKind};
use ferryman::errors::FerrymanError;
use ferryman::types::{StoreMode, TriggerKind};

fn write_config(contents: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    write!(file, "{contents}").unwrap();
    file
}

#[test]
fn full_config_loads_with_defaults_applied() {
    let file = write_config(
        r#"
[config]
max_concurrent_jobs = 8
store = "memory"

[config.retry]
max_retries = 5
base_delay = "2s"

[endpoint.inbox]
kind = "local"
root = "/srv/inbox"

[endpoint.media]
kind = "s3"
bucket = "media"
env_auth = true
max_concurrent_transfers = 4
bandwidth_limit = "10M"

[[template]]
name = "ingest"
trigger = "file_created"
source = { endpoint = "inbox", path = "incoming", pattern = "**/*.mp4" }
destination = { endpoint = "media", path = "raw/{dir}/{stem}" }

[[template]]
name = "nightly"
trigger = "scheduled"
schedule = "24h"
source = { endpoint = "media", path = "raw" }
destination = { endpoint = "inbox", path = "backup/{date}" }
active = false
"#,
    );

    let cfg = load_and_validate(file.path()).unwrap();
    assert_eq!(cfg.config.max_concurrent_jobs, 8);
    assert_eq!(cfg.config.store, StoreMode::Memory);
    assert_eq!(cfg.config.retry.max_retries, 5);
    assert_eq!(cfg.config.retry.base_delay.0, Duration::from_secs(2));
    assert_eq!(cfg.config.retry.max_delay.0, Duration::from_secs(300));

    let media = &cfg.endpoints()["media"];
    assert!(matches!(media.kind, EndpointKind::S3(_)));
    assert_eq!(media.max_concurrent_transfers, 4);
    assert_eq!(media.bandwidth_limit.as_deref(), Some("10M"));
    assert_eq!(cfg.endpoints()["inbox"].max_concurrent_transfers, 2);

    let templates = cfg.build_templates();
    assert_eq!(templates.len(), 2);
    assert_eq!(templates[0].id, 1);
    assert_eq!(templates[0].trigger, TriggerKind::FileCreated);
    assert_eq!(templates[1].schedule_interval(), Some(Duration::from_secs(24 * 3600)));
    assert!(!templates[1].active);
    // Pattern defaults to everything.
    assert_eq!(templates[1].source.pattern, "*");
}

#[test]
fn missing_file_is_a_config_error() {
    match load_and_validate("/definitely/not/here/Ferryman.toml") {
        Err(FerrymanError::Config(msg)) => assert!(msg.contains("cannot read config")),
        other => panic!("Expected Config error, got: {other:?}"),
    }
}

#[test]
fn malformed_toml_is_reported() {
    let file = write_config("[endpoint.inbox\nkind = local");
    match load_and_validate(file.path()) {
        Err(FerrymanError::Toml(_)) => {}
        other => panic!("Expected Toml error, got: {other:?}"),
    }
}

#[test]
fn unknown_endpoint_in_a_hop_is_an_invalid_template() {
    let file = write_config(
        r#"
[endpoint.inbox]
kind = "local"
root = "/srv/inbox"

[[template]]
name = "ingest"
trigger = "manual"
source = { endpoint = "inbox", path = "in" }
destination = { endpoint = "inbox", path = "out" }
chain = [{ endpoint = "nowhere", path = "x" }]
"#,
    );

    match load_and_validate(file.path()) {
        Err(FerrymanError::InvalidTemplate { template, reason }) => {
            assert_eq!(template, "ingest");
            assert!(reason.contains("nowhere"), "{reason}");
        }
        other => panic!("Expected InvalidTemplate, got: {other:?}"),
    }
}

#[test]
fn file_placeholder_on_a_manual_template_is_rejected() {
    let file = write_config(
        r#"
[endpoint.inbox]
kind = "local"
root = "/srv/inbox"

[[template]]
name = "ingest"
trigger = "manual"
source = { endpoint = "inbox", path = "in" }
destination = { endpoint = "inbox", path = "out/{stem}" }
"#,
    );

    let err = load_and_validate(file.path()).unwrap_err();
    assert!(matches!(err, FerrymanError::InvalidTemplate { .. }), "{err:?}");
    assert!(err.to_string().contains("file placeholder"));
}

#[test]
fn s3_without_any_credentials_is_rejected() {
    let file = write_config(
        r#"
[endpoint.media]
kind = "s3"
bucket = "media"
"#,
    );

    match load_and_validate(file.path()) {
        Err(FerrymanError::Config(msg)) => {
            assert!(msg.contains("endpoint 'media'"));
            assert!(msg.contains("env_auth"));
        }
        other => panic!("Expected Config error, got: {other:?}"),
    }
}

#[test]
fn object_trigger_on_a_local_source_is_rejected() {
    let file = write_config(
        r#"
[endpoint.inbox]
kind = "local"
root = "/srv/inbox"

[[template]]
name = "wrong"
trigger = "object_created"
source = { endpoint = "inbox" }
destination = { endpoint = "inbox", path = "out" }
"#,
    );

    let err = load_and_validate(file.path()).unwrap_err();
    assert!(err.to_string().contains("object-store source"), "{err}");
}
