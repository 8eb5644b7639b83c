//! Tests for loading routing configurations from disk and resolving
//! requests against them.

use std::io::Write;

use conduit_core::SessionLabel;
use conduit_routing::{RouteTarget, RoutingConfig};
use tempfile::NamedTempFile;

fn write_config(suffix: &str, content: &str) -> NamedTempFile {
    let mut file = tempfile::Builder::new().suffix(suffix).tempfile().unwrap();
    file.write_all(content.as_bytes()).unwrap();
    file
}

#[test]
fn test_load_toml_and_resolve() {
    let file = write_config(
        ".toml",
        r#"
        [[routes]]
        service = "Log"
        label = { prefix = "app" }
        target = { local = "log" }

        [[routes]]
        service = "Log"
        target = { parent = {} }
        "#,
    );

    let config = RoutingConfig::load(Some(file.path())).unwrap();
    let router = config.router();

    let route = router
        .resolve("Log", &SessionLabel::from("app -> child"))
        .unwrap();
    assert_eq!(route.target, RouteTarget::Local("log".into()));

    let route = router.resolve("Log", &SessionLabel::from("init")).unwrap();
    assert_eq!(route.target, RouteTarget::parent());

    assert!(router.resolve("Rom", &SessionLabel::from("app")).is_err());
}

#[test]
fn test_load_json() {
    let file = write_config(
        ".json",
        r#"{"routes": [{"service": "*", "label": {"exact": "a"}, "target": {"child": "c"}}]}"#,
    );

    let config = RoutingConfig::load(Some(file.path())).unwrap();
    let route = config
        .router()
        .resolve("Anything", &SessionLabel::from("a"))
        .unwrap();
    assert_eq!(route.target, RouteTarget::Child("c".into()));
}

#[test]
fn test_missing_file_yields_empty_config() {
    let dir = tempfile::tempdir().unwrap();
    let config = RoutingConfig::load(Some(&dir.path().join("absent.toml"))).unwrap();
    assert!(config.routes.is_empty());
}

#[test]
fn test_malformed_file_is_an_error() {
    let file = write_config(".toml", "[[routes]]\nservice = 3\n");
    let err = RoutingConfig::load(Some(file.path())).unwrap_err();
    assert!(err.to_string().contains("Failed to parse configuration file"));
}

#[test]
fn test_invalid_rule_is_an_error() {
    let file = write_config(
        ".toml",
        "[[routes]]\nservice = \"Log\"\nlabel = { prefix = \"\" }\ntarget = { local = \"log\" }\n",
    );
    assert!(RoutingConfig::load(Some(file.path())).is_err());
}
