//! Integration tests for configuration resolution.
//!
//! Covers source precedence, coercion through the full read path, static
//! memoization, the initialization guard, overrides, subtype field
//! overrides, and the introspection helpers used by audit tooling.

mod common;

use common::{Harness, my_service};
use layered_settings::config::secure_hash;
use layered_settings::{
    ConfigType, ErrorCode, FieldOptions, FieldType, SettingsError, Source, UninitializedRuntimeSettings, Value,
};
use serde_json::json;
use std::fs;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread;
use tempfile::TempDir;

const MY_SERVICE_YAML: &str = r#"
shared:
  host: yaml.example.com
  port: 8000
  timeout: 3.5
test:
  protocol: http
development:
  protocol: ftp
"#;

fn yaml_harness() -> (TempDir, Harness) {
    let temp = TempDir::new().unwrap();
    fs::write(temp.path().join("my_service.yml"), MY_SERVICE_YAML).unwrap();
    let harness = Harness::new().with_yaml_dir(temp.path(), "test");
    (temp, harness)
}

#[test]
fn test_environment_variable_overrides_default() {
    let harness = Harness::new();
    let config = harness.instance(&my_service(&harness));

    assert_eq!(config.get("port").unwrap(), Some(Value::Integer(80)));
    assert_eq!(config.source("port").unwrap(), Source::Default);

    harness.env.set("MY_SERVICE_PORT", "8080");
    assert_eq!(config.get("port").unwrap(), Some(Value::Integer(8080)));
    assert_eq!(config.source("port").unwrap(), Source::Env);

    harness.env.remove("MY_SERVICE_PORT");
    assert_eq!(config.get("port").unwrap(), Some(Value::Integer(80)));
}

#[test]
fn test_source_precedence() {
    let (_temp, harness) = yaml_harness();
    let config = harness.instance(&my_service(&harness));

    assert_eq!(config.get_as::<String>("host").unwrap().as_deref(), Some("yaml.example.com"));
    assert_eq!(config.source("host").unwrap(), Source::Yaml);

    harness.settings.set("my_service.host", "runtime.example.com");
    assert_eq!(
        config.get_as::<String>("host").unwrap().as_deref(),
        Some("runtime.example.com")
    );
    assert_eq!(config.source("host").unwrap(), Source::Runtime);

    harness.env.set("MY_SERVICE_HOST", "env.example.com");
    assert_eq!(config.get_as::<String>("host").unwrap().as_deref(), Some("env.example.com"));
    assert_eq!(config.source("host").unwrap(), Source::Env);
}

#[test]
fn test_blank_values_fall_through() {
    let (_temp, harness) = yaml_harness();
    let config = harness.instance(&my_service(&harness));

    harness.env.set("MY_SERVICE_HOST", "");
    harness.settings.set("my_service.host", "");
    assert_eq!(config.get_as::<String>("host").unwrap().as_deref(), Some("yaml.example.com"));

    harness.settings.set("my_service.host", json!(null));
    assert_eq!(config.source("host").unwrap(), Source::Yaml);
}

#[test]
fn test_yaml_sections_and_types() {
    let (_temp, harness) = yaml_harness();
    let config = harness.instance(&my_service(&harness));

    assert_eq!(config.get_as::<String>("protocol").unwrap().as_deref(), Some("http"));
    assert_eq!(config.get("port").unwrap(), Some(Value::Integer(8000)));
    assert_eq!(config.get("timeout").unwrap(), Some(Value::Float(3.5)));
}

#[test]
fn test_yaml_is_read_once_per_instance() {
    let (temp, harness) = yaml_harness();
    let ty = my_service(&harness);
    let config = harness.instance(&ty);
    assert_eq!(config.get("port").unwrap(), Some(Value::Integer(8000)));

    fs::write(temp.path().join("my_service.yml"), "shared:\n  port: 9000\n").unwrap();
    assert_eq!(config.get("port").unwrap(), Some(Value::Integer(8000)));

    let fresh = harness.instance(&ty);
    assert_eq!(fresh.get("port").unwrap(), Some(Value::Integer(9000)));
}

#[test]
fn test_missing_yaml_file_is_skipped() {
    let temp = TempDir::new().unwrap();
    let harness = Harness::new().with_yaml_dir(temp.path(), "test");
    let config = harness.instance(&my_service(&harness));
    assert_eq!(config.get("host").unwrap(), None);
    assert_eq!(config.get_as::<String>("protocol").unwrap().as_deref(), Some("https"));
}

#[test]
fn test_default_if_replaces_value() {
    let harness = Harness::new();
    let config = harness.instance(&my_service(&harness));

    harness.env.set("MY_SERVICE_TIMEOUT", "0");
    assert_eq!(config.get("timeout").unwrap(), Some(Value::Float(1.0)));
    assert_eq!(config.source("timeout").unwrap(), Source::Default);

    harness.env.set("MY_SERVICE_TIMEOUT", "2.5");
    assert_eq!(config.get("timeout").unwrap(), Some(Value::Float(2.5)));
}

#[test]
fn test_named_default_predicate() {
    let harness = Harness::new();
    let ty = harness.declare("RetryConfiguration");
    ty.define_predicate("not_positive", |v| v.as_i64().is_some_and(|i| i <= 0))
        .field(
            "attempts",
            FieldOptions::new()
                .of_type(FieldType::Integer)
                .default(3)
                .default_if_method("not_positive"),
        )
        .unwrap();
    let config = harness.instance(&ty);

    harness.env.set("RETRY_ATTEMPTS", "-1");
    assert_eq!(config.get_as::<i64>("attempts").unwrap(), Some(3));
    harness.env.set("RETRY_ATTEMPTS", "7");
    assert_eq!(config.get_as::<i64>("attempts").unwrap(), Some(7));
}

#[test]
fn test_non_numeric_strings_coerce_to_zero() {
    let harness = Harness::new();
    let config = harness.instance(&my_service(&harness));
    harness.env.set("MY_SERVICE_PORT", "abc");
    assert_eq!(config.get("port").unwrap(), Some(Value::Integer(0)));
    assert_eq!(config.source("port").unwrap(), Source::Env);
}

#[test]
fn test_explicit_keys_with_disabled_sources() {
    let harness = Harness::new();
    let ty = harness.declare("ExplicitConfiguration");
    ty.configure(|s| {
        s.environment_variables_disabled = Some(true);
        s.runtime_settings_disabled = Some(true);
        s.yaml_config_disabled = Some(true);
    });
    ty.field("host", FieldOptions::new().yaml_key("host"))
        .unwrap()
        .field("token", FieldOptions::new().env_var("EXPLICIT_TOKEN"))
        .unwrap()
        .field(
            "timeout",
            FieldOptions::new()
                .of_type(FieldType::Integer)
                .runtime_setting("explicit.timeout")
                .default(5),
        )
        .unwrap();
    let config = harness.instance(&ty);

    harness.env.set("EXPLICIT_HOST", "ignored");
    harness.env.set("EXPLICIT_TOKEN", "abc");
    harness.env.set("EXPLICIT_TIMEOUT", "30");
    assert_eq!(config.get("host").unwrap(), None);
    assert_eq!(config.get_as::<String>("token").unwrap().as_deref(), Some("abc"));
    assert_eq!(config.get_as::<i64>("timeout").unwrap(), Some(5));

    harness.settings.set("explicit.timeout", 10);
    assert_eq!(config.get_as::<i64>("timeout").unwrap(), Some(10));
    assert_eq!(
        config.available_sources("timeout").unwrap(),
        vec![Source::Runtime, Source::Default]
    );
}

#[test]
fn test_static_fields_are_memoized() {
    let harness = Harness::new();
    let ty = harness.declare("BootConfiguration");
    ty.field("mode", FieldOptions::new().static_field()).unwrap();
    let config = harness.instance(&ty);

    harness.env.set("BOOT_MODE", "first");
    harness.settings.set("boot.mode", "runtime");
    assert_eq!(config.get_as::<String>("mode").unwrap().as_deref(), Some("first"));

    harness.env.set("BOOT_MODE", "second");
    assert_eq!(config.get_as::<String>("mode").unwrap().as_deref(), Some("first"));

    config.reset_memoized();
    harness.env.remove("BOOT_MODE");
    assert_eq!(config.get("mode").unwrap(), None);
}

#[test]
fn test_static_memo_is_shared_across_threads() {
    let harness = Harness::new();
    let ty = harness.declare("BootConfiguration");
    ty.field("mode", FieldOptions::new().static_field()).unwrap();
    let config = Arc::new(harness.instance(&ty));
    harness.env.set("BOOT_MODE", "shared");

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let config = Arc::clone(&config);
            thread::spawn(move || config.get_as::<String>("mode").unwrap())
        })
        .collect();
    harness.env.set("BOOT_MODE", "changed");

    let first = config.get_as::<String>("mode").unwrap();
    for handle in handles {
        assert_eq!(handle.join().unwrap(), first);
    }
}

#[test]
fn test_initialization_guard() {
    let harness = Harness::new();
    let ty = my_service(&harness);
    ty.field("boot", FieldOptions::new().static_field().default("yes"))
        .unwrap();
    let config = harness.instance(&ty);

    harness.context.begin_initialization();
    let err = config.get("host").unwrap_err();
    assert_eq!(err.code(), ErrorCode::NotInitialized);
    assert_eq!(
        err.to_string(),
        "The value for MyServiceConfiguration.host cannot be referenced during initialization"
    );
    assert_eq!(config.get_as::<String>("boot").unwrap().as_deref(), Some("yes"));

    harness.context.finish_initialization();
    assert_eq!(config.get("host").unwrap(), None);
}

#[test]
fn test_uninitialized_runtime_settings_fail_loudly() {
    let harness = Harness::new();
    let config = harness.instance(&my_service(&harness));
    harness
        .context
        .set_runtime_settings(UninitializedRuntimeSettings);

    let err = config.get("host").unwrap_err();
    assert!(matches!(err, SettingsError::RuntimeSettingsUninitialized(ref key) if key == "my_service.host"));

    harness.env.set("MY_SERVICE_HOST", "env.example.com");
    assert_eq!(config.get_as::<String>("host").unwrap().as_deref(), Some("env.example.com"));
    assert_eq!(config.get("auth_token").unwrap(), None);
}

#[test]
fn test_overrides_restore_after_panic() {
    let harness = Harness::new();
    let config = harness.instance(&my_service(&harness));
    harness.env.set("MY_SERVICE_HOST", "env.example.com");

    let result: Result<(), _> = panic::catch_unwind(AssertUnwindSafe(|| {
        config.with_overrides([("host", "override.example.com")], || {
            assert_eq!(
                config.get_as::<String>("host").unwrap().as_deref(),
                Some("override.example.com")
            );
            panic!("boom");
        })
    }));
    assert!(result.is_err());
    assert_eq!(config.get_as::<String>("host").unwrap().as_deref(), Some("env.example.com"));
}

#[test]
fn test_overrides_are_coerced_and_respect_default_if() {
    let harness = Harness::new();
    let config = harness.instance(&my_service(&harness));
    config.with_overrides([("port", json!("9090")), ("timeout", json!(-1))], || {
        assert_eq!(config.get("port").unwrap(), Some(Value::Integer(9090)));
        assert_eq!(config.get("timeout").unwrap(), Some(Value::Float(1.0)));
    });
}

#[test]
fn test_subtype_field_override() {
    let harness = Harness::new();
    let parent = harness.declare("TestConfiguration");
    parent
        .field("foo", FieldOptions::new())
        .unwrap()
        .field("bar", FieldOptions::new())
        .unwrap();
    let child = ConfigType::inherit(&parent, "SubclassConfiguration");
    child
        .field("bar", FieldOptions::new().of_type(FieldType::Integer))
        .unwrap();

    harness.env.set("TEST_BAR", "12");
    harness.env.set("SUBCLASS_BAR", "34");
    harness.env.set("SUBCLASS_FOO", "ignored");
    harness.env.set("TEST_FOO", "inherited");

    let parent_config = harness.instance(&parent);
    let child_config = harness.instance(&child);
    assert_eq!(parent_config.get("bar").unwrap(), Some(Value::String("12".into())));
    assert_eq!(child_config.get("bar").unwrap(), Some(Value::Integer(34)));
    assert_eq!(
        child_config.get_as::<String>("foo").unwrap().as_deref(),
        Some("inherited")
    );
}

#[test]
fn test_unknown_fields() {
    let harness = Harness::new();
    let config = harness.instance(&my_service(&harness));
    assert_eq!(config.get("nope").unwrap(), None);
    assert!(!config.includes("nope"));
    assert!(config.includes("host"));
    for err in [
        config.source("nope").unwrap_err(),
        config.available_sources("nope").unwrap_err(),
        config.value_from_source("nope", Source::Env).unwrap_err(),
    ] {
        assert_eq!(err.code(), ErrorCode::UnknownField);
    }
}

#[test]
fn test_value_from_source() {
    let (_temp, harness) = yaml_harness();
    let config = harness.instance(&my_service(&harness));
    harness.env.set("MY_SERVICE_PORT", "8080");
    harness.settings.set("my_service.port", 5000);

    assert_eq!(
        config.value_from_source("port", Source::Env).unwrap(),
        Some(Value::Integer(8080))
    );
    assert_eq!(
        config.value_from_source("port", Source::Runtime).unwrap(),
        Some(Value::Integer(5000))
    );
    assert_eq!(
        config.value_from_source("port", Source::Yaml).unwrap(),
        Some(Value::Integer(8000))
    );
    assert_eq!(
        config.value_from_source("port", Source::Default).unwrap(),
        Some(Value::Integer(80))
    );

    harness.context.clear_runtime_settings();
    assert_eq!(
        config.value_from_source("port", Source::Runtime).unwrap(),
        Some(Value::Integer(80))
    );
}

#[test]
fn test_available_sources() {
    let harness = Harness::new();
    let config = harness.instance(&my_service(&harness));
    assert_eq!(
        config.available_sources("port").unwrap(),
        vec![Source::Env, Source::Runtime, Source::Yaml, Source::Default]
    );
    assert_eq!(config.available_sources("host").unwrap(), vec![Source::Env, Source::Runtime, Source::Yaml]);
    assert_eq!(config.available_sources("auth_token").unwrap(), vec![Source::Env]);
}

#[test]
fn test_to_hash_obfuscates_secrets() {
    let harness = Harness::new();
    let config = harness.instance(&my_service(&harness));
    harness.env.set("MY_SERVICE_TOKEN", "s3cret");

    let hash = config.to_hash().unwrap();
    assert_eq!(hash.get("host"), Some(&json!(null)));
    assert_eq!(hash.get("port"), Some(&json!(80)));
    assert_eq!(hash.get("protocol"), Some(&json!("https")));
    assert_eq!(hash.get("timeout"), Some(&json!(1.0)));
    assert_eq!(hash.get("auth_token"), Some(&json!(secure_hash("s3cret"))));
    assert_eq!(hash.len(), 5);
}

#[test]
fn test_fields_are_secret_by_default() {
    let harness = Harness::new();
    let ty = harness.declare("VaultConfiguration");
    ty.field("key", FieldOptions::new())
        .unwrap()
        .field("region", FieldOptions::new().secret(false))
        .unwrap()
        .field("empty", FieldOptions::new())
        .unwrap();
    harness.env.set("VAULT_KEY", "k");
    harness.env.set("VAULT_REGION", "eu");

    let hash = harness.instance(&ty).to_hash().unwrap();
    assert_eq!(hash.get("key"), Some(&json!(secure_hash("k"))));
    assert_eq!(hash.get("region"), Some(&json!("eu")));
    assert_eq!(hash.get("empty"), Some(&json!(null)));
}

#[test]
fn test_secret_default_follows_declaring_type() {
    let harness = Harness::new();
    let parent = harness.declare("ParentConfiguration");
    parent.configure(|s| s.fields_secret_by_default = Some(false));
    parent.field("name", FieldOptions::new()).unwrap();

    let child = ConfigType::inherit(&parent, "ChildConfiguration");
    child.configure(|s| s.fields_secret_by_default = Some(true));
    child.field("token", FieldOptions::new()).unwrap();
    harness.env.set("PARENT_NAME", "visible");
    harness.env.set("CHILD_TOKEN", "t");

    let hash = harness.instance(&child).to_hash().unwrap();
    assert_eq!(hash.get("name"), Some(&json!("visible")));
    assert_eq!(hash.get("token"), Some(&json!(secure_hash("t"))));
}

#[test]
fn test_flag_and_boolean_coercion() {
    let harness = Harness::new();
    let ty = harness.declare("FeatureConfiguration");
    ty.field("enabled", FieldOptions::new().of_type("boolean"))
        .unwrap();
    let config = harness.instance(&ty);

    assert!(!config.flag("enabled").unwrap());
    for (raw, expected) in [("true", true), ("OFF", false), ("0", false), ("yes", true), ("f", false)] {
        harness.env.set("FEATURE_ENABLED", raw);
        assert_eq!(config.flag("enabled").unwrap(), expected, "{raw}");
    }
}

#[test]
fn test_datetime_and_array_fields() {
    let harness = Harness::new();
    let ty = harness.declare("ScheduleConfiguration");
    ty.field("starts_at", FieldOptions::new().of_type(FieldType::DateTime))
        .unwrap()
        .field("hosts", FieldOptions::new().of_type(FieldType::Array))
        .unwrap();
    let config = harness.instance(&ty);

    harness.env.set("SCHEDULE_STARTS_AT", "2024-03-01T12:00:00+02:00");
    harness.env.set("SCHEDULE_HOSTS", r#"a,"b,c", d"#);

    let starts_at = config
        .get("starts_at")
        .unwrap()
        .and_then(|v| v.as_datetime())
        .unwrap();
    assert_eq!(starts_at.to_rfc3339(), "2024-03-01T10:00:00+00:00");
    assert_eq!(
        config.get_as::<Vec<String>>("hosts").unwrap(),
        Some(vec!["a".to_string(), "b,c".to_string(), "d".to_string()])
    );
}
