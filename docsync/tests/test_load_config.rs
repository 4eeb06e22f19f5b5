use serial_test::serial;
use std::env;
use std::fs::write;
use std::path::PathBuf;
use tempfile::NamedTempFile;

use docsync::load_config::{encryptor_from_env, load_config, KEY_ENV, MODE_ENV};
use docsync_core::config::Strategy;
use docsync_core::crypto::TokenEncryptor;
use docsync_core::Repository;

fn config_file(yaml: &str) -> NamedTempFile {
    let file = NamedTempFile::new().expect("temp file");
    write(file.path(), yaml).unwrap();
    file
}

#[test]
#[serial]
fn test_load_config_mirror_and_repositories() {
    let file = config_file(
        r#"
mirror:
  base_path: ./tmp/mirrors
repositories:
  - name: handbook
    url: "https://github.com/acme/handbook"
  - name: docs
    url: "https://github.com/acme/docs"
    id: "6f1c1a4e-2a0b-4c44-9d53-0b0f4a1b2c3d"
"#,
    );

    let config = load_config(file.path()).expect("Config should load");

    assert_eq!(config.mirror.base_path, PathBuf::from("./tmp/mirrors"));
    assert_eq!(config.mirror.strategy, Strategy::Git);
    assert_eq!(config.mirror.command_timeout_secs, 120);
    assert_eq!(config.mirror.http_timeout_secs, 30);
    assert_eq!(config.mirror.api_base_url, "https://api.github.com");
    assert_eq!(config.repositories.len(), 2);

    let handbook = &config.repositories[0];
    assert_eq!(handbook.id(), Repository::id_for_url("https://github.com/acme/handbook"));
    assert_eq!(
        config.repositories[1].id().to_string(),
        "6f1c1a4e-2a0b-4c44-9d53-0b0f4a1b2c3d"
    );
}

#[test]
#[serial]
fn test_load_config_github_strategy_overrides() {
    let file = config_file(
        r#"
mirror:
  base_path: /var/lib/docsync
  strategy: github
  http_timeout_secs: 5
  api_base_url: "https://ghe.example.com/api/v3"
"#,
    );

    let config = load_config(file.path()).expect("Config should load without repositories");
    assert_eq!(config.mirror.strategy, Strategy::Github);
    assert_eq!(config.mirror.http_timeout_secs, 5);
    assert_eq!(config.mirror.api_base_url, "https://ghe.example.com/api/v3");
    assert!(config.repositories.is_empty());
}

#[test]
#[serial]
fn test_load_config_errors_for_invalid_file() {
    let file = config_file("not-yaml: [:::");
    let msg = load_config(file.path()).unwrap_err().to_string();
    assert!(
        msg.contains("parse") || msg.contains("YAML"),
        "Parse error expected, got: {msg}"
    );

    let missing = load_config("/definitely/not/here.yaml").unwrap_err().to_string();
    assert!(missing.contains("Failed to read config file"), "{missing}");
}

#[test]
#[serial]
fn test_load_config_rejects_duplicate_names() {
    let file = config_file(
        r#"
mirror:
  base_path: ./tmp
repositories:
  - name: docs
    url: "https://github.com/acme/docs"
  - name: docs
    url: "https://github.com/acme/other"
"#,
    );
    let msg = load_config(file.path()).unwrap_err().to_string();
    assert!(msg.contains("'docs'"), "{msg}");
}

#[test]
#[serial]
fn test_repository_tokens_are_unsealed_with_the_key() {
    let encryptor = TokenEncryptor::from_base64_key(&TokenEncryptor::generate_key()).unwrap();
    let envelope = encryptor.encrypt("ghp_private").unwrap();
    let file = config_file(&format!(
        r#"
mirror:
  base_path: ./tmp
repositories:
  - name: private
    url: "https://github.com/acme/private"
    token: "{envelope}"
  - name: public
    url: "https://github.com/acme/public"
  - name: insecure
    url: "http://github.com/acme/insecure"
"#
    ));
    let config = load_config(file.path()).unwrap();

    let private = config.repository("private", &encryptor).unwrap();
    assert_eq!(private.access_token(), Some("ghp_private"));
    assert_eq!(private.id(), Repository::id_for_url("https://github.com/acme/private"));
    assert_eq!(config.repository("public", &encryptor).unwrap().access_token(), None);

    let err = config.repository("insecure", &encryptor).unwrap_err();
    assert!(format!("{err:#}").contains("https"), "{err:#}");
    assert!(config.repository("unknown", &encryptor).is_err());
    assert!(config.repositories(&encryptor).is_err(), "one bad entry fails the whole set");

    let other_key = TokenEncryptor::from_base64_key(&TokenEncryptor::generate_key()).unwrap();
    assert!(config.repository("private", &other_key).is_err());
}

#[test]
#[serial]
fn test_encryptor_from_env() {
    let key = TokenEncryptor::generate_key();

    env::set_var(KEY_ENV, &key);
    env::remove_var(MODE_ENV);
    let from_env = encryptor_from_env().expect("valid key");
    let reference = TokenEncryptor::from_base64_key(&key).unwrap();
    assert_eq!(
        reference.decrypt(&from_env.encrypt("t").unwrap()).unwrap(),
        "t"
    );

    env::set_var(KEY_ENV, "c2hvcnQ=");
    assert!(encryptor_from_env().is_err(), "short key must be rejected");

    env::remove_var(KEY_ENV);
    let msg = encryptor_from_env().unwrap_err().to_string();
    assert!(msg.contains(KEY_ENV), "{msg}");

    env::set_var(MODE_ENV, "development");
    assert!(encryptor_from_env().is_ok(), "development mode falls back to an ephemeral key");
    env::remove_var(MODE_ENV);
}
