use std::fs;
use std::path::Path;
use std::process::Command as StdCommand;
use std::sync::{Arc, Mutex};

use assert_cmd::Command;
use docsync_core::crypto::TokenEncryptor;
use docsync_core::Repository;
use predicates::prelude::*;
use tempfile::{tempdir, NamedTempFile};
use tracing_subscriber::prelude::*;
use tracing_subscriber::{layer::Context, Layer, Registry};

const DOCS_URL: &str = "https://github.com/acme/docs";

fn docsync() -> Command {
    let mut cmd = Command::cargo_bin("docsync").expect("Binary exists");
    cmd.env_remove("DOCSYNC_ENCRYPTION_KEY")
        .env_remove("DOCSYNC_ENV")
        .env_remove("DOCSYNC_TOKEN");
    cmd
}

fn git(dir: &Path, args: &[&str]) {
    let status = StdCommand::new("git")
        .args(["-c", "user.name=docsync-test", "-c", "user.email=test@docsync.invalid"])
        .args(["-c", "commit.gpgsign=false"])
        .args(args)
        .current_dir(dir)
        .status()
        .expect("git must be installed to run these tests");
    assert!(status.success(), "git {args:?} failed");
}

/// Config plus an already-populated mirror, so no command needs the network.
fn mirrored_workspace(base: &Path) -> NamedTempFile {
    let mirror = base.join(Repository::id_for_url(DOCS_URL).to_string());
    fs::create_dir_all(mirror.join("docs")).unwrap();
    fs::write(mirror.join("README.md"), "A").unwrap();
    fs::write(mirror.join("docs/guide.md"), "B").unwrap();
    fs::write(mirror.join("notes.txt"), "plain").unwrap();
    git(&mirror, &["init", "-q"]);
    git(&mirror, &["add", "."]);
    git(&mirror, &["commit", "-q", "-m", "init"]);
    fs::write(mirror.join("draft.md"), "untracked").unwrap();

    let config = NamedTempFile::new().expect("Creating temp config file failed");
    fs::write(
        config.path(),
        format!(
            "mirror:\n  base_path: {}\n  strategy: git\nrepositories:\n  - name: docs\n    url: \"{DOCS_URL}\"\n",
            base.display()
        ),
    )
    .expect("Writing temp config failed");
    config
}

#[test]
fn gen_key_prints_a_usable_key() {
    let output = docsync().arg("gen-key").assert().success().get_output().stdout.clone();
    let key = String::from_utf8(output).unwrap();
    assert!(TokenEncryptor::from_base64_key(key.trim()).is_ok(), "{key}");
}

#[test]
fn seal_token_round_trips_under_the_configured_key() {
    let key = TokenEncryptor::generate_key();
    let encryptor = TokenEncryptor::from_base64_key(&key).unwrap();

    let from_env = docsync()
        .arg("seal-token")
        .env("DOCSYNC_ENCRYPTION_KEY", &key)
        .env("DOCSYNC_TOKEN", "ghp_from_env")
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let envelope = String::from_utf8(from_env).unwrap();
    assert!(!envelope.contains("ghp_from_env"));
    assert_eq!(encryptor.decrypt(envelope.trim()).unwrap(), "ghp_from_env");

    let from_stdin = docsync()
        .arg("seal-token")
        .env("DOCSYNC_ENCRYPTION_KEY", &key)
        .write_stdin("ghp_from_stdin\n")
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let envelope = String::from_utf8(from_stdin).unwrap();
    assert_eq!(encryptor.decrypt(envelope.trim()).unwrap(), "ghp_from_stdin");
}

#[test]
fn seal_token_without_key_fails_outside_development() {
    docsync()
        .arg("seal-token")
        .env("DOCSYNC_TOKEN", "ghp_x")
        .assert()
        .failure()
        .stderr(predicate::str::contains("DOCSYNC_ENCRYPTION_KEY"));
}

#[test]
fn sync_with_missing_config_fails() {
    docsync()
        .args(["sync", "--config", "/definitely/not/here.yaml"])
        .env("DOCSYNC_ENV", "development")
        .assert()
        .failure()
        .stderr(predicate::str::contains("Failed to read config file"));
}

#[test]
fn ls_lists_tracked_files_only() {
    let base = tempdir().unwrap();
    let config = mirrored_workspace(base.path());

    docsync()
        .args(["ls", "--repo", "docs", "--config"])
        .arg(config.path())
        .env("DOCSYNC_ENV", "development")
        .assert()
        .success()
        .stdout(
            predicate::str::contains("README.md\n")
                .and(predicate::str::contains("docs/\n"))
                .and(predicate::str::contains("docs/guide.md\n"))
                .and(predicate::str::contains("draft.md").not()),
        );
}

#[test]
fn export_concatenates_selected_markdown() {
    let base = tempdir().unwrap();
    let config = mirrored_workspace(base.path());

    docsync()
        .args(["export", "--repo", "docs", "--file", "README.md", "--file", "docs/guide.md", "--file", "notes.txt", "--config"])
        .arg(config.path())
        .env("DOCSYNC_ENV", "development")
        .assert()
        .success()
        .stdout("A\n\n---\n\nB");

    let out = base.path().join("bundle.md");
    docsync()
        .args(["export", "--repo", "docs", "--file", "docs/guide.md", "--config"])
        .arg(config.path())
        .arg("--output")
        .arg(&out)
        .env("DOCSYNC_ENV", "development")
        .assert()
        .success();
    assert_eq!(fs::read_to_string(out).unwrap(), "B");
}

#[test]
fn export_refuses_untracked_and_escaping_paths() {
    let base = tempdir().unwrap();
    let config = mirrored_workspace(base.path());

    for path in ["draft.md", "../README.md"] {
        docsync()
            .args(["export", "--repo", "docs", "--file", path, "--config"])
            .arg(config.path())
            .env("DOCSYNC_ENV", "development")
            .assert()
            .failure()
            .stdout(predicate::str::is_empty());
    }
}

/// Custom Layer to collect emitted event messages.
struct EventCollector {
    events: Arc<Mutex<Vec<String>>>,
}

impl<S> Layer<S> for EventCollector
where
    S: tracing::Subscriber,
{
    fn on_event(&self, event: &tracing::Event<'_>, _ctx: Context<'_, S>) {
        self.events.lock().unwrap().push(format!("{event:?}"));
    }
}

#[tokio::test]
async fn emits_trace_initialised_event() {
    let events = Arc::new(Mutex::new(Vec::new()));
    let collector = EventCollector {
        events: events.clone(),
    };
    let subscriber = Registry::default().with(collector);
    let _guard = tracing::subscriber::set_default(subscriber);

    use docsync::cli::{run, Cli, Commands};

    let cli = Cli {
        command: Commands::Sync {
            config: std::path::PathBuf::from("dummy.yaml"),
        },
    };

    let _ = run(cli).await;

    let event_msgs = events.lock().unwrap();
    assert!(
        event_msgs.iter().any(|msg| msg.contains("trace_initialised")),
        "Expected a 'trace_initialised' trace event, got: {:?}",
        event_msgs
    );
}
