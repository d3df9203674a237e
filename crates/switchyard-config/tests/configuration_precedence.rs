//! Layering behaviour of [`Config::load_from_iter`].

use std::ffi::{OsStr, OsString};
use std::fs;
use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard};

use once_cell::sync::Lazy;
use ortho_config::OrthoConfig;
use rstest::{fixture, rstest};
use tempfile::TempDir;

use switchyard_config::{Config, DEFAULT_HANDOFF_ENV_VAR, LogFormat, default_log_filter};

static ENV_MUTEX: Lazy<Mutex<()>> = Lazy::new(|| Mutex::new(()));

struct EnvOverride {
    key: &'static str,
    previous: Option<OsString>,
}

impl EnvOverride {
    fn set_var(key: &'static str, value: impl AsRef<OsStr>) -> Self {
        let previous = std::env::var_os(key);
        // Environment mutation is unsafe in edition 2024; callers hold
        // ENV_MUTEX for the lifetime of the override.
        unsafe { std::env::set_var(key, value) };
        Self { key, previous }
    }
}

impl Drop for EnvOverride {
    fn drop(&mut self) {
        match self.previous.take() {
            Some(value) => unsafe { std::env::set_var(self.key, value) },
            None => unsafe { std::env::remove_var(self.key) },
        }
    }
}

struct Harness {
    temp_dir: TempDir,
    _lock: MutexGuard<'static, ()>,
}

impl Harness {
    fn write_config(&self, contents: &str) -> PathBuf {
        let path = self.temp_dir.path().join("switchyard.toml");
        fs::write(&path, contents).expect("write configuration");
        path
    }
}

#[fixture]
fn harness() -> Harness {
    let lock = ENV_MUTEX
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner);
    Harness {
        temp_dir: TempDir::new().expect("create temp dir"),
        _lock: lock,
    }
}

fn args(extra: &[&OsStr]) -> Vec<OsString> {
    let mut args = vec![OsString::from("switchyardd")];
    args.extend(extra.iter().map(|arg| arg.to_os_string()));
    args
}

#[rstest]
fn defaults_apply_without_overrides(#[from(harness)] _guard: Harness) {
    let config = Config::load_from_iter(args(&[])).expect("defaults load");

    assert_eq!(config.log_filter(), default_log_filter());
    assert_eq!(config.log_format(), LogFormat::Json);
    assert_eq!(config.handoff_env_var(), DEFAULT_HANDOFF_ENV_VAR);
    assert_eq!(config.listeners().len(), 1);
}

#[rstest]
fn file_values_are_loaded(harness: Harness) {
    let path = harness.write_config(
        "log_filter = \"warn\"\n\
         log_format = \"compact\"\n\
         drain_timeout_ms = 250\n\
         listeners = [\"edge=tcp://127.0.0.1:7100\", \"web=http://127.0.0.1:7180\"]\n\
         upstreams = [\"users=10.0.0.1:7070*3\"]\n",
    );
    let config = Config::load_from_iter(args(&[
        OsStr::new("--config-path"),
        path.as_os_str(),
    ]))
    .expect("file config loads");

    assert_eq!(config.log_filter(), "warn");
    assert_eq!(config.log_format(), LogFormat::Compact);
    assert_eq!(config.drain_timeout_ms, 250);
    assert_eq!(config.listeners().len(), 2);
    assert_eq!(
        config.upstream_groups().get("users"),
        Some(&vec![("10.0.0.1:7070".to_owned(), 3)])
    );
}

#[rstest]
fn environment_overrides_the_file(harness: Harness) {
    let path = harness.write_config("log_filter = \"warn\"\n");
    let _env = EnvOverride::set_var("SWITCHYARD_LOG_FILTER", "debug");

    let config = Config::load_from_iter(args(&[
        OsStr::new("--config-path"),
        path.as_os_str(),
    ]))
    .expect("layered config loads");

    assert_eq!(config.log_filter(), "debug");
}

#[rstest]
fn command_line_overrides_the_environment(#[from(harness)] _guard: Harness) {
    let _env = EnvOverride::set_var("SWITCHYARD_LOG_FILTER", "debug");

    let config = Config::load_from_iter(args(&[
        OsStr::new("--log-filter"),
        OsStr::new("trace"),
    ]))
    .expect("layered config loads");

    assert_eq!(config.log_filter(), "trace");
}

#[rstest]
fn malformed_directives_fail_loading(harness: Harness) {
    let path = harness.write_config("listeners = [\"no-scheme\"]\n");

    let result = Config::load_from_iter(args(&[
        OsStr::new("--config-path"),
        path.as_os_str(),
    ]));

    assert!(result.is_err(), "malformed listener should be rejected");
}
