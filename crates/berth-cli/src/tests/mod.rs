//! In-process tests for the CLI runtime.

#[cfg(unix)]
mod behaviour;
#[cfg(unix)]
mod support;

use std::ffi::OsString;
use std::process::ExitCode;
use std::sync::{Mutex, MutexGuard, PoisonError};

use berth_config::{Config, EngineEndpoint, MapEnv};
use once_cell::sync::Lazy;
use rstest::rstest;

use crate::config::{ConfigLoader, OrthoConfigLoader};
use crate::errors::AppError;
use crate::run_with_loader;

static ENV_MUTEX: Lazy<Mutex<()>> = Lazy::new(|| Mutex::new(()));

const BERTH_VARIABLES: &[&str] = &[
    "BERTH_HOST",
    "BERTH_LOG_FILTER",
    "BERTH_LOG_FORMAT",
    "BERTH_CONNECT_TIMEOUT_MS",
    "BERTH_NO_MACHINE_START",
    "BERTH_MACHINE_START_ATTEMPTS",
    "BERTH_MACHINE_START_BACKOFF_MS",
];

/// Hands out a fixed configuration whatever the arguments.
pub(crate) struct StaticConfigLoader {
    config: Config,
}

impl StaticConfigLoader {
    pub(crate) fn new(config: Config) -> Self {
        Self { config }
    }
}

impl ConfigLoader for StaticConfigLoader {
    fn load(&self, _args: &[OsString]) -> Result<Config, AppError> {
        Ok(self.config.clone())
    }
}

/// Serialises access to the process environment and restores it on drop.
struct ProcessEnvGuard {
    saved: Vec<(&'static str, Option<OsString>)>,
    _guard: MutexGuard<'static, ()>,
}

impl ProcessEnvGuard {
    fn cleared() -> Self {
        let guard = ENV_MUTEX.lock().unwrap_or_else(PoisonError::into_inner);
        let saved = BERTH_VARIABLES
            .iter()
            .map(|key| (*key, std::env::var_os(key)))
            .collect();
        for key in BERTH_VARIABLES {
            // SAFETY: ENV_MUTEX serialises every test touching the environment.
            unsafe { std::env::remove_var(key) };
        }
        Self {
            saved,
            _guard: guard,
        }
    }

    fn set(&self, key: &str, value: &str) {
        // SAFETY: ENV_MUTEX is held for the lifetime of `self`.
        unsafe { std::env::set_var(key, value) };
    }
}

impl Drop for ProcessEnvGuard {
    fn drop(&mut self) {
        for (key, value) in &self.saved {
            // SAFETY: ENV_MUTEX is still held while restoring.
            unsafe {
                match value {
                    Some(value) => std::env::set_var(key, value),
                    None => std::env::remove_var(key),
                }
            }
        }
    }
}

pub(crate) struct Captured {
    pub(crate) code: ExitCode,
    pub(crate) stdout: String,
    pub(crate) stderr: String,
}

pub(crate) fn run_captured<L: ConfigLoader>(args: &[&str], loader: &L, env: &MapEnv) -> Captured {
    let mut stdout = Vec::new();
    let mut stderr = Vec::new();
    let argv = std::iter::once("berth")
        .chain(args.iter().copied())
        .map(OsString::from);
    let code = run_with_loader(argv, loader, env, &mut stdout, &mut stderr);
    Captured {
        code,
        stdout: String::from_utf8_lossy(&stdout).into_owned(),
        stderr: String::from_utf8_lossy(&stderr).into_owned(),
    }
}

fn static_loader(host: &str) -> StaticConfigLoader {
    let host: EngineEndpoint = host.parse().expect("valid host");
    StaticConfigLoader::new(Config {
        no_machine_start: true,
        ..Config::default().with_host(host)
    })
}

#[test]
fn help_goes_to_stdout() {
    let captured = run_captured(
        &["--help"],
        &StaticConfigLoader::new(Config::default()),
        &MapEnv::new(),
    );
    assert_eq!(captured.code, ExitCode::SUCCESS);
    assert!(captured.stdout.contains("pull"), "{}", captured.stdout);
    assert!(captured.stdout.contains("--no-machine-start"), "{}", captured.stdout);
    assert!(captured.stderr.is_empty());
}

#[test]
fn missing_subcommand_is_a_usage_error() {
    let captured = run_captured(&[], &StaticConfigLoader::new(Config::default()), &MapEnv::new());
    assert_ne!(captured.code, ExitCode::SUCCESS);
    assert!(captured.stderr.contains("Usage"), "{}", captured.stderr);
}

#[test]
fn loaded_host_is_the_only_candidate() {
    let captured = run_captured(
        &["candidates"],
        &static_loader("unix:///run/custom.sock"),
        &MapEnv::new(),
    );
    assert_eq!(captured.code, ExitCode::SUCCESS, "{}", captured.stderr);
    let lines: Vec<&str> = captured.stdout.lines().collect();
    assert_eq!(lines, ["0\tunix:///run/custom.sock (override)"]);
}

#[test]
fn process_host_variable_does_not_bypass_the_loader() {
    let env = ProcessEnvGuard::cleared();
    env.set("BERTH_HOST", "tcp://10.0.0.9:2375");
    let captured = run_captured(
        &["candidates"],
        &static_loader("unix:///run/injected.sock"),
        &MapEnv::new(),
    );
    assert_eq!(captured.code, ExitCode::SUCCESS, "{}", captured.stderr);
    assert!(
        captured.stdout.contains("unix:///run/injected.sock"),
        "{}",
        captured.stdout
    );
    assert!(!captured.stdout.contains("10.0.0.9"), "{}", captured.stdout);
}

#[rstest]
#[case::host_flag(&["--host", "unix:///run/custom.sock", "candidates"], None, "unix:///run/custom.sock (override)")]
#[case::host_variable(&["candidates"], Some("tcp://10.0.0.5:2375"), "tcp://10.0.0.5:2375 (override)")]
#[case::flag_over_variable(&["--host", "unix:///run/custom.sock", "candidates"], Some("tcp://10.0.0.5:2375"), "unix:///run/custom.sock (override)")]
fn ortho_loader_layers_flags_over_variables(
    #[case] args: &[&str],
    #[case] variable: Option<&str>,
    #[case] expected: &str,
) {
    let env = ProcessEnvGuard::cleared();
    if let Some(host) = variable {
        env.set("BERTH_HOST", host);
    }
    let captured = run_captured(args, &OrthoConfigLoader, &MapEnv::new());
    assert_eq!(captured.code, ExitCode::SUCCESS, "{}", captured.stderr);
    let lines: Vec<&str> = captured.stdout.lines().collect();
    assert_eq!(lines, [format!("0\t{expected}")]);
}

#[rstest]
#[case::flag(&["--connect-timeout-ms", "soon", "candidates"], None)]
#[case::variable(&["candidates"], Some("soon"))]
fn malformed_timeouts_are_reported(#[case] args: &[&str], #[case] variable: Option<&str>) {
    let env = ProcessEnvGuard::cleared();
    if let Some(value) = variable {
        env.set("BERTH_CONNECT_TIMEOUT_MS", value);
    }
    let captured = run_captured(args, &OrthoConfigLoader, &MapEnv::new());
    assert_eq!(captured.code, ExitCode::FAILURE);
    assert!(
        captured.stderr.contains("failed to load configuration"),
        "{}",
        captured.stderr
    );
}

#[test]
fn unknown_methods_are_rejected_before_connecting() {
    let captured = run_captured(
        &["request", "FETCH", "/_ping"],
        &static_loader("unix:///nonexistent/berth.sock"),
        &MapEnv::new(),
    );
    assert_eq!(captured.code, ExitCode::FAILURE);
    assert!(
        captured.stderr.contains("unknown HTTP method 'FETCH'"),
        "{}",
        captured.stderr
    );
}
