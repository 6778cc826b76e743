//! Behaviour-driven tests for the operator commands against a fake engine.

use std::fs;
use std::process::ExitCode;

use base64::Engine;
use base64::engine::general_purpose::{STANDARD, URL_SAFE};
use berth_config::{Config, EngineEndpoint, MapEnv};
use rstest::fixture;
use rstest_bdd_macros::{given, scenario, then, when};
use serde_json::{Value, json};
use tempfile::TempDir;

use super::support::{FakeEngine, chunked_response, json_response, multiplexed_response};
use super::{Captured, StaticConfigLoader, run_captured};

struct TestWorld {
    dir: TempDir,
    env: MapEnv,
    engine: Option<FakeEngine>,
    head: Option<String>,
    result: Option<Captured>,
}

impl Default for TestWorld {
    fn default() -> Self {
        let dir = tempfile::tempdir().expect("temp dir");
        let home = dir.path().join("home");
        fs::create_dir(&home).expect("home dir");
        let env = MapEnv::new().with("HOME", home.to_string_lossy());
        Self {
            dir,
            env,
            engine: None,
            head: None,
            result: None,
        }
    }
}

impl TestWorld {
    fn serve(&mut self, response: Vec<u8>) {
        let socket = self.dir.path().join("engine.sock");
        self.engine = Some(FakeEngine::spawn(socket, response).expect("spawn fake engine"));
    }

    fn address(&self) -> String {
        self.engine.as_ref().map_or_else(
            || format!("unix://{}", self.dir.path().join("absent.sock").display()),
            FakeEngine::address,
        )
    }

    fn captured(&self) -> &Captured {
        self.result.as_ref().expect("command has run")
    }

    fn request_head(&mut self) -> &str {
        if self.head.is_none() {
            let head = self
                .engine
                .as_mut()
                .expect("engine running")
                .request_head()
                .expect("request head");
            self.head = Some(head);
        }
        self.head.as_deref().unwrap_or_default()
    }
}

#[fixture]
fn world() -> TestWorld {
    TestWorld::default()
}

#[given("an engine answering ping")]
fn given_ping(world: &mut TestWorld) {
    world.serve(b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nOK".to_vec());
}

#[given("an engine streaming {count} identical updates for layer {layer}")]
fn given_pull_stream(world: &mut TestWorld, count: usize, layer: String) {
    let update = json!({
        "status": "Downloading",
        "id": layer.trim_matches('"'),
        "progressDetail": {"current": 1, "total": 2},
    })
    .to_string();
    let mut events = vec![update; count];
    events.push(json!({"status": "Digest: sha256:feed"}).to_string());
    world.serve(chunked_response(&events));
}

#[given("an engine rejecting pushes with {message}")]
fn given_push_failure(world: &mut TestWorld, message: String) {
    let message = message.trim_matches('"');
    let events = [
        json!({"status": "The push refers to repository [docker.io/library/app]"}).to_string(),
        json!({"errorDetail": {"message": message}, "error": message}).to_string(),
    ];
    world.serve(chunked_response(&events));
}

#[given("an engine answering 404 with {message}")]
fn given_not_found(world: &mut TestWorld, message: String) {
    let body = json!({"message": message.trim_matches('"')}).to_string();
    world.serve(json_response("404 Not Found", &body));
}

#[given("an engine sending multiplexed container output")]
fn given_logs(world: &mut TestWorld) {
    world.serve(multiplexed_response(&[
        (1, "listening on :8080\n"),
        (2, "deprecated flag\n"),
        (1, "ready\n"),
    ]));
}

#[given("stored credentials for {registry} as user {user}")]
fn given_credentials(world: &mut TestWorld, registry: String, user: String) {
    let registry = registry.trim_matches('"');
    let auth = STANDARD.encode(format!("{}:s3cret", user.trim_matches('"')));
    let document = json!({"auths": {registry: {"auth": auth}}}).to_string();
    let config_dir = world.dir.path().join("docker");
    fs::create_dir(&config_dir).expect("docker config dir");
    fs::write(config_dir.join("config.json"), document).expect("write docker config");
    world.env.set("DOCKER_CONFIG", config_dir.to_string_lossy());
}

#[given("no engine is listening")]
fn given_no_engine(world: &mut TestWorld) {
    world.engine = None;
}

#[when("the operator runs {command}")]
fn when_runs(world: &mut TestWorld, command: String) {
    let host: EngineEndpoint = world.address().parse().expect("engine address");
    let loader = StaticConfigLoader::new(Config {
        no_machine_start: true,
        ..Config::default().with_host(host)
    });
    let args: Vec<&str> = command.trim_matches('"').split_whitespace().collect();
    world.result = Some(run_captured(&args, &loader, &world.env));
}

#[then("the command succeeds")]
fn then_succeeds(world: &mut TestWorld) {
    let captured = world.captured();
    assert_eq!(captured.code, ExitCode::SUCCESS, "{}", captured.stderr);
}

#[then("the command fails")]
fn then_fails(world: &mut TestWorld) {
    assert_eq!(world.captured().code, ExitCode::FAILURE);
}

#[then("stdout has {count} lines")]
fn then_line_count(world: &mut TestWorld, count: usize) {
    let stdout = &world.captured().stdout;
    assert_eq!(stdout.lines().count(), count, "{stdout}");
}

#[then("stdout contains {text}")]
fn then_stdout_contains(world: &mut TestWorld, text: String) {
    let stdout = &world.captured().stdout;
    assert!(stdout.contains(text.trim_matches('"')), "{stdout}");
}

#[then("stderr contains {text}")]
fn then_stderr_contains(world: &mut TestWorld, text: String) {
    let stderr = &world.captured().stderr;
    assert!(stderr.contains(text.trim_matches('"')), "{stderr}");
}

#[then("the engine saw a request starting with {line}")]
fn then_request_line(world: &mut TestWorld, line: String) {
    let head = world.request_head();
    assert!(head.starts_with(line.trim_matches('"')), "{head}");
}

#[then("the engine saw registry credentials for user {user} on {registry}")]
fn then_registry_credentials(world: &mut TestWorld, user: String, registry: String) {
    let head = world.request_head().to_owned();
    let encoded = head
        .lines()
        .find_map(|line| line.strip_prefix("X-Registry-Auth: "))
        .expect("auth header sent")
        .trim();
    let decoded: Value =
        serde_json::from_slice(&URL_SAFE.decode(encoded).expect("base64url header"))
            .expect("auth document");
    assert_eq!(decoded["username"], user.trim_matches('"'));
    assert_eq!(decoded["password"], "s3cret");
    assert_eq!(decoded["serveraddress"], registry.trim_matches('"'));
}

#[scenario(path = "tests/features/operator_commands.feature", index = 0)]
fn ping_succeeds(world: TestWorld) {
    let _ = world;
}

#[scenario(path = "tests/features/operator_commands.feature", index = 1)]
fn pull_output_is_deduplicated(world: TestWorld) {
    let _ = world;
}

#[scenario(path = "tests/features/operator_commands.feature", index = 2)]
fn push_failure_exits_non_zero(world: TestWorld) {
    let _ = world;
}

#[scenario(path = "tests/features/operator_commands.feature", index = 3)]
fn raw_request_prints_status(world: TestWorld) {
    let _ = world;
}

#[scenario(path = "tests/features/operator_commands.feature", index = 4)]
fn logs_are_split_by_stream(world: TestWorld) {
    let _ = world;
}

#[scenario(path = "tests/features/operator_commands.feature", index = 5)]
fn unreachable_engine_is_reported(world: TestWorld) {
    let _ = world;
}

#[scenario(path = "tests/features/operator_commands.feature", index = 6)]
fn push_sends_stored_credentials(world: TestWorld) {
    let _ = world;
}

#[scenario(path = "tests/features/operator_commands.feature", index = 7)]
fn pull_by_digest_keeps_the_digest(world: TestWorld) {
    let _ = world;
}
