use assert_cmd::cargo::cargo_bin_cmd;
use assert_cmd::Command;
use mockito::{Matcher, ServerGuard};
use predicates::prelude::*;

/// Command pointed at `server` with a clean config dir and no token in the env.
fn testmachine(server: &ServerGuard, config_dir: &tempfile::TempDir) -> Command {
    let mut cmd = cargo_bin_cmd!("testmachine");
    cmd.env("TM_API_URL", server.url())
        .env("XDG_CONFIG_HOME", config_dir.path())
        .env_remove("TM_TOKEN_KEY")
        .env_remove("RUST_LOG");
    cmd
}

#[test]
fn help_flag_works() {
    cargo_bin_cmd!("testmachine")
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("testmachine"));
}

#[test]
fn missing_token_shows_error() {
    let mut server = mockito::Server::new();
    let guard = server.mock("GET", Matcher::Any).expect(0).create();
    let dir = tempfile::tempdir().unwrap();

    testmachine(&server, &dir)
        .args(["repo", "list"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("ERROR"))
        .stderr(predicate::str::contains("No token provided"));
    guard.assert();
}

#[test]
fn invalid_action_makes_no_requests() {
    let mut server = mockito::Server::new();
    let get = server.mock("GET", Matcher::Any).expect(0).create();
    let post = server.mock("POST", Matcher::Any).expect(0).create();
    let dir = tempfile::tempdir().unwrap();

    testmachine(&server, &dir)
        .args(["--token", "tok", "snapshot", "delete"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains(
            "Invalid action: [delete] must be in [list, create, analyze, create-analyze].",
        ));
    get.assert();
    post.assert();
}

#[test]
fn unusable_timeout_exits_with_failure() {
    let mut server = mockito::Server::new();
    let guard = server.mock("GET", Matcher::Any).expect(0).create();
    let dir = tempfile::tempdir().unwrap();

    for timeout in ["--timeout=-1", "--timeout=NaN", "--timeout=inf"] {
        testmachine(&server, &dir)
            .args(["-t", "tok", timeout, "tools", "list"])
            .assert()
            .code(1)
            .stderr(predicate::str::contains("--timeout must be a finite number"))
            .stderr(predicate::str::contains("panicked").not());
    }
    guard.assert();
}

#[test]
fn repo_create_prints_table() {
    let mut server = mockito::Server::new();
    let mock = server
        .mock("POST", "/repositories")
        .match_header("Authorization", "Bearer tok")
        .match_body(Matcher::Json(serde_json::json!({"name": "Foo"})))
        .with_body(r#"{"id":7,"name":"Foo"}"#)
        .create();
    let dir = tempfile::tempdir().unwrap();

    testmachine(&server, &dir)
        .args(["--token", "tok", "repo", "create", "--name", "Foo"])
        .assert()
        .code(0)
        .stdout(predicate::str::contains("Created repository:"))
        .stdout(predicate::str::contains("ID  Name"))
        .stdout(predicate::str::contains("7   Foo"));
    mock.assert();
}

#[test]
fn env_token_takes_precedence_over_flag() {
    let mut server = mockito::Server::new();
    let mock = server
        .mock("GET", "/analyses/tools")
        .match_header("Authorization", "Bearer ENV_TOKEN")
        .with_body(r#"{"tools":["static"]}"#)
        .create();
    let dir = tempfile::tempdir().unwrap();

    testmachine(&server, &dir)
        .env("TM_TOKEN_KEY", "ENV_TOKEN")
        .args(["--token", "flag_token", "tools", "list"])
        .assert()
        .success()
        .stdout(predicate::str::contains("static"));
    mock.assert();
}

#[test]
fn token_file_contents_are_used() {
    let mut server = mockito::Server::new();
    let mock = server
        .mock("GET", "/repositories")
        .match_header("Authorization", "Bearer file_token")
        .with_body(r#"{"repositories":[]}"#)
        .create();
    let dir = tempfile::tempdir().unwrap();
    let token_path = dir.path().join("token");
    std::fs::write(&token_path, "file_token\n").unwrap();

    testmachine(&server, &dir)
        .arg("--token")
        .arg(&token_path)
        .args(["repo", "list"])
        .assert()
        .success();
    mock.assert();
}

#[test]
fn repo_list_json_round_trips() {
    let mut server = mockito::Server::new();
    let body = r#"{"repositories":[{"id":1,"name":"a","createdAt":"2024-01-01","_count":{"snapshots":2,"analyses":3}},{"id":2,"name":"b"}]}"#;
    server.mock("GET", "/repositories").with_body(body).create();
    let dir = tempfile::tempdir().unwrap();

    let output = testmachine(&server, &dir)
        .args(["-o", "json", "-t", "tok", "repo", "list"])
        .output()
        .unwrap();
    assert!(output.status.success());
    let stdout = String::from_utf8(output.stdout).unwrap();
    assert_eq!(stdout.trim().lines().count(), 1);
    let parsed: serde_json::Value = serde_json::from_str(stdout.trim()).unwrap();
    let expected: serde_json::Value = serde_json::from_str(body).unwrap();
    assert_eq!(parsed, expected["repositories"]);
}

#[test]
fn report_error_message_exits_with_failure() {
    let mut server = mockito::Server::new();
    server
        .mock("GET", "/analyses/9/report")
        .with_body(r#"{"errorMessage":"report not ready"}"#)
        .create();
    let dir = tempfile::tempdir().unwrap();

    testmachine(&server, &dir)
        .args(["-t", "tok", "analyses", "report", "--analysis-id", "9"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("ERROR"))
        .stderr(predicate::str::contains("report not ready"))
        .stdout(predicate::str::contains("Download URL").not());
}

#[test]
fn http_error_prints_status_and_body() {
    let mut server = mockito::Server::new();
    server
        .mock("GET", "/repositories/4/snapshots")
        .with_status(403)
        .with_body(r#"{"message":"forbidden"}"#)
        .create();
    let dir = tempfile::tempdir().unwrap();

    testmachine(&server, &dir)
        .args(["-t", "tok", "snapshot", "list", "--repo-id", "4"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("Response status code: 403"))
        .stderr(predicate::str::contains(r#"Error: {"message":"forbidden"}"#));
}

#[test]
fn snapshot_create_missing_file_fails_before_upload() {
    let mut server = mockito::Server::new();
    let post = server.mock("POST", Matcher::Any).expect(0).create();
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("Missing.sol");

    testmachine(&server, &dir)
        .args(["-t", "tok", "snapshot", "create", "--repo-id", "1", "--file"])
        .arg(&missing)
        .assert()
        .code(1)
        .stderr(predicate::str::contains("File does not exist"));
    post.assert();
}

#[test]
fn config_set_then_show() {
    let dir = tempfile::tempdir().unwrap();

    cargo_bin_cmd!("testmachine")
        .env("XDG_CONFIG_HOME", dir.path())
        .args(["config", "set", "--default-tools", "static,symbolic"])
        .assert()
        .success();

    assert!(dir.path().join("testmachine").join("config.json").exists());

    cargo_bin_cmd!("testmachine")
        .env("XDG_CONFIG_HOME", dir.path())
        .args(["config", "show"])
        .assert()
        .success()
        .stdout(predicate::str::contains("default_tools: static,symbolic"));
}
