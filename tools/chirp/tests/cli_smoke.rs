use assert_cmd::cargo::cargo_bin_cmd;

fn fixture(path: &str) -> String {
    format!("{}/tests/fixtures/{path}", env!("CARGO_MANIFEST_DIR"))
}

fn stdout_of(out: &assert_cmd::assert::Assert) -> String {
    String::from_utf8(out.get_output().stdout.clone()).expect("utf8")
}

#[test]
fn help_lists_the_modes() {
    let mut cmd = cargo_bin_cmd!("chirp");
    cmd.arg("--help");
    let out = cmd.assert().success();
    let stdout = stdout_of(&out);

    for flag in [
        "--list-updates",
        "--render-feed",
        "--list-cassettes",
        "--inspect-cassette",
        "--ping-hub",
    ] {
        assert!(stdout.contains(flag), "{flag}");
    }
}

#[test]
fn list_cassettes_prints_every_fixture() {
    let temp = tempfile::tempdir().expect("tempdir");
    let mut cmd = cargo_bin_cmd!("chirp");
    cmd.current_dir(temp.path())
        .arg("--list-cassettes")
        .arg("--cassette-dir")
        .arg(fixture("cassettes"));
    let out = cmd.assert().success();

    assert_eq!(
        stdout_of(&out).lines().collect::<Vec<_>>(),
        vec!["publish_short_update", "publish_to_hub", "publish_update"]
    );
}

#[test]
fn inspect_cassette_summarizes_interactions() {
    let temp = tempfile::tempdir().expect("tempdir");
    let mut cmd = cargo_bin_cmd!("chirp");
    cmd.current_dir(temp.path())
        .arg("--inspect-cassette")
        .arg("publish_to_hub")
        .arg("--cassette-dir")
        .arg(fixture("cassettes"));
    let out = cmd.assert().success();
    let stdout = stdout_of(&out);

    assert!(stdout.contains("cassette publish_to_hub (1 interactions)"));
    assert!(stdout.contains("  1 POST http://pubsubhubbub.appspot.com/publish -> 204"));
}

#[test]
fn inspecting_an_unknown_cassette_fails() {
    let temp = tempfile::tempdir().expect("tempdir");
    let mut cmd = cargo_bin_cmd!("chirp");
    cmd.current_dir(temp.path())
        .arg("--inspect-cassette")
        .arg("nope")
        .arg("--cassette-dir")
        .arg(fixture("cassettes"));
    cmd.assert().failure();
}

#[test]
fn list_updates_on_a_fresh_database_reports_one_empty_page() {
    let temp = tempfile::tempdir().expect("tempdir");
    let mut cmd = cargo_bin_cmd!("chirp");
    cmd.current_dir(temp.path())
        .arg("--list-updates")
        .arg("--config")
        .arg(fixture("configs/replay.toml"));
    let out = cmd.assert().success();

    assert!(stdout_of(&out).contains("page=1/1 total=0 previous=false next=false"));
    assert!(temp.path().join(".cache/chirp/chirp.sqlite").is_file());
}

#[test]
fn list_updates_rejects_a_page_past_the_end() {
    let temp = tempfile::tempdir().expect("tempdir");
    let mut cmd = cargo_bin_cmd!("chirp");
    cmd.current_dir(temp.path())
        .arg("--list-updates")
        .arg("--page")
        .arg("2");
    cmd.assert().failure();
}

#[test]
fn clamp_config_serves_the_last_page_instead() {
    let temp = tempfile::tempdir().expect("tempdir");
    let mut cmd = cargo_bin_cmd!("chirp");
    cmd.current_dir(temp.path())
        .arg("--list-updates")
        .arg("--page")
        .arg("9")
        .arg("--config")
        .arg(fixture("configs/clamp.toml"));
    let out = cmd.assert().success();
    assert!(stdout_of(&out).contains("page=1/1"));
}

#[test]
fn missing_config_exits_nonzero() {
    let temp = tempfile::tempdir().expect("tempdir");
    let mut cmd = cargo_bin_cmd!("chirp");
    cmd.current_dir(temp.path())
        .arg("--list-updates")
        .arg("--config")
        .arg(fixture("configs/missing.toml"));
    cmd.assert().failure();
}

#[test]
fn zero_page_size_config_exits_nonzero() {
    let temp = tempfile::tempdir().expect("tempdir");
    let mut cmd = cargo_bin_cmd!("chirp");
    cmd.current_dir(temp.path())
        .arg("--list-updates")
        .arg("--config")
        .arg(fixture("configs/invalid-page-size.toml"));
    cmd.assert().failure();
}

#[test]
fn ping_hub_for_an_unknown_feed_fails_before_sending() {
    let temp = tempfile::tempdir().expect("tempdir");
    let mut cmd = cargo_bin_cmd!("chirp");
    cmd.current_dir(temp.path())
        .arg("--ping-hub")
        .arg("42")
        .arg("--cassette")
        .arg("publish_to_hub")
        .arg("--cassette-dir")
        .arg(fixture("cassettes"));
    cmd.assert().failure();
}

#[test]
fn running_without_a_mode_exits_nonzero() {
    let temp = tempfile::tempdir().expect("tempdir");
    let mut cmd = cargo_bin_cmd!("chirp");
    cmd.current_dir(temp.path());
    cmd.assert().failure();
}
