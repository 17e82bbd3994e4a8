// tests/config_env.rs
//
// Config resolution: explicit path via env, "ENV" secrets, sanitizing.
// Serialized because the tests mutate process environment.

use std::fs;
use std::path::PathBuf;

use serial_test::serial;
use tempfile::tempdir;

use video_autopilot::config::ENV_CONFIG_PATH;
use video_autopilot::AppConfig;

#[test]
#[serial]
fn explicit_path_is_used_and_sanitized() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("autopilot.toml");
    fs::write(
        &path,
        r#"
[dispatch]
token_dir = "/srv/tokens"
min_uploads_per_identity = 12
max_uploads_per_identity = 4
publish_hour = 99

[youtube]
api_key = "ENV"

[notify]
discord_webhook = ""
"#,
    )
    .unwrap();

    std::env::set_var(ENV_CONFIG_PATH, &path);
    std::env::set_var("YOUTUBE_API_KEY", "yt-test-key");
    let cfg = AppConfig::load();
    std::env::remove_var(ENV_CONFIG_PATH);
    std::env::remove_var("YOUTUBE_API_KEY");

    let cfg = cfg.unwrap();
    assert_eq!(cfg.dispatch.token_dir, PathBuf::from("/srv/tokens"));
    assert_eq!(cfg.dispatch.min_uploads_per_identity, 4);
    assert_eq!(cfg.dispatch.max_uploads_per_identity, 12);
    assert_eq!(cfg.dispatch.publish_hour, 18);
    assert_eq!(cfg.youtube.key().as_deref(), Some("yt-test-key"));
}

#[test]
#[serial]
fn unreadable_explicit_path_is_an_error() {
    let dir = tempdir().unwrap();
    std::env::set_var(ENV_CONFIG_PATH, dir.path().join("nope.toml"));
    let res = AppConfig::load();
    std::env::remove_var(ENV_CONFIG_PATH);
    assert!(res.is_err());
}

#[test]
#[serial]
fn invalid_toml_is_an_error() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("bad.toml");
    fs::write(&path, "[dispatch\nport = ").unwrap();
    std::env::set_var(ENV_CONFIG_PATH, &path);
    let res = AppConfig::load();
    std::env::remove_var(ENV_CONFIG_PATH);
    assert!(res.is_err());
}

#[test]
#[serial]
fn example_config_parses() {
    let cfg = AppConfig::from_toml_str(include_str!("../config/autopilot.example.toml")).unwrap();
    assert_eq!(cfg.tts.scripture_rate, "-40%");
    assert_eq!(cfg.media.segment_secs, 5.0);
    assert_eq!(cfg.api.port, 8080);
    assert!(cfg.events.is_active());
    assert_eq!(cfg.events.feeds.len(), 3);
    assert_eq!(cfg.events.per_feed, 5);
}

#[test]
#[serial]
fn missing_youtube_key_means_no_key() {
    std::env::remove_var("YOUTUBE_API_KEY");
    let cfg = AppConfig::from_toml_str("[youtube]\napi_key = \"ENV\"\n").unwrap();
    assert_eq!(cfg.youtube.key(), None);
}
