use super::*;

use std::{
    collections::HashMap,
    env,
    time::{SystemTime, UNIX_EPOCH},
};

fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
    let vars: HashMap<String, String> = pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    move |key: &str| vars.get(key).cloned()
}

#[test]
fn partial_file_keeps_other_defaults() {
    let settings = parse_settings(
        r#"
address = "10.0.0.7"
guard = true
min_delay_ms = 100
"#,
    )
    .expect("parse");

    assert_eq!(settings.address, "10.0.0.7");
    assert!(settings.guard);
    assert_eq!(settings.min_delay_ms, 100);
    assert_eq!(settings.user, "root");
    assert_eq!(settings.base_path, "/sys/class/leds");
    assert_eq!(settings.local_root, None);
}

#[test]
fn wrong_types_are_rejected() {
    assert!(parse_settings("read_attempts = \"many\"").is_err());
}

#[test]
fn app_prefixed_env_wins_over_lightshow_prefix() {
    let mut settings = Settings::default();
    apply_env(
        &mut settings,
        lookup_from(&[
            ("LIGHTSHOW_ADDRESS", "router.lan"),
            ("APP__ADDRESS", "10.1.1.1"),
            ("LIGHTSHOW_USER", "admin"),
            ("LIGHTSHOW_GUARD", "yes"),
            ("APP__POLL_INTERVAL_MS", "250"),
        ]),
    );

    assert_eq!(settings.address, "10.1.1.1");
    assert_eq!(settings.user, "admin");
    assert!(settings.guard);
    assert_eq!(settings.poll_interval_ms, 250);
}

#[test]
fn unparseable_env_values_are_ignored() {
    let mut settings = Settings::default();
    apply_env(
        &mut settings,
        lookup_from(&[
            ("LIGHTSHOW_GUARD", "maybe"),
            ("LIGHTSHOW_READ_ATTEMPTS", "-2"),
        ]),
    );
    assert_eq!(settings, Settings::default());
}

#[test]
fn converts_into_runtime_configs() {
    let settings = Settings {
        guard: true,
        poll_interval_ms: 0,
        min_delay_ms: 400,
        prompt_timeout_ms: 1500,
        read_attempts: 0,
        ..Settings::default()
    };

    let router = settings.router_config();
    assert!(router.guard);
    assert_eq!(router.poll_interval, Duration::from_millis(1));
    assert_eq!(router.prompt_timeout, Duration::from_millis(1500));
    assert_eq!(router.read_attempts, 1);
    assert_eq!(router.write_timeout, Duration::from_millis(1500));

    assert_eq!(
        settings.program_config().min_delay,
        Duration::from_millis(400)
    );
}

#[test]
fn explicit_config_file_must_exist() {
    let suffix = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("clock")
        .as_nanos();
    let missing = env::temp_dir().join(format!("lightshow_missing_{suffix}.toml"));
    assert!(load_settings(Some(&missing)).is_err());
}

#[test]
fn explicit_config_file_is_read() {
    let suffix = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("clock")
        .as_nanos();
    let path = env::temp_dir().join(format!("lightshow_config_{suffix}.toml"));
    fs::write(&path, "base_path = \"/tmp/leds\"\nread_attempts = 5\n").expect("write config");

    let settings = load_settings(Some(&path)).expect("load");
    fs::remove_file(&path).expect("cleanup");

    assert_eq!(settings.read_attempts, 5);
}
