use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::Context;
use serde::Deserialize;
use show_core::{ProgramConfig, RouterConfig};

pub const DEFAULT_CONFIG_FILE: &str = "lightshow.toml";

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub address: String,
    pub user: String,
    pub password: String,
    pub base_path: String,
    pub guard: bool,
    pub poll_interval_ms: u64,
    pub min_delay_ms: u64,
    pub prompt_timeout_ms: u64,
    pub read_attempts: usize,
    pub ssh_program: String,
    pub use_sshpass: bool,
    /// Run `sh` locally inside this directory instead of logging in.
    pub local_root: Option<PathBuf>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            address: "192.168.1.1".into(),
            user: "root".into(),
            password: String::new(),
            base_path: "/sys/class/leds".into(),
            guard: false,
            poll_interval_ms: 1000,
            min_delay_ms: 250,
            prompt_timeout_ms: 1000,
            read_attempts: 3,
            ssh_program: "ssh".into(),
            use_sshpass: false,
            local_root: None,
        }
    }
}

impl Settings {
    pub fn router_config(&self) -> RouterConfig {
        let prompt_timeout = Duration::from_millis(self.prompt_timeout_ms);
        let read_attempts = self.read_attempts.max(1);
        RouterConfig {
            guard: self.guard,
            poll_interval: Duration::from_millis(self.poll_interval_ms.max(1)),
            prompt_timeout,
            read_attempts,
            write_timeout: RouterConfig::read_budget(prompt_timeout, read_attempts),
        }
    }

    pub fn program_config(&self) -> ProgramConfig {
        ProgramConfig {
            min_delay: Duration::from_millis(self.min_delay_ms),
        }
    }
}

/// Reads `path`, or `lightshow.toml` in the working directory when no path
/// is given, then applies environment overrides. Only an explicitly named
/// file has to exist.
pub fn load_settings(path: Option<&Path>) -> anyhow::Result<Settings> {
    let mut settings = match path {
        Some(path) => {
            let raw = fs::read_to_string(path)
                .with_context(|| format!("reading config file {}", path.display()))?;
            parse_settings(&raw).with_context(|| format!("parsing {}", path.display()))?
        }
        None => match fs::read_to_string(DEFAULT_CONFIG_FILE) {
            Ok(raw) => parse_settings(&raw)
                .with_context(|| format!("parsing {DEFAULT_CONFIG_FILE}"))?,
            Err(_) => Settings::default(),
        },
    };
    apply_env(&mut settings, |key| std::env::var(key).ok());
    Ok(settings)
}

pub fn parse_settings(raw: &str) -> anyhow::Result<Settings> {
    Ok(toml::from_str(raw)?)
}

/// `APP__*` wins over `LIGHTSHOW_*`. Unparseable numbers and flags are
/// ignored.
pub fn apply_env(settings: &mut Settings, lookup: impl Fn(&str) -> Option<String>) {
    let var = |name: &str| {
        lookup(&format!("APP__{name}")).or_else(|| lookup(&format!("LIGHTSHOW_{name}")))
    };

    if let Some(v) = var("ADDRESS") {
        settings.address = v;
    }
    if let Some(v) = var("USER") {
        settings.user = v;
    }
    if let Some(v) = var("PASSWORD") {
        settings.password = v;
    }
    if let Some(v) = var("BASE_PATH") {
        settings.base_path = v;
    }
    if let Some(v) = var("SSH_PROGRAM") {
        settings.ssh_program = v;
    }
    if let Some(v) = var("LOCAL_ROOT") {
        settings.local_root = Some(PathBuf::from(v));
    }

    if let Some(v) = var("GUARD").and_then(|v| parse_flag(&v)) {
        settings.guard = v;
    }
    if let Some(v) = var("USE_SSHPASS").and_then(|v| parse_flag(&v)) {
        settings.use_sshpass = v;
    }

    if let Some(v) = var("POLL_INTERVAL_MS").and_then(|v| v.parse().ok()) {
        settings.poll_interval_ms = v;
    }
    if let Some(v) = var("MIN_DELAY_MS").and_then(|v| v.parse().ok()) {
        settings.min_delay_ms = v;
    }
    if let Some(v) = var("PROMPT_TIMEOUT_MS").and_then(|v| v.parse().ok()) {
        settings.prompt_timeout_ms = v;
    }
    if let Some(v) = var("READ_ATTEMPTS").and_then(|v| v.parse().ok()) {
        settings.read_attempts = v;
    }
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;
