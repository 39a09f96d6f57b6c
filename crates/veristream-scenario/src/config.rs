//! Process-wide configuration: environment knobs and the config
//! structure list embedders or wrapper tools inject.

use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::warn;
use veristream_core::{structure::parse_structures, FatalityFlags, Structure};

/// Environment variable names.
pub const ENV_SCENARIOS_PATH: &str = "VERISTREAM_SCENARIOS_PATH";
pub const ENV_WAIT_MULTIPLIER: &str = "VERISTREAM_SCENARIO_WAIT_MULTIPLIER";
pub const ENV_DUMP_DOT_DIR: &str = "VERISTREAM_DUMP_DOT_DIR";
pub const ENV_FLAGS: &str = "VERISTREAM_FLAGS";
pub const ENV_OUTPUT_FILES: &str = "VERISTREAM_OUTPUT_FILES";
pub const ENV_CONFIG: &str = "VERISTREAM_CONFIG";
pub const ENV_UUID: &str = "VERISTREAM_UUID";
pub const ENV_SERVER: &str = "VERISTREAM_SERVER";

/// Where log output goes, from `VERISTREAM_OUTPUT_FILES`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogTarget {
    Stdout,
    Stderr,
    File(PathBuf),
}

/// Report streaming endpoint; the wire serializer itself lives with the
/// embedding reporter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportEndpoint {
    pub uuid: String,
    pub server: String,
}

#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub scenarios_paths: Vec<PathBuf>,
    /// Scales every `wait duration`; 0 disables waits entirely.
    pub wait_multiplier: f64,
    pub dump_dot_dir: Option<PathBuf>,
    pub flags: FatalityFlags,
    pub output_files: Vec<LogTarget>,
    pub report_endpoint: Option<ReportEndpoint>,
    /// Dispatch tick; zero means "dispatch when idle".
    pub action_execution_interval: Duration,
    pub max_latency: Option<Duration>,
    pub max_dropped: Option<u64>,
    /// Config-injected actions (`action=<type>` entries), executed at
    /// load time.
    pub config_actions: Vec<Structure>,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            scenarios_paths: Vec::new(),
            wait_multiplier: 1.0,
            dump_dot_dir: None,
            flags: FatalityFlags::default(),
            output_files: Vec::new(),
            report_endpoint: None,
            action_execution_interval: Duration::from_millis(10),
            max_latency: None,
            max_dropped: None,
            config_actions: Vec::new(),
        }
    }
}

impl EngineSettings {
    pub fn from_env() -> Self {
        let mut settings = Self::default();

        if let Ok(paths) = env::var(ENV_SCENARIOS_PATH) {
            settings.scenarios_paths = env::split_paths(&paths).collect();
        }
        if let Ok(multiplier) = env::var(ENV_WAIT_MULTIPLIER) {
            match multiplier.parse::<f64>() {
                Ok(value) if value >= 0.0 => settings.wait_multiplier = value,
                _ => warn!(value = %multiplier, "ignoring bad wait multiplier"),
            }
        }
        if let Ok(dir) = env::var(ENV_DUMP_DOT_DIR) {
            settings.dump_dot_dir = Some(PathBuf::from(dir));
        }
        if let Ok(flags) = env::var(ENV_FLAGS) {
            settings.flags = FatalityFlags::parse(&flags);
        }
        if let Ok(outputs) = env::var(ENV_OUTPUT_FILES) {
            settings.output_files = env::split_paths(&outputs)
                .map(|p| match p.to_str() {
                    Some("stdout") => LogTarget::Stdout,
                    Some("stderr") => LogTarget::Stderr,
                    _ => LogTarget::File(p),
                })
                .collect();
        }
        if let (Ok(uuid), Ok(server)) = (env::var(ENV_UUID), env::var(ENV_SERVER)) {
            settings.report_endpoint = Some(ReportEndpoint { uuid, server });
        }
        if let Ok(config) = env::var(ENV_CONFIG) {
            settings.apply_config_text_or_paths(&config);
        }

        settings
    }

    /// `VERISTREAM_CONFIG` holds either inline structure text or a path
    /// list of config files.
    fn apply_config_text_or_paths(&mut self, value: &str) {
        if value.contains(',') || value.contains(';') {
            match parse_structures(value) {
                Ok(entries) => self.apply_config_entries(&entries),
                Err(error) => warn!(%error, "ignoring malformed inline config"),
            }
            return;
        }
        for path in env::split_paths(value) {
            self.apply_config_file(&path);
        }
    }

    pub fn apply_config_file(&mut self, path: &Path) {
        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(error) => {
                warn!(path = %path.display(), %error, "cannot read config file");
                return;
            }
        };
        match parse_structures(&text) {
            Ok(entries) => self.apply_config_entries(&entries),
            Err(error) => {
                warn!(path = %path.display(), %error, "ignoring malformed config file")
            }
        }
    }

    /// Fold a list of config structures into the settings. Entries with
    /// an `action=` field are queued for load-time execution; the
    /// remaining recognized keys override engine defaults.
    pub fn apply_config_entries(&mut self, entries: &[Structure]) {
        for entry in entries {
            if entry.has_field("action") {
                self.config_actions.push(entry.clone());
                continue;
            }
            if let Some(interval) = entry.get_int("scenario-action-execution-interval") {
                if interval >= 0 {
                    self.action_execution_interval = Duration::from_millis(interval as u64);
                }
            }
            if let Some(max_latency) = entry.get_double("max-latency") {
                self.max_latency = veristream_core::time::secs_to_duration(max_latency);
            }
            if let Some(max_dropped) = entry.get_int("max-dropped") {
                if max_dropped >= 0 {
                    self.max_dropped = Some(max_dropped as u64);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_entries_override_engine_knobs() {
        let entries = parse_structures(
            "core, scenario-action-execution-interval=50;\n\
             core, max-latency=2.0, max-dropped=7;\n\
             core, action=set-vars, base=1.0;",
        )
        .unwrap();
        let mut settings = EngineSettings::default();
        settings.apply_config_entries(&entries);
        assert_eq!(
            settings.action_execution_interval,
            Duration::from_millis(50)
        );
        assert_eq!(settings.max_latency, Some(Duration::from_secs(2)));
        assert_eq!(settings.max_dropped, Some(7));
        assert_eq!(settings.config_actions.len(), 1);
        assert_eq!(
            settings.config_actions[0].get_str("action"),
            Some("set-vars")
        );
    }
}
