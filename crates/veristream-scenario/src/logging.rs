//! Logging bootstrap shared by the engine and the CLI.
//!
//! The filter is installed behind a reload handle so the
//! `set-debug-threshold` action can retarget it at runtime.

use std::fs::OpenOptions;
use std::io;
use std::io::Write;
use std::sync::{Arc, Mutex, OnceLock};

use tracing::warn;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::reload;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use crate::config::{EngineSettings, LogTarget};

type FilterHandle = reload::Handle<EnvFilter, tracing_subscriber::Registry>;

static FILTER_HANDLE: OnceLock<FilterHandle> = OnceLock::new();

/// Install the global subscriber per `VERISTREAM_OUTPUT_FILES`. Later
/// calls are no-ops, which keeps embedding and tests safe.
pub fn init(settings: &EngineSettings) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let (filter, handle) = reload::Layer::new(filter);

    let writer = MultiWriter::from_targets(&settings.output_files);
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_ansi(false)
        .with_writer(move || writer.clone());

    if tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .try_init()
        .is_ok()
    {
        let _ = FILTER_HANDLE.set(handle);
    }
}

/// Runtime filter update, the engine side of `set-debug-threshold`.
pub fn set_debug_threshold(threshold: &str) -> bool {
    let Some(handle) = FILTER_HANDLE.get() else {
        warn!("logging was not initialized by veristream, ignoring debug threshold");
        return false;
    };
    match threshold.parse::<EnvFilter>() {
        Ok(filter) => handle.reload(filter).is_ok(),
        Err(error) => {
            warn!(%error, threshold, "invalid debug threshold");
            false
        }
    }
}

/// Fans log writes out to every configured target.
#[derive(Clone)]
struct MultiWriter {
    targets: Arc<Vec<Target>>,
}

enum Target {
    Stdout,
    Stderr,
    File(Mutex<std::fs::File>),
}

impl MultiWriter {
    fn from_targets(targets: &[LogTarget]) -> Self {
        let mut resolved = Vec::new();
        if targets.is_empty() {
            resolved.push(Target::Stderr);
        }
        for target in targets {
            match target {
                LogTarget::Stdout => resolved.push(Target::Stdout),
                LogTarget::Stderr => resolved.push(Target::Stderr),
                LogTarget::File(path) => {
                    match OpenOptions::new().create(true).append(true).open(path) {
                        Ok(file) => resolved.push(Target::File(Mutex::new(file))),
                        Err(error) => {
                            eprintln!(
                                "veristream: cannot open log file {}: {error}",
                                path.display()
                            );
                        }
                    }
                }
            }
        }
        Self {
            targets: Arc::new(resolved),
        }
    }
}

impl Write for MultiWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        for target in self.targets.iter() {
            match target {
                Target::Stdout => io::stdout().write_all(buf)?,
                Target::Stderr => io::stderr().write_all(buf)?,
                Target::File(file) => match file.lock() {
                    Ok(mut file) => file.write_all(buf)?,
                    Err(_) => return Err(io::Error::other("log file lock poisoned")),
                },
            }
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        for target in self.targets.iter() {
            if let Target::File(file) = target {
                if let Ok(mut file) = file.lock() {
                    file.flush()?;
                }
            }
        }
        Ok(())
    }
}
