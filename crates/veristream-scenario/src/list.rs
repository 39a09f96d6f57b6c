//! Scenario discovery and listing.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use tracing::debug;
use veristream_core::{structure::parse_structures, Structure, Value};

use crate::error::ScenarioError;
use crate::loader::search;
use crate::scenario::ScenarioDescription;
use crate::types::{ActionTypeFlags, ActionTypeRegistry};

/// One discoverable scenario with its description fields.
#[derive(Debug, Clone)]
pub struct ScenarioListing {
    pub name: String,
    pub path: PathBuf,
    pub description: ScenarioDescription,
    /// True when the description says so or any action type used in the
    /// file needs clock synchronization.
    pub need_clock_sync: bool,
}

impl ScenarioListing {
    /// Key-value rendering in the scenario wire format.
    pub fn to_structure(&self) -> Structure {
        let mut out = Structure::new(self.name.clone());
        out.set(
            "path",
            Value::Str(self.path.display().to_string()),
        );
        if let Some(summary) = &self.description.summary {
            out.set("summary", Value::Str(summary.clone()));
        }
        if self.description.is_config {
            out.set("is-config", Value::Bool(true));
        }
        if self.description.handles_states {
            out.set("handles-states", Value::Bool(true));
        }
        if self.description.seek {
            out.set("seek", Value::Bool(true));
        }
        if self.description.reverse_playback {
            out.set("reverse-playback", Value::Bool(true));
        }
        if let Some(duration) = self.description.duration {
            out.set("duration", Value::Double(duration));
        }
        if let Some(min) = self.description.min_media_duration {
            out.set("min-media-duration", Value::Double(min));
        }
        if self.need_clock_sync {
            out.set("need-clock-sync", Value::Bool(true));
        }
        out
    }
}

/// Discover scenarios in `paths` (or the default search directories) and
/// describe them. Unparsable files are skipped with a debug log, matching
/// the tolerant behavior expected from a listing command.
pub fn list_scenarios(
    registry: &ActionTypeRegistry,
    paths: Option<&[PathBuf]>,
    output: Option<&Path>,
) -> Result<Vec<ScenarioListing>, ScenarioError> {
    let dirs: Vec<PathBuf> = match paths {
        Some(paths) => paths.to_vec(),
        None => search::search_dirs(&[], None),
    };

    let mut listings = Vec::new();
    for dir in dirs {
        let Ok(entries) = std::fs::read_dir(&dir) else {
            continue;
        };
        let mut files: Vec<PathBuf> = entries
            .filter_map(|e| e.ok().map(|e| e.path()))
            .filter(|p| {
                p.extension()
                    .is_some_and(|ext| format!(".{}", ext.to_string_lossy()) == search::SCENARIO_SUFFIX)
            })
            .collect();
        files.sort();
        for path in files {
            match describe_file(registry, &path) {
                Ok(listing) => listings.push(listing),
                Err(error) => debug!(path = %path.display(), %error, "skipping scenario"),
            }
        }
    }

    if let Some(output) = output {
        let mut text = String::new();
        for listing in &listings {
            let _ = writeln!(text, "{};", listing.to_structure());
        }
        std::fs::write(output, text).map_err(|e| ScenarioError::Io {
            path: output.display().to_string(),
            message: e.to_string(),
        })?;
    }

    Ok(listings)
}

fn describe_file(
    registry: &ActionTypeRegistry,
    path: &Path,
) -> Result<ScenarioListing, ScenarioError> {
    let text = std::fs::read_to_string(path).map_err(|e| ScenarioError::Io {
        path: path.display().to_string(),
        message: e.to_string(),
    })?;
    let structures = parse_structures(&text).map_err(|source| ScenarioError::Malformed {
        path: path.display().to_string(),
        source,
    })?;

    let mut description = ScenarioDescription::default();
    let mut need_clock_sync = false;
    for structure in &structures {
        match structure.name() {
            "description" | "meta" => {
                description = ScenarioDescription::from_structure(structure);
            }
            name => {
                if registry
                    .lookup(name)
                    .is_some_and(|t| t.flags.contains(ActionTypeFlags::NEEDS_CLOCK))
                {
                    need_clock_sync = true;
                }
            }
        }
    }
    need_clock_sync |= description.need_clock_sync;

    let name = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    Ok(ScenarioListing {
        name,
        path: path.to_path_buf(),
        description,
        need_clock_sync,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn listing_derives_need_clock_sync_from_action_types() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("seeks.scenario"),
            "description, summary=\"seek test\", seek=true;\nseek, playback-time=1.0, start=0.0;\n",
        )
        .unwrap();
        std::fs::write(
            dir.path().join("plain.scenario"),
            "description, summary=\"plain\";\nwait, duration=1.0;\nstop;\n",
        )
        .unwrap();
        std::fs::write(dir.path().join("notes.txt"), "not a scenario").unwrap();

        let registry = ActionTypeRegistry::with_builtins();
        let listings =
            list_scenarios(&registry, Some(&[dir.path().to_path_buf()]), None).unwrap();
        assert_eq!(listings.len(), 2);

        let plain = listings.iter().find(|l| l.name == "plain").unwrap();
        assert!(!plain.need_clock_sync);
        let seeks = listings.iter().find(|l| l.name == "seeks").unwrap();
        assert!(seeks.need_clock_sync);
        assert!(seeks.description.seek);
    }

    #[test]
    fn listing_writes_the_output_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("one.scenario"),
            "description, summary=\"listed\";\nstop;\n",
        )
        .unwrap();
        let out = dir.path().join("listing.txt");
        let registry = ActionTypeRegistry::with_builtins();
        list_scenarios(&registry, Some(&[dir.path().to_path_buf()]), Some(&out)).unwrap();
        let written = std::fs::read_to_string(&out).unwrap();
        assert!(written.contains("one"));
        assert!(written.contains("summary"));
    }
}
