mod cli;

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::error;
use veristream_core::{CollectingSink, Reporter};
use veristream_scenario::{list_scenarios, loader, logging, ActionTypeRegistry, EngineSettings};

use cli::{Cli, Command};

fn main() -> ExitCode {
    let cli = Cli::parse();
    let settings = EngineSettings::from_env();
    logging::init(&settings);

    match run(cli, settings) {
        Ok(code) => code,
        Err(err) => {
            error!("{err:#}");
            eprintln!("veristream: {err:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli, settings: EngineSettings) -> Result<ExitCode> {
    let registry = Arc::new(ActionTypeRegistry::with_builtins());

    match cli.command {
        Command::List {
            paths,
            output,
            json,
        } => {
            let paths = (!paths.is_empty()).then_some(paths);
            let listings = list_scenarios(&registry, paths.as_deref(), output.as_deref())
                .context("failed to list scenarios")?;
            if json {
                let rendered: Vec<serde_json::Value> = listings
                    .iter()
                    .map(|l| {
                        serde_json::json!({
                            "name": l.name,
                            "path": l.path,
                            "summary": l.description.summary,
                            "is-config": l.description.is_config,
                            "handles-states": l.description.handles_states,
                            "seek": l.description.seek,
                            "reverse-playback": l.description.reverse_playback,
                            "need-clock-sync": l.need_clock_sync,
                        })
                    })
                    .collect();
                println!("{}", serde_json::to_string_pretty(&rendered)?);
            } else {
                for listing in &listings {
                    println!("{};", listing.to_structure());
                }
            }
            Ok(ExitCode::SUCCESS)
        }

        Command::Check { scenarios } => {
            let sink = CollectingSink::new();
            let flags = settings.flags;
            let reporter = Reporter::new("veristream-check", sink.clone(), flags);
            match loader::load(&scenarios, registry, reporter, settings) {
                Ok(scenario) => {
                    if let Some(summary) = &scenario.description().summary {
                        println!("# {summary}");
                    }
                    for line in scenario.describe_pending() {
                        println!("{line}");
                    }
                    Ok(ExitCode::SUCCESS)
                }
                Err(err) => {
                    for report in sink.reports() {
                        eprintln!("{}: {}: {}", report.level, report.issue, report.message);
                    }
                    eprintln!("veristream: {err}");
                    Ok(ExitCode::FAILURE)
                }
            }
        }

        Command::Types { selection } => {
            print!("{}", registry.print_types(selection.as_deref()));
            Ok(ExitCode::SUCCESS)
        }
    }
}
