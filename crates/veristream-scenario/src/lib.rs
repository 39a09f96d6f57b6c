//! Scenario engine for media-pipeline validation.
//!
//! A scenario is an ordered script of declarative actions (seek,
//! set-state, wait, switch-track, …) executed against an externally
//! constructed pipeline. The engine schedules each action at the right
//! stream-time moment, observes the pipeline's bus, and reports
//! invariant violations through `veristream_core::report`.
//!
//! Typical embedding:
//!
//! ```no_run
//! use std::sync::Arc;
//! use veristream_core::{CollectingSink, FatalityFlags, Reporter};
//! use veristream_pipeline::testing::ScriptedPipeline;
//! use veristream_pipeline::Pipeline;
//! use veristream_scenario::{loader, EngineSettings, ActionTypeRegistry, ScenarioRunner};
//!
//! let (bus_tx, bus_rx) = crossbeam_channel::unbounded();
//! let pipeline: Arc<dyn Pipeline> = Arc::new(ScriptedPipeline::new(bus_tx));
//! let registry = Arc::new(ActionTypeRegistry::with_builtins());
//! let reporter = Reporter::new("my-run", CollectingSink::new(), FatalityFlags::default());
//! let scenario = loader::load(
//!     "simple-seek",
//!     registry,
//!     reporter,
//!     EngineSettings::from_env(),
//! ).unwrap();
//! let finished = ScenarioRunner::new(scenario, pipeline, bus_rx).run();
//! # let _ = finished;
//! ```

pub mod action;
pub mod config;
pub mod error;
pub mod expr;
pub mod handlers;
pub mod list;
pub mod loader;
pub mod logging;
pub mod scenario;
pub mod types;
pub mod vars;

mod dispatcher;
mod reactor;
mod runner;

pub use action::{Action, ActionReturn, ActionState};
pub use config::EngineSettings;
pub use error::ScenarioError;
pub use list::{list_scenarios, ScenarioListing};
pub use runner::ScenarioRunner;
pub use scenario::{CompletionHandle, Scenario, ScenarioDescription};
pub use types::{ActionParameter, ActionType, ActionTypeFlags, ActionTypeRegistry};
