//! The main loop hosting the dispatcher and the bus reactor.
//!
//! Single-threaded and cooperative: all action state mutations happen
//! here. Pipeline callbacks running on other threads communicate
//! exclusively by sending [`EngineTask`]s on the completion channel.

use std::cmp::Reverse;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam_channel::{select_biased, Receiver};
use tracing::{debug, info, warn};
use veristream_core::IssueId;
use veristream_pipeline::{BusMessage, Pipeline, PipelineState, StateChangeOutcome};

use crate::dispatcher;
use crate::reactor;
use crate::scenario::{DeadlineKind, EngineTask, Scenario};

/// Runs one loaded scenario against one pipeline until it completes,
/// aborts or hits the optional wall-clock budget.
pub struct ScenarioRunner {
    scenario: Scenario,
    pipeline: Arc<dyn Pipeline>,
    bus_rx: Receiver<BusMessage>,
    task_rx: Receiver<EngineTask>,
    run_timeout: Option<Duration>,
}

impl ScenarioRunner {
    pub fn new(
        mut scenario: Scenario,
        pipeline: Arc<dyn Pipeline>,
        bus_rx: Receiver<BusMessage>,
    ) -> Self {
        scenario.attach_pipeline(&pipeline);
        let task_rx = scenario.take_task_receiver();
        Self {
            scenario,
            pipeline,
            bus_rx,
            task_rx,
            run_timeout: None,
        }
    }

    /// Hard wall-clock budget for the whole run; embedders and tests use
    /// this to bound stuck pipelines.
    pub fn with_run_timeout(mut self, timeout: Duration) -> Self {
        self.run_timeout = Some(timeout);
        self
    }

    /// Drive the scenario to completion and hand the scenario state back
    /// for inspection.
    pub fn run(mut self) -> Scenario {
        let started = Instant::now();

        if !self.scenario.description.handles_states {
            debug!("scenario does not handle states, starting playback");
            match self.pipeline.set_state(PipelineState::Playing) {
                Ok(StateChangeOutcome::Failure) | Err(_) => {
                    self.scenario.report(
                        IssueId::StateChangeFailure,
                        "failed to set the pipeline to playing",
                    );
                }
                Ok(_) => {}
            }
        }
        self.scenario.arm_dispatcher();

        loop {
            self.run_due_deadlines();

            if self.scenario.dispatch_armed && !self.scenario.stopping {
                self.scenario.dispatch_armed = false;
                dispatcher::dispatch(&mut self.scenario);
            }

            if self.finished() {
                break;
            }
            if let Some(budget) = self.run_timeout {
                if started.elapsed() > budget {
                    warn!("run budget exhausted, abandoning the scenario");
                    break;
                }
            }

            let timeout = self.loop_timeout();
            select_biased! {
                recv(self.task_rx) -> task => match task {
                    Ok(EngineTask::Completed(id)) => {
                        reactor::apply_completion(&mut self.scenario, id);
                    }
                    Err(_) => break,
                },
                recv(self.bus_rx) -> message => match message {
                    Ok(message) => {
                        // The EOS critical section: everything that
                        // already called `set_done` settles first, so the
                        // not-ended count cannot race.
                        if matches!(message, BusMessage::Eos | BusMessage::Error { .. }) {
                            self.drain_completions();
                        }
                        reactor::handle_message(&mut self.scenario, &message);
                    }
                    Err(_) => {
                        debug!("bus disconnected");
                        break;
                    }
                },
                default(timeout) => {
                    self.scenario.arm_dispatcher();
                }
            }
        }

        info!(
            elapsed = ?started.elapsed(),
            fatal = self.scenario.reporter.is_fatal_triggered(),
            "scenario run finished"
        );
        self.scenario
    }

    fn run_due_deadlines(&mut self) {
        let now = Instant::now();
        while let Some(Reverse(deadline)) = self.scenario.deadlines.peek().copied() {
            if deadline.at > now {
                break;
            }
            self.scenario.deadlines.pop();
            match deadline.kind {
                DeadlineKind::WaitDone(id) => {
                    info!("stop waiting");
                    reactor::apply_completion(&mut self.scenario, id);
                    self.scenario.arm_dispatcher();
                }
                DeadlineKind::RestorePlaying => {
                    info!("back to playing");
                    self.scenario.target_state = Some(PipelineState::Playing);
                    match self.pipeline.set_state(PipelineState::Playing) {
                        Ok(StateChangeOutcome::Failure) | Err(_) => {
                            self.scenario.report(
                                IssueId::StateChangeFailure,
                                "failed to set state to playing",
                            );
                        }
                        Ok(_) => {}
                    }
                }
                DeadlineKind::Dispatch => self.scenario.arm_dispatcher(),
            }
        }
    }

    fn drain_completions(&mut self) {
        while let Ok(EngineTask::Completed(id)) = self.task_rx.try_recv() {
            reactor::apply_completion(&mut self.scenario, id);
        }
    }

    fn finished(&self) -> bool {
        if self.scenario.stopping || self.scenario.reporter.is_fatal_triggered() {
            return true;
        }
        self.scenario.actions.is_empty()
            && self.scenario.interlaced_actions.is_empty()
            && self.scenario.message_wait.is_none()
            && self.scenario.deadlines.is_empty()
            && !self.scenario.changing_state
            && !self.scenario.needs_async_done
    }

    fn loop_timeout(&self) -> Duration {
        let tick = if self.scenario.execute_on_idle() {
            Duration::from_millis(1)
        } else {
            self.scenario.action_execution_interval
        };
        match self.scenario.next_deadline() {
            Some(at) => tick.min(at.saturating_duration_since(Instant::now())),
            None => tick,
        }
    }
}
