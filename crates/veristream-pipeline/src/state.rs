use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Pipeline lifecycle states, ordered from torn-down to running.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "lowercase")]
pub enum PipelineState {
    #[default]
    Null,
    Ready,
    Paused,
    Playing,
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PipelineState::Null => "null",
            PipelineState::Ready => "ready",
            PipelineState::Paused => "paused",
            PipelineState::Playing => "playing",
        };
        f.write_str(s)
    }
}

impl FromStr for PipelineState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "null" => Ok(PipelineState::Null),
            "ready" => Ok(PipelineState::Ready),
            "paused" => Ok(PipelineState::Paused),
            "playing" => Ok(PipelineState::Playing),
            other => Err(format!("unknown pipeline state `{other}`")),
        }
    }
}

/// Outcome of a state-change request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateChangeOutcome {
    Success,
    /// The transition completes asynchronously; an `async-done` message
    /// follows.
    Async,
    /// Succeeded but the pipeline cannot preroll (live sources).
    NoPreroll,
    Failure,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn states_order_by_liveness() {
        assert!(PipelineState::Null < PipelineState::Ready);
        assert!(PipelineState::Paused < PipelineState::Playing);
    }

    #[test]
    fn state_names_round_trip() {
        for state in [
            PipelineState::Null,
            PipelineState::Ready,
            PipelineState::Paused,
            PipelineState::Playing,
        ] {
            assert_eq!(state.to_string().parse::<PipelineState>(), Ok(state));
        }
    }
}
