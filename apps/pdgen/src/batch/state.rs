//! Per-row state machine.
//!
//! ```text
//! Pending → Requesting → Parsing → Scoring → Writing → Done
//!              │  ▲         │
//!              ▼  │         ▼
//!            Retrying ◄─────┘
//! ```
//!
//! `Failed` is reachable from `Pending` (bad input), `Requesting` and `Parsing`.
//! `Done` and `Failed` are terminal.

use std::fmt;
use std::time::Duration;

use tracing::debug;

#[derive(Debug, Clone, PartialEq)]
pub enum RowState {
    Pending,
    Requesting { attempt: u32 },
    Parsing,
    Scoring,
    Writing,
    Done,
    Retrying {
        attempt: u32,
        delay: Duration,
        reason: String,
    },
    Failed { reason: String },
}

impl RowState {
    pub fn name(&self) -> &'static str {
        match self {
            RowState::Pending => "pending",
            RowState::Requesting { .. } => "requesting",
            RowState::Parsing => "parsing",
            RowState::Scoring => "scoring",
            RowState::Writing => "writing",
            RowState::Done => "done",
            RowState::Retrying { .. } => "retrying",
            RowState::Failed { .. } => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, RowState::Done | RowState::Failed { .. })
    }

    pub fn can_transition_to(&self, next: &RowState) -> bool {
        use RowState::*;
        matches!(
            (self, next),
            (Pending, Requesting { .. })
                | (Pending, Failed { .. })
                | (Requesting { .. }, Parsing)
                | (Requesting { .. }, Retrying { .. })
                | (Requesting { .. }, Failed { .. })
                | (Parsing, Scoring)
                | (Parsing, Retrying { .. })
                | (Parsing, Failed { .. })
                | (Retrying { .. }, Requesting { .. })
                | (Scoring, Writing)
                | (Writing, Done)
        )
    }
}

impl fmt::Display for RowState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RowState::Requesting { attempt } => write!(f, "requesting (attempt {attempt})"),
            RowState::Retrying { attempt, delay, .. } => {
                write!(f, "retrying after attempt {attempt} in {:.1}s", delay.as_secs_f64())
            }
            other => f.write_str(other.name()),
        }
    }
}

/// Records every state a row passes through.
#[derive(Debug, Clone, PartialEq)]
pub struct RowTracker {
    index: usize,
    history: Vec<RowState>,
}

impl RowTracker {
    pub fn new(index: usize) -> Self {
        Self {
            index,
            history: vec![RowState::Pending],
        }
    }

    pub fn current(&self) -> &RowState {
        // history always starts with Pending
        &self.history[self.history.len() - 1]
    }

    pub fn history(&self) -> &[RowState] {
        &self.history
    }

    /// Number of model requests made for this row (repair requests excluded).
    pub fn attempts(&self) -> u32 {
        self.history
            .iter()
            .filter(|s| matches!(s, RowState::Requesting { .. }))
            .count() as u32
    }

    /// Backoff delays taken, in order.
    pub fn backoff_delays(&self) -> Vec<Duration> {
        self.history
            .iter()
            .filter_map(|s| match s {
                RowState::Retrying { delay, .. } => Some(*delay),
                _ => None,
            })
            .collect()
    }

    pub fn transition(&mut self, next: RowState) {
        debug_assert!(
            self.current().can_transition_to(&next),
            "illegal row transition {} -> {}",
            self.current(),
            next
        );
        debug!(row = self.index, from = %self.current(), to = %next, "row state");
        self.history.push(next);
    }
}
