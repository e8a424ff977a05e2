//! Backfill scheduling state machine

use crate::metrics::STATE_TRANSITIONS_TOTAL;
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Phase of one sink's backfill scheduling
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackfillState {
    /// Nothing has run yet
    Uninitialized,

    /// Bounds and candidate projects are being computed
    Computing,

    /// Day windows are being persisted and task units enqueued
    Dispatched,

    /// Units are enqueued; unit executors are working through them
    InProgress,

    /// No project remains; progress sub-state is collected
    Complete,

    /// Test mode: projects computed and persisted, nothing dispatched
    Computed,
}

impl BackfillState {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackfillState::Uninitialized => "uninitialized",
            BackfillState::Computing => "computing",
            BackfillState::Dispatched => "dispatched",
            BackfillState::InProgress => "in_progress",
            BackfillState::Complete => "complete",
            BackfillState::Computed => "computed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            BackfillState::InProgress | BackfillState::Complete | BackfillState::Computed
        )
    }
}

impl fmt::Display for BackfillState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Validates transitions and keeps a timestamped history
pub struct BackfillStateMachine {
    current_state: BackfillState,
    state_history: Vec<(BackfillState, DateTime<Utc>)>,
}

impl BackfillStateMachine {
    pub fn new() -> Self {
        Self {
            current_state: BackfillState::Uninitialized,
            state_history: vec![(BackfillState::Uninitialized, Utc::now())],
        }
    }

    pub fn current_state(&self) -> BackfillState {
        self.current_state
    }

    pub fn transition(&mut self, new_state: BackfillState) -> Result<()> {
        let from = self.current_state;
        if !Self::is_valid_transition(from, new_state) {
            STATE_TRANSITIONS_TOTAL
                .with_label_values(&[from.as_str(), new_state.as_str(), "rejected"])
                .inc();
            return Err(Error::InvalidState(format!(
                "Invalid transition from {} to {}",
                from, new_state
            )));
        }

        STATE_TRANSITIONS_TOTAL
            .with_label_values(&[from.as_str(), new_state.as_str(), "ok"])
            .inc();
        self.current_state = new_state;
        self.state_history.push((new_state, Utc::now()));
        Ok(())
    }

    fn is_valid_transition(from: BackfillState, to: BackfillState) -> bool {
        use BackfillState::*;

        matches!(
            (from, to),
            (Uninitialized, Computing)
                | (Computing, Dispatched | Complete | Computed)
                | (Dispatched, InProgress | Complete)
                | (InProgress, Complete)
        )
    }

    pub fn history(&self) -> &[(BackfillState, DateTime<Utc>)] {
        &self.state_history
    }

    /// States visited so far, oldest first
    pub fn path(&self) -> Vec<BackfillState> {
        self.state_history.iter().map(|(s, _)| *s).collect()
    }
}

impl Default for BackfillStateMachine {
    fn default() -> Self {
        Self::new()
    }
}
