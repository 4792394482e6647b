//! Rebalance event lifecycle: the audit record a cycle leaves behind.
//!
//! `Pending → Planned → Validated → Executing → {Completed,
//! PartiallyFilled, Failed}`; any pre-execution stage may divert to
//! `Aborted`. Every event that reaches a terminal state is persisted
//! with a reason string.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::exchange::FillResult;
use crate::trigger::TriggerReason;
use crate::types::{Asset, Side, Venue};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventState {
    Pending,
    Planned,
    Validated,
    Executing,
    Completed,
    PartiallyFilled,
    Failed,
    Aborted,
}

impl EventState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            EventState::Completed
                | EventState::PartiallyFilled
                | EventState::Failed
                | EventState::Aborted
        )
    }

    /// Legal forward transitions.
    pub fn can_advance_to(self, next: EventState) -> bool {
        use EventState::*;
        match (self, next) {
            (Pending, Planned) | (Planned, Validated) | (Validated, Executing) => true,
            (Executing, Completed) | (Executing, PartiallyFilled) | (Executing, Failed) => true,
            (from, Aborted) => !from.is_terminal(),
            _ => false,
        }
    }
}

impl fmt::Display for EventState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EventState::Pending => "pending",
            EventState::Planned => "planned",
            EventState::Validated => "validated",
            EventState::Executing => "executing",
            EventState::Completed => "completed",
            EventState::PartiallyFilled => "partially_filled",
            EventState::Failed => "failed",
            EventState::Aborted => "aborted",
        };
        write!(f, "{s}")
    }
}

/// How one leg ended.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum LegOutcome {
    Filled(FillResult),
    Failed { reason: String },
    /// Never submitted; its funding transfer failed.
    Skipped { reason: String },
}

/// Per-leg execution record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LegRecord {
    pub asset: Asset,
    pub side: Side,
    pub venue: Venue,
    pub requested_qty: f64,
    pub attempts: u32,
    pub outcome: LegOutcome,
}

/// How one transfer ended.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TransferOutcome {
    Completed { delivered: f64, fee_cents: i64 },
    Failed { reason: String },
}

/// Per-transfer execution record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferRecord {
    pub asset: Asset,
    pub amount: f64,
    pub from: Venue,
    pub to: Venue,
    pub attempts: u32,
    pub outcome: TransferOutcome,
}

/// One rebalance cycle, from trigger to terminal state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RebalanceEvent {
    pub portfolio: String,
    pub reason: TriggerReason,
    pub state: EventState,
    /// Human-readable outcome summary; never empty in a terminal state.
    pub detail: String,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub transfers: Vec<TransferRecord>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub legs: Vec<LegRecord>,
    pub planned_notional_cents: i64,
    pub filled_notional_cents: i64,
    pub fees_paid_cents: i64,
}

impl RebalanceEvent {
    pub fn pending(portfolio: &str, reason: TriggerReason, now: DateTime<Utc>) -> Self {
        Self {
            portfolio: portfolio.to_string(),
            reason,
            state: EventState::Pending,
            detail: String::new(),
            created_at: now,
            finished_at: None,
            transfers: Vec::new(),
            legs: Vec::new(),
            planned_notional_cents: 0,
            filled_notional_cents: 0,
            fees_paid_cents: 0,
        }
    }

    /// Move to the next lifecycle state.
    ///
    /// # Panics
    /// Panics in debug builds on an illegal transition; the engine
    /// drives states strictly forward.
    pub fn advance(&mut self, next: EventState) {
        debug_assert!(
            self.state.can_advance_to(next),
            "illegal event transition {} -> {next}",
            self.state
        );
        self.state = next;
    }

    /// Abort before execution began.
    pub fn abort(&mut self, detail: impl Into<String>, now: DateTime<Utc>) {
        self.advance(EventState::Aborted);
        self.detail = detail.into();
        self.finished_at = Some(now);
    }

    /// Record the execution outcome.
    pub fn finish(&mut self, state: EventState, detail: impl Into<String>, now: DateTime<Utc>) {
        debug_assert!(state.is_terminal());
        self.advance(state);
        self.detail = detail.into();
        self.finished_at = Some(now);
    }

    /// True when at least one leg filled.
    pub fn any_fills(&self) -> bool {
        self.legs
            .iter()
            .any(|l| matches!(l.outcome, LegOutcome::Filled(_)))
    }
}
