//! Per-origin status, as shown on the toolbar badge.

use std::fmt;

use serde::Serialize;

use crate::admission::{AdmissionDecision, AdmissionReason};

/// Counts above this render as `99+`.
pub const BADGE_MAX_COUNT: usize = 99;

/// What the badge shows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusBadge {
    /// Capture is off for the origin.
    Off,
    /// Capture is on and nothing is waiting.
    On,
    /// Capture is on and records are waiting.
    Pending(usize),
}

impl StatusBadge {
    /// Badge for a decision and a pending count.
    pub fn new(decision: AdmissionDecision, pending: usize) -> Self {
        match (decision.allowed, pending) {
            (false, _) => StatusBadge::Off,
            (true, 0) => StatusBadge::On,
            (true, n) => StatusBadge::Pending(n),
        }
    }
}

impl fmt::Display for StatusBadge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StatusBadge::Off => f.write_str("OFF"),
            StatusBadge::On => f.write_str("ON"),
            StatusBadge::Pending(n) if *n > BADGE_MAX_COUNT => f.write_str("99+"),
            StatusBadge::Pending(n) => write!(f, "{}", n),
        }
    }
}

/// Status of the active origin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OriginStatus {
    /// Normalized active origin, if a page has been opened.
    pub origin: Option<String>,
    /// Admission for that origin.
    pub decision: AdmissionDecision,
    /// Records from that origin not yet delivered.
    pub pending: usize,
    /// Whether the memory service is currently reachable.
    pub server_reachable: bool,
}

impl OriginStatus {
    /// Status before any page is known.
    pub fn idle(server_reachable: bool) -> Self {
        Self {
            origin: None,
            decision: AdmissionDecision {
                allowed: false,
                reason: AdmissionReason::Blocked,
            },
            pending: 0,
            server_reachable,
        }
    }

    /// Badge for this status.
    pub fn badge(&self) -> StatusBadge {
        StatusBadge::new(self.decision, self.pending)
    }
}
