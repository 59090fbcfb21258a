//! Ready/Offline condition state machine.
//!
//! Each cluster worker owns one [`ConditionStateMachine`]. Every pass feeds
//! it an [`Observation`] and the cluster's condition list; the machine
//! latches the published `Ready` status and rewrites the condition in
//! place.
//!
//! With the default thresholds of 1 the machine is a direct two-state
//! latch:
//!
//! ```text
//! Unknown ──success──▶ Ready ◀──success── Offline
//!    │                   │                  ▲
//!    └──────failure──────┴─────failure──────┘
//! ```
//!
//! Raising `failure_threshold` / `success_threshold` debounces flips: a
//! contrary outcome must repeat that many times in a row before the
//! status moves. The first observation out of `Unknown` always applies.

use tracing::{debug, info, warn};

use fedcluster_state::{ClusterCondition, ConditionStatus, ConditionType};

use crate::error::HealthError;
use crate::probe::ProbeOutcome;

/// Machine-readable condition reasons.
pub mod reason {
    pub const CLUSTER_READY: &str = "ClusterReady";
    pub const CLUSTER_UNREACHABLE: &str = "ClusterUnreachable";
    pub const TIMEOUT: &str = "Timeout";
    pub const UNAUTHORIZED: &str = "Unauthorized";
    pub const CERTIFICATE_ERROR: &str = "CertificateError";
    pub const CREDENTIAL_RESOLUTION_FAILED: &str = "CredentialResolutionFailed";
}

/// Latched health of a cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClusterHealth {
    /// No probe has completed yet.
    Unknown,
    Ready,
    Offline,
}

impl ClusterHealth {
    fn condition_status(self) -> ConditionStatus {
        match self {
            Self::Unknown => ConditionStatus::Unknown,
            Self::Ready => ConditionStatus::True,
            Self::Offline => ConditionStatus::False,
        }
    }
}

/// What one pass learned about a cluster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Observation {
    pub healthy: bool,
    pub reason: &'static str,
    pub message: String,
}

impl Observation {
    /// Credentials could not be resolved; the probe was never attempted.
    pub fn credential_failure(err: &HealthError) -> Self {
        Self {
            healthy: false,
            reason: reason::CREDENTIAL_RESOLUTION_FAILED,
            message: err.to_string(),
        }
    }
}

impl From<&ProbeOutcome> for Observation {
    fn from(outcome: &ProbeOutcome) -> Self {
        let (healthy, reason, message) = match outcome {
            ProbeOutcome::Success => (
                true,
                reason::CLUSTER_READY,
                "cluster API endpoint is reachable".to_string(),
            ),
            ProbeOutcome::Unreachable(msg) => (false, reason::CLUSTER_UNREACHABLE, msg.clone()),
            ProbeOutcome::Timeout(after) => (
                false,
                reason::TIMEOUT,
                format!("cluster API endpoint did not answer within {after:?}"),
            ),
            ProbeOutcome::Unauthorized(msg) => (false, reason::UNAUTHORIZED, msg.clone()),
            ProbeOutcome::CertificateError(msg) => (false, reason::CERTIFICATE_ERROR, msg.clone()),
        };
        Self {
            healthy,
            reason,
            message,
        }
    }
}

/// Effect of one observation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub from: ClusterHealth,
    pub to: ClusterHealth,
    /// The published `Ready` status changed value.
    pub status_changed: bool,
}

/// Per-cluster latch producing the `Ready` condition.
#[derive(Debug)]
pub struct ConditionStateMachine {
    state: ClusterHealth,
    consecutive_failures: u32,
    consecutive_successes: u32,
    failure_threshold: u32,
    success_threshold: u32,
}

impl ConditionStateMachine {
    /// Start in `Unknown`. Thresholds below 1 are treated as 1.
    pub fn new(failure_threshold: u32, success_threshold: u32) -> Self {
        Self {
            state: ClusterHealth::Unknown,
            consecutive_failures: 0,
            consecutive_successes: 0,
            failure_threshold: failure_threshold.max(1),
            success_threshold: success_threshold.max(1),
        }
    }

    /// Pick up the latched state from a persisted `Ready` condition, so a
    /// restarted worker does not forget a cluster's health.
    pub fn resume(
        conditions: &[ClusterCondition],
        failure_threshold: u32,
        success_threshold: u32,
    ) -> Self {
        let mut machine = Self::new(failure_threshold, success_threshold);
        machine.state = match conditions
            .iter()
            .find(|c| c.type_ == ConditionType::Ready)
            .map(|c| c.status)
        {
            Some(ConditionStatus::True) => ClusterHealth::Ready,
            Some(ConditionStatus::False) => ClusterHealth::Offline,
            Some(ConditionStatus::Unknown) | None => ClusterHealth::Unknown,
        };
        machine
    }

    pub fn state(&self) -> ClusterHealth {
        self.state
    }

    pub fn is_ready(&self) -> bool {
        self.state == ClusterHealth::Ready
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// Record an observation made at `now` (epoch milliseconds) and rewrite the
    /// `Ready` entry of `conditions` accordingly.
    ///
    /// Guarantees on `conditions`:
    /// - exactly one `Ready` entry afterwards; other types are untouched;
    /// - `last_probe_time` never moves backwards;
    /// - `last_transition_time` moves iff the status value changed, and
    ///   then strictly increases and equals `last_probe_time`.
    pub fn observe(
        &mut self,
        conditions: &mut Vec<ClusterCondition>,
        observation: &Observation,
        now: u64,
    ) -> Transition {
        let from = self.state;
        let observed = if observation.healthy {
            self.consecutive_failures = 0;
            self.consecutive_successes += 1;
            ClusterHealth::Ready
        } else {
            self.consecutive_successes = 0;
            self.consecutive_failures += 1;
            ClusterHealth::Offline
        };

        let accepted = match (from, observed) {
            (ClusterHealth::Unknown, _) => true,
            (current, next) if current == next => true,
            (_, ClusterHealth::Offline) => self.consecutive_failures >= self.failure_threshold,
            (_, _) => self.consecutive_successes >= self.success_threshold,
        };
        if accepted {
            self.state = observed;
        } else {
            debug!(
                failures = self.consecutive_failures,
                successes = self.consecutive_successes,
                reason = observation.reason,
                "contrary probe outcome below threshold, holding status"
            );
        }

        let status_changed = self.write_condition(conditions, observation, accepted, now);
        if status_changed {
            match self.state {
                ClusterHealth::Ready => info!(reason = observation.reason, "cluster became ready"),
                _ => warn!(
                    reason = observation.reason,
                    message = %observation.message,
                    "cluster went offline"
                ),
            }
        }

        Transition {
            from,
            to: self.state,
            status_changed,
        }
    }

    fn write_condition(
        &self,
        conditions: &mut Vec<ClusterCondition>,
        observation: &Observation,
        accepted: bool,
        now: u64,
    ) -> bool {
        let status = self.state.condition_status();

        // Collapse duplicates left behind by older writers.
        let mut seen = false;
        conditions.retain(|c| c.type_ != ConditionType::Ready || !std::mem::replace(&mut seen, true));

        let position = match conditions.iter().position(|c| c.type_ == ConditionType::Ready) {
            Some(i) => i,
            None => {
                conditions.push(ClusterCondition {
                    type_: ConditionType::Ready,
                    status: ConditionStatus::Unknown,
                    last_probe_time: 0,
                    last_transition_time: 0,
                    reason: String::new(),
                    message: String::new(),
                });
                conditions.len() - 1
            }
        };

        let condition = &mut conditions[position];
        let mut probe_time = now.max(condition.last_probe_time);
        let changed = condition.status != status;

        if changed {
            // A flip always gets a fresh transition time, even within the
            // same clock tick as the previous write.
            probe_time = probe_time.max(condition.last_transition_time.saturating_add(1));
            condition.status = status;
            condition.last_transition_time = probe_time;
        }
        condition.last_probe_time = probe_time;
        if accepted {
            condition.reason = observation.reason.to_string();
            condition.message = observation.message.clone();
        }
        changed
    }
}
