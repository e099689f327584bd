//! Delayed activation of the Flink application.
//!
//! The provider mishandles `startApplication=true` on an application that only just became
//! ready, so in delayed mode the flag is held back until the application has been observed
//! ready for a configured number of seconds. The first readiness timestamp is persisted in
//! the composite's status because nothing else survives between invocations.
//!
//! Phases: `NotReady` -> `ReadyPendingDelay` -> `Activated`. `readyAt` is written once and
//! never lowered or cleared.

use metrics::counter;
use serde_json::Value as Json;
use tracing::{debug, info};
use xflink_core::status::{Checkpoint, Clock, StatusStore};
use xflink_core::{Paved, PathError};

use crate::application::ActivationMode;

/// Observed status field on the managed application.
pub const OBSERVED_STATUS_PATH: &str = "status.atProvider.status";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    NotReady,
    ReadyPendingDelay { ready_at: i64, remaining_millis: i64 },
    Activated { ready_at: i64 },
}

impl Phase {
    pub fn is_activated(&self) -> bool {
        matches!(self, Phase::Activated { .. })
    }
}

/// Statuses that start the delay clock. `RUNNING` counts: an application can pass through
/// `READY` between two invocations and would otherwise never be activated.
pub fn starts_clock(observed_status: &str) -> bool {
    matches!(observed_status, "READY" | "RUNNING")
}

pub struct Watchdog<'c> {
    clock: &'c dyn Clock,
    delay_millis: i64,
}

impl<'c> Watchdog<'c> {
    pub fn new(clock: &'c dyn Clock, delay_secs: i64) -> Self {
        Self { clock, delay_millis: delay_secs.saturating_mul(1000) }
    }

    /// Advance the machine for one invocation and persist the result.
    pub fn observe(&self, observed_status: &str, store: &mut dyn StatusStore) -> Result<Phase, PathError> {
        let mut cp = Checkpoint::load(store)?;
        cp.req_counter = cp.req_counter.saturating_add(1);
        let now = self.clock.now_millis();

        if cp.ready_at == 0 && starts_clock(observed_status) {
            cp.ready_at = now;
            info!(status = observed_status, ready_at = now, "application ready; delay clock started");
        }

        let phase = if cp.ready_at == 0 {
            Phase::NotReady
        } else {
            let elapsed = now.saturating_sub(cp.ready_at);
            if elapsed >= self.delay_millis {
                Phase::Activated { ready_at: cp.ready_at }
            } else {
                Phase::ReadyPendingDelay { ready_at: cp.ready_at, remaining_millis: self.delay_millis - elapsed }
            }
        };
        cp.start_application = phase.is_activated();
        cp.save(store)?;
        debug!(?phase, req_counter = cp.req_counter, "activation watchdog");
        Ok(phase)
    }
}

/// Outcome of one activation decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Start,
    Hold,
    /// The observed application exists but reports no status; nothing was recorded.
    StatusUnavailable,
}

impl Decision {
    pub fn starts(&self) -> bool {
        matches!(self, Decision::Start)
    }
}

/// Decide `spec.forProvider.startApplication` for this invocation.
///
/// Immediate mode never touches the store. Delayed mode is a no-op until the observed
/// application exists and reports a status.
pub fn decide(
    mode: ActivationMode,
    observed_application: Option<&Json>,
    store: &mut dyn StatusStore,
    clock: &dyn Clock,
) -> Result<Decision, PathError> {
    let decision = match mode {
        ActivationMode::Immediate { requested: true } => Decision::Start,
        ActivationMode::Immediate { requested: false } => Decision::Hold,
        ActivationMode::Delayed { delay_secs } => {
            let Some(observed) = observed_application else {
                debug!("observed application not created yet; nothing to do");
                return Ok(Decision::Hold);
            };
            // An unreadable status is treated like a missing one.
            let Some(status) = Paved::new(observed).opt_string(OBSERVED_STATUS_PATH).ok().flatten() else {
                info!("observed {} is unavailable; nothing to do", OBSERVED_STATUS_PATH);
                return Ok(Decision::StatusUnavailable);
            };
            if Watchdog::new(clock, delay_secs).observe(status, store)?.is_activated() {
                Decision::Start
            } else {
                Decision::Hold
            }
        }
    };
    if decision.starts() {
        counter!("activation_set", 1u64);
        info!("setting startApplication=true");
    }
    Ok(decision)
}
