//! Kiosk detection state machine.
//!
//! One enumerated state plus an explicit transition table. The `Detecting`
//! state is the only concurrency gate: while it is held, every further
//! trigger is dropped, so at most one detection is ever in flight. The
//! cooldown after `Success`/`Error` suppresses duplicate attendance writes
//! from automatic triggers until the reset timer fires.
//!
//! The machine is pure bookkeeping. Side effects (the recorder write, the
//! reset timer) are carried out by the host, which feeds the timer expiry
//! back in as [`KioskMachine::cooldown_elapsed`] with the ticket it was
//! armed with. A stale ticket is ignored, so an abandoned timer can never
//! move the machine.

use serde::Serialize;

/// Kiosk session state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum KioskState {
    Initializing,
    Idle,
    Detecting,
    Success,
    Error,
}

impl KioskState {
    pub fn as_str(&self) -> &'static str {
        match self {
            KioskState::Initializing => "initializing",
            KioskState::Idle => "idle",
            KioskState::Detecting => "detecting",
            KioskState::Success => "success",
            KioskState::Error => "error",
        }
    }
}

/// Who asked for a detection cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerSource {
    /// Per-frame trigger from the capture loop. Gated by cooldown and the
    /// auto-detection toggle.
    Automatic,
    /// Operator-initiated capture. May override an active cooldown (the
    /// operator intends a fresh check) but never an in-flight detection.
    Manual,
}

/// Why a trigger was dropped without effect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// Provider not ready yet (still `Initializing`).
    NotReady,
    /// A detection is already in flight.
    InFlight,
    /// An automatic trigger arrived during an active cooldown window.
    CooldownActive,
    /// Automatic detection is switched off.
    AutoDetectionOff,
}

impl DropReason {
    pub fn message(&self) -> &'static str {
        match self {
            DropReason::NotReady => "kiosk is still initializing",
            DropReason::InFlight => "a detection is already in progress",
            DropReason::CooldownActive => "cooldown active",
            DropReason::AutoDetectionOff => "automatic detection is disabled",
        }
    }
}

/// Result of offering a trigger to the machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerDecision {
    /// Transitioned to `Detecting`; the host must run exactly one detection.
    Accepted,
    /// Dropped without effect.
    Dropped(DropReason),
}

/// Handle for one armed reset timer. Issued when `Success`/`Error` is
/// entered; only the most recently issued ticket can move the machine back
/// to `Idle`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CooldownTicket(u64);

/// The detection state machine. Owns `KioskState` and the orthogonal
/// cooldown flag exclusively.
pub struct KioskMachine {
    state: KioskState,
    cooldown_identity: Option<String>,
    auto_detection: bool,
    generation: u64,
}

impl KioskMachine {
    pub fn new() -> Self {
        Self {
            state: KioskState::Initializing,
            cooldown_identity: None,
            auto_detection: true,
            generation: 0,
        }
    }

    pub fn state(&self) -> KioskState {
        self.state
    }

    /// True between a `Success` transition and the matching reset timer.
    pub fn cooldown_active(&self) -> bool {
        self.cooldown_identity.is_some()
    }

    /// Identity whose duplicate writes the active cooldown suppresses.
    pub fn cooldown_identity(&self) -> Option<&str> {
        self.cooldown_identity.as_deref()
    }

    pub fn auto_detection(&self) -> bool {
        self.auto_detection
    }

    pub fn set_auto_detection(&mut self, enabled: bool) {
        self.auto_detection = enabled;
    }

    /// The embedding provider finished initializing: `Initializing → Idle`.
    /// Returns false (and does nothing) from any other state.
    pub fn provider_ready(&mut self) -> bool {
        if self.state != KioskState::Initializing {
            return false;
        }
        self.state = KioskState::Idle;
        tracing::debug!("kiosk ready, entering idle");
        true
    }

    /// Offer a detection trigger. On acceptance the machine enters
    /// `Detecting` and any pending reset timer is invalidated.
    pub fn try_begin(&mut self, source: TriggerSource) -> TriggerDecision {
        if source == TriggerSource::Automatic && !self.auto_detection {
            return TriggerDecision::Dropped(DropReason::AutoDetectionOff);
        }
        match self.state {
            KioskState::Initializing => TriggerDecision::Dropped(DropReason::NotReady),
            KioskState::Detecting => TriggerDecision::Dropped(DropReason::InFlight),
            KioskState::Idle => {
                // Cooldown is always cleared on entry to Idle, so an
                // automatic trigger here is never under cooldown.
                self.state = KioskState::Detecting;
                TriggerDecision::Accepted
            }
            KioskState::Success | KioskState::Error => match source {
                TriggerSource::Automatic => TriggerDecision::Dropped(DropReason::CooldownActive),
                TriggerSource::Manual => {
                    // Cancel the pending reset timer and the cooldown: a
                    // stale ticket can no longer move the machine.
                    self.generation += 1;
                    self.cooldown_identity = None;
                    self.state = KioskState::Detecting;
                    tracing::debug!("manual trigger overrides cooldown");
                    TriggerDecision::Accepted
                }
            },
        }
    }

    /// The in-flight detection matched an identity: `Detecting → Success`.
    ///
    /// Returns the ticket for the reset timer the host must arm, or `None`
    /// if the machine is no longer expecting this detection (the result
    /// must then be discarded, including the recorder write).
    pub fn finish_matched(&mut self, identity_id: &str) -> Option<CooldownTicket> {
        if self.state != KioskState::Detecting {
            return None;
        }
        self.state = KioskState::Success;
        self.cooldown_identity = Some(identity_id.to_string());
        self.generation += 1;
        Some(CooldownTicket(self.generation))
    }

    /// The in-flight detection failed: `Detecting → Error`. Same ticket
    /// contract as [`finish_matched`](Self::finish_matched); no cooldown
    /// identity is set, but the reset timer runs all the same.
    pub fn finish_failed(&mut self) -> Option<CooldownTicket> {
        if self.state != KioskState::Detecting {
            return None;
        }
        self.state = KioskState::Error;
        self.generation += 1;
        Some(CooldownTicket(self.generation))
    }

    /// The reset timer for `ticket` fired. Returns to `Idle` and clears the
    /// cooldown in the same instant, but only if the ticket is still the
    /// current one and the machine is in `Success`/`Error`.
    pub fn cooldown_elapsed(&mut self, ticket: CooldownTicket) -> bool {
        if ticket.0 != self.generation {
            return false;
        }
        match self.state {
            KioskState::Success | KioskState::Error => {
                self.state = KioskState::Idle;
                self.cooldown_identity = None;
                tracing::debug!("cooldown elapsed, returning to idle");
                true
            }
            _ => false,
        }
    }
}

impl Default for KioskMachine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ready_machine() -> KioskMachine {
        let mut machine = KioskMachine::new();
        assert!(machine.provider_ready());
        machine
    }

    #[test]
    fn test_starts_initializing() {
        let machine = KioskMachine::new();
        assert_eq!(machine.state(), KioskState::Initializing);
        assert!(!machine.cooldown_active());
    }

    #[test]
    fn test_provider_ready_only_from_initializing() {
        let mut machine = KioskMachine::new();
        assert!(machine.provider_ready());
        assert_eq!(machine.state(), KioskState::Idle);
        assert!(!machine.provider_ready());
    }

    #[test]
    fn test_triggers_dropped_while_initializing() {
        let mut machine = KioskMachine::new();
        assert_eq!(
            machine.try_begin(TriggerSource::Automatic),
            TriggerDecision::Dropped(DropReason::NotReady)
        );
        assert_eq!(
            machine.try_begin(TriggerSource::Manual),
            TriggerDecision::Dropped(DropReason::NotReady)
        );
    }

    #[test]
    fn test_trigger_from_idle_accepted() {
        let mut machine = ready_machine();
        assert_eq!(
            machine.try_begin(TriggerSource::Automatic),
            TriggerDecision::Accepted
        );
        assert_eq!(machine.state(), KioskState::Detecting);
    }

    #[test]
    fn test_reentrancy_guard_drops_all_sources() {
        let mut machine = ready_machine();
        machine.try_begin(TriggerSource::Automatic);
        assert_eq!(
            machine.try_begin(TriggerSource::Automatic),
            TriggerDecision::Dropped(DropReason::InFlight)
        );
        // Manual may override cooldown but never an in-flight detection.
        assert_eq!(
            machine.try_begin(TriggerSource::Manual),
            TriggerDecision::Dropped(DropReason::InFlight)
        );
    }

    #[test]
    fn test_success_sets_cooldown_for_identity() {
        let mut machine = ready_machine();
        machine.try_begin(TriggerSource::Automatic);
        let ticket = machine.finish_matched("a").unwrap();
        assert_eq!(machine.state(), KioskState::Success);
        assert!(machine.cooldown_active());
        assert_eq!(machine.cooldown_identity(), Some("a"));

        assert!(machine.cooldown_elapsed(ticket));
        assert_eq!(machine.state(), KioskState::Idle);
        assert!(!machine.cooldown_active());
    }

    #[test]
    fn test_auto_trigger_dropped_during_cooldown() {
        let mut machine = ready_machine();
        machine.try_begin(TriggerSource::Automatic);
        machine.finish_matched("a").unwrap();
        assert_eq!(
            machine.try_begin(TriggerSource::Automatic),
            TriggerDecision::Dropped(DropReason::CooldownActive)
        );
    }

    #[test]
    fn test_manual_trigger_overrides_cooldown() {
        let mut machine = ready_machine();
        machine.try_begin(TriggerSource::Automatic);
        let stale = machine.finish_matched("a").unwrap();

        assert_eq!(
            machine.try_begin(TriggerSource::Manual),
            TriggerDecision::Accepted
        );
        assert_eq!(machine.state(), KioskState::Detecting);
        assert!(!machine.cooldown_active());
        // The pending timer must no longer be able to move the machine.
        assert!(!machine.cooldown_elapsed(stale));
        assert_eq!(machine.state(), KioskState::Detecting);
    }

    #[test]
    fn test_error_path_runs_reset_timer() {
        let mut machine = ready_machine();
        machine.try_begin(TriggerSource::Automatic);
        let ticket = machine.finish_failed().unwrap();
        assert_eq!(machine.state(), KioskState::Error);
        assert!(!machine.cooldown_active());

        assert!(machine.cooldown_elapsed(ticket));
        assert_eq!(machine.state(), KioskState::Idle);
    }

    #[test]
    fn test_cooldown_elapses_exactly_once() {
        let mut machine = ready_machine();
        machine.try_begin(TriggerSource::Automatic);
        let ticket = machine.finish_matched("a").unwrap();
        assert!(machine.cooldown_elapsed(ticket));
        assert!(!machine.cooldown_elapsed(ticket));
        assert_eq!(machine.state(), KioskState::Idle);
    }

    #[test]
    fn test_finish_outside_detecting_discarded() {
        let mut machine = ready_machine();
        assert!(machine.finish_matched("a").is_none());
        assert!(machine.finish_failed().is_none());
        assert_eq!(machine.state(), KioskState::Idle);
    }

    #[test]
    fn test_auto_detection_toggle_gates_automatic_only() {
        let mut machine = ready_machine();
        machine.set_auto_detection(false);
        assert_eq!(
            machine.try_begin(TriggerSource::Automatic),
            TriggerDecision::Dropped(DropReason::AutoDetectionOff)
        );
        assert_eq!(
            machine.try_begin(TriggerSource::Manual),
            TriggerDecision::Accepted
        );
    }

    #[test]
    fn test_full_cycle_after_cooldown_permits_new_event() {
        let mut machine = ready_machine();
        machine.try_begin(TriggerSource::Automatic);
        let ticket = machine.finish_matched("a").unwrap();
        assert!(machine.cooldown_elapsed(ticket));

        // A fresh automatic cycle for the same identity is now permitted.
        assert_eq!(
            machine.try_begin(TriggerSource::Automatic),
            TriggerDecision::Accepted
        );
        assert!(machine.finish_matched("a").is_some());
    }
}
