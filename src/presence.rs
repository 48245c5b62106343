//! Presence state machine and capture sequence
//!
//! Per feed slot: an edge-triggered found/lost machine with a debounce lock,
//! and the countdown-to-capture chain it drives. Both are plain state
//! machines advanced by an explicit `Instant`, with a single deadline at a
//! time - no nested timer callbacks.

use std::time::{Duration, Instant};

/// Debounce window after a committed presence transition
pub const DEBOUNCE: Duration = Duration::from_millis(250);

/// Length of each countdown step (prepare, 3, 2, 1)
pub const COUNT_STEP: Duration = Duration::from_secs(1);

/// Edge-triggered presence transition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresenceEvent {
    Found,
    Lost,
}

/// Debounced found/lost tracker for one feed slot
///
/// Raw detector results commit a transition only when they differ from the
/// last committed value and no debounce lock is active. Results arriving
/// during the lock are buffered as the pending value; when the lock expires
/// the latest pending value is reconciled, committing at most one (possibly
/// coalesced) transition per window.
#[derive(Debug, Clone)]
pub struct PresenceMachine {
    committed: bool,
    pending: bool,
    locked_until: Option<Instant>,
}

impl Default for PresenceMachine {
    fn default() -> Self {
        Self {
            committed: false,
            pending: false,
            locked_until: None,
        }
    }
}

impl PresenceMachine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Last committed presence value
    pub fn found(&self) -> bool {
        self.committed
    }

    /// Feed a raw detector result
    pub fn observe(&mut self, found: bool, now: Instant) -> Option<PresenceEvent> {
        self.pending = found;
        self.reconcile(now)
    }

    /// Advance time without a new detector result
    ///
    /// Commits a buffered pending value once the debounce lock expires.
    pub fn poll(&mut self, now: Instant) -> Option<PresenceEvent> {
        self.reconcile(now)
    }

    fn reconcile(&mut self, now: Instant) -> Option<PresenceEvent> {
        if let Some(lock) = self.locked_until {
            if now < lock {
                return None;
            }
            self.locked_until = None;
        }

        if self.pending == self.committed {
            return None;
        }

        self.committed = self.pending;
        self.locked_until = Some(now + DEBOUNCE);
        Some(if self.committed {
            PresenceEvent::Found
        } else {
            PresenceEvent::Lost
        })
    }
}

/// Countdown stage, shown to the user between trigger and capture
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// Waiting for a person ("searching" messaging)
    Idle,
    /// Person found, capture imminent ("get ready" messaging)
    Preparing,
    /// Visible countdown digit (3, 2, 1)
    Counting(u8),
}

/// Event emitted when the sequence advances a step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SequenceEvent {
    Prepare,
    Count(u8),
    Capture,
}

/// Timer-driven capture chain for one feed slot
///
/// `Idle -> Preparing -> Counting(3) -> Counting(2) -> Counting(1) -> capture -> Idle`.
/// Exactly one deadline exists at a time; every transition replaces it
/// (cancel-then-schedule), so re-triggers can never race two chains.
#[derive(Debug, Clone)]
pub struct CaptureSequence {
    stage: Stage,
    deadline: Option<Instant>,
}

impl Default for CaptureSequence {
    fn default() -> Self {
        Self {
            stage: Stage::Idle,
            deadline: None,
        }
    }
}

impl CaptureSequence {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    /// True while a countdown step is scheduled
    pub fn has_pending_timer(&self) -> bool {
        self.deadline.is_some()
    }

    /// Start (or restart) the countdown
    pub fn on_pose_found(&mut self, now: Instant) -> SequenceEvent {
        self.stage = Stage::Preparing;
        self.deadline = Some(now + COUNT_STEP);
        SequenceEvent::Prepare
    }

    /// Cancel everything and return to idle, regardless of stage
    pub fn on_pose_lost(&mut self) {
        self.stage = Stage::Idle;
        self.deadline = None;
    }

    /// Advance the chain if the current step's deadline has passed
    pub fn tick(&mut self, now: Instant) -> Option<SequenceEvent> {
        let deadline = self.deadline?;
        if now < deadline {
            return None;
        }

        match self.stage {
            Stage::Idle => {
                // Stale deadline with no active chain
                self.deadline = None;
                None
            }
            Stage::Preparing => {
                self.stage = Stage::Counting(3);
                self.deadline = Some(now + COUNT_STEP);
                Some(SequenceEvent::Count(3))
            }
            Stage::Counting(n) if n > 1 => {
                self.stage = Stage::Counting(n - 1);
                self.deadline = Some(now + COUNT_STEP);
                Some(SequenceEvent::Count(n - 1))
            }
            Stage::Counting(_) => {
                self.stage = Stage::Idle;
                self.deadline = None;
                Some(SequenceEvent::Capture)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(v: u64) -> Duration {
        Duration::from_millis(v)
    }

    #[test]
    fn first_result_commits_immediately() {
        let t0 = Instant::now();
        let mut pm = PresenceMachine::new();
        assert_eq!(pm.observe(true, t0), Some(PresenceEvent::Found));
        assert!(pm.found());
    }

    #[test]
    fn noisy_burst_commits_once_per_window() {
        let t0 = Instant::now();
        let mut pm = PresenceMachine::new();

        // Raw sequence [T, F, T, T, F] delivered inside one debounce window
        let mut events = Vec::new();
        events.extend(pm.observe(true, t0));
        events.extend(pm.observe(false, t0 + ms(20)));
        events.extend(pm.observe(true, t0 + ms(40)));
        events.extend(pm.observe(true, t0 + ms(60)));
        events.extend(pm.observe(false, t0 + ms(80)));
        assert_eq!(events, vec![PresenceEvent::Found]);

        // Window closes: the last raw value commits as one coalesced event
        let late = pm.poll(t0 + DEBOUNCE + ms(10));
        assert_eq!(late, Some(PresenceEvent::Lost));
        assert!(!pm.found());

        // Nothing further without new input
        assert_eq!(pm.poll(t0 + DEBOUNCE * 3), None);
    }

    #[test]
    fn repeated_same_value_never_emits() {
        let t0 = Instant::now();
        let mut pm = PresenceMachine::new();
        assert_eq!(pm.observe(false, t0), None);
        assert_eq!(pm.observe(false, t0 + DEBOUNCE * 2), None);
        assert_eq!(pm.observe(false, t0 + DEBOUNCE * 4), None);
    }

    #[test]
    fn found_after_lock_expires_commits_again() {
        let t0 = Instant::now();
        let mut pm = PresenceMachine::new();
        assert_eq!(pm.observe(true, t0), Some(PresenceEvent::Found));
        assert_eq!(pm.observe(false, t0 + ms(50)), None);
        assert_eq!(
            pm.observe(false, t0 + DEBOUNCE + ms(1)),
            Some(PresenceEvent::Lost)
        );
    }

    #[test]
    fn countdown_runs_to_capture() {
        let t0 = Instant::now();
        let mut seq = CaptureSequence::new();
        assert_eq!(seq.on_pose_found(t0), SequenceEvent::Prepare);
        assert_eq!(seq.stage(), Stage::Preparing);

        // Nothing before the first step elapses
        assert_eq!(seq.tick(t0 + ms(500)), None);

        let mut t = t0;
        let mut events = Vec::new();
        for _ in 0..4 {
            t += COUNT_STEP;
            events.extend(seq.tick(t));
        }
        assert_eq!(
            events,
            vec![
                SequenceEvent::Count(3),
                SequenceEvent::Count(2),
                SequenceEvent::Count(1),
                SequenceEvent::Capture,
            ]
        );
        assert_eq!(seq.stage(), Stage::Idle);
        assert!(!seq.has_pending_timer());
    }

    #[test]
    fn pose_lost_cancels_from_any_stage() {
        let t0 = Instant::now();

        // Cancel during every reachable stage; no timer may survive
        for steps in 0..4 {
            let mut seq = CaptureSequence::new();
            seq.on_pose_found(t0);
            let mut t = t0;
            for _ in 0..steps {
                t += COUNT_STEP;
                seq.tick(t);
            }
            seq.on_pose_lost();
            assert_eq!(seq.stage(), Stage::Idle);
            assert!(!seq.has_pending_timer());
            // A later tick must not fire anything
            assert_eq!(seq.tick(t + COUNT_STEP * 10), None);
        }
    }

    #[test]
    fn retrigger_replaces_pending_timer() {
        let t0 = Instant::now();
        let mut seq = CaptureSequence::new();
        seq.on_pose_found(t0);
        seq.tick(t0 + COUNT_STEP); // Counting(3)

        // Re-trigger mid-count: chain restarts, old deadline is gone
        seq.on_pose_found(t0 + COUNT_STEP + ms(100));
        assert_eq!(seq.stage(), Stage::Preparing);

        // The old Counting(3) deadline must not fire a stray step
        assert_eq!(seq.tick(t0 + COUNT_STEP + ms(200)), None);
        assert_eq!(
            seq.tick(t0 + COUNT_STEP * 2 + ms(150)),
            Some(SequenceEvent::Count(3))
        );
    }

    #[test]
    fn presence_drives_single_countdown() {
        // Detector returns false three frames, then true: exactly one Found
        let t0 = Instant::now();
        let mut pm = PresenceMachine::new();
        let mut seq = CaptureSequence::new();

        let mut found_events = 0;
        for (i, raw) in [false, false, false, true].iter().enumerate() {
            let now = t0 + DEBOUNCE * (i as u32 + 1) * 2;
            if let Some(event) = pm.observe(*raw, now) {
                match event {
                    PresenceEvent::Found => {
                        found_events += 1;
                        seq.on_pose_found(now);
                    }
                    PresenceEvent::Lost => seq.on_pose_lost(),
                }
            }
        }
        assert_eq!(found_events, 1);
        assert_eq!(seq.stage(), Stage::Preparing);
    }
}
