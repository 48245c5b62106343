//! Per-frame pipeline state
//!
//! `PipelineState` is the single explicit owner of everything the render
//! loop mutates frame to frame outside the GPU: both feed slots, their
//! presence machines and capture sequences, and the inference scheduling
//! counters. One instance is constructed at setup and threaded through the
//! loop - no module-level state.

use std::time::Instant;

use crate::crop::{FeedSlot, RectF};
use crate::presence::{CaptureSequence, PresenceEvent, PresenceMachine, SequenceEvent};

/// Number of logical feed slots on the output canvas
pub const SLOT_COUNT: usize = 2;

/// Run presence detection every Nth processed frame per the feed schedule
pub const PRESENCE_INTERVAL: u64 = 5;

/// What the render loop should infer this frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FramePlan {
    /// Slot whose crop goes to the segmentation engine
    pub slot: usize,
    /// Whether this job should also run presence detection
    pub run_presence: bool,
}

pub struct PipelineState {
    slots: [FeedSlot; SLOT_COUNT],
    presence: [PresenceMachine; SLOT_COUNT],
    sequences: [CaptureSequence; SLOT_COUNT],
    frame_count: u64,
    presence_cycle: u64,
}

impl PipelineState {
    pub fn new(crops: [RectF; SLOT_COUNT]) -> Self {
        Self {
            slots: [FeedSlot::new(crops[0]), FeedSlot::new(crops[1])],
            presence: [PresenceMachine::new(), PresenceMachine::new()],
            sequences: [CaptureSequence::new(), CaptureSequence::new()],
            frame_count: 0,
            presence_cycle: 0,
        }
    }

    pub fn slot(&self, index: usize) -> &FeedSlot {
        &self.slots[index]
    }

    pub fn slot_mut(&mut self, index: usize) -> &mut FeedSlot {
        &mut self.slots[index]
    }

    pub fn presence(&self, index: usize) -> &PresenceMachine {
        &self.presence[index]
    }

    pub fn sequence(&self, index: usize) -> &CaptureSequence {
        &self.sequences[index]
    }

    /// Re-derive pixel crops and placements for both slots
    pub fn recompute_slots(&mut self, source_w: f32, source_h: f32, half_w: f32, half_h: f32) {
        for slot in &mut self.slots {
            slot.recompute(source_w, source_h, half_w, half_h);
        }
    }

    /// Decide this frame's inference work
    ///
    /// Slots alternate frame by frame; a slot whose previous job is still in
    /// flight is skipped (inference per slot is serialized, never stacked).
    /// Presence piggybacks on every [`PRESENCE_INTERVAL`]th processed frame.
    pub fn plan(&mut self, slot_in_flight: impl Fn(usize) -> bool) -> Option<FramePlan> {
        let slot = (self.frame_count % SLOT_COUNT as u64) as usize;
        self.frame_count = self.frame_count.wrapping_add(1);

        if slot_in_flight(slot) {
            return None;
        }

        let run_presence = self.presence_cycle == 0;
        self.presence_cycle = (self.presence_cycle + 1) % PRESENCE_INTERVAL;

        Some(FramePlan { slot, run_presence })
    }

    /// Feed a raw presence result for a slot
    ///
    /// Routes any committed transition into the slot's capture sequence.
    /// Presence events for slot `i` always drive capture slot `i`.
    pub fn handle_presence(
        &mut self,
        slot: usize,
        found: bool,
        now: Instant,
    ) -> Option<SequenceEvent> {
        let event = self.presence[slot].observe(found, now)?;
        self.route_presence(slot, event, now)
    }

    /// Advance debounce locks and countdown timers
    ///
    /// Returns every sequence event that fired, tagged with its slot.
    pub fn tick(&mut self, now: Instant) -> Vec<(usize, SequenceEvent)> {
        let mut fired = Vec::new();
        for slot in 0..SLOT_COUNT {
            if let Some(event) = self.presence[slot].poll(now) {
                if let Some(seq_event) = self.route_presence(slot, event, now) {
                    fired.push((slot, seq_event));
                }
            }
            if let Some(event) = self.sequences[slot].tick(now) {
                fired.push((slot, event));
            }
        }
        fired
    }

    fn route_presence(
        &mut self,
        slot: usize,
        event: PresenceEvent,
        now: Instant,
    ) -> Option<SequenceEvent> {
        match event {
            PresenceEvent::Found => Some(self.sequences[slot].on_pose_found(now)),
            PresenceEvent::Lost => {
                self.sequences[slot].on_pose_lost();
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::presence::Stage;

    fn state() -> PipelineState {
        PipelineState::new([
            RectF::new(10.0, 5.0, 40.0, 90.0),
            RectF::new(55.0, 5.0, 40.0, 90.0),
        ])
    }

    #[test]
    fn slots_alternate() {
        let mut ps = state();
        let order: Vec<usize> = (0..6)
            .filter_map(|_| ps.plan(|_| false))
            .map(|p| p.slot)
            .collect();
        assert_eq!(order, vec![0, 1, 0, 1, 0, 1]);
    }

    #[test]
    fn in_flight_slot_is_skipped_not_stacked() {
        let mut ps = state();
        // Slot 0 busy: its frames yield no plan, slot 1 still runs
        let plans: Vec<Option<FramePlan>> = (0..4).map(|_| ps.plan(|s| s == 0)).collect();
        assert!(plans[0].is_none());
        assert_eq!(plans[1].map(|p| p.slot), Some(1));
        assert!(plans[2].is_none());
        assert_eq!(plans[3].map(|p| p.slot), Some(1));
    }

    #[test]
    fn presence_runs_every_fifth_processed_frame() {
        let mut ps = state();
        let flags: Vec<bool> = (0..10)
            .filter_map(|_| ps.plan(|_| false))
            .map(|p| p.run_presence)
            .collect();
        assert_eq!(
            flags,
            vec![true, false, false, false, false, true, false, false, false, false]
        );
    }

    #[test]
    fn presence_found_starts_countdown_for_same_slot() {
        let mut ps = state();
        let t0 = Instant::now();
        let event = ps.handle_presence(1, true, t0);
        assert_eq!(event, Some(SequenceEvent::Prepare));
        assert_eq!(ps.sequence(1).stage(), Stage::Preparing);
        assert_eq!(ps.sequence(0).stage(), Stage::Idle);
    }

    #[test]
    fn lost_during_count_cancels_that_slot_only() {
        let mut ps = state();
        let t0 = Instant::now();
        ps.handle_presence(0, true, t0);
        ps.handle_presence(1, true, t0);

        // Slot 0 loses the pose after its debounce lock expires
        let later = t0 + crate::presence::DEBOUNCE * 2;
        ps.handle_presence(0, false, later);
        assert_eq!(ps.sequence(0).stage(), Stage::Idle);
        assert!(!ps.sequence(0).has_pending_timer());
        assert_eq!(ps.sequence(1).stage(), Stage::Preparing);
    }

    #[test]
    fn tick_fires_capture_after_full_countdown() {
        let mut ps = state();
        let t0 = Instant::now();
        ps.handle_presence(0, true, t0);

        let mut captured = false;
        for step in 1..=4 {
            let events = ps.tick(t0 + crate::presence::COUNT_STEP * step);
            for (slot, event) in events {
                assert_eq!(slot, 0);
                if event == SequenceEvent::Capture {
                    captured = true;
                }
            }
        }
        assert!(captured);
    }
}
