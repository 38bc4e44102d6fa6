use std::time::Duration;

use porchwatch_types::vision::{BoundingBox, Detection};
use tokio::time::Instant;

/// Arming and confirmation state shared by the capture and sensor loops.
///
/// *disarmed*: `out_of_home == false`.
/// *idle-armed*: out of home, no open window.
/// *watching*: out of home and `now < armed_until`.
#[derive(Debug, Clone, Default)]
pub struct EventWindow {
    out_of_home: bool,
    armed_until: Option<Instant>,
    confirm_counter: u32,
    last_boxes: Vec<BoundingBox>,
}

impl EventWindow {
    pub fn new(out_of_home: bool) -> Self {
        Self {
            out_of_home,
            ..Self::default()
        }
    }

    pub fn out_of_home(&self) -> bool {
        self.out_of_home
    }

    pub fn armed_until(&self) -> Option<Instant> {
        self.armed_until
    }

    pub fn confirm_counter(&self) -> u32 {
        self.confirm_counter
    }

    pub fn last_boxes(&self) -> &[BoundingBox] {
        &self.last_boxes
    }

    /// Returns whether the mode actually changed. Leaving out-of-home mode
    /// drops any partial confirmation run.
    pub fn set_out_of_home(&mut self, state: bool) -> bool {
        let changed = self.out_of_home != state;
        self.out_of_home = state;
        if !state {
            self.confirm_counter = 0;
        }
        changed
    }

    pub fn is_watching(&self, now: Instant) -> bool {
        self.out_of_home && self.armed_until.is_some_and(|until| now < until)
    }

    /// Feed one sensor reading. A reading below `trigger_cm` while out of
    /// home opens (or extends) the window to `now + window`.
    pub fn on_distance(
        &mut self,
        distance_cm: f64,
        trigger_cm: f64,
        now: Instant,
        window: Duration,
    ) -> bool {
        if !self.out_of_home || !(distance_cm < trigger_cm) {
            return false;
        }
        self.armed_until = Some(now + window);
        true
    }

    /// Fold one detection result into the confirmation counter.
    ///
    /// Returns the boxes of the confirming run once `threshold` consecutive
    /// hits have been seen; the counter is reset at that point. Results that
    /// arrive after the window closed are discarded.
    pub fn record_detection(
        &mut self,
        detection: &Detection,
        threshold: u32,
        now: Instant,
    ) -> Option<Vec<BoundingBox>> {
        if !self.is_watching(now) {
            return None;
        }
        if !detection.matched {
            self.confirm_counter = 0;
            return None;
        }
        self.confirm_counter += 1;
        self.last_boxes = detection.boxes.clone();
        if self.confirm_counter < threshold.max(1) {
            return None;
        }
        self.confirm_counter = 0;
        Some(self.last_boxes.clone())
    }
}
