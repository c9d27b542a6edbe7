//! Decaying activation counter that gates the interrupt.

/// Requires sustained speech before firing.
///
/// +1 (capped at the threshold) on an active frame, -1 (floored at 0) on an
/// inactive one. When the count reaches the threshold the counter reports a
/// trigger and steps back by one, so continued speech keeps re-triggering
/// every frame while a single noisy frame never does.
#[derive(Debug, Clone)]
pub struct ActivationCounter {
    count: u32,
    threshold: u32,
}

impl ActivationCounter {
    pub fn new(threshold: u32) -> Self {
        Self {
            count: 0,
            threshold: threshold.max(1),
        }
    }

    /// Feed one frame's verdict. Returns `true` when the threshold is reached.
    pub fn observe(&mut self, active: bool) -> bool {
        if active {
            self.count = (self.count + 1).min(self.threshold);
        } else {
            self.count = self.count.saturating_sub(1);
        }
        if self.count >= self.threshold {
            self.count -= 1;
            return true;
        }
        false
    }

    pub fn count(&self) -> u32 {
        self.count
    }

    pub fn threshold(&self) -> u32 {
        self.threshold
    }

    pub fn reset(&mut self) {
        self.count = 0;
    }
}
