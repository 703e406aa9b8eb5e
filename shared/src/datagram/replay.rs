/// High-water mark of accepted inbound sequence numbers.
///
/// Sequences start at 1; anything at or below the mark is a replay or a late duplicate.
#[derive(Debug, Default)]
pub struct ReplayWindow {
    high_water: u64,
}

impl ReplayWindow {
    pub fn new() -> Self {
        Self::default()
    }

    /// Advances the mark and returns `true` if `sequence` has not been seen before
    pub fn accept(&mut self, sequence: u64) -> bool {
        if sequence <= self.high_water {
            return false;
        }
        self.high_water = sequence;
        true
    }

    pub fn high_water(&self) -> u64 {
        self.high_water
    }
}
