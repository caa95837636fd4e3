//! Loop region state

/// A `[start, end)` window in seconds
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LoopRegion {
    pub start: f64,
    pub end: f64,
    pub enabled: bool,
}

impl LoopRegion {
    /// The region a freshly loaded song starts with: first quarter, disabled
    pub fn default_for(duration: f64) -> Self {
        Self {
            start: 0.0,
            end: duration / 4.0,
            enabled: false,
        }
    }
}

impl Default for LoopRegion {
    fn default() -> Self {
        Self::default_for(0.0)
    }
}

/// Partial loop update; `None` fields are kept
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct LoopUpdate {
    pub start: Option<f64>,
    pub end: Option<f64>,
    pub enabled: Option<bool>,
}

impl LoopUpdate {
    pub fn range(start: f64, end: f64) -> Self {
        Self {
            start: Some(start),
            end: Some(end),
            enabled: None,
        }
    }

    pub fn enabled(enabled: bool) -> Self {
        Self {
            enabled: Some(enabled),
            ..Default::default()
        }
    }
}

/// Holds the loop region and answers whether playback must wrap
///
/// Values are stored as given; callers clamp drag handles themselves.
#[derive(Debug, Default)]
pub struct LoopController {
    region: LoopRegion,
}

impl LoopController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn region(&self) -> LoopRegion {
        self.region
    }

    pub fn update(&mut self, update: LoopUpdate) {
        if let Some(start) = update.start {
            self.region.start = start;
        }
        if let Some(end) = update.end {
            self.region.end = end;
        }
        if let Some(enabled) = update.enabled {
            self.region.enabled = enabled;
        }
        log::debug!(
            "Loop region {:.3}..{:.3} ({})",
            self.region.start,
            self.region.end,
            if self.region.enabled { "on" } else { "off" }
        );
    }

    /// Discard any previous song's region once a new duration is known
    pub fn reset_for_duration(&mut self, duration: f64) {
        self.region = LoopRegion::default_for(duration);
    }

    /// Position to jump back to when `time` has crossed the loop end
    pub fn wrap_target(&self, time: f64) -> Option<f64> {
        (self.region.enabled && time >= self.region.end).then_some(self.region.start)
    }
}
