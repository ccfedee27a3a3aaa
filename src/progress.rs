//! Load progress reporting.
//!
//! The orchestrator hands every load a [`ProgressReporter`] and assigns it a
//! percent window per step (fetching, decoding). Decoders split their window
//! further into stages. Whatever the decoders report, the sequence delivered
//! to the callback never decreases and `100` is delivered exactly once, by
//! [`ProgressReporter::finish`].

/// One progress notification.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LoadProgress {
    pub loaded: u64,
    pub total: u64,
    /// Always within `0..=100`.
    pub percent: u8,
}

pub type ProgressCallback = Box<dyn FnMut(LoadProgress) + Send>;

pub struct ProgressReporter {
    sink: Option<ProgressCallback>,
    window: (f64, f64),
    stage: (f64, f64),
    last_percent: Option<u8>,
    finished: bool,
}

impl ProgressReporter {
    pub fn new(sink: Option<ProgressCallback>) -> Self {
        Self {
            sink,
            window: (0.0, 100.0),
            stage: (0.0, 1.0),
            last_percent: None,
            finished: false,
        }
    }

    /// A reporter that drops every notification.
    pub fn silent() -> Self {
        Self::new(None)
    }

    /// Restricts subsequent updates to the absolute percent range `lo..hi`.
    pub fn set_window(&mut self, lo: u8, hi: u8) {
        let lo = f64::from(lo.min(100));
        let hi = f64::from(hi.min(100)).max(lo);
        self.window = (lo, hi);
        self.stage = (0.0, 1.0);
    }

    /// Selects the fraction `start..end` of the current window for subsequent updates.
    pub fn set_stage(&mut self, start: f64, end: f64) {
        let start = start.clamp(0.0, 1.0);
        let end = end.clamp(start, 1.0);
        self.stage = (start, end);
    }

    /// Reports `loaded` of `total` units of the current stage.
    pub fn update(&mut self, loaded: u64, total: u64) {
        if self.finished {
            return;
        }
        let fraction = if total == 0 {
            0.0
        } else {
            (loaded as f64 / total as f64).clamp(0.0, 1.0)
        };
        let within_window = self.stage.0 + (self.stage.1 - self.stage.0) * fraction;
        let percent = self.window.0 + (self.window.1 - self.window.0) * within_window;
        // 100 is reserved for `finish`.
        let percent = (percent.floor() as u8).min(99);
        self.emit(LoadProgress {
            loaded,
            total,
            percent,
        });
    }

    /// Marks the current stage as complete.
    pub fn complete_stage(&mut self) {
        self.update(1, 1);
    }

    /// Emits the terminal 100 % notification. Only the first call has an effect.
    pub fn finish(&mut self, total: u64) {
        if self.finished {
            return;
        }
        self.finished = true;
        if let Some(sink) = self.sink.as_mut() {
            sink(LoadProgress {
                loaded: total,
                total,
                percent: 100,
            });
        }
        self.last_percent = Some(100);
    }

    fn emit(&mut self, progress: LoadProgress) {
        if self
            .last_percent
            .is_some_and(|last| progress.percent < last)
        {
            return;
        }
        self.last_percent = Some(progress.percent);
        if let Some(sink) = self.sink.as_mut() {
            sink(progress);
        }
    }
}

impl Default for ProgressReporter {
    fn default() -> Self {
        Self::silent()
    }
}

impl std::fmt::Debug for ProgressReporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressReporter")
            .field("window", &self.window)
            .field("stage", &self.stage)
            .field("last_percent", &self.last_percent)
            .field("finished", &self.finished)
            .finish()
    }
}
