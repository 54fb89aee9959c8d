//! Linear warmup / linear decay learning-rate schedule
//!
//! ```text
//! lr(s) = peak · s / w                 s <  w     (Warmup)
//! lr(s) = peak · (T − s) / (T − w)     w <= s < T (Decay)
//! lr(s) = 0                            s >= T     (Done)
//! ```
//!
//! `s` counts applied optimizer steps. The schedule advances exactly once
//! per applied step; a skipped step leaves it where it is.

/// Where the schedule currently is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulePhase {
    Warmup,
    Decay,
    Done,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LinearWarmupSchedule {
    peak_lr: f64,
    warmup_steps: usize,
    total_steps: usize,
    step: usize,
}

impl LinearWarmupSchedule {
    /// `warmup_steps = floor(warmup_fraction · total_steps)`
    pub fn new(peak_lr: f64, warmup_fraction: f64, total_steps: usize) -> Self {
        let warmup_steps = ((warmup_fraction.clamp(0.0, 1.0) * total_steps as f64).floor() as usize).min(total_steps);
        Self {
            peak_lr,
            warmup_steps,
            total_steps,
            step: 0,
        }
    }

    pub fn peak_lr(&self) -> f64 {
        self.peak_lr
    }

    pub fn warmup_steps(&self) -> usize {
        self.warmup_steps
    }

    pub fn total_steps(&self) -> usize {
        self.total_steps
    }

    /// Applied optimizer steps so far
    pub fn step(&self) -> usize {
        self.step
    }

    pub fn phase(&self) -> SchedulePhase {
        if self.step >= self.total_steps {
            SchedulePhase::Done
        } else if self.step < self.warmup_steps {
            SchedulePhase::Warmup
        } else {
            SchedulePhase::Decay
        }
    }

    /// Learning rate for step `s`
    pub fn lr_at(&self, s: usize) -> f64 {
        if s >= self.total_steps {
            return 0.0;
        }
        if s < self.warmup_steps {
            return self.peak_lr * s as f64 / self.warmup_steps as f64;
        }
        let remaining = (self.total_steps - s) as f64;
        let decay_span = (self.total_steps - self.warmup_steps).max(1) as f64;
        self.peak_lr * remaining / decay_span
    }

    /// Learning rate for the next optimizer step
    pub fn current_lr(&self) -> f64 {
        self.lr_at(self.step)
    }

    /// Continue from `step` applied optimizer steps, as when resuming a run
    pub fn skip_to(&mut self, step: usize) {
        self.step = step;
    }

    /// Record one applied optimizer step, returning the next step's learning rate
    pub fn advance(&mut self) -> f64 {
        self.step = self.step.saturating_add(1);
        self.current_lr()
    }
}
