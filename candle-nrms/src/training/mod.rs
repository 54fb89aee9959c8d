//! # Training
//!
//! Learning-rate schedule, ranking metrics, gradient clipping, checkpoint
//! persistence and the fit loop.

pub mod checkpoint;
pub mod config;
pub mod metrics;
pub mod schedule;
pub mod trainer;

pub use checkpoint::{
    CheckpointId, CheckpointManager, CheckpointMetadata, SaveOutcome, CHECKPOINT_FORMAT_VERSION,
};
pub use config::{TrainTarget, TrainingConfig};
pub use metrics::{batch_mrr, mean_reciprocal_rank, rank_of_label, Ewma, RunningAverage};
pub use schedule::{LinearWarmupSchedule, SchedulePhase};
pub use trainer::{
    clip_grad_norm, global_grad_norm, EpochMetrics, EpochSummary, ResumePoint, StepOutcome, Trainer,
    TrainingReport,
};

#[cfg(test)]
mod schedule_test;
