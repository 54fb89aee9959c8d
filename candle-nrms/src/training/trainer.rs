//! Training Loop
//!
//! One synchronous forward/backward pass per batch:
//!
//! 1. pairwise scores `[B, K]` in train mode
//! 2. cross-entropy against the label index
//! 3. backpropagation, then global gradient-norm clipping
//! 4. AdamW step at the scheduled learning rate, then one schedule advance
//!
//! A non-finite loss or gradient norm skips steps 3-4 (parameters and the
//! schedule stay untouched), is logged and counted, and training goes on.
//! Checkpoints are taken every `checkpoint_interval` batches and at every
//! epoch end; a failed write never aborts training.

use crate::core::{from_candle_error, UnifiedError, UnifiedResult};
use crate::data::{BatchAssembler, NrmsBatch, Sample, SampleLoader};
use crate::model_architectures::config::ForwardMode;
use crate::model_architectures::nrms::{HistoryTokens, NrmsModel};
use crate::training::checkpoint::{CheckpointId, CheckpointManager, CheckpointMetadata};
use crate::training::config::{TrainTarget, TrainingConfig};
use crate::training::metrics::{batch_mrr, Ewma, RunningAverage};
use crate::training::schedule::LinearWarmupSchedule;
use candle_core::backprop::GradStore;
use candle_core::{Tensor, Var};
use candle_nn::{AdamW, Optimizer, ParamsAdamW};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Clip the global L2 norm of `grads` over `vars` to `max_norm`
///
/// Returns the norm measured before clipping. When that norm is not finite
/// the gradients are left untouched so the caller can discard the step.
pub fn clip_grad_norm(vars: &[Var], grads: &mut GradStore, max_norm: f64) -> UnifiedResult<f64> {
    let norm = global_grad_norm(vars, grads)?;
    if !norm.is_finite() || norm <= max_norm {
        return Ok(norm);
    }

    let scale = max_norm / (norm + 1e-6);
    for var in vars {
        if let Some(grad) = grads.get(var.as_tensor()) {
            let clipped = grad
                .affine(scale, 0.0)
                .map_err(|e| from_candle_error(e, "scale gradient", None))?;
            grads.insert(var.as_tensor(), clipped);
        }
    }
    Ok(norm)
}

/// L2 norm over every gradient present for `vars`
pub fn global_grad_norm(vars: &[Var], grads: &GradStore) -> UnifiedResult<f64> {
    let mut sum_sq = 0f64;
    for var in vars {
        if let Some(grad) = grads.get(var.as_tensor()) {
            let sq = grad
                .sqr()
                .and_then(|g| g.sum_all())
                .and_then(|g| g.to_dtype(candle_core::DType::F64))
                .and_then(|g| g.to_scalar::<f64>())
                .map_err(|e| from_candle_error(e, "gradient norm", None))?;
            sum_sq += sq;
        }
    }
    Ok(sum_sq.sqrt())
}

/// What happened to one training batch
#[derive(Debug)]
pub enum StepOutcome {
    Applied {
        loss: f64,
        mrr: f64,
        grad_norm: f64,
        lr: f64,
    },
    /// Parameters and schedule untouched; `error` is a [`UnifiedError::Training`]
    Skipped {
        error: UnifiedError,
    },
}

/// Size-weighted loss and MRR over one pass
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EpochMetrics {
    pub loss: f64,
    pub mrr: f64,
    pub samples: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EpochSummary {
    pub epoch: usize,
    pub train: Option<EpochMetrics>,
    pub validation: Option<EpochMetrics>,
    pub checkpoint: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrainingReport {
    pub epochs: Vec<EpochSummary>,
    /// Batches attempted across the run
    pub global_step: usize,
    /// Optimizer steps actually applied
    pub applied_steps: usize,
    pub skipped_steps: usize,
    pub failed_checkpoints: usize,
    pub cancelled: bool,
}

/// Where a resumed run picks up, taken from a checkpoint's sidecar
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResumePoint {
    pub epoch: usize,
    /// Set when the checkpoint was taken part-way through `epoch`
    pub step: Option<usize>,
    /// Batches completed before the checkpoint
    pub global_step: usize,
}

impl From<&CheckpointMetadata> for ResumePoint {
    fn from(metadata: &CheckpointMetadata) -> Self {
        Self {
            epoch: metadata.epoch,
            step: metadata.step,
            global_step: metadata.global_step,
        }
    }
}

impl ResumePoint {
    /// First epoch still to run and the batches of it already done
    fn position(&self, batches_per_epoch: usize) -> (usize, usize) {
        let start_epoch = match self.step {
            Some(_) => self.epoch,
            None => self.epoch + 1,
        };
        let done = self
            .global_step
            .saturating_sub(start_epoch.saturating_sub(1) * batches_per_epoch)
            .min(batches_per_epoch);
        (start_epoch, done)
    }
}

pub struct Trainer {
    model: NrmsModel,
    optimizer: AdamW,
    vars: Vec<Var>,
    schedule: LinearWarmupSchedule,
    config: TrainingConfig,
    assembler: BatchAssembler,
    checkpoints: CheckpointManager,
    cancel: Arc<AtomicBool>,
    loss_ewma: Ewma,
    mrr_ewma: Ewma,
    global_step: usize,
    skipped_steps: usize,
    resume: Option<ResumePoint>,
}

impl Trainer {
    pub fn new(model: NrmsModel, config: TrainingConfig, assembler: BatchAssembler) -> UnifiedResult<Self> {
        config.validate()?;
        let vars = model.all_vars();
        let params = ParamsAdamW {
            lr: config.learning_rate,
            beta1: config.beta1,
            beta2: config.beta2,
            eps: config.eps,
            weight_decay: config.weight_decay,
        };
        let optimizer = AdamW::new(vars.clone(), params)
            .map_err(|e| from_candle_error(e, "create AdamW optimizer", None))?;
        Ok(Self {
            model,
            optimizer,
            vars,
            schedule: LinearWarmupSchedule::new(config.learning_rate, config.warmup_fraction, 0),
            checkpoints: CheckpointManager::new(config.checkpoint_dir.clone()),
            loss_ewma: Ewma::new(config.ewma_alpha),
            mrr_ewma: Ewma::new(config.ewma_alpha),
            config,
            assembler,
            cancel: Arc::new(AtomicBool::new(false)),
            global_step: 0,
            skipped_steps: 0,
            resume: None,
        })
    }

    /// Reset the learning-rate schedule for a run of `total_steps` optimizer steps
    pub fn with_total_steps(mut self, total_steps: usize) -> Self {
        self.schedule = LinearWarmupSchedule::new(
            self.config.learning_rate,
            self.config.warmup_fraction,
            total_steps,
        );
        self
    }

    /// Continue epoch and step numbering, the shuffle order and the
    /// learning-rate schedule from a checkpoint on the next `fit`
    pub fn resume_from(mut self, point: ResumePoint) -> Self {
        self.resume = Some(point);
        self
    }

    /// Shared flag; setting it stops training before the next batch
    pub fn cancellation_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    pub fn model(&self) -> &NrmsModel {
        &self.model
    }

    pub fn into_model(self) -> NrmsModel {
        self.model
    }

    pub fn schedule(&self) -> &LinearWarmupSchedule {
        &self.schedule
    }

    pub fn checkpoints(&self) -> &CheckpointManager {
        &self.checkpoints
    }

    pub fn skipped_steps(&self) -> usize {
        self.skipped_steps
    }

    /// Smoothed `(loss, mrr)` for monitoring
    pub fn smoothed_metrics(&self) -> (Option<f64>, Option<f64>) {
        (self.loss_ewma.value(), self.mrr_ewma.value())
    }

    /// Candidate tensors for the configured target
    fn candidates<'b>(&self, batch: &'b NrmsBatch) -> UnifiedResult<(&'b Tensor, &'b Tensor)> {
        match self.config.target {
            TrainTarget::Titles => Ok((&batch.candidate_ids, &batch.candidate_mask)),
            TrainTarget::Topics => match (&batch.candidate_topic_ids, &batch.candidate_topic_mask) {
                (Some(ids), Some(mask)) => Ok((ids, mask)),
                _ => Err(UnifiedError::Data {
                    source_name: "batch".to_string(),
                    reason: "topic target requires samples built with topics".to_string(),
                }),
            },
        }
    }

    /// Loss and MRR for a batch in `mode`, returning the differentiable loss tensor
    fn forward_batch(&self, batch: &NrmsBatch, mode: ForwardMode) -> UnifiedResult<(Tensor, f64, f64)> {
        let (candidate_ids, candidate_mask) = self.candidates(batch)?;
        let history = HistoryTokens::new(&batch.clicked_ids, &batch.clicked_mask);
        let scores = self
            .model
            .score_pairwise(history, candidate_ids, candidate_mask, mode)?;
        let loss = candle_nn::loss::cross_entropy(&scores, &batch.labels)
            .map_err(|e| from_candle_error(e, "cross-entropy loss", None))?;
        let loss_value = loss
            .to_dtype(candle_core::DType::F64)
            .and_then(|l| l.to_scalar::<f64>())
            .map_err(|e| from_candle_error(e, "read loss", None))?;
        let mrr = batch_mrr(&scores, &batch.label_indices()?)?;
        Ok((loss, loss_value, mrr))
    }

    fn skip(&mut self, reason: String) -> StepOutcome {
        self.skipped_steps += 1;
        let error = UnifiedError::Training {
            step: self.global_step,
            reason,
        };
        warn!("Skipping optimizer step: {}", error);
        StepOutcome::Skipped { error }
    }

    /// One optimizer step on `batch`
    pub fn train_step(&mut self, batch: &NrmsBatch) -> UnifiedResult<StepOutcome> {
        let (loss, loss_value, mrr) = self.forward_batch(batch, ForwardMode::Train)?;
        if !loss_value.is_finite() {
            return Ok(self.skip(format!("non-finite loss {}", loss_value)));
        }

        let mut grads = loss
            .backward()
            .map_err(|e| from_candle_error(e, "backward pass", None))?;
        let grad_norm = clip_grad_norm(&self.vars, &mut grads, self.config.grad_clip_norm)?;
        if !grad_norm.is_finite() {
            return Ok(self.skip(format!("non-finite gradient norm {}", grad_norm)));
        }

        let lr = self.schedule.current_lr();
        self.optimizer.set_learning_rate(lr);
        self.optimizer
            .step(&grads)
            .map_err(|e| from_candle_error(e, "optimizer step", None))?;
        self.schedule.advance();

        self.loss_ewma.update(loss_value);
        self.mrr_ewma.update(mrr);
        Ok(StepOutcome::Applied {
            loss: loss_value,
            mrr,
            grad_norm,
            lr,
        })
    }

    /// Loss and MRR over `samples` in eval mode, in order
    pub fn evaluate(&self, samples: &[Sample]) -> UnifiedResult<Option<EpochMetrics>> {
        let mut loss_avg = RunningAverage::default();
        let mut mrr_avg = RunningAverage::default();
        let mut loader = SampleLoader::new(samples, self.config.batch_size, false, self.config.seed);
        for group in loader.epoch() {
            let batch = self.assembler.collate(&group, self.model.device())?;
            let (_loss, loss_value, mrr) = self.forward_batch(&batch, ForwardMode::Eval)?;
            if !loss_value.is_finite() {
                warn!("Non-finite evaluation loss, batch excluded from averages");
                continue;
            }
            loss_avg.add(loss_value, batch.batch_size());
            mrr_avg.add(mrr, batch.batch_size());
        }
        Ok(metrics_from(&loss_avg, &mrr_avg))
    }

    fn save_checkpoint(&mut self, id: CheckpointId) -> Option<PathBuf> {
        self.checkpoints
            .save(&self.model, id, self.global_step)
            .path()
            .map(PathBuf::from)
    }

    /// Train for `config.epochs` epochs, evaluating on `validation` after each
    pub fn fit(&mut self, train: &[Sample], validation: Option<&[Sample]>) -> UnifiedResult<TrainingReport> {
        if train.is_empty() {
            return Err(UnifiedError::Data {
                source_name: "training samples".to_string(),
                reason: "no samples to train on".to_string(),
            });
        }

        let mut loader = SampleLoader::new(train, self.config.batch_size, true, self.config.seed);
        let batches_per_epoch = loader.num_batches();
        let total_steps = self.config.epochs * batches_per_epoch;
        self.schedule = LinearWarmupSchedule::new(
            self.config.learning_rate,
            self.config.warmup_fraction,
            total_steps,
        );

        let (start_epoch, done_in_epoch) = match self.resume.take() {
            Some(point) => {
                let (start_epoch, done) = point.position(batches_per_epoch);
                self.global_step = point.global_step;
                self.schedule.skip_to(point.global_step);
                info!(
                    "Resuming at epoch {} after {} steps ({} batches of it already done)",
                    start_epoch, point.global_step, done
                );
                (start_epoch, done)
            }
            None => (1, 0),
        };
        if start_epoch > self.config.epochs {
            info!(
                "Checkpoint already covers all {} epochs, nothing to train",
                self.config.epochs
            );
        }
        info!(
            "Training on {} samples: {} epochs x {} batches, {} warmup steps",
            train.len(),
            self.config.epochs,
            batches_per_epoch,
            self.schedule.warmup_steps()
        );

        // Replay the shuffles of epochs already trained
        for _ in 1..start_epoch {
            loader.epoch();
        }

        let mut report = TrainingReport::default();
        let failed_before = self.checkpoints.failed_writes();

        'epochs: for epoch in start_epoch..=self.config.epochs {
            let mut loss_avg = RunningAverage::default();
            let mut mrr_avg = RunningAverage::default();
            let skip = if epoch == start_epoch { done_in_epoch } else { 0 };

            for group in loader.epoch().into_iter().skip(skip) {
                if self.cancel.load(Ordering::SeqCst) {
                    info!("Cancellation requested, stopping before step {}", self.global_step);
                    report.cancelled = true;
                    break 'epochs;
                }

                let batch = self.assembler.collate(&group, self.model.device())?;
                let step = self.global_step;
                if let StepOutcome::Applied { loss, mrr, .. } = self.train_step(&batch)? {
                    loss_avg.add(loss, batch.batch_size());
                    mrr_avg.add(mrr, batch.batch_size());
                    report.applied_steps += 1;
                }
                self.global_step += 1;

                if self.config.log_interval > 0 && step % self.config.log_interval == 0 {
                    let (loss, mrr) = self.smoothed_metrics();
                    debug!(
                        step,
                        epoch,
                        loss_ewma = loss.unwrap_or(f64::NAN),
                        mrr_ewma = mrr.unwrap_or(f64::NAN),
                        lr = self.schedule.current_lr(),
                        "train"
                    );
                }

                if self.config.checkpoint_interval > 0 && step % self.config.checkpoint_interval == 0 && step > 0 {
                    self.save_checkpoint(CheckpointId::at_step(epoch, step));
                }
            }

            let train_metrics = metrics_from(&loss_avg, &mrr_avg);
            if let Some(m) = train_metrics {
                info!("Epoch {:02} | Train Loss: {:.4}, Train MRR: {:.4}", epoch, m.loss, m.mrr);
            }

            let validation_metrics = match validation {
                Some(samples) if !samples.is_empty() => self.evaluate(samples)?,
                _ => None,
            };
            if let Some(m) = validation_metrics {
                info!("Epoch {:02} | Val Loss:   {:.4}, Val MRR:   {:.4}", epoch, m.loss, m.mrr);
            }

            let checkpoint = self.save_checkpoint(CheckpointId::epoch_end(epoch));
            report.epochs.push(EpochSummary {
                epoch,
                train: train_metrics,
                validation: validation_metrics,
                checkpoint,
            });
        }

        report.global_step = self.global_step;
        report.skipped_steps = self.skipped_steps;
        report.failed_checkpoints = self.checkpoints.failed_writes() - failed_before;
        Ok(report)
    }
}

fn metrics_from(loss: &RunningAverage, mrr: &RunningAverage) -> Option<EpochMetrics> {
    Some(EpochMetrics {
        loss: loss.mean()?,
        mrr: mrr.mean()?,
        samples: loss.count(),
    })
}
