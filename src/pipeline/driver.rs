//! Pipeline Driver - the micro-batch cycle
//!
//! ```text
//! Idle → FetchingBatches → Ingesting → Finalizing → Writing → CheckpointCommitted → Idle
//! ```
//!
//! Each cycle runs against a clone of the engine. The clone replaces the live
//! engine only after the checkpoint commits, so a cycle aborted by an error or
//! a shutdown leaves memory matching what is persisted, and the retried cycle
//! reprocesses the same batches without double counting. Sinks skip window
//! ends they already committed, which covers the crash between Writing and
//! CheckpointCommitted.

use super::checkpoint::CheckpointStore;
use super::engine::StreamEngine;
use super::error::PipelineError;
use super::error_handler::ExponentialBackoff;
use super::source::{BatchId, BatchSource};
use crate::aggregator_core::{decode_batch, AlertedWindow};
use crate::config::{EngineConfig, RetryPolicy};
use crate::sink_core::{CheckpointedSinkWriter, SinkReport};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleStage {
    Idle,
    FetchingBatches,
    Ingesting,
    Finalizing,
    Writing,
    CheckpointCommitted,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CycleReport {
    pub batches: Vec<BatchId>,
    pub records_merged: usize,
    pub rows_rejected: usize,
    pub late_dropped: usize,
    pub windows_finalized: usize,
    pub alerts: usize,
    pub watermark: i64,
    pub sinks: Vec<(String, SinkReport)>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CycleOutcome {
    NoNewBatches,
    Committed(CycleReport),
    /// Shutdown observed at a stage boundary; nothing from this cycle was kept
    Interrupted(CycleStage),
}

/// Running totals across committed cycles
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PipelineMetrics {
    pub cycles_committed: u64,
    pub batches_consumed: u64,
    pub records_merged: u64,
    pub rows_rejected: u64,
    pub late_dropped: u64,
    pub windows_emitted: u64,
    pub alerts_emitted: u64,
}

impl PipelineMetrics {
    fn record(&mut self, report: &CycleReport) {
        self.cycles_committed += 1;
        self.batches_consumed += report.batches.len() as u64;
        self.records_merged += report.records_merged as u64;
        self.rows_rejected += report.rows_rejected as u64;
        self.late_dropped += report.late_dropped as u64;
        self.windows_emitted += report.windows_finalized as u64;
        self.alerts_emitted += report.alerts as u64;
    }
}

pub struct PipelineDriver {
    source: Box<dyn BatchSource>,
    engine: StreamEngine,
    sinks: Vec<CheckpointedSinkWriter>,
    checkpoint: CheckpointStore,
    cursor: Option<BatchId>,
    max_batches_per_cycle: usize,
    retry: RetryPolicy,
    trigger_interval: Duration,
    stage: CycleStage,
    metrics: PipelineMetrics,
    shutdown: watch::Receiver<bool>,
}

impl PipelineDriver {
    /// Restore cursor and engine state from the checkpoint
    ///
    /// A missing checkpoint starts fresh; an unreadable or incompatible one is an error.
    pub fn new(
        config: &EngineConfig,
        source: Box<dyn BatchSource>,
        sinks: Vec<CheckpointedSinkWriter>,
        checkpoint: CheckpointStore,
        shutdown: watch::Receiver<bool>,
    ) -> Result<Self, PipelineError> {
        config.validate()?;

        let persisted = checkpoint.load()?;
        let engine = match persisted.engine {
            Some(snapshot) => StreamEngine::restore(snapshot, config)?,
            None => StreamEngine::from_config(config),
        };
        let cursor = persisted.source_cursor.map(BatchId);

        match &cursor {
            Some(c) => log::info!(
                "♻️  Resuming after batch {} (watermark {}, {} open windows)",
                c,
                engine.watermark(),
                engine.store().live_windows()
            ),
            None => log::info!("🆕 No checkpoint found, starting from the first batch"),
        }

        Ok(Self {
            source,
            engine,
            sinks,
            checkpoint,
            cursor,
            max_batches_per_cycle: config.max_batches_per_cycle,
            retry: config.retry,
            trigger_interval: Duration::from_millis(config.trigger_interval_ms),
            stage: CycleStage::Idle,
            metrics: PipelineMetrics::default(),
            shutdown,
        })
    }

    pub fn stage(&self) -> CycleStage {
        self.stage
    }

    pub fn cursor(&self) -> Option<&BatchId> {
        self.cursor.as_ref()
    }

    pub fn engine(&self) -> &StreamEngine {
        &self.engine
    }

    pub fn metrics(&self) -> &PipelineMetrics {
        &self.metrics
    }

    fn shutdown_requested(&self) -> bool {
        *self.shutdown.borrow()
    }

    /// Run one micro-batch cycle
    pub async fn run_cycle(&mut self) -> Result<CycleOutcome, PipelineError> {
        self.stage = CycleStage::FetchingBatches;
        let mut batch_ids =
            list_with_retry(self.source.as_ref(), self.cursor.as_ref(), &self.retry).await?;
        batch_ids.truncate(self.max_batches_per_cycle);

        if batch_ids.is_empty() {
            self.stage = CycleStage::Idle;
            return Ok(CycleOutcome::NoNewBatches);
        }

        let mut batches = Vec::with_capacity(batch_ids.len());
        for id in &batch_ids {
            batches.push(read_with_retry(self.source.as_ref(), id, &self.retry).await?);
        }

        if self.shutdown_requested() {
            return Ok(self.interrupt());
        }

        self.stage = CycleStage::Ingesting;
        let mut engine = self.engine.clone();
        let mut report = CycleReport {
            batches: batch_ids.clone(),
            ..CycleReport::default()
        };

        for (id, raw) in batch_ids.iter().zip(&batches) {
            let decoded = decode_batch(raw);
            for err in &decoded.errors {
                log::warn!("⚠️  {}: skipping {}", id, err);
            }

            let stats = engine.ingest_batch(&decoded.records);
            report.records_merged += stats.merged;
            report.late_dropped += stats.late_dropped;
            report.rows_rejected += decoded.errors.len() + stats.overflowed;
        }

        if report.late_dropped > 0 {
            log::warn!(
                "⏰ {} late records dropped this cycle (watermark {})",
                report.late_dropped,
                engine.watermark()
            );
        }

        if self.shutdown_requested() {
            return Ok(self.interrupt());
        }

        self.stage = CycleStage::Finalizing;
        let windows = engine.finalize();
        report.windows_finalized = windows.len();
        report.alerts = windows.iter().filter(|w| !w.alert.is_nominal()).count();
        report.watermark = engine.watermark();

        for window in &windows {
            log::debug!(
                "🪟 [{} .. {}) avg={:.4} max={:.4} n={} {}",
                window.window_start,
                window.window_end,
                window.avg_price,
                window.max_price,
                window.record_count,
                window.alert.as_str()
            );
        }

        if self.shutdown_requested() {
            return Ok(self.interrupt());
        }

        // No shutdown checks from here until the checkpoint commits
        self.stage = CycleStage::Writing;
        for sink in self.sinks.iter_mut() {
            let sink_report = write_with_retry(sink, &windows, &mut self.checkpoint, &self.retry).await?;
            report.sinks.push((sink.name().to_string(), sink_report));
        }

        let cursor = batch_ids.last().cloned();
        commit_with_retry(&mut self.checkpoint, cursor.as_ref(), &engine, &self.retry).await?;

        self.stage = CycleStage::CheckpointCommitted;
        self.engine = engine;
        self.cursor = cursor;
        self.metrics.record(&report);

        log::info!(
            "📊 Cycle committed: batches={} records={} rejected={} late={} windows={} alerts={} watermark={}",
            report.batches.len(),
            report.records_merged,
            report.rows_rejected,
            report.late_dropped,
            report.windows_finalized,
            report.alerts,
            report.watermark
        );

        self.stage = CycleStage::Idle;
        Ok(CycleOutcome::Committed(report))
    }

    /// Drive cycles on the trigger interval until shutdown
    ///
    /// A cycle that exhausts its retries stops the loop with the error.
    pub async fn run(&mut self) -> Result<(), PipelineError> {
        log::info!(
            "🚀 Pipeline running (trigger every {}ms, up to {} batches per cycle, {} sinks)",
            self.trigger_interval.as_millis(),
            self.max_batches_per_cycle,
            self.sinks.len()
        );

        let mut ticker = interval(self.trigger_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            if self.shutdown_requested() {
                break;
            }

            let ticked = tokio::select! {
                _ = ticker.tick() => Some(true),
                changed = self.shutdown.changed() => changed.ok().map(|_| false),
            };

            match ticked {
                // Shutdown sender gone
                None => break,
                Some(false) => continue,
                Some(true) => {}
            }

            if let CycleOutcome::Interrupted(stage) = self.run_cycle().await? {
                log::info!("🛑 Shutdown during {:?}, cycle discarded", stage);
                break;
            }
        }

        log::info!(
            "🛑 Pipeline stopped: cycles={} batches={} records={} windows={} alerts={} late={} rejected={}",
            self.metrics.cycles_committed,
            self.metrics.batches_consumed,
            self.metrics.records_merged,
            self.metrics.windows_emitted,
            self.metrics.alerts_emitted,
            self.metrics.late_dropped,
            self.metrics.rows_rejected
        );

        Ok(())
    }

    fn interrupt(&mut self) -> CycleOutcome {
        let stage = self.stage;
        self.stage = CycleStage::Idle;
        CycleOutcome::Interrupted(stage)
    }
}

async fn list_with_retry(
    source: &dyn BatchSource,
    cursor: Option<&BatchId>,
    policy: &RetryPolicy,
) -> Result<Vec<BatchId>, PipelineError> {
    let mut backoff = ExponentialBackoff::from_policy(policy);
    loop {
        match source.list_new_batches(cursor).await {
            Ok(ids) => return Ok(ids),
            Err(e) => {
                log::warn!("⚠️  Listing batches failed: {}", e);
                if backoff.sleep().await.is_err() {
                    return Err(PipelineError::SourceUnavailable(e));
                }
            }
        }
    }
}

async fn read_with_retry(
    source: &dyn BatchSource,
    id: &BatchId,
    policy: &RetryPolicy,
) -> Result<Vec<u8>, PipelineError> {
    let mut backoff = ExponentialBackoff::from_policy(policy);
    loop {
        match source.read_batch(id).await {
            Ok(raw) => return Ok(raw),
            Err(e) => {
                log::warn!("⚠️  Reading batch {} failed: {}", id, e);
                if backoff.sleep().await.is_err() {
                    return Err(PipelineError::SourceUnavailable(e));
                }
            }
        }
    }
}

async fn write_with_retry(
    sink: &mut CheckpointedSinkWriter,
    windows: &[AlertedWindow],
    checkpoint: &mut CheckpointStore,
    policy: &RetryPolicy,
) -> Result<SinkReport, PipelineError> {
    let mut backoff = ExponentialBackoff::from_policy(policy);
    loop {
        match sink.write(windows, checkpoint).await {
            Ok(report) => return Ok(report),
            Err(e) => {
                log::warn!("⚠️  Sink {} write failed: {}", sink.name(), e);
                if backoff.sleep().await.is_err() {
                    return Err(PipelineError::SinkWriteFailure {
                        sink: sink.name().to_string(),
                        reason: e,
                    });
                }
            }
        }
    }
}

async fn commit_with_retry(
    checkpoint: &mut CheckpointStore,
    cursor: Option<&BatchId>,
    engine: &StreamEngine,
    policy: &RetryPolicy,
) -> Result<(), PipelineError> {
    let snapshot = engine.snapshot();
    let mut backoff = ExponentialBackoff::from_policy(policy);
    loop {
        match checkpoint.commit_cycle(cursor.map(BatchId::as_str), &snapshot) {
            Ok(()) => return Ok(()),
            Err(e) => {
                log::warn!("⚠️  Checkpoint commit failed: {}", e);
                if backoff.sleep().await.is_err() {
                    return Err(PipelineError::Checkpoint(e));
                }
            }
        }
    }
}
