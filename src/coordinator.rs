//! Fan-out of segment jobs onto a per-step worker pool, fan-in in completion order.

use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{mpsc, Arc};
use std::time::Instant;

use thiserror::Error;
use tracing::{debug, error, info};

use crate::aggregate::{aggregate_segment, AggregationError, FeatureTable, TransactionalTable};
use crate::segments::Segment;

#[derive(Debug, Error)]
pub enum CoordinatorError {
    #[error("worker pool width must be >= 1")]
    InvalidWidth,
    #[error("failed to build worker pool for '{table}': {message}")]
    PoolBuild { table: String, message: String },
    #[error("segment '{prefix}' failed: {source}")]
    SegmentFailed {
        prefix: String,
        #[source]
        source: AggregationError,
    },
    #[error("result channel closed with {pending} segment(s) outstanding")]
    ChannelClosed { pending: usize },
}

/// Worker threads owned by one table step. Dropping the pool releases them.
pub struct WorkerPool {
    table: String,
    width: usize,
    pool: rayon::ThreadPool,
}

impl WorkerPool {
    pub fn acquire(table: &str, width: usize) -> Result<Self, CoordinatorError> {
        if width == 0 {
            return Err(CoordinatorError::InvalidWidth);
        }

        let thread_prefix = table.to_string();
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(width)
            .thread_name(move |idx| format!("{thread_prefix}-worker-{idx}"))
            .build()
            .map_err(|err| CoordinatorError::PoolBuild {
                table: table.to_string(),
                message: err.to_string(),
            })?;

        info!(
            component = "coordinator",
            event = "pool.acquired",
            table,
            width
        );

        Ok(Self {
            table: table.to_string(),
            width,
            pool,
        })
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn table(&self) -> &str {
        &self.table
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        info!(
            component = "coordinator",
            event = "pool.released",
            table = %self.table,
            width = self.width
        );
    }
}

type JobResult = (usize, Result<FeatureTable, AggregationError>);

/// Aggregates every segment of `source` on `pool` and returns the feature
/// tables in completion order.
///
/// At most `pool.width()` segment slices exist at any time; the next slice is
/// cut only after a running job reports back. The first failing segment
/// aborts the step.
pub fn run_segments(
    pool: &WorkerPool,
    source: &TransactionalTable,
    segments: &[Segment],
) -> Result<Vec<FeatureTable>, CoordinatorError> {
    let started = Instant::now();
    let (tx, rx) = mpsc::channel::<JobResult>();
    let mut results = Vec::with_capacity(segments.len());
    let mut next = 0;
    let mut in_flight = 0;

    info!(
        component = "coordinator",
        event = "segments.dispatch",
        table = %source.name,
        rows = source.len(),
        segments = segments.len(),
        width = pool.width()
    );

    while next < segments.len() && in_flight < pool.width() {
        dispatch(pool, source, &segments[next], next, &tx)?;
        next += 1;
        in_flight += 1;
    }

    while in_flight > 0 {
        let (ordinal, result) = rx.recv().map_err(|_| CoordinatorError::ChannelClosed {
            pending: in_flight,
        })?;
        in_flight -= 1;
        let segment = &segments[ordinal];

        match result {
            Ok(table) => {
                debug!(
                    component = "coordinator",
                    event = "segment.completed",
                    table = %source.name,
                    prefix = %segment.prefix,
                    entities = table.len(),
                    columns = table.width()
                );
                results.push(table);
            }
            Err(err) => {
                error!(
                    component = "coordinator",
                    event = "segment.failed",
                    table = %source.name,
                    prefix = %segment.prefix,
                    error = %err
                );
                return Err(CoordinatorError::SegmentFailed {
                    prefix: segment.prefix.clone(),
                    source: err,
                });
            }
        }

        if next < segments.len() {
            dispatch(pool, source, &segments[next], next, &tx)?;
            next += 1;
            in_flight += 1;
        }
    }

    info!(
        component = "coordinator",
        event = "segments.collected",
        table = %source.name,
        segments = results.len(),
        elapsed_ms = started.elapsed().as_millis() as u64
    );

    Ok(results)
}

fn dispatch(
    pool: &WorkerPool,
    source: &TransactionalTable,
    segment: &Segment,
    ordinal: usize,
    tx: &mpsc::Sender<JobResult>,
) -> Result<(), CoordinatorError> {
    let slice = source.slice(segment).map_err(|err| {
        error!(
            component = "coordinator",
            event = "segment.failed",
            table = %source.name,
            prefix = %segment.prefix,
            error = %err
        );
        CoordinatorError::SegmentFailed {
            prefix: segment.prefix.clone(),
            source: err,
        }
    })?;

    debug!(
        component = "coordinator",
        event = "segment.dispatched",
        table = %source.name,
        prefix = %segment.prefix,
        predicate = %segment.predicate,
        rows = slice.len()
    );

    let prefix = segment.prefix.clone();
    let recipe = Arc::clone(&segment.recipe);
    let tx = tx.clone();
    pool.pool.spawn(move || {
        let result = catch_unwind(AssertUnwindSafe(|| {
            aggregate_segment(&prefix, ordinal, &slice, &recipe)
        }))
        .unwrap_or_else(|payload| {
            Err(AggregationError::WorkerPanicked(panic_message(payload)))
        });
        // The receiver is gone once the step has already failed.
        let _ = tx.send((ordinal, result));
    });

    Ok(())
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
