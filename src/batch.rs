/*
 * Copyright (c) Facebook, Inc. and its affiliates.
 *
 * This source code is licensed under both the MIT license found in the
 * LICENSE-MIT file in the root directory of this source tree and the Apache
 * License, Version 2.0 found in the LICENSE-APACHE file in the root directory
 * of this source tree.
 */

//! The batch combinator (§4.F): all-settled, order-preserving aggregation
//! over a collection of mixed values.

use std::time::{Duration, Instant};

use futures::stream::{FuturesUnordered, StreamExt};
use slog::{debug, trace, warn};

use crate::error::{BatchError, BatchFailure, BatchRow, BatchStat};
use crate::mixed::Mixed;
use crate::resolve::resolve_mixed;
use crate::stats::TimedFutureExt;

/// Per-element progress callback. Invoked once each element has settled, in
/// arrival order, with the inter-call delay since the previous tracker
/// invocation (`None` for the first). If the returned mixed value rejects,
/// that rejection is substituted into the recorded row without aborting
/// peers.
pub type BatchTracker<T> = Box<dyn FnMut(usize, &BatchRow<T>, Option<u64>) -> Mixed<()> + Send>;

/// Configuration for [`batch`].
#[derive(Default)]
pub struct BatchOptions<T> {
    /// Optional per-element progress callback.
    pub tracker: Option<BatchTracker<T>>,
    /// Optional structured logger.
    pub logger: Option<slog::Logger>,
}

/// The outcome of a batch call with no failures.
#[derive(Debug)]
pub struct BatchReport<T> {
    /// Index-aligned settlement rows.
    pub rows: Vec<BatchRow<T>>,
    /// Aggregate counts.
    pub stat: BatchStat,
}

/// Drive every element of `values` to settlement concurrently, without
/// short-circuiting on failure, and report an index-aligned outcome.
///
/// An empty `values` resolves synchronously with an empty report and a
/// zero duration (§4.F's synchronous fast path); a `Vec` is already
/// guaranteed to be array-shaped by the type system, so the "non-array
/// input" contract error from the original spec has no Rust counterpart.
pub async fn batch<T>(
    values: Vec<Mixed<T>>,
    options: BatchOptions<T>,
) -> Result<BatchReport<T>, BatchError<T>>
where
    T: Send + 'static,
{
    let total = values.len();
    if total == 0 {
        return Ok(BatchReport {
            rows: Vec::new(),
            stat: BatchStat {
                total: 0,
                succeeded: 0,
                failed: 0,
                duration: Duration::ZERO,
            },
        });
    }

    let (stats, outcome) = run_batch(values, options).timed().await;
    let duration = stats.completion_time;

    match outcome {
        Ok((rows, succeeded)) => Ok(BatchReport {
            rows,
            stat: BatchStat {
                total,
                succeeded,
                failed: 0,
                duration,
            },
        }),
        Err((rows, succeeded, failed)) => Err(BatchError {
            data: rows,
            stat: BatchStat {
                total,
                succeeded,
                failed,
                duration,
            },
        }),
    }
}

/// The element-dispatch loop, timed as a whole by [`batch`] via
/// [`TimedFutureExt::timed`] rather than bracketed by a hand-subtracted
/// pair of `Instant`s.
async fn run_batch<T>(
    values: Vec<Mixed<T>>,
    mut options: BatchOptions<T>,
) -> Result<(Vec<BatchRow<T>>, usize), (Vec<BatchRow<T>>, usize, usize)>
where
    T: Send + 'static,
{
    let total = values.len();
    let mut pending = FuturesUnordered::new();
    for (index, mixed) in values.into_iter().enumerate() {
        pending.push(async move { (index, resolve_mixed(mixed).await) });
    }

    let mut rows: Vec<Option<BatchRow<T>>> = (0..total).map(|_| None).collect();
    let mut succeeded = 0usize;
    let mut failed = 0usize;
    let mut last_tracker_start: Option<Instant> = None;

    while let Some((index, outcome)) = pending.next().await {
        let mut row = match outcome {
            Ok(resolved) => {
                succeeded += 1;
                BatchRow::ok(resolved.value)
            }
            Err(failure) => {
                failed += 1;
                if let Some(logger) = &options.logger {
                    warn!(logger, "batch element failed"; "index" => index);
                }
                BatchRow::err(BatchFailure {
                    error: failure.error,
                    origin: failure.from_rejected_deferred,
                })
            }
        };

        if let Some(logger) = &options.logger {
            debug!(logger, "batch element settled"; "index" => index, "success" => row.success);
        }

        if let Some(tracker) = options.tracker.as_mut() {
            let delay_ms = last_tracker_start.map(|prev| prev.elapsed().as_millis() as u64);
            last_tracker_start = Some(Instant::now());
            if let Err(tracker_failure) = resolve_mixed(tracker(index, &row, delay_ms)).await {
                if row.success {
                    succeeded -= 1;
                    failed += 1;
                }
                if let Some(logger) = &options.logger {
                    warn!(logger, "batch tracker rejected"; "index" => index);
                }
                row = BatchRow::err(BatchFailure {
                    error: tracker_failure.error,
                    origin: false,
                });
            }
        }

        rows[index] = Some(row);
    }

    let rows: Vec<BatchRow<T>> = rows
        .into_iter()
        .map(|row| row.expect("every index settles exactly once"))
        .collect();

    if let Some(logger) = &options.logger {
        trace!(logger, "batch complete"; "total" => total, "failed" => failed);
    }

    if failed == 0 {
        Ok((rows, succeeded))
    } else {
        Err((rows, succeeded, failed))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[tokio::test]
    async fn empty_input_resolves_synchronously() {
        let report = batch::<u32>(Vec::new(), BatchOptions::default())
            .await
            .unwrap();
        assert!(report.rows.is_empty());
        assert_eq!(report.stat.duration, Duration::ZERO);
    }

    #[tokio::test]
    async fn mixed_success_and_failure_is_index_aligned() {
        let values = vec![
            Mixed::value(1u32),
            Mixed::deferred(async { Err(anyhow::anyhow!("bad")) }),
            Mixed::producer(|| Ok(Mixed::value(3))),
            Mixed::deferred(async { Ok(4u32) }),
        ];
        let err = batch(values, BatchOptions::default()).await.unwrap_err();

        assert_eq!(err.stat.total, 4);
        assert_eq!(err.stat.succeeded, 3);
        assert_eq!(err.stat.failed, 1);
        assert_eq!(err.first().to_string(), "bad");
        assert_eq!(
            err.errors().into_iter().map(|e| e.to_string()).collect::<Vec<_>>(),
            vec!["bad".to_string()]
        );

        assert!(err.data[0].success);
        assert_eq!(*err.data[0].result.as_ref().unwrap(), 1);
        assert!(!err.data[1].success);
        let failure = err.data[1].result.as_ref().unwrap_err();
        assert!(failure.origin, "deferred rejection must be tagged as origin");
        assert!(err.data[2].success);
        assert!(err.data[3].success);
    }

    #[tokio::test]
    async fn all_success_resolves_with_report() {
        let values = vec![Mixed::value(1u32), Mixed::value(2), Mixed::value(3)];
        let report = batch(values, BatchOptions::default()).await.unwrap();
        assert_eq!(report.stat.succeeded, 3);
        assert_eq!(report.stat.failed, 0);
        let collected: Vec<u32> = report
            .rows
            .into_iter()
            .map(|row| row.result.unwrap())
            .collect();
        assert_eq!(collected, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn logger_is_accepted_without_panicking() {
        use slog::Drain;
        let decorator = slog_term::PlainDecorator::new(std::io::sink());
        let drain = slog_term::FullFormat::new(decorator).build().fuse();
        let drain = std::sync::Mutex::new(drain).fuse();
        let logger = slog::Logger::root(drain, slog::o!());

        let values = vec![
            Mixed::value(1u32),
            Mixed::deferred(async { Err(anyhow::anyhow!("bad")) }),
        ];
        let err = batch(
            values,
            BatchOptions {
                tracker: None,
                logger: Some(logger),
            },
        )
        .await
        .unwrap_err();
        assert_eq!(err.stat.failed, 1);
    }

    #[tokio::test]
    async fn tracker_rejection_is_substituted_without_aborting_peers() {
        let values = vec![Mixed::value(1u32), Mixed::value(2u32)];
        let tracker: BatchTracker<u32> = Box::new(|index, _row, _delay| {
            if index == 0 {
                Mixed::deferred(async { Err(anyhow::anyhow!("tracker says no")) })
            } else {
                Mixed::value(())
            }
        });
        let err = batch(
            values,
            BatchOptions {
                tracker: Some(tracker),
                logger: None,
            },
        )
        .await
        .unwrap_err();

        assert_eq!(err.stat.failed, 1);
        assert!(!err.data[0].success);
        assert_eq!(
            err.data[0].result.as_ref().unwrap_err().error.to_string(),
            "tracker says no"
        );
        assert!(err.data[1].success);
    }
}
