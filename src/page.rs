/*
 * Copyright (c) Facebook, Inc. and its affiliates.
 *
 * This source code is licensed under both the MIT license found in the
 * LICENSE-MIT file in the root directory of this source tree and the Apache
 * License, Version 2.0 found in the LICENSE-APACHE file in the root directory
 * of this source tree.
 */

//! The page combinator (§4.H): batches elements a page at a time, reusing
//! the batch combinator for each page's all-settled aggregation.

use std::time::{Duration, Instant};

use slog::{debug, trace, warn};

use crate::batch::{batch, BatchOptions};
use crate::error::{BatchRow, PageError, PageFailurePoint, PageReason, PrettyError};
use crate::mixed::Mixed;
use crate::resolve::resolve_mixed;
use crate::stats::TimedFutureExt;

/// What a page's `source` callback produced.
///
/// The original spec distinguishes "undefined" (done), an array (a page),
/// and anything else (a contract violation, reason code 5) at runtime; a
/// closed enum makes all three arms explicit instead of relying on a
/// dynamic shape check that Rust's type system would otherwise rule out by
/// construction.
pub enum PageSourceResult<T> {
    /// No more pages.
    Done,
    /// The next page's elements.
    Page(Vec<Mixed<T>>),
    /// The source violated its contract.
    NotAnArray,
}

/// Produces the next page given its index and the previous page's
/// settlement rows (`None` at index 0), and the delay since the previous
/// `source` call started.
pub type PageSourceFn<T> =
    Box<dyn FnMut(usize, Option<&[BatchRow<T>]>, Option<u64>) -> Mixed<PageSourceResult<T>> + Send>;

/// Consumes one page's settlement rows. The delay is since the previous
/// `dest` call started.
pub type PageSinkFn<T> = Box<dyn FnMut(usize, &[BatchRow<T>], Option<u64>) -> Mixed<()> + Send>;

/// Configuration for [`page`].
pub struct PageOptions<T> {
    /// Optional sink invoked with each page's settlement rows.
    pub dest: Option<PageSinkFn<T>>,
    /// Stop after this many pages. Zero means unbounded.
    pub limit: usize,
    /// Optional structured logger, threaded into each page's [`batch`] call.
    pub logger: Option<slog::Logger>,
}

impl<T> Default for PageOptions<T> {
    fn default() -> Self {
        PageOptions {
            dest: None,
            limit: 0,
            logger: None,
        }
    }
}

/// The outcome of a completed [`page`] call.
#[derive(Debug, Clone, Copy)]
pub struct PageReport {
    /// Number of pages produced.
    pub pages: usize,
    /// Total elements across every page.
    pub total: usize,
    /// Wall-clock time from the first `source` call to completion.
    pub duration: Duration,
}

/// Drive `source` one page at a time, batching each page's elements and
/// optionally forwarding the settlement rows to `dest`, until `source`
/// signals the end or `limit` pages have been produced.
pub async fn page<T>(
    source: PageSourceFn<T>,
    options: PageOptions<T>,
) -> Result<PageReport, PageError<T>>
where
    T: Send + 'static,
{
    let (stats, outcome) = run_page(source, options).timed().await;
    let duration = stats.completion_time;
    match outcome {
        Ok((pages, total)) => Ok(PageReport {
            pages,
            total,
            duration,
        }),
        Err(mut err) => {
            err.duration = duration;
            Err(err)
        }
    }
}

/// The page-at-a-time loop, timed as a whole by [`page`] via
/// [`TimedFutureExt::timed`]; the `duration` field of any returned
/// [`PageError`] is a placeholder overwritten by the caller once the
/// overall future has settled.
async fn run_page<T>(
    mut source: PageSourceFn<T>,
    mut options: PageOptions<T>,
) -> Result<(usize, usize), PageError<T>>
where
    T: Send + 'static,
{
    let mut index = 0usize;
    let mut pages = 0usize;
    let mut total = 0usize;
    let mut previous_rows: Option<Vec<BatchRow<T>>> = None;
    let mut last_source_start: Option<Instant> = None;
    let mut last_sink_start: Option<Instant> = None;

    loop {
        let source_delay = last_source_start.map(|start| start.elapsed().as_millis() as u64);
        last_source_start = Some(Instant::now());

        let resolved = match resolve_mixed(source(index, previous_rows.as_deref(), source_delay))
            .await
        {
            Ok(resolved) => resolved,
            Err(failure) => {
                let reason = if failure.from_rejected_deferred {
                    PageReason::SourceRejected
                } else {
                    PageReason::SourceFailed
                };
                if let Some(logger) = &options.logger {
                    warn!(logger, "page source failed"; "index" => index, "reason" => reason.code());
                }
                return Err(PageError {
                    error: failure.error,
                    index,
                    duration: Duration::ZERO,
                    reason,
                    point: PageFailurePoint::Source(previous_rows.take()),
                });
            }
        };
        let source_delayed = resolved.delayed;

        let elements = match resolved.value {
            PageSourceResult::Done => {
                if let Some(logger) = &options.logger {
                    trace!(logger, "page complete"; "pages" => pages, "total" => total);
                }
                return Ok((pages, total));
            }
            PageSourceResult::NotAnArray => {
                if let Some(logger) = &options.logger {
                    warn!(logger, "page source returned a non-array value"; "index" => index);
                }
                return Err(PageError {
                    error: anyhow::anyhow!("source returned a non-array, non-undefined value"),
                    index,
                    duration: Duration::ZERO,
                    reason: PageReason::SourceNotAnArray,
                    point: PageFailurePoint::Source(previous_rows.take()),
                });
            }
            PageSourceResult::Page(elements) => elements,
        };

        let page_len = elements.len();
        let batch_report = match batch(
            elements,
            BatchOptions {
                tracker: None,
                logger: options.logger.clone(),
            },
        )
        .await
        {
            Ok(report) => report,
            Err(batch_err) => {
                if let Some(logger) = &options.logger {
                    warn!(logger, "page batch rejected"; "index" => index);
                }
                return Err(PageError {
                    error: anyhow::anyhow!("{}", batch_err.pretty(0)),
                    index,
                    duration: Duration::ZERO,
                    reason: PageReason::BatchRejected,
                    point: PageFailurePoint::BatchRejected,
                });
            }
        };

        pages += 1;
        total += page_len;

        let mut guard_delayed = source_delayed;
        if let Some(sink) = options.dest.as_mut() {
            let sink_delay = last_sink_start.map(|start| start.elapsed().as_millis() as u64);
            last_sink_start = Some(Instant::now());
            match resolve_mixed(sink(index, &batch_report.rows, sink_delay)).await {
                Ok(resolved) => guard_delayed = resolved.delayed,
                Err(failure) => {
                    let reason = if failure.from_rejected_deferred {
                        PageReason::SinkRejected
                    } else {
                        PageReason::SinkFailed
                    };
                    if let Some(logger) = &options.logger {
                        warn!(logger, "page sink failed"; "index" => index, "reason" => reason.code());
                    }
                    return Err(PageError {
                        error: failure.error,
                        index,
                        duration: Duration::ZERO,
                        reason,
                        point: PageFailurePoint::Dest(batch_report.rows),
                    });
                }
            }
        }

        if let Some(logger) = &options.logger {
            debug!(logger, "page iteration complete"; "index" => index, "elements" => page_len);
        }

        previous_rows = Some(batch_report.rows);
        let next_index = index + 1;

        if options.limit > 0 && next_index >= options.limit {
            if let Some(logger) = &options.logger {
                trace!(logger, "page hit its limit"; "limit" => options.limit);
            }
            return Ok((pages, total));
        }

        index = next_index;
        if !guard_delayed {
            tokio::task::yield_now().await;
        }
    }
}
