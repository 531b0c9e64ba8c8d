/*
 * Copyright (c) Facebook, Inc. and its affiliates.
 *
 * This source code is licensed under both the MIT license found in the
 * LICENSE-MIT file in the root directory of this source tree and the Apache
 * License, Version 2.0 found in the LICENSE-APACHE file in the root directory
 * of this source tree.
 */

//! The sequence combinator (§4.G): a linked, one-at-a-time chain where each
//! call may see the previous call's value.

use std::time::{Duration, Instant};

use slog::{debug, trace, warn};

use crate::error::{SequenceError, SequenceReason};
use crate::mixed::Mixed;
use crate::resolve::resolve_mixed;
use crate::stats::TimedFutureExt;

/// Produces the next element given its index and the previous element's
/// value (`None` at index 0), and the delay since the previous `source`
/// call started. Signals the end of the sequence with `Mixed::value(None)`.
pub type SourceFn<T> =
    Box<dyn FnMut(usize, Option<T>, Option<u64>) -> Mixed<Option<T>> + Send>;

/// Consumes one produced element. The delay is since the previous `dest`
/// call started (`None` for the first call).
pub type SinkFn<T> = Box<dyn FnMut(usize, &T, Option<u64>) -> Mixed<()> + Send>;

/// Configuration for [`sequence`].
pub struct SequenceOptions<T> {
    /// Optional sink invoked with each produced element.
    pub dest: Option<SinkFn<T>>,
    /// Stop after this many elements. Zero means unbounded.
    pub limit: usize,
    /// Collect every produced element into the outcome instead of only a
    /// count.
    pub track: bool,
    /// Optional structured logger.
    pub logger: Option<slog::Logger>,
}

impl<T> Default for SequenceOptions<T> {
    fn default() -> Self {
        SequenceOptions {
            dest: None,
            limit: 0,
            track: false,
            logger: None,
        }
    }
}

/// The outcome of a completed [`sequence`] call.
#[derive(Debug)]
pub enum SequenceOutcome<T> {
    /// `track` was false: only the number of elements produced.
    Count {
        /// Total elements produced.
        total: usize,
        /// Wall-clock time from the first `source` call to completion.
        duration: Duration,
    },
    /// `track` was true: every produced element, in order.
    Tracked {
        /// Every produced element, in order.
        items: Vec<T>,
        /// Wall-clock time from the first `source` call to completion.
        duration: Duration,
    },
}

/// Drive `source` one element at a time, optionally forwarding each element
/// to `dest`, until `source` signals the end or `limit` elements have been
/// produced.
///
/// Plain, non-delayed elements still cede the executor between iterations
/// (the stack-guard of §4.G): unlike a promise-chain recursion, a Rust
/// `loop` never grows the stack, but a long run of synchronous elements
/// would otherwise starve its Tokio worker thread of fairness.
pub async fn sequence<T>(
    source: SourceFn<T>,
    options: SequenceOptions<T>,
) -> Result<SequenceOutcome<T>, SequenceError>
where
    T: Clone + Send + 'static,
{
    let (stats, outcome) = run_sequence(source, options).timed().await;
    let duration = stats.completion_time;
    match outcome {
        Ok(Inner::Count(total)) => Ok(SequenceOutcome::Count { total, duration }),
        Ok(Inner::Tracked(items)) => Ok(SequenceOutcome::Tracked { items, duration }),
        Err(mut err) => {
            err.duration = duration;
            Err(err)
        }
    }
}

enum Inner<T> {
    Count(usize),
    Tracked(Vec<T>),
}

/// The one-at-a-time loop, timed as a whole by [`sequence`] via
/// [`TimedFutureExt::timed`]; the `duration` field of any returned
/// [`SequenceError`] is a placeholder overwritten by the caller once the
/// overall future has settled.
async fn run_sequence<T>(
    mut source: SourceFn<T>,
    mut options: SequenceOptions<T>,
) -> Result<Inner<T>, SequenceError>
where
    T: Clone + Send + 'static,
{
    let mut index = 0usize;
    let mut last_value: Option<T> = None;
    let mut last_source_start: Option<Instant> = None;
    let mut last_sink_start: Option<Instant> = None;
    let mut items: Vec<T> = Vec::new();

    loop {
        let source_delay = last_source_start.map(|start| start.elapsed().as_millis() as u64);
        last_source_start = Some(Instant::now());

        let produced = match resolve_mixed(source(index, last_value.clone(), source_delay)).await
        {
            Ok(resolved) => resolved,
            Err(failure) => {
                let reason = if failure.from_rejected_deferred {
                    SequenceReason::SourceRejected
                } else {
                    SequenceReason::SourceFailed
                };
                if let Some(logger) = &options.logger {
                    warn!(logger, "sequence source failed"; "index" => index, "reason" => reason.code());
                }
                return Err(SequenceError {
                    error: failure.error,
                    index,
                    duration: Duration::ZERO,
                    reason,
                });
            }
        };

        let value = match produced.value {
            None => {
                if let Some(logger) = &options.logger {
                    trace!(logger, "sequence complete"; "total" => index);
                }
                return Ok(finish(options.track, items, index));
            }
            Some(value) => value,
        };

        if options.track {
            items.push(value.clone());
        }

        let mut guard_delayed = produced.delayed;
        if let Some(sink) = options.dest.as_mut() {
            let sink_delay = last_sink_start.map(|start| start.elapsed().as_millis() as u64);
            last_sink_start = Some(Instant::now());
            match resolve_mixed(sink(index, &value, sink_delay)).await {
                Ok(resolved) => guard_delayed = resolved.delayed,
                Err(failure) => {
                    let reason = if failure.from_rejected_deferred {
                        SequenceReason::SinkRejected
                    } else {
                        SequenceReason::SinkFailed
                    };
                    if let Some(logger) = &options.logger {
                        warn!(logger, "sequence sink failed"; "index" => index, "reason" => reason.code());
                    }
                    return Err(SequenceError {
                        error: failure.error,
                        index,
                        duration: Duration::ZERO,
                        reason,
                    });
                }
            }
        }

        if let Some(logger) = &options.logger {
            debug!(logger, "sequence iteration complete"; "index" => index);
        }

        last_value = Some(value);
        let next_index = index + 1;

        if options.limit > 0 && next_index >= options.limit {
            if let Some(logger) = &options.logger {
                trace!(logger, "sequence hit its limit"; "limit" => options.limit);
            }
            return Ok(finish(options.track, items, next_index));
        }

        index = next_index;
        if !guard_delayed {
            tokio::task::yield_now().await;
        }
    }
}

fn finish<T>(track: bool, items: Vec<T>, total: usize) -> Inner<T> {
    if track {
        Inner::Tracked(items)
    } else {
        Inner::Count(total)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn counts_without_tracking() {
        let source: SourceFn<u32> = Box::new(|index, _prev, _delay| {
            if index < 3 {
                Mixed::value(Some(index as u32))
            } else {
                Mixed::value(None)
            }
        });
        let outcome = sequence(source, SequenceOptions::default()).await.unwrap();
        match outcome {
            SequenceOutcome::Count { total, .. } => assert_eq!(total, 3),
            SequenceOutcome::Tracked { .. } => panic!("expected a count outcome"),
        }
    }

    #[tokio::test]
    async fn tracks_every_produced_element() {
        let source: SourceFn<u32> = Box::new(|index, _prev, _delay| {
            if index < 3 {
                Mixed::value(Some(index as u32))
            } else {
                Mixed::value(None)
            }
        });
        let outcome = sequence(
            source,
            SequenceOptions {
                track: true,
                ..SequenceOptions::default()
            },
        )
        .await
        .unwrap();
        match outcome {
            SequenceOutcome::Tracked { items, .. } => assert_eq!(items, vec![0, 1, 2]),
            SequenceOutcome::Count { .. } => panic!("expected a tracked outcome"),
        }
    }

    #[tokio::test]
    async fn limit_stops_the_sequence_early() {
        let source: SourceFn<u32> = Box::new(|index, _prev, _delay| Mixed::value(Some(index as u32)));
        let outcome = sequence(
            source,
            SequenceOptions {
                limit: 2,
                ..SequenceOptions::default()
            },
        )
        .await
        .unwrap();
        match outcome {
            SequenceOutcome::Count { total, .. } => assert_eq!(total, 2),
            SequenceOutcome::Tracked { .. } => panic!("expected a count outcome"),
        }
    }

    #[tokio::test]
    async fn previous_value_is_threaded_into_the_next_call() {
        let source: SourceFn<u32> = Box::new(|index, prev, _delay| {
            if index >= 4 {
                return Mixed::value(None);
            }
            Mixed::value(Some(prev.unwrap_or(0) + 1))
        });
        let outcome = sequence(
            source,
            SequenceOptions {
                track: true,
                ..SequenceOptions::default()
            },
        )
        .await
        .unwrap();
        match outcome {
            SequenceOutcome::Tracked { items, .. } => assert_eq!(items, vec![1, 2, 3, 4]),
            SequenceOutcome::Count { .. } => panic!("expected a tracked outcome"),
        }
    }

    #[tokio::test]
    async fn sink_failure_surfaces_as_sequence_error() {
        let source: SourceFn<u32> = Box::new(|index, _prev, _delay| Mixed::value(Some(index as u32)));
        let sink: SinkFn<u32> = Box::new(|_index, _value, _delay| {
            Mixed::deferred(async { Err(anyhow::anyhow!("sink blew up")) })
        });
        let err = sequence(
            source,
            SequenceOptions {
                dest: Some(sink),
                ..SequenceOptions::default()
            },
        )
        .await
        .unwrap_err();
        assert_eq!(err.reason, SequenceReason::SinkRejected);
        assert_eq!(err.index, 0);
    }

    #[tokio::test]
    async fn source_throwing_is_tagged_as_failed_not_rejected() {
        let source: SourceFn<u32> =
            Box::new(|_index, _prev, _delay| Mixed::producer(|| Err(anyhow::anyhow!("boom"))));
        let err = sequence(source, SequenceOptions::default())
            .await
            .unwrap_err();
        assert_eq!(err.reason, SequenceReason::SourceFailed);
    }

    #[tokio::test]
    async fn synchronous_run_still_yields_between_iterations() {
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_in_source = Arc::clone(&calls);
        let source: SourceFn<u32> = Box::new(move |index, _prev, _delay| {
            calls_in_source.fetch_add(1, Ordering::SeqCst);
            if index < 50 {
                Mixed::value(Some(index as u32))
            } else {
                Mixed::value(None)
            }
        });
        let outcome = sequence(source, SequenceOptions::default()).await.unwrap();
        match outcome {
            SequenceOutcome::Count { total, .. } => assert_eq!(total, 50),
            SequenceOutcome::Tracked { .. } => panic!("expected a count outcome"),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 51);
    }
}
