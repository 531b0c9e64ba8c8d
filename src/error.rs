/*
 * Copyright (c) Facebook, Inc. and its affiliates.
 *
 * This source code is licensed under both the MIT license found in the
 * LICENSE-MIT file in the root directory of this source tree and the Apache
 * License, Version 2.0 found in the LICENSE-APACHE file in the root directory
 * of this source tree.
 */

//! Structured errors shared by every driver, per §4.E.

use std::fmt;
use std::time::Duration;

use thiserror::Error;

const INDENT: &str = "  ";

fn indent(level: usize) -> String {
    INDENT.repeat(level)
}

/// Pretty-prints a library error at increasing indentation, recursing into
/// nested causes of the library's own error kinds and falling back to the
/// foreign error's own `Display` (the Rust stand-in for "the host's
/// standard inspector") otherwise.
pub trait PrettyError {
    /// Render this error indented `level` levels deep.
    fn pretty(&self, level: usize) -> String;
}

/// Recurses into a nested cause if it happens to be one of this crate's own
/// non-generic error kinds, otherwise falls back to the foreign error's own
/// `Display` (the stand-in for "the host's standard inspector").
///
/// [`BatchError`] and [`PageError`] are generic over the element type, so
/// they cannot be recovered from a type-erased [`anyhow::Error`] by
/// downcasting for an arbitrary element type; callers that embed one of
/// those as another error's cause pre-render it with [`PrettyError::pretty`]
/// at construction time instead (see `page::page`'s reason-0 case).
fn pretty_cause(cause: &anyhow::Error, level: usize) -> String {
    if let Some(seq) = cause.downcast_ref::<SequenceError>() {
        return seq.pretty(level);
    }
    format!("{}{:#}", indent(level), cause)
}

/// One row of a [`BatchError`]/successful batch outcome, index-aligned to
/// the input the batch combinator was given.
#[derive(Debug)]
pub struct BatchRow<T> {
    /// Whether this element settled successfully.
    pub success: bool,
    /// The settled value, or the failure that prevented settlement.
    pub result: Result<T, BatchFailure>,
}

impl<T> BatchRow<T> {
    pub(crate) fn ok(value: T) -> Self {
        BatchRow {
            success: true,
            result: Ok(value),
        }
    }

    pub(crate) fn err(failure: BatchFailure) -> Self {
        BatchRow {
            success: false,
            result: Err(failure),
        }
    }
}

/// The failure recorded in a [`BatchRow`].
pub struct BatchFailure {
    /// The underlying cause.
    pub error: anyhow::Error,
    /// True iff the element was a deferred that resolved to a rejection
    /// (as opposed to a producer invocation that returned `Err`, or a
    /// tracker callback substituting its own rejection into the row).
    pub origin: bool,
}

/// Aggregate counts for a completed batch.
#[derive(Debug, Clone, Copy)]
pub struct BatchStat {
    /// Number of elements submitted.
    pub total: usize,
    /// Number that settled successfully.
    pub succeeded: usize,
    /// Number that failed.
    pub failed: usize,
    /// Wall-clock time from dispatch to the last settlement.
    pub duration: Duration,
}

/// Raised when one or more elements of a [`crate::batch::batch`] call
/// failed to settle. All-settled: the error still carries every row,
/// successes included.
#[derive(Error, Debug)]
#[error("batch failed: {} of {} elements failed", stat.failed, stat.total)]
pub struct BatchError<T> {
    /// Every row, in input-index order.
    pub data: Vec<BatchRow<T>>,
    /// Aggregate counts.
    pub stat: BatchStat,
}

impl<T> BatchError<T> {
    /// The first failure's cause, in index order.
    pub fn first(&self) -> &anyhow::Error {
        &self
            .data
            .iter()
            .find_map(|row| row.result.as_ref().err())
            .expect("BatchError must have at least one failed row")
            .error
    }

    /// Every failure's cause, in index order.
    pub fn errors(&self) -> Vec<&anyhow::Error> {
        self.data
            .iter()
            .filter_map(|row| row.result.as_ref().err())
            .map(|failure| &failure.error)
            .collect()
    }
}

impl<T> PrettyError for BatchError<T> {
    fn pretty(&self, level: usize) -> String {
        let mut out = format!(
            "{}BatchError: {}/{} failed ({:?})\n",
            indent(level),
            self.stat.failed,
            self.stat.total,
            self.stat.duration
        );
        for (index, row) in self.data.iter().enumerate() {
            if let Err(failure) = &row.result {
                out.push_str(&format!(
                    "{}[{}] {}\n",
                    indent(level + 1),
                    index,
                    pretty_cause(&failure.error, level + 2)
                ));
            }
        }
        out
    }
}

/// Which side of a page iteration produced the failure, and what payload
/// (if any) it carried. Unlike the original spec's two optional fields,
/// this is a closed sum type: the "exactly one of source/dest, except code
/// 0 which has neither" invariant from §8 law 8 is therefore enforced by
/// the compiler instead of checked at runtime.
#[derive(Debug)]
pub enum PageFailurePoint<T> {
    /// Reason code 0: the page's own batch rejected. Neither the source
    /// nor a sink payload is meaningful here.
    BatchRejected,
    /// The page's `source` callback failed (codes 1, 2, 5). Carries the
    /// previous page's batch outcome, `None` at index 0.
    Source(Option<Vec<BatchRow<T>>>),
    /// The page's `dest` callback failed (codes 3, 4). Carries the current
    /// page's batch outcome.
    Dest(Vec<BatchRow<T>>),
}

/// Stable reason codes for [`PageError`], matching the table in §4.E.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageReason {
    /// Code 0: batch on a page rejected.
    BatchRejected,
    /// Code 1: source threw or rejected.
    SourceFailed,
    /// Code 2: source returned a plain rejection (non-thrown).
    SourceRejected,
    /// Code 3: sink returned a rejected deferred.
    SinkRejected,
    /// Code 4: sink threw.
    SinkFailed,
    /// Code 5: source returned a non-array, non-undefined value.
    SourceNotAnArray,
}

impl PageReason {
    /// The stable integer code from §4.E's table.
    pub fn code(self) -> u8 {
        match self {
            PageReason::BatchRejected => 0,
            PageReason::SourceFailed => 1,
            PageReason::SourceRejected => 2,
            PageReason::SinkRejected => 3,
            PageReason::SinkFailed => 4,
            PageReason::SourceNotAnArray => 5,
        }
    }

    fn phrase(self) -> &'static str {
        match self {
            PageReason::BatchRejected => "batch on a page rejected",
            PageReason::SourceFailed => "source threw or rejected",
            PageReason::SourceRejected => "source returned a plain rejection",
            PageReason::SinkRejected => "sink returned a rejected deferred",
            PageReason::SinkFailed => "sink threw",
            PageReason::SourceNotAnArray => "source returned a non-array, non-undefined value",
        }
    }
}

/// Raised when a [`crate::page::page`] iteration fails.
#[derive(Error, Debug)]
#[error("page failed at index {index}: {reason}", reason = self.reason.phrase())]
pub struct PageError<T> {
    /// The underlying cause.
    #[source]
    pub error: anyhow::Error,
    /// The failing page's index.
    pub index: usize,
    /// Wall-clock time from the driver's start to the failure.
    pub duration: Duration,
    /// The stable reason code.
    pub reason: PageReason,
    /// Exactly one of source/dest payload, or neither for code 0.
    pub point: PageFailurePoint<T>,
}

impl<T> PrettyError for PageError<T> {
    fn pretty(&self, level: usize) -> String {
        format!(
            "{}PageError[{}] at index {} ({:?}): {}\n{}",
            indent(level),
            self.reason.code(),
            self.index,
            self.duration,
            self.reason.phrase(),
            pretty_cause(&self.error, level + 1)
        )
    }
}

/// Stable reason codes for [`SequenceError`], matching the table in §4.E.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SequenceReason {
    /// Code 0: source rejected (via deferred).
    SourceRejected,
    /// Code 1: source threw or returned a rejection.
    SourceFailed,
    /// Code 2: sink rejected (via deferred).
    SinkRejected,
    /// Code 3: sink threw.
    SinkFailed,
}

impl SequenceReason {
    /// The stable integer code from §4.E's table.
    pub fn code(self) -> u8 {
        match self {
            SequenceReason::SourceRejected => 0,
            SequenceReason::SourceFailed => 1,
            SequenceReason::SinkRejected => 2,
            SequenceReason::SinkFailed => 3,
        }
    }

    fn phrase(self) -> &'static str {
        match self {
            SequenceReason::SourceRejected => "source rejected",
            SequenceReason::SourceFailed => "source threw or returned a rejection",
            SequenceReason::SinkRejected => "sink rejected",
            SequenceReason::SinkFailed => "sink threw",
        }
    }
}

/// Raised when a [`crate::sequence::sequence`] iteration fails.
#[derive(Error, Debug)]
#[error("sequence failed at index {index}: {reason}", reason = self.reason.phrase())]
pub struct SequenceError {
    /// The underlying cause.
    #[source]
    pub error: anyhow::Error,
    /// The failing iteration's index.
    pub index: usize,
    /// Wall-clock time from the driver's start to the failure.
    pub duration: Duration,
    /// The stable reason code.
    pub reason: SequenceReason,
}

impl PrettyError for SequenceError {
    fn pretty(&self, level: usize) -> String {
        format!(
            "{}SequenceError[{}] at index {} ({:?}): {}\n{}",
            indent(level),
            self.reason.code(),
            self.index,
            self.duration,
            self.reason.phrase(),
            pretty_cause(&self.error, level + 1)
        )
    }
}

/// Stable reason codes for [`StreamReadError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamReadReason {
    /// The underlying reader returned an I/O error.
    ReadFailed,
    /// The receiver callback returned a rejected deferred.
    ReceiverRejected,
    /// The receiver callback threw.
    ReceiverFailed,
    /// The closer callback, run once the source is drained, failed.
    CloseFailed,
}

impl StreamReadReason {
    /// The stable integer code for this reason.
    pub fn code(self) -> u8 {
        match self {
            StreamReadReason::ReadFailed => 0,
            StreamReadReason::ReceiverRejected => 1,
            StreamReadReason::ReceiverFailed => 2,
            StreamReadReason::CloseFailed => 3,
        }
    }

    fn phrase(self) -> &'static str {
        match self {
            StreamReadReason::ReadFailed => "the underlying reader failed",
            StreamReadReason::ReceiverRejected => "the receiver rejected",
            StreamReadReason::ReceiverFailed => "the receiver threw",
            StreamReadReason::CloseFailed => "closing the source failed",
        }
    }
}

/// Raised when a [`crate::stream_read::read`] call fails.
#[derive(Error, Debug)]
#[error("stream read failed after {calls} calls ({reads} reads): {reason}", reason = self.reason.phrase())]
pub struct StreamReadError {
    /// The underlying cause.
    #[source]
    pub error: anyhow::Error,
    /// Number of times the receiver was successfully invoked before failure.
    pub calls: usize,
    /// Number of underlying `read` calls made before failure.
    pub reads: usize,
    /// Wall-clock time from the first read to the failure.
    pub duration: Duration,
    /// The stable reason code.
    pub reason: StreamReadReason,
}

impl PrettyError for StreamReadError {
    fn pretty(&self, level: usize) -> String {
        format!(
            "{}StreamReadError[{}] after {} calls ({:?}): {}\n{}",
            indent(level),
            self.reason.code(),
            self.calls,
            self.duration,
            self.reason.phrase(),
            pretty_cause(&self.error, level + 1)
        )
    }
}

impl fmt::Debug for BatchFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BatchFailure")
            .field("error", &self.error.to_string())
            .field("origin", &self.origin)
            .finish()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn batch_error_first_and_errors_agree() {
        let err = BatchError {
            data: vec![
                BatchRow::ok(1u32),
                BatchRow::err(BatchFailure {
                    error: anyhow::anyhow!("bad"),
                    origin: true,
                }),
                BatchRow::ok(3),
            ],
            stat: BatchStat {
                total: 3,
                succeeded: 2,
                failed: 1,
                duration: Duration::from_millis(5),
            },
        };
        assert_eq!(err.first().to_string(), "bad");
        assert_eq!(
            err.errors().into_iter().map(|e| e.to_string()).collect::<Vec<_>>(),
            vec!["bad".to_string()]
        );
    }

    #[test]
    fn page_reason_codes_match_table() {
        assert_eq!(PageReason::BatchRejected.code(), 0);
        assert_eq!(PageReason::SourceFailed.code(), 1);
        assert_eq!(PageReason::SourceRejected.code(), 2);
        assert_eq!(PageReason::SinkRejected.code(), 3);
        assert_eq!(PageReason::SinkFailed.code(), 4);
        assert_eq!(PageReason::SourceNotAnArray.code(), 5);
    }

    #[test]
    fn sequence_reason_codes_match_table() {
        assert_eq!(SequenceReason::SourceRejected.code(), 0);
        assert_eq!(SequenceReason::SourceFailed.code(), 1);
        assert_eq!(SequenceReason::SinkRejected.code(), 2);
        assert_eq!(SequenceReason::SinkFailed.code(), 3);
    }

    #[test]
    fn stream_read_reason_codes_match_table() {
        assert_eq!(StreamReadReason::ReadFailed.code(), 0);
        assert_eq!(StreamReadReason::ReceiverRejected.code(), 1);
        assert_eq!(StreamReadReason::ReceiverFailed.code(), 2);
        assert_eq!(StreamReadReason::CloseFailed.code(), 3);
    }

    #[test]
    fn pretty_print_is_indented() {
        let err = SequenceError {
            error: anyhow::anyhow!("oops"),
            index: 4,
            duration: Duration::from_millis(1),
            reason: SequenceReason::SourceFailed,
        };
        let pretty = err.pretty(1);
        assert!(pretty.starts_with("  SequenceError"));
    }
}
