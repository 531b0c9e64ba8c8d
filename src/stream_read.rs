/*
 * Copyright (c) Facebook, Inc. and its affiliates.
 *
 * This source code is licensed under both the MIT license found in the
 * LICENSE-MIT file in the root directory of this source tree and the Apache
 * License, Version 2.0 found in the LICENSE-APACHE file in the root directory
 * of this source tree.
 */

//! The stream-read driver (§4.I): drains an async byte source into a
//! receiver callback, a batch of chunks at a time.
//!
//! Unlike a pausable/resumable Node stream, a Rust `AsyncRead` only
//! produces a chunk when polled: the driver naturally backs off whenever
//! the receiver's own mixed value has not yet settled, since the next
//! `read` is never issued until the previous receiver call resolves. No
//! explicit unsubscribe/resubscribe step is needed.

use std::io::ErrorKind;
use std::time::{Duration, Instant};

use slog::{debug, warn};
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::error::{StreamReadError, StreamReadReason};
use crate::mixed::{BoxFuture, Mixed};
use crate::resolve::resolve_mixed;
use crate::stats::TimedFutureExt;

const DEFAULT_READ_SIZE: usize = 8 * 1024;

/// Invoked once per round of underlying reads, with the round's index, the
/// chunks accumulated that round (in read order), and the delay since the
/// previous call started (`None` for the first).
pub type ReceiverFn = Box<dyn FnMut(usize, &[Vec<u8>], Option<u64>) -> Mixed<()> + Send>;

/// Invoked once after the source is drained, if the source is closable.
pub type CloseFn = Box<dyn FnOnce() -> BoxFuture<'static, anyhow::Result<()>> + Send>;

/// Configuration for [`read`].
pub struct StreamReadOptions {
    /// Maximum chunk size requested from the source per underlying read.
    /// Zero falls back to an 8 KiB default.
    pub read_size: usize,
    /// Whether the source can be explicitly closed. When true, the source
    /// reporting an unexpected EOF (as opposed to a clean, zero-length
    /// read) is still treated as a successful termination; when false,
    /// that same condition is surfaced as a [`StreamReadReason::ReadFailed`]
    /// failure, since only a clean end-of-stream counts as natural
    /// completion.
    pub closable: bool,
    /// If present, called once the source reports end-of-stream; its
    /// failure is reported as [`StreamReadReason::CloseFailed`].
    pub closer: Option<CloseFn>,
    /// Optional structured logger.
    pub logger: Option<slog::Logger>,
}

impl Default for StreamReadOptions {
    fn default() -> Self {
        StreamReadOptions {
            read_size: DEFAULT_READ_SIZE,
            closable: false,
            closer: None,
            logger: None,
        }
    }
}

/// The outcome of a completed [`read`] call.
#[derive(Debug, Clone, Copy)]
pub struct StreamReadReport {
    /// Number of times the receiver was invoked.
    pub calls: usize,
    /// Number of underlying reads performed, including the final
    /// zero-length (or closed) read that signaled end-of-stream.
    pub reads: usize,
    /// Number of chunks observed across every receiver call.
    pub length: u64,
    /// Wall-clock time from the first read to completion.
    pub duration: Duration,
}

/// Drain `reader` into `receiver`, a batch of chunks at a time, until
/// end-of-stream, then run `options.closer` if present.
pub async fn read<R>(
    reader: R,
    receiver: ReceiverFn,
    options: StreamReadOptions,
) -> Result<StreamReadReport, StreamReadError>
where
    R: AsyncRead + Unpin + Send,
{
    let (stats, outcome) = run_read(reader, receiver, options).timed().await;
    let duration = stats.completion_time;
    match outcome {
        Ok((calls, reads, length)) => Ok(StreamReadReport {
            calls,
            reads,
            length,
            duration,
        }),
        Err(mut err) => {
            err.duration = duration;
            Err(err)
        }
    }
}

/// The read-and-dispatch loop, timed as a whole by [`read`] via
/// [`TimedFutureExt::timed`]; the `duration` field of any returned
/// [`StreamReadError`] is a placeholder overwritten by the caller once the
/// overall future has settled.
async fn run_read<R>(
    mut reader: R,
    mut receiver: ReceiverFn,
    mut options: StreamReadOptions,
) -> Result<(usize, usize, u64), StreamReadError>
where
    R: AsyncRead + Unpin + Send,
{
    let read_size = if options.read_size == 0 {
        DEFAULT_READ_SIZE
    } else {
        options.read_size
    };
    let mut buf = vec![0u8; read_size];
    let mut calls = 0usize;
    let mut reads = 0usize;
    let mut length = 0u64;
    let mut last_call_start: Option<Instant> = None;

    loop {
        // Drain the source by calling its read operation until it yields
        // nothing more right away, accumulating the chunks produced into
        // one array for this receiver call.
        let mut round: Vec<Vec<u8>> = Vec::new();
        let mut end_of_stream = false;

        loop {
            let outcome = reader.read(&mut buf).await;
            reads += 1;
            let n = match outcome {
                Ok(n) => n,
                Err(io_err) => {
                    if options.closable && io_err.kind() == ErrorKind::UnexpectedEof {
                        end_of_stream = true;
                        break;
                    }
                    if let Some(logger) = &options.logger {
                        warn!(logger, "stream_read underlying read failed"; "reads" => reads);
                    }
                    return Err(StreamReadError {
                        error: anyhow::Error::new(io_err),
                        calls,
                        reads,
                        duration: Duration::ZERO,
                        reason: StreamReadReason::ReadFailed,
                    });
                }
            };

            if n == 0 {
                end_of_stream = true;
                break;
            }

            length += 1;
            round.push(buf[..n].to_vec());

            if n < buf.len() {
                // Short read: the source had nothing more ready right now.
                break;
            }
        }

        if !round.is_empty() {
            let delay_ms = last_call_start.map(|start| start.elapsed().as_millis() as u64);
            last_call_start = Some(Instant::now());

            if let Err(failure) = resolve_mixed(receiver(calls, &round, delay_ms)).await {
                let reason = if failure.from_rejected_deferred {
                    StreamReadReason::ReceiverRejected
                } else {
                    StreamReadReason::ReceiverFailed
                };
                if let Some(logger) = &options.logger {
                    warn!(logger, "stream_read receiver failed"; "call" => calls, "reason" => reason.code());
                }
                return Err(StreamReadError {
                    error: failure.error,
                    calls,
                    reads,
                    duration: Duration::ZERO,
                    reason,
                });
            }

            if let Some(logger) = &options.logger {
                debug!(logger, "stream_read call complete"; "call" => calls, "chunks" => round.len());
            }
            calls += 1;
        }

        if end_of_stream {
            break;
        }
    }

    if let Some(closer) = options.closer.take() {
        if let Err(error) = closer().await {
            if let Some(logger) = &options.logger {
                warn!(logger, "stream_read closer failed");
            }
            return Err(StreamReadError {
                error,
                calls,
                reads,
                duration: Duration::ZERO,
                reason: StreamReadReason::CloseFailed,
            });
        }
    }

    Ok((calls, reads, length))
}

#[cfg(test)]
mod test {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn drains_a_cursor_in_one_round() {
        let source = std::io::Cursor::new(vec![1u8, 2, 3, 4, 5]);
        let received = Arc::new(std::sync::Mutex::new(Vec::new()));
        let received_in_receiver = Arc::clone(&received);
        let receiver: ReceiverFn = Box::new(move |_index, chunks, _delay| {
            for chunk in chunks {
                received_in_receiver.lock().unwrap().extend_from_slice(chunk);
            }
            Mixed::value(())
        });
        let report = read(
            source,
            receiver,
            StreamReadOptions {
                read_size: 2,
                ..StreamReadOptions::default()
            },
        )
        .await
        .unwrap();
        // 5 bytes at read_size 2: reads of 2, 2, 1 bytes; the final short
        // read (1 < 2) ends the round, so this is all one receiver call.
        assert_eq!(report.calls, 1);
        assert_eq!(report.length, 3);
        assert_eq!(*received.lock().unwrap(), vec![1, 2, 3, 4, 5]);
    }

    #[tokio::test]
    async fn empty_source_never_calls_the_receiver() {
        let source = std::io::Cursor::new(Vec::new());
        let receiver: ReceiverFn = Box::new(|_index, _chunks, _delay| Mixed::value(()));
        let report = read(source, receiver, StreamReadOptions::default())
            .await
            .unwrap();
        assert_eq!(report.calls, 0);
        assert_eq!(report.length, 0);
    }

    #[tokio::test]
    async fn receiver_rejection_stops_the_drain() {
        let source = std::io::Cursor::new(vec![1u8, 2, 3]);
        let receiver: ReceiverFn = Box::new(|_index, _chunks, _delay| {
            Mixed::deferred(async { Err(anyhow::anyhow!("no thanks")) })
        });
        let err = read(source, receiver, StreamReadOptions::default())
            .await
            .unwrap_err();
        assert_eq!(err.reason, StreamReadReason::ReceiverRejected);
        assert_eq!(err.calls, 0);
    }

    #[tokio::test]
    async fn closer_runs_once_after_drain_completes() {
        let source = std::io::Cursor::new(vec![1u8]);
        let receiver: ReceiverFn = Box::new(|_index, _chunks, _delay| Mixed::value(()));
        let closed = Arc::new(AtomicBool::new(false));
        let closed_in_closer = Arc::clone(&closed);
        let closer: CloseFn = Box::new(move || {
            Box::pin(async move {
                closed_in_closer.store(true, Ordering::SeqCst);
                Ok(())
            })
        });
        let report = read(
            source,
            receiver,
            StreamReadOptions {
                closer: Some(closer),
                ..StreamReadOptions::default()
            },
        )
        .await
        .unwrap();
        assert_eq!(report.calls, 1);
        assert!(closed.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn closer_failure_is_reported_as_close_failed() {
        let source = std::io::Cursor::new(Vec::new());
        let receiver: ReceiverFn = Box::new(|_index, _chunks, _delay| Mixed::value(()));
        let closer: CloseFn =
            Box::new(|| Box::pin(async { Err(anyhow::anyhow!("couldn't close")) }));
        let err = read(
            source,
            receiver,
            StreamReadOptions {
                closer: Some(closer),
                ..StreamReadOptions::default()
            },
        )
        .await
        .unwrap_err();
        assert_eq!(err.reason, StreamReadReason::CloseFailed);
    }

    #[tokio::test]
    async fn multiple_short_reads_are_separate_calls() {
        // A reader that yields one byte per poll, forcing a short read
        // (relative to a larger buffer) every time, so each round contains
        // exactly one chunk and ends immediately.
        struct OneByteAtATime(Vec<u8>);

        impl AsyncRead for OneByteAtATime {
            fn poll_read(
                mut self: std::pin::Pin<&mut Self>,
                _cx: &mut std::task::Context<'_>,
                buf: &mut tokio::io::ReadBuf<'_>,
            ) -> std::task::Poll<std::io::Result<()>> {
                if self.0.is_empty() {
                    return std::task::Poll::Ready(Ok(()));
                }
                let byte = self.0.remove(0);
                buf.put_slice(&[byte]);
                std::task::Poll::Ready(Ok(()))
            }
        }

        let source = OneByteAtATime(vec![1, 2, 3]);
        let receiver: ReceiverFn = Box::new(|_index, chunks, _delay| {
            assert_eq!(chunks.len(), 1);
            Mixed::value(())
        });
        let report = read(
            source,
            receiver,
            StreamReadOptions {
                read_size: 4,
                ..StreamReadOptions::default()
            },
        )
        .await
        .unwrap();
        assert_eq!(report.calls, 3);
        assert_eq!(report.length, 3);
    }
}
