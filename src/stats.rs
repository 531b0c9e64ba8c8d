/*
 * Copyright (c) Facebook, Inc. and its affiliates.
 *
 * This source code is licensed under both the MIT license found in the
 * LICENSE-MIT file in the root directory of this source tree and the Apache
 * License, Version 2.0 found in the LICENSE-APACHE file in the root directory
 * of this source tree.
 */

//! A future combinator that gathers basic poll statistics, adapted from
//! `futures_stats`'s `TimedFuture`. Every driver in this crate wraps its
//! top-level future in [`TimedFutureExt::timed`] rather than subtracting
//! two `Instant`s by hand.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use pin_project::pin_project;

/// Poll statistics gathered for a single future.
#[derive(Debug, Clone, Copy)]
pub struct FutureStats {
    /// Wall-clock time from first poll to completion.
    pub completion_time: Duration,
    /// Total time spent inside the wrapped future's `poll`.
    pub poll_time: Duration,
    /// Number of times the wrapped future was polled.
    pub poll_count: u64,
}

/// A future that gathers [`FutureStats`] for an inner future.
#[pin_project]
pub struct TimedFuture<F> {
    #[pin]
    inner: F,
    start: Option<Instant>,
    poll_count: u64,
    poll_time: Duration,
}

impl<F> TimedFuture<F> {
    fn new(inner: F) -> Self {
        TimedFuture {
            inner,
            start: None,
            poll_count: 0,
            poll_time: Duration::from_secs(0),
        }
    }
}

impl<F: Future> Future for TimedFuture<F> {
    type Output = (FutureStats, F::Output);

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut this = self.project();
        this.start.get_or_insert_with(Instant::now);
        *this.poll_count += 1;

        let poll_start = Instant::now();
        let poll = this.inner.as_mut().poll(cx);
        *this.poll_time += poll_start.elapsed();

        let output = match poll {
            Poll::Pending => return Poll::Pending,
            Poll::Ready(output) => output,
        };

        let stats = FutureStats {
            completion_time: this.start.expect("start time not set").elapsed(),
            poll_time: *this.poll_time,
            poll_count: *this.poll_count,
        };

        Poll::Ready((stats, output))
    }
}

/// Extension trait providing [`timed`](TimedFutureExt::timed) on every
/// future.
pub trait TimedFutureExt: Future + Sized {
    /// Wrap this future so it also reports [`FutureStats`] alongside its
    /// normal output.
    fn timed(self) -> TimedFuture<Self> {
        TimedFuture::new(self)
    }
}

impl<F: Future> TimedFutureExt for F {}
