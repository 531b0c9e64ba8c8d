/*
 * Copyright (c) Facebook, Inc. and its affiliates.
 *
 * This source code is licensed under both the MIT license found in the
 * LICENSE-MIT file in the root directory of this source tree and the Apache
 * License, Version 2.0 found in the LICENSE-APACHE file in the root directory
 * of this source tree.
 */

//! Async control-flow combinators over a "mixed value": a plain value, a
//! deferred future, a nullary producer, or a coroutine, any of which any
//! driver in this crate accepts in place of a concrete value.
//!
//! - [`batch`] drives a fixed collection to all-settled completion
//!   concurrently, index-aligned.
//! - [`sequence`] drives a linked, one-at-a-time chain where each element
//!   may see the previous one.
//! - [`page`] drives a paginated source, batching each page's elements.
//! - [`stream_read`] drains an async byte source into a receiver callback.
//!
//! See the individual module docs for each driver's contract, and
//! [`mixed::Mixed`] for the value type threaded through all of them.

#![deny(unused_must_use)]

pub mod batch;
pub mod callback;
pub mod coroutine;
pub mod error;
pub mod mixed;
pub mod page;
pub mod resolve;
pub mod sequence;
pub mod stats;
pub mod stream_read;

pub use batch::{batch, BatchOptions, BatchReport, BatchTracker};
pub use callback::wrap_callback;
pub use coroutine::{drive, Coroutine, CoroutineStep};
pub use error::{
    BatchError, BatchFailure, BatchRow, BatchStat, PageError, PageFailurePoint, PageReason,
    PrettyError, SequenceError, SequenceReason, StreamReadError, StreamReadReason,
};
pub use mixed::{BoxFuture, BoxProducer, Mixed};
pub use page::{page, PageOptions, PageReport, PageSinkFn, PageSourceFn, PageSourceResult};
pub use resolve::{resolve_mixed, Failure, Resolved};
pub use sequence::{sequence, SequenceOptions, SequenceOutcome, SinkFn as SequenceSinkFn, SourceFn as SequenceSourceFn};
pub use stats::{FutureStats, TimedFuture, TimedFutureExt};
pub use stream_read::{read as read_stream, CloseFn, ReceiverFn, StreamReadOptions, StreamReadReport};
