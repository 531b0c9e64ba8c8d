/*
 * Copyright (c) Facebook, Inc. and its affiliates.
 *
 * This source code is licensed under both the MIT license found in the
 * LICENSE-MIT file in the root directory of this source tree and the Apache
 * License, Version 2.0 found in the LICENSE-APACHE file in the root directory
 * of this source tree.
 */

//! The explicit "step" interface standing in for a native generator, per
//! the design notes: Rust has no stable generator syntax, so a coroutine is
//! a trait object that is resumed one mixed value at a time.

use crate::mixed::Mixed;
use crate::resolve::resolve_mixed;

/// Outcome of resuming a [`Coroutine`] once.
pub enum CoroutineStep<T> {
    /// The coroutine yielded a mixed value that must be resolved before the
    /// coroutine is advanced again.
    Yield(Mixed<T>),
    /// The coroutine has no more work; this is its terminal value.
    Done(T),
    /// The coroutine raised a failure that was not caught internally.
    Failed(anyhow::Error),
}

/// A stateful generator of mixed values, advanced one step at a time by a
/// driver (see [`drive`]).
///
/// Implementors model a generator body: each call to `advance` resumes the
/// generator with either nothing (first call), the resolved value of the
/// previously yielded mixed value, or the failure produced while trying to
/// resolve it (giving the coroutine a chance to recover, the Rust analogue
/// of re-injecting the failure as an exception at the `yield` point).
pub trait Coroutine<T>: Send {
    /// Resume the coroutine. `resumed` is `None` only on the very first
    /// call.
    fn advance(&mut self, resumed: Option<Result<T, anyhow::Error>>) -> CoroutineStep<T>;
}

/// Drain a coroutine to completion, resolving each yielded mixed value in
/// turn and feeding the outcome back in. This is the engine behind
/// [`crate::callback::wrap_callback`] and behind [`resolve_mixed`]'s own
/// `Mixed::Coroutine` arm.
pub async fn drive<T>(mut co: Box<dyn Coroutine<T>>) -> anyhow::Result<T>
where
    T: Send + 'static,
{
    let mut resumed = None;
    loop {
        match co.advance(resumed.take()) {
            CoroutineStep::Done(value) => return Ok(value),
            CoroutineStep::Failed(err) => return Err(err),
            CoroutineStep::Yield(mixed) => match resolve_mixed(mixed).await {
                Ok(resolved) => resumed = Some(Ok(resolved.value)),
                Err(failure) => resumed = Some(Err(failure.error)),
            },
        }
    }
}
