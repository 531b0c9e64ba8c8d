/*
 * Copyright (c) Facebook, Inc. and its affiliates.
 *
 * This source code is licensed under both the MIT license found in the
 * LICENSE-MIT file in the root directory of this source tree and the Apache
 * License, Version 2.0 found in the LICENSE-APACHE file in the root directory
 * of this source tree.
 */

//! The mixed-value resolver: drives any [`Mixed`] value to settlement and
//! reports whether settlement happened synchronously or required awaiting a
//! deferred.

use crate::coroutine::drive;
use crate::mixed::{BoxFuture, Mixed};

/// A successfully settled mixed value.
#[derive(Debug)]
pub struct Resolved<T> {
    /// The settled value.
    pub value: T,
    /// Whether settling required awaiting a deferred at least once.
    /// Sticky across recursive producer calls, per §4.D.
    pub delayed: bool,
}

/// A failure while settling a mixed value.
#[derive(Debug)]
pub struct Failure {
    /// The underlying cause.
    pub error: anyhow::Error,
    /// True iff the failure came from a deferred that resolved to a
    /// rejection, as opposed to a producer invocation that returned `Err`
    /// directly. Drivers use this to choose between "rejected" and "threw"
    /// reason codes.
    pub from_rejected_deferred: bool,
}

impl Failure {
    fn thrown(error: anyhow::Error) -> Self {
        Failure {
            error,
            from_rejected_deferred: false,
        }
    }

    fn rejected(error: anyhow::Error) -> Self {
        Failure {
            error,
            from_rejected_deferred: true,
        }
    }
}

/// Drive `mixed` to settlement, following §4.D's algorithm:
///
/// 1. A producer is invoked; if it returns `Err`, that is a "thrown"
///    failure. Otherwise its result is itself a mixed value and is resolved
///    recursively, keeping `delayed` sticky.
/// 2. A deferred is awaited; success resolves with `delayed = true`,
///    failure is a "rejected" failure.
/// 3. A coroutine is drained (see [`crate::coroutine::drive`]); this always
///    counts as delayed since draining awaits at least the coroutine's
///    yielded mixed values.
/// 4. Anything else (a plain value) resolves immediately with
///    `delayed = false`.
pub fn resolve_mixed<T>(mixed: Mixed<T>) -> BoxFuture<'static, Result<Resolved<T>, Failure>>
where
    T: Send + 'static,
{
    Box::pin(async move {
        match mixed {
            Mixed::Value(value) => Ok(Resolved {
                value,
                delayed: false,
            }),
            Mixed::Producer(producer) => match producer() {
                Ok(next) => resolve_mixed(next).await,
                Err(err) => Err(Failure::thrown(err)),
            },
            Mixed::Deferred(fut) => match fut.await {
                Ok(value) => Ok(Resolved {
                    value,
                    delayed: true,
                }),
                Err(err) => Err(Failure::rejected(err)),
            },
            Mixed::Coroutine(co) => match drive(co).await {
                Ok(value) => Ok(Resolved {
                    value,
                    delayed: true,
                }),
                Err(err) => Err(Failure::rejected(err)),
            },
        }
    })
}
