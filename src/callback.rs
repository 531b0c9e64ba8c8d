/*
 * Copyright (c) Facebook, Inc. and its affiliates.
 *
 * This source code is licensed under both the MIT license found in the
 * LICENSE-MIT file in the root directory of this source tree and the Apache
 * License, Version 2.0 found in the LICENSE-APACHE file in the root directory
 * of this source tree.
 */

//! Normalizes a user callback so that one which happens to return a
//! [`Coroutine`](crate::coroutine::Coroutine) is drained to its terminal
//! value instead of being handed back as-is.

use crate::coroutine::drive;
use crate::mixed::Mixed;

/// Wrap `f` so that a `Mixed::Coroutine` it returns is pumped to completion
/// and surfaced as a deferred settling with the coroutine's terminal value.
/// Any other mixed value is returned unchanged.
pub fn wrap_callback<T, F>(f: F) -> impl FnOnce() -> Mixed<T>
where
    T: Send + 'static,
    F: FnOnce() -> Mixed<T> + Send + 'static,
{
    move || match f() {
        Mixed::Coroutine(co) => Mixed::deferred(drive(co)),
        other => other,
    }
}
