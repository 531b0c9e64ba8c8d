/*
 * Copyright (c) Facebook, Inc. and its affiliates.
 *
 * This source code is licensed under both the MIT license found in the
 * LICENSE-MIT file in the root directory of this source tree and the Apache
 * License, Version 2.0 found in the LICENSE-APACHE file in the root directory
 * of this source tree.
 */

//! The [`Mixed`] value: the single type every combinator in this crate
//! accepts in place of a plain value.

use std::fmt;
use std::future::Future;
use std::pin::Pin;

use crate::coroutine::Coroutine;

/// A future that is boxed and pinned, the Rust realization of "a deferred
/// computation" (§4.A of the design: any external promise/future library
/// collapses onto [`std::future::Future`], so no adapter trait is needed).
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// A nullary producer: invoked once, may fail, and yields another
/// [`Mixed`] value rather than a plain one so that a producer may itself
/// return a deferred, another producer, or a coroutine.
pub type BoxProducer<T> = Box<dyn FnOnce() -> anyhow::Result<Mixed<T>> + Send>;

/// A value accepted by every combinator in this crate: a plain value, a
/// deferred computation, a producer callable, or a lazy coroutine.
///
/// This is the Rust realization of the "mixed value" tagged union from the
/// data model: since Rust has no duck typing, the union is a closed `enum`
/// rather than a family of runtime shape checks.
pub enum Mixed<T> {
    /// Already-resolved plain value.
    Value(T),
    /// A deferred computation that will settle to `T` (or fail) later.
    Deferred(BoxFuture<'static, anyhow::Result<T>>),
    /// A nullary callable that produces another mixed value when invoked.
    Producer(BoxProducer<T>),
    /// A lazy, stateful generator of mixed values whose terminal value is
    /// the result.
    Coroutine(Box<dyn Coroutine<T>>),
}

impl<T> Mixed<T> {
    /// Wrap an already-available value.
    pub fn value(value: T) -> Self {
        Mixed::Value(value)
    }

    /// Wrap a future as a deferred computation.
    pub fn deferred<F>(fut: F) -> Self
    where
        F: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        Mixed::Deferred(Box::pin(fut))
    }

    /// Wrap a fallible nullary producer.
    pub fn producer<F>(f: F) -> Self
    where
        F: FnOnce() -> anyhow::Result<Mixed<T>> + Send + 'static,
    {
        Mixed::Producer(Box::new(f))
    }

    /// Wrap a coroutine.
    pub fn coroutine<C>(co: C) -> Self
    where
        C: Coroutine<T> + 'static,
    {
        Mixed::Coroutine(Box::new(co))
    }
}

impl<T> From<T> for Mixed<T> {
    fn from(value: T) -> Self {
        Mixed::Value(value)
    }
}

impl<T: fmt::Debug> fmt::Debug for Mixed<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mixed::Value(value) => f.debug_tuple("Value").field(value).finish(),
            Mixed::Deferred(_) => f.debug_tuple("Deferred").finish(),
            Mixed::Producer(_) => f.debug_tuple("Producer").finish(),
            Mixed::Coroutine(_) => f.debug_tuple("Coroutine").finish(),
        }
    }
}
