//! Request-scoped query propagation.
//!
//! The query that triggered a request has to be visible to `ChatMemory::messages()`,
//! which may run on another worker thread, and may run several times while a
//! reply streams. Two pieces cooperate:
//!
//! - a register (conversation id -> query) local to the running task. It only
//!   exists while a carried future or stream is being polled, so nothing can
//!   outlive the request or leak to the next task on the same worker.
//! - a [`QueryCarrier`], the explicit request-scoped handle. It is copied into
//!   the register on every poll of a future ([`QueryCarrier::scope`]), on every
//!   `poll_next` of a stream ([`QueryCarrier::propagate`]), and around blocking
//!   work ([`QueryCarrier::run_blocking`]). Copying merges into an enclosing
//!   register instead of hiding it.
//!
//! ```ignore
//! let carrier = QueryCarrier::new().with_query(id.clone(), "what did I order?");
//! let reply = carrier.scope(assistant_turn(id)).await?;
//! ```

use crate::memory::QuerySource;
use crate::message::ConversationId;
use futures::Stream;
use std::cell::RefCell;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tracing::{debug, trace, warn};

type Queries = HashMap<ConversationId, String>;

tokio::task_local! {
    static QUERY_REGISTER: RefCell<Queries>;
}

/// Run `f` with `queries` copied into the register.
///
/// Entries of an enclosing register stay visible; `queries` wins on
/// conflicts. Writes made by `f` are kept in `queries` for the next call,
/// while entries inherited unchanged from the enclosing register are not.
fn install<R>(queries: &mut Queries, f: impl FnOnce() -> R) -> R {
    let inherited = QUERY_REGISTER.try_with(|register| register.borrow().clone()).ok();
    let mut merged = inherited.clone().unwrap_or_default();
    merged.extend(queries.iter().map(|(id, query)| (id.clone(), query.clone())));

    let (output, after) = QUERY_REGISTER.sync_scope(RefCell::new(merged), || {
        let output = f();
        (output, QUERY_REGISTER.with(|register| register.take()))
    });

    *queries = after
        .into_iter()
        .filter(|(id, query)| inherited.as_ref().and_then(|outer| outer.get(id)) != Some(query))
        .collect();
    output
}

/// Immutable set of queries belonging to one logical request
#[derive(Debug, Clone, Default)]
pub struct QueryCarrier {
    queries: Arc<Queries>,
}

impl QueryCarrier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_query(mut self, id: impl Into<ConversationId>, query: impl Into<String>) -> Self {
        Arc::make_mut(&mut self.queries).insert(id.into(), query.into());
        self
    }

    /// Run `fut` with this carrier's queries installed.
    ///
    /// The register is copied in on each poll and is gone once `fut`
    /// completes, fails or is dropped.
    pub fn scope<F: Future>(&self, fut: F) -> Scoped<F> {
        debug!("Scoping {} queries onto future", self.queries.len());
        Scoped {
            queries: (*self.queries).clone(),
            inner: Box::pin(fut),
        }
    }

    /// Copy this carrier into the register on every signal of `stream`
    pub fn propagate<S: Stream>(&self, stream: S) -> Propagated<S> {
        Propagated {
            queries: (*self.queries).clone(),
            inner: Box::pin(stream),
        }
    }

    /// Run synchronous work (e.g. on the blocking pool) with the queries installed
    pub fn run_blocking<F, R>(&self, f: F) -> R
    where
        F: FnOnce() -> R,
    {
        let mut queries = (*self.queries).clone();
        install(&mut queries, f)
    }
}

/// Future adapter created by [`QueryCarrier::scope`]
pub struct Scoped<F> {
    queries: Queries,
    inner: Pin<Box<F>>,
}

impl<F: Future> Future for Scoped<F> {
    type Output = F::Output;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<F::Output> {
        let this = self.get_mut();
        let inner = &mut this.inner;
        install(&mut this.queries, || inner.as_mut().poll(cx))
    }
}

/// Stream adapter created by [`QueryCarrier::propagate`]
pub struct Propagated<S> {
    queries: Queries,
    inner: Pin<Box<S>>,
}

impl<S: Stream> Stream for Propagated<S> {
    type Item = S::Item;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<S::Item>> {
        let this = self.get_mut();
        trace!("Propagating {} queries on stream signal", this.queries.len());
        let inner = &mut this.inner;
        install(&mut this.queries, || inner.as_mut().poll_next(cx))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

/// Access to the register of the running task
pub struct QueryContext;

impl QueryContext {
    /// Store `query` for `id`. Returns false when no register is active.
    pub fn set_query(id: &ConversationId, query: impl Into<String>) -> bool {
        let query = query.into();
        let stored = QUERY_REGISTER
            .try_with(|register| {
                register.borrow_mut().insert(id.clone(), query.clone());
            })
            .is_ok();
        if stored {
            debug!("Set query for memory ID {}: {}", id, query);
        } else {
            warn!("No active query register; query for memory ID {} dropped", id);
        }
        stored
    }

    pub fn get_query(id: &ConversationId) -> Option<String> {
        let query = QUERY_REGISTER
            .try_with(|register| register.borrow().get(id).cloned())
            .ok()
            .flatten();
        if let Some(query) = &query {
            debug!("Retrieved query for memory ID {}: {}", id, query);
        }
        query
    }

    pub fn clear_query(id: &ConversationId) {
        let _ = QUERY_REGISTER.try_with(|register| register.borrow_mut().remove(id));
        debug!("Cleared query for memory ID: {}", id);
    }

    pub fn clear_all() {
        let _ = QUERY_REGISTER.try_with(|register| register.borrow_mut().clear());
        debug!("Cleared all queries");
    }

    /// Snapshot of the active register, for carrying into spawned work
    pub fn current() -> Option<QueryCarrier> {
        QUERY_REGISTER
            .try_with(|register| QueryCarrier {
                queries: Arc::new(register.borrow().clone()),
            })
            .ok()
    }

    /// `tokio::spawn` that carries the current queries into the new task
    pub fn spawn<F>(fut: F) -> tokio::task::JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        let carrier = Self::current().unwrap_or_default();
        tokio::spawn(async move { carrier.scope(fut).await })
    }

    /// `spawn_blocking` that carries the current queries onto the blocking pool
    pub fn spawn_blocking<F, R>(f: F) -> tokio::task::JoinHandle<R>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        let carrier = Self::current().unwrap_or_default();
        tokio::task::spawn_blocking(move || carrier.run_blocking(f))
    }
}

/// [`QuerySource`] reading the running task's register
#[derive(Debug, Clone, Copy, Default)]
pub struct QueryRegisterSource;

impl QuerySource for QueryRegisterSource {
    fn current_query(&self, id: &ConversationId) -> Option<String> {
        QueryContext::get_query(id)
    }
}
