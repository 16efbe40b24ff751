//! Request and response filters.
//!
//! A [`RequestFilter`] runs before the operation handler and may answer
//! the request itself. A [`ResponseFilter`] runs afterwards and may
//! decorate or replace the response. [`FilterChain`] keeps either kind in
//! priority order: lower first, ties in registration order.
//! [`RequestLogger`] logs each completed request.

use std::{future::Future, pin::Pin, sync::Arc};

use crate::{Error, Response, context::Context};

/// Boxed future returned by filter methods.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// What a [`RequestFilter`] decided.
#[derive(Debug)]
pub enum FilterOutcome {
    /// Proceed with the next filter, then the handler.
    Continue,
    /// End the request now with this response. No later filter or handler runs.
    ShortCircuit(Response),
}

/// A filter that runs before the operation handler.
///
/// # Contract
///
/// - Implementations **must** be `Send + Sync`; one instance serves every
///   request for the operation it is attached to.
/// - Returning `Err` aborts the request; the error is rendered with
///   [`Error::into_response`].
pub trait RequestFilter: Send + Sync {
    /// Sort key within a [`FilterChain`]; lower runs first.
    fn priority(&self) -> i32 {
        0
    }

    fn apply<'a>(&'a self, ctx: &'a mut Context) -> BoxFuture<'a, Result<FilterOutcome, Error>>;
}

/// A filter that runs after the operation handler produced a response.
pub trait ResponseFilter: Send + Sync {
    fn priority(&self) -> i32 {
        0
    }

    fn apply<'a>(
        &'a self,
        ctx: &'a mut Context,
        response: &'a mut Response,
    ) -> BoxFuture<'a, Result<(), Error>>;
}

/// An ordered collection of filters of one kind.
pub struct FilterChain<F: ?Sized> {
    filters: Vec<Arc<F>>,
}

impl<F: ?Sized> Default for FilterChain<F> {
    fn default() -> Self {
        Self {
            filters: Vec::new(),
        }
    }
}

impl<F: ?Sized> Clone for FilterChain<F> {
    fn clone(&self) -> Self {
        Self {
            filters: self.filters.clone(),
        }
    }
}

impl<F: ?Sized> FilterChain<F> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.filters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<F>> {
        self.filters.iter()
    }
}

impl FilterChain<dyn RequestFilter> {
    /// Inserts `filter` after every filter whose priority is `<=` its own.
    pub fn push(&mut self, filter: Arc<dyn RequestFilter>) {
        let at = self
            .filters
            .partition_point(|f| f.priority() <= filter.priority());
        self.filters.insert(at, filter);
    }

    /// Runs the chain in order, stopping at the first short-circuit or error.
    pub async fn run(&self, ctx: &mut Context) -> Result<FilterOutcome, Error> {
        for filter in &self.filters {
            if let FilterOutcome::ShortCircuit(response) = filter.apply(ctx).await? {
                return Ok(FilterOutcome::ShortCircuit(response));
            }
        }
        Ok(FilterOutcome::Continue)
    }
}

impl FilterChain<dyn ResponseFilter> {
    /// Inserts `filter` after every filter whose priority is `<=` its own.
    pub fn push(&mut self, filter: Arc<dyn ResponseFilter>) {
        let at = self
            .filters
            .partition_point(|f| f.priority() <= filter.priority());
        self.filters.insert(at, filter);
    }

    /// Runs every filter in order, stopping at the first error.
    pub async fn run(&self, ctx: &mut Context, response: &mut Response) -> Result<(), Error> {
        for filter in &self.filters {
            filter.apply(ctx, response).await?;
        }
        Ok(())
    }
}

/// Built-in response filter that logs each request's method, path, status,
/// and duration since the context was created:
///
/// ```text
/// METHOD /path - STATUS (duration)
/// ```
///
/// Runs last by default (`i32::MAX`) so the logged status is final.
pub struct RequestLogger;

impl ResponseFilter for RequestLogger {
    fn priority(&self) -> i32 {
        i32::MAX
    }

    fn apply<'a>(
        &'a self,
        ctx: &'a mut Context,
        response: &'a mut Response,
    ) -> BoxFuture<'a, Result<(), Error>> {
        Box::pin(async move {
            let duration = ctx.started_at().elapsed();
            tracing::info!(
                "{} {} - {} ({:?})",
                ctx.request().method(),
                ctx.request().path(),
                response.status().as_u16(),
                duration
            );
            Ok(())
        })
    }
}
