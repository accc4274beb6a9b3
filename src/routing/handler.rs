//! Handler trait and type erasure.
//!
//! A [`Resource`](super::Resource) holds handlers of different concrete types
//! in one table, so each is wrapped once at registration:
//!
//! ```text
//! async fn get_tour(ctx: RequestContext) -> AppResult<Json<..>>   ← user code
//!        ↓ resource.get("/{id}", get_tour)
//! Arc::new(FnHandler(get_tour))            ← stored as BoxedHandler
//!        ↓ at request time
//! Box::pin(async { get_tour(ctx).await.map(IntoResponse::into_response) })
//! ```

use std::future::Future;
use std::sync::Arc;

use axum::response::{IntoResponse, Response};

use crate::context::RequestContext;
use crate::error::AppResult;
use crate::pipeline::BoxFuture;

/// Type-erased handler call.
#[doc(hidden)]
pub trait ErasedHandler: Send + Sync + 'static {
    fn call(&self, ctx: RequestContext) -> BoxFuture<'static, AppResult<Response>>;
}

/// Handler shared by every request that matches its route.
#[doc(hidden)]
pub type BoxedHandler = Arc<dyn ErasedHandler>;

/// Implemented for every `async fn(RequestContext) -> AppResult<impl IntoResponse>`.
///
/// Sealed: only the blanket impl below satisfies it.
pub trait Handler: private::Sealed + Send + Sync + 'static {
    #[doc(hidden)]
    fn into_boxed_handler(self) -> BoxedHandler;
}

mod private {
    pub trait Sealed {}
}

impl<F, Fut, R> private::Sealed for F
where
    F: Fn(RequestContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = AppResult<R>> + Send + 'static,
    R: IntoResponse + 'static,
{
}

impl<F, Fut, R> Handler for F
where
    F: Fn(RequestContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = AppResult<R>> + Send + 'static,
    R: IntoResponse + 'static,
{
    fn into_boxed_handler(self) -> BoxedHandler {
        Arc::new(FnHandler(self))
    }
}

struct FnHandler<F>(F);

impl<F, Fut, R> ErasedHandler for FnHandler<F>
where
    F: Fn(RequestContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = AppResult<R>> + Send + 'static,
    R: IntoResponse + 'static,
{
    fn call(&self, ctx: RequestContext) -> BoxFuture<'static, AppResult<Response>> {
        let fut = (self.0)(ctx);
        Box::pin(async move { fut.await.map(IntoResponse::into_response) })
    }
}
