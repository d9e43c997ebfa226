//! Factory contract for pooled resources.

use std::future::Future;

use async_trait::async_trait;

use crate::error::BoxError;

/// Produces pool resources asynchronously.
///
/// `create` may be called concurrently and must not share mutable state
/// between the instances it returns.
#[async_trait]
pub trait ResourceFactory<R: Send + Sync + 'static>: Send + Sync + 'static {
    /// Construct one resource.
    async fn create(&self) -> Result<R, BoxError>;

    /// Reset a resource before it moves from a session back to the warm pool.
    ///
    /// An error discards the resource instead of recycling it.
    async fn recycle(&self, _resource: &R) -> Result<(), BoxError> {
        Ok(())
    }
}

/// Adapter turning an async closure into a [`ResourceFactory`].
pub struct FnFactory<F> {
    create: F,
}

/// Wrap an async closure as a factory.
pub fn factory_fn<F>(create: F) -> FnFactory<F> {
    FnFactory { create }
}

#[async_trait]
impl<R, F, Fut> ResourceFactory<R> for FnFactory<F>
where
    R: Send + Sync + 'static,
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<R, BoxError>> + Send + 'static,
{
    async fn create(&self) -> Result<R, BoxError> {
        (self.create)().await
    }
}
