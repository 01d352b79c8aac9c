//! RecordHandler port - the per-record operation of a walk.

use std::future::Future;
use std::marker::PhantomData;

use async_trait::async_trait;

use crate::domain::{ExecutionContext, Record};
use crate::error::Result;

/// Operation applied to every record a walk visits.
///
/// An error aborts the remaining walk.
#[async_trait]
pub trait RecordHandler: Send + Sync {
    async fn apply(&self, ctx: &ExecutionContext, record: &Record) -> Result<()>;
}

/// Adapts an async closure into a `RecordHandler`.
///
/// The closure receives owned copies so the returned future can be `'static`.
pub struct FnHandler<F, Fut> {
    f: F,
    _fut: PhantomData<fn() -> Fut>,
}

impl<F, Fut> FnHandler<F, Fut>
where
    F: Fn(ExecutionContext, Record) -> Fut + Send + Sync,
    Fut: Future<Output = Result<()>> + Send,
{
    pub fn new(f: F) -> Self {
        Self {
            f,
            _fut: PhantomData,
        }
    }
}

#[async_trait]
impl<F, Fut> RecordHandler for FnHandler<F, Fut>
where
    F: Fn(ExecutionContext, Record) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    async fn apply(&self, ctx: &ExecutionContext, record: &Record) -> Result<()> {
        (self.f)(ctx.clone(), record.clone()).await
    }
}
