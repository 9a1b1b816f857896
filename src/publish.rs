//! The publish interface implemented by callers.

use crate::error::Result;
use crate::transaction::RootTransaction;

use async_trait::async_trait;
use std::fmt;

/// A publish process, for example publishing an asset or a cache.
///
/// Each stage receives a fresh [`RootTransaction`] and the context returned
/// by the previous stage. A stage transforms the context and adds the
/// transactions that make the transformation permanent; the runner commits
/// them once the stage returns, and rolls every stage back if anything
/// fails.
#[async_trait]
pub trait Publish: Send + Sync {
    /// Data threaded from stage to stage. The runner never inspects it.
    type Context: Send;

    /// Prepares the main publish, e.g. creating the publish directory.
    async fn pre_publish(
        &self,
        _transaction: &mut RootTransaction,
        context: Self::Context,
    ) -> Result<Self::Context> {
        Ok(context)
    }

    /// The main publish work.
    async fn publish(
        &self,
        transaction: &mut RootTransaction,
        context: Self::Context,
    ) -> Result<Self::Context>;

    /// Finalizes the publish, e.g. writing metadata or locking files.
    async fn post_publish(
        &self,
        _transaction: &mut RootTransaction,
        context: Self::Context,
    ) -> Result<Self::Context> {
        Ok(context)
    }
}

/// One of the three publish stages, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    PrePublish,
    Publish,
    PostPublish,
}

impl Stage {
    pub const ALL: [Stage; 3] = [Stage::PrePublish, Stage::Publish, Stage::PostPublish];

    /// Calls the stage function of `publish` that matches this stage.
    pub async fn run<P: Publish + ?Sized>(
        self,
        publish: &P,
        transaction: &mut RootTransaction,
        context: P::Context,
    ) -> Result<P::Context> {
        match self {
            Stage::PrePublish => publish.pre_publish(transaction, context).await,
            Stage::Publish => publish.publish(transaction, context).await,
            Stage::PostPublish => publish.post_publish(transaction, context).await,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::PrePublish => "pre-publish",
            Stage::Publish => "publish",
            Stage::PostPublish => "post-publish",
        };
        f.write_str(name)
    }
}
