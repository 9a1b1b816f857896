//! Drives a [`Publish`] through its three stages.

use crate::error::{Error, Result};
use crate::publish::{Publish, Stage};
use crate::transaction::{RootTransaction, Transaction};

/// Runs a publish, starting from `context`.
///
/// Every stage gets a fresh [`RootTransaction`], which is committed once the
/// stage function returns. If a stage function or its commit fails, the
/// failing stage's transaction is rolled back, followed by every committed
/// stage transaction, newest first. All rollbacks are attempted even when an
/// earlier one fails.
///
/// # Errors
///
/// - [`Error::Stage`] wrapping the original failure when every rollback
///   succeeded.
/// - [`Error::Rollback`] when any rollback failed. It carries the last
///   rollback failure observed (the one closest to the first stage) and keeps
///   the stage failure as its `cause`.
pub async fn run<P>(publish: &P, context: P::Context) -> Result<P::Context>
where
    P: Publish + ?Sized,
{
    let mut committed: Vec<(Stage, RootTransaction)> = Vec::with_capacity(Stage::ALL.len());
    let mut context = context;

    for stage in Stage::ALL {
        let mut transaction = RootTransaction::new();
        log::debug!("Running {} stage", stage);

        let outcome = match stage.run(publish, &mut transaction, context).await {
            Ok(next) => transaction.commit().await.map(|()| next),
            Err(err) => Err(err),
        };

        match outcome {
            Ok(next) => {
                log::info!(
                    "Committed {} stage ({} transactions)",
                    stage,
                    transaction.len()
                );
                committed.push((stage, transaction));
                context = next;
            }
            Err(err) => return Err(rollback_stages(stage, transaction, committed, err).await),
        }
    }

    log::info!("Publish completed");
    Ok(context)
}

/// Rolls back the failing stage and then every committed stage, newest
/// first, returning the error the run should report.
async fn rollback_stages(
    failed: Stage,
    current: RootTransaction,
    committed: Vec<(Stage, RootTransaction)>,
    err: Error,
) -> Error {
    let cause = Error::Stage {
        stage: failed,
        source: Box::new(err),
    };
    log::warn!("{} stage failed: {}; rolling back", failed, cause);

    let mut last_failure: Option<(Stage, Error)> = None;
    let stages = std::iter::once((failed, current)).chain(committed.into_iter().rev());

    for (stage, mut transaction) in stages {
        match transaction.rollback().await {
            Ok(()) => log::info!("Rolled back {} stage", stage),
            Err(err) => {
                log::error!("Failed to roll back {} stage: {}", stage, err);
                last_failure = Some((stage, err));
            }
        }
    }

    match last_failure {
        Some((stage, error)) => Error::Rollback {
            stage,
            error: Box::new(error),
            cause: Box::new(cause),
        },
        None => cause,
    }
}
