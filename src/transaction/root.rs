//! Hierarchical composition of transactions.

use crate::error::{Error, Result};
use crate::transaction::Transaction;
use crate::value::Value;

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinSet;

type Child = Arc<Mutex<Box<dyn Transaction>>>;

#[derive(Debug, Clone, Copy)]
enum Phase {
    Commit,
    Rollback,
}

impl Phase {
    fn name(self) -> &'static str {
        match self {
            Phase::Commit => "commit",
            Phase::Rollback => "rollback",
        }
    }
}

/// Runs child transactions as an ordered sequence of concurrent groups.
///
/// [`add_child`](Self::add_child) starts a new group, so the child runs after
/// everything added before it and before everything added after it.
/// [`add_child_parallel`](Self::add_child_parallel) joins the most recent
/// group, so the child runs concurrently with whatever was added last.
///
/// ```
/// # use txpublish::RootTransaction;
/// # use txpublish::fs::FilesystemTransaction;
/// let mut root = RootTransaction::new();
/// root.add_child(FilesystemTransaction::new("/srv/pkg"));
/// root.add_child_parallel(FilesystemTransaction::new("/srv/pkg"));
/// root.add_child(FilesystemTransaction::new("/srv/pkg"));
///
/// assert_eq!(root.group_sizes(), vec![2, 1]);
/// ```
#[derive(Default)]
pub struct RootTransaction {
    groups: Vec<Vec<Child>>,
}

impl RootTransaction {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a child in a new sequential group.
    pub fn add_child<T: Transaction + 'static>(&mut self, child: T) {
        self.groups.push(vec![Self::wrap(child)]);
    }

    /// Adds a child to the most recent group, creating one if none exists.
    pub fn add_child_parallel<T: Transaction + 'static>(&mut self, child: T) {
        if self.groups.is_empty() {
            self.groups.push(Vec::new());
        }

        if let Some(group) = self.groups.last_mut() {
            group.push(Self::wrap(child));
        }
    }

    /// Total number of children across all groups.
    pub fn len(&self) -> usize {
        self.groups.iter().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Sizes of the sequential groups, in execution order.
    pub fn group_sizes(&self) -> Vec<usize> {
        self.groups.iter().map(Vec::len).collect()
    }

    fn wrap<T: Transaction + 'static>(child: T) -> Child {
        Arc::new(Mutex::new(Box::new(child)))
    }

    async fn run(&self, phase: Phase) -> Result<()> {
        for (index, group) in self.groups.iter().enumerate() {
            log::debug!(
                "Running {} of group {} ({} children)",
                phase.name(),
                index,
                group.len()
            );
            run_group(group, phase).await?;
        }

        Ok(())
    }
}

/// Runs one cohort concurrently and waits for every member.
///
/// Reports the first failure to complete; later failures are only logged.
async fn run_group(group: &[Child], phase: Phase) -> Result<()> {
    let mut tasks = JoinSet::new();

    for child in group {
        let child = Arc::clone(child);
        tasks.spawn(async move {
            let mut child = child.lock().await;
            match phase {
                Phase::Commit => child.commit().await,
                Phase::Rollback => child.rollback().await,
            }
        });
    }

    let mut first_error: Option<Error> = None;

    while let Some(joined) = tasks.join_next().await {
        let result = joined.map_err(Error::from).and_then(|r| r);

        if let Err(err) = result {
            if first_error.is_none() {
                first_error = Some(err);
            } else {
                log::warn!("Additional {} failure in group: {}", phase.name(), err);
            }
        }
    }

    match first_error {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

#[async_trait]
impl Transaction for RootTransaction {
    async fn commit(&mut self) -> Result<()> {
        self.run(Phase::Commit).await
    }

    async fn rollback(&mut self) -> Result<()> {
        self.run(Phase::Rollback).await
    }

    fn value(&self) -> Option<Value> {
        let values = self
            .groups
            .iter()
            .flatten()
            .filter_map(|child| child.try_lock().ok().and_then(|child| child.value()))
            .collect();

        Some(Value::Array(values))
    }
}
