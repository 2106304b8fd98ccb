//! Node pool
//!
//! Each configured node owns a semaphore with one permit per executor.
//! Acquiring a label waits on every matching node at once and takes the
//! first permit granted; the permit is released when the lease drops.

use futures::future::{BoxFuture, FutureExt, select_all};
use keel_core::domain::node::Node;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, info};

use crate::error::RunError;

struct NodeSlot {
    node: Node,
    permits: Arc<Semaphore>,
}

/// Set of nodes node blocks can be scheduled onto
pub struct NodePool {
    slots: Vec<NodeSlot>,
    acquire_timeout: Option<Duration>,
}

/// Exclusive use of one executor slot of a node
pub struct NodeLease {
    node: Node,
    _permit: OwnedSemaphorePermit,
}

impl NodeLease {
    pub fn node(&self) -> &Node {
        &self.node
    }
}

impl NodePool {
    pub fn new(nodes: Vec<Node>, acquire_timeout: Option<Duration>) -> Self {
        let slots = nodes
            .into_iter()
            .map(|node| NodeSlot {
                permits: Arc::new(Semaphore::new(node.executors.min(Semaphore::MAX_PERMITS))),
                node,
            })
            .collect();

        Self {
            slots,
            acquire_timeout,
        }
    }

    /// Free executor slots of the node called `name`
    pub fn available(&self, name: &str) -> Option<usize> {
        self.slots
            .iter()
            .find(|slot| slot.node.name == name)
            .map(|slot| slot.permits.available_permits())
    }

    /// Acquires a node answering to `label`
    ///
    /// Free nodes are tried in configuration order first. Otherwise waits
    /// for whichever matching node frees up first, bounded by the acquire
    /// timeout when one is configured.
    pub async fn acquire(&self, label: &str) -> Result<NodeLease, RunError> {
        let candidates: Vec<&NodeSlot> = self
            .slots
            .iter()
            .filter(|slot| slot.node.matches(label))
            .collect();

        if candidates.is_empty() {
            return Err(RunError::NoMatchingNode(label.to_string()));
        }

        for slot in &candidates {
            if let Ok(permit) = slot.permits.clone().try_acquire_owned() {
                info!("Acquired node '{}' for label '{}'", slot.node.name, label);
                return Ok(NodeLease {
                    node: slot.node.clone(),
                    _permit: permit,
                });
            }
        }

        debug!(
            "All {} node(s) for label '{}' are busy, waiting",
            candidates.len(),
            label
        );

        let waits: Vec<BoxFuture<'_, Option<(Node, OwnedSemaphorePermit)>>> = candidates
            .iter()
            .map(|slot| {
                let permits = slot.permits.clone();
                let node = slot.node.clone();
                async move { permits.acquire_owned().await.ok().map(|p| (node, p)) }.boxed()
            })
            .collect();

        let first = select_all(waits);
        let (granted, _, _) = match self.acquire_timeout {
            Some(timeout) => tokio::time::timeout(timeout, first).await.map_err(|_| {
                RunError::AcquireTimeout {
                    label: label.to_string(),
                    timeout,
                }
            })?,
            None => first.await,
        };

        let (node, permit) = granted.ok_or_else(|| RunError::NoMatchingNode(label.to_string()))?;
        info!("Acquired node '{}' for label '{}'", node.name, label);

        Ok(NodeLease {
            node,
            _permit: permit,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keel_core::domain::node::ANY_LABEL;

    fn labelled(name: &str, label: &str) -> Node {
        Node::new(name, vec![label.to_string()])
    }

    #[tokio::test]
    async fn test_acquire_matching_node() {
        let pool = NodePool::new(
            vec![labelled("py", "py35"), labelled("go", "mesos")],
            None,
        );

        let lease = pool.acquire("mesos").await.unwrap();
        assert_eq!(lease.node().name, "go");
        assert_eq!(pool.available("go"), Some(0));

        drop(lease);
        assert_eq!(pool.available("go"), Some(1));
    }

    #[tokio::test]
    async fn test_no_matching_node_fails_immediately() {
        let pool = NodePool::new(vec![labelled("py", "py35")], None);

        let err = pool.acquire("mesos").await.err().unwrap();
        assert!(matches!(err, RunError::NoMatchingNode(label) if label == "mesos"));
    }

    #[tokio::test]
    async fn test_wildcard_node_matches_any_label() {
        let pool = NodePool::new(vec![Node::new("local", vec![ANY_LABEL.to_string()])], None);

        let lease = pool.acquire("anything").await.unwrap();
        assert_eq!(lease.node().name, "local");
    }

    #[tokio::test]
    async fn test_busy_node_times_out() {
        let pool = NodePool::new(
            vec![labelled("py", "py35")],
            Some(Duration::from_millis(50)),
        );

        let _held = pool.acquire("py35").await.unwrap();
        let err = pool.acquire("py35").await.err().unwrap();
        assert!(matches!(err, RunError::AcquireTimeout { .. }));
    }

    #[tokio::test]
    async fn test_single_executor_serialises_acquisitions() {
        let pool = Arc::new(NodePool::new(vec![labelled("py", "py35")], None));

        let first = pool.acquire("py35").await.unwrap();

        let waiter = {
            let pool = pool.clone();
            tokio::spawn(async move { pool.acquire("py35").await.map(|l| l.node().name.clone()) })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!waiter.is_finished());

        drop(first);
        let name = waiter.await.unwrap().unwrap();
        assert_eq!(name, "py");
    }

    #[tokio::test]
    async fn test_waits_on_every_matching_node() {
        let pool = Arc::new(NodePool::new(
            vec![labelled("py-a", "py35"), labelled("py-b", "py35")],
            None,
        ));

        let _a = pool.acquire("py35").await.unwrap();
        let b = pool.acquire("py35").await.unwrap();
        assert_eq!(b.node().name, "py-b");

        let waiter = {
            let pool = pool.clone();
            tokio::spawn(async move { pool.acquire("py35").await.map(|l| l.node().name.clone()) })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        drop(b);
        assert_eq!(waiter.await.unwrap().unwrap(), "py-b");
    }

    #[tokio::test]
    async fn test_multiple_executors() {
        let pool = NodePool::new(vec![labelled("py", "py35").with_executors(2)], None);

        let _one = pool.acquire("py35").await.unwrap();
        let _two = pool.acquire("py35").await.unwrap();
        assert_eq!(pool.available("py"), Some(0));
    }
}
