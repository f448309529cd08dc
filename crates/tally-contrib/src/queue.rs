//! The durable contribution queue.
//!
//! FIFO by creation order. Entries are never mutated in place; a peeked
//! entry stays at the head until the engine explicitly removes it after
//! the settlement reaches a terminal state. A crash between peek and
//! settlement simply re-peeks the same entry, which is what guarantees
//! at-most-one in-flight settlement per entry across restarts.

use tracing::info;

use tally_db::queries::queue;
use tally_db::Store;
use tally_types::contribution::QueueEntry;

use crate::{ContribError, Result};

/// Validates and persists queue entries.
pub struct ContributionQueue;

impl ContributionQueue {
    /// Append an entry. Enqueueing an id that already exists is a no-op.
    ///
    /// # Errors
    ///
    /// - [`ContribError::InvalidEntry`] if the amount is zero, there are
    ///   no allocations, or any allocation weight is not positive
    pub fn enqueue(store: &Store, entry: &QueueEntry, now: u64) -> Result<()> {
        if entry.total_amount == 0 {
            return Err(ContribError::InvalidEntry("zero total amount".into()));
        }
        if entry.allocations.is_empty() {
            return Err(ContribError::InvalidEntry("no allocations".into()));
        }
        if entry.allocations.iter().any(|a| a.weight <= 0.0) {
            return Err(ContribError::InvalidEntry(format!(
                "non-positive allocation weight in entry {}",
                entry.id
            )));
        }
        queue::enqueue(store.conn(), entry, now)?;
        info!(
            id = %entry.id,
            kind = entry.kind.as_str(),
            amount = entry.total_amount,
            "contribution enqueued"
        );
        Ok(())
    }

    /// The oldest entry, without removing it.
    pub fn peek_first(store: &Store) -> Result<Option<QueueEntry>> {
        Ok(queue::peek_first(store.conn())?)
    }

    /// Remove a settled entry.
    pub fn remove(store: &Store, id: &str) -> Result<()> {
        Ok(queue::remove(store.conn(), id)?)
    }

    /// Drop every queued entry.
    pub fn clear(store: &Store) -> Result<()> {
        Ok(queue::clear(store.conn())?)
    }

    /// Number of queued entries.
    pub fn len(store: &Store) -> Result<u64> {
        Ok(queue::len(store.conn())?)
    }
}

#[cfg(test)]
mod tests {
    use tally_types::contribution::{Allocation, ContributionKind};

    use super::*;

    fn entry(id: &str, amount: u64) -> QueueEntry {
        QueueEntry {
            id: id.to_string(),
            kind: ContributionKind::OneTimeTip,
            total_amount: amount,
            partial: false,
            allocations: vec![Allocation {
                publisher_key: "example.org".into(),
                weight: amount as f64,
            }],
        }
    }

    #[test]
    fn test_fifo_order() {
        let store = tally_db::open_memory().expect("open test db");
        ContributionQueue::enqueue(&store, &entry("a", 100), 1).expect("enqueue a");
        ContributionQueue::enqueue(&store, &entry("b", 200), 2).expect("enqueue b");

        let head = ContributionQueue::peek_first(&store)
            .expect("peek")
            .expect("entry");
        assert_eq!(head.id, "a");

        ContributionQueue::remove(&store, "a").expect("remove");
        let head = ContributionQueue::peek_first(&store)
            .expect("peek")
            .expect("entry");
        assert_eq!(head.id, "b");
    }

    #[test]
    fn test_zero_amount_rejected() {
        let store = tally_db::open_memory().expect("open test db");
        let result = ContributionQueue::enqueue(&store, &entry("a", 0), 1);
        assert!(matches!(result, Err(ContribError::InvalidEntry(_))));
    }

    #[test]
    fn test_no_allocations_rejected() {
        let store = tally_db::open_memory().expect("open test db");
        let mut bad = entry("a", 100);
        bad.allocations.clear();
        assert!(ContributionQueue::enqueue(&store, &bad, 1).is_err());
    }

    #[test]
    fn test_duplicate_id_is_noop() {
        let store = tally_db::open_memory().expect("open test db");
        ContributionQueue::enqueue(&store, &entry("a", 100), 1).expect("first");
        ContributionQueue::enqueue(&store, &entry("a", 500), 2).expect("second");
        assert_eq!(ContributionQueue::len(&store).expect("len"), 1);

        let head = ContributionQueue::peek_first(&store)
            .expect("peek")
            .expect("entry");
        assert_eq!(head.total_amount, 100);
    }
}
