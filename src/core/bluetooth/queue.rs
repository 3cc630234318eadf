//! Per-device GATT operation serializer.
//! The transport allows exactly one outstanding GATT operation per
//! device; everything else waits here in strict submission order.

use std::collections::VecDeque;

use crate::core::bluetooth::types::PendingOperation;

/// Ties a dispatched operation to the completion that ends it.
pub type OperationId = u64;

/// Outcome of acknowledging an operation completion
#[derive(Debug)]
pub struct Advance {
    /// The operation that just finished
    pub finished: PendingOperation,
    /// The next operation promoted to in flight, if one was waiting
    pub dispatch: Option<(OperationId, PendingOperation)>,
}

/// FIFO queue with a single in-flight slot.
///
/// Invariants: at most one operation is in flight; waiting operations
/// dispatch in submission order; a completion only advances the queue
/// when its id matches the in-flight operation.
#[derive(Debug, Default)]
pub struct OperationQueue {
    next_id: OperationId,
    in_flight: Option<(OperationId, PendingOperation)>,
    waiting: VecDeque<(OperationId, PendingOperation)>,
}

impl OperationQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an operation. When the queue is idle the operation takes
    /// the in-flight slot immediately and is returned for dispatch;
    /// otherwise it waits its turn.
    pub fn enqueue(&mut self, op: PendingOperation) -> Option<(OperationId, PendingOperation)> {
        self.next_id += 1;
        let entry = (self.next_id, op);
        if self.in_flight.is_none() {
            self.in_flight = Some(entry.clone());
            Some(entry)
        } else {
            self.waiting.push_back(entry);
            None
        }
    }

    /// Acknowledges the completion of operation `id`.
    /// Returns `None` for a stale id (an operation that already timed
    /// out or was never dispatched); the queue state is untouched then.
    pub fn complete(&mut self, id: OperationId) -> Option<Advance> {
        match self.in_flight.take() {
            Some((current, finished)) if current == id => {
                let dispatch = self.waiting.pop_front();
                self.in_flight = dispatch.clone();
                Some(Advance { finished, dispatch })
            }
            other => {
                self.in_flight = other;
                None
            }
        }
    }

    /// Removes every waiting operation, leaving the in-flight slot
    /// alone (a dispatched operation cannot be revoked, only awaited).
    /// Returns the operations that will now never run.
    pub fn drain_waiting(&mut self) -> Vec<PendingOperation> {
        self.waiting.drain(..).map(|(_, op)| op).collect()
    }

    /// Empties the queue entirely, in-flight slot included. Teardown
    /// only: any late completion for the revoked slot is rejected as
    /// stale by `complete`.
    pub fn clear(&mut self) -> Vec<PendingOperation> {
        let mut dropped: Vec<PendingOperation> =
            self.in_flight.take().map(|(_, op)| op).into_iter().collect();
        dropped.extend(self.waiting.drain(..).map(|(_, op)| op));
        dropped
    }

    /// The currently dispatched operation, if any
    pub fn in_flight(&self) -> Option<&(OperationId, PendingOperation)> {
        self.in_flight.as_ref()
    }

    /// True when nothing is in flight and nothing waits
    pub fn is_idle(&self) -> bool {
        self.in_flight.is_none() && self.waiting.is_empty()
    }

    /// Number of operations waiting behind the in-flight one
    pub fn waiting_len(&self) -> usize {
        self.waiting.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn read_op(n: u128) -> PendingOperation {
        PendingOperation::ReadCharacteristic(Uuid::from_u128(n))
    }

    #[test]
    fn first_enqueue_dispatches_immediately() {
        let mut queue = OperationQueue::new();
        let dispatched = queue.enqueue(PendingOperation::Connect);
        assert!(matches!(dispatched, Some((_, PendingOperation::Connect))));
        assert!(!queue.is_idle());
        assert_eq!(queue.waiting_len(), 0);
    }

    #[test]
    fn completions_advance_in_submission_order() {
        let mut queue = OperationQueue::new();
        let (first_id, _) = queue.enqueue(read_op(1)).unwrap();
        assert!(queue.enqueue(read_op(2)).is_none());
        assert!(queue.enqueue(read_op(3)).is_none());
        assert_eq!(queue.waiting_len(), 2);

        let advance = queue.complete(first_id).unwrap();
        assert_eq!(advance.finished, read_op(1));
        let (second_id, second) = advance.dispatch.unwrap();
        assert_eq!(second, read_op(2));

        let advance = queue.complete(second_id).unwrap();
        assert_eq!(advance.finished, read_op(2));
        let (third_id, third) = advance.dispatch.unwrap();
        assert_eq!(third, read_op(3));

        let advance = queue.complete(third_id).unwrap();
        assert_eq!(advance.finished, read_op(3));
        assert!(advance.dispatch.is_none());
        assert!(queue.is_idle());
    }

    #[test]
    fn only_one_operation_in_flight_at_a_time() {
        let mut queue = OperationQueue::new();
        let (id, _) = queue.enqueue(read_op(1)).unwrap();
        for n in 2..=5 {
            assert!(queue.enqueue(read_op(n)).is_none(), "op {} must wait", n);
            assert_eq!(queue.in_flight().unwrap().0, id);
        }
    }

    #[test]
    fn stale_completion_is_ignored() {
        let mut queue = OperationQueue::new();
        let (id, _) = queue.enqueue(read_op(1)).unwrap();
        queue.enqueue(read_op(2));

        assert!(queue.complete(id + 100).is_none());
        assert_eq!(queue.in_flight().unwrap().0, id);
        assert_eq!(queue.waiting_len(), 1);

        // A completion for an id that already advanced is also stale
        queue.complete(id).unwrap();
        assert!(queue.complete(id).is_none());
    }

    #[test]
    fn completion_on_idle_queue_is_stale() {
        let mut queue = OperationQueue::new();
        assert!(queue.complete(1).is_none());
        assert!(queue.is_idle());
    }

    #[test]
    fn drain_clears_waiting_but_not_in_flight() {
        let mut queue = OperationQueue::new();
        let (id, _) = queue.enqueue(PendingOperation::Connect).unwrap();
        queue.enqueue(read_op(1));
        queue.enqueue(read_op(2));

        let drained = queue.drain_waiting();
        assert_eq!(drained, vec![read_op(1), read_op(2)]);
        assert_eq!(queue.in_flight().unwrap().0, id);
        assert!(!queue.is_idle());

        let advance = queue.complete(id).unwrap();
        assert!(advance.dispatch.is_none());
        assert!(queue.is_idle());
    }

    #[test]
    fn queue_reuses_cleanly_after_idle() {
        let mut queue = OperationQueue::new();
        let (id, _) = queue.enqueue(read_op(1)).unwrap();
        queue.complete(id).unwrap();
        assert!(queue.is_idle());

        let (next_id, _) = queue.enqueue(read_op(2)).unwrap();
        assert!(next_id > id, "ids keep increasing across idle periods");
    }

    #[test]
    fn clear_revokes_in_flight_and_waiting() {
        let mut queue = OperationQueue::new();
        let (id, _) = queue.enqueue(PendingOperation::Connect).unwrap();
        queue.enqueue(read_op(1));
        queue.enqueue(read_op(2));

        let dropped = queue.clear();
        assert_eq!(
            dropped,
            vec![PendingOperation::Connect, read_op(1), read_op(2)]
        );
        assert!(queue.is_idle());

        // The revoked slot's completion is now stale
        assert!(queue.complete(id).is_none());
    }
}
