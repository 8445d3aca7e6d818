//! Pending transaction table.
//!
//! Maps a hop-by-hop id to the outbound request waiting for its answer.
//! Every way out of the table (answer, timeout, cancellation, teardown) is
//! a removal under the table lock. Whichever path removes the entry owns
//! its completion handle; every other path finds nothing and does nothing.
//!
//! ```text
//!  register ──► [ id → PendingTransaction ] ──┬─► resolve_with_response  (answer)
//!                                              ├─► expire                 (deadline)
//!                                              ├─► cancel                 (caller gone)
//!                                              └─► fail_all               (teardown)
//! ```

use std::collections::HashMap;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio::time::Instant;

use crate::error::{Result, SessionError};
use crate::protocol::Message;

/// Receiving side of a transaction's completion handle.
pub(crate) type CompletionReceiver = oneshot::Receiver<Result<Message>>;

/// An outbound request awaiting its answer.
#[derive(Debug)]
pub(crate) struct PendingTransaction {
    request: Message,
    completion: oneshot::Sender<Result<Message>>,
    deadline: Instant,
}

impl PendingTransaction {
    /// Create a transaction and the receiver its outcome will be sent to.
    pub(crate) fn new(request: Message, deadline: Instant) -> (Self, CompletionReceiver) {
        let (completion, rx) = oneshot::channel();
        let txn = Self {
            request,
            completion,
            deadline,
        };
        (txn, rx)
    }

    /// Deliver the outcome, handing back the original request.
    fn complete(self, outcome: Result<Message>) -> Message {
        // The caller may have stopped waiting; that is not an error here.
        let _ = self.completion.send(outcome);
        self.request
    }
}

/// Outstanding transactions of one session.
#[derive(Debug)]
pub(crate) struct TransactionTable {
    entries: Mutex<HashMap<u32, PendingTransaction>>,
    max_pending: usize,
}

impl TransactionTable {
    pub(crate) fn new(max_pending: usize) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            max_pending,
        }
    }

    /// Add a transaction.
    ///
    /// Fails if `id` is already outstanding; the existing entry is left
    /// untouched.
    pub(crate) fn register(&self, id: u32, txn: PendingTransaction) -> Result<()> {
        let mut entries = self.entries.lock();
        if entries.contains_key(&id) {
            tracing::error!(hop_by_hop_id = id, "hop-by-hop id collision with outstanding request");
            return Err(SessionError::DuplicateTransaction(id));
        }
        if entries.len() >= self.max_pending {
            tracing::warn!(
                pending = entries.len(),
                max_pending = self.max_pending,
                "too many pending requests; refusing new request"
            );
            return Err(SessionError::TooManyPending(self.max_pending));
        }

        entries.insert(id, txn);
        tracing::trace!(hop_by_hop_id = id, pending = entries.len(), "registered transaction");
        Ok(())
    }

    /// Resolve the transaction for `id` with an answer.
    ///
    /// `before_resolve` runs on the answer after the entry is claimed and
    /// before the waiting caller is woken. Returns the original request on
    /// a match; `None` leaves the table unchanged.
    pub(crate) fn resolve_with_response<F>(
        &self,
        id: u32,
        response: Message,
        before_resolve: F,
    ) -> Option<Message>
    where
        F: FnOnce(&Message),
    {
        let txn = self.entries.lock().remove(&id)?;
        tracing::debug!(
            hop_by_hop_id = id,
            remaining = ?txn.deadline.saturating_duration_since(Instant::now()),
            "answer matched pending request"
        );
        before_resolve(&response);
        Some(txn.complete(Ok(response)))
    }

    /// Fail the transaction for `id` with a timeout, if it is still pending.
    ///
    /// Returns `false` when the answer already won.
    pub(crate) fn expire(&self, id: u32, timeout: Duration) -> bool {
        let Some(txn) = self.entries.lock().remove(&id) else {
            return false;
        };
        tracing::debug!(
            hop_by_hop_id = id,
            timeout_ms = timeout.as_millis() as u64,
            "request timed out"
        );
        txn.complete(Err(SessionError::RequestTimeout {
            hop_by_hop_id: id,
            timeout,
        }));
        true
    }

    /// Drop the transaction for `id` without notifying anyone.
    ///
    /// Used when the waiting caller itself went away.
    pub(crate) fn cancel(&self, id: u32) -> bool {
        let removed = self.entries.lock().remove(&id);
        if removed.is_some() {
            tracing::debug!(hop_by_hop_id = id, "request abandoned by caller");
        }
        removed.is_some()
    }

    /// Fail every outstanding transaction with `SessionClosed`.
    ///
    /// Returns the number of transactions failed.
    pub(crate) fn fail_all(&self) -> usize {
        let drained: Vec<_> = self.entries.lock().drain().collect();
        let count = drained.len();
        for (_, txn) in drained {
            txn.complete(Err(SessionError::SessionClosed));
        }
        if count > 0 {
            tracing::debug!(count, "failed pending requests on session close");
        }
        count
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.lock().len()
    }

    #[cfg(test)]
    pub(crate) fn contains(&self, id: u32) -> bool {
        self.entries.lock().contains_key(&id)
    }
}

/// Cancels a transaction when the sending future is dropped early.
pub(crate) struct TransactionGuard<'a> {
    table: &'a TransactionTable,
    id: u32,
    armed: bool,
}

impl<'a> TransactionGuard<'a> {
    pub(crate) fn new(table: &'a TransactionTable, id: u32) -> Self {
        Self {
            table,
            id,
            armed: true,
        }
    }

    /// The transaction reached a terminal state; nothing to clean up.
    pub(crate) fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for TransactionGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.table.cancel(self.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{flags, Header};
    use bytes::Bytes;

    fn request(id: u32) -> Message {
        let mut header = Header::new(flags::REQUEST, 272, 4, 20);
        header.hop_by_hop_id = id;
        Message::new(header, Bytes::new())
    }

    fn answer(id: u32) -> Message {
        let mut header = Header::new(0, 272, 4, 20);
        header.hop_by_hop_id = id;
        Message::new(header, Bytes::new())
    }

    fn deadline() -> Instant {
        Instant::now() + Duration::from_secs(3)
    }

    #[tokio::test]
    async fn test_resolve_delivers_answer_and_removes_entry() {
        let table = TransactionTable::new(16);
        let (txn, rx) = PendingTransaction::new(request(7), deadline());
        table.register(7, txn).unwrap();

        let original = table.resolve_with_response(7, answer(7), |_| {});
        assert_eq!(original.unwrap().hop_by_hop_id(), 7);
        assert_eq!(table.len(), 0);

        let delivered = rx.await.unwrap().unwrap();
        assert!(!delivered.is_request());
        assert_eq!(delivered.hop_by_hop_id(), 7);
    }

    #[test]
    fn test_unmatched_response_leaves_table_unchanged() {
        let table = TransactionTable::new(16);
        let (txn, _rx) = PendingTransaction::new(request(1), deadline());
        table.register(1, txn).unwrap();

        let mut observed = false;
        assert!(table
            .resolve_with_response(2, answer(2), |_| observed = true)
            .is_none());
        assert!(!observed);
        assert!(table.contains(1));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_duplicate_registration_is_rejected() {
        let table = TransactionTable::new(16);
        let (first, _rx1) = PendingTransaction::new(request(5), deadline());
        let (second, _rx2) = PendingTransaction::new(request(5), deadline());

        table.register(5, first).unwrap();
        let err = table.register(5, second).unwrap_err();
        assert!(matches!(err, SessionError::DuplicateTransaction(5)));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_pending_limit() {
        let table = TransactionTable::new(2);
        for id in 0..2 {
            let (txn, _rx) = PendingTransaction::new(request(id), deadline());
            table.register(id, txn).unwrap();
        }
        let (txn, _rx) = PendingTransaction::new(request(9), deadline());
        assert!(matches!(
            table.register(9, txn),
            Err(SessionError::TooManyPending(2))
        ));
    }

    #[tokio::test]
    async fn test_expire_fails_with_timeout() {
        let table = TransactionTable::new(16);
        let (txn, rx) = PendingTransaction::new(request(3), deadline());
        table.register(3, txn).unwrap();

        assert!(table.expire(3, Duration::from_millis(50)));
        let err = rx.await.unwrap().unwrap_err();
        assert!(matches!(
            err,
            SessionError::RequestTimeout {
                hop_by_hop_id: 3,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_first_terminal_transition_wins() {
        let table = TransactionTable::new(16);
        let (txn, rx) = PendingTransaction::new(request(4), deadline());
        table.register(4, txn).unwrap();

        assert!(table.resolve_with_response(4, answer(4), |_| {}).is_some());
        // Timeout losing the race is a no-op.
        assert!(!table.expire(4, Duration::from_millis(10)));
        // A late duplicate answer finds nothing.
        assert!(table.resolve_with_response(4, answer(4), |_| {}).is_none());

        assert!(rx.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_expired_entry_ignores_late_answer() {
        let table = TransactionTable::new(16);
        let (txn, rx) = PendingTransaction::new(request(8), deadline());
        table.register(8, txn).unwrap();

        assert!(table.expire(8, Duration::from_millis(50)));
        assert!(table.resolve_with_response(8, answer(8), |_| {}).is_none());
        assert!(rx.await.unwrap().is_err());
    }

    #[tokio::test]
    async fn test_fail_all_closes_every_transaction() {
        let table = TransactionTable::new(16);
        let mut receivers = Vec::new();
        for id in 10..13 {
            let (txn, rx) = PendingTransaction::new(request(id), deadline());
            table.register(id, txn).unwrap();
            receivers.push(rx);
        }

        assert_eq!(table.fail_all(), 3);
        assert_eq!(table.len(), 0);
        for rx in receivers {
            assert!(matches!(
                rx.await.unwrap(),
                Err(SessionError::SessionClosed)
            ));
        }
    }

    #[test]
    fn test_id_reusable_after_resolution() {
        let table = TransactionTable::new(16);
        let (txn, _rx) = PendingTransaction::new(request(1), deadline());
        table.register(1, txn).unwrap();
        table.resolve_with_response(1, answer(1), |_| {});

        let (txn, _rx) = PendingTransaction::new(request(1), deadline());
        assert!(table.register(1, txn).is_ok());
    }

    #[test]
    fn test_guard_cancels_unless_disarmed() {
        let table = TransactionTable::new(16);
        let (txn, _rx) = PendingTransaction::new(request(1), deadline());
        table.register(1, txn).unwrap();
        let (txn, _rx2) = PendingTransaction::new(request(2), deadline());
        table.register(2, txn).unwrap();

        drop(TransactionGuard::new(&table, 1));
        let mut kept = TransactionGuard::new(&table, 2);
        kept.disarm();
        drop(kept);

        assert!(!table.contains(1));
        assert!(table.contains(2));
    }
}
