use std::collections::{BTreeSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::sync::Notify;

use super::Transport;

/// One call to [`Transport::send`] as seen by a [`LoopbackLink`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentFragment {
    /// Bytes offered to the link, terminator included.
    pub bytes: Vec<u8>,

    /// Transfer unit in force when the fragment was offered.
    pub transfer_unit: usize,

    /// Whether the link accepted the fragment.
    pub accepted: bool,
}

impl SentFragment {
    /// Returns the fragment payload without its terminator.
    pub fn payload(&self) -> &[u8] {
        match self.bytes.split_last() {
            Some((_, payload)) => payload,
            None => &[],
        }
    }
}

#[derive(Debug, Default)]
struct LinkState {
    connected: bool,
    sessions: u64,
    reads_started: u64,
    inbound: VecDeque<Vec<u8>>,
    sent: Vec<SentFragment>,
    failing_sends: BTreeSet<usize>,
    sends_held: bool,
    scheduled_unit: Option<(usize, usize)>,
}

/// A scripted in-memory link for testing.
///
/// Tests push inbound messages, toggle the connection, change the
/// transfer unit and inject send failures; every fragment offered to
/// [`Transport::send`] is recorded.
#[derive(Debug)]
pub struct LoopbackLink {
    state: Mutex<LinkState>,
    transfer_unit: AtomicUsize,
    changed: Notify,
}

impl LoopbackLink {
    /// Creates a disconnected link reporting `transfer_unit`.
    pub fn new(transfer_unit: usize) -> Self {
        Self {
            state: Mutex::new(LinkState::default()),
            transfer_unit: AtomicUsize::new(transfer_unit),
            changed: Notify::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, LinkState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn update<R>(&self, f: impl FnOnce(&mut LinkState) -> R) -> R {
        let result = f(&mut self.lock());
        self.changed.notify_waiters();
        result
    }

    /// Starts a peer session.
    pub fn connect(&self) {
        self.update(|state| {
            state.connected = true;
            state.sessions += 1;
        });
    }

    /// Ends the peer session. Undelivered inbound messages are lost.
    pub fn disconnect(&self) {
        self.update(|state| {
            state.connected = false;
            state.inbound.clear();
        });
    }

    /// Queues one complete inbound message.
    pub fn push_message(&self, message: &[u8]) {
        self.update(|state| state.inbound.push_back(message.to_vec()));
    }

    /// Changes the transfer unit immediately.
    pub fn set_transfer_unit(&self, transfer_unit: usize) {
        self.transfer_unit.store(transfer_unit, Ordering::Release);
    }

    /// Changes the transfer unit once `sends` fragments have been offered.
    pub fn set_transfer_unit_after(&self, sends: usize, transfer_unit: usize) {
        self.update(|state| state.scheduled_unit = Some((sends, transfer_unit)));
    }

    /// Makes the send call with the given zero-based index fail.
    pub fn fail_send(&self, index: usize) {
        self.update(|state| {
            state.failing_sends.insert(index);
        });
    }

    /// Parks every `send` call until [`LoopbackLink::release_sends`].
    pub fn hold_sends(&self) {
        self.update(|state| state.sends_held = true);
    }

    /// Lets parked and future `send` calls proceed.
    pub fn release_sends(&self) {
        self.update(|state| state.sends_held = false);
    }

    /// Returns every fragment offered so far.
    pub fn sent(&self) -> Vec<SentFragment> {
        self.lock().sent.clone()
    }

    /// Returns how many fragments have been offered.
    pub fn sent_count(&self) -> usize {
        self.lock().sent.len()
    }

    /// Returns how many inbound messages are still queued.
    pub fn pending_inbound(&self) -> usize {
        self.lock().inbound.len()
    }

    /// Returns how many sessions have been started.
    pub fn sessions(&self) -> u64 {
        self.lock().sessions
    }

    /// Returns how many times `read_message` has been entered.
    pub fn reads_started(&self) -> u64 {
        self.lock().reads_started
    }

    /// Waits until at least `count` fragments have been offered.
    pub async fn wait_for_sent(&self, count: usize) {
        self.wait_until(|state| state.sent.len() >= count).await;
    }

    /// Waits until `read_message` has been entered at least `count` times
    /// and no inbound message is queued.
    pub async fn wait_for_reads(&self, count: u64) {
        self.wait_until(|state| state.reads_started >= count && state.inbound.is_empty())
            .await;
    }

    async fn wait_until(&self, mut ready: impl FnMut(&LinkState) -> bool + Send) {
        loop {
            let notified = self.changed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let done = ready(&*self.lock());
            if done {
                return;
            }
            notified.await;
        }
    }
}

impl Default for LoopbackLink {
    fn default() -> Self {
        Self::new(crate::MIN_TRANSFER_UNIT)
    }
}

impl Transport for LoopbackLink {
    fn is_connected(&self) -> bool {
        self.lock().connected
    }

    fn current_transfer_unit(&self) -> usize {
        self.transfer_unit.load(Ordering::Acquire)
    }

    async fn wait_for_connection(&self) {
        self.wait_until(|state| state.connected).await;
    }

    async fn read_message(&self, buf: &mut Vec<u8>) -> Option<usize> {
        self.update(|state| state.reads_started += 1);

        loop {
            let notified = self.changed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let next = {
                let mut state = self.lock();
                if !state.connected {
                    return None;
                }
                state.inbound.pop_front()
            };

            if let Some(message) = next {
                buf.clear();
                buf.extend_from_slice(&message);
                return Some(message.len());
            }
            notified.await;
        }
    }

    async fn send(&self, fragment: &[u8]) -> bool {
        self.wait_until(|state| !state.sends_held).await;

        let transfer_unit = self.current_transfer_unit();
        let accepted = self.update(|state| {
            let index = state.sent.len();
            let accepted = state.connected && !state.failing_sends.contains(&index);
            state.sent.push(SentFragment {
                bytes: fragment.to_vec(),
                transfer_unit,
                accepted,
            });

            if let Some((after, unit)) = state.scheduled_unit {
                if state.sent.len() >= after {
                    self.transfer_unit.store(unit, Ordering::Release);
                    state.scheduled_unit = None;
                }
            }
            accepted
        });
        accepted
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_read_in_order() {
        let link = LoopbackLink::new(247);
        link.connect();
        link.push_message(b"Hello");
        link.push_message(b"World!");

        let mut buf = Vec::new();
        assert_eq!(link.read_message(&mut buf).await, Some(5));
        assert_eq!(buf, b"Hello");
        assert_eq!(link.read_message(&mut buf).await, Some(6));
        assert_eq!(buf, b"World!");
        assert_eq!(link.reads_started(), 2);
    }

    #[tokio::test]
    async fn test_disconnect_wakes_reader() {
        let link = std::sync::Arc::new(LoopbackLink::new(247));
        link.connect();

        let reader = {
            let link = link.clone();
            tokio::spawn(async move {
                let mut buf = Vec::new();
                link.read_message(&mut buf).await
            })
        };

        link.wait_for_reads(1).await;
        link.disconnect();
        assert_eq!(reader.await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_send_records_and_fails() {
        let link = LoopbackLink::new(100);
        assert!(!link.send(b"x\0").await);

        link.connect();
        link.fail_send(2);
        link.set_transfer_unit_after(2, 50);

        assert!(link.send(b"a\0").await);
        assert!(!link.send(b"b\0").await);

        let sent = link.sent();
        assert_eq!(sent.len(), 3);
        assert_eq!(sent[1].payload(), b"a");
        assert_eq!(sent[1].transfer_unit, 100);
        assert_eq!(sent[2].transfer_unit, 50);
        assert!(!sent[2].accepted);
        assert_eq!(link.current_transfer_unit(), 50);
    }

    #[tokio::test]
    async fn test_held_sends_wait_for_release() {
        let link = std::sync::Arc::new(LoopbackLink::new(100));
        link.connect();
        link.hold_sends();

        let sender = {
            let link = link.clone();
            tokio::spawn(async move { link.send(b"held\0").await })
        };

        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert_eq!(link.sent_count(), 0);

        link.release_sends();
        assert!(sender.await.unwrap());
        assert_eq!(link.sent_count(), 1);
    }

    #[tokio::test]
    async fn test_wait_for_connection() {
        let link = std::sync::Arc::new(LoopbackLink::default());
        let waiter = {
            let link = link.clone();
            tokio::spawn(async move { link.wait_for_connection().await })
        };

        link.connect();
        waiter.await.unwrap();
        assert!(link.is_connected());
        assert_eq!(link.sessions(), 1);
    }
}
