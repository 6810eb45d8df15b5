//! Client session: the terminal delivering signals to one connection.
//!
//! Each signal is serialized once (the payload is cached on the signal) and
//! pushed onto the connection's outbound queue as a shared `Arc<str>`, so a
//! signal fanned out to 100 sessions is encoded once. The hub's per-signal
//! visited set guarantees a session sees a signal at most once even when it
//! is wired in through several paths.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;
use waffletalk_core::{DeliveryError, Signal, Snowflake, Terminal};

use crate::domain::RecordKind;

/// Frames queued for one connection, in send order.
pub type Outbound = mpsc::UnboundedSender<Arc<str>>;

/// Delivery counters, shared with the connection task.
#[derive(Debug, Default)]
pub struct SessionStats {
    delivered: AtomicU64,
    failed: AtomicU64,
}

impl SessionStats {
    pub fn delivered(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }

    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }
}

pub struct ClientSession {
    user: Snowflake,
    outbound: Outbound,
    stats: Arc<SessionStats>,
}

impl ClientSession {
    pub fn new(user: Snowflake, outbound: Outbound) -> Self {
        Self {
            user,
            outbound,
            stats: Arc::new(SessionStats::default()),
        }
    }

    pub fn user(&self) -> Snowflake {
        self.user
    }

    pub fn stats(&self) -> Arc<SessionStats> {
        self.stats.clone()
    }
}

impl Terminal<RecordKind> for ClientSession {
    fn deliver(&mut self, signal: &Signal<RecordKind>) -> Result<(), DeliveryError> {
        let payload = signal.payload()?;
        if self.outbound.send(payload).is_err() {
            self.stats.failed.fetch_add(1, Ordering::Relaxed);
            return Err(DeliveryError::Closed);
        }
        self.stats.delivered.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use waffletalk_core::{BucketId, Hub, SetConfig, Shift};

    fn shift() -> Signal<RecordKind> {
        Signal::shift(Shift {
            bucket: BucketId::from_raw(10),
            add: Vec::new(),
            remove: vec![Snowflake::from_raw(3)],
        })
    }

    #[test]
    fn test_delivers_cached_payload() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut a = ClientSession::new(Snowflake::from_raw(1), tx.clone());
        let mut b = ClientSession::new(Snowflake::from_raw(2), tx);
        let signal = shift();
        a.deliver(&signal).unwrap();
        b.deliver(&signal).unwrap();

        let first = rx.try_recv().unwrap();
        let second = rx.try_recv().unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert!(first.contains("\"bucket.shift\""));
        assert_eq!(a.stats().delivered(), 1);
    }

    #[test]
    fn test_closed_connection_reports_error() {
        let (tx, rx) = mpsc::unbounded_channel();
        drop(rx);
        let mut session = ClientSession::new(Snowflake::from_raw(1), tx);
        let stats = session.stats();
        assert!(matches!(session.deliver(&shift()), Err(DeliveryError::Closed)));
        assert_eq!(stats.failed(), 1);
        assert_eq!(stats.delivered(), 0);
    }

    #[test]
    fn test_two_paths_transmit_once() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let session = ClientSession::new(Snowflake::from_raw(1), tx);
        let stats = session.stats();

        let mut hub: Hub<RecordKind> = Hub::new();
        let set = hub.create_set(crate::domain::member_order(), SetConfig::default());
        let node = hub.attach_terminal(Box::new(session));
        let id = Snowflake::from_raw(5);
        let record = hub
            .insert_record(
                id,
                RecordKind::GuildMember,
                crate::domain::member(Snowflake::from_raw(1), Snowflake::from_raw(2), "amy"),
            )
            .unwrap();
        hub.add(set, id).unwrap();
        hub.subscribe(set, node).unwrap();
        hub.wire(node, record).unwrap();

        hub.write(id, "displayName", "amelia").unwrap();
        assert_eq!(stats.delivered(), 1);
        let frame = rx.try_recv().unwrap();
        assert!(frame.contains("replicable.mutation"));
        assert!(rx.try_recv().is_err());
    }
}
