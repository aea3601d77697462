//! Message bus between the gateway and its consumers.
//!
//! Each attached consumer gets a private notification mailbox. Commands from
//! all consumers are funnelled into a single queue drained by the lifecycle
//! actor, tagged with the sender so replies can be addressed.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::messages::{Command, Notification};

pub type ConsumerId = u64;

/// A command together with the consumer that sent it.
#[derive(Debug)]
pub struct Envelope {
    pub from: ConsumerId,
    pub command: Command,
}

pub type CommandReceiver = mpsc::UnboundedReceiver<Envelope>;

struct BusInner {
    consumers: Mutex<HashMap<ConsumerId, mpsc::UnboundedSender<Notification>>>,
    next_id: AtomicU64,
    commands: mpsc::UnboundedSender<Envelope>,
}

#[derive(Clone)]
pub struct MessageBus {
    inner: Arc<BusInner>,
}

impl MessageBus {
    /// Create a bus and the receiving end of its command queue.
    pub fn new() -> (Self, CommandReceiver) {
        let (commands, rx) = mpsc::unbounded_channel();
        let bus = Self {
            inner: Arc::new(BusInner {
                consumers: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(1),
                commands,
            }),
        };
        (bus, rx)
    }

    pub fn attach(&self) -> Consumer {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner.consumers.lock().insert(id, tx);
        log::debug!("Consumer {} attached", id);
        Consumer {
            id,
            bus: self.clone(),
            notifications: rx,
        }
    }

    fn detach(&self, id: ConsumerId) {
        if self.inner.consumers.lock().remove(&id).is_some() {
            log::debug!("Consumer {} detached", id);
        }
    }

    /// Deliver to every attached consumer, pruning closed mailboxes.
    pub fn broadcast(&self, notification: Notification) {
        let mut consumers = self.inner.consumers.lock();
        consumers.retain(|id, tx| {
            let delivered = tx.send(notification.clone()).is_ok();
            if !delivered {
                log::debug!("Pruning consumer {}", id);
            }
            delivered
        });
    }

    /// Deliver to one consumer. Returns false if it is gone.
    pub fn post(&self, to: ConsumerId, notification: Notification) -> bool {
        let mut consumers = self.inner.consumers.lock();
        let delivered = consumers
            .get(&to)
            .map(|tx| tx.send(notification).is_ok())
            .unwrap_or(false);
        if !delivered {
            consumers.remove(&to);
        }
        delivered
    }

    #[cfg(test)]
    pub fn consumer_count(&self) -> usize {
        self.inner.consumers.lock().len()
    }

    fn submit(&self, from: ConsumerId, command: Command) -> bool {
        self.inner.commands.send(Envelope { from, command }).is_ok()
    }
}

/// One attached consumer. Detaches on drop.
pub struct Consumer {
    id: ConsumerId,
    bus: MessageBus,
    notifications: mpsc::UnboundedReceiver<Notification>,
}

impl Consumer {
    pub fn id(&self) -> ConsumerId {
        self.id
    }

    /// Queue a command for the lifecycle actor. False if the actor has stopped.
    pub fn send(&self, command: Command) -> bool {
        self.bus.submit(self.id, command)
    }

    pub async fn recv(&mut self) -> Option<Notification> {
        self.notifications.recv().await
    }

    #[cfg(test)]
    pub fn try_recv(&mut self) -> Option<Notification> {
        self.notifications.try_recv().ok()
    }
}

impl Drop for Consumer {
    fn drop(&mut self) {
        self.bus.detach(self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_broadcast_reaches_all() {
        let (bus, _rx) = MessageBus::new();
        let mut a = bus.attach();
        let mut b = bus.attach();

        bus.broadcast(Notification::Unlocked);
        assert_eq!(a.try_recv(), Some(Notification::Unlocked));
        assert_eq!(b.try_recv(), Some(Notification::Unlocked));
        assert_eq!(a.try_recv(), None);
    }

    #[test]
    fn test_post_is_private() {
        let (bus, _rx) = MessageBus::new();
        let mut a = bus.attach();
        let mut b = bus.attach();

        assert!(bus.post(a.id(), Notification::Off));
        assert_eq!(a.try_recv(), Some(Notification::Off));
        assert_eq!(b.try_recv(), None);
    }

    #[test]
    fn test_dropped_consumer_is_removed() {
        let (bus, _rx) = MessageBus::new();
        let a = bus.attach();
        let _b = bus.attach();
        let id = a.id();
        drop(a);

        assert_eq!(bus.consumer_count(), 1);
        assert!(!bus.post(id, Notification::Unlocked));
    }

    #[test]
    fn test_commands_are_tagged_with_sender() {
        let (bus, mut rx) = MessageBus::new();
        let a = bus.attach();
        assert!(a.send(Command::GetWasm));

        let envelope = rx.try_recv().unwrap();
        assert_eq!(envelope.from, a.id());
        assert_eq!(envelope.command, Command::GetWasm);
    }

    #[test]
    fn test_send_fails_when_queue_closed() {
        let (bus, rx) = MessageBus::new();
        let a = bus.attach();
        drop(rx);
        assert!(!a.send(Command::GetTheme));
    }
}
