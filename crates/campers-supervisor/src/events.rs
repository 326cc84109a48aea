//! The supervisor→UI event channel.
//!
//! Many producers, one consumer. The queue is bounded; on overflow the
//! oldest *non-log* event is dropped. Log lines are never dropped — they are
//! the user's record of what the remote command did, and they also land in
//! the log file via tracing.

use std::collections::VecDeque;
use std::sync::Mutex;

use campers_domain::{InstanceHandle, MachineConfig, TunnelSpec};
use tokio::sync::Notify;

pub const DEFAULT_EVENT_CAPACITY: usize = 1024;

#[derive(Debug, Clone, PartialEq)]
pub enum UiEvent {
    StatusUpdate(String),
    MergedConfig(Box<MachineConfig>),
    InstanceDetails(Box<InstanceHandle>),
    SyncStatus { session: String, state: String },
    TunnelUp(TunnelSpec),
    TunnelDown(TunnelSpec),
    Log(String),
}

impl UiEvent {
    fn is_log(&self) -> bool {
        matches!(self, UiEvent::Log(_))
    }
}

pub struct EventBus {
    queue: Mutex<VecDeque<UiEvent>>,
    notify: Notify,
    capacity: usize,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
            capacity,
        }
    }

    /// Enqueue an event. Never blocks: when the queue is full, the oldest
    /// non-log event gives way; if the queue is all log lines it grows.
    pub fn publish(&self, event: UiEvent) {
        {
            let mut queue = self.queue.lock().expect("event queue lock");
            if queue.len() >= self.capacity {
                if let Some(pos) = queue.iter().position(|e| !e.is_log()) {
                    queue.remove(pos);
                }
            }
            queue.push_back(event);
        }
        self.notify.notify_one();
    }

    pub fn log(&self, line: impl Into<String>) {
        self.publish(UiEvent::Log(line.into()));
    }

    pub fn status(&self, message: impl Into<String>) {
        self.publish(UiEvent::StatusUpdate(message.into()));
    }

    /// Next event, waiting if the queue is empty. Single consumer.
    pub async fn recv(&self) -> UiEvent {
        loop {
            if let Some(event) = self.try_recv() {
                return event;
            }
            self.notify.notified().await;
        }
    }

    pub fn try_recv(&self) -> Option<UiEvent> {
        self.queue.lock().expect("event queue lock").pop_front()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overflow_drops_oldest_non_log_event() {
        let bus = EventBus::new(3);
        bus.status("first");
        bus.log("log line 1");
        bus.status("second");
        // Over capacity: "first" (oldest non-log) should give way.
        bus.status("third");

        assert_eq!(bus.try_recv(), Some(UiEvent::Log("log line 1".into())));
        assert_eq!(bus.try_recv(), Some(UiEvent::StatusUpdate("second".into())));
        assert_eq!(bus.try_recv(), Some(UiEvent::StatusUpdate("third".into())));
        assert_eq!(bus.try_recv(), None);
    }

    #[test]
    fn log_lines_are_never_dropped() {
        let bus = EventBus::new(2);
        for i in 0..10 {
            bus.log(format!("line {}", i));
        }
        let mut count = 0;
        while let Some(event) = bus.try_recv() {
            assert!(matches!(event, UiEvent::Log(_)));
            count += 1;
        }
        assert_eq!(count, 10);
    }

    #[tokio::test]
    async fn recv_wakes_on_publish() {
        let bus = std::sync::Arc::new(EventBus::new(8));
        let consumer = {
            let bus = bus.clone();
            tokio::spawn(async move { bus.recv().await })
        };
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        bus.status("wake up");
        let event = consumer.await.unwrap();
        assert_eq!(event, UiEvent::StatusUpdate("wake up".into()));
    }

    #[test]
    fn events_within_a_category_keep_publish_order() {
        let bus = EventBus::new(16);
        bus.publish(UiEvent::SyncStatus { session: "s".into(), state: "scanning".into() });
        bus.publish(UiEvent::SyncStatus { session: "s".into(), state: "watching".into() });
        let first = bus.try_recv().unwrap();
        let second = bus.try_recv().unwrap();
        assert_eq!(first, UiEvent::SyncStatus { session: "s".into(), state: "scanning".into() });
        assert_eq!(second, UiEvent::SyncStatus { session: "s".into(), state: "watching".into() });
    }
}
