use crate::CommandMessage;
use parking_lot::Mutex;
use std::collections::VecDeque;

/// A decoded command tagged with the peer session that produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct QueuedCommand {
    pub session: u64,
    pub command: CommandMessage,
}

/// Outcome of a push into the command queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    Queued,
    /// Queue was full; the oldest entry was evicted to make room
    EvictedOldest,
    /// Queue is closed, nothing was stored
    Closed,
}

#[derive(Debug)]
struct QueueInner {
    entries: VecDeque<QueuedCommand>,
    closed: bool,
}

/// Bounded latest-wins queue between the socket worker and the host.
///
/// On overflow the oldest entry is evicted, so the newest command is always
/// present. The lock is only held for the push/drain itself, never across I/O.
#[derive(Debug)]
pub struct CommandQueue {
    inner: Mutex<QueueInner>,
    capacity: usize,
}

impl CommandQueue {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            inner: Mutex::new(QueueInner {
                entries: VecDeque::with_capacity(capacity),
                closed: false,
            }),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn push(&self, session: u64, command: CommandMessage) -> PushOutcome {
        let mut inner = self.inner.lock();
        if inner.closed {
            return PushOutcome::Closed;
        }

        let outcome = if inner.entries.len() >= self.capacity {
            inner.entries.pop_front();
            PushOutcome::EvictedOldest
        } else {
            PushOutcome::Queued
        };
        inner.entries.push_back(QueuedCommand { session, command });
        outcome
    }

    /// Empty the queue and keep only its most recent entry
    pub fn drain_latest(&self) -> Option<QueuedCommand> {
        let mut inner = self.inner.lock();
        let latest = inner.entries.pop_back();
        inner.entries.clear();
        latest
    }

    pub fn clear(&self) {
        self.inner.lock().entries.clear();
    }

    /// Reject every later push. Queued entries are discarded.
    pub fn close(&self) {
        let mut inner = self.inner.lock();
        inner.closed = true;
        inner.entries.clear();
    }

    /// Accept pushes again after a `close`
    pub fn reopen(&self) {
        let mut inner = self.inner.lock();
        inner.closed = false;
        inner.entries.clear();
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ActionCommand, BaseVelocity, JoystickInput};

    fn action(x: f64) -> CommandMessage {
        CommandMessage::Action(ActionCommand {
            base: BaseVelocity::new(x, 0.0, 0.0),
            ..Default::default()
        })
    }

    #[test]
    fn test_drain_returns_newest_and_empties() {
        let queue = CommandQueue::new(10);
        queue.push(1, action(0.1));
        queue.push(1, action(0.2));
        queue.push(1, CommandMessage::Joystick(JoystickInput { x: 0.5, y: 0.5 }));

        let latest = queue.drain_latest().unwrap();
        assert_eq!(latest.command.kind(), crate::CommandKind::Joystick);
        assert!(queue.is_empty());
        assert_eq!(queue.drain_latest(), None);
    }

    #[test]
    fn test_overflow_keeps_most_recent() {
        let queue = CommandQueue::new(10);
        let mut outcomes = Vec::new();
        for i in 0..25 {
            outcomes.push(queue.push(1, action(i as f64)));
        }

        assert_eq!(queue.len(), 10);
        assert_eq!(outcomes[9], PushOutcome::Queued);
        assert_eq!(outcomes[10], PushOutcome::EvictedOldest);
        assert_eq!(queue.drain_latest().unwrap().command, action(24.0));
    }

    #[test]
    fn test_closed_queue_rejects_pushes() {
        let queue = CommandQueue::new(2);
        queue.push(1, action(0.1));
        queue.close();

        assert_eq!(queue.push(1, action(0.2)), PushOutcome::Closed);
        assert_eq!(queue.drain_latest(), None);

        queue.reopen();
        assert_eq!(queue.push(2, action(0.3)), PushOutcome::Queued);
        assert_eq!(queue.drain_latest().unwrap().session, 2);
    }
}
