//! Value queues for communication between interpreter instances.
//!
//! A channel is a bounded or unbounded FIFO built on [`crossbeam_channel`].
//! Sends on a full bounded channel and receives on an empty channel block
//! the calling task; there is no select, timeout, or cancellation variant.

use std::fmt;
use std::sync::Arc;

use crossbeam_channel as cb;

use crate::error::SprigError;
use crate::values::Value;

#[derive(Clone)]
pub struct Channel {
    tx: cb::Sender<Value>,
    rx: cb::Receiver<Value>,
    /// Identity token: two channel values are equal when they share it.
    token: Arc<()>,
}

impl Channel {
    pub fn unbounded() -> Channel {
        let (tx, rx) = cb::unbounded();
        Channel {
            tx,
            rx,
            token: Arc::new(()),
        }
    }

    pub fn bounded(capacity: usize) -> Channel {
        let (tx, rx) = cb::bounded(capacity);
        Channel {
            tx,
            rx,
            token: Arc::new(()),
        }
    }

    /// Blocking send. For bounded channels this waits for buffer space.
    pub fn send(&self, value: Value) -> Result<(), SprigError> {
        self.tx
            .send(value)
            .map_err(|_| SprigError::Host("send on disconnected channel".into()))
    }

    /// Blocking receive. A disconnected, drained channel yields the
    /// end-of-stream sentinel.
    pub fn recv(&self) -> Value {
        match self.rx.recv() {
            Ok(v) => v,
            Err(cb::RecvError) => Value::End,
        }
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    pub fn same_channel(&self, other: &Channel) -> bool {
        Arc::ptr_eq(&self.token, &other.token)
    }
}

impl fmt::Debug for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Channel")
            .field("buffered", &self.rx.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fifo_order() {
        let ch = Channel::unbounded();
        ch.send(Value::Int(1)).unwrap();
        ch.send(Value::Int(2)).unwrap();
        assert_eq!(ch.recv(), Value::Int(1));
        assert_eq!(ch.recv(), Value::Int(2));
    }

    #[test]
    fn test_bounded_blocks_until_drained() {
        let ch = Channel::bounded(1);
        ch.send(Value::Int(1)).unwrap();
        let sender = ch.clone();
        let handle = std::thread::spawn(move || {
            // blocks until the main thread receives
            sender.send(Value::Int(2)).unwrap();
        });
        assert_eq!(ch.recv(), Value::Int(1));
        handle.join().unwrap();
        assert_eq!(ch.recv(), Value::Int(2));
    }

    #[test]
    fn test_identity() {
        let a = Channel::unbounded();
        let b = a.clone();
        let c = Channel::unbounded();
        assert!(a.same_channel(&b));
        assert!(!a.same_channel(&c));
    }
}
