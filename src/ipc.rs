//! Message-Passing IPC
//!
//! Messages are plain values queued in the receiver's mailbox. The kernel
//! clones on send, so sender and receiver never share a buffer.

use crate::sys::process::Pid;

/// A mailbox message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Sending process (stamped by the kernel, whatever the sender claims)
    pub sender: Pid,
    /// Target process
    pub receiver: Pid,
    /// Application-defined message tag
    pub kind: i32,
    /// Opaque payload bytes
    pub payload: Vec<u8>,
}

impl Message {
    /// Build a message addressed to `receiver`. The sender field is filled
    /// in by the kernel on delivery.
    pub fn to(receiver: Pid, kind: i32, payload: Vec<u8>) -> Self {
        Self {
            sender: 0,
            receiver,
            kind,
            payload,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clone_is_deep() {
        let original = Message::to(3, 7, vec![1, 2, 3]);
        let mut copy = original.clone();
        copy.payload[0] = 99;

        assert_eq!(original.payload, vec![1, 2, 3]);
    }
}
