//! In-memory message model (spec.md §3 "Message", §10).
//!
//! The original `struct lc_message` carries a payload pointer plus an
//! optional `free` function pointer the caller supplies to reclaim
//! externally-owned memory (`lc_msg_init_data`'s `cb`/`cb_arg`). Per the
//! REDESIGN FLAGS guidance that raw function-pointer ownership doesn't
//! belong in safe Rust, `PayloadSource` makes the two ownership strategies
//! an explicit sum type instead.

use std::net::Ipv6Addr;

use crate::wire::Opcode;

/// How a `Message`'s payload bytes are owned.
pub enum PayloadSource {
    /// The message owns its bytes outright.
    Owned(Vec<u8>),
    /// The message borrows bytes from elsewhere; `on_drop` runs when the
    /// message is dropped, mirroring the original's custom free hook.
    Borrowed {
        data: Vec<u8>,
        on_drop: Option<Box<dyn FnOnce() + Send>>,
    },
}

impl PayloadSource {
    fn bytes(&self) -> &[u8] {
        match self {
            PayloadSource::Owned(v) => v,
            PayloadSource::Borrowed { data, .. } => data,
        }
    }
}

impl Drop for PayloadSource {
    fn drop(&mut self) {
        if let PayloadSource::Borrowed { on_drop, .. } = self {
            if let Some(cb) = on_drop.take() {
                cb();
            }
        }
    }
}

impl std::fmt::Debug for PayloadSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PayloadSource::Owned(v) => f.debug_tuple("Owned").field(&v.len()).finish(),
            PayloadSource::Borrowed { data, .. } => {
                f.debug_struct("Borrowed").field("len", &data.len()).finish()
            }
        }
    }
}

/// A message, in memory — either freshly constructed for sending, or
/// populated by the receive loop (4.H) off a received datagram.
#[derive(Debug)]
pub struct Message {
    payload: PayloadSource,
    pub opcode: Opcode,
    /// Id of the socket the message arrived on / will be sent from.
    pub socket_id: u32,
    pub src: Option<Ipv6Addr>,
    pub dst: Option<Ipv6Addr>,
}

impl Message {
    /// `lc_msg_init`: an empty message with no payload.
    pub fn new(opcode: Opcode) -> Message {
        Message {
            payload: PayloadSource::Owned(Vec::new()),
            opcode,
            socket_id: 0,
            src: None,
            dst: None,
        }
    }

    /// `lc_msg_init_size`: a zeroed payload of the given length, ready to
    /// be filled in by the caller before sending.
    pub fn with_capacity(len: usize, opcode: Opcode) -> Message {
        Message {
            payload: PayloadSource::Owned(vec![0u8; len]),
            opcode,
            socket_id: 0,
            src: None,
            dst: None,
        }
    }

    /// `lc_msg_init_data` with the default deallocator: copies `data` into
    /// an owned buffer.
    pub fn from_bytes(data: &[u8], opcode: Opcode) -> Message {
        Message {
            payload: PayloadSource::Owned(data.to_vec()),
            opcode,
            socket_id: 0,
            src: None,
            dst: None,
        }
    }

    /// `lc_msg_init_data` with a caller-supplied free hook, reshaped as an
    /// explicit `PayloadSource::Borrowed`.
    pub fn from_owned(payload: PayloadSource) -> Message {
        Message {
            payload,
            opcode: Opcode::Unknown(0),
            socket_id: 0,
            src: None,
            dst: None,
        }
    }

    /// `LC_ATTR_DATA`.
    pub fn data(&self) -> &[u8] {
        self.payload.bytes()
    }

    /// `LC_ATTR_LEN`.
    pub fn len(&self) -> usize {
        self.payload.bytes().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// `LC_ATTR_OPCODE`.
    pub fn opcode(&self) -> Opcode {
        self.opcode
    }

    /// Mutable access to the payload bytes, used while building a message
    /// constructed via `with_capacity`.
    pub fn data_mut(&mut self) -> &mut [u8] {
        match &mut self.payload {
            PayloadSource::Owned(v) => v,
            PayloadSource::Borrowed { data, .. } => data,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    #[test]
    fn new_message_is_empty() {
        let msg = Message::new(Opcode::Set);
        assert!(msg.is_empty());
    }

    #[test]
    fn with_capacity_is_zeroed_and_mutable() {
        let mut msg = Message::with_capacity(4, Opcode::Set);
        assert_eq!(msg.data(), &[0, 0, 0, 0]);
        msg.data_mut().copy_from_slice(b"abcd");
        assert_eq!(msg.data(), b"abcd");
    }

    #[test]
    fn from_bytes_copies_input() {
        let src = b"hello".to_vec();
        let msg = Message::from_bytes(&src, Opcode::Set);
        assert_eq!(msg.data(), b"hello");
    }

    #[test]
    fn borrowed_payload_runs_drop_hook_once() {
        let called = Arc::new(AtomicBool::new(false));
        let called_clone = called.clone();
        let msg = Message::from_owned(PayloadSource::Borrowed {
            data: b"xyz".to_vec(),
            on_drop: Some(Box::new(move || called_clone.store(true, Ordering::SeqCst))),
        });
        assert_eq!(msg.data(), b"xyz");
        drop(msg);
        assert!(called.load(Ordering::SeqCst));
    }
}
