// Fixed-capacity outbound message buffers.
//
// Messages accumulate here between the moment the game produces them and
// the moment the transport flushes a packet. Capacity never grows: a
// message that does not fit whole is dropped whole, so a packet never
// ends mid-message and the receiver can always walk it to exactly zero
// remaining bytes. This trades completeness under extreme burst for a
// hard bound on packet size, which the per-tick full-state resend of
// house data makes safe to do.

use crate::message::NetMessage;
use crate::wire::Writer;

/// Capacity of a client's command buffer, flushed once per frame.
pub const MAX_CLIENT_MESSAGE_LEN: usize = 1024;

/// Capacity of the server's shared broadcast buffer. Sized for a
/// worst-case sync tick over the full entity pools.
pub const MAX_SERVER_BROADCAST_MESSAGE_LEN: usize = 16 * 1024;

/// Capacity of one house's private suffix (house state, fog reveals,
/// queued one-shot events).
pub const MAX_HOUSE_MESSAGE_LEN: usize = 2048;

/// Append-only byte buffer with a commit-or-drop push and rewind support
/// for per-recipient fan-out.
#[derive(Debug)]
pub struct OutboundBuffer {
    buf: Box<[u8]>,
    len: usize,
}

impl OutboundBuffer {
    pub fn new(capacity: usize) -> OutboundBuffer {
        OutboundBuffer {
            buf: vec![0; capacity].into_boxed_slice(),
            len: 0,
        }
    }

    /// Append one framed message. Returns false (and leaves the buffer
    /// untouched) when the message does not fit in the remaining space.
    pub fn push(&mut self, msg: &dyn NetMessage) -> bool {
        let needed = msg.framed_len();
        if needed > self.buf.len() - self.len {
            return false;
        }
        let mut w = Writer::new(&mut self.buf[self.len..]);
        if msg.encode(&mut w).is_err() {
            return false;
        }
        self.len += needed;
        true
    }

    /// Append already-encoded message bytes (e.g. the contents of another
    /// buffer). Same commit-or-drop rule as `push`.
    pub fn push_raw(&mut self, bytes: &[u8]) -> bool {
        if bytes.len() > self.buf.len() - self.len {
            return false;
        }
        self.buf[self.len..self.len + bytes.len()].copy_from_slice(bytes);
        self.len += bytes.len();
        true
    }

    /// Current write position, for a later `rewind`.
    pub fn mark(&self) -> usize {
        self.len
    }

    /// Drop everything appended since `mark`. Used when fanning one
    /// shared prefix out to several recipients with differing suffixes.
    pub fn rewind(&mut self, mark: usize) {
        debug_assert!(mark <= self.len);
        self.len = mark;
    }

    pub fn clear(&mut self) {
        self.len = 0;
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.buf[..self.len]
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.len
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::ServerMessage;
    use crate::types::PeerId;

    fn chat(len: usize) -> ServerMessage {
        ServerMessage::Chat {
            from: PeerId(1),
            text: "x".repeat(len),
        }
    }

    #[test]
    fn push_accumulates_messages() {
        let mut buf = OutboundBuffer::new(64);
        assert!(buf.push(&ServerMessage::StartGame));
        assert!(buf.push(&chat(5)));
        assert_eq!(buf.len(), 1 + (1 + 2 + 5));
    }

    #[test]
    fn oversized_push_drops_whole_message() {
        let mut buf = OutboundBuffer::new(10);
        assert!(buf.push(&chat(5)));
        let before = buf.len();
        // 1 tag + 2 header + 10 text = 13 > 10 - 8 remaining.
        assert!(!buf.push(&chat(10)));
        assert_eq!(buf.len(), before);
        // A smaller message still fits afterwards.
        assert!(buf.push(&ServerMessage::StartGame));
    }

    #[test]
    fn rewind_discards_suffix_only() {
        let mut buf = OutboundBuffer::new(128);
        buf.push(&ServerMessage::StartGame);
        let mark = buf.mark();
        let prefix = buf.as_slice().to_vec();
        buf.push(&chat(8));
        assert_ne!(buf.len(), mark);
        buf.rewind(mark);
        assert_eq!(buf.as_slice(), &prefix[..]);
    }

    #[test]
    fn push_raw_splices_encoded_bytes() {
        let mut queue = OutboundBuffer::new(64);
        queue.push(&chat(4));
        let mut buf = OutboundBuffer::new(64);
        buf.push(&ServerMessage::StartGame);
        assert!(buf.push_raw(queue.as_slice()));
        assert_eq!(buf.len(), 1 + queue.len());
        assert!(!buf.push_raw(&[0u8; 64]));
    }

    #[test]
    fn clear_resets_to_empty() {
        let mut buf = OutboundBuffer::new(32);
        buf.push(&chat(3));
        buf.clear();
        assert!(buf.is_empty());
        assert_eq!(buf.remaining(), 32);
    }
}
