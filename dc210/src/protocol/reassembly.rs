//! Multi-read packet reassembly.
//!
//! The camera sends data packets as:
//!
//! ```text
//! +-----+------+-----------------------+----------+
//! | ACK | RECV |  payload (256 / 1024) | checksum |
//! +-----+------+-----------------------+----------+
//! |  1  |  1   |        N bytes        |    1     |
//! +-----+------+-----------------------+----------+
//! ```
//!
//! but the serial driver hands them over in whatever pieces happen to be
//! available. A packet may arrive in one read, as a bare ACK followed by the
//! rest, or as any number of continuation reads. Picture blocks after the
//! first one carry no ACK byte at all.
//!
//! [`Reassembler`] consumes raw chunks until exactly the declared number of
//! bytes has arrived. Header bytes are checked one at a time, so the result
//! does not depend on how the device split the packet.

use {
    crate::{
        error::{Error, Result},
        protocol::{
            checksum::Checksum,
            frame::{ControlCode, describe_byte},
        },
    },
    log::trace,
};

/// Payload size of status and picture-info packets.
pub const RECORD_PAYLOAD_LEN: usize = 256;

/// Payload size of a picture data block.
pub const BLOCK_PAYLOAD_LEN: usize = 1024;

/// Shape of one expected packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketLayout {
    payload_len: usize,
    leading_ack: bool,
}

impl PacketLayout {
    /// Layout with an explicit payload size.
    pub const fn new(payload_len: usize, leading_ack: bool) -> Self {
        Self {
            payload_len,
            leading_ack,
        }
    }

    /// Status or picture-info packet (ACK, RECV, 256 bytes, checksum).
    pub const fn record() -> Self {
        Self::new(RECORD_PAYLOAD_LEN, true)
    }

    /// Picture data block. Only the first block of a download carries an ACK.
    pub const fn block(first: bool) -> Self {
        Self::new(BLOCK_PAYLOAD_LEN, first)
    }

    /// Payload size in bytes.
    pub const fn payload_len(&self) -> usize {
        self.payload_len
    }

    /// Whether the packet starts with an ACK byte.
    pub const fn leading_ack(&self) -> bool {
        self.leading_ack
    }

    /// Total bytes on the wire: optional ACK, marker, payload, checksum.
    pub const fn declared_len(&self) -> usize {
        let ack = if self.leading_ack { 1 } else { 0 };
        ack + 1 + self.payload_len + 1
    }
}

/// A fully received packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    /// Payload bytes, checksum stripped.
    pub payload: Vec<u8>,
    /// Trailing checksum byte as sent.
    pub checksum: u8,
    /// Whether payload and checksum XOR to zero.
    pub checksum_ok: bool,
}

/// Outcome of feeding one chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Feed {
    /// More bytes are owed; feed the next chunk without re-sending anything.
    Pending {
        /// Bytes still owed.
        remaining: usize,
    },
    /// The packet is complete.
    Complete(Packet),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Header {
    AwaitAck,
    AwaitMarker,
    Body,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Progress {
    Collecting,
    Done,
    Abandoned,
}

/// Working state of the single packet being assembled.
#[derive(Debug)]
pub struct Reassembler {
    layout: PacketLayout,
    label: &'static str,
    remaining: usize,
    header: Header,
    body: Vec<u8>,
    checksum: Checksum,
    progress: Progress,
}

impl Reassembler {
    /// Start collecting a packet of the given layout.
    ///
    /// `label` names the session step for error messages.
    pub fn new(layout: PacketLayout, label: &'static str) -> Self {
        Self {
            layout,
            label,
            remaining: layout.declared_len(),
            header: if layout.leading_ack {
                Header::AwaitAck
            } else {
                Header::AwaitMarker
            },
            body: Vec::with_capacity(layout.payload_len + 1),
            checksum: Checksum::new(),
            progress: Progress::Collecting,
        }
    }

    /// Layout being collected.
    pub fn layout(&self) -> PacketLayout {
        self.layout
    }

    /// Bytes still owed by the device.
    pub fn remaining(&self) -> usize {
        self.remaining
    }

    /// `true` after a bare ACK was consumed and the RECV marker is still owed.
    pub fn awaiting_marker(&self) -> bool {
        self.layout.leading_ack && self.header == Header::AwaitMarker
    }

    /// Body bytes collected so far (payload and, once arrived, checksum).
    pub fn collected(&self) -> &[u8] {
        &self.body
    }

    /// Feed one raw chunk.
    ///
    /// Returns [`Error::Overrun`] if the chunk carries more bytes than the
    /// packet still owes. The reassembler is unusable afterwards.
    pub fn feed(&mut self, chunk: &[u8]) -> Result<Feed> {
        match self.progress {
            Progress::Collecting => {},
            Progress::Done => {
                return Err(Error::InvalidArgument(format!(
                    "{}: packet already complete",
                    self.label
                )));
            },
            Progress::Abandoned => {
                return Err(Error::InvalidArgument(format!(
                    "{}: packet was abandoned",
                    self.label
                )));
            },
        }

        if chunk.is_empty() {
            return Ok(Feed::Pending {
                remaining: self.remaining,
            });
        }

        let body_start = match self.consume_header(chunk) {
            Ok(n) => n,
            Err(e) => {
                self.progress = Progress::Abandoned;
                return Err(e);
            },
        };

        let body = &chunk[body_start..];
        self.body.extend_from_slice(body);
        self.checksum.fold(body);

        if chunk.len() > self.remaining {
            let declared = self.layout.declared_len();
            let received = declared - self.remaining + chunk.len();
            self.remaining = 0;
            self.progress = Progress::Abandoned;
            return Err(Error::Overrun { declared, received });
        }

        self.remaining -= chunk.len();
        trace!(
            "{}: consumed {} bytes, {} remaining",
            self.label,
            chunk.len(),
            self.remaining
        );

        if self.remaining > 0 {
            return Ok(Feed::Pending {
                remaining: self.remaining,
            });
        }

        self.progress = Progress::Done;
        let checksum = self.body[self.layout.payload_len];
        let mut payload = std::mem::take(&mut self.body);
        payload.truncate(self.layout.payload_len);

        Ok(Feed::Complete(Packet {
            payload,
            checksum,
            checksum_ok: self.checksum.is_valid(),
        }))
    }

    /// Check leading control bytes, returning the offset of the first body byte.
    fn consume_header(&mut self, chunk: &[u8]) -> Result<usize> {
        let mut pos = 0;
        while pos < chunk.len() {
            let byte = chunk[pos];
            match self.header {
                Header::AwaitAck => {
                    self.expect(byte, ControlCode::CommandAck)?;
                    self.header = Header::AwaitMarker;
                    if pos + 1 == chunk.len() {
                        trace!("{}: bare ACK, waiting for RECV marker", self.label);
                    }
                },
                Header::AwaitMarker => {
                    self.expect(byte, ControlCode::Recv)?;
                    self.header = Header::Body;
                },
                Header::Body => break,
            }
            pos += 1;
        }
        Ok(pos)
    }

    fn expect(&self, byte: u8, code: ControlCode) -> Result<()> {
        if byte == code.as_byte() {
            return Ok(());
        }
        if byte == ControlCode::CommandNak.as_byte() || byte == ControlCode::IllegalPacket.as_byte()
        {
            return Err(Error::Nak {
                state: self.label.to_string(),
            });
        }
        Err(Error::ProtocolMismatch {
            state: self.label.to_string(),
            expected: code.to_string(),
            actual: describe_byte(byte),
        })
    }
}
