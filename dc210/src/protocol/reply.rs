//! Short command replies.
//!
//! Commands without a data packet are answered with one or two control
//! bytes, e.g. `COMMAND_ACK` for `SET_SPEED` or `COMMAND_ACK, COMMAND_COMPLETE`
//! for `INITIALIZE`. While working the camera may insert `BUSY` bytes before
//! the completion code.

use {
    crate::{
        error::{Error, Result},
        protocol::frame::{ControlCode, describe_byte},
    },
    log::trace,
};

/// Reply to `SET_SPEED`.
pub const SPEED_REPLY: &[ControlCode] = &[ControlCode::CommandAck];

/// Reply to `INITIALIZE`.
pub const INIT_REPLY: &[ControlCode] = &[ControlCode::CommandAck, ControlCode::CommandComplete];

/// Reply to a `CORRECT_PACKET` confirmation.
pub const COMPLETE_REPLY: &[ControlCode] = &[ControlCode::CommandComplete];

/// Matches an expected sequence of control bytes across reads.
#[derive(Debug, Clone)]
pub struct ReplyMatcher {
    expected: &'static [ControlCode],
    label: &'static str,
    pos: usize,
}

impl ReplyMatcher {
    /// Expect `expected` in order. `label` names the session step.
    pub const fn new(expected: &'static [ControlCode], label: &'static str) -> Self {
        Self {
            expected,
            label,
            pos: 0,
        }
    }

    /// `true` once the full reply has been seen.
    pub const fn is_complete(&self) -> bool {
        self.pos == self.expected.len()
    }

    /// Feed one chunk; returns `true` when the reply is complete.
    pub fn feed(&mut self, chunk: &[u8]) -> Result<bool> {
        for &byte in chunk {
            let Some(&want) = self.expected.get(self.pos) else {
                return Err(self.mismatch("end of reply", byte));
            };

            if byte == want.as_byte() {
                self.pos += 1;
                continue;
            }

            if byte == ControlCode::Busy.as_byte() {
                trace!("{}: camera busy", self.label);
                continue;
            }

            if byte == ControlCode::CommandNak.as_byte()
                || byte == ControlCode::IllegalPacket.as_byte()
            {
                return Err(Error::Nak {
                    state: self.label.to_string(),
                });
            }

            return Err(self.mismatch(&want.to_string(), byte));
        }

        Ok(self.is_complete())
    }

    fn mismatch(&self, expected: &str, byte: u8) -> Error {
        Error::ProtocolMismatch {
            state: self.label.to_string(),
            expected: expected.to_string(),
            actual: describe_byte(byte),
        }
    }
}
