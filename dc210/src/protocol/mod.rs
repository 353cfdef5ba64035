//! DC210 wire protocol: command frames, checksums, packet reassembly.

pub mod checksum;
pub mod frame;
pub mod reassembly;
pub mod reply;

// Re-export common types
pub use checksum::Checksum;
pub use frame::{Command, ControlCode, Opcode, classify, encode_command};
pub use reassembly::{Feed, Packet, PacketLayout, Reassembler};
pub use reply::ReplyMatcher;
