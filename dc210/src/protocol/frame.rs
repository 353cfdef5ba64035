//! DC210 command frames and control codes.
//!
//! ## Command Format
//!
//! Every command sent to the camera is exactly eight bytes:
//!
//! ```text
//! +--------+------+------+------+------+------+------+------+
//! | Opcode | 0x00 | Arg1 | Arg2 | Arg3 | Arg4 | 0x00 | 0x1A |
//! +--------+------+------+------+------+------+------+------+
//! ```
//!
//! Replies are built from single-byte control codes (ACK, COMPLETE, BUSY...)
//! and, for data-bearing commands, packets framed by a RECV marker and a
//! trailing XOR checksum.

use std::fmt;

/// Length of a command frame.
pub const COMMAND_LEN: usize = 8;

/// Last byte of every command frame.
pub const COMMAND_TRAILER: u8 = 0x1A;

/// Baud rate the camera uses after power-on and after a speed reset.
pub const DEFAULT_BAUD: u32 = 9600;

/// Fastest baud rate the camera can negotiate.
pub const HIGH_BAUD: u32 = 115200;

/// DC210 command opcodes used by the download workflows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Opcode {
    /// Set link speed (0x41).
    SetSpeed = 0x41,
    /// Download picture data (0x64).
    PictureDownload = 0x64,
    /// Fetch picture information (0x65).
    PictureInfo = 0x65,
    /// Initialize the camera (0x7E).
    Initialize = 0x7E,
    /// Fetch camera status (0x7F).
    Status = 0x7F,
}

/// Single-byte protocol markers.
///
/// `Send` and `CommandComplete` share the value `0x00`; the byte is a packet
/// direction marker inside packets and a completion code in command replies.
/// [`classify`] reports it as `CommandComplete`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlCode {
    /// Camera is about to send packet data (0x01).
    Recv,
    /// Host is sending packet data (0x00).
    Send,
    /// End of file (0x80).
    Eof,
    /// Cancel transfer (0xFF).
    Cancel,
    /// Command finished (0x00).
    CommandComplete,
    /// Command acknowledged (0xD1).
    CommandAck,
    /// Packet received correctly (0xD2).
    CorrectPacket,
    /// Command rejected (0xE1).
    CommandNak,
    /// Packet rejected (0xE3).
    IllegalPacket,
    /// Camera busy, completion follows (0xF0).
    Busy,
}

impl ControlCode {
    /// Wire value of this code.
    pub const fn as_byte(self) -> u8 {
        match self {
            Self::Recv => 0x01,
            Self::Send | Self::CommandComplete => 0x00,
            Self::Eof => 0x80,
            Self::Cancel => 0xFF,
            Self::CommandAck => 0xD1,
            Self::CorrectPacket => 0xD2,
            Self::CommandNak => 0xE1,
            Self::IllegalPacket => 0xE3,
            Self::Busy => 0xF0,
        }
    }

    /// Protocol name used in diagnostics.
    pub const fn name(self) -> &'static str {
        match self {
            Self::Recv => "PKT_CTRL_RECV",
            Self::Send => "PKT_CTRL_SEND",
            Self::Eof => "PKT_CTRL_EOF",
            Self::Cancel => "PKT_CTRL_CANCEL",
            Self::CommandComplete => "COMMAND_COMPLETE",
            Self::CommandAck => "COMMAND_ACK",
            Self::CorrectPacket => "CORRECT_PACKET",
            Self::CommandNak => "COMMAND_NAK",
            Self::IllegalPacket => "ILLEGAL_PACKET",
            Self::Busy => "BUSY",
        }
    }
}

impl fmt::Display for ControlCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (0x{:02X})", self.name(), self.as_byte())
    }
}

/// Classify a single byte as a control code.
///
/// Unknown bytes return `None` and are treated as opaque payload by callers.
pub fn classify(byte: u8) -> Option<ControlCode> {
    match byte {
        0x00 => Some(ControlCode::CommandComplete),
        0x01 => Some(ControlCode::Recv),
        0x80 => Some(ControlCode::Eof),
        0xFF => Some(ControlCode::Cancel),
        0xD1 => Some(ControlCode::CommandAck),
        0xD2 => Some(ControlCode::CorrectPacket),
        0xE1 => Some(ControlCode::CommandNak),
        0xE3 => Some(ControlCode::IllegalPacket),
        0xF0 => Some(ControlCode::Busy),
        _ => None,
    }
}

/// Describe a received byte for error messages.
pub fn describe_byte(byte: u8) -> String {
    match classify(byte) {
        Some(code) => code.to_string(),
        None => format!("0x{byte:02X}"),
    }
}

/// A single 8-byte command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Command {
    opcode: Opcode,
    args: [u8; 4],
}

impl Command {
    /// Create a command with raw argument bytes.
    pub const fn new(opcode: Opcode, args: [u8; 4]) -> Self {
        Self { opcode, args }
    }

    /// `SET_SPEED` for one of the rates the camera understands.
    pub fn set_speed(baud: u32) -> crate::Result<Self> {
        let [hi, lo] = speed_args(baud).ok_or_else(|| {
            crate::Error::Unsupported(format!("baud rate {baud} is not supported by the camera"))
        })?;
        Ok(Self::new(Opcode::SetSpeed, [hi, lo, 0, 0]))
    }

    /// `SET_SPEED 9600`, the camera's power-on rate.
    pub const fn reset_speed() -> Self {
        Self::new(Opcode::SetSpeed, [0x96, 0x00, 0, 0])
    }

    /// `INITIALIZE`.
    pub const fn initialize() -> Self {
        Self::new(Opcode::Initialize, [0; 4])
    }

    /// `STATUS`.
    pub const fn status() -> Self {
        Self::new(Opcode::Status, [0; 4])
    }

    /// `PICTURE_INFO` for a zero-based picture index.
    pub const fn picture_info(index: u16) -> Self {
        let [msb, lsb] = index.to_be_bytes();
        Self::new(Opcode::PictureInfo, [msb, lsb, 0, 0])
    }

    /// `PICTURE_DOWNLOAD` for a zero-based picture index.
    pub const fn picture_download(index: u16) -> Self {
        let [msb, lsb] = index.to_be_bytes();
        Self::new(Opcode::PictureDownload, [msb, lsb, 0, 0])
    }

    /// Get the opcode.
    pub const fn opcode(&self) -> Opcode {
        self.opcode
    }

    /// Encode to the wire layout.
    pub const fn encode(&self) -> [u8; COMMAND_LEN] {
        encode_command(
            self.opcode,
            self.args[0],
            self.args[1],
            self.args[2],
            self.args[3],
        )
    }
}

/// Encode a command frame: `[opcode, 0, arg1, arg2, arg3, arg4, 0, 0x1A]`.
pub const fn encode_command(
    opcode: Opcode,
    arg1: u8,
    arg2: u8,
    arg3: u8,
    arg4: u8,
) -> [u8; COMMAND_LEN] {
    [
        opcode as u8,
        0x00,
        arg1,
        arg2,
        arg3,
        arg4,
        0x00,
        COMMAND_TRAILER,
    ]
}

/// `SET_SPEED` argument bytes for a baud rate.
///
/// The camera takes the decimal digits of the rate packed as BCD-like bytes.
pub fn speed_args(baud: u32) -> Option<[u8; 2]> {
    match baud {
        9600 => Some([0x96, 0x00]),
        19200 => Some([0x19, 0x20]),
        38400 => Some([0x38, 0x40]),
        57600 => Some([0x57, 0x60]),
        115200 => Some([0x11, 0x52]),
        _ => None,
    }
}

/// Baud rates the camera can negotiate.
pub const SUPPORTED_BAUDS: [u32; 5] = [9600, 19200, 38400, 57600, 115200];
