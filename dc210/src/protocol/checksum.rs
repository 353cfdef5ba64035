//! Running XOR checksum over packet payloads.
//!
//! The camera appends one checksum byte to every packet such that the XOR of
//! all payload bytes and the checksum byte is zero.

/// XOR accumulator for the packet currently being received.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Checksum {
    value: u8,
}

impl Checksum {
    /// Create an accumulator at zero.
    pub const fn new() -> Self {
        Self { value: 0 }
    }

    /// Reset to zero for a new packet.
    pub fn reset(&mut self) {
        self.value = 0;
    }

    /// Fold bytes into the running value.
    pub fn fold(&mut self, bytes: &[u8]) {
        self.value = bytes.iter().fold(self.value, |acc, b| acc ^ b);
    }

    /// Current accumulated value.
    pub const fn value(&self) -> u8 {
        self.value
    }

    /// `true` once payload and checksum byte net to zero.
    pub const fn is_valid(&self) -> bool {
        self.value == 0
    }
}

/// Checksum byte the camera would append to `payload`.
pub fn checksum_byte(payload: &[u8]) -> u8 {
    let mut sum = Checksum::new();
    sum.fold(payload);
    sum.value()
}
