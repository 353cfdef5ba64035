//! # dc210
//!
//! Host-side client for the Kodak DC210 serial camera protocol.
//!
//! The camera speaks a half-duplex command/response protocol at 9600 baud
//! after power-on. This crate provides:
//!
//! - 8-byte command encoding and control-code classification
//! - Reassembly of status, picture-info and picture-data packets from
//!   arbitrarily split serial reads, with XOR checksum validation
//! - Decoders for the fixed-layout status and picture-info records
//! - A session state machine for status, list and download workflows that
//!   always returns the camera to 9600 baud
//!
//! ## Features
//!
//! - `native` (default): serial port support via the `serialport` crate
//! - `serde`: `Serialize` for the decoded records
//!
//! ## Example
//!
//! ```rust,no_run
//! use dc210::{FileSink, Operation, Session, SessionConfig};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     #[cfg(feature = "native")]
//!     {
//!         let port = dc210::NativePort::open(&dc210::SerialConfig::new("/dev/ttyUSB0"))?;
//!         let mut session = Session::new(port, SessionConfig::default());
//!         let mut sink = FileSink::new(".");
//!
//!         session.run(Operation::Get(0), &mut sink, |event| {
//!             if let dc210::Event::BlockReceived { downloaded, total, .. } = event {
//!                 println!("{downloaded}/{total}");
//!             }
//!         })?;
//!     }
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

use std::sync::{Arc, OnceLock};

pub mod camera;
pub mod error;
pub mod port;
pub mod protocol;
pub mod sink;

static INTERRUPT_CHECKER: OnceLock<Arc<dyn Fn() -> bool + Send + Sync>> = OnceLock::new();

/// Register a global interruption checker polled by running sessions.
///
/// The checker should return `true` when the current operation should stop
/// (for example after receiving Ctrl-C in CLI applications).
pub fn set_interrupt_checker<F>(checker: F)
where
    F: Fn() -> bool + Send + Sync + 'static,
{
    let _ = INTERRUPT_CHECKER.set(Arc::new(checker));
}

/// Returns whether interruption was requested by the embedding application.
#[must_use]
pub fn is_interrupted_requested() -> bool {
    INTERRUPT_CHECKER
        .get()
        .is_some_and(|checker| checker())
}

#[cfg(test)]
pub(crate) fn test_set_interrupted(value: bool) {
    use std::sync::atomic::{AtomicBool, Ordering};

    static TEST_INTERRUPT_FLAG: OnceLock<Arc<AtomicBool>> = OnceLock::new();

    let flag = TEST_INTERRUPT_FLAG
        .get_or_init(|| {
            let shared = Arc::new(AtomicBool::new(false));
            let checker = Arc::clone(&shared);
            set_interrupt_checker(move || checker.load(Ordering::Relaxed));
            shared
        })
        .clone();

    flag.store(value, Ordering::Relaxed);
}

#[cfg(feature = "native")]
pub use port::NativePort;
pub use {
    camera::{
        Event, Operation, PictureInfoRecord, RunReport, Session, SessionConfig, SessionState,
        StatusRecord,
    },
    error::{Error, Result},
    port::{Port, SerialConfig},
    protocol::{Checksum, Command, ControlCode, Opcode, Packet, PacketLayout, Reassembler},
    sink::{FileSink, MemorySink, PictureSink},
};
