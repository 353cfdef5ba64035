//! Session orchestrator.
//!
//! A [`Session`] owns the link for one run: it negotiates speed, initializes
//! the camera, fetches status and then performs the requested operation.
//! Whatever happens, the run ends by sending the camera back to 9600 baud,
//! since a camera left at high speed will not answer the next session.
//!
//! ```text
//! Idle -> NegotiateSpeed -> AwaitSpeedAck -> Initialize -> AwaitInitAck
//!      -> FetchStatus -> ReassembleStatus -> AckStatus -> AwaitStatusComplete
//!      -> Dispatch
//!
//! Dispatch -> FetchPictureInfo -> ReassembleInfo -> AckInfo -> AwaitInfoComplete
//!     list: -> NextPicture
//!     get:  -> FetchPictureData -> ReassembleData <-> AckBlock
//!           -> WriteFile -> AckPicture -> AwaitPictureComplete -> NextPicture
//!
//! NextPicture -> FetchPictureInfo | Finished
//! ```
//!
//! ## Example
//!
//! ```rust,no_run
//! use dc210::{FileSink, Operation, SerialConfig, Session, SessionConfig};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     #[cfg(feature = "native")]
//!     {
//!         let port = dc210::NativePort::open(&SerialConfig::new("/dev/ttyUSB0"))?;
//!         let mut session = Session::new(port, SessionConfig::default());
//!         let mut sink = FileSink::new("pictures");
//!         let report = session.run(Operation::GetAll, &mut sink, |_| {})?;
//!         println!("saved {} pictures", report.saved.len());
//!     }
//!
//!     Ok(())
//! }
//! ```

use {
    crate::{
        camera::record::{DEFAULT_PICTURE_NAME, PictureInfoRecord, StatusRecord},
        error::{Error, Result},
        port::Port,
        protocol::{
            frame::{Command, ControlCode, DEFAULT_BAUD, HIGH_BAUD},
            reassembly::{BLOCK_PAYLOAD_LEN, Feed, Packet, PacketLayout, Reassembler},
            reply::{COMPLETE_REPLY, INIT_REPLY, ReplyMatcher, SPEED_REPLY},
        },
        sink::PictureSink,
    },
    log::{debug, error, info, trace, warn},
    std::{
        fmt, io,
        path::{Path, PathBuf},
        sync::Arc,
        thread,
        time::{Duration, Instant},
    },
};

/// Pictures at or below this size are rejected.
pub const MIN_PICTURE_SIZE: u32 = 1024;

/// Largest picture the download buffer accepts.
pub const MAX_PICTURE_SIZE: u32 = 4 * 1024 * 1024 - 16 * 1024;

/// Sink name for bytes salvaged from an overrun packet.
pub const DUMP_FILE_NAME: &str = "picdump.jpg";

/// Session tuning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// Speed to negotiate with the camera.
    pub target_baud: u32,
    /// Assume the camera is already at `target_baud`.
    pub skip_speed_negotiation: bool,
    /// Delay before each write until the session reaches dispatch.
    pub coarse_delay: Duration,
    /// Delay before each write afterwards.
    pub fine_delay: Duration,
    /// Wait after the final speed reset.
    pub reset_delay: Duration,
    /// Give up when a reply has been silent this long.
    pub response_timeout: Duration,
    /// Largest single read.
    pub read_chunk: usize,
    /// Treat checksum failures as fatal.
    pub strict_checksum: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            target_baud: HIGH_BAUD,
            skip_speed_negotiation: false,
            coarse_delay: Duration::from_millis(500),
            fine_delay: Duration::from_millis(10),
            reset_delay: Duration::from_millis(200),
            response_timeout: Duration::from_secs(30),
            read_chunk: 8192,
            strict_checksum: false,
        }
    }
}

impl SessionConfig {
    /// Set the negotiated speed.
    #[must_use]
    pub fn with_target_baud(mut self, baud: u32) -> Self {
        self.target_baud = baud;
        self
    }

    /// Skip `SET_SPEED` because the camera is already at the target speed.
    #[must_use]
    pub fn with_skip_speed_negotiation(mut self, skip: bool) -> Self {
        self.skip_speed_negotiation = skip;
        self
    }

    /// Set the inter-step delays.
    #[must_use]
    pub fn with_delays(mut self, coarse: Duration, fine: Duration) -> Self {
        self.coarse_delay = coarse;
        self.fine_delay = fine;
        self
    }

    /// Set the wait after the final speed reset.
    #[must_use]
    pub fn with_reset_delay(mut self, delay: Duration) -> Self {
        self.reset_delay = delay;
        self
    }

    /// Set the reply timeout.
    #[must_use]
    pub fn with_response_timeout(mut self, timeout: Duration) -> Self {
        self.response_timeout = timeout;
        self
    }

    /// Set the maximum read size.
    #[must_use]
    pub fn with_read_chunk(mut self, len: usize) -> Self {
        self.read_chunk = len.max(1);
        self
    }

    /// Make checksum failures fatal.
    #[must_use]
    pub fn with_strict_checksum(mut self, strict: bool) -> Self {
        self.strict_checksum = strict;
        self
    }
}

/// What a session should do after fetching status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    /// Report camera status only.
    Status,
    /// Fetch info for every stored picture.
    List,
    /// Download one picture (zero-based).
    Get(u16),
    /// Download every picture.
    GetAll,
    /// Download an inclusive range, clamped to the pictures stored.
    GetRange {
        /// First index.
        start: u16,
        /// Last index.
        end: u16,
    },
}

impl Operation {
    /// `true` for operations that download picture data.
    pub const fn downloads(self) -> bool {
        matches!(self, Self::Get(_) | Self::GetAll | Self::GetRange { .. })
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Status => write!(f, "status"),
            Self::List => write!(f, "list"),
            Self::Get(index) => write!(f, "get {index}"),
            Self::GetAll => write!(f, "get all"),
            Self::GetRange { start, end } => write!(f, "get {start} {end}"),
        }
    }
}

/// Step of the protocol sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[allow(missing_docs)]
pub enum SessionState {
    Idle,
    NegotiateSpeed,
    AwaitSpeedAck,
    Initialize,
    AwaitInitAck,
    FetchStatus,
    ReassembleStatus,
    AckStatus,
    AwaitStatusComplete,
    Dispatch,
    FetchPictureInfo,
    ReassembleInfo,
    AckInfo,
    AwaitInfoComplete,
    FetchPictureData,
    ReassembleData,
    AckBlock,
    WriteFile,
    AckPicture,
    AwaitPictureComplete,
    NextPicture,
    Finished,
}

impl SessionState {
    /// State name used in logs and errors.
    pub const fn name(self) -> &'static str {
        match self {
            Self::Idle => "Idle",
            Self::NegotiateSpeed => "NegotiateSpeed",
            Self::AwaitSpeedAck => "AwaitSpeedAck",
            Self::Initialize => "Initialize",
            Self::AwaitInitAck => "AwaitInitAck",
            Self::FetchStatus => "FetchStatus",
            Self::ReassembleStatus => "ReassembleStatus",
            Self::AckStatus => "AckStatus",
            Self::AwaitStatusComplete => "AwaitStatusComplete",
            Self::Dispatch => "Dispatch",
            Self::FetchPictureInfo => "FetchPictureInfo",
            Self::ReassembleInfo => "ReassembleInfo",
            Self::AckInfo => "AckInfo",
            Self::AwaitInfoComplete => "AwaitInfoComplete",
            Self::FetchPictureData => "FetchPictureData",
            Self::ReassembleData => "ReassembleData",
            Self::AckBlock => "AckBlock",
            Self::WriteFile => "WriteFile",
            Self::AckPicture => "AckPicture",
            Self::AwaitPictureComplete => "AwaitPictureComplete",
            Self::NextPicture => "NextPicture",
            Self::Finished => "Finished",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Progress reported while a session runs.
#[derive(Debug, Clone, Copy)]
pub enum Event<'a> {
    /// Status packet decoded.
    Status(&'a StatusRecord),
    /// Picture info packet decoded.
    PictureInfo {
        /// Picture index.
        index: u16,
        /// Decoded record.
        info: &'a PictureInfoRecord,
    },
    /// One data block received.
    BlockReceived {
        /// Picture index.
        index: u16,
        /// Bytes received so far, padding included.
        downloaded: u32,
        /// File size reported by the camera.
        total: u32,
    },
    /// Picture handed to the sink.
    PictureSaved {
        /// Picture index.
        index: u16,
        /// Name the picture was stored under.
        name: &'a str,
        /// Where the sink put it.
        path: &'a Path,
    },
}

/// What a completed run produced.
#[derive(Debug, Clone, Default)]
pub struct RunReport {
    /// Camera status fetched at the start of the run.
    pub status: Option<StatusRecord>,
    /// Picture info records in the order fetched.
    pub pictures: Vec<PictureInfoRecord>,
    /// Paths of saved pictures.
    pub saved: Vec<PathBuf>,
}

type InterruptChecker = Arc<dyn Fn() -> bool + Send + Sync>;

/// Working data of one run.
struct Run {
    operation: Operation,
    reply: ReplyMatcher,
    packet: Reassembler,
    waiting_since: Instant,
    dispatched: bool,
    num_pictures: u16,
    index: u16,
    last: u16,
    info: PictureInfoRecord,
    downloaded: u32,
    picture: Vec<u8>,
    report: RunReport,
}

impl Run {
    fn new(operation: Operation) -> Self {
        Self {
            operation,
            reply: ReplyMatcher::new(COMPLETE_REPLY, SessionState::Idle.name()),
            packet: Reassembler::new(PacketLayout::record(), SessionState::Idle.name()),
            waiting_since: Instant::now(),
            dispatched: false,
            num_pictures: 0,
            index: 0,
            last: 0,
            info: PictureInfoRecord::default(),
            downloaded: 0,
            picture: Vec::new(),
            report: RunReport::default(),
        }
    }

    fn step_delay(&self, config: &SessionConfig) -> Duration {
        if self.dispatched {
            config.fine_delay
        } else {
            config.coarse_delay
        }
    }
}

/// Drives one camera over an exclusively owned link.
pub struct Session<P: Port> {
    port: P,
    config: SessionConfig,
    state: SessionState,
    interrupted: InterruptChecker,
}

impl<P: Port> Session<P> {
    /// Create a session over an open port at the camera's current speed.
    pub fn new(port: P, config: SessionConfig) -> Self {
        Self {
            port,
            config,
            state: SessionState::Idle,
            interrupted: Arc::new(crate::is_interrupted_requested),
        }
    }

    /// Replace the global interrupt checker for this session.
    #[must_use]
    pub fn with_interrupt_checker<F>(mut self, checker: F) -> Self
    where
        F: Fn() -> bool + Send + Sync + 'static,
    {
        self.interrupted = Arc::new(checker);
        self
    }

    /// Session configuration.
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// State the last run stopped in.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Get a reference to the underlying port.
    pub fn port(&self) -> &P {
        &self.port
    }

    /// Consume the session and return the underlying port.
    pub fn into_port(self) -> P {
        self.port
    }

    /// Run `operation` to completion.
    ///
    /// The speed reset is sent on every exit path. Its failure is logged and
    /// never replaces the error that ended the run.
    pub fn run<S, O>(&mut self, operation: Operation, sink: &mut S, mut observer: O) -> Result<RunReport>
    where
        S: PictureSink + ?Sized,
        O: FnMut(Event<'_>),
    {
        debug!("Starting session on {}: {operation}", self.port.name());
        self.state = SessionState::Idle;
        let mut run = Run::new(operation);

        let result = self.drive(&mut run, sink, &mut observer);
        if let Err(e) = &result {
            debug!("Session stopped in {}: {e}", self.state);
        }
        self.reset_speed();

        result.map(|()| run.report)
    }

    fn drive<S>(
        &mut self,
        run: &mut Run,
        sink: &mut S,
        observer: &mut dyn FnMut(Event<'_>),
    ) -> Result<()>
    where
        S: PictureSink + ?Sized,
    {
        while self.state != SessionState::Finished {
            if (self.interrupted)() {
                return Err(Error::Interrupted);
            }
            if !self.port.is_connected() {
                return Err(Error::Io(io::Error::new(
                    io::ErrorKind::NotConnected,
                    "link closed",
                )));
            }
            self.step(run, sink, observer)?;
        }
        Ok(())
    }

    /// Perform the work of the current state.
    fn step<S>(
        &mut self,
        run: &mut Run,
        sink: &mut S,
        observer: &mut dyn FnMut(Event<'_>),
    ) -> Result<()>
    where
        S: PictureSink + ?Sized,
    {
        use SessionState as St;

        match self.state {
            St::Idle => {
                self.port.clear_buffers()?;
                if self.config.skip_speed_negotiation {
                    info!(
                        "Skipping speed negotiation, camera assumed at {} baud",
                        self.config.target_baud
                    );
                    self.port.set_baud_rate(self.config.target_baud)?;
                    self.advance(St::Initialize);
                } else {
                    self.advance(St::NegotiateSpeed);
                }
            },
            St::NegotiateSpeed => {
                let command = Command::set_speed(self.config.target_baud)?;
                info!("Setting speed {} baud", self.config.target_baud);
                self.send_command(run, command)?;
                run.reply = ReplyMatcher::new(SPEED_REPLY, St::AwaitSpeedAck.name());
                self.advance(St::AwaitSpeedAck);
            },
            St::AwaitSpeedAck => {
                if self.await_reply(run)? {
                    self.port.set_baud_rate(self.config.target_baud)?;
                    debug!("Local port now at {} baud", self.config.target_baud);
                    self.advance(St::Initialize);
                }
            },
            St::Initialize => {
                info!("Initializing camera");
                self.send_command(run, Command::initialize())?;
                run.reply = ReplyMatcher::new(INIT_REPLY, St::AwaitInitAck.name());
                self.advance(St::AwaitInitAck);
            },
            St::AwaitInitAck => {
                if self.await_reply(run)? {
                    self.advance(St::FetchStatus);
                }
            },
            St::FetchStatus => {
                info!("Getting status");
                self.request_packet(run, Command::status(), PacketLayout::record(), St::ReassembleStatus)?;
            },
            St::ReassembleStatus => {
                if let Some(packet) = self.await_packet(run, sink)? {
                    let status = StatusRecord::decode(&packet.payload)?;
                    debug!("Status: {status:?}");
                    run.num_pictures = u16::from(status.num_pictures);
                    observer(Event::Status(&status));
                    run.report.status = Some(status);
                    self.advance(St::AckStatus);
                }
            },
            St::AckStatus => self.confirm_packet(run, St::AwaitStatusComplete)?,
            St::AwaitStatusComplete => {
                if self.await_reply(run)? {
                    self.advance(St::Dispatch);
                }
            },
            St::Dispatch => {
                run.dispatched = true;
                self.dispatch(run)?;
            },
            St::FetchPictureInfo => {
                run.picture.clear();
                run.downloaded = 0;
                debug!("Fetching info for picture {}", run.index);
                self.request_packet(
                    run,
                    Command::picture_info(run.index),
                    PacketLayout::record(),
                    St::ReassembleInfo,
                )?;
            },
            St::ReassembleInfo => {
                if let Some(packet) = self.await_packet(run, sink)? {
                    let info = PictureInfoRecord::decode(&packet.payload)?;
                    debug!("Picture {}: {info:?}", run.index);
                    observer(Event::PictureInfo {
                        index: run.index,
                        info: &info,
                    });
                    run.report.pictures.push(info.clone());
                    run.info = info;
                    self.advance(St::AckInfo);
                }
            },
            St::AckInfo => self.confirm_packet(run, St::AwaitInfoComplete)?,
            St::AwaitInfoComplete => {
                if self.await_reply(run)? {
                    if run.operation.downloads() {
                        check_picture_size(run.info.file_size)?;
                        self.advance(St::FetchPictureData);
                    } else {
                        self.advance(St::NextPicture);
                    }
                }
            },
            St::FetchPictureData => {
                info!(
                    "Downloading picture {} ({} bytes)",
                    run.index, run.info.file_size
                );
                let blocks = (run.info.file_size as usize).div_ceil(BLOCK_PAYLOAD_LEN);
                run.picture = Vec::with_capacity(blocks * BLOCK_PAYLOAD_LEN);
                self.request_packet(
                    run,
                    Command::picture_download(run.index),
                    PacketLayout::block(true),
                    St::ReassembleData,
                )?;
            },
            St::ReassembleData => {
                if let Some(packet) = self.await_packet(run, sink)? {
                    run.picture.extend_from_slice(&packet.payload);
                    run.downloaded = run.downloaded.saturating_add(BLOCK_PAYLOAD_LEN as u32);
                    trace!(
                        "Picture {}: {} of {} bytes",
                        run.index, run.downloaded, run.info.file_size
                    );
                    observer(Event::BlockReceived {
                        index: run.index,
                        downloaded: run.downloaded,
                        total: run.info.file_size,
                    });
                    if run.downloaded >= run.info.file_size {
                        info!("Download done");
                        self.advance(St::WriteFile);
                    } else {
                        self.advance(St::AckBlock);
                    }
                }
            },
            St::AckBlock => {
                self.send(run, &[ControlCode::CorrectPacket.as_byte()])?;
                run.packet = Reassembler::new(PacketLayout::block(false), St::ReassembleData.name());
                self.advance(St::ReassembleData);
            },
            St::WriteFile => {
                let name = if run.info.has_conforming_name() {
                    run.info.file_name.as_str()
                } else {
                    warn!(
                        "Invalid filename {:?}, using {DEFAULT_PICTURE_NAME} instead",
                        run.info.file_name
                    );
                    DEFAULT_PICTURE_NAME
                };
                // The last block is padded to full size.
                run.picture.truncate(run.info.file_size as usize);
                let path = sink.write_whole_file(name, &run.picture)?;
                info!("{} file written", path.display());
                observer(Event::PictureSaved {
                    index: run.index,
                    name,
                    path: &path,
                });
                run.report.saved.push(path);
                self.advance(St::AckPicture);
            },
            St::AckPicture => self.confirm_packet(run, St::AwaitPictureComplete)?,
            St::AwaitPictureComplete => {
                if self.await_reply(run)? {
                    self.advance(St::NextPicture);
                }
            },
            St::NextPicture => {
                if run.index >= run.last {
                    self.advance(St::Finished);
                } else {
                    run.index += 1;
                    self.advance(St::FetchPictureInfo);
                }
            },
            St::Finished => {},
        }
        Ok(())
    }

    /// Resolve the operation into a picture range.
    fn dispatch(&mut self, run: &mut Run) -> Result<()> {
        let available = run.num_pictures;
        let (first, last) = match run.operation {
            Operation::Status => {
                self.advance(SessionState::Finished);
                return Ok(());
            },
            Operation::List => {
                if available == 0 {
                    info!("No pictures in camera");
                    self.advance(SessionState::Finished);
                    return Ok(());
                }
                (0, available - 1)
            },
            Operation::Get(index) => (index, index),
            Operation::GetAll => (0, available.saturating_sub(1)),
            Operation::GetRange { start, end } => {
                if end < start {
                    return Err(Error::InvalidArgument(format!(
                        "range end {end} is before start {start}"
                    )));
                }
                (start, end.min(available.saturating_sub(1)))
            },
        };

        if first >= available {
            return Err(Error::PictureOutOfRange {
                index: first,
                available,
            });
        }

        run.index = first;
        run.last = last;
        self.advance(SessionState::FetchPictureInfo);
        Ok(())
    }

    fn advance(&mut self, next: SessionState) {
        trace!("{} -> {}", self.state, next);
        self.state = next;
    }

    fn send(&mut self, run: &mut Run, bytes: &[u8]) -> Result<()> {
        thread::sleep(run.step_delay(&self.config));
        trace!("{} write: {:02X?}", self.state, bytes);
        self.port.write_all_bytes(bytes)?;
        run.waiting_since = Instant::now();
        Ok(())
    }

    fn send_command(&mut self, run: &mut Run, command: Command) -> Result<()> {
        trace!("Sending {:?}", command.opcode());
        self.send(run, &command.encode())
    }

    /// Send a data-bearing command and prepare to collect its packet.
    fn request_packet(
        &mut self,
        run: &mut Run,
        command: Command,
        layout: PacketLayout,
        next: SessionState,
    ) -> Result<()> {
        self.send_command(run, command)?;
        run.packet = Reassembler::new(layout, next.name());
        self.advance(next);
        Ok(())
    }

    /// Confirm a packet and expect `COMMAND_COMPLETE` in `next`.
    fn confirm_packet(&mut self, run: &mut Run, next: SessionState) -> Result<()> {
        trace!("Send CORRECT_PACKET");
        self.send(run, &[ControlCode::CorrectPacket.as_byte()])?;
        run.reply = ReplyMatcher::new(COMPLETE_REPLY, next.name());
        self.advance(next);
        Ok(())
    }

    /// Poll the link once. Empty reads only check the reply timeout.
    fn poll(&mut self, run: &mut Run) -> Result<Option<Vec<u8>>> {
        let chunk = self.port.read_available(self.config.read_chunk)?;
        if chunk.is_empty() {
            if run.waiting_since.elapsed() > self.config.response_timeout {
                return Err(Error::Timeout(format!(
                    "no response in {} after {:?}",
                    self.state, self.config.response_timeout
                )));
            }
            return Ok(None);
        }
        trace!("{} read {} bytes: {:02X?}", self.state, chunk.len(), chunk);
        run.waiting_since = Instant::now();
        Ok(Some(chunk))
    }

    fn await_reply(&mut self, run: &mut Run) -> Result<bool> {
        match self.poll(run)? {
            Some(chunk) => run.reply.feed(&chunk),
            None => Ok(false),
        }
    }

    fn await_packet<S>(&mut self, run: &mut Run, sink: &mut S) -> Result<Option<Packet>>
    where
        S: PictureSink + ?Sized,
    {
        let Some(chunk) = self.poll(run)? else {
            return Ok(None);
        };

        match run.packet.feed(&chunk) {
            Ok(Feed::Pending { remaining }) => {
                trace!("{}: {remaining} bytes still owed", self.state);
                Ok(None)
            },
            Ok(Feed::Complete(packet)) => {
                self.check_packet(&packet)?;
                Ok(Some(packet))
            },
            Err(err @ Error::Overrun { .. }) => {
                self.dump_overrun(run, sink);
                Err(err)
            },
            Err(err) => Err(err),
        }
    }

    fn check_packet(&self, packet: &Packet) -> Result<()> {
        if packet.checksum_ok {
            return Ok(());
        }
        if self.config.strict_checksum {
            return Err(Error::ChecksumMismatch {
                state: self.state.name().to_string(),
            });
        }
        warn!("Bad checksum in {} packet, keeping data", self.state);
        Ok(())
    }

    /// Salvage what has arrived for the current picture.
    fn dump_overrun<S>(&self, run: &Run, sink: &mut S)
    where
        S: PictureSink + ?Sized,
    {
        let mut dump = run.picture.clone();
        dump.extend_from_slice(run.packet.collected());
        error!(
            "Packet overrun in {}, dumping {} received bytes to {DUMP_FILE_NAME}",
            self.state,
            dump.len()
        );
        match sink.write_whole_file(DUMP_FILE_NAME, &dump) {
            Ok(path) => error!("{} file written", path.display()),
            Err(e) => warn!("Failed to write {DUMP_FILE_NAME}: {e}"),
        }
    }

    /// Return the camera and the local port to 9600 baud.
    fn reset_speed(&mut self) {
        if !self.port.is_connected() {
            warn!("Link closed, camera may still be at high speed");
            return;
        }

        info!("Resetting speed to {DEFAULT_BAUD} baud");
        if let Err(e) = self.port.write_all_bytes(&Command::reset_speed().encode()) {
            warn!("Failed to send speed reset: {e}");
        }
        thread::sleep(self.config.reset_delay);
        if let Err(e) = self.port.set_baud_rate(DEFAULT_BAUD) {
            warn!("Failed to return port to {DEFAULT_BAUD} baud: {e}");
        }
    }
}

fn check_picture_size(size: u32) -> Result<()> {
    if size <= MIN_PICTURE_SIZE || size > MAX_PICTURE_SIZE {
        return Err(Error::SizeConstraint {
            size,
            min: MIN_PICTURE_SIZE,
            max: MAX_PICTURE_SIZE,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::checksum::checksum_byte;
    use crate::sink::MemorySink;
    use std::collections::VecDeque;
    use std::io::{Read, Write};

    const ACK: u8 = 0xD1;
    const RECV: u8 = 0x01;
    const COMPLETE: u8 = 0x00;
    const CORRECT: u8 = 0xD2;

    /// Scripted camera: every write releases the next batch of read chunks.
    struct MockPort {
        script: VecDeque<Vec<Vec<u8>>>,
        pending: VecDeque<Vec<u8>>,
        written: Vec<Vec<u8>>,
        write_times: Vec<Instant>,
        baud: u32,
        bauds: Vec<u32>,
    }

    impl MockPort {
        fn new(script: Vec<Vec<Vec<u8>>>) -> Self {
            Self {
                script: script.into(),
                pending: VecDeque::new(),
                written: Vec::new(),
                write_times: Vec::new(),
                baud: DEFAULT_BAUD,
                bauds: Vec::new(),
            }
        }
    }

    impl Read for MockPort {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            let Some(mut chunk) = self.pending.pop_front() else {
                return Err(std::io::Error::new(std::io::ErrorKind::TimedOut, "no data"));
            };
            if chunk.len() > buf.len() {
                let rest = chunk.split_off(buf.len());
                self.pending.push_front(rest);
            }
            buf[..chunk.len()].copy_from_slice(&chunk);
            Ok(chunk.len())
        }
    }

    impl Write for MockPort {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.written.push(buf.to_vec());
            self.write_times.push(Instant::now());
            if let Some(replies) = self.script.pop_front() {
                self.pending.extend(replies);
            }
            Ok(buf.len())
        }
        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl Port for MockPort {
        fn set_baud_rate(&mut self, baud_rate: u32) -> Result<()> {
            self.baud = baud_rate;
            self.bauds.push(baud_rate);
            Ok(())
        }
        fn clear_buffers(&mut self) -> Result<()> {
            Ok(())
        }
        fn name(&self) -> &str {
            "mock"
        }
        fn is_connected(&self) -> bool {
            true
        }
    }

    /// Sink whose target cannot be written.
    struct FailingSink;

    impl PictureSink for FailingSink {
        fn write_whole_file(&mut self, _: &str, _: &[u8]) -> Result<PathBuf> {
            Err(Error::Io(io::Error::new(
                io::ErrorKind::PermissionDenied,
                "read-only output directory",
            )))
        }
    }

    struct Outcome {
        result: Result<RunReport>,
        state: SessionState,
        port: MockPort,
        sink: MemorySink,
        events: Vec<String>,
    }

    fn test_config() -> SessionConfig {
        SessionConfig::default()
            .with_delays(Duration::ZERO, Duration::ZERO)
            .with_reset_delay(Duration::ZERO)
            .with_response_timeout(Duration::from_millis(50))
    }

    fn run_with(script: Vec<Vec<Vec<u8>>>, config: SessionConfig, operation: Operation) -> Outcome {
        let _ = env_logger::builder().is_test(true).try_init();
        let mut session = Session::new(MockPort::new(script), config).with_interrupt_checker(|| false);
        let mut sink = MemorySink::default();
        let mut events = Vec::new();
        let result = session.run(operation, &mut sink, |event| {
            events.push(match event {
                Event::Status(_) => "status".to_string(),
                Event::PictureInfo { index, .. } => format!("info {index}"),
                Event::BlockReceived {
                    index,
                    downloaded,
                    total,
                } => format!("block {index} {downloaded}/{total}"),
                Event::PictureSaved { index, name, .. } => format!("saved {index} {name}"),
            });
        });
        Outcome {
            result,
            state: session.state(),
            port: session.into_port(),
            sink,
            events,
        }
    }

    fn packet(payload: &[u8], ack: bool) -> Vec<u8> {
        let mut bytes = Vec::new();
        if ack {
            bytes.push(ACK);
        }
        bytes.push(RECV);
        bytes.extend_from_slice(payload);
        bytes.push(checksum_byte(payload));
        bytes
    }

    fn status_payload(num_pictures: u8) -> Vec<u8> {
        let mut p = vec![0u8; 256];
        p[8] = 0x02;
        p[9] = 0x01;
        p[12..16].copy_from_slice(&[0x00, 0x00, 0x01, 0x02]);
        p[57] = num_pictures;
        p
    }

    fn info_payload(name: &str, size: u32) -> Vec<u8> {
        let mut p = vec![0u8; 256];
        p[8..12].copy_from_slice(&size.to_be_bytes());
        p[32..32 + name.len()].copy_from_slice(name.as_bytes());
        p
    }

    fn picture_data(size: usize) -> Vec<u8> {
        (0..size).map(|i| (i % 251) as u8).collect()
    }

    /// Replies for SET_SPEED, INITIALIZE, STATUS and its confirmation.
    fn handshake(num_pictures: u8) -> Vec<Vec<Vec<u8>>> {
        let status = packet(&status_payload(num_pictures), true);
        vec![
            vec![vec![ACK]],
            vec![vec![ACK, COMPLETE]],
            vec![status[..1].to_vec(), status[1..].to_vec()],
            vec![vec![COMPLETE]],
        ]
    }

    /// Replies for PICTURE_INFO and its confirmation.
    fn info_exchange(name: &str, size: u32) -> Vec<Vec<Vec<u8>>> {
        vec![vec![packet(&info_payload(name, size), true)], vec![vec![COMPLETE]]]
    }

    /// Replies for PICTURE_DOWNLOAD, each block confirmation and the final one.
    fn download_exchange(data: &[u8]) -> Vec<Vec<Vec<u8>>> {
        let mut script = Vec::new();
        for (i, block) in data.chunks(BLOCK_PAYLOAD_LEN).enumerate() {
            let mut payload = block.to_vec();
            payload.resize(BLOCK_PAYLOAD_LEN, 0xEE);
            let bytes = packet(&payload, i == 0);
            let (a, b) = bytes.split_at(bytes.len() / 2);
            script.push(vec![a.to_vec(), b.to_vec()]);
        }
        script.push(vec![vec![COMPLETE]]);
        script
    }

    fn reset_frame() -> Vec<u8> {
        Command::reset_speed().encode().to_vec()
    }

    #[test]
    fn test_status_run() {
        let out = run_with(handshake(3), test_config(), Operation::Status);
        let report = out.result.unwrap();
        let status = report.status.unwrap();
        assert_eq!(status.ac_status_id, 1);
        assert_eq!(status.battery_status_id, 2);
        assert_eq!(status.camera_time, 258);
        assert_eq!(status.num_pictures, 3);
        assert_eq!(out.events, ["status"]);
        assert_eq!(out.state, SessionState::Finished);

        let w = &out.port.written;
        assert_eq!(w.len(), 5);
        assert_eq!(w[0], Command::set_speed(HIGH_BAUD).unwrap().encode());
        assert_eq!(w[1], Command::initialize().encode());
        assert_eq!(w[2], Command::status().encode());
        assert_eq!(w[3], [CORRECT]);
        assert_eq!(w[4], reset_frame());
        assert_eq!(out.port.bauds, [HIGH_BAUD, DEFAULT_BAUD]);
    }

    #[test]
    fn test_list_run() {
        let mut script = handshake(2);
        script.extend(info_exchange("DCP00001.JPG", 40000));
        script.extend(info_exchange("DCP00002.JPG", 50000));
        let out = run_with(script, test_config(), Operation::List);
        let report = out.result.unwrap();

        assert_eq!(out.events, ["status", "info 0", "info 1"]);
        assert_eq!(report.pictures.len(), 2);
        assert_eq!(report.pictures[1].file_name, "DCP00002.JPG");
        assert_eq!(report.pictures[1].file_size, 50000);
        assert!(report.saved.is_empty());

        let w = &out.port.written;
        assert_eq!(w[4], Command::picture_info(0).encode());
        assert_eq!(w[6], Command::picture_info(1).encode());
        assert_eq!(w.last().unwrap(), &reset_frame());
    }

    #[test]
    fn test_list_empty_camera() {
        let out = run_with(handshake(0), test_config(), Operation::List);
        assert!(out.result.unwrap().pictures.is_empty());
        assert_eq!(out.port.written.len(), 5);
    }

    #[test]
    fn test_get_two_block_download() {
        let data = picture_data(1025);
        let mut script = handshake(1);
        script.extend(info_exchange("DCP00001.JPG", 1025));
        script.extend(download_exchange(&data));
        let out = run_with(script, test_config(), Operation::Get(0));
        let report = out.result.unwrap();

        assert_eq!(
            out.events,
            [
                "status",
                "info 0",
                "block 0 1024/1025",
                "block 0 2048/1025",
                "saved 0 DCP00001.JPG"
            ]
        );
        assert_eq!(report.saved, [PathBuf::from("DCP00001.JPG")]);
        assert_eq!(out.sink.files.len(), 1);
        assert_eq!(out.sink.files[0].0, "DCP00001.JPG");
        assert_eq!(out.sink.files[0].1, data);

        let w = &out.port.written;
        assert_eq!(w[6], Command::picture_download(0).encode());
        assert_eq!(w[7], [CORRECT]);
        assert_eq!(w[8], [CORRECT]);
        assert_eq!(w[9], reset_frame());
        assert_eq!(w.len(), 10);
    }

    #[test]
    fn test_get_range_is_clamped() {
        let data = picture_data(1500);
        let mut script = handshake(2);
        script.extend(info_exchange("DCP00002.JPG", 1500));
        script.extend(download_exchange(&data));
        let out = run_with(script, test_config(), Operation::GetRange { start: 1, end: 9 });
        out.result.unwrap();

        assert_eq!(out.port.written[4], Command::picture_info(1).encode());
        assert_eq!(out.sink.files.len(), 1);
        assert_eq!(out.sink.files[0].1.len(), 1500);
    }

    #[test]
    fn test_get_all_downloads_each_picture() {
        let first = picture_data(1100);
        let second = picture_data(3000);
        let mut script = handshake(2);
        script.extend(info_exchange("DCP00001.JPG", 1100));
        script.extend(download_exchange(&first));
        script.extend(info_exchange("DCP00002.JPG", 3000));
        script.extend(download_exchange(&second));
        let out = run_with(script, test_config(), Operation::GetAll);
        let report = out.result.unwrap();

        assert_eq!(report.saved.len(), 2);
        assert_eq!(out.sink.files[0].1, first);
        assert_eq!(out.sink.files[1].1, second);
        assert_eq!(out.sink.files[1].0, "DCP00002.JPG");
    }

    #[test]
    fn test_out_of_range_still_resets_speed() {
        let out = run_with(handshake(2), test_config(), Operation::Get(5));
        assert!(matches!(
            out.result,
            Err(Error::PictureOutOfRange {
                index: 5,
                available: 2
            })
        ));
        assert_eq!(out.state, SessionState::Dispatch);
        assert_eq!(out.port.written.last().unwrap(), &reset_frame());
        assert_eq!(out.port.baud, DEFAULT_BAUD);
    }

    #[test]
    fn test_get_all_on_empty_camera() {
        let out = run_with(handshake(0), test_config(), Operation::GetAll);
        assert!(matches!(
            out.result,
            Err(Error::PictureOutOfRange { index: 0, .. })
        ));
    }

    #[test]
    fn test_speed_mismatch_is_fatal_and_resets() {
        let out = run_with(vec![vec![vec![0x42]]], test_config(), Operation::Status);
        match out.result {
            Err(Error::ProtocolMismatch { state, .. }) => assert_eq!(state, "AwaitSpeedAck"),
            other => panic!("expected mismatch, got {other:?}"),
        }
        assert_eq!(out.port.written.len(), 2);
        assert_eq!(out.port.written[1], reset_frame());
        assert_eq!(out.port.bauds, [DEFAULT_BAUD]);
    }

    #[test]
    fn test_init_nak() {
        let script = vec![vec![vec![ACK]], vec![vec![0xE1]]];
        let out = run_with(script, test_config(), Operation::Status);
        assert!(matches!(out.result, Err(Error::Nak { .. })));
        assert_eq!(out.port.written.last().unwrap(), &reset_frame());
    }

    #[test]
    fn test_busy_before_init_complete() {
        let mut script = handshake(0);
        script[1] = vec![vec![ACK], vec![0xF0, 0xF0], vec![COMPLETE]];
        let out = run_with(script, test_config(), Operation::Status);
        assert!(out.result.is_ok());
    }

    #[test]
    fn test_silent_camera_times_out() {
        let out = run_with(vec![vec![]], test_config(), Operation::Status);
        assert!(matches!(out.result, Err(Error::Timeout(_))));
        assert_eq!(out.state, SessionState::AwaitSpeedAck);
        assert_eq!(out.port.written.last().unwrap(), &reset_frame());
    }

    #[test]
    fn test_overrun_dumps_received_bytes() {
        let mut script = handshake(1);
        script.extend(info_exchange("DCP00001.JPG", 1025));
        let mut block = packet(&picture_data(1024), true);
        block.push(0x99);
        script.push(vec![block]);
        let out = run_with(script, test_config(), Operation::Get(0));

        assert!(matches!(
            out.result,
            Err(Error::Overrun {
                declared: 1027,
                received: 1028
            })
        ));
        assert_eq!(out.sink.files.len(), 1);
        assert_eq!(out.sink.files[0].0, DUMP_FILE_NAME);
        assert_eq!(out.sink.files[0].1.len(), 1026);
        assert_eq!(out.port.written.last().unwrap(), &reset_frame());
    }

    #[test]
    fn test_picture_too_small() {
        let mut script = handshake(1);
        script.extend(info_exchange("DCP00001.JPG", 1000));
        let out = run_with(script, test_config(), Operation::Get(0));
        assert!(matches!(
            out.result,
            Err(Error::SizeConstraint { size: 1000, .. })
        ));
        assert!(out.sink.files.is_empty());
        assert!(
            !out.port
                .written
                .contains(&Command::picture_download(0).encode().to_vec())
        );
    }

    #[test]
    fn test_picture_size_bounds() {
        assert!(check_picture_size(MIN_PICTURE_SIZE).is_err());
        assert!(check_picture_size(MIN_PICTURE_SIZE + 1).is_ok());
        assert!(check_picture_size(MAX_PICTURE_SIZE).is_ok());
        assert!(check_picture_size(MAX_PICTURE_SIZE + 1).is_err());
    }

    #[test]
    fn test_nonconforming_name_falls_back() {
        let data = picture_data(2048);
        let mut script = handshake(1);
        script.extend(info_exchange("IMG_0001.JPG", 2048));
        script.extend(download_exchange(&data));
        let out = run_with(script, test_config(), Operation::Get(0));
        out.result.unwrap();
        assert_eq!(out.sink.files[0].0, DEFAULT_PICTURE_NAME);
        assert_eq!(out.sink.files[0].1, data);
    }

    #[test]
    fn test_skip_speed_negotiation() {
        let script = handshake(0).split_off(1);
        let config = test_config().with_skip_speed_negotiation(true);
        let out = run_with(script, config, Operation::Status);
        out.result.unwrap();
        assert_eq!(out.port.written[0], Command::initialize().encode());
        assert_eq!(out.port.bauds, [HIGH_BAUD, DEFAULT_BAUD]);
        assert_eq!(out.port.written.last().unwrap(), &reset_frame());
    }

    #[test]
    fn test_checksum_failure_strict_and_lenient() {
        let mut script = handshake(0);
        let mut status = packet(&status_payload(0), true);
        let last = status.len() - 1;
        status[last] ^= 0x55;
        script[2] = vec![status];

        let out = run_with(script.clone(), test_config(), Operation::Status);
        assert!(out.result.is_ok());

        let out = run_with(script, test_config().with_strict_checksum(true), Operation::Status);
        assert!(matches!(out.result, Err(Error::ChecksumMismatch { .. })));
    }

    #[test]
    fn test_unsupported_target_baud() {
        let out = run_with(vec![], test_config().with_target_baud(4800), Operation::Status);
        assert!(matches!(out.result, Err(Error::Unsupported(_))));
        assert_eq!(out.port.written, [reset_frame()]);
    }

    #[test]
    fn test_interrupt_aborts_with_cleanup() {
        let mut session = Session::new(MockPort::new(handshake(0)), test_config())
            .with_interrupt_checker(|| true);
        let mut sink = MemorySink::default();
        let result = session.run(Operation::Status, &mut sink, |_| {});
        assert!(matches!(result, Err(Error::Interrupted)));
        assert_eq!(session.port().written, [reset_frame()]);
    }

    #[test]
    fn test_info_confirmation_mismatch() {
        let mut script = handshake(1);
        script.extend(info_exchange("DCP00001.JPG", 2048));
        let last = script.len() - 1;
        script[last] = vec![vec![0x42]];
        let out = run_with(script, test_config(), Operation::List);

        match out.result {
            Err(Error::ProtocolMismatch { state, .. }) => assert_eq!(state, "AwaitInfoComplete"),
            other => panic!("expected mismatch, got {other:?}"),
        }
        assert_eq!(out.state, SessionState::AwaitInfoComplete);
        assert_eq!(out.port.written.last().unwrap(), &reset_frame());
        assert_eq!(out.port.baud, DEFAULT_BAUD);
    }

    #[test]
    fn test_picture_confirmation_nak() {
        let data = picture_data(1500);
        let mut script = handshake(1);
        script.extend(info_exchange("DCP00001.JPG", 1500));
        script.extend(download_exchange(&data));
        let last = script.len() - 1;
        script[last] = vec![vec![0xE1]];
        let out = run_with(script, test_config(), Operation::Get(0));

        match out.result {
            Err(Error::Nak { state }) => assert_eq!(state, "AwaitPictureComplete"),
            other => panic!("expected NAK, got {other:?}"),
        }
        // The picture was already handed over before the confirmation.
        assert_eq!(out.sink.files.len(), 1);
        assert_eq!(out.sink.files[0].1, data);
        assert_eq!(out.port.written.last().unwrap(), &reset_frame());
    }

    #[test]
    fn test_sink_failure_at_write_file() {
        let data = picture_data(1025);
        let mut script = handshake(1);
        script.extend(info_exchange("DCP00001.JPG", 1025));
        script.extend(download_exchange(&data));

        let mut session = Session::new(MockPort::new(script), test_config())
            .with_interrupt_checker(|| false);
        let result = session.run(Operation::Get(0), &mut FailingSink, |_| {});

        assert!(matches!(result, Err(Error::Io(_))));
        assert_eq!(session.state(), SessionState::WriteFile);
        let w = &session.port().written;
        assert_eq!(w.len(), 9);
        assert_eq!(w[7], [CORRECT]);
        assert_eq!(w[8], reset_frame());
        assert_eq!(session.port().baud, DEFAULT_BAUD);
    }

    #[test]
    fn test_fine_delay_after_dispatch() {
        let coarse = Duration::from_millis(60);
        let mut script = handshake(1);
        script.extend(info_exchange("DCP00001.JPG", 2048));
        let config = test_config().with_delays(coarse, Duration::ZERO);
        let out = run_with(script, config, Operation::List);
        out.result.unwrap();

        let times = &out.port.write_times;
        // SET_SPEED, INITIALIZE, STATUS, CORRECT, PICTURE_INFO, CORRECT, reset.
        assert_eq!(times.len(), 7);
        for i in 1..4 {
            assert!(times[i] - times[i - 1] >= coarse, "write {i} before dispatch");
        }
        for i in 4..6 {
            assert!(times[i] - times[i - 1] < coarse, "write {i} after dispatch");
        }
    }

    #[test]
    fn test_range_end_before_start() {
        let out = run_with(handshake(5), test_config(), Operation::GetRange { start: 3, end: 1 });
        assert!(matches!(out.result, Err(Error::InvalidArgument(_))));
    }

    #[test]
    fn test_operation_display() {
        assert_eq!(Operation::GetRange { start: 1, end: 4 }.to_string(), "get 1 4");
        assert_eq!(Operation::GetAll.to_string(), "get all");
        assert!(!Operation::List.downloads());
        assert!(Operation::Get(0).downloads());
    }
}
