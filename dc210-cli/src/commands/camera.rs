//! Camera workflows: status, list and get.

use anyhow::{Context, Result, bail};
use console::style;
use dc210::{
    Event, FileSink, NativePort, Operation, PictureInfoRecord, RunReport, SerialConfig, Session,
    SessionConfig, StatusRecord,
    protocol::frame::{HIGH_BAUD, SUPPORTED_BAUDS},
};
use indicatif::{ProgressBar, ProgressStyle};
use log::{debug, info};
use serde::Serialize;
use std::path::PathBuf;

use crate::Cli;
use crate::config::Config;

/// Effective settings after merging flags, environment and config files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Settings {
    pub port: String,
    pub baud: u32,
    pub no_baud: bool,
    pub output_dir: PathBuf,
    pub quiet: bool,
}

impl Settings {
    /// Resolve settings. Flags and `DC210_*` variables win over config files.
    ///
    /// `baud` is the already validated `--baud` value.
    pub(crate) fn resolve(cli: &Cli, baud: Option<u32>, config: &Config) -> Result<Self> {
        Self::from_parts(
            cli.port.clone(),
            baud,
            cli.no_baud,
            cli.output_dir.clone(),
            cli.quiet,
            config,
        )
    }

    fn from_parts(
        port: Option<String>,
        baud: Option<u32>,
        no_baud: bool,
        output_dir: Option<PathBuf>,
        quiet: bool,
        config: &Config,
    ) -> Result<Self> {
        let Some(port) = port.or_else(|| config.connection.port.clone()) else {
            bail!(
                "No serial port specified. Use --port, set DC210_PORT, or add `port` to the \
                 [connection] section of dc210.toml"
            );
        };

        let baud = baud
            .or(config.connection.baud)
            .unwrap_or(HIGH_BAUD);
        if !SUPPORTED_BAUDS.contains(&baud) {
            bail!("Unsupported baud rate {baud} in config, expected one of {SUPPORTED_BAUDS:?}");
        }

        Ok(Self {
            port,
            baud,
            no_baud: no_baud || config.connection.no_baud,
            output_dir: output_dir
                .or_else(|| config.download.output_dir.clone())
                .unwrap_or_else(|| PathBuf::from(".")),
            quiet,
        })
    }

    fn session_config(&self) -> SessionConfig {
        SessionConfig::default()
            .with_target_baud(self.baud)
            .with_skip_speed_negotiation(self.no_baud)
    }
}

/// Open the camera port and run one operation.
fn run_operation<O>(settings: &Settings, operation: Operation, observer: O) -> Result<RunReport>
where
    O: FnMut(Event<'_>),
{
    debug!("Effective settings: {settings:?}");
    info!("Connecting to serial port {}", settings.port);

    let port = NativePort::open(&SerialConfig::new(&settings.port))
        .with_context(|| format!("Failed to open serial port {}", settings.port))?;
    let mut session = Session::new(port, settings.session_config());
    let mut sink = FileSink::new(&settings.output_dir);

    session
        .run(operation, &mut sink, observer)
        .with_context(|| format!("'{operation}' failed"))
}

/// `status`: print the camera status record.
pub(crate) fn cmd_status(settings: &Settings, json: bool) -> Result<()> {
    let report = run_operation(settings, Operation::Status, |_| {})?;
    let status = report
        .status
        .context("Camera did not report a status record")?;

    if json {
        println!("{}", serde_json::to_string_pretty(&status)?);
    } else {
        println!("{}", format_status(&status));
    }
    Ok(())
}

/// Picture listing entry in JSON output.
#[derive(Serialize)]
struct ListedPicture<'a> {
    index: usize,
    #[serde(flatten)]
    info: &'a PictureInfoRecord,
}

/// `list`: print one line per stored picture.
pub(crate) fn cmd_list(settings: &Settings, json: bool) -> Result<()> {
    let report = run_operation(settings, Operation::List, |event| {
        if json {
            return;
        }
        if let Event::PictureInfo { index, info } = event {
            println!("{}", format_picture_line(index, info));
        }
    })?;

    if json {
        let listed: Vec<_> = report
            .pictures
            .iter()
            .enumerate()
            .map(|(index, info)| ListedPicture { index, info })
            .collect();
        println!("{}", serde_json::to_string_pretty(&listed)?);
    } else if report.pictures.is_empty() {
        println!("No pictures stored in the camera");
    }
    Ok(())
}

/// `get`: download pictures into the output directory.
pub(crate) fn cmd_get(settings: &Settings, operation: Operation) -> Result<()> {
    let mut progress = DownloadProgress::new(ProgressMode::detect(settings.quiet));
    let report = run_operation(settings, operation, |event| progress.handle(&event))?;
    progress.clear();

    if !settings.quiet {
        eprintln!(
            "{} Downloaded {} picture(s) to {}",
            style("✓")
                .green()
                .bold(),
            report.saved.len(),
            style(settings.output_dir.display()).yellow()
        );
    }
    Ok(())
}

/// Human-readable status summary.
pub(crate) fn format_status(status: &StatusRecord) -> String {
    let ident = if status.camera_ident.is_empty() {
        "(unnamed)"
    } else {
        status.camera_ident.as_str()
    };
    format!(
        "Camera:           {ident}\n\
         Camera type:      0x{:02X}\n\
         Firmware:         {}.{}\n\
         Battery status:   {}\n\
         AC adapter:       {}\n\
         Camera time:      {}\n\
         Pictures stored:  {}\n\
         Pictures taken:   {}\n\
         Flashes fired:    {}",
        status.camera_type_id,
        status.firmware_major,
        status.firmware_minor,
        status.battery_status_id,
        status.ac_status_id,
        status.camera_time,
        status.num_pictures,
        status.total_pictures_taken,
        status.total_flashes_fired,
    )
}

/// One listing line: index, name, size and encoding ids.
pub(crate) fn format_picture_line(index: u16, info: &PictureInfoRecord) -> String {
    format!(
        "{index:>4}  {:<12}  {:>8} bytes  resolution={} compression={} picnum={}",
        info.file_name, info.file_size, info.resolution, info.compression, info.picture_number
    )
}

/// How download progress is shown on stderr.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ProgressMode {
    Bar,
    Dots,
    Silent,
}

impl ProgressMode {
    fn detect(quiet: bool) -> Self {
        if quiet {
            Self::Silent
        } else if crate::use_fancy_output() {
            Self::Bar
        } else {
            Self::Dots
        }
    }
}

/// Renders session events for `get`.
struct DownloadProgress {
    mode: ProgressMode,
    bar: Option<ProgressBar>,
}

impl DownloadProgress {
    fn new(mode: ProgressMode) -> Self {
        Self { mode, bar: None }
    }

    fn handle(&mut self, event: &Event<'_>) {
        match *event {
            Event::PictureInfo { index, info } => self.start(index, info),
            Event::BlockReceived {
                downloaded, total, ..
            } => match self.mode {
                ProgressMode::Bar => {
                    if let Some(bar) = &self.bar {
                        bar.set_position(u64::from(downloaded.min(total)));
                    }
                },
                ProgressMode::Dots => eprint!("."),
                ProgressMode::Silent => {},
            },
            Event::PictureSaved { index, name, path } => {
                self.clear();
                if self.mode == ProgressMode::Dots {
                    eprintln!();
                }
                if self.mode != ProgressMode::Silent {
                    eprintln!(
                        "{} Picture {index} saved as {} ({})",
                        style("✓").green(),
                        style(name).cyan(),
                        path.display()
                    );
                }
            },
            Event::Status(status) => {
                debug!("Camera holds {} picture(s)", status.num_pictures);
            },
        }
    }

    fn start(&mut self, index: u16, info: &PictureInfoRecord) {
        self.clear();
        match self.mode {
            ProgressMode::Bar => {
                let bar = ProgressBar::new(u64::from(info.file_size));
                #[allow(clippy::unwrap_used)] // Static template string
                bar.set_style(
                    ProgressStyle::default_bar()
                        .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {bytes}/{total_bytes} {msg}")
                        .unwrap()
                        .progress_chars("#>-"),
                );
                bar.set_message(format!("{index}: {}", info.output_name()));
                self.bar = Some(bar);
            },
            ProgressMode::Dots => eprint!("{}: ", info.output_name()),
            ProgressMode::Silent => {},
        }
    }

    fn clear(&mut self) {
        if let Some(bar) = self.bar.take() {
            bar.finish_and_clear();
        }
    }
}
