//! Decoders for the fixed-layout status and picture-info packets.
//!
//! Both packets carry a 256-byte payload. Multi-byte fields are big-endian.
//!
//! ## Status Layout
//!
//! ```text
//! offset  size  field
//!      1     1  camera type
//!    2-3     2  firmware major / minor
//!      8     1  battery status
//!      9     1  AC adapter status
//!     12     4  camera clock (BE)
//!     16     1  zoom mode
//!  18-23     6  flash charged, compression, flash mode,
//!               exposure compensation, picture size, file type
//!     25     2  total pictures taken (BE)
//!     27     2  total flashes fired (BE)
//!     57     1  pictures stored
//!     90    30  camera identification
//! ```
//!
//! ## Picture Info Layout
//!
//! ```text
//! offset  size  field
//!    3-4     2  resolution / compression
//!      6     2  picture number (BE)
//!      8     4  file size (BE)
//!     12     4  elapsed time (BE)
//!     32    12  file name
//! ```

use {
    crate::error::{Error, Result},
    byteorder::{BigEndian, ReadBytesExt},
    std::io::{Cursor, Read},
};

/// Size of a status or picture-info payload.
pub const RECORD_LEN: usize = 256;

/// Prefix the camera gives every picture it names itself.
pub const FILE_NAME_PREFIX: &str = "DCP";

/// Name used when the camera reports a non-conforming file name.
pub const DEFAULT_PICTURE_NAME: &str = "picture.jpg";

const FILE_NAME_LEN: usize = 12;
const CAMERA_IDENT_LEN: usize = 30;

/// Decoded camera status.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct StatusRecord {
    /// Camera type id.
    pub camera_type_id: u8,
    /// Firmware major version.
    pub firmware_major: u8,
    /// Firmware minor version.
    pub firmware_minor: u8,
    /// Battery status id.
    pub battery_status_id: u8,
    /// AC adapter status id.
    pub ac_status_id: u8,
    /// Camera clock value.
    pub camera_time: u32,
    /// Zoom mode.
    pub zoom_mode: u8,
    /// Flash charged flag.
    pub flash_charged: u8,
    /// Compression mode id.
    pub compression_mode_id: u8,
    /// Flash mode.
    pub flash_mode: u8,
    /// Exposure compensation setting.
    pub exposure_compensation: u8,
    /// Picture size setting.
    pub picture_size: u8,
    /// File type setting.
    pub file_type: u8,
    /// Lifetime picture counter.
    pub total_pictures_taken: u16,
    /// Lifetime flash counter.
    pub total_flashes_fired: u16,
    /// Pictures currently stored on the card.
    pub num_pictures: u8,
    /// Camera identification string.
    pub camera_ident: String,
}

impl StatusRecord {
    /// Decode a status payload.
    pub fn decode(payload: &[u8]) -> Result<Self> {
        let mut r = record_reader(payload, "status")?;

        skip(&mut r, 1)?;
        let camera_type_id = r.read_u8()?;
        let firmware_major = r.read_u8()?;
        let firmware_minor = r.read_u8()?;
        skip(&mut r, 4)?;
        let battery_status_id = r.read_u8()?;
        let ac_status_id = r.read_u8()?;
        skip(&mut r, 2)?;
        let camera_time = r.read_u32::<BigEndian>()?;
        let zoom_mode = r.read_u8()?;
        skip(&mut r, 1)?;
        let flash_charged = r.read_u8()?;
        let compression_mode_id = r.read_u8()?;
        let flash_mode = r.read_u8()?;
        let exposure_compensation = r.read_u8()?;
        let picture_size = r.read_u8()?;
        let file_type = r.read_u8()?;
        skip(&mut r, 1)?;
        let total_pictures_taken = r.read_u16::<BigEndian>()?;
        let total_flashes_fired = r.read_u16::<BigEndian>()?;
        skip(&mut r, 28)?;
        let num_pictures = r.read_u8()?;
        skip(&mut r, 32)?;
        let camera_ident = read_text(&mut r, CAMERA_IDENT_LEN)?;

        Ok(Self {
            camera_type_id,
            firmware_major,
            firmware_minor,
            battery_status_id,
            ac_status_id,
            camera_time,
            zoom_mode,
            flash_charged,
            compression_mode_id,
            flash_mode,
            exposure_compensation,
            picture_size,
            file_type,
            total_pictures_taken,
            total_flashes_fired,
            num_pictures,
            camera_ident,
        })
    }
}

/// Decoded picture information.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct PictureInfoRecord {
    /// Resolution id.
    pub resolution: u8,
    /// Compression id.
    pub compression: u8,
    /// Picture number as counted by the camera.
    pub picture_number: u16,
    /// Size of the JPEG file in bytes.
    pub file_size: u32,
    /// Elapsed time value.
    pub elapsed_time: u32,
    /// File name reported by the camera.
    pub file_name: String,
}

impl PictureInfoRecord {
    /// Decode a picture-info payload.
    pub fn decode(payload: &[u8]) -> Result<Self> {
        let mut r = record_reader(payload, "picture info")?;

        skip(&mut r, 3)?;
        let resolution = r.read_u8()?;
        let compression = r.read_u8()?;
        skip(&mut r, 1)?;
        let picture_number = r.read_u16::<BigEndian>()?;
        let file_size = r.read_u32::<BigEndian>()?;
        let elapsed_time = r.read_u32::<BigEndian>()?;
        skip(&mut r, 16)?;
        let file_name = read_text(&mut r, FILE_NAME_LEN)?;

        Ok(Self {
            resolution,
            compression,
            picture_number,
            file_size,
            elapsed_time,
            file_name,
        })
    }

    /// `true` if the camera-supplied name follows the `DCPnnnnn` convention.
    pub fn has_conforming_name(&self) -> bool {
        self.file_name.starts_with(FILE_NAME_PREFIX)
    }

    /// Name to store the picture under.
    pub fn output_name(&self) -> &str {
        if self.has_conforming_name() {
            &self.file_name
        } else {
            DEFAULT_PICTURE_NAME
        }
    }
}

fn record_reader<'a>(payload: &'a [u8], what: &str) -> Result<Cursor<&'a [u8]>> {
    if payload.len() < RECORD_LEN {
        return Err(Error::InvalidArgument(format!(
            "{what} record needs {RECORD_LEN} bytes, got {}",
            payload.len()
        )));
    }
    Ok(Cursor::new(&payload[..RECORD_LEN]))
}

fn skip(r: &mut Cursor<&[u8]>, n: u64) -> Result<()> {
    r.set_position(r.position() + n);
    Ok(())
}

/// Read a fixed-width text field, stopping at the first NUL.
fn read_text(r: &mut Cursor<&[u8]>, len: usize) -> Result<String> {
    let mut field = vec![0u8; len];
    r.read_exact(&mut field)?;
    let end = field.iter().position(|&c| c == 0).unwrap_or(len);
    Ok(String::from_utf8_lossy(&field[..end])
        .trim_end()
        .to_string())
}
