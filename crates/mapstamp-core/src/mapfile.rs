//! Mapsforge binary map header parsing.
//!
//! Every Mapsforge `.map` file opens with the ASCII magic
//! `mapsforge binary OSM`, followed by a big-endian header:
//!
//! ```text
//! u32 header size | u32 file version | u64 file size | i64 creation date (ms)
//! i32 min lat | i32 min lon | i32 max lat | i32 max lon   (microdegrees)
//! u16 tile size | string projection | u8 flags | optional fields ...
//! ```
//!
//! [`MapHeaderParser`] reads only as far as the bounding box using a fixed
//! [`MapLayout`]. [`MapFileInfo`] decodes the whole header for inspection.

use crate::error::{Error, Result};
use crate::geo::BoundingBox;
use crate::proto::ByteCursor;
use crate::timestamp::DateStamp;
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;
use tracing::debug;

/// Magic bytes at the start of every Mapsforge map file
pub const MAGIC: &[u8] = b"mapsforge binary OSM";

/// Bytes between the magic and the bounding box
const PREAMBLE_LEN: usize = 24;

/// Bytes of the four bounding-box integers
const BBOX_LEN: usize = 16;

/// Largest header size [`MapFileInfo`] accepts
pub const MAX_HEADER_SIZE: u32 = 4 * 1024 * 1024;

const FLAG_DEBUG: u8 = 0x80;
const FLAG_START_POSITION: u8 = 0x40;
const FLAG_START_ZOOM: u8 = 0x20;
const FLAG_LANGUAGE: u8 = 0x10;
const FLAG_COMMENT: u8 = 0x08;
const FLAG_CREATED_BY: u8 = 0x04;

/// How the bytes between the magic and the bounding box are treated.
///
/// Chosen by the caller, never sniffed from the file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum MapLayout {
    /// Skip all 24 preamble bytes; no creation date is reported
    SkipPreamble,
    /// Skip 16 bytes, then read the i64 creation date in milliseconds
    #[default]
    ExplicitDate,
}

impl MapLayout {
    fn skip_len(self) -> usize {
        match self {
            MapLayout::SkipPreamble => PREAMBLE_LEN,
            MapLayout::ExplicitDate => PREAMBLE_LEN - 8,
        }
    }
}

/// The fields [`MapHeaderParser`] extracts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MapHeader {
    /// Covered area
    pub bbox: BoundingBox,
    /// Creation date in milliseconds since the Unix epoch, if the layout reads it
    pub created_ms: Option<i64>,
}

impl MapHeader {
    /// Calendar date of `created_ms`
    pub fn creation_date(&self) -> Option<DateStamp> {
        self.created_ms.and_then(DateStamp::from_unix_millis)
    }
}

/// Reads the magic and checks it, consuming nothing past it
fn read_magic<R: Read>(reader: &mut R) -> Result<()> {
    let mut magic = [0u8; MAGIC.len()];
    reader.read_exact(&mut magic).map_err(|e| match e.kind() {
        io::ErrorKind::UnexpectedEof => Error::BadMagic,
        _ => Error::file_read("<map stream>", e),
    })?;
    if &magic[..] != MAGIC {
        return Err(Error::BadMagic);
    }
    Ok(())
}

/// Reads up to `len` more bytes into `buf`
fn read_more<R: Read>(reader: &mut R, buf: &mut Vec<u8>, len: usize) -> Result<()> {
    reader
        .take(len as u64)
        .read_to_end(buf)
        .map_err(|e| Error::file_read("<map stream>", e))?;
    Ok(())
}

/// Fixed-layout reader for the Mapsforge bounding box
#[derive(Debug, Clone, Copy, Default)]
pub struct MapHeaderParser {
    layout: MapLayout,
}

impl MapHeaderParser {
    /// Creates a parser for `layout`
    pub fn new(layout: MapLayout) -> Self {
        Self { layout }
    }

    /// Configured layout
    pub fn layout(&self) -> MapLayout {
        self.layout
    }

    /// Parses the header of the file at `path`.
    ///
    /// The file is closed before this returns, on success or failure.
    pub fn parse(&self, path: impl AsRef<Path>) -> Result<MapHeader> {
        let path = path.as_ref();
        let header = {
            let file = File::open(path).map_err(|e| Error::file_read(path, e))?;
            self.parse_reader(io::BufReader::new(file))
        }?;
        debug!(
            "Map header of {}: bbox {}, created {:?}",
            path.display(),
            header.bbox,
            header.created_ms
        );
        Ok(header)
    }

    /// Parses a header from any reader
    pub fn parse_reader<R: Read>(&self, mut reader: R) -> Result<MapHeader> {
        read_magic(&mut reader)?;

        let date_len = match self.layout {
            MapLayout::SkipPreamble => 0,
            MapLayout::ExplicitDate => 8,
        };
        let mut buf = MAGIC.to_vec();
        read_more(&mut reader, &mut buf, self.layout.skip_len() + date_len + BBOX_LEN)?;

        let mut cursor = ByteCursor::new(&buf);
        cursor.skip(MAGIC.len())?;
        cursor.skip(self.layout.skip_len())?;
        let created_ms = match self.layout {
            MapLayout::SkipPreamble => None,
            MapLayout::ExplicitDate => Some(cursor.read_i64_be()?),
        };
        let bbox = read_bbox(&mut cursor)?;

        Ok(MapHeader { bbox, created_ms })
    }
}

fn read_bbox(cursor: &mut ByteCursor<'_>) -> Result<BoundingBox> {
    let min_lat = cursor.read_i32_be()?;
    let min_lon = cursor.read_i32_be()?;
    let max_lat = cursor.read_i32_be()?;
    let max_lon = cursor.read_i32_be()?;
    Ok(BoundingBox::new(min_lat, min_lon, max_lat, max_lon))
}

/// Map start position in microdegrees
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StartPosition {
    /// Latitude
    pub lat: i32,
    /// Longitude
    pub lon: i32,
}

/// One entry of the zoom-interval table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ZoomInterval {
    /// Zoom level the sub-file's tiles are cut at
    pub base_zoom: u8,
    /// Lowest zoom served by the sub-file
    pub min_zoom: u8,
    /// Highest zoom served by the sub-file
    pub max_zoom: u8,
    /// Absolute start of the sub-file
    pub subfile_start: u64,
    /// Sub-file length in bytes
    pub subfile_size: u64,
}

/// Every field of a Mapsforge file header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MapFileInfo {
    /// Header length after the size field
    pub header_size: u32,
    /// Map format version
    pub file_version: u32,
    /// Total file size declared by the writer
    pub file_size: u64,
    /// Creation date in milliseconds since the Unix epoch
    pub created_ms: i64,
    /// Covered area
    pub bbox: BoundingBox,
    /// Tile edge length in pixels
    pub tile_size: u16,
    /// Projection name
    pub projection: String,
    /// Whether debug signatures are present in the file
    pub debug_info: bool,
    /// Suggested initial map centre
    pub start_position: Option<StartPosition>,
    /// Suggested initial zoom level
    pub start_zoom: Option<u8>,
    /// Preferred language(s)
    pub language_preference: Option<String>,
    /// Free-form comment
    pub comment: Option<String>,
    /// Writer identification
    pub created_by: Option<String>,
    /// POI tag table
    pub poi_tags: Vec<String>,
    /// Way tag table
    pub way_tags: Vec<String>,
    /// Zoom-interval configuration
    pub zoom_intervals: Vec<ZoomInterval>,
}

impl MapFileInfo {
    /// Reads the full header of the file at `path`
    pub fn read(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|e| Error::file_read(path, e))?;
        Self::from_reader(io::BufReader::new(file))
    }

    /// Reads the full header from any reader.
    ///
    /// The header-size field bounds how much is read; sizes above
    /// [`MAX_HEADER_SIZE`] are rejected before anything is buffered.
    pub fn from_reader<R: Read>(mut reader: R) -> Result<Self> {
        read_magic(&mut reader)?;

        let mut buf = MAGIC.to_vec();
        read_more(&mut reader, &mut buf, 4)?;
        let header_size = ByteCursor::new(&buf[MAGIC.len()..]).read_u32_be()?;
        if header_size > MAX_HEADER_SIZE {
            return Err(Error::invalid_field(format!(
                "map header size {} exceeds {} bytes",
                header_size, MAX_HEADER_SIZE
            )));
        }
        read_more(&mut reader, &mut buf, header_size as usize)?;

        let mut c = ByteCursor::new(&buf);
        c.skip(MAGIC.len() + 4)?;

        let file_version = c.read_u32_be()?;
        let file_size = c.read_u64_be()?;
        let created_ms = c.read_i64_be()?;
        let bbox = read_bbox(&mut c)?;
        let tile_size = c.read_u16_be()?;
        let projection = c.read_prefixed_string()?;

        let flags = c.read_u8()?;
        let start_position = if flags & FLAG_START_POSITION != 0 {
            Some(StartPosition {
                lat: c.read_i32_be()?,
                lon: c.read_i32_be()?,
            })
        } else {
            None
        };
        let start_zoom = if flags & FLAG_START_ZOOM != 0 {
            Some(c.read_u8()?)
        } else {
            None
        };
        let mut optional_string = |flag: u8| -> Result<Option<String>> {
            if flags & flag != 0 {
                c.read_prefixed_string().map(Some)
            } else {
                Ok(None)
            }
        };
        let language_preference = optional_string(FLAG_LANGUAGE)?;
        let comment = optional_string(FLAG_COMMENT)?;
        let created_by = optional_string(FLAG_CREATED_BY)?;

        let poi_tags = read_tag_table(&mut c)?;
        let way_tags = read_tag_table(&mut c)?;

        let interval_count = c.read_u8()?;
        let zoom_intervals = (0..interval_count)
            .map(|_| -> Result<ZoomInterval> {
                Ok(ZoomInterval {
                    base_zoom: c.read_u8()?,
                    min_zoom: c.read_u8()?,
                    max_zoom: c.read_u8()?,
                    subfile_start: c.read_u64_be()?,
                    subfile_size: c.read_u64_be()?,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            header_size,
            file_version,
            file_size,
            created_ms,
            bbox,
            tile_size,
            projection,
            debug_info: flags & FLAG_DEBUG != 0,
            start_position,
            start_zoom,
            language_preference,
            comment,
            created_by,
            poi_tags,
            way_tags,
            zoom_intervals,
        })
    }

    /// Calendar date of `created_ms`
    pub fn creation_date(&self) -> Option<DateStamp> {
        DateStamp::from_unix_millis(self.created_ms)
    }
}

fn read_tag_table(c: &mut ByteCursor<'_>) -> Result<Vec<String>> {
    let count = c.read_u16_be()?;
    (0..count).map(|_| c.read_prefixed_string()).collect()
}
