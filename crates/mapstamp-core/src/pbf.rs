//! OSM PBF header extraction.
//!
//! An OSM PBF file is a sequence of blobs, each framed as:
//!
//! ```text
//! [u32 BE header length][BlobHeader][Blob]
//! ```
//!
//! The first blob is always the `OSMHeader` blob, so only it is read. Its
//! payload is either stored raw or zlib-compressed and decodes to a
//! `HeaderBlock` message.

use crate::error::{Error, Result};
use crate::proto::{zigzag_decode, FieldValue, ProtoScanner};
use flate2::read::ZlibDecoder;
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;
use tracing::{debug, trace};

/// Largest BlobHeader the format allows
pub const MAX_BLOB_HEADER_SIZE: u64 = 64 * 1024;

/// Largest Blob the format allows
pub const MAX_BLOB_SIZE: u64 = 32 * 1024 * 1024;

mod field {
    pub(super) const BLOB_HEADER_TYPE: u32 = 1;
    pub(super) const BLOB_HEADER_DATASIZE: u32 = 3;

    pub(super) const BLOB_RAW: u32 = 1;
    pub(super) const BLOB_RAW_SIZE: u32 = 2;
    pub(super) const BLOB_ZLIB_DATA: u32 = 3;

    pub(super) const HEADER_BBOX: u32 = 1;
    pub(super) const HEADER_REQUIRED_FEATURES: u32 = 4;
    pub(super) const HEADER_OPTIONAL_FEATURES: u32 = 5;
    pub(super) const HEADER_WRITING_PROGRAM: u32 = 16;
    pub(super) const HEADER_SOURCE: u32 = 17;
    pub(super) const HEADER_REPLICATION_TIMESTAMP: u32 = 32;
    pub(super) const HEADER_REPLICATION_SEQUENCE: u32 = 33;
    pub(super) const HEADER_REPLICATION_BASE_URL: u32 = 34;
}

/// Bounding box from a PBF header, in nanodegrees
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HeaderBBox {
    /// Western edge
    pub left: i64,
    /// Eastern edge
    pub right: i64,
    /// Northern edge
    pub top: i64,
    /// Southern edge
    pub bottom: i64,
}

impl HeaderBBox {
    fn parse(data: &[u8]) -> Self {
        let mut bbox = Self::default();
        for f in ProtoScanner::new(data) {
            let Some(raw) = f.as_varint() else { continue };
            let value = zigzag_decode(raw);
            match f.number {
                1 => bbox.left = value,
                2 => bbox.right = value,
                3 => bbox.top = value,
                4 => bbox.bottom = value,
                _ => {}
            }
        }
        bbox
    }
}

/// The fields of an OSM `HeaderBlock` worth reporting
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PbfHeader {
    /// Declared data extent
    pub bbox: Option<HeaderBBox>,
    /// Features a reader must support
    pub required_features: Vec<String>,
    /// Features a reader may use
    pub optional_features: Vec<String>,
    /// Program that wrote the file
    pub writing_program: Option<String>,
    /// Data source
    pub source: Option<String>,
    /// As-of time of the data, seconds since the Unix epoch
    pub replication_timestamp: Option<u64>,
    /// Replication sequence number
    pub replication_sequence_number: Option<u64>,
    /// Replication base URL
    pub replication_base_url: Option<String>,
}

impl PbfHeader {
    /// Collects the known fields from raw `HeaderBlock` bytes.
    ///
    /// Unknown fields are skipped. The first replication timestamp wins.
    pub fn parse(data: &[u8]) -> Self {
        let mut header = Self::default();
        for f in ProtoScanner::new(data) {
            match (f.number, f.value) {
                (field::HEADER_BBOX, FieldValue::Bytes(b)) => {
                    header.bbox = Some(HeaderBBox::parse(b));
                }
                (field::HEADER_REQUIRED_FEATURES, FieldValue::Bytes(b)) => {
                    header.required_features.push(lossy(b));
                }
                (field::HEADER_OPTIONAL_FEATURES, FieldValue::Bytes(b)) => {
                    header.optional_features.push(lossy(b));
                }
                (field::HEADER_WRITING_PROGRAM, FieldValue::Bytes(b)) => {
                    header.writing_program = Some(lossy(b));
                }
                (field::HEADER_SOURCE, FieldValue::Bytes(b)) => {
                    header.source = Some(lossy(b));
                }
                (field::HEADER_REPLICATION_TIMESTAMP, FieldValue::Varint(v)) => {
                    header.replication_timestamp.get_or_insert(v);
                }
                (field::HEADER_REPLICATION_SEQUENCE, FieldValue::Varint(v)) => {
                    header.replication_sequence_number = Some(v);
                }
                (field::HEADER_REPLICATION_BASE_URL, FieldValue::Bytes(b)) => {
                    header.replication_base_url = Some(lossy(b));
                }
                _ => trace!("Skipping header field {}", f.number),
            }
        }
        header
    }
}

fn lossy(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).into_owned()
}

/// Reads exactly `len` bytes, or `None` if the input ends first
fn read_region<R: Read>(reader: &mut R, len: u64) -> io::Result<Option<Vec<u8>>> {
    let mut buf = Vec::new();
    reader.take(len).read_to_end(&mut buf)?;
    if (buf.len() as u64) < len {
        return Ok(None);
    }
    Ok(Some(buf))
}

/// Reads the header block bytes of the first blob.
///
/// Returns `Ok(None)` for anything that does not look like a well-formed
/// PBF header blob.
pub fn read_header_block<R: Read>(mut reader: R) -> Result<Option<Vec<u8>>> {
    let read_err = |e: io::Error| Error::file_read("<pbf stream>", e);

    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
            debug!("PBF stream shorter than its length prefix");
            return Ok(None);
        }
        Err(e) => return Err(read_err(e)),
    }

    let header_len = u32::from_be_bytes(len_buf) as u64;
    if header_len > MAX_BLOB_HEADER_SIZE {
        debug!("BlobHeader length {} exceeds limit", header_len);
        return Ok(None);
    }
    let Some(blob_header) = read_region(&mut reader, header_len).map_err(read_err)? else {
        debug!("PBF stream ends inside BlobHeader ({} bytes)", header_len);
        return Ok(None);
    };

    let mut datasize = None;
    for f in ProtoScanner::new(&blob_header) {
        match (f.number, f.value) {
            (field::BLOB_HEADER_DATASIZE, FieldValue::Varint(v)) => datasize = Some(v),
            (field::BLOB_HEADER_TYPE, FieldValue::Bytes(b)) => {
                trace!("First blob type: {}", String::from_utf8_lossy(b));
            }
            _ => {}
        }
    }
    let Some(datasize) = datasize else {
        debug!("BlobHeader carries no datasize");
        return Ok(None);
    };
    if datasize > MAX_BLOB_SIZE {
        debug!("Blob size {} exceeds limit", datasize);
        return Ok(None);
    }

    let Some(blob) = read_region(&mut reader, datasize).map_err(read_err)? else {
        debug!("PBF stream ends inside Blob ({} bytes)", datasize);
        return Ok(None);
    };

    let mut raw = None;
    let mut raw_size = None;
    let mut zlib_data = None;
    for f in ProtoScanner::new(&blob) {
        match (f.number, f.value) {
            (field::BLOB_RAW, FieldValue::Bytes(b)) => raw = Some(b),
            (field::BLOB_RAW_SIZE, FieldValue::Varint(v)) => raw_size = Some(v),
            (field::BLOB_ZLIB_DATA, FieldValue::Bytes(b)) => zlib_data = Some(b),
            _ => {}
        }
    }

    if let Some(compressed) = zlib_data {
        // One byte past the limit tells an oversized stream from one that fits
        let mut inflated = Vec::new();
        ZlibDecoder::new(compressed)
            .take(MAX_BLOB_SIZE + 1)
            .read_to_end(&mut inflated)
            .map_err(Error::Decompression)?;
        if inflated.len() as u64 > MAX_BLOB_SIZE {
            debug!("Header block inflates past {} bytes", MAX_BLOB_SIZE);
            return Ok(None);
        }
        if let Some(expected) = raw_size.filter(|&n| n != inflated.len() as u64) {
            debug!(
                "Header block raw_size {} differs from inflated length {}",
                expected,
                inflated.len()
            );
        }
        trace!("Inflated header block: {} -> {} bytes", compressed.len(), inflated.len());
        return Ok(Some(inflated));
    }

    match raw {
        Some(raw) => Ok(Some(raw.to_vec())),
        None => {
            debug!("Header blob has neither raw nor zlib_data payload");
            Ok(None)
        }
    }
}

/// Reads the header summary of a PBF stream
pub fn read_header<R: Read>(reader: R) -> Result<Option<PbfHeader>> {
    Ok(read_header_block(reader)?.map(|block| PbfHeader::parse(&block)))
}

/// Extracts `osmosis_replication_timestamp` from a PBF stream
pub fn read_replication_timestamp<R: Read>(reader: R) -> Result<Option<u64>> {
    let Some(block) = read_header_block(reader)? else {
        return Ok(None);
    };
    Ok(ProtoScanner::find_varint(&block, field::HEADER_REPLICATION_TIMESTAMP))
}

/// Extracts `osmosis_replication_timestamp` (seconds since the Unix epoch)
/// from the header blob of a PBF file
pub fn extract_replication_timestamp(path: impl AsRef<Path>) -> Result<Option<u64>> {
    let path = path.as_ref();
    let file = File::open(path).map_err(|e| Error::file_read(path, e))?;
    let timestamp = read_replication_timestamp(io::BufReader::new(file))?;
    debug!("Embedded replication timestamp of {}: {:?}", path.display(), timestamp);
    Ok(timestamp)
}

/// Reads the header summary of a PBF file
pub fn read_header_file(path: impl AsRef<Path>) -> Result<Option<PbfHeader>> {
    let path = path.as_ref();
    let file = File::open(path).map_err(|e| Error::file_read(path, e))?;
    read_header(io::BufReader::new(file))
}

#[cfg(test)]
pub(crate) mod fixtures {
    //! Synthetic PBF files built with prost.

    use flate2::write::ZlibEncoder;
    use flate2::Compression;
    use prost::Message;
    use std::io::Write;

    #[derive(Clone, PartialEq, Message)]
    pub(crate) struct BlobHeader {
        #[prost(string, required, tag = "1")]
        pub r#type: String,
        #[prost(bytes = "vec", optional, tag = "2")]
        pub indexdata: Option<Vec<u8>>,
        #[prost(int32, required, tag = "3")]
        pub datasize: i32,
    }

    #[derive(Clone, PartialEq, Message)]
    pub(crate) struct Blob {
        #[prost(bytes = "vec", optional, tag = "1")]
        pub raw: Option<Vec<u8>>,
        #[prost(int32, optional, tag = "2")]
        pub raw_size: Option<i32>,
        #[prost(bytes = "vec", optional, tag = "3")]
        pub zlib_data: Option<Vec<u8>>,
    }

    #[derive(Clone, PartialEq, Message)]
    pub(crate) struct HeaderBBox {
        #[prost(sint64, required, tag = "1")]
        pub left: i64,
        #[prost(sint64, required, tag = "2")]
        pub right: i64,
        #[prost(sint64, required, tag = "3")]
        pub top: i64,
        #[prost(sint64, required, tag = "4")]
        pub bottom: i64,
    }

    #[derive(Clone, PartialEq, Message)]
    pub(crate) struct HeaderBlock {
        #[prost(message, optional, tag = "1")]
        pub bbox: Option<HeaderBBox>,
        #[prost(string, repeated, tag = "4")]
        pub required_features: Vec<String>,
        #[prost(string, repeated, tag = "5")]
        pub optional_features: Vec<String>,
        #[prost(string, optional, tag = "16")]
        pub writingprogram: Option<String>,
        #[prost(string, optional, tag = "17")]
        pub source: Option<String>,
        #[prost(int64, optional, tag = "32")]
        pub osmosis_replication_timestamp: Option<i64>,
        #[prost(int64, optional, tag = "33")]
        pub osmosis_replication_sequence_number: Option<i64>,
        #[prost(string, optional, tag = "34")]
        pub osmosis_replication_base_url: Option<String>,
    }

    pub(crate) fn header_block(timestamp: Option<i64>) -> HeaderBlock {
        HeaderBlock {
            bbox: Some(HeaderBBox {
                left: -48_200_000_000,
                right: -47_800_000_000,
                top: -15_500_000_000,
                bottom: -15_900_000_000,
            }),
            required_features: vec!["OsmSchema-V0.6".into(), "DenseNodes".into()],
            optional_features: vec![],
            writingprogram: Some("osmium/1.16.0".into()),
            source: None,
            osmosis_replication_timestamp: timestamp,
            osmosis_replication_sequence_number: Some(3_842),
            osmosis_replication_base_url: None,
        }
    }

    pub(crate) fn frame(blob: &Blob) -> Vec<u8> {
        let body = blob.encode_to_vec();
        let header = BlobHeader {
            r#type: "OSMHeader".into(),
            indexdata: None,
            datasize: body.len() as i32,
        }
        .encode_to_vec();

        let mut out = Vec::new();
        out.extend_from_slice(&(header.len() as u32).to_be_bytes());
        out.extend_from_slice(&header);
        out.extend_from_slice(&body);
        out
    }

    pub(crate) fn raw_pbf(block: &HeaderBlock) -> Vec<u8> {
        let payload = block.encode_to_vec();
        frame(&Blob {
            raw_size: Some(payload.len() as i32),
            raw: Some(payload),
            zlib_data: None,
        })
    }

    pub(crate) fn zlib_pbf(block: &HeaderBlock) -> Vec<u8> {
        zlib_payload_pbf(&block.encode_to_vec())
    }

    /// Frames arbitrary bytes as a zlib-compressed header blob
    pub(crate) fn zlib_payload_pbf(payload: &[u8]) -> Vec<u8> {
        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(payload).unwrap();
        frame(&Blob {
            raw: None,
            raw_size: Some(payload.len() as i32),
            zlib_data: Some(encoder.finish().unwrap()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;
    use flate2::write::ZlibEncoder;
    use flate2::Compression;
    use pretty_assertions::assert_eq;
    use prost::Message;
    use std::io::Write;

    #[test]
    fn test_raw_blob_timestamp() {
        let data = raw_pbf(&header_block(Some(1_700_000_000)));
        assert_eq!(read_replication_timestamp(&data[..]).unwrap(), Some(1_700_000_000));
    }

    #[test]
    fn test_zlib_blob_timestamp() {
        let data = zlib_pbf(&header_block(Some(1_678_406_400)));
        assert_eq!(read_replication_timestamp(&data[..]).unwrap(), Some(1_678_406_400));
    }

    #[test]
    fn test_missing_timestamp() {
        let data = zlib_pbf(&header_block(None));
        assert_eq!(read_replication_timestamp(&data[..]).unwrap(), None);
    }

    #[test]
    fn test_blob_without_payload() {
        let data = frame(&Blob {
            raw: None,
            raw_size: None,
            zlib_data: None,
        });
        assert_eq!(read_replication_timestamp(&data[..]).unwrap(), None);
    }

    #[test]
    fn test_inflation_is_bounded() {
        // A few dozen KiB of zlib that would inflate past the blob limit
        let payload = vec![0u8; MAX_BLOB_SIZE as usize + 1];
        let data = zlib_payload_pbf(&payload);
        assert!((data.len() as u64) < MAX_BLOB_SIZE);
        assert_eq!(read_header_block(&data[..]).unwrap(), None);
        assert_eq!(read_replication_timestamp(&data[..]).unwrap(), None);
    }

    #[test]
    fn test_inflation_at_limit_is_accepted() {
        let payload = vec![0u8; MAX_BLOB_SIZE as usize];
        let data = zlib_payload_pbf(&payload);
        let block = read_header_block(&data[..]).unwrap().unwrap();
        assert_eq!(block.len() as u64, MAX_BLOB_SIZE);
    }

    #[test]
    fn test_raw_size_mismatch_still_decodes() {
        let payload = header_block(Some(1_678_406_400)).encode_to_vec();
        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&payload).unwrap();
        let data = frame(&Blob {
            raw: None,
            raw_size: Some(payload.len() as i32 + 7),
            zlib_data: Some(encoder.finish().unwrap()),
        });
        assert_eq!(read_replication_timestamp(&data[..]).unwrap(), Some(1_678_406_400));
    }

    #[test]
    fn test_corrupt_zlib_is_decompression_error() {
        let data = frame(&Blob {
            raw: None,
            raw_size: Some(10),
            zlib_data: Some(vec![0x78, 0x9C, 0xFF, 0xFF, 0x00, 0x01]),
        });
        let err = read_replication_timestamp(&data[..]).unwrap_err();
        assert!(matches!(err, Error::Decompression(_)));
        assert!(err.is_recoverable());
    }

    #[test]
    fn test_short_inputs() {
        assert_eq!(read_replication_timestamp(&[0u8, 0][..]).unwrap(), None);

        // Header length points past the end of the stream
        assert_eq!(read_replication_timestamp(&[0u8, 0, 0, 0x20, 0x0A][..]).unwrap(), None);

        // Blob truncated
        let mut data = raw_pbf(&header_block(Some(1)));
        data.truncate(data.len() - 3);
        assert_eq!(read_replication_timestamp(&data[..]).unwrap(), None);
    }

    #[test]
    fn test_oversized_header_rejected() {
        let data = (MAX_BLOB_HEADER_SIZE as u32 + 1).to_be_bytes();
        assert_eq!(read_replication_timestamp(&data[..]).unwrap(), None);
    }

    #[test]
    fn test_header_summary() {
        let data = zlib_pbf(&header_block(Some(1_700_000_000)));
        let header = read_header(&data[..]).unwrap().unwrap();
        assert_eq!(
            header,
            PbfHeader {
                bbox: Some(super::HeaderBBox {
                    left: -48_200_000_000,
                    right: -47_800_000_000,
                    top: -15_500_000_000,
                    bottom: -15_900_000_000,
                }),
                required_features: vec!["OsmSchema-V0.6".into(), "DenseNodes".into()],
                optional_features: vec![],
                writing_program: Some("osmium/1.16.0".into()),
                source: None,
                replication_timestamp: Some(1_700_000_000),
                replication_sequence_number: Some(3_842),
                replication_base_url: None,
            }
        );
    }

    #[test]
    fn test_extract_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("region.osm.pbf");
        std::fs::write(&path, raw_pbf(&header_block(Some(1_700_000_000)))).unwrap();
        assert_eq!(extract_replication_timestamp(&path).unwrap(), Some(1_700_000_000));

        let missing = dir.path().join("missing.pbf");
        assert!(matches!(
            extract_replication_timestamp(&missing),
            Err(Error::FileRead { .. })
        ));
    }
}
