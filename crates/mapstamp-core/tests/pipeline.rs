//! End-to-end renaming against temporary files.

use flate2::write::ZlibEncoder;
use flate2::Compression;
use mapstamp_core::{
    BoundingBox, DateStamp, Error, Naming, Pipeline, PipelineConfig, Result, TimestampResolver,
    TimestampStrategy,
};
use pretty_assertions::assert_eq;
use prost::Message;
use std::fs;
use std::io::Write;
use std::path::Path;

const MAGIC: &[u8] = b"mapsforge binary OSM";

#[derive(Clone, PartialEq, Message)]
struct BlobHeader {
    #[prost(string, required, tag = "1")]
    r#type: String,
    #[prost(int32, required, tag = "3")]
    datasize: i32,
}

#[derive(Clone, PartialEq, Message)]
struct Blob {
    #[prost(int32, optional, tag = "2")]
    raw_size: Option<i32>,
    #[prost(bytes = "vec", optional, tag = "3")]
    zlib_data: Option<Vec<u8>>,
}

#[derive(Clone, PartialEq, Message)]
struct HeaderBlock {
    #[prost(string, repeated, tag = "4")]
    required_features: Vec<String>,
    #[prost(int64, optional, tag = "32")]
    osmosis_replication_timestamp: Option<i64>,
}

fn pbf_bytes(timestamp: i64) -> Vec<u8> {
    let block = HeaderBlock {
        required_features: vec!["OsmSchema-V0.6".into()],
        osmosis_replication_timestamp: Some(timestamp),
    }
    .encode_to_vec();

    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(&block).unwrap();
    let blob = Blob {
        raw_size: Some(block.len() as i32),
        zlib_data: Some(encoder.finish().unwrap()),
    }
    .encode_to_vec();

    let header = BlobHeader {
        r#type: "OSMHeader".into(),
        datasize: blob.len() as i32,
    }
    .encode_to_vec();

    let mut out = (header.len() as u32).to_be_bytes().to_vec();
    out.extend_from_slice(&header);
    out.extend_from_slice(&blob);
    out
}

fn map_bytes(bbox: BoundingBox) -> Vec<u8> {
    let mut out = MAGIC.to_vec();
    out.extend_from_slice(&0u32.to_be_bytes()); // header size
    out.extend_from_slice(&5u32.to_be_bytes()); // file version
    out.extend_from_slice(&0u64.to_be_bytes()); // file size
    out.extend_from_slice(&0i64.to_be_bytes()); // creation date
    for v in [bbox.min_lat, bbox.min_lon, bbox.max_lat, bbox.max_lon] {
        out.extend_from_slice(&v.to_be_bytes());
    }
    out
}

fn brasilia() -> BoundingBox {
    BoundingBox::from_degrees(-15.9, -48.2, -15.5, -47.8)
}

fn is_output_name(name: &str) -> bool {
    let Some(stem) = name.strip_suffix(".map") else {
        return false;
    };
    let bytes = stem.as_bytes();
    bytes.len() == 24
        && bytes[..2].iter().all(u8::is_ascii_uppercase)
        && bytes[2..12].iter().all(u8::is_ascii_digit)
        && bytes[12..]
            .iter()
            .all(|b| b.is_ascii_digit() || b.is_ascii_uppercase())
}

struct FixedDate(&'static str);

impl TimestampStrategy for FixedDate {
    fn name(&self) -> &'static str {
        "fixed"
    }

    fn resolve(&self, _path: &Path) -> Result<Option<DateStamp>> {
        Ok(DateStamp::parse_iso8601(self.0))
    }
}

#[test]
fn renames_with_resolved_date_and_geocode() {
    let dir = tempfile::tempdir().unwrap();
    let pbf = dir.path().join("brazil-latest.osm.pbf");
    let map = dir.path().join("output.map");
    fs::write(&pbf, b"unused").unwrap();
    fs::write(&map, map_bytes(brasilia())).unwrap();

    let pipeline = Pipeline::new(PipelineConfig::new().zoom(13))
        .with_resolver(TimestampResolver::empty().push(FixedDate("2023-03-10")));
    let outcome = pipeline
        .process(
            &pbf,
            &map,
            &Naming::Codes {
                country: "BR".into(),
                product: "0100".into(),
            },
        )
        .unwrap();

    let name = outcome.name.to_string();
    assert!(is_output_name(&name), "unexpected name {}", name);
    assert_eq!(name, "BR01002303102BB3FP009009.map");
    assert_eq!(outcome.date_origin, "fixed");
    assert_eq!(fs::read(&outcome.target).unwrap(), map_bytes(brasilia()));
    assert!(!map.exists());
}

#[test]
fn embedded_timestamp_without_external_tool() {
    let dir = tempfile::tempdir().unwrap();
    let pbf = dir.path().join("brazil-latest.osm.pbf");
    let map = dir.path().join("output.map");
    fs::write(&pbf, pbf_bytes(1_678_406_400)).unwrap();
    fs::write(&map, map_bytes(brasilia())).unwrap();

    let config = PipelineConfig::new()
        .external_tool(Some(dir.path().join("missing-osmium")))
        .output_dir(dir.path().join("renamed"));
    let outcome = Pipeline::new(config)
        .process(&pbf, &map, &Naming::SourceName("BR0100".into()))
        .unwrap();

    assert_eq!(outcome.date_origin, "embedded-decoder");
    assert_eq!(
        outcome.target,
        dir.path().join("renamed").join("BR01002303102BB3FP009009.map")
    );
    assert!(outcome.target.exists());
}

#[test]
fn existing_target_is_replaced() {
    let dir = tempfile::tempdir().unwrap();
    let pbf = dir.path().join("brazil-latest.osm.pbf");
    let map = dir.path().join("output.map");
    let stale = dir.path().join("BR01002303102BB3FP009009.map");
    fs::write(&pbf, pbf_bytes(1_678_406_400)).unwrap();
    fs::write(&map, map_bytes(brasilia())).unwrap();
    fs::write(&stale, b"stale").unwrap();

    let outcome = Pipeline::new(PipelineConfig::new().external_tool(None))
        .process(&pbf, &map, &Naming::SourceName("BR0100".into()))
        .unwrap();

    assert_eq!(outcome.target, stale);
    assert_eq!(fs::read(&stale).unwrap(), map_bytes(brasilia()));
}

#[test]
fn truncated_map_is_skipped_and_kept() {
    let dir = tempfile::tempdir().unwrap();
    let pbf = dir.path().join("brazil-latest.osm.pbf");
    let map = dir.path().join("output.map");
    fs::write(&pbf, pbf_bytes(1_678_406_400)).unwrap();
    let mut bytes = map_bytes(brasilia());
    bytes.truncate(bytes.len() - 5);
    fs::write(&map, &bytes).unwrap();

    let err = Pipeline::new(PipelineConfig::new().external_tool(None))
        .process(&pbf, &map, &Naming::SourceName("BR0100".into()))
        .unwrap_err();

    assert!(matches!(err, Error::Truncated { .. }));
    assert!(err.is_recoverable());
    assert_eq!(fs::read(&map).unwrap(), bytes);
}
