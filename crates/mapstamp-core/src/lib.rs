//! # mapstamp-core
//!
//! A library for naming Mapsforge map files after the OpenStreetMap data
//! they were built from.
//!
//! This crate provides the core functionality for:
//! - Reading the replication timestamp from an OSM PBF header blob
//! - Reading the bounding box from a Mapsforge binary map header
//! - Encoding a bounding box as a 12-character Web-Mercator tile geocode
//! - Composing `CCRRRRYYMMDDXXXYYYWWWHHH.map` names and moving files into place
//!
//! ## Architecture
//!
//! - [`proto`]: Varints, byte cursor and protobuf field scanning
//! - [`pbf`]: OSM PBF header blob decoding
//! - [`timestamp`]: Data-date fallback chain
//! - [`mapfile`]: Mapsforge header parsing
//! - [`geo`]: Tile math and geocodes
//! - [`filename`]: Name composition and placement
//! - [`pipeline`]: The per-file flow tying them together
//! - [`error`]: Error types and handling
//!
//! ## Example
//!
//! ```no_run
//! use mapstamp_core::{Naming, Pipeline, PipelineConfig};
//! use std::path::Path;
//!
//! let pipeline = Pipeline::new(PipelineConfig::new().zoom(13));
//! let outcome = pipeline.process(
//!     Path::new("brazil-latest.osm.pbf"),
//!     Path::new("output.map"),
//!     &Naming::Codes { country: "BR".into(), product: "0100".into() },
//! )?;
//! println!("{}", outcome.target.display());
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! ## Extensibility
//!
//! [`TimestampStrategy`] lets callers add or reorder date sources.

#![deny(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unreachable_pub)]

pub mod error;
pub mod filename;
pub mod geo;
pub mod mapfile;
pub mod pbf;
pub mod pipeline;
pub mod proto;
pub mod timestamp;

// Re-export primary types for convenience
pub use error::{Error, Result};
pub use filename::{compose, OutputName};
pub use geo::{BoundingBox, GeoCode, GeoEncoder, DEFAULT_ZOOM};
pub use mapfile::{MapFileInfo, MapHeader, MapHeaderParser, MapLayout};
pub use pbf::{extract_replication_timestamp, PbfHeader};
pub use pipeline::{DateSource, Naming, Outcome, Pipeline, PipelineConfig};
pub use proto::{ProtoField, ProtoScanner};
pub use timestamp::{DateStamp, TimestampResolver, TimestampStrategy};

/// Crate version for programmatic access
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
