//! Per-file renaming pipeline.
//!
//! For one PBF extract and the map file generated from it:
//!
//! 1. Parse the map header for its bounding box (and creation date)
//! 2. Resolve the data date through the [`TimestampResolver`]
//! 3. Encode the bounding box as a geocode
//! 4. Compose the output name and move the map file into place
//!
//! A map file that fails step 1 is left untouched.

use crate::error::{Error, Result};
use crate::filename::{self, OutputName};
use crate::geo::{BoundingBox, GeoEncoder, DEFAULT_ZOOM};
use crate::mapfile::{MapHeaderParser, MapLayout};
use crate::timestamp::{TimestampResolver, DEFAULT_TOOL};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Where the date in the output name comes from
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DateSource {
    /// The PBF extract, through the timestamp fallback chain
    #[default]
    Pbf,
    /// The map header's creation date, falling back to the PBF chain when
    /// the layout does not carry one
    MapHeader,
}

/// Configuration for the pipeline
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Zoom level for the geocode
    pub zoom: u32,
    /// Map header layout
    pub layout: MapLayout,
    /// Source of the output date
    pub date_source: DateSource,
    /// Directory for renamed files (default: next to the map file)
    pub output_dir: Option<PathBuf>,
    /// External PBF introspection tool (`None` disables it)
    pub external_tool: Option<PathBuf>,
    /// Compute the name without touching the filesystem
    pub dry_run: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            zoom: DEFAULT_ZOOM,
            layout: MapLayout::default(),
            date_source: DateSource::default(),
            output_dir: None,
            external_tool: Some(PathBuf::from(DEFAULT_TOOL)),
            dry_run: false,
        }
    }
}

impl PipelineConfig {
    /// Creates a new config with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the geocode zoom level
    pub fn zoom(mut self, zoom: u32) -> Self {
        self.zoom = zoom;
        self
    }

    /// Sets the map header layout
    pub fn layout(mut self, layout: MapLayout) -> Self {
        self.layout = layout;
        self
    }

    /// Sets the date source
    pub fn date_source(mut self, source: DateSource) -> Self {
        self.date_source = source;
        self
    }

    /// Sets the output directory
    pub fn output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = Some(dir.into());
        self
    }

    /// Sets or disables the external tool
    pub fn external_tool(mut self, tool: Option<PathBuf>) -> Self {
        self.external_tool = tool;
        self
    }

    /// Sets dry-run mode
    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }
}

/// How the country and product codes are obtained
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Naming {
    /// Explicit codes
    Codes {
        /// Two-character country code
        country: String,
        /// Four-character product code
        product: String,
    },
    /// First six characters of a source name
    SourceName(String),
}

/// Result of processing one map file
#[derive(Debug, Clone)]
pub struct Outcome {
    /// The map file as found
    pub source: PathBuf,
    /// Where it was (or, in dry-run mode, would be) moved
    pub target: PathBuf,
    /// The composed name
    pub name: OutputName,
    /// Bounding box from the map header
    pub bbox: BoundingBox,
    /// Which strategy produced the date
    pub date_origin: &'static str,
    /// False in dry-run mode
    pub renamed: bool,
}

/// Renames map files after their data date and coverage
#[derive(Debug)]
pub struct Pipeline {
    config: PipelineConfig,
    resolver: TimestampResolver,
    parser: MapHeaderParser,
    encoder: GeoEncoder,
}

impl Default for Pipeline {
    fn default() -> Self {
        Self::new(PipelineConfig::default())
    }
}

impl Pipeline {
    /// Creates a pipeline with the default timestamp chain
    pub fn new(config: PipelineConfig) -> Self {
        let resolver = TimestampResolver::with_tool(config.external_tool.clone());
        Self {
            parser: MapHeaderParser::new(config.layout),
            encoder: GeoEncoder::new(config.zoom),
            resolver,
            config,
        }
    }

    /// Replaces the timestamp chain
    pub fn with_resolver(mut self, resolver: TimestampResolver) -> Self {
        self.resolver = resolver;
        self
    }

    /// Active configuration
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Processes one PBF/map pair
    pub fn process(&self, pbf: &Path, map: &Path, naming: &Naming) -> Result<Outcome> {
        let header = match self.parser.parse(map) {
            Ok(header) => header,
            Err(e) => {
                if e.is_recoverable() {
                    warn!("Skipping {}: {}", map.display(), e);
                }
                return Err(e);
            }
        };

        let map_date = match self.config.date_source {
            DateSource::MapHeader => header.creation_date(),
            DateSource::Pbf => None,
        };
        let (date, date_origin) = match map_date {
            Some(date) => (date, "map-header"),
            None => {
                let resolved = self.resolver.resolve(pbf)?;
                (resolved.date, resolved.source)
            }
        };

        let geocode = self.encoder.encode(&header.bbox);
        debug!("Geocode of {} at zoom {}: {}", header.bbox, self.encoder.zoom(), geocode);

        let name = match naming {
            Naming::Codes { country, product } => {
                OutputName::new(country.as_str(), product.as_str(), date, geocode)
            }
            Naming::SourceName(source) => OutputName::from_source_name(source, date, geocode),
        };

        let dir = match &self.config.output_dir {
            Some(dir) => dir.clone(),
            None => map.parent().map(Path::to_path_buf).unwrap_or_default(),
        };
        let target = dir.join(name.to_string());

        if self.config.dry_run {
            info!("Would rename {} -> {}", map.display(), target.display());
            return Ok(Outcome {
                source: map.to_path_buf(),
                target,
                name,
                bbox: header.bbox,
                date_origin,
                renamed: false,
            });
        }

        if !dir.as_os_str().is_empty() {
            std::fs::create_dir_all(&dir).map_err(|e| Error::directory_create(&dir, e))?;
        }
        filename::place(map, &target)?;
        info!("Renamed {} -> {}", map.display(), target.display());

        Ok(Outcome {
            source: map.to_path_buf(),
            target,
            name,
            bbox: header.bbox,
            date_origin,
            renamed: true,
        })
    }
}
