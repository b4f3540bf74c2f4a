//! mapstamp - Name Mapsforge map files after their data date and coverage
//!
//! Reads the data date of an OSM PBF extract and the bounding box of the map
//! file generated from it, and renames the map file to
//! `CCRRRRYYMMDDXXXYYYWWWHHH.map`.

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use mapstamp_core::{
    geo, pbf, BoundingBox, DateSource, MapFileInfo, MapLayout, Naming, Pipeline, PipelineConfig,
};
use std::collections::BTreeSet;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, trace, warn, Level};
use tracing_subscriber::EnvFilter;
use walkdir::WalkDir;

/// Name Mapsforge map files after their data date and tile coverage
#[derive(Parser, Debug)]
#[command(name = "mapstamp")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Rename a generated map file after its PBF source
    Rename(RenameArgs),
    /// Print the headers of map and PBF files
    Inspect(InspectArgs),
    /// Print the geocode of a bounding box
    Geocode(GeocodeArgs),
}

#[derive(Args, Debug)]
struct RenameArgs {
    /// OSM PBF extract the map was generated from
    #[arg(long)]
    pbf: PathBuf,

    /// Generated Mapsforge map file
    #[arg(long)]
    map: PathBuf,

    #[command(flatten)]
    naming: NamingArgs,

    /// Directory for the renamed file (default: next to the map file)
    #[arg(short, long)]
    output_dir: Option<PathBuf>,

    /// Zoom level of the geocode tile grid
    #[arg(long, default_value_t = geo::DEFAULT_ZOOM, env = "MAPSTAMP_ZOOM")]
    zoom: u32,

    /// Layout of the map header preamble
    #[arg(long, value_enum, default_value = "explicit-date", env = "MAPSTAMP_LAYOUT")]
    layout: LayoutArg,

    /// Where the date in the name comes from
    #[arg(long, value_enum, default_value = "pbf")]
    date_source: DateSourceArg,

    /// External PBF introspection tool
    #[arg(long, default_value = "osmium", env = "MAPSTAMP_OSMIUM")]
    osmium: PathBuf,

    /// Never invoke the external tool
    #[arg(long)]
    no_external_tool: bool,

    /// Show the new name without renaming
    #[arg(long)]
    dry_run: bool,
}

#[derive(Args, Debug)]
#[group(required = true, multiple = true)]
struct NamingArgs {
    /// Two-character country code
    #[arg(long, requires = "product")]
    country: Option<String>,

    /// Four-character product code
    #[arg(long, requires = "country")]
    product: Option<String>,

    /// Source name whose first six characters give country and product
    #[arg(long, conflicts_with_all = ["country", "product"])]
    source_name: Option<String>,
}

#[derive(Args, Debug)]
struct InspectArgs {
    #[command(flatten)]
    input: InputMode,

    /// Write `<name>_tags.txt` per map file (and a consolidated list for a
    /// directory) into this directory
    #[arg(short, long)]
    output_dir: Option<PathBuf>,
}

#[derive(Args, Debug)]
#[group(required = true, multiple = false)]
struct InputMode {
    /// Path to a single .map or .pbf file
    #[arg(short, long)]
    file: Option<PathBuf>,

    /// Path to a directory to walk
    #[arg(short, long)]
    directory: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct GeocodeArgs {
    /// Southern edge in degrees
    #[arg(long, allow_hyphen_values = true)]
    min_lat: f64,

    /// Western edge in degrees
    #[arg(long, allow_hyphen_values = true)]
    min_lon: f64,

    /// Northern edge in degrees
    #[arg(long, allow_hyphen_values = true)]
    max_lat: f64,

    /// Eastern edge in degrees
    #[arg(long, allow_hyphen_values = true)]
    max_lon: f64,

    /// Zoom level of the tile grid
    #[arg(long, default_value_t = geo::DEFAULT_ZOOM, env = "MAPSTAMP_ZOOM")]
    zoom: u32,
}

/// Map header preamble layout
#[derive(Debug, Clone, Copy, ValueEnum)]
enum LayoutArg {
    /// Skip 24 bytes to the bounding box
    SkipPreamble,
    /// Skip 16 bytes, read the creation date, then the bounding box
    ExplicitDate,
}

impl From<LayoutArg> for MapLayout {
    fn from(arg: LayoutArg) -> Self {
        match arg {
            LayoutArg::SkipPreamble => MapLayout::SkipPreamble,
            LayoutArg::ExplicitDate => MapLayout::ExplicitDate,
        }
    }
}

/// Source of the date in the output name
#[derive(Debug, Clone, Copy, ValueEnum)]
enum DateSourceArg {
    /// The PBF extract (external tool, embedded header, file time)
    Pbf,
    /// The map header creation date
    Map,
}

impl From<DateSourceArg> for DateSource {
    fn from(arg: DateSourceArg) -> Self {
        match arg {
            DateSourceArg::Pbf => DateSource::Pbf,
            DateSourceArg::Map => DateSource::MapHeader,
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    let level = match cli.verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(level.into()))
        .with_target(false)
        .init();

    match &cli.command {
        Command::Rename(args) => rename(args),
        Command::Inspect(args) => inspect(args),
        Command::Geocode(args) => {
            let code = geo::encode(args.min_lon, args.max_lon, args.min_lat, args.max_lat, args.zoom);
            println!("{}", code);
            Ok(())
        }
    }
}

fn resolve_naming(args: &NamingArgs) -> Result<Naming> {
    match (&args.country, &args.product, &args.source_name) {
        (Some(country), Some(product), None) => Ok(Naming::Codes {
            country: country.clone(),
            product: product.clone(),
        }),
        (None, None, Some(source)) => Ok(Naming::SourceName(source.clone())),
        _ => bail!("Either --country and --product or --source-name must be specified"),
    }
}

/// Rename one map file
fn rename(args: &RenameArgs) -> Result<()> {
    if !args.pbf.is_file() {
        bail!("PBF file does not exist: {}", args.pbf.display());
    }
    if !args.map.is_file() {
        bail!("Map file does not exist: {}", args.map.display());
    }

    let naming = resolve_naming(&args.naming)?;
    let tool = (!args.no_external_tool).then(|| args.osmium.clone());

    let mut config = PipelineConfig::new()
        .zoom(args.zoom)
        .layout(args.layout.into())
        .date_source(args.date_source.into())
        .external_tool(tool)
        .dry_run(args.dry_run);
    if let Some(dir) = &args.output_dir {
        config = config.output_dir(dir);
    }

    let pipeline = Pipeline::new(config);
    let outcome = pipeline.process(&args.pbf, &args.map, &naming).map_err(|e| {
        if e.is_recoverable() {
            warn!("Leaving {} in place for inspection", args.map.display());
        }
        e
    });
    let outcome = outcome.with_context(|| {
        let name = args
            .map
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| args.map.display().to_string());
        format!("Skipped {}", name)
    })?;

    debug!("Date from {}, bbox {}", outcome.date_origin, outcome.bbox);
    if outcome.renamed {
        println!("Renamed {} -> {}", outcome.source.display(), outcome.target.display());
    } else {
        println!("Would rename {} -> {}", outcome.source.display(), outcome.target.display());
    }
    Ok(())
}

/// Kind of file `inspect` understands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FileKind {
    Map,
    Pbf,
}

fn file_kind(path: &Path) -> Option<FileKind> {
    let ext = path.extension()?.to_str()?.to_lowercase();
    match ext.as_str() {
        "map" => Some(FileKind::Map),
        "pbf" => Some(FileKind::Pbf),
        _ => None,
    }
}

/// Name of the consolidated tag list written for a directory
const CONSOLIDATED_TAGS_FILE: &str = "all_tags_consolidated.txt";

/// Sorted, de-duplicated tags across several map files
#[derive(Debug, Default)]
struct TagCatalog {
    maps: usize,
    poi_tags: BTreeSet<String>,
    way_tags: BTreeSet<String>,
}

impl TagCatalog {
    fn add(&mut self, info: &MapFileInfo) {
        self.maps += 1;
        self.poi_tags.extend(info.poi_tags.iter().cloned());
        self.way_tags.extend(info.way_tags.iter().cloned());
    }

    fn write_to<W: Write>(&self, out: &mut W, source: &Path) -> std::io::Result<()> {
        writeln!(out, "Consolidated tags from {} map files", self.maps)?;
        writeln!(out, "Generated from: {}", source.display())?;
        writeln!(out)?;
        writeln!(out, "=== All Unique POI Tags ({}) ===", self.poi_tags.len())?;
        write_numbered(out, &self.poi_tags)?;
        writeln!(out)?;
        writeln!(out, "=== All Unique Way Tags ({}) ===", self.way_tags.len())?;
        write_numbered(out, &self.way_tags)
    }
}

fn write_numbered<'a, W, I>(out: &mut W, tags: I) -> std::io::Result<()>
where
    W: Write,
    I: IntoIterator<Item = &'a String>,
{
    for (i, tag) in tags.into_iter().enumerate() {
        writeln!(out, "{}: {}", i, tag)?;
    }
    Ok(())
}

fn write_tag_export<W: Write>(out: &mut W, info: &MapFileInfo) -> std::io::Result<()> {
    writeln!(out, "=== POI Tags ===")?;
    write_numbered(out, &info.poi_tags)?;
    writeln!(out)?;
    writeln!(out, "=== Way Tags ===")?;
    write_numbered(out, &info.way_tags)
}

/// Writes a text file through `write`, creating or truncating it
fn write_text_file<F>(path: &Path, write: F) -> Result<()>
where
    F: FnOnce(&mut BufWriter<File>) -> std::io::Result<()>,
{
    let file =
        File::create(path).with_context(|| format!("Failed to create {}", path.display()))?;
    let mut out = BufWriter::new(file);
    write(&mut out)
        .and_then(|()| out.flush())
        .with_context(|| format!("Failed to write {}", path.display()))
}

/// Export path of the tag list for `map`
fn tag_export_path(output_dir: &Path, map: &Path) -> PathBuf {
    let stem = map
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    output_dir.join(format!("{}_tags.txt", stem))
}

/// Inspect a file or every recognised file below a directory
fn inspect(args: &InspectArgs) -> Result<()> {
    let input = &args.input;
    let output_dir = args.output_dir.as_deref();
    if let Some(dir) = output_dir {
        fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create output directory: {}", dir.display()))?;
    }

    if let Some(file) = &input.file {
        if !file.is_file() {
            bail!("Input path is not a file: {}", file.display());
        }
        let Some(kind) = file_kind(file) else {
            bail!("Unrecognised file type (expected .map or .pbf): {}", file.display());
        };
        return inspect_file(file, kind, output_dir).map(|_| ());
    }

    let Some(directory) = &input.directory else {
        bail!("Either --file or --directory must be specified");
    };
    if !directory.is_dir() {
        bail!("Path is not a directory: {}", directory.display());
    }

    info!("Scanning directory: {}", directory.display());
    let mut inspected = 0usize;
    let mut failed = Vec::new();
    let mut catalog = TagCatalog::default();

    for entry in WalkDir::new(directory)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|e| e.ok())
    {
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let Some(kind) = file_kind(path) else {
            trace!("Skipping {}", path.display());
            continue;
        };

        match inspect_file(path, kind, output_dir) {
            Ok(map_info) => {
                inspected += 1;
                if let Some(map_info) = map_info {
                    catalog.add(&map_info);
                }
            }
            Err(e) => {
                warn!("Error inspecting {}: {:#}", path.display(), e);
                failed.push(path.display().to_string());
            }
        }
    }

    info!("Inspected {} file(s), {} failed", inspected, failed.len());

    if let Some(dir) = output_dir {
        let path = dir.join(CONSOLIDATED_TAGS_FILE);
        write_text_file(&path, |out| catalog.write_to(out, directory))?;
        info!(
            "Consolidated {} POI and {} way tag(s) into {}",
            catalog.poi_tags.len(),
            catalog.way_tags.len(),
            path.display()
        );
    }

    if !failed.is_empty() {
        bail!("{} file(s) failed: {}", failed.len(), failed.join(", "));
    }
    Ok(())
}

/// Prints one file, exporting the tag tables of a map file when asked.
///
/// Returns the map header for `.map` files.
fn inspect_file(
    path: &Path,
    kind: FileKind,
    output_dir: Option<&Path>,
) -> Result<Option<MapFileInfo>> {
    match kind {
        FileKind::Map => {
            let info = MapFileInfo::read(path)
                .with_context(|| format!("Failed to read map header: {}", path.display()))?;
            print_map_info(path, &info);
            if let Some(dir) = output_dir {
                let export = tag_export_path(dir, path);
                write_text_file(&export, |out| write_tag_export(out, &info))?;
                debug!("Tags of {} written to {}", path.display(), export.display());
            }
            Ok(Some(info))
        }
        FileKind::Pbf => {
            let header = pbf::read_header_file(path)
                .with_context(|| format!("Failed to read PBF header: {}", path.display()))?;
            print_pbf_header(path, header.as_ref());
            Ok(None)
        }
    }
}

fn print_map_info(path: &Path, info: &MapFileInfo) {
    println!("== {}", path.display());
    println!("  version:      {}", info.file_version);
    println!("  file size:    {}", info.file_size);
    match info.creation_date() {
        Some(date) => println!("  created:      {} ({} ms)", date, info.created_ms),
        None => println!("  created:      {} ms", info.created_ms),
    }
    println!("  bbox:         {}", info.bbox);
    println!("  geocode:      {}", geo::GeoEncoder::default().encode(&info.bbox));
    println!("  tile size:    {}", info.tile_size);
    println!("  projection:   {}", info.projection);
    println!("  debug info:   {}", info.debug_info);
    if let Some(pos) = info.start_position {
        let start = BoundingBox::new(pos.lat, pos.lon, pos.lat, pos.lon);
        println!("  start:        ({}, {})", start.min_lat_deg(), start.min_lon_deg());
    }
    if let Some(zoom) = info.start_zoom {
        println!("  start zoom:   {}", zoom);
    }
    if let Some(language) = &info.language_preference {
        println!("  language:     {}", language);
    }
    if let Some(comment) = &info.comment {
        println!("  comment:      {}", comment);
    }
    if let Some(created_by) = &info.created_by {
        println!("  created by:   {}", created_by);
    }
    println!("  poi tags:     {}", info.poi_tags.len());
    for (i, tag) in info.poi_tags.iter().enumerate() {
        println!("    {}: {}", i, tag);
    }
    println!("  way tags:     {}", info.way_tags.len());
    for (i, tag) in info.way_tags.iter().enumerate() {
        println!("    {}: {}", i, tag);
    }
    println!("  zoom intervals: {}", info.zoom_intervals.len());
    for (i, zi) in info.zoom_intervals.iter().enumerate() {
        println!(
            "    {}: base {} zoom {}-{} at {} ({} bytes)",
            i, zi.base_zoom, zi.min_zoom, zi.max_zoom, zi.subfile_start, zi.subfile_size
        );
    }
}

fn print_pbf_header(path: &Path, header: Option<&pbf::PbfHeader>) {
    println!("== {}", path.display());
    let Some(header) = header else {
        println!("  no readable header blob");
        return;
    };
    if let Some(bbox) = header.bbox {
        println!(
            "  bbox:         left {} right {} top {} bottom {} (nanodegrees)",
            bbox.left, bbox.right, bbox.top, bbox.bottom
        );
    }
    println!("  required:     {}", header.required_features.join(", "));
    if !header.optional_features.is_empty() {
        println!("  optional:     {}", header.optional_features.join(", "));
    }
    if let Some(program) = &header.writing_program {
        println!("  written by:   {}", program);
    }
    if let Some(source) = &header.source {
        println!("  source:       {}", source);
    }
    match header
        .replication_timestamp
        .and_then(|secs| i64::try_from(secs).ok())
        .and_then(mapstamp_core::DateStamp::from_unix_seconds)
    {
        Some(date) => println!("  replication:  {}", date),
        None => println!("  replication:  (none)"),
    }
    if let Some(seq) = header.replication_sequence_number {
        println!("  sequence:     {}", seq);
    }
    if let Some(url) = &header.replication_base_url {
        println!("  base url:     {}", url);
    }
}
