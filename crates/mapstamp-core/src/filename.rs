//! Output filename composition and placement.
//!
//! Names follow `CCRRRRYYMMDDXXXYYYWWWHHH.map`: a 2-character country code,
//! a 4-character product code, the `YYMMDD` data date and the 12-character
//! geocode.

use crate::error::{Error, Result};
use crate::geo::GeoCode;
use crate::timestamp::DateStamp;
use std::fmt;
use std::fs;
use std::io;
use std::path::Path;
use tracing::debug;

/// Extension appended to every output name
pub const MAP_EXTENSION: &str = "map";

/// Joins the name parts and appends `.map`.
///
/// Field widths are not validated.
pub fn compose(country_code: &str, product_code: &str, date: &str, geocode: &str) -> String {
    format!(
        "{}{}{}{}.{}",
        country_code, product_code, date, geocode, MAP_EXTENSION
    )
}

/// The parts of an output filename
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputName {
    /// Two-character country code
    pub country_code: String,
    /// Four-character product code
    pub product_code: String,
    /// Data date
    pub date: DateStamp,
    /// Tile geocode
    pub geocode: GeoCode,
}

impl OutputName {
    /// Creates a name from explicit codes
    pub fn new(
        country_code: impl Into<String>,
        product_code: impl Into<String>,
        date: DateStamp,
        geocode: GeoCode,
    ) -> Self {
        Self {
            country_code: country_code.into(),
            product_code: product_code.into(),
            date,
            geocode,
        }
    }

    /// Takes the country code from the first two characters of `source`
    /// and the product code from the next four.
    ///
    /// A shorter source yields shorter codes rather than an error.
    pub fn from_source_name(source: &str, date: DateStamp, geocode: GeoCode) -> Self {
        let country_code: String = source.chars().take(2).collect();
        let product_code: String = source.chars().skip(2).take(4).collect();
        Self::new(country_code, product_code, date, geocode)
    }
}

impl fmt::Display for OutputName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&compose(
            &self.country_code,
            &self.product_code,
            &self.date.to_string(),
            self.geocode.as_str(),
        ))
    }
}

/// Whether `a` and `b` name the same existing file, whatever their spelling
fn same_file(a: &Path, b: &Path) -> bool {
    if a == b {
        return true;
    }
    match (fs::canonicalize(a), fs::canonicalize(b)) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

/// Moves `source` to `target`, deleting whatever already sits at `target`.
///
/// Delete-then-rename, so not atomic; the last writer wins. A `target` that
/// resolves to `source` itself is left untouched.
pub fn place(source: &Path, target: &Path) -> Result<()> {
    if same_file(source, target) {
        debug!("{} already in place", source.display());
        return Ok(());
    }
    match fs::remove_file(target) {
        Ok(()) => debug!("Removed existing {}", target.display()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => return Err(Error::file_remove(target, e)),
    }
    fs::rename(source, target).map_err(|e| Error::file_rename(source, target, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geo;
    use pretty_assertions::assert_eq;

    fn sample_date() -> DateStamp {
        DateStamp::parse_iso8601("2023-03-10").unwrap()
    }

    #[test]
    fn test_compose_documented_example() {
        assert_eq!(
            compose("BR", "0100", "230310", "2B83FO00N00E"),
            "BR01002303102B83FO00N00E.map"
        );
    }

    #[test]
    fn test_output_name_display() {
        let geocode = geo::encode(0.001, 0.002, 0.001, 0.002, 13);
        let name = OutputName::new("BR", "0100", sample_date(), geocode);
        assert_eq!(name.to_string(), "BR010023031035S35R000000.map");
    }

    #[test]
    fn test_from_source_name() {
        let geocode = geo::encode(0.001, 0.002, 0.001, 0.002, 13);
        let name = OutputName::from_source_name("BR0100-brazil", sample_date(), geocode.clone());
        assert_eq!(name.country_code, "BR");
        assert_eq!(name.product_code, "0100");

        let short = OutputName::from_source_name("BR0", sample_date(), geocode);
        assert_eq!(short.to_string(), "BR023031035S35R000000.map");
    }

    #[test]
    fn test_place_replaces_existing() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("output.map");
        let target = dir.path().join("BR01002303102B83FO00N00E.map");
        fs::write(&source, b"new").unwrap();
        fs::write(&target, b"old").unwrap();

        place(&source, &target).unwrap();

        assert!(!source.exists());
        assert_eq!(fs::read(&target).unwrap(), b"new");
    }

    #[test]
    fn test_place_without_existing_target() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("output.map");
        let target = dir.path().join("renamed.map");
        fs::write(&source, b"data").unwrap();

        place(&source, &target).unwrap();
        assert_eq!(fs::read(&target).unwrap(), b"data");
    }

    #[test]
    fn test_place_missing_source() {
        let dir = tempfile::tempdir().unwrap();
        let err = place(&dir.path().join("nope.map"), &dir.path().join("x.map")).unwrap_err();
        assert!(matches!(err, Error::FileRename { .. }));
        assert!(!err.is_recoverable());
    }

    #[test]
    fn test_place_onto_itself() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("BR01002303102B83FO00N00E.map");
        fs::write(&source, b"data").unwrap();

        place(&source, &source).unwrap();
        assert_eq!(fs::read(&source).unwrap(), b"data");
    }

    #[test]
    fn test_place_onto_itself_through_parent_dir() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("BR01002303102B83FO00N00E.map");
        fs::create_dir(dir.path().join("sub")).unwrap();
        fs::write(&source, b"data").unwrap();

        let alias = dir.path().join("sub").join("..").join("BR01002303102B83FO00N00E.map");
        place(&source, &alias).unwrap();
        assert_eq!(fs::read(&source).unwrap(), b"data");
    }

    #[cfg(unix)]
    #[test]
    fn test_place_onto_itself_through_symlinked_dir() {
        let dir = tempfile::tempdir().unwrap();
        let real = dir.path().join("real");
        let link = dir.path().join("link");
        fs::create_dir(&real).unwrap();
        std::os::unix::fs::symlink(&real, &link).unwrap();
        let source = real.join("out.map");
        fs::write(&source, b"data").unwrap();

        place(&source, &link.join("out.map")).unwrap();
        assert_eq!(fs::read(&source).unwrap(), b"data");
    }
}
