//! Listing files and the hand-off of merged products to a serializer.

use crate::core::coloc::RowReport;
use crate::core::merge::MergedProduct;
use crate::types::ColocResult;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::Path;

/// Receives merged products; the byte layout of `path` is up to the implementor
pub trait ProductSink: Send + Sync {
    fn write(&self, product: &MergedProduct, path: &Path) -> ColocResult<()>;

    /// Outcome of one row of a row-driven run, by default its status code alone
    fn write_status(&self, report: &RowReport, path: &Path) -> ColocResult<()> {
        write_status_file(path, report.status.code())
    }
}

/// Sink that discards products, for listing-only runs
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

impl ProductSink for NullSink {
    fn write(&self, product: &MergedProduct, path: &Path) -> ColocResult<()> {
        log::debug!(
            "Discarding product for {} ({} variables)",
            path.display(),
            product.dataset.data_vars.len()
        );
        Ok(())
    }
}

/// `first:second` line of a listing file
pub fn listing_line(first: &str, second: &str) -> String {
    format!("{}:{}", first, second)
}

/// Append `first:second` to the listing unless the pair is already listed in either order.
///
/// Parent directories are created. Returns whether a line was written.
pub fn append_listing_line(listing: &Path, first: &str, second: &str) -> ColocResult<bool> {
    if let Some(parent) = listing.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let line = listing_line(first, second);
    let reversed = listing_line(second, first);
    if listing.exists() {
        let existing = fs::read_to_string(listing)?;
        if existing.lines().any(|l| l == line || l == reversed) {
            log::debug!("{} already listed in {}", line, listing.display());
            return Ok(false);
        }
    }
    let mut file = OpenOptions::new().create(true).append(true).open(listing)?;
    writeln!(file, "{}", line)?;
    log::info!("Co-location added to listing {}", listing.display());
    Ok(true)
}

/// Overwrite `path` with a numeric status code, creating parent directories
pub fn write_status_file(path: &Path, code: u8) -> ColocResult<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    fs::write(path, code.to_string())?;
    log::debug!("Status {} written to {}", code, path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_listing_skips_duplicates_and_reversed_pairs() {
        let dir = TempDir::new().unwrap();
        let listing = dir.path().join("out").join("listing.txt");
        assert!(append_listing_line(&listing, "a.nc", "b.nc").unwrap());
        assert!(!append_listing_line(&listing, "a.nc", "b.nc").unwrap());
        assert!(!append_listing_line(&listing, "b.nc", "a.nc").unwrap());
        assert!(append_listing_line(&listing, "a.nc", "c.nc").unwrap());
        let content = fs::read_to_string(&listing).unwrap();
        assert_eq!(content, "a.nc:b.nc\na.nc:c.nc\n");
    }

    #[test]
    fn test_status_file_is_overwritten() {
        let dir = TempDir::new().unwrap();
        let status = dir.path().join("rows").join("pair.status");
        write_status_file(&status, 1).unwrap();
        write_status_file(&status, 0).unwrap();
        assert_eq!(fs::read_to_string(&status).unwrap(), "0");
    }
}
