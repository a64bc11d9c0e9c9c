//! Two-section plain-text count report.

use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::info;

use crate::aggregate::AggregateSnapshot;

/// Header preceding the per-tag counts.
pub const TAG_SECTION_HEADER: &str = "\nTag Counts:\nTag,Count\n";

/// Header preceding the per-combination counts.
pub const COMBINATION_SECTION_HEADER: &str =
    "\nPort/Protocol Combination Counts:\nPort,Protocol,Count\n";

/// Errors while writing the report file.
#[derive(Error, Debug)]
pub enum ReportError {
    #[error("writing report {}: {source}", .path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("moving report into place at {}: {source}", .path.display())]
    Persist {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Render the report body. Entries follow the snapshot's sorted order.
pub fn render<W: Write>(snapshot: &AggregateSnapshot, mut out: W) -> io::Result<()> {
    out.write_all(TAG_SECTION_HEADER.as_bytes())?;
    for (tag, count) in &snapshot.tag_counts {
        writeln!(out, "{tag} {count}")?;
    }

    out.write_all(COMBINATION_SECTION_HEADER.as_bytes())?;
    for (combination, count) in &snapshot.combination_counts {
        writeln!(out, "{} {} {count}", combination.port, combination.protocol)?;
    }

    out.flush()
}

/// Render the report to a string.
pub fn render_to_string(snapshot: &AggregateSnapshot) -> String {
    let mut buf = Vec::new();
    // Writing into a Vec cannot fail.
    let _ = render(snapshot, &mut buf);
    String::from_utf8_lossy(&buf).into_owned()
}

/// Write the report to `path`.
///
/// The report is written to a sibling temporary file first and renamed into
/// place, so an interrupted write never leaves a truncated report behind.
pub fn write_report(snapshot: &AggregateSnapshot, path: &Path) -> Result<(), ReportError> {
    let tmp_path = temp_path(path);
    let write_err = |source| ReportError::Write {
        path: path.to_path_buf(),
        source,
    };

    let file = File::create(&tmp_path).map_err(write_err)?;
    let mut out = BufWriter::new(file);
    if let Err(e) = render(snapshot, &mut out).and_then(|()| out.get_ref().sync_all()) {
        let _ = fs::remove_file(&tmp_path);
        return Err(write_err(e));
    }
    drop(out);

    if let Err(source) = fs::rename(&tmp_path, path) {
        let _ = fs::remove_file(&tmp_path);
        return Err(ReportError::Persist {
            path: path.to_path_buf(),
            source,
        });
    }

    info!(
        path = %path.display(),
        tags = snapshot.tag_counts.len(),
        combinations = snapshot.combination_counts.len(),
        "wrote report",
    );

    Ok(())
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| "report".into());
    name.push(".tmp");
    path.with_file_name(name)
}
