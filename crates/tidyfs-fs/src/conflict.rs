//! Destination-conflict resolution
//!
//! When a move/copy/rename target already exists, the action's
//! `on_conflict` mode decides what happens. Suffix insertion respects the
//! *compound* extension: `report_2.tar.gz`, not `report.tar_2.gz`.

use std::io::{Error, ErrorKind};
use std::path::{Path, PathBuf};

use tidyfs_core::rule::ConflictMode;

use crate::{sibling, Vfs};

/// Splits a filename into `(base, compound extension)`.
///
/// The compound extension starts at the first dot that is not the leading
/// dot of a hidden file: `archive.tar.gz` -> `("archive", ".tar.gz")`,
/// `.hidden` -> `(".hidden", "")`, `.hidden.txt` -> `(".hidden", ".txt")`.
pub fn split_compound_extension(name: &str) -> (&str, &str) {
    let skip = if name.starts_with('.') { 1 } else { 0 };
    match name[skip..].find('.') {
        Some(idx) => name.split_at(skip + idx),
        None => (name, ""),
    }
}

/// Resolves an existing destination according to `mode`.
///
/// Returns `(destination, proceed)`:
/// - `rename_with_suffix`: the smallest free `_i` (i >= 2) suffix inserted
///   before the compound extension, and `proceed = true`.
/// - `skip`: the original destination and `proceed = false`; the caller
///   reports `conflict_already_exists`.
/// - `overwrite`: removes the destination, `proceed = true`.
/// - `trash`: reserved; the current backends signal not implemented.
pub fn resolve_conflict(
    fs: &dyn Vfs,
    mode: ConflictMode,
    dst: &Path,
) -> std::io::Result<(PathBuf, bool)> {
    match mode {
        ConflictMode::Skip => Ok((dst.to_path_buf(), false)),
        ConflictMode::Overwrite => {
            let meta = fs.stat(dst)?;
            if meta.is_dir {
                fs.remove_all(dst)?;
            } else {
                fs.remove(dst)?;
            }
            Ok((dst.to_path_buf(), true))
        }
        ConflictMode::RenameWithSuffix => {
            let name = dst
                .file_name()
                .ok_or_else(|| Error::new(ErrorKind::InvalidInput, "destination has no filename"))?
                .to_string_lossy()
                .into_owned();
            let (base, ext) = split_compound_extension(&name);
            for i in 2u64.. {
                let candidate = sibling(dst, &format!("{base}_{i}{ext}"));
                if !fs.exists(&candidate) {
                    return Ok((candidate, true));
                }
            }
            unreachable!("suffix search is unbounded")
        }
        ConflictMode::Trash => Err(Error::new(
            ErrorKind::Unsupported,
            "trash conflict mode is not implemented by this backend",
        )),
    }
}
