//! Filter expression evaluation
//!
//! One [`FilterExpression`] node evaluates as
//! `(AND of leaves) AND (OR of any-children) AND NOT (AND of not-children)`;
//! the top-level group sequence is AND-joined and an empty group passes
//! everything.
//!
//! Short-circuiting is allowed **only under the null reporter**: any other
//! reporter gets a complete trace, so every subexpression runs even after
//! the verdict is decided. The two modes must agree on the Boolean result.

use std::io::Read;
use std::path::Path;
use std::time::SystemTime;

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use glob::Pattern;
use tidyfs_core::rule::{
    DateAxis, FileKind, FilterExpression, FilterGroups, FilterLeaf, NameMatcher,
};
use tidyfs_fs::Vfs;

use crate::report::Reporter;

/// Bytes sniffed for MIME detection.
const MIME_SNIFF_LEN: usize = 8192;

/// Evaluates a top-level filter group sequence against `path`.
pub fn evaluate_groups(
    groups: &FilterGroups,
    path: &Path,
    fs: &dyn Vfs,
    reporter: &mut dyn Reporter,
) -> Result<bool> {
    let mut result = true;
    for expr in &groups.0 {
        let matched = evaluate_expression(expr, path, fs, reporter)?;
        result = result && matched;
        if !result && reporter.is_null() {
            return Ok(false);
        }
    }
    Ok(result)
}

/// Evaluates one expression node. Leaves run in listed order; `any`
/// children OR under an operator frame; `not` children AND under a frame
/// and contribute negated.
pub fn evaluate_expression(
    expr: &FilterExpression,
    path: &Path,
    fs: &dyn Vfs,
    reporter: &mut dyn Reporter,
) -> Result<bool> {
    let mut result = true;

    for leaf in &expr.leaves {
        let (matched, detail) = evaluate_leaf(leaf, path, fs)?;
        reporter.record_filter(leaf.kind_name(), matched, &detail);
        result = result && matched;
        if !result && reporter.is_null() {
            return Ok(false);
        }
    }

    if !expr.any.is_empty() {
        reporter.push_operator("any");
        let mut any_matched = false;
        for child in &expr.any {
            let matched = evaluate_expression(child, path, fs, reporter)?;
            any_matched = any_matched || matched;
            if any_matched && reporter.is_null() {
                break;
            }
        }
        reporter.pop_operator("any", any_matched);
        result = result && any_matched;
        if !result && reporter.is_null() {
            return Ok(false);
        }
    }

    if !expr.not.is_empty() {
        reporter.push_operator("not");
        let mut all_matched = true;
        for child in &expr.not {
            let matched = evaluate_expression(child, path, fs, reporter)?;
            all_matched = all_matched && matched;
            if !all_matched && reporter.is_null() {
                break;
            }
        }
        reporter.pop_operator("not", !all_matched);
        result = result && !all_matched;
    }

    Ok(result)
}

fn basename(path: &Path) -> String {
    path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default()
}

/// Single-component extension of the basename, without the leading dot.
/// `archive.tar.gz` -> `gz`; `.hidden` -> `` (the leading dot is not an
/// extension separator).
fn extension(path: &Path) -> String {
    path.extension().map(|e| e.to_string_lossy().into_owned()).unwrap_or_default()
}

fn compile_glob(pattern: &str) -> Result<Pattern> {
    Pattern::new(pattern).map_err(|e| anyhow!("invalid glob `{pattern}`: {e}"))
}

fn evaluate_leaf(leaf: &FilterLeaf, path: &Path, fs: &dyn Vfs) -> Result<(bool, String)> {
    match leaf {
        FilterLeaf::Name(matcher) => {
            let name = basename(path);
            let matched = match matcher {
                NameMatcher::Glob(pattern) => compile_glob(pattern)?.matches(&name),
                NameMatcher::Regex(re) => re.is_match(&name),
            };
            Ok((matched, format!("basename `{name}`")))
        }

        FilterLeaf::Extension(patterns) => {
            let ext = extension(path);
            let mut matched = false;
            for pattern in patterns {
                if compile_glob(pattern)?.matches(&ext) {
                    matched = true;
                    break;
                }
            }
            Ok((matched, format!("extension `{ext}`")))
        }

        FilterLeaf::Size(filter) => {
            let meta = fs.stat(path).context("stat for size filter")?;
            if meta.is_dir {
                return Ok((false, "directory".to_string()));
            }
            Ok((filter.matches(meta.len), format!("{} bytes", meta.len)))
        }

        FilterLeaf::FileType(kinds) => {
            let meta = fs.lstat(path).context("lstat for type filter")?;
            let actual = if meta.is_symlink {
                FileKind::Symlink
            } else if meta.is_dir {
                FileKind::Directory
            } else {
                FileKind::File
            };
            Ok((kinds.contains(&actual), format!("{actual:?}").to_lowercase()))
        }

        FilterLeaf::Mime(patterns) => {
            let meta = fs.stat(path).context("stat for mime filter")?;
            if meta.is_dir {
                return Ok((false, "directory".to_string()));
            }
            let mime = sniff_mime(fs, path)?;
            let mut matched = false;
            for pattern in patterns {
                if compile_glob(pattern)?.matches(&mime) {
                    matched = true;
                    break;
                }
            }
            Ok((matched, mime))
        }

        FilterLeaf::Date { axis, before, after } => {
            let meta = fs.stat(path).context("stat for date filter")?;
            let stamp = match axis {
                DateAxis::Modified => meta.modified,
                DateAxis::Accessed => meta.accessed,
                DateAxis::Changed => meta.changed,
                DateAxis::Created => meta.created,
            };
            let stamp = stamp.ok_or_else(|| {
                anyhow::Error::from(std::io::Error::new(
                    std::io::ErrorKind::Unsupported,
                    format!("{} is not available on this filesystem", axis.filter_name()),
                ))
            })?;
            let stamp: DateTime<Utc> = system_time_to_utc(stamp);
            let now = Utc::now();

            let mut matched = true;
            if let Some(bound) = before {
                matched = matched && stamp < bound.resolve(now);
            }
            if let Some(bound) = after {
                matched = matched && stamp > bound.resolve(now);
            }
            Ok((matched, format!("{} {}", axis.filter_name(), stamp.to_rfc3339())))
        }
    }
}

fn system_time_to_utc(st: SystemTime) -> DateTime<Utc> {
    DateTime::<Utc>::from(st)
}

/// Sniffs a MIME type from the file's leading bytes. Falls back to a
/// UTF-8 text probe when no magic number matches.
fn sniff_mime(fs: &dyn Vfs, path: &Path) -> Result<String> {
    let mut reader = fs.open_read(path).context("open for mime sniffing")?;
    let mut buf = vec![0u8; MIME_SNIFF_LEN];
    let mut filled = 0;
    loop {
        let n = reader.read(&mut buf[filled..]).context("read for mime sniffing")?;
        if n == 0 {
            break;
        }
        filled += n;
        if filled == buf.len() {
            break;
        }
    }
    buf.truncate(filled);

    if let Some(kind) = infer::get(&buf) {
        return Ok(kind.mime_type().to_string());
    }
    if std::str::from_utf8(&buf).is_ok() {
        Ok("text/plain".to_string())
    } else {
        Ok("application/octet-stream".to_string())
    }
}
