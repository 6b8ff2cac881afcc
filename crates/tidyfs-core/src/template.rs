//! Template expansion for action arguments
//!
//! `dest`, `new_name` and `msg` action fields are templates. Two families
//! of tokens are expanded per file at execution time:
//! - `${name}` / `${ext}` - the basename split at its last dot. `${ext}`
//!   includes the leading dot, or is empty for files without an extension.
//!   A leading dot alone (hidden files) is part of the name, not an
//!   extension.
//! - strftime-style `%` tokens (`%Y`, `%m`, `%d`, ...) formatted from the
//!   local wall clock. Unsupported tokens pass through unchanged.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};

/// strftime tokens we expand. Anything else is left as-is so that a `%`
/// in a log message cannot fail an action.
const STRFTIME_TOKENS: &[char] = &[
    'Y', 'y', 'm', 'd', 'e', 'j', 'H', 'I', 'M', 'S', 'p', 'a', 'A', 'b', 'B', 'u', 'w', 'U', 'W',
    'D', 'F', 'T', 'R',
];

/// Expands a leading `~` or `~/` to the user's home directory.
///
/// Paths without a leading tilde are returned unchanged. `~user` forms are
/// not supported and pass through verbatim.
pub fn expand_tilde(path: &str) -> PathBuf {
    if path == "~" {
        if let Some(home) = dirs::home_dir() {
            return home;
        }
    } else if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}

/// Splits a basename into `(stem, extension)` at the last dot.
///
/// The extension includes its leading dot. Hidden files keep their leading
/// dot in the stem: `.hidden` -> `(".hidden", "")`, `.hidden.txt` ->
/// `(".hidden", ".txt")`.
pub fn split_name(basename: &str) -> (&str, &str) {
    // The first character never starts an extension (hidden files).
    let first_len = match basename.chars().next() {
        Some(c) => c.len_utf8(),
        None => return (basename, ""),
    };
    match basename[first_len..].rfind('.') {
        Some(idx) => basename.split_at(first_len + idx),
        None => (basename, ""),
    }
}

/// Expands `${name}`/`${ext}` and strftime tokens against `path` and `now`.
pub fn expand(template: &str, path: &Path, now: DateTime<Local>) -> String {
    let basename = path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
    let (stem, ext) = split_name(&basename);

    let with_placeholders = template.replace("${name}", stem).replace("${ext}", ext);
    expand_strftime(&with_placeholders, now)
}

fn expand_strftime(input: &str, now: DateTime<Local>) -> String {
    let mut out = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        if c != '%' {
            out.push(c);
            continue;
        }
        match chars.peek().copied() {
            Some('%') => {
                chars.next();
                out.push('%');
            }
            Some(tok) if STRFTIME_TOKENS.contains(&tok) => {
                chars.next();
                let spec = format!("%{tok}");
                out.push_str(&now.format(&spec).to_string());
            }
            _ => out.push('%'),
        }
    }
    out
}
