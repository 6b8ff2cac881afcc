//! Shorthand decoding of rules, filters and actions
//!
//! The configuration accepts scalar, list and mapping shorthands for most
//! constructs (`extension: txt`, `extension: [txt, md]`,
//! `extension: {extensions: [...]}`; `move: /dest` vs
//! `move: {dest: ..., on_conflict: ...}`). Rather than fighting serde
//! derive, rules are decoded by hand from `serde_yaml::Value`, which also
//! lets an unknown filter or action name fail with the list of registered
//! names.

use std::path::{Component, Path, PathBuf};

use serde_yaml::Value;

use crate::errors::ConfigError;
use crate::rule::{
    Action, ConflictMode, DateAxis, DateSpec, FileKind, FilterExpression, FilterGroups,
    FilterLeaf, LogLevel, NameMatcher, RelativeUnit, Rule, SizeFilter, Traversal,
};
use crate::template::expand_tilde;

/// Registered filter names, enumerated in unknown-name diagnostics.
pub const FILTER_NAMES: &[&str] = &[
    "name",
    "extension",
    "size",
    "type",
    "mime",
    "date_modified",
    "date_accessed",
    "date_changed",
    "date_created",
    "any",
    "not",
];

/// Registered action names, enumerated in unknown-name diagnostics.
pub const ACTION_NAMES: &[&str] = &["move", "copy", "rename", "delete", "trash", "log"];

const RULE_KEYS: &[&str] =
    &["name", "enabled", "recursive", "traversal", "locations", "filters", "actions"];

// ============================================================================
// Rules
// ============================================================================

/// Decodes the `rules` sequence of the configuration file.
pub fn decode_rules(values: &[Value]) -> Result<Vec<Rule>, ConfigError> {
    values
        .iter()
        .enumerate()
        .map(|(i, v)| decode_rule(v, &format!("rules[{i}]")))
        .collect()
}

fn decode_rule(value: &Value, at: &str) -> Result<Rule, ConfigError> {
    let mapping = value
        .as_mapping()
        .ok_or_else(|| ConfigError::decode(at, "a rule must be a mapping"))?;

    for key in mapping.keys() {
        let key = key
            .as_str()
            .ok_or_else(|| ConfigError::decode(at, "rule keys must be strings"))?;
        if !RULE_KEYS.contains(&key) {
            return Err(ConfigError::decode(
                at,
                format!("unknown rule key `{key}`; recognized keys: {}", RULE_KEYS.join(", ")),
            ));
        }
    }

    let name = match value.get("name").and_then(Value::as_str) {
        Some(n) if !n.is_empty() => n.to_string(),
        _ => return Err(ConfigError::decode(at, "rule requires a non-empty `name`")),
    };

    let enabled = match value.get("enabled") {
        None => true,
        Some(v) => v
            .as_bool()
            .ok_or_else(|| ConfigError::decode(format!("{at}.enabled"), "must be a boolean"))?,
    };

    let recursive = match value.get("recursive") {
        None => false,
        Some(v) => v
            .as_bool()
            .ok_or_else(|| ConfigError::decode(format!("{at}.recursive"), "must be a boolean"))?,
    };

    let traversal = match value.get("traversal") {
        None => Traversal::default(),
        Some(v) => {
            let s = v.as_str().ok_or_else(|| {
                ConfigError::decode(format!("{at}.traversal"), "must be a string")
            })?;
            Traversal::parse(s).ok_or_else(|| {
                ConfigError::decode(
                    format!("{at}.traversal"),
                    format!("unknown traversal `{s}`; expected depth-first or breadth-first"),
                )
            })?
        }
    };

    let locations_at = format!("{at}.locations");
    let raw_locations = value
        .get("locations")
        .ok_or_else(|| ConfigError::decode(at, "rule requires `locations`"))?;
    let locations = string_or_list(raw_locations, &locations_at)?
        .into_iter()
        .map(|s| normalize_location(&s, &locations_at))
        .collect::<Result<Vec<_>, _>>()?;
    if locations.is_empty() {
        return Err(ConfigError::decode(locations_at, "must name at least one directory"));
    }

    let filters = match value.get("filters") {
        None => FilterGroups::default(),
        Some(v) => {
            let seq = v.as_sequence().ok_or_else(|| {
                ConfigError::decode(format!("{at}.filters"), "must be a list")
            })?;
            let groups = seq
                .iter()
                .enumerate()
                .map(|(i, f)| decode_filter_expression(f, &format!("{at}.filters[{i}]")))
                .collect::<Result<Vec<_>, _>>()?;
            FilterGroups(groups)
        }
    };

    let actions = match value.get("actions") {
        None => Vec::new(),
        Some(v) => {
            let seq = v.as_sequence().ok_or_else(|| {
                ConfigError::decode(format!("{at}.actions"), "must be a list")
            })?;
            seq.iter()
                .enumerate()
                .map(|(i, a)| decode_action(a, &format!("{at}.actions[{i}]")))
                .collect::<Result<Vec<_>, _>>()?
        }
    };

    Ok(Rule { name, enabled, recursive, traversal, locations, filters, actions })
}

/// Tilde-expands and lexically cleans a location, requiring the result to
/// be absolute.
fn normalize_location(raw: &str, at: &str) -> Result<PathBuf, ConfigError> {
    if raw.is_empty() {
        return Err(ConfigError::decode(at, "location must not be empty"));
    }
    let expanded = expand_tilde(raw);
    let cleaned = clean_path(&expanded);
    if !cleaned.is_absolute() {
        return Err(ConfigError::decode(
            at,
            format!("location `{raw}` must be absolute after tilde expansion"),
        ));
    }
    Ok(cleaned)
}

/// Lexical path cleaning: drops `.` components and resolves `..` without
/// touching the filesystem. `..` at the root is discarded.
fn clean_path(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for comp in path.components() {
        match comp {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() && !path.has_root() {
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    if out.as_os_str().is_empty() {
        out.push(".");
    }
    out
}

// ============================================================================
// Filters
// ============================================================================

/// Decodes one filter-expression mapping: leaf filters plus optional
/// `any` / `not` child lists, all AND-joined within the node.
pub fn decode_filter_expression(value: &Value, at: &str) -> Result<FilterExpression, ConfigError> {
    let mapping = value
        .as_mapping()
        .ok_or_else(|| ConfigError::decode(at, "a filter must be a mapping"))?;

    let mut expr = FilterExpression::default();

    for (key, val) in mapping {
        let key = key
            .as_str()
            .ok_or_else(|| ConfigError::decode(at, "filter keys must be strings"))?;
        let leaf_at = format!("{at}.{key}");

        match key {
            "name" => expr.leaves.push(FilterLeaf::Name(decode_name(val, &leaf_at)?)),
            "extension" => {
                let patterns = list_or_wrapped(val, "extensions", &leaf_at)?
                    .into_iter()
                    .map(|p| p.strip_prefix('.').unwrap_or(&p).to_string())
                    .collect();
                expr.leaves.push(FilterLeaf::Extension(patterns));
            }
            "size" => expr.leaves.push(FilterLeaf::Size(decode_size(val, &leaf_at)?)),
            "type" => expr.leaves.push(FilterLeaf::FileType(decode_file_types(val, &leaf_at)?)),
            "mime" => {
                expr.leaves.push(FilterLeaf::Mime(list_or_wrapped(val, "types", &leaf_at)?))
            }
            "date_modified" | "date_accessed" | "date_changed" | "date_created" => {
                let axis = match key {
                    "date_modified" => DateAxis::Modified,
                    "date_accessed" => DateAxis::Accessed,
                    "date_changed" => DateAxis::Changed,
                    _ => DateAxis::Created,
                };
                let (before, after) = decode_date_bounds(val, &leaf_at)?;
                expr.leaves.push(FilterLeaf::Date { axis, before, after });
            }
            "any" | "not" => {
                let seq = val
                    .as_sequence()
                    .ok_or_else(|| ConfigError::decode(&leaf_at, "must be a list of filters"))?;
                let children = seq
                    .iter()
                    .enumerate()
                    .map(|(i, c)| decode_filter_expression(c, &format!("{leaf_at}[{i}]")))
                    .collect::<Result<Vec<_>, _>>()?;
                if key == "any" {
                    expr.any = children;
                } else {
                    expr.not = children;
                }
            }
            other => {
                return Err(ConfigError::decode(
                    at,
                    format!(
                        "unknown filter `{other}`; registered filters: {}",
                        FILTER_NAMES.join(", ")
                    ),
                ));
            }
        }
    }

    Ok(expr)
}

fn decode_name(value: &Value, at: &str) -> Result<NameMatcher, ConfigError> {
    if let Some(s) = value.as_str() {
        return Ok(NameMatcher::Glob(s.to_string()));
    }
    if value.as_mapping().is_none() {
        return Err(ConfigError::decode(at, "must be a glob string or a mapping"));
    }

    let glob = value.get("glob").and_then(Value::as_str);
    let regex = value.get("regex").and_then(Value::as_str);
    match (glob, regex) {
        (Some(_), Some(_)) => {
            Err(ConfigError::decode(at, "ambiguous name filter: both `glob` and `regex` given"))
        }
        (Some(g), None) => Ok(NameMatcher::Glob(g.to_string())),
        (None, Some(r)) => {
            let compiled = regex::Regex::new(r)
                .map_err(|e| ConfigError::decode(at, format!("invalid regex: {e}")))?;
            Ok(NameMatcher::Regex(compiled))
        }
        (None, None) => Err(ConfigError::decode(at, "name filter requires `glob` or `regex`")),
    }
}

const SIZE_COMPARISONS: &[&str] = &["greater_than", "less_than", "at_least", "at_most", "between"];

fn decode_size(value: &Value, at: &str) -> Result<SizeFilter, ConfigError> {
    // String shorthand: "> 5mb", ">= 100 kb".
    if let Some(s) = value.as_str() {
        return parse_size_shorthand(s, at);
    }

    let mapping = value
        .as_mapping()
        .ok_or_else(|| ConfigError::decode(at, "must be a comparison string or mapping"))?;
    if mapping.len() != 1 {
        return Err(ConfigError::decode(
            at,
            format!("size takes exactly one of: {}", SIZE_COMPARISONS.join(", ")),
        ));
    }

    let (key, val) = mapping.iter().next().unwrap();
    let key = key.as_str().unwrap_or_default();
    match key {
        "greater_than" => Ok(SizeFilter::GreaterThan(decode_byte_count(val, at)?)),
        "less_than" => Ok(SizeFilter::LessThan(decode_byte_count(val, at)?)),
        "at_least" => Ok(SizeFilter::AtLeast(decode_byte_count(val, at)?)),
        "at_most" => Ok(SizeFilter::AtMost(decode_byte_count(val, at)?)),
        "between" => {
            let min = val
                .get("min")
                .ok_or_else(|| ConfigError::decode(at, "between requires `min` and `max`"))?;
            let max = val
                .get("max")
                .ok_or_else(|| ConfigError::decode(at, "between requires `min` and `max`"))?;
            Ok(SizeFilter::Between {
                min: decode_byte_count(min, at)?,
                max: decode_byte_count(max, at)?,
            })
        }
        other => Err(ConfigError::decode(
            at,
            format!("unknown size comparison `{other}`; one of: {}", SIZE_COMPARISONS.join(", ")),
        )),
    }
}

/// Units use binary multipliers: 1 KB = 1024 bytes.
fn unit_multiplier(unit: &str) -> Option<u64> {
    match unit {
        "b" => Some(1),
        "kb" => Some(1 << 10),
        "mb" => Some(1 << 20),
        "gb" => Some(1 << 30),
        "tb" => Some(1u64 << 40),
        _ => None,
    }
}

/// A byte count given as `{b|kb|mb|gb|tb: number}` with exactly one unit.
fn decode_byte_count(value: &Value, at: &str) -> Result<u64, ConfigError> {
    let mapping = value
        .as_mapping()
        .ok_or_else(|| ConfigError::decode(at, "size value must be a {unit: number} mapping"))?;
    if mapping.len() != 1 {
        return Err(ConfigError::decode(at, "size value takes exactly one unit"));
    }
    let (unit, amount) = mapping.iter().next().unwrap();
    let unit = unit.as_str().unwrap_or_default();
    let mult = unit_multiplier(unit)
        .ok_or_else(|| ConfigError::decode(at, format!("unknown size unit `{unit}`")))?;
    let amount = amount
        .as_f64()
        .ok_or_else(|| ConfigError::decode(at, "size amount must be a number"))?;
    if amount < 0.0 {
        return Err(ConfigError::decode(at, "size amount must not be negative"));
    }
    Ok((amount * mult as f64) as u64)
}

fn parse_size_shorthand(s: &str, at: &str) -> Result<SizeFilter, ConfigError> {
    let err = || ConfigError::decode(at, format!("invalid size shorthand `{s}`"));
    let trimmed = s.trim();

    let (op, rest) = if let Some(r) = trimmed.strip_prefix(">=") {
        (">=", r)
    } else if let Some(r) = trimmed.strip_prefix("<=") {
        ("<=", r)
    } else if let Some(r) = trimmed.strip_prefix('>') {
        (">", r)
    } else if let Some(r) = trimmed.strip_prefix('<') {
        ("<", r)
    } else {
        (">=", trimmed)
    };

    let rest = rest.trim().to_lowercase();
    let digits_end = rest
        .find(|c: char| !c.is_ascii_digit() && c != '.')
        .unwrap_or(rest.len());
    let (number, unit) = rest.split_at(digits_end);
    let amount: f64 = number.parse().map_err(|_| err())?;
    let mult = unit_multiplier(unit.trim()).ok_or_else(err)?;
    let bytes = (amount * mult as f64) as u64;

    Ok(match op {
        ">" => SizeFilter::GreaterThan(bytes),
        "<" => SizeFilter::LessThan(bytes),
        "<=" => SizeFilter::AtMost(bytes),
        _ => SizeFilter::AtLeast(bytes),
    })
}

fn decode_file_types(value: &Value, at: &str) -> Result<Vec<FileKind>, ConfigError> {
    string_or_list(value, at)?
        .into_iter()
        .map(|s| {
            FileKind::parse(&s).ok_or_else(|| {
                ConfigError::decode(
                    at,
                    format!("unknown file type `{s}`; expected file, directory or symlink"),
                )
            })
        })
        .collect()
}

const RELATIVE_KEYS: &[(&str, RelativeUnit)] = &[
    ("seconds_ago", RelativeUnit::Seconds),
    ("minutes_ago", RelativeUnit::Minutes),
    ("hours_ago", RelativeUnit::Hours),
    ("days_ago", RelativeUnit::Days),
    ("weeks_ago", RelativeUnit::Weeks),
    ("months_ago", RelativeUnit::Months),
    ("years_ago", RelativeUnit::Years),
];

fn decode_date_bounds(
    value: &Value,
    at: &str,
) -> Result<(Option<DateSpec>, Option<DateSpec>), ConfigError> {
    let mapping = value
        .as_mapping()
        .ok_or_else(|| ConfigError::decode(at, "must be a mapping with `before` and/or `after`"))?;

    let mut before = None;
    let mut after = None;
    for (key, val) in mapping {
        let key = key
            .as_str()
            .ok_or_else(|| ConfigError::decode(at, "date filter keys must be strings"))?;
        match key {
            "before" => before = Some(decode_date_spec(val, &format!("{at}.before"))?),
            "after" => after = Some(decode_date_spec(val, &format!("{at}.after"))?),
            other => {
                return Err(ConfigError::decode(
                    at,
                    format!("unknown date bound `{other}`; expected before or after"),
                ))
            }
        }
    }
    Ok((before, after))
}

fn decode_date_spec(value: &Value, at: &str) -> Result<DateSpec, ConfigError> {
    let mapping = value
        .as_mapping()
        .ok_or_else(|| ConfigError::decode(at, "a date spec must be a mapping"))?;
    if mapping.len() != 1 {
        return Err(ConfigError::decode(
            at,
            "a date spec takes exactly one of: a relative key, `unix`, or `date`",
        ));
    }

    let (key, val) = mapping.iter().next().unwrap();
    let key = key.as_str().unwrap_or_default();

    if let Some((_, unit)) = RELATIVE_KEYS.iter().find(|(k, _)| *k == key) {
        let amount = val
            .as_f64()
            .ok_or_else(|| ConfigError::decode(at, format!("`{key}` must be a number")))?;
        return Ok(DateSpec::Relative { amount, unit: *unit });
    }

    match key {
        "unix" => {
            let epoch = val
                .as_i64()
                .ok_or_else(|| ConfigError::decode(at, "`unix` must be an integer"))?;
            if epoch <= 0 {
                return Err(ConfigError::decode(at, "`unix` must be positive epoch seconds"));
            }
            Ok(DateSpec::Unix(epoch))
        }
        "date" => {
            let s = val
                .as_str()
                .ok_or_else(|| ConfigError::decode(at, "`date` must be a string"))?;
            let parsed = DateSpec::parse_date_string(s).ok_or_else(|| {
                ConfigError::decode(
                    at,
                    format!("invalid date `{s}`; expected YYYY-MM-DD or YYYY-MM-DDTHH:MM:SS"),
                )
            })?;
            Ok(DateSpec::Date(parsed))
        }
        other => Err(ConfigError::decode(
            at,
            format!("unknown date spec key `{other}`"),
        )),
    }
}

// ============================================================================
// Actions
// ============================================================================

/// Decodes one action: bare string (`delete`), single-key mapping with a
/// scalar (`move: /dest`), or single-key mapping with options
/// (`move: {dest: ..., on_conflict: skip}`).
pub fn decode_action(value: &Value, at: &str) -> Result<Action, ConfigError> {
    if let Some(s) = value.as_str() {
        return match s {
            "delete" => Ok(Action::Delete),
            "trash" => Ok(Action::Trash),
            other => Err(unknown_action(other, at)),
        };
    }

    let mapping = value
        .as_mapping()
        .ok_or_else(|| ConfigError::decode(at, "an action must be a string or a mapping"))?;
    if mapping.len() != 1 {
        return Err(ConfigError::decode(at, "an action mapping takes exactly one action key"));
    }

    let (key, val) = mapping.iter().next().unwrap();
    let key = key
        .as_str()
        .ok_or_else(|| ConfigError::decode(at, "action keys must be strings"))?;
    let field_at = format!("{at}.{key}");

    match key {
        "delete" => Ok(Action::Delete),
        "trash" => Ok(Action::Trash),
        "move" => {
            let (dest, on_conflict) = scalar_or_options(val, "dest", &field_at)?;
            let dest = dest
                .ok_or_else(|| ConfigError::decode(&field_at, "move requires `dest`"))?;
            Ok(Action::Move { dest, on_conflict })
        }
        "copy" => {
            let (new_name, on_conflict) = scalar_or_options(val, "new_name", &field_at)?;
            let new_name = new_name
                .ok_or_else(|| ConfigError::decode(&field_at, "copy requires `new_name`"))?;
            Ok(Action::Copy { new_name, on_conflict })
        }
        "rename" => {
            let (new_name, on_conflict) = scalar_or_options(val, "new_name", &field_at)?;
            let new_name = new_name
                .ok_or_else(|| ConfigError::decode(&field_at, "rename requires `new_name`"))?;
            Ok(Action::Rename { new_name, on_conflict })
        }
        "log" => decode_log(val, &field_at),
        other => Err(unknown_action(other, at)),
    }
}

fn unknown_action(name: &str, at: &str) -> ConfigError {
    ConfigError::decode(
        at,
        format!("unknown action `{name}`; registered actions: {}", ACTION_NAMES.join(", ")),
    )
}

/// Shared shape of move/copy/rename: a scalar argument, or a mapping with
/// the named argument plus optional `on_conflict`.
fn scalar_or_options(
    value: &Value,
    arg_key: &str,
    at: &str,
) -> Result<(Option<String>, ConflictMode), ConfigError> {
    if let Some(s) = value.as_str() {
        return Ok((Some(s.to_string()), ConflictMode::default()));
    }
    let mapping = value.as_mapping().ok_or_else(|| {
        ConfigError::decode(at, format!("must be a string or a mapping with `{arg_key}`"))
    })?;

    let mut arg = None;
    let mut on_conflict = ConflictMode::default();
    for (key, val) in mapping {
        let key = key
            .as_str()
            .ok_or_else(|| ConfigError::decode(at, "action option keys must be strings"))?;
        if key == arg_key {
            arg = Some(
                val.as_str()
                    .ok_or_else(|| ConfigError::decode(at, format!("`{arg_key}` must be a string")))?
                    .to_string(),
            );
        } else if key == "on_conflict" {
            let s = val
                .as_str()
                .ok_or_else(|| ConfigError::decode(at, "`on_conflict` must be a string"))?;
            on_conflict = ConflictMode::parse(s).ok_or_else(|| {
                ConfigError::decode(
                    at,
                    format!(
                        "unknown conflict mode `{s}`; one of: rename_with_suffix, skip, overwrite, trash"
                    ),
                )
            })?;
        } else {
            return Err(ConfigError::decode(at, format!("unknown action option `{key}`")));
        }
    }
    Ok((arg, on_conflict))
}

fn decode_log(value: &Value, at: &str) -> Result<Action, ConfigError> {
    if let Some(s) = value.as_str() {
        return Ok(Action::Log { msg: s.to_string(), level: LogLevel::default() });
    }
    let mapping = value
        .as_mapping()
        .ok_or_else(|| ConfigError::decode(at, "must be a string or a mapping with `msg`"))?;

    let mut msg = None;
    let mut level = LogLevel::default();
    for (key, val) in mapping {
        let key = key
            .as_str()
            .ok_or_else(|| ConfigError::decode(at, "log option keys must be strings"))?;
        match key {
            "msg" => {
                msg = Some(
                    val.as_str()
                        .ok_or_else(|| ConfigError::decode(at, "`msg` must be a string"))?
                        .to_string(),
                )
            }
            "level" => {
                let s = val
                    .as_str()
                    .ok_or_else(|| ConfigError::decode(at, "`level` must be a string"))?;
                level = LogLevel::parse(s).ok_or_else(|| {
                    ConfigError::decode(at, format!("unknown log level `{s}`"))
                })?;
            }
            other => return Err(ConfigError::decode(at, format!("unknown log option `{other}`"))),
        }
    }
    let msg = msg.ok_or_else(|| ConfigError::decode(at, "log requires `msg`"))?;
    Ok(Action::Log { msg, level })
}

// ============================================================================
// Shared helpers
// ============================================================================

/// Accepts a scalar string or a list of strings.
fn string_or_list(value: &Value, at: &str) -> Result<Vec<String>, ConfigError> {
    if let Some(s) = value.as_str() {
        return Ok(vec![s.to_string()]);
    }
    if let Some(seq) = value.as_sequence() {
        return seq
            .iter()
            .map(|v| {
                v.as_str()
                    .map(str::to_string)
                    .ok_or_else(|| ConfigError::decode(at, "list entries must be strings"))
            })
            .collect();
    }
    Err(ConfigError::decode(at, "must be a string or a list of strings"))
}

/// Accepts a scalar, a list, or a mapping wrapping the list under
/// `wrapper_key` (e.g. `extension: {extensions: [...]}`).
fn list_or_wrapped(value: &Value, wrapper_key: &str, at: &str) -> Result<Vec<String>, ConfigError> {
    if let Some(mapping) = value.as_mapping() {
        let inner = mapping.iter().find(|(k, _)| k.as_str() == Some(wrapper_key));
        return match inner {
            Some((_, v)) if mapping.len() == 1 => string_or_list(v, at),
            _ => Err(ConfigError::decode(
                at,
                format!("mapping form takes exactly one key `{wrapper_key}`"),
            )),
        };
    }
    string_or_list(value, at)
}

/// Parses a duration: integer milliseconds, or a string with an `ms` or
/// `s` suffix.
pub fn parse_duration(value: &Value, at: &str) -> Result<std::time::Duration, ConfigError> {
    if let Some(ms) = value.as_u64() {
        return Ok(std::time::Duration::from_millis(ms));
    }
    if let Some(s) = value.as_str() {
        let s = s.trim();
        if let Some(num) = s.strip_suffix("ms") {
            if let Ok(ms) = num.trim().parse::<u64>() {
                return Ok(std::time::Duration::from_millis(ms));
            }
        } else if let Some(num) = s.strip_suffix('s') {
            if let Ok(secs) = num.trim().parse::<f64>() {
                if secs >= 0.0 {
                    return Ok(std::time::Duration::from_secs_f64(secs));
                }
            }
        } else if let Ok(ms) = s.parse::<u64>() {
            return Ok(std::time::Duration::from_millis(ms));
        }
    }
    Err(ConfigError::decode(at, "invalid duration; expected milliseconds or `500ms` / `2s`"))
}
