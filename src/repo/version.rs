//! Chart version ordering

use semver::Version;

/// Parse a chart version leniently: a leading `v` is dropped and missing
/// minor or patch components count as zero (`v1.2` is `1.2.0`).
pub fn parse_version(raw: &str) -> Option<Version> {
    let trimmed = raw.trim();
    let trimmed = trimmed
        .strip_prefix('v')
        .or_else(|| trimmed.strip_prefix('V'))
        .unwrap_or(trimmed);
    if trimmed.is_empty() {
        return None;
    }

    let split = trimmed.find(|c: char| c == '-' || c == '+').unwrap_or(trimmed.len());
    let (core, suffix) = trimmed.split_at(split);
    let padded = match core.matches('.').count() {
        0 => format!("{}.0.0{}", core, suffix),
        1 => format!("{}.0{}", core, suffix),
        _ => trimmed.to_string(),
    };
    Version::parse(&padded).ok()
}

/// Whether `a` is a strictly newer version than `b`. Unparseable input on
/// either side compares as not greater.
pub fn version_greater_than(a: &str, b: &str) -> bool {
    match (parse_version(a), parse_version(b)) {
        (Some(a), Some(b)) => a > b,
        _ => false,
    }
}

/// The highest parseable version, returned in its original spelling.
/// Unparseable entries are never chosen.
pub fn latest_version<'a, I>(versions: I) -> Option<String>
where
    I: IntoIterator<Item = &'a str>,
{
    versions
        .into_iter()
        .filter_map(|raw| parse_version(raw).map(|parsed| (parsed, raw)))
        .max_by(|(a, _), (b, _)| a.cmp(b))
        .map(|(_, raw)| raw.to_string())
}
