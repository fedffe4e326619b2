//! Asset pattern selection.
//!
//! `asset_patterns` maps platform globs to asset name templates. Matching
//! precedence:
//!
//! 1. an exact `"os-arch"` key,
//! 2. the first wildcard key (e.g. `"linux-*"`) matching the platform,
//! 3. a comma-union key (`"darwin-*,windows-*"`) where any part matches.
//!
//! Keys are iterated in sorted order, so selection is deterministic.

use std::collections::BTreeMap;

use crate::types::Platform;

/// Pick the asset template for a platform. Returns the matched pattern
/// key and its template.
pub fn match_asset_pattern<'a>(
    patterns: &'a BTreeMap<String, String>,
    platform: &Platform,
) -> Option<(&'a str, &'a str)> {
    let canonical = platform.to_string();

    // 1. Exact match wins.
    if let Some(template) = patterns.get(&canonical) {
        return Some((canonical_key(patterns, &canonical), template));
    }

    // 2. First single wildcard matching the platform.
    for (key, template) in patterns {
        if key.contains(',') || !key.contains('*') {
            continue;
        }
        if glob_matches(key, &canonical) {
            return Some((key, template));
        }
    }

    // 3. Comma-union where any part matches, exact or wildcard.
    for (key, template) in patterns {
        if !key.contains(',') {
            continue;
        }
        let hit = key
            .split(',')
            .map(str::trim)
            .any(|part| part == canonical || glob_matches(part, &canonical));
        if hit {
            return Some((key, template));
        }
    }

    None
}

fn canonical_key<'a>(patterns: &'a BTreeMap<String, String>, key: &str) -> &'a str {
    patterns
        .get_key_value(key)
        .map(|(k, _)| k.as_str())
        .unwrap_or_default()
}

fn glob_matches(pattern: &str, value: &str) -> bool {
    glob::Pattern::new(pattern)
        .map(|p| p.matches(value))
        .unwrap_or(false)
}
