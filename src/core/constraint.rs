//! Constraint grammar and matching.
//!
//! A constraint is a trimmed lower-case keyword (`latest`, `stable`,
//! `any`), an exact version (`1.7`, `v1.7.0`), or a comparator chain
//! (`>=2.0 <3.0`, `^1.2, ~1.2.3`) where every comparator must hold.
//!
//! Matching operates on a version list already sorted descending; the
//! first satisfying element wins, which makes resolution deterministic
//! for a given discovery snapshot.

use thiserror::Error;

use crate::types::version::{self, Version};

#[derive(Error, Debug)]
pub enum ConstraintError {
    #[error("invalid constraint '{input}': {reason}")]
    Syntax { input: String, reason: String },
}

/// A parsed version constraint.
#[derive(Debug, Clone, PartialEq)]
pub enum Constraint {
    /// First element of the full list, prereleases allowed.
    Latest,
    /// First element after filtering out prereleases.
    Stable,
    /// Any satisfying version; stable preferred, else latest.
    Any,
    /// Exact match against the normalized version.
    Exact(String),
    /// Comparator chain; all comparators must hold.
    Range(semver::VersionReq),
}

const OPERATORS: &[&str] = &[">=", "<=", ">", "<", "=", "^", "~"];

impl Constraint {
    /// Parse a constraint string.
    pub fn parse(input: &str) -> Result<Self, ConstraintError> {
        let s = input.trim();
        match s.to_lowercase().as_str() {
            "" | "latest" => return Ok(Self::Latest),
            "stable" => return Ok(Self::Stable),
            "any" | "*" => return Ok(Self::Any),
            _ => {}
        }

        if s.starts_with(|c: char| OPERATORS.iter().any(|op| op.starts_with(c))) {
            return Self::parse_range(s);
        }

        let normalized = version::normalize(s);
        if version::parse_semverish(&normalized).is_none() {
            return Err(ConstraintError::Syntax {
                input: input.to_string(),
                reason: "not a keyword, exact version, or comparator chain".to_string(),
            });
        }
        Ok(Self::Exact(normalized))
    }

    fn parse_range(s: &str) -> Result<Self, ConstraintError> {
        let syntax = |reason: &str| ConstraintError::Syntax {
            input: s.to_string(),
            reason: reason.to_string(),
        };

        let mut comparators = Vec::new();
        for token in s.split([',', ' ']).map(str::trim).filter(|t| !t.is_empty()) {
            let op = OPERATORS
                .iter()
                .find(|op| token.starts_with(**op))
                .ok_or_else(|| syntax("comparator missing operator"))?;
            let ver = version::normalize(token[op.len()..].trim());
            if ver.is_empty() {
                return Err(syntax("comparator missing version"));
            }
            comparators.push(format!("{op}{ver}"));
        }
        if comparators.is_empty() {
            return Err(syntax("empty comparator chain"));
        }

        let req = semver::VersionReq::parse(&comparators.join(", "))
            .map_err(|e| syntax(&e.to_string()))?;
        Ok(Self::Range(req))
    }

    /// Pick the first satisfying element of a descending-sorted list.
    pub fn select<'a>(&self, versions: &'a [Version]) -> Option<&'a Version> {
        match self {
            Self::Latest => versions.first(),
            Self::Stable => versions.iter().find(|v| !v.prerelease),
            Self::Any => versions
                .iter()
                .find(|v| !v.prerelease)
                .or_else(|| versions.first()),
            Self::Exact(want) => versions.iter().find(|v| v.normalized == *want),
            Self::Range(req) => versions.iter().find(|v| {
                v.semver().map(|sv| req.matches(&sv)).unwrap_or(false)
            }),
        }
    }

    /// Whether this constraint names exactly one version.
    pub fn is_exact(&self) -> bool {
        matches!(self, Self::Exact(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn versions(tags: &[&str]) -> Vec<Version> {
        let mut v: Vec<Version> = tags.iter().map(|t| Version::new(t)).collect();
        crate::types::version::sort_versions_desc(&mut v);
        v
    }

    #[test]
    fn test_parse_keywords() {
        assert_eq!(Constraint::parse("latest").unwrap(), Constraint::Latest);
        assert_eq!(Constraint::parse(" Stable ").unwrap(), Constraint::Stable);
        assert_eq!(Constraint::parse("any").unwrap(), Constraint::Any);
        assert_eq!(Constraint::parse("").unwrap(), Constraint::Latest);
    }

    #[test]
    fn test_parse_exact() {
        assert_eq!(
            Constraint::parse("v1.7.0").unwrap(),
            Constraint::Exact("1.7.0".to_string())
        );
        assert_eq!(
            Constraint::parse("1.7").unwrap(),
            Constraint::Exact("1.7".to_string())
        );
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(Constraint::parse("not a version").is_err());
        assert!(Constraint::parse(">=").is_err());
    }

    #[test]
    fn test_latest_allows_prerelease() {
        let list = versions(&["2.0.0-rc.1", "1.9.0"]);
        assert_eq!(
            Constraint::Latest.select(&list).unwrap().normalized,
            "2.0.0-rc.1"
        );
    }

    #[test]
    fn test_stable_skips_prerelease() {
        let list = versions(&["2.0.0-rc.1", "1.9.0"]);
        assert_eq!(Constraint::Stable.select(&list).unwrap().normalized, "1.9.0");
    }

    #[test]
    fn test_any_prefers_stable() {
        let list = versions(&["2.0.0-rc.1", "1.9.0"]);
        assert_eq!(Constraint::Any.select(&list).unwrap().normalized, "1.9.0");

        let only_pre = versions(&["2.0.0-rc.1"]);
        assert_eq!(
            Constraint::Any.select(&only_pre).unwrap().normalized,
            "2.0.0-rc.1"
        );
    }

    #[test]
    fn test_exact_matches_normalized() {
        let list = versions(&["v1.7.1", "v1.7.0"]);
        let c = Constraint::parse("1.7.1").unwrap();
        assert_eq!(c.select(&list).unwrap().normalized, "1.7.1");

        let missing = Constraint::parse("1.8.0").unwrap();
        assert!(missing.select(&list).is_none());
    }

    #[test]
    fn test_range_excludes_prereleases() {
        // ">=2.0 <3.0" against a list with a prerelease candidate.
        let list = versions(&["3.0.1", "2.4.0", "2.4.0-rc.1", "2.3.5", "1.9.0"]);
        let c = Constraint::parse(">=2.0 <3.0").unwrap();
        assert_eq!(c.select(&list).unwrap().normalized, "2.4.0");
    }

    #[test]
    fn test_range_caret_tilde() {
        let list = versions(&["1.3.0", "1.2.9", "1.2.4", "2.0.0"]);
        assert_eq!(
            Constraint::parse("^1.2").unwrap().select(&list).unwrap().normalized,
            "1.3.0"
        );
        assert_eq!(
            Constraint::parse("~1.2.3").unwrap().select(&list).unwrap().normalized,
            "1.2.9"
        );
    }

    #[test]
    fn test_range_comma_and_space_equivalent() {
        let list = versions(&["2.5.0", "2.4.0", "1.9.0"]);
        let spaced = Constraint::parse(">=2.0 <2.5").unwrap();
        let comma = Constraint::parse(">=2.0, <2.5").unwrap();
        assert_eq!(spaced.select(&list).unwrap().normalized, "2.4.0");
        assert_eq!(comma.select(&list).unwrap().normalized, "2.4.0");
    }
}
