//! Permission patterns and wildcard matching.
//!
//! Grammar: the bare wildcard `*`, or two to three `:`-separated segments
//! (`resource:action[:qualifier]`) where each segment is `*` or
//! `[a-z0-9_-]+`. Requested permissions are free-form strings; the only
//! constraint on them is that no segment is a wildcard.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

use crate::error::{Error, Result};

/// The wildcard segment.
pub const WILDCARD: &str = "*";

/// Separator between segments.
pub const SEPARATOR: char = ':';

const MIN_SEGMENTS: usize = 2;
const MAX_SEGMENTS: usize = 3;

/// A single concrete permission segment.
static SEGMENT_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[a-z0-9_-]+$").unwrap());

/// A validated permission pattern held by a role.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Permission(String);

impl Permission {
    /// Parse and validate a pattern.
    ///
    /// # Errors
    /// Returns [`Error::InvalidPermission`] describing the first problem.
    pub fn parse(pattern: &str) -> Result<Self> {
        PermissionMatcher::validate_pattern(pattern)?;
        Ok(Self(pattern.to_string()))
    }

    /// The wildcard pattern granting everything.
    pub fn all() -> Self {
        Self(WILDCARD.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.0.split(SEPARATOR)
    }

    pub fn is_wildcard(&self) -> bool {
        self.0 == WILDCARD
    }

    /// Whether this pattern grants the concrete `requested` permission.
    ///
    /// The bare wildcard grants any string. Otherwise segments are compared
    /// left to right; each held segment must equal the requested one or be
    /// `*`, and the pattern may not be longer than the request. A shorter
    /// pattern therefore grants everything beneath it.
    pub fn grants(&self, requested: &str) -> bool {
        if self.is_wildcard() {
            return true;
        }
        let requested: Vec<&str> = requested.split(SEPARATOR).collect();
        let held: Vec<&str> = self.segments().collect();
        if held.len() > requested.len() {
            return false;
        }
        held.iter()
            .zip(requested.iter())
            .all(|(h, r)| *h == WILDCARD || h == r)
    }
}

impl std::fmt::Display for Permission {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for Permission {
    type Err = Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Permission {
    type Error = Error;

    fn try_from(value: String) -> std::result::Result<Self, Self::Error> {
        PermissionMatcher::validate_pattern(&value)?;
        Ok(Self(value))
    }
}

impl From<Permission> for String {
    fn from(permission: Permission) -> Self {
        permission.0
    }
}

/// Evaluates held permission sets against requested permissions.
///
/// There are no deny rules: every matching pattern is an equivalent grant,
/// so the first match short-circuits and declaration order carries no
/// priority.
#[derive(Debug, Clone, Copy, Default)]
pub struct PermissionMatcher;

impl PermissionMatcher {
    /// Check whether any held pattern grants `requested`.
    ///
    /// Requests with a wildcard segment are never granted, even by `*`.
    pub fn check(held: &[Permission], requested: &str) -> bool {
        if Self::has_wildcard_segment(requested) {
            return false;
        }
        held.iter().any(|pattern| pattern.grants(requested))
    }

    /// Validate a held pattern.
    pub fn validate_pattern(pattern: &str) -> Result<()> {
        if pattern == WILDCARD {
            return Ok(());
        }
        Self::validate_segments(pattern)
    }

    /// Validate a requested permission: it must be concrete.
    pub fn validate_request(requested: &str) -> Result<()> {
        if Self::has_wildcard_segment(requested) {
            return Err(Error::InvalidPermission {
                pattern: requested.to_string(),
                reason: "requested permissions cannot contain wildcards".to_string(),
            });
        }
        Ok(())
    }

    fn has_wildcard_segment(value: &str) -> bool {
        value.split(SEPARATOR).any(|segment| segment == WILDCARD)
    }

    fn validate_segments(value: &str) -> Result<()> {
        let invalid = |reason: String| Error::InvalidPermission {
            pattern: value.to_string(),
            reason,
        };

        let segments: Vec<&str> = value.split(SEPARATOR).collect();
        if !(MIN_SEGMENTS..=MAX_SEGMENTS).contains(&segments.len()) {
            return Err(invalid(format!(
                "expected {} to {} segments, found {}",
                MIN_SEGMENTS,
                MAX_SEGMENTS,
                segments.len()
            )));
        }
        for segment in segments {
            if segment == WILDCARD {
                continue;
            }
            if !SEGMENT_RE.is_match(segment) {
                return Err(invalid(format!("malformed segment '{}'", segment)));
            }
        }
        Ok(())
    }
}
