//! Version tags and the update-needed decision.
//!
//! The installation carries a single-line version marker at its root (see
//! [`marker`]); the remote side publishes the same kind of marker on the
//! source branch. [`VersionResolver::check`] compares the two and decides
//! whether an update is available. It is a pure function: callers do the I/O.
//!
//! # Tag format
//!
//! Tags are semantic versions, `major.minor.patch`, compared component-wise
//! as numbers. Parsing is forgiving about presentation:
//!
//! - surrounding whitespace and a trailing newline are ignored
//! - a leading `v` or `V` is stripped (`v1.2.3`)
//! - a two-component tag is padded with a zero patch (`1.2` → `1.2.0`)
//!
//! Anything else is a validation error.
//!
//! # Examples
//!
//! ```rust,no_run
//! use safeup_cli::version::VersionResolver;
//!
//! # fn example() -> Result<(), safeup_cli::core::UpdateError> {
//! let check = VersionResolver::check(Some("1.2.0"), "1.3.0")?;
//! assert!(check.update_available);
//! # Ok(())
//! # }
//! ```

pub mod marker;

pub use marker::{FileVersionMarker, VersionStore};

use crate::core::{UpdateError, UpdateState};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A parsed semantic version tag.
///
/// Equality and ordering look at `major.minor.patch` only; pre-release and
/// build suffixes are kept for display but never make a tag newer.
#[derive(Debug, Clone)]
pub struct VersionTag(semver::Version);

impl VersionTag {
    /// Parse a tag, normalising `v` prefixes and two-component versions.
    pub fn parse(raw: &str) -> Result<Self, UpdateError> {
        let trimmed = raw.trim();
        let stripped = trimmed
            .strip_prefix('v')
            .or_else(|| trimmed.strip_prefix('V'))
            .unwrap_or(trimmed);

        if stripped.is_empty() {
            return Err(UpdateError::validation(
                UpdateState::CheckingVersion,
                "version tag is empty",
            ));
        }

        let normalized = if stripped.split('.').count() == 2 {
            format!("{stripped}.0")
        } else {
            stripped.to_string()
        };

        semver::Version::parse(&normalized).map(Self).map_err(|e| {
            UpdateError::validation(
                UpdateState::CheckingVersion,
                format!("malformed version tag '{trimmed}': {e}"),
            )
        })
    }

    #[must_use]
    pub const fn as_semver(&self) -> &semver::Version {
        &self.0
    }

    const fn components(&self) -> (u64, u64, u64) {
        (self.0.major, self.0.minor, self.0.patch)
    }
}

impl PartialEq for VersionTag {
    fn eq(&self, other: &Self) -> bool {
        self.components() == other.components()
    }
}

impl Eq for VersionTag {}

impl PartialOrd for VersionTag {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for VersionTag {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.components().cmp(&other.components())
    }
}

impl std::hash::Hash for VersionTag {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.components().hash(state);
    }
}

impl FromStr for VersionTag {
    type Err = UpdateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for VersionTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Serialize for VersionTag {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for VersionTag {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::parse(&raw).map_err(serde::de::Error::custom)
    }
}

/// Result of comparing the local and remote version tags.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionCheck {
    #[serde(rename = "current_version")]
    pub current: Option<VersionTag>,
    #[serde(rename = "remote_version")]
    pub remote: VersionTag,
    pub update_available: bool,
}

impl VersionCheck {
    /// Human-readable summary in the style of `safeup check`.
    #[must_use]
    pub fn summary(&self) -> String {
        let current = self
            .current
            .as_ref()
            .map_or_else(|| "unknown".to_string(), ToString::to_string);
        if self.update_available {
            format!("Current version: {current}\nLatest version:  {} (update available)", self.remote)
        } else {
            format!("Current version: {current} (up to date)")
        }
    }
}

/// Decides whether an update is needed.
pub struct VersionResolver;

impl VersionResolver {
    /// Compare a local tag (if any) against a remote tag.
    ///
    /// - equal tags → not available
    /// - remote newer → available
    /// - local newer → not available (no downgrades)
    /// - no local tag → available
    ///
    /// # Errors
    ///
    /// Returns a validation error if either tag is malformed.
    pub fn check(local: Option<&str>, remote: &str) -> Result<VersionCheck, UpdateError> {
        let current = local.map(VersionTag::parse).transpose()?;
        let remote = VersionTag::parse(remote)?;
        Ok(Self::compare(current, remote))
    }

    /// Same as [`check`](Self::check) for already-parsed tags.
    #[must_use]
    pub fn compare(current: Option<VersionTag>, remote: VersionTag) -> VersionCheck {
        let update_available = current.as_ref().is_none_or(|c| remote > *c);
        VersionCheck {
            current,
            remote,
            update_available,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ErrorKind;

    #[test]
    fn test_newer_remote_is_available() {
        let check = VersionResolver::check(Some("1.2.0"), "1.3.0").unwrap();
        assert!(check.update_available);
        assert_eq!(check.current.unwrap().to_string(), "1.2.0");
        assert_eq!(check.remote.to_string(), "1.3.0");
    }

    #[test]
    fn test_equal_tags_not_available() {
        let check = VersionResolver::check(Some("1.3.0"), "v1.3.0\n").unwrap();
        assert!(!check.update_available);
    }

    #[test]
    fn test_local_newer_is_not_a_downgrade() {
        let check = VersionResolver::check(Some("2.0.0"), "1.9.9").unwrap();
        assert!(!check.update_available);
    }

    #[test]
    fn test_numeric_component_ordering() {
        // 1.10.0 > 1.9.0 numerically even though "1.10.0" < "1.9.0" as strings
        let check = VersionResolver::check(Some("1.9.0"), "1.10.0").unwrap();
        assert!(check.update_available);
    }

    #[test]
    fn test_suffixes_do_not_affect_comparison() {
        let check = VersionResolver::check(Some("1.2.0"), "1.2.0+build.7").unwrap();
        assert!(!check.update_available);

        let check = VersionResolver::check(Some("1.2.0-rc.1"), "1.2.0").unwrap();
        assert!(!check.update_available);

        assert_eq!(VersionTag::parse("1.2.0+x").unwrap(), VersionTag::parse("1.2.0").unwrap());
        assert!(VersionResolver::check(Some("1.2.0+x"), "1.2.1").unwrap().update_available);
    }

    #[test]
    fn test_missing_local_marker_means_available() {
        let check = VersionResolver::check(None, "0.1.0").unwrap();
        assert!(check.update_available);
        assert!(check.current.is_none());
    }

    #[test]
    fn test_two_component_tag_is_padded() {
        assert_eq!(VersionTag::parse("1.2").unwrap().to_string(), "1.2.0");
    }

    #[test]
    fn test_malformed_tag_is_validation_error() {
        for bad in ["", "   ", "abc", "1.x.3", "1"] {
            let err = VersionTag::parse(bad).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Validation, "tag {bad:?}");
            assert_eq!(err.step(), UpdateState::CheckingVersion);
        }

        let err = VersionResolver::check(Some("1.0.0"), "garbage").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[test]
    fn test_version_check_serializes_with_external_names() {
        let check = VersionResolver::check(Some("1.2.0"), "1.3.0").unwrap();
        let json = serde_json::to_value(&check).unwrap();
        assert_eq!(json["current_version"], "1.2.0");
        assert_eq!(json["remote_version"], "1.3.0");
        assert_eq!(json["update_available"], true);
    }

    #[test]
    fn test_summary_formatting() {
        let check = VersionResolver::check(Some("1.0.0"), "1.0.0").unwrap();
        assert_eq!(check.summary(), "Current version: 1.0.0 (up to date)");

        let check = VersionResolver::check(Some("1.0.0"), "1.1.0").unwrap();
        assert_eq!(check.summary(), "Current version: 1.0.0\nLatest version:  1.1.0 (update available)");
    }
}
