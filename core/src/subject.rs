//! Subject identity: the `(kind, id)` pair that events and projections are about.
//!
//! A subject ID is a single opaque string of the form `"<kind>:<local-id>"`
//! (e.g. `"link:3f2a9c8e1b0d4f56"`). The kind prefix is always recoverable
//! from the ID itself, so most code only needs to carry a `SubjectId`.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// The kind of entity a subject identifies.
///
/// New subject kinds are added here as the capture surface grows; the
/// router's dispatch table and the materializer's handler table both match
/// on this enum, so adding a kind is a compile-time-checked change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubjectKind {
    /// A captured link (URL).
    Link,
    /// A sensor/temperature reading stream.
    Sensor,
    /// A todo item.
    Todo,
    /// An annotation (quote or note) attached to a link.
    Annotation,
}

impl SubjectKind {
    /// The lowercase prefix used in subject IDs (`"link"`, `"sensor"`,
    /// `"todo"`, `"annotation"`).
    #[must_use]
    pub const fn prefix(self) -> &'static str {
        match self {
            Self::Link => "link",
            Self::Sensor => "sensor",
            Self::Todo => "todo",
            Self::Annotation => "annotation",
        }
    }
}

impl fmt::Display for SubjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.prefix())
    }
}

impl FromStr for SubjectKind {
    type Err = ParseSubjectKindError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "link" => Ok(Self::Link),
            "sensor" => Ok(Self::Sensor),
            "todo" => Ok(Self::Todo),
            "annotation" => Ok(Self::Annotation),
            other => Err(ParseSubjectKindError(other.to_string())),
        }
    }
}

/// Error returned when a subject kind prefix is not recognized.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown subject kind: {0}")]
pub struct ParseSubjectKindError(String);

/// Error returned when a subject ID string is malformed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseSubjectIdError {
    /// The ID had no `kind:` prefix at all.
    #[error("subject id missing '<kind>:' prefix: {0}")]
    MissingPrefix(String),
    /// The prefix was present but not a known subject kind.
    #[error(transparent)]
    UnknownKind(#[from] ParseSubjectKindError),
    /// The local ID portion (after the prefix) was empty.
    #[error("subject id has empty local id: {0}")]
    EmptyLocalId(String),
}

/// A subject identifier: `"<kind>:<local-id>"`.
///
/// # Examples
///
/// ```
/// use lifestream_core::subject::{SubjectId, SubjectKind};
///
/// let id: SubjectId = "link:3f2a9c8e1b0d4f56".parse().unwrap();
/// assert_eq!(id.kind(), SubjectKind::Link);
/// assert_eq!(id.as_str(), "link:3f2a9c8e1b0d4f56");
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SubjectId(String);

impl SubjectId {
    /// Build a subject ID from a kind and a local identifier, without
    /// re-validating the local ID's shape. Use this when the local ID was
    /// already computed by a trusted identity function (e.g.
    /// [`crate::identity::subject_id_for_url`]).
    #[must_use]
    pub fn new(kind: SubjectKind, local_id: impl fmt::Display) -> Self {
        Self(format!("{}:{local_id}", kind.prefix()))
    }

    /// The full `"<kind>:<local-id>"` string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The subject's kind, parsed from its prefix.
    ///
    /// # Panics
    ///
    /// Never panics for a `SubjectId` constructed via [`Self::new`] or
    /// [`FromStr`]; both guarantee a recognized kind prefix.
    #[must_use]
    pub fn kind(&self) -> SubjectKind {
        self.0
            .split_once(':')
            .and_then(|(prefix, _)| prefix.parse().ok())
            .expect("SubjectId invariant: always has a valid kind prefix")
    }

    /// The local ID portion, without the kind prefix.
    #[must_use]
    pub fn local_id(&self) -> &str {
        self.0.split_once(':').map_or("", |(_, rest)| rest)
    }
}

impl fmt::Display for SubjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for SubjectId {
    type Err = ParseSubjectIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let Some((prefix, local_id)) = s.split_once(':') else {
            return Err(ParseSubjectIdError::MissingPrefix(s.to_string()));
        };
        let _kind: SubjectKind = prefix.parse()?;
        if local_id.is_empty() {
            return Err(ParseSubjectIdError::EmptyLocalId(s.to_string()));
        }
        Ok(Self(s.to_string()))
    }
}

impl AsRef<str> for SubjectId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_formats_kind_and_local_id() {
        let id = SubjectId::new(SubjectKind::Link, "abc123");
        assert_eq!(id.as_str(), "link:abc123");
        assert_eq!(id.kind(), SubjectKind::Link);
        assert_eq!(id.local_id(), "abc123");
    }

    #[test]
    fn parse_rejects_missing_prefix() {
        assert!(matches!(
            "abc123".parse::<SubjectId>(),
            Err(ParseSubjectIdError::MissingPrefix(_))
        ));
    }

    #[test]
    fn parse_rejects_unknown_kind() {
        assert!(matches!(
            "widget:abc".parse::<SubjectId>(),
            Err(ParseSubjectIdError::UnknownKind(_))
        ));
    }

    #[test]
    fn parse_rejects_empty_local_id() {
        assert!(matches!(
            "link:".parse::<SubjectId>(),
            Err(ParseSubjectIdError::EmptyLocalId(_))
        ));
    }

    #[test]
    fn display_roundtrips_through_parse() {
        let id = SubjectId::new(SubjectKind::Sensor, "living-room");
        let parsed: SubjectId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
    }
}
