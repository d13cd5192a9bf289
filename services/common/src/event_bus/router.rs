//! Topic pattern matching for the bus

use super::{BusResult, EventBusError};
use crate::constants::TOPIC_WILDCARD;
use std::fmt;

/// Parsed subscription pattern
///
/// Supported forms are an exact topic, `*`, `prefix*` and `*suffix`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TopicPattern {
    /// Every topic
    Any,
    /// Topics starting with the prefix
    Prefix(String),
    /// Topics ending with the suffix
    Suffix(String),
    /// One topic
    Exact(String),
}

impl TopicPattern {
    /// Parse a pattern string
    pub fn parse(pattern: &str) -> BusResult<Self> {
        let wildcards = pattern.matches(TOPIC_WILDCARD).count();
        if pattern.is_empty() {
            return Err(EventBusError::InvalidPattern(pattern.to_string()));
        }

        match wildcards {
            0 => Ok(Self::Exact(pattern.to_string())),
            1 if pattern.len() == 1 => Ok(Self::Any),
            1 if pattern.ends_with(TOPIC_WILDCARD) => {
                Ok(Self::Prefix(pattern[..pattern.len() - 1].to_string()))
            }
            1 if pattern.starts_with(TOPIC_WILDCARD) => Ok(Self::Suffix(pattern[1..].to_string())),
            _ => Err(EventBusError::InvalidPattern(pattern.to_string())),
        }
    }

    /// Check if a topic matches this pattern
    #[must_use]
    pub fn matches(&self, topic: &str) -> bool {
        match self {
            Self::Any => true,
            Self::Prefix(prefix) => topic.starts_with(prefix.as_str()),
            Self::Suffix(suffix) => topic.ends_with(suffix.as_str()),
            Self::Exact(exact) => topic == exact,
        }
    }

    /// Whether this pattern names a single topic
    #[must_use]
    pub const fn is_exact(&self) -> bool {
        matches!(self, Self::Exact(_))
    }
}

impl fmt::Display for TopicPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Any => write!(f, "{TOPIC_WILDCARD}"),
            Self::Prefix(prefix) => write!(f, "{prefix}{TOPIC_WILDCARD}"),
            Self::Suffix(suffix) => write!(f, "{TOPIC_WILDCARD}{suffix}"),
            Self::Exact(exact) => f.write_str(exact),
        }
    }
}
