//! Topic filter parsing and wildcard matching
//!
//! Filters are parsed once into an immutable sequence of [`Segment`]s, so
//! matching an inbound topic is a structural walk over two slices instead of
//! character scanning.
//!
//! Matching follows the MQTT rules:
//! - `+` matches exactly one level (an empty level included) and must fill a
//!   whole level
//! - `#` matches zero or more trailing levels and must be the last level, so
//!   `sport/#` also matches `sport`
//! - topics starting with `$` are only matched by filters starting with `$`

use std::fmt;
use thiserror::Error;

const LEVEL_SEPARATOR: char = '/';
const SINGLE_LEVEL_WILDCARD: &str = "+";
const MULTI_LEVEL_WILDCARD: &str = "#";
const RESERVED_PREFIX: char = '$';

/// Filter and topic validation errors
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TopicError {
    #[error("Topic filter cannot be empty")]
    EmptyFilter,
    #[error("Topic cannot be empty")]
    EmptyTopic,
    #[error("Multi-level wildcard '#' must be the last level of '{0}'")]
    MultiLevelNotLast(String),
    #[error("Wildcard must occupy an entire level, found '{level}' in '{filter}'")]
    EmbeddedWildcard { filter: String, level: String },
    #[error("Topic '{0}' must not contain wildcard characters")]
    WildcardInTopic(String),
}

/// One level of a parsed topic filter
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    /// Must equal the topic level exactly
    Literal(String),
    /// `+`
    SingleLevel,
    /// `#`, always the final segment
    MultiLevel,
}

/// A validated subscription filter
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicFilter {
    raw: String,
    segments: Vec<Segment>,
}

impl TopicFilter {
    /// Parse and validate a filter string
    pub fn parse(filter: &str) -> Result<Self, TopicError> {
        if filter.is_empty() {
            return Err(TopicError::EmptyFilter);
        }

        let levels: Vec<&str> = filter.split(LEVEL_SEPARATOR).collect();
        let last = levels.len() - 1;
        let mut segments = Vec::with_capacity(levels.len());

        for (index, level) in levels.into_iter().enumerate() {
            let segment = match level {
                SINGLE_LEVEL_WILDCARD => Segment::SingleLevel,
                MULTI_LEVEL_WILDCARD if index == last => Segment::MultiLevel,
                MULTI_LEVEL_WILDCARD => {
                    return Err(TopicError::MultiLevelNotLast(filter.to_string()));
                }
                literal if contains_wildcard(literal) => {
                    return Err(TopicError::EmbeddedWildcard {
                        filter: filter.to_string(),
                        level: literal.to_string(),
                    });
                }
                literal => Segment::Literal(literal.to_string()),
            };
            segments.push(segment);
        }

        Ok(Self {
            raw: filter.to_string(),
            segments,
        })
    }

    /// Original filter string, as it is sent to the broker
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// True when the filter contains `+` or `#`
    pub fn has_wildcards(&self) -> bool {
        self.segments
            .iter()
            .any(|segment| !matches!(segment, Segment::Literal(_)))
    }

    /// Decide whether a concrete topic is covered by this filter
    pub fn matches(&self, topic: &str) -> bool {
        if topic.is_empty() || contains_wildcard(topic) {
            return false;
        }

        // $-prefixed topics are reserved for the broker and isolated both ways
        if self.raw.starts_with(RESERVED_PREFIX) != topic.starts_with(RESERVED_PREFIX) {
            return false;
        }

        let levels: Vec<&str> = topic.split(LEVEL_SEPARATOR).collect();

        for (index, segment) in self.segments.iter().enumerate() {
            match segment {
                // Zero remaining levels is a match too ("a/#" covers "a")
                Segment::MultiLevel => return true,
                Segment::SingleLevel => {
                    if index >= levels.len() {
                        return false;
                    }
                }
                Segment::Literal(expected) => match levels.get(index) {
                    Some(level) if level == expected => {}
                    _ => return false,
                },
            }
        }

        self.segments.len() == levels.len()
    }
}

impl fmt::Display for TopicFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

/// Match `topic` against `filter`.
///
/// Total over all inputs: invalid filters and empty strings simply do not match.
pub fn matches(filter: &str, topic: &str) -> bool {
    TopicFilter::parse(filter)
        .map(|parsed| parsed.matches(topic))
        .unwrap_or(false)
}

/// Validate a concrete topic used for publishing
pub fn validate_topic(topic: &str) -> Result<(), TopicError> {
    if topic.is_empty() {
        return Err(TopicError::EmptyTopic);
    }
    if contains_wildcard(topic) {
        return Err(TopicError::WildcardInTopic(topic.to_string()));
    }
    Ok(())
}

fn contains_wildcard(value: &str) -> bool {
    value.contains(['+', '#'])
}
