//! Topic offset specification parsing.
//!
//! Each requested topic is given as one string in the grammar
//!
//! ```text
//! topic
//! topic@offset
//! topic@partition:offset[,partition:offset...]
//! ```
//!
//! where `offset` is a non-negative integer or one of the named sentinels
//! (`earliest`, `latest` and their aliases).

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Sentinel offset for the start of a partition's log.
pub const EARLIEST_OFFSET: i64 = -2;

/// Sentinel offset for the end of a partition's log.
pub const LATEST_OFFSET: i64 = -1;

/// Where to start reading a partition when no concrete offset was given.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StartOffset {
    Earliest,
    #[default]
    Latest,
}

impl StartOffset {
    /// The sentinel offset value for this position.
    pub fn sentinel(self) -> i64 {
        match self {
            StartOffset::Earliest => EARLIEST_OFFSET,
            StartOffset::Latest => LATEST_OFFSET,
        }
    }
}

/// Starting offset policy for one topic.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "offsets")]
pub enum TopicOffsetPolicy {
    /// No offset given; the cluster default applies at assignment time.
    #[default]
    Default,
    /// One offset for every partition of the topic.
    Global(i64),
    /// Explicit offsets for some partitions; the rest use the default.
    PerPartition(BTreeMap<i32, i64>),
}

impl TopicOffsetPolicy {
    /// Offset this policy names for `partition`, if any.
    pub fn offset_of(&self, partition: i32) -> Option<i64> {
        match self {
            TopicOffsetPolicy::Default => None,
            TopicOffsetPolicy::Global(offset) => Some(*offset),
            TopicOffsetPolicy::PerPartition(offsets) => offsets.get(&partition).copied(),
        }
    }
}

impl fmt::Display for TopicOffsetPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TopicOffsetPolicy::Default => Ok(()),
            TopicOffsetPolicy::Global(offset) => write!(f, "@{}", offset),
            TopicOffsetPolicy::PerPartition(offsets) => {
                f.write_str("@")?;
                for (i, (partition, offset)) in offsets.iter().enumerate() {
                    if i > 0 {
                        f.write_str(",")?;
                    }
                    write!(f, "{}:{}", partition, offset)?;
                }
                Ok(())
            }
        }
    }
}

/// A parsed topic specification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TopicSpec {
    pub topic: String,
    pub policy: TopicOffsetPolicy,
}

impl FromStr for TopicSpec {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        parse_topic_spec(s)
    }
}

impl fmt::Display for TopicSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.topic, self.policy)
    }
}

/// The ordered, duplicate-free set of requested topics and their policies.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TopicSpecSet {
    specs: IndexMap<String, TopicOffsetPolicy>,
}

impl TopicSpecSet {
    /// Parse every spec, rejecting malformed ones and duplicate topics.
    pub fn parse<I, S>(specs: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut set = IndexMap::new();
        for raw in specs {
            let spec = parse_topic_spec(raw.as_ref())?;
            if set.contains_key(&spec.topic) {
                return Err(Error::DuplicateTopic(spec.topic));
            }
            set.insert(spec.topic, spec.policy);
        }
        Ok(Self { specs: set })
    }

    /// Requested topic names in request order.
    pub fn topic_names(&self) -> Vec<String> {
        self.specs.keys().cloned().collect()
    }

    /// Policy for `topic`; unknown topics get the default policy.
    pub fn policy(&self, topic: &str) -> &TopicOffsetPolicy {
        static DEFAULT: TopicOffsetPolicy = TopicOffsetPolicy::Default;
        self.specs.get(topic).unwrap_or(&DEFAULT)
    }

    pub fn contains(&self, topic: &str) -> bool {
        self.specs.contains_key(topic)
    }

    pub fn len(&self) -> usize {
        self.specs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &TopicOffsetPolicy)> {
        self.specs.iter().map(|(topic, policy)| (topic.as_str(), policy))
    }

    /// Render every spec back to its textual form.
    pub fn to_specs(&self) -> Vec<String> {
        self.iter()
            .map(|(topic, policy)| format!("{}{}", topic, policy))
            .collect()
    }
}

/// Parse a single topic specification.
pub fn parse_topic_spec(raw: &str) -> Result<TopicSpec> {
    let spec = raw.trim();

    let (topic, suffix) = match spec.split_once('@') {
        Some((topic, suffix)) => (topic.trim(), Some(suffix.trim())),
        None => (spec, None),
    };

    if topic.is_empty() {
        return Err(format_error(spec, "topic name is empty"));
    }

    let policy = match suffix {
        None => TopicOffsetPolicy::Default,
        Some("") => return Err(format_error("", "offset is empty")),
        Some(suffix) if suffix.contains(':') || suffix.contains(',') => {
            TopicOffsetPolicy::PerPartition(parse_partition_offsets(suffix)?)
        }
        Some(suffix) => TopicOffsetPolicy::Global(parse_offset(suffix)?),
    };

    Ok(TopicSpec {
        topic: topic.to_string(),
        policy,
    })
}

fn parse_partition_offsets(suffix: &str) -> Result<BTreeMap<i32, i64>> {
    let mut offsets = BTreeMap::new();

    for pair in suffix.split(',') {
        let pair = pair.trim();
        let parts: Vec<&str> = pair.split(':').collect();
        if parts.len() != 2 {
            return Err(format_error(pair, "expected partition:offset"));
        }

        let partition = parse_partition(parts[0].trim())?;
        let offset = parse_offset(parts[1].trim())?;

        if offsets.insert(partition, offset).is_some() {
            return Err(format_error(pair, "partition listed more than once"));
        }
    }

    Ok(offsets)
}

fn parse_partition(token: &str) -> Result<i32> {
    let partition: i32 = token
        .parse()
        .map_err(|_| format_error(token, "partition is not a 32-bit integer"))?;
    if partition < 0 {
        return Err(format_error(token, "partition must be non-negative"));
    }
    Ok(partition)
}

fn parse_offset(token: &str) -> Result<i64> {
    match token.to_ascii_lowercase().as_str() {
        "earliest" | "beginning" | "start" | "from-beginning" | "from-start" => {
            return Ok(EARLIEST_OFFSET)
        }
        "latest" | "end" | "from-end" | "from-latest" => return Ok(LATEST_OFFSET),
        _ => {}
    }

    let offset: i64 = token
        .parse()
        .map_err(|_| format_error(token, "offset is not a 64-bit integer"))?;
    if offset < EARLIEST_OFFSET {
        return Err(format_error(
            token,
            "offset must be non-negative, -1 (latest) or -2 (earliest)",
        ));
    }
    Ok(offset)
}

fn format_error(token: &str, reason: &str) -> Error {
    Error::Format {
        token: token.to_string(),
        reason: reason.to_string(),
    }
}
