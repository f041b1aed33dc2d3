//! # Event Model

use bytes::Bytes;
use serde::Serialize;
use std::fmt;
use std::str::FromStr;

/// Where an event sits in the source log.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Position {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
}

impl Position {
    pub fn new(topic: impl Into<String>, partition: i32, offset: i64) -> Self {
        Self {
            topic: topic.into(),
            partition,
            offset,
        }
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]@{}", self.topic, self.partition, self.offset)
    }
}

/// # Event
///
/// One record pulled from the log. The payload is reference counted, so
/// handing the same event to many subscribers never copies the bytes.
#[derive(Debug, Clone)]
pub struct Event {
    pub payload: Bytes,
    pub position: Position,
}

impl Event {
    pub fn new(payload: impl Into<Bytes>, position: Position) -> Self {
        Self {
            payload: payload.into(),
            position,
        }
    }
}

/// A category of events, selected by a subscriber through the endpoint it
/// connects to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    /// Unmodified passthrough of every routable event.
    Raw,
    /// Validated and normalized transaction records.
    Structured,
}

impl Channel {
    pub const ALL: [Channel; 2] = [Channel::Raw, Channel::Structured];

    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Raw => "raw",
            Channel::Structured => "structured",
        }
    }

    fn bit(self) -> u8 {
        match self {
            Channel::Raw => 0b01,
            Channel::Structured => 0b10,
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Channel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "raw" => Ok(Channel::Raw),
            "structured" => Ok(Channel::Structured),
            other => Err(format!("unknown channel '{}'", other)),
        }
    }
}

/// Small copyable set over the closed `Channel` enum.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChannelSet(u8);

impl ChannelSet {
    pub fn empty() -> Self {
        Self(0)
    }

    pub fn insert(&mut self, channel: Channel) {
        self.0 |= channel.bit();
    }

    pub fn contains(&self, channel: Channel) -> bool {
        self.0 & channel.bit() != 0
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    pub fn len(&self) -> usize {
        self.0.count_ones() as usize
    }

    pub fn iter(&self) -> impl Iterator<Item = Channel> + '_ {
        Channel::ALL.into_iter().filter(move |c| self.contains(*c))
    }
}

impl FromIterator<Channel> for ChannelSet {
    fn from_iter<I: IntoIterator<Item = Channel>>(iter: I) -> Self {
        let mut set = ChannelSet::empty();
        for channel in iter {
            set.insert(channel);
        }
        set
    }
}
