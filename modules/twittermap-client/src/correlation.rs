//! Correlation keys: which issued request an inbound frame answers.
//!
//! On the wire a key reads `<tag>:<generation>`, e.g. `partial:7`. A bare
//! tag is still accepted and read as "current generation".

use std::fmt;

/// The three mutually exclusive batch shapes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BatchShape {
    /// Nothing cached: time series, geo aggregate over the full set, hashtags.
    Full,
    /// Everything cached: time series and hashtags only.
    NoneCached,
    /// Some ids cached: geo aggregate over the missing subset only.
    Partial,
}

/// One component of a batch response, in wire order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Component {
    TimeSeries,
    GeoAggregate,
    Hashtags,
}

const WITH_GEO: &[Component] = &[
    Component::TimeSeries,
    Component::GeoAggregate,
    Component::Hashtags,
];
const WITHOUT_GEO: &[Component] = &[Component::TimeSeries, Component::Hashtags];

impl BatchShape {
    pub fn tag(&self) -> &'static str {
        match self {
            BatchShape::Full => "full",
            BatchShape::NoneCached => "none-cached",
            BatchShape::Partial => "partial",
        }
    }

    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "full" => Some(BatchShape::Full),
            "none-cached" => Some(BatchShape::NoneCached),
            "partial" => Some(BatchShape::Partial),
            _ => None,
        }
    }

    /// Expected components of a data payload, in order.
    pub fn components(&self) -> &'static [Component] {
        match self {
            BatchShape::Full | BatchShape::Partial => WITH_GEO,
            BatchShape::NoneCached => WITHOUT_GEO,
        }
    }

    pub fn fetches_geo(&self) -> bool {
        !matches!(self, BatchShape::NoneCached)
    }
}

impl fmt::Display for BatchShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyKind {
    Batch(BatchShape),
    Sample,
}

impl KeyKind {
    fn tag(&self) -> &'static str {
        match self {
            KeyKind::Batch(shape) => shape.tag(),
            KeyKind::Sample => "sample",
        }
    }
}

/// Key attached to an outbound request and echoed on its responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CorrelationKey {
    pub kind: KeyKind,
    pub generation: u64,
}

impl CorrelationKey {
    pub fn batch(shape: BatchShape, generation: u64) -> Self {
        Self {
            kind: KeyKind::Batch(shape),
            generation,
        }
    }

    pub fn sample(generation: u64) -> Self {
        Self {
            kind: KeyKind::Sample,
            generation,
        }
    }
}

impl fmt::Display for CorrelationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind.tag(), self.generation)
    }
}

/// Decode an inbound key into its kind and (if present) generation.
/// Returns `None` for keys that are not request keys at all.
pub fn decode_key(raw: &str) -> Option<(KeyKind, Option<u64>)> {
    let (tag, generation) = match raw.split_once(':') {
        Some((tag, generation)) => (tag, Some(generation.parse::<u64>().ok()?)),
        None => (raw, None),
    };

    let kind = match tag {
        "sample" => KeyKind::Sample,
        other => KeyKind::Batch(BatchShape::from_tag(other)?),
    };
    Some((kind, generation))
}
