// Label schema for the api metrics
// The registry fixes label names when a metric is created, so every name an
// observation may carry is declared here once and nothing else is accepted
//
// Numan Thabit 2025 Nov

use crate::errors::{MetricsError, Result};
use std::fmt;

/// Label names shared by every api metric, in declaration order.
pub const LABEL_NAMES: [&str; 5] = [
    "queue_name",
    "user_agent",
    "api_version",
    "state",
    "status_code",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LabelName {
    QueueName,
    UserAgent,
    ApiVersion,
    State,
    StatusCode,
}

impl LabelName {
    pub const ALL: [LabelName; 5] = [
        LabelName::QueueName,
        LabelName::UserAgent,
        LabelName::ApiVersion,
        LabelName::State,
        LabelName::StatusCode,
    ];

    pub fn as_str(self) -> &'static str {
        LABEL_NAMES[self.index()]
    }

    fn index(self) -> usize {
        match self {
            LabelName::QueueName => 0,
            LabelName::UserAgent => 1,
            LabelName::ApiVersion => 2,
            LabelName::State => 3,
            LabelName::StatusCode => 4,
        }
    }

    /// Look up a declared label name.
    pub fn parse(name: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|label| label.as_str() == name)
            .ok_or_else(|| MetricsError::UnknownLabel(name.to_string()))
    }
}

impl fmt::Display for LabelName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Values for every declared label; unset labels are empty strings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LabelSet {
    values: [String; 5],
}

impl LabelSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a set from name/value pairs, failing on the first undeclared name.
    pub fn from_pairs<'a, I>(pairs: I) -> Result<Self>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut set = Self::new();
        for (name, value) in pairs {
            set.set(name, value)?;
        }
        Ok(set)
    }

    pub fn insert(&mut self, name: LabelName, value: impl Into<String>) {
        self.values[name.index()] = value.into();
    }

    /// Set a label by name. Undeclared names are rejected.
    pub fn set(&mut self, name: &str, value: impl Into<String>) -> Result<()> {
        let label = LabelName::parse(name)?;
        self.insert(label, value);
        Ok(())
    }

    pub fn get(&self, name: LabelName) -> &str {
        &self.values[name.index()]
    }

    /// Values in [`LABEL_NAMES`] order, as `with_label_values` expects.
    pub fn values(&self) -> [&str; 5] {
        [
            &self.values[0],
            &self.values[1],
            &self.values[2],
            &self.values[3],
            &self.values[4],
        ]
    }
}
