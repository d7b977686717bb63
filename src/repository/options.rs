//! Typed parameters accepted by the repository.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use mongodb::bson::{Bson, Document};

use super::error::RepositoryError;

/// Direction of a sort key or index key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SortOrder {
    #[default]
    Ascending,
    Descending,
}

impl SortOrder {
    pub fn as_i32(&self) -> i32 {
        match self {
            SortOrder::Ascending => 1,
            SortOrder::Descending => -1,
        }
    }

    /// Build a `{field: 1 | -1}` document from ordered pairs.
    pub fn to_document<S: AsRef<str>>(keys: &[(S, SortOrder)]) -> Document {
        let mut doc = Document::new();
        for (field, order) in keys {
            doc.insert(field.as_ref(), Bson::Int32(order.as_i32()));
        }
        doc
    }
}

impl TryFrom<i64> for SortOrder {
    type Error = RepositoryError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(SortOrder::Ascending),
            -1 => Ok(SortOrder::Descending),
            other => Err(RepositoryError::InvalidDirection(other.to_string())),
        }
    }
}

impl TryFrom<i32> for SortOrder {
    type Error = RepositoryError;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        SortOrder::try_from(value as i64)
    }
}

impl FromStr for SortOrder {
    type Err = RepositoryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "asc" | "ascending" => Ok(SortOrder::Ascending),
            "desc" | "descending" => Ok(SortOrder::Descending),
            other => {
                let n: i64 = other
                    .parse()
                    .map_err(|_| RepositoryError::InvalidDirection(s.to_string()))?;
                SortOrder::try_from(n)
            }
        }
    }
}

/// Unit of a TTL index lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimeUnit {
    Seconds,
    Minutes,
    Hours,
    Days,
}

impl TimeUnit {
    /// Length of one unit.
    pub fn duration(&self) -> Duration {
        match self {
            TimeUnit::Seconds => Duration::from_secs(1),
            TimeUnit::Minutes => Duration::from_secs(60),
            TimeUnit::Hours => Duration::from_secs(60 * 60),
            TimeUnit::Days => Duration::from_secs(24 * 60 * 60),
        }
    }

    /// `amount` units as a duration, saturating on overflow.
    pub fn times(&self, amount: u64) -> Duration {
        Duration::from_secs(self.duration().as_secs().saturating_mul(amount))
    }
}

impl FromStr for TimeUnit {
    type Err = RepositoryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "seconds" => Ok(TimeUnit::Seconds),
            "minutes" => Ok(TimeUnit::Minutes),
            "hours" => Ok(TimeUnit::Hours),
            "days" => Ok(TimeUnit::Days),
            _ => Err(RepositoryError::InvalidTimeUnit(s.to_string())),
        }
    }
}

/// Update operator applied to a set of properties.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum UpdateOperator {
    #[default]
    Set,
    Unset,
    Inc,
}

impl UpdateOperator {
    pub fn as_str(&self) -> &'static str {
        match self {
            UpdateOperator::Set => "$set",
            UpdateOperator::Unset => "$unset",
            UpdateOperator::Inc => "$inc",
        }
    }

    /// Wrap properties as `{operator: properties}`.
    pub fn wrap(&self, properties: Document) -> Document {
        let mut update = Document::new();
        update.insert(self.as_str(), properties);
        update
    }
}

impl fmt::Display for UpdateOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for UpdateOperator {
    type Err = RepositoryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "$set" | "set" => Ok(UpdateOperator::Set),
            "$unset" | "unset" => Ok(UpdateOperator::Unset),
            "$inc" | "inc" => Ok(UpdateOperator::Inc),
            other => Err(RepositoryError::InvalidUpdateOperator(other.to_string())),
        }
    }
}
