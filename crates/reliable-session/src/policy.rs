//! Response acceptance and replay policies.

use crate::SessionError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::ops::RangeInclusive;
use std::str::FromStr;

/// Status codes treated as a successful delivery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AcceptableStatusCodes(BTreeSet<u16>);

impl AcceptableStatusCodes {
    pub fn from_range(range: RangeInclusive<u16>) -> Self {
        Self(range.collect())
    }

    pub fn contains(&self, status: u16) -> bool {
        self.0.contains(&status)
    }

    pub fn insert(&mut self, status: u16) -> bool {
        self.0.insert(status)
    }

    pub fn remove(&mut self, status: u16) -> bool {
        self.0.remove(&status)
    }

    pub fn iter(&self) -> impl Iterator<Item = u16> + '_ {
        self.0.iter().copied()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Default for AcceptableStatusCodes {
    fn default() -> Self {
        Self::from_range(200..=299)
    }
}

impl FromIterator<u16> for AcceptableStatusCodes {
    fn from_iter<I: IntoIterator<Item = u16>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// What a drain does with a package whose replay failed again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequeuePolicy {
    /// Re-append at the tail and keep draining.
    #[default]
    Tail,
    /// Leave the package at the head and stop the drain.
    InPlace,
}

impl FromStr for RequeuePolicy {
    type Err = SessionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('-', "_").as_str() {
            "tail" => Ok(Self::Tail),
            "in_place" | "inplace" => Ok(Self::InPlace),
            other => Err(SessionError::Config(format!(
                "unknown requeue policy '{other}' (expected tail or in-place)"
            ))),
        }
    }
}

impl fmt::Display for RequeuePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tail => f.write_str("tail"),
            Self::InPlace => f.write_str("in-place"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_accepts_2xx() {
        let codes = AcceptableStatusCodes::default();
        assert!(codes.contains(200));
        assert!(codes.contains(201));
        assert!(codes.contains(299));
        assert!(!codes.contains(199));
        assert!(!codes.contains(300));
        assert!(!codes.contains(404));
        assert_eq!(codes.len(), 100);
    }

    #[test]
    fn test_custom_codes() {
        let mut codes: AcceptableStatusCodes = [200, 204].into_iter().collect();
        assert!(!codes.contains(201));
        codes.insert(409);
        assert!(codes.contains(409));
        assert!(codes.remove(204));
        assert_eq!(codes.iter().collect::<Vec<_>>(), vec![200, 409]);
    }

    #[test]
    fn test_requeue_policy_parse() {
        assert_eq!("tail".parse::<RequeuePolicy>().unwrap(), RequeuePolicy::Tail);
        assert_eq!("in-place".parse::<RequeuePolicy>().unwrap(), RequeuePolicy::InPlace);
        assert_eq!("IN_PLACE".parse::<RequeuePolicy>().unwrap(), RequeuePolicy::InPlace);
        assert!("head".parse::<RequeuePolicy>().is_err());
        assert_eq!(RequeuePolicy::InPlace.to_string(), "in-place");
    }
}
