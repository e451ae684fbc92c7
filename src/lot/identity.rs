use std::collections::VecDeque;
use std::fmt;

use serde::{Deserialize, Serialize};

pub const UNKNOWN_IDENTITY: &str = "Unknown";

/// Identity attached to an occupied spot.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Identity {
    /// Registration plate taken from the pool.
    Plate(String),
    /// The pool was exhausted when the spot became occupied.
    Unknown,
}

impl Identity {
    pub fn plate(&self) -> Option<&str> {
        match self {
            Identity::Plate(plate) => Some(plate),
            Identity::Unknown => None,
        }
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Identity::Plate(plate) => f.write_str(plate),
            Identity::Unknown => f.write_str(UNKNOWN_IDENTITY),
        }
    }
}

/// Finite FIFO queue of registration plates.
///
/// Each plate is handed out at most once for the whole run; once empty, every
/// request yields `Identity::Unknown`.
#[derive(Clone, Debug, Default)]
pub struct IdentityPool {
    plates: VecDeque<String>,
    issued: u64,
}

impl IdentityPool {
    pub fn new<I, S>(plates: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            plates: plates.into_iter().map(Into::into).collect(),
            issued: 0,
        }
    }

    pub fn take(&mut self) -> Identity {
        self.issued += 1;
        match self.plates.pop_front() {
            Some(plate) => Identity::Plate(plate),
            None => Identity::Unknown,
        }
    }

    pub fn remaining(&self) -> usize {
        self.plates.len()
    }

    pub fn is_exhausted(&self) -> bool {
        self.plates.is_empty()
    }

    /// Number of identities handed out so far, `Unknown` included.
    pub fn issued(&self) -> u64 {
        self.issued
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_is_fifo_then_unknown() {
        let mut pool = IdentityPool::new(["P1", "P2"]);
        assert_eq!(pool.take(), Identity::Plate("P1".into()));
        assert_eq!(pool.take(), Identity::Plate("P2".into()));
        assert!(pool.is_exhausted());
        assert_eq!(pool.take(), Identity::Unknown);
        assert_eq!(pool.take(), Identity::Unknown);
        assert_eq!(pool.issued(), 4);
    }

    #[test]
    fn unknown_displays_as_sentinel() {
        assert_eq!(Identity::Unknown.to_string(), "Unknown");
        assert_eq!(Identity::Plate("EL 1111S".into()).to_string(), "EL 1111S");
        assert_eq!(Identity::Unknown.plate(), None);
    }
}
