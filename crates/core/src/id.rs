//! Strongly-typed identifiers for persisted queue records.

use core::str::FromStr;
use serde::{Deserialize, Serialize};

use crate::error::QueueError;

/// Identifier of a job row.
///
/// Assigned monotonically by the store; ascending order is the FIFO order.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(i64);

/// Identifier of a worker row.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkerId(i64);

macro_rules! impl_serial_newtype {
    ($t:ty, $name:literal) => {
        impl $t {
            pub fn new(value: i64) -> Self {
                Self(value)
            }

            pub fn get(&self) -> i64 {
                self.0
            }
        }

        impl core::fmt::Display for $t {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                core::fmt::Display::fmt(&self.0, f)
            }
        }

        impl From<i64> for $t {
            fn from(value: i64) -> Self {
                Self(value)
            }
        }

        impl From<$t> for i64 {
            fn from(value: $t) -> Self {
                value.0
            }
        }

        impl FromStr for $t {
            type Err = QueueError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let value = s
                    .trim()
                    .trim_start_matches('#')
                    .parse::<i64>()
                    .map_err(|e| QueueError::validation(format!("{}: {}", $name, e)))?;
                Ok(Self(value))
            }
        }
    };
}

impl_serial_newtype!(JobId, "JobId");
impl_serial_newtype!(WorkerId, "WorkerId");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_and_hash_prefixed_ids() {
        assert_eq!("42".parse::<JobId>().unwrap(), JobId::new(42));
        assert_eq!("#7".parse::<WorkerId>().unwrap(), WorkerId::new(7));
        assert!(matches!(
            "abc".parse::<JobId>(),
            Err(QueueError::Validation(_))
        ));
    }

    #[test]
    fn ids_order_numerically() {
        assert!(JobId::new(2) < JobId::new(10));
    }
}
