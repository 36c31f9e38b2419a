//! Strongly typed identifiers shared across the orchestration core.
//!
//! Device and integration identifiers are opaque strings minted by the
//! out-of-process REST layer (KSUIDs in practice). Task identifiers are
//! minted here, one per started polling task, and correlate bus traffic with
//! the owning link.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

macro_rules! string_identifier {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Wrap a raw identifier.
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            /// Borrow the raw identifier.
            pub fn as_str(&self) -> &str {
                self.0.as_str()
            }

            /// Consume the wrapper, returning the raw identifier.
            pub fn into_inner(self) -> String {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                self.0.as_str()
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_owned())
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }
    };
}

string_identifier! {
    /// Identifier of a user-owned device (vehicle).
    DeviceId
}

string_identifier! {
    /// Identifier of an integration (vendor) reference record.
    IntegrationId
}

string_identifier! {
    /// Identifier of the user owning a device.
    UserId
}

string_identifier! {
    /// Correlates bus messages with one started polling task.
    ///
    /// # Examples
    /// ```
    /// use telematics_backend::domain::TaskId;
    ///
    /// let first = TaskId::generate();
    /// let second = TaskId::generate();
    /// assert_ne!(first, second);
    /// ```
    TaskId
}

impl TaskId {
    /// Mint a fresh task identifier.
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    fn identifiers_serialise_transparently() {
        let id = DeviceId::new("2AbCdEf");
        let json = serde_json::to_string(&id).expect("serialise id");
        assert_eq!(json, "\"2AbCdEf\"");
        let back: DeviceId = serde_json::from_str(&json).expect("deserialise id");
        assert_eq!(back, id);
    }

    #[rstest]
    fn generated_task_ids_are_uuids() {
        let task = TaskId::generate();
        assert!(Uuid::parse_str(task.as_str()).is_ok());
    }
}
