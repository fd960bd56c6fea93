/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

//! A small `Guid` newtype used for request correlation ids and any synthetic
//! record ids the sync core needs to mint. A simplified stand-in for the
//! teacher's `sync-guid` crate: that crate inlines short guids to avoid heap
//! allocation, an optimization this crate has no hot path to justify.

use std::fmt;
use std::ops::Deref;

#[derive(Clone, Eq, PartialEq, Hash, Ord, PartialOrd, Debug)]
pub struct Guid(String);

impl Guid {
    #[cfg(feature = "random")]
    pub fn random() -> Self {
        Guid(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl Deref for Guid {
    type Target = str;
    fn deref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Guid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for Guid {
    fn from(s: String) -> Self {
        Guid(s)
    }
}

impl From<&str> for Guid {
    fn from(s: &str) -> Self {
        Guid(s.to_string())
    }
}

#[cfg(feature = "serde_support")]
mod serde_support {
    use super::Guid;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    impl Serialize for Guid {
        fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
            serializer.serialize_str(&self.0)
        }
    }

    impl<'de> Deserialize<'de> for Guid {
        fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
            Ok(Guid(String::deserialize(deserializer)?))
        }
    }
}
