// Copyright 2026 Daniel Pelikan
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Hardware addresses and remote endpoints.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

use crate::error::SppError;

/// Placeholder shown for peers that do not report a name.
pub const UNNAMED: &str = "unnamed";

/// Six-byte Bluetooth hardware address, e.g. `00:16:38:3A:3B:A8`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Address(pub [u8; 6]);

impl Address {
    pub const fn new(bytes: [u8; 6]) -> Self {
        Self(bytes)
    }

    /// The all-zero address.
    pub const fn any() -> Self {
        Self([0; 6])
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(
            f,
            "{:02X}:{:02X}:{:02X}:{:02X}:{:02X}:{:02X}",
            a, b, c, d, e, g
        )
    }
}

impl FromStr for Address {
    type Err = SppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || SppError::InvalidAddress(s.to_string());

        let mut bytes = [0u8; 6];
        let mut groups = s.split(':');
        for byte in bytes.iter_mut() {
            let group = groups.next().ok_or_else(invalid)?;
            if group.len() != 2 || !group.chars().all(|c| c.is_ascii_hexdigit()) {
                return Err(invalid());
            }
            *byte = u8::from_str_radix(group, 16).map_err(|_| invalid())?;
        }
        if groups.next().is_some() {
            return Err(invalid());
        }

        Ok(Self(bytes))
    }
}

impl Serialize for Address {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(feature = "bluez")]
impl From<bluer::Address> for Address {
    fn from(addr: bluer::Address) -> Self {
        Self(addr.0)
    }
}

#[cfg(feature = "bluez")]
impl From<Address> for bluer::Address {
    fn from(addr: Address) -> Self {
        bluer::Address::new(addr.0)
    }
}

/// A remote peer: stable hardware address plus an optional display name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    pub address: Address,
    pub name: Option<String>,
}

impl Endpoint {
    pub fn new(address: Address) -> Self {
        Self {
            address,
            name: None,
        }
    }

    pub fn with_name(address: Address, name: impl Into<String>) -> Self {
        Self {
            address,
            name: Some(name.into()),
        }
    }

    /// Name to show for this peer, `unnamed` when it reported none.
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(UNNAMED)
    }
}

impl FromStr for Endpoint {
    type Err = SppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::new(s.trim().parse()?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_and_display() {
        let addr: Address = "00:16:38:3a:3b:A8".parse().unwrap();
        assert_eq!(addr.0, [0x00, 0x16, 0x38, 0x3A, 0x3B, 0xA8]);
        assert_eq!(addr.to_string(), "00:16:38:3A:3B:A8");
    }

    #[test]
    fn test_rejects_malformed() {
        for bad in [
            "",
            "00:16:38:3A:3B",
            "00:16:38:3A:3B:A8:00",
            "0:16:38:3A:3B:A8",
            "00-16-38-3A-3B-A8",
            "00:16:38:3A:3B:G8",
            "+0:16:38:3A:3B:A8",
        ] {
            assert!(bad.parse::<Address>().is_err(), "accepted {:?}", bad);
        }
    }

    #[test]
    fn test_display_name_placeholder() {
        let addr = Address::new([1, 2, 3, 4, 5, 6]);
        assert_eq!(Endpoint::new(addr).display_name(), "unnamed");
        assert_eq!(Endpoint::with_name(addr, "Pi").display_name(), "Pi");
    }

    #[test]
    fn test_serde_as_string() {
        let addr: Address = "00:16:38:3A:3B:A8".parse().unwrap();
        let json = serde_json::to_string(&addr).unwrap();
        assert_eq!(json, "\"00:16:38:3A:3B:A8\"");
        let back: Address = serde_json::from_str(&json).unwrap();
        assert_eq!(back, addr);
    }
}
