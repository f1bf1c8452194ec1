// Copyright 2025 Crrow
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Human readable byte sizes, e.g. `8KiB` or `16MB`.
//!
//! Units are binary: `KB`, `KiB` and `K` all mean 1024 bytes.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Deserializer, Serialize, Serializer, de};
use snafu::{OptionExt, ResultExt, Snafu};

const KIB: u64 = 1024;
const MIB: u64 = KIB * 1024;
const GIB: u64 = MIB * 1024;

#[derive(Debug, Snafu)]
pub enum ParseSizeError {
    #[snafu(display("Empty size string"))]
    Empty,

    #[snafu(display("Invalid size number in {input:?}: {source}"))]
    Number {
        input:  String,
        source: std::num::ParseIntError,
    },

    #[snafu(display("Unknown size unit {unit:?}"))]
    Unit { unit: String },

    #[snafu(display("Size {input:?} overflows u64"))]
    Overflow { input: String },
}

/// A byte count that reads and prints with binary units.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Default,
    derive_more::From,
    derive_more::Into,
)]
pub struct ReadableSize(pub u64);

impl ReadableSize {
    #[must_use]
    pub const fn kb(count: u64) -> Self { Self(count * KIB) }

    #[must_use]
    pub const fn mb(count: u64) -> Self { Self(count * MIB) }

    #[must_use]
    pub const fn gb(count: u64) -> Self { Self(count * GIB) }

    #[must_use]
    pub const fn as_bytes(self) -> u64 { self.0 }

    /// Size as `usize`, saturating on 32-bit targets.
    #[must_use]
    pub fn as_usize(self) -> usize { usize::try_from(self.0).unwrap_or(usize::MAX) }
}

impl fmt::Display for ReadableSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let bytes = self.0;
        if bytes == 0 {
            write!(f, "0B")
        } else if bytes % GIB == 0 {
            write!(f, "{}GiB", bytes / GIB)
        } else if bytes % MIB == 0 {
            write!(f, "{}MiB", bytes / MIB)
        } else if bytes % KIB == 0 {
            write!(f, "{}KiB", bytes / KIB)
        } else {
            write!(f, "{bytes}B")
        }
    }
}

impl FromStr for ReadableSize {
    type Err = ParseSizeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let input = s.trim();
        snafu::ensure!(!input.is_empty(), EmptySnafu);

        let split = input
            .find(|c: char| !c.is_ascii_digit())
            .unwrap_or(input.len());
        let (number, unit) = input.split_at(split);
        let number: u64 = number.parse().context(NumberSnafu { input })?;

        let multiplier = match unit.trim().to_ascii_lowercase().as_str() {
            "" | "b" => 1,
            "k" | "kb" | "kib" => KIB,
            "m" | "mb" | "mib" => MIB,
            "g" | "gb" | "gib" => GIB,
            other => return UnitSnafu { unit: other }.fail(),
        };

        number
            .checked_mul(multiplier)
            .map(Self)
            .context(OverflowSnafu { input })
    }
}

impl Serialize for ReadableSize {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ReadableSize {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Bytes(u64),
            Text(String),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Bytes(bytes) => Ok(Self(bytes)),
            Raw::Text(text) => text.parse().map_err(de::Error::custom),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_binary_units() {
        assert_eq!("8KiB".parse::<ReadableSize>().unwrap(), ReadableSize::kb(8));
        assert_eq!("8kb".parse::<ReadableSize>().unwrap(), ReadableSize::kb(8));
        assert_eq!("16M".parse::<ReadableSize>().unwrap(), ReadableSize::mb(16));
        assert_eq!(" 2 GiB ".parse::<ReadableSize>().unwrap(), ReadableSize::gb(2));
        assert_eq!("512".parse::<ReadableSize>().unwrap(), ReadableSize(512));
    }

    #[test]
    fn rejects_garbage() {
        assert!("".parse::<ReadableSize>().is_err());
        assert!("KiB".parse::<ReadableSize>().is_err());
        assert!("12parsecs".parse::<ReadableSize>().is_err());
        assert!("99999999999999999999G".parse::<ReadableSize>().is_err());
    }

    #[test]
    fn displays_largest_whole_unit() {
        assert_eq!(ReadableSize::kb(8).to_string(), "8KiB");
        assert_eq!(ReadableSize::mb(1024).to_string(), "1GiB");
        assert_eq!(ReadableSize(1500).to_string(), "1500B");
    }

    #[test]
    fn deserializes_from_number_or_string() {
        let from_str: ReadableSize = serde_json::from_str("\"4KiB\"").unwrap();
        let from_num: ReadableSize = serde_json::from_str("4096").unwrap();
        assert_eq!(from_str, from_num);
    }
}
