//! Instruction address ranges, used to decide which PCs get profiled.

use std::{fmt, str::FromStr};

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::config::ConfigError;

/// An address range with inclusive bounds on both ends.
///
/// A range whose `end` is zero is disabled: it places no restriction on
/// anything and [`AddrRange::admits`] accepts every address.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AddrRange {
    pub start: u64,
    pub end: u64,
}

impl AddrRange {
    pub const UNBOUNDED: AddrRange = AddrRange { start: 0, end: 0 };

    pub fn new(start: u64, end: u64) -> Result<Self, ConfigError> {
        let range = Self { start, end };
        range.validate()?;
        Ok(range)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.is_bounded() && self.start > self.end {
            return Err(ConfigError::InvalidRange {
                start: self.start,
                end: self.end,
            });
        }
        Ok(())
    }

    pub fn is_bounded(&self) -> bool {
        self.end > 0
    }

    pub fn contains(&self, address: u64) -> bool {
        address >= self.start && address <= self.end
    }

    /// Like [`AddrRange::contains`], but a disabled range lets everything through.
    pub fn admits(&self, address: u64) -> bool {
        !self.is_bounded() || self.contains(address)
    }
}

impl fmt::Display for AddrRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}-{:#x}", self.start, self.end)
    }
}

/// The digits after a `0x` / `0X` prefix, if there is one.
pub fn strip_hex_prefix(text: &str) -> Option<&str> {
    text.strip_prefix("0x").or_else(|| text.strip_prefix("0X"))
}

/// Parses a single address, hex when prefixed with `0x`, decimal otherwise.
pub fn parse_address(text: &str) -> Result<u64, std::num::ParseIntError> {
    let text = text.trim();
    match strip_hex_prefix(text) {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => text.parse::<u64>(),
    }
}

impl FromStr for AddrRange {
    type Err = ConfigError;

    /// Accepts `START-END` or `START:END`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        lazy_static! {
            static ref RE: Regex =
                Regex::new(r"^\s*(0[xX][0-9a-fA-F]+|[0-9]+)\s*[-:]\s*(0[xX][0-9a-fA-F]+|[0-9]+)\s*$")
                    .unwrap();
        }

        let captures = RE
            .captures(s)
            .ok_or_else(|| ConfigError::BadRange(s.to_string()))?;

        let start = parse_address(&captures[1])?;
        let end = parse_address(&captures[2])?;

        Self::new(start, end)
    }
}

/// The basic-block address filter: one valid range plus any number of
/// excluded ranges. Exclusion wins over inclusion.
#[derive(Clone, Debug, Default)]
pub struct AddressFilter {
    valid: AddrRange,
    excluded: Vec<AddrRange>,
}

impl AddressFilter {
    pub fn new(valid: AddrRange, excluded: Vec<AddrRange>) -> Self {
        Self { valid, excluded }
    }

    pub fn valid(&self) -> AddrRange {
        self.valid
    }

    pub fn excluded(&self) -> &[AddrRange] {
        &self.excluded
    }

    pub fn contains(&self, pc: u64) -> bool {
        if !self.valid.admits(pc) {
            return false;
        }

        // disabled exclusion ranges exclude nothing
        !self
            .excluded
            .iter()
            .any(|range| range.is_bounded() && range.contains(pc))
    }
}
