//! Line format:
//!
//! ```text
//! c|CORE|PC|SIZE|FLAGS|TARGET|DISASM
//! r|CORE|VADDR|PADDR|PC
//! w|CORE|VADDR|PADDR|PC
//! ```
//!
//! Addresses are hex (with or without `0x`), `CORE` and `SIZE` decimal.
//! `FLAGS` is any of `C` control, `D` direct, `M` micro-op, `L` last
//! micro-op, `U` user mode, or `-` for none. `TARGET` may be `-` unless the
//! instruction is direct. Memory records take no extra fields.

use super::{TraceError, TraceRecord};
use crate::{
    event::{CommitEvent, InstFlags, MemoryAccess, MemoryAccessKind},
    range::strip_hex_prefix,
};

struct Fields<'a> {
    parts: std::str::SplitN<'a, char>,
    line: usize,
}

impl<'a> Fields<'a> {
    fn next(&mut self, field: &'static str) -> Result<&'a str, TraceError> {
        self.parts
            .next()
            .map(str::trim)
            .ok_or(TraceError::MissingField {
                line: self.line,
                field,
            })
    }

    fn hex(&mut self, field: &'static str) -> Result<u64, TraceError> {
        let value = self.next(field)?;
        parse_hex(value).map_err(|source| TraceError::BadNumber {
            line: self.line,
            value: value.to_string(),
            source,
        })
    }

    fn hex_or_dash(&mut self, field: &'static str) -> Result<Option<u64>, TraceError> {
        let value = self.next(field)?;
        if value == "-" {
            return Ok(None);
        }
        parse_hex(value)
            .map(Some)
            .map_err(|source| TraceError::BadNumber {
                line: self.line,
                value: value.to_string(),
                source,
            })
    }

    fn decimal<T: std::str::FromStr<Err = std::num::ParseIntError>>(
        &mut self,
        field: &'static str,
    ) -> Result<T, TraceError> {
        let value = self.next(field)?;
        value.parse::<T>().map_err(|source| TraceError::BadNumber {
            line: self.line,
            value: value.to_string(),
            source,
        })
    }
}

/// Hex with or without a prefix, unlike [`crate::range::parse_address`].
pub fn parse_hex(value: &str) -> Result<u64, std::num::ParseIntError> {
    u64::from_str_radix(strip_hex_prefix(value).unwrap_or(value), 16)
}

pub fn parse_flags(value: &str, line: usize) -> Result<InstFlags, TraceError> {
    if value == "-" {
        return Ok(InstFlags::empty());
    }

    value.chars().try_fold(InstFlags::empty(), |flags, flag| {
        let bit = match flag {
            'C' => InstFlags::CONTROL,
            'D' => InstFlags::DIRECT,
            'M' => InstFlags::MICROOP,
            'L' => InstFlags::LAST_MICROOP,
            'U' => InstFlags::USER_MODE,
            _ => return Err(TraceError::UnknownFlag { line, flag }),
        };
        Ok(flags | bit)
    })
}

/// Parses one line. Blank lines and `#` comments give `None`.
pub fn parse_line(text: &str, line: usize) -> Result<Option<TraceRecord>, TraceError> {
    let text = text.trim();
    if text.is_empty() || text.starts_with('#') {
        return Ok(None);
    }

    // the disassembly is last and may itself contain '|'
    let mut fields = Fields {
        parts: text.splitn(7, '|'),
        line,
    };

    let kind = fields.next("kind")?;
    let record = match kind {
        "c" => {
            let core = fields.decimal::<usize>("core")?;
            let pc = fields.hex("pc")?;
            let size = fields.decimal::<u64>("size")?;
            let flags = parse_flags(fields.next("flags")?, line)?;
            let target = match fields.hex_or_dash("target")? {
                Some(target) => target,
                // a direct branch without its target must not turn into a marker
                None if flags.contains(InstFlags::DIRECT) => {
                    return Err(TraceError::MissingField {
                        line,
                        field: "target",
                    })
                }
                None => 0,
            };
            let disassembly = fields
                .parts
                .next()
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string);

            TraceRecord::Commit {
                core,
                event: CommitEvent {
                    pc,
                    size,
                    flags,
                    target,
                    disassembly,
                },
            }
        }
        "r" | "w" => {
            let kind = if kind == "r" {
                MemoryAccessKind::Read
            } else {
                MemoryAccessKind::Write
            };
            let core = fields.decimal::<usize>("core")?;
            let vaddr = fields.hex("vaddr")?;
            let paddr = fields.hex("paddr")?;
            let pc = fields.hex("pc")?;
            if let Some(extra) = fields.parts.next() {
                return Err(TraceError::TrailingField {
                    line,
                    value: extra.to_string(),
                });
            }

            TraceRecord::Memory {
                core,
                access: MemoryAccess {
                    kind,
                    vaddr,
                    paddr,
                    pc,
                },
            }
        }
        _ => {
            return Err(TraceError::UnknownKind {
                line,
                kind: kind.to_string(),
            })
        }
    };

    Ok(Some(record))
}
