//! Text traces of committed instructions and memory requests, turned into
//! probe events.

use std::io::BufRead;

use thiserror::Error;

use crate::event::{CommitEvent, MemoryAccess};

pub mod parser;
pub mod replay;

pub use replay::{replay, Replayer, ReplayError, ReplayOptions, Report};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TraceRecord {
    Commit { core: usize, event: CommitEvent },
    Memory { core: usize, access: MemoryAccess },
}

impl TraceRecord {
    pub fn core(&self) -> usize {
        match self {
            TraceRecord::Commit { core, .. } | TraceRecord::Memory { core, .. } => *core,
        }
    }
}

#[derive(Error, Debug)]
pub enum TraceError {
    #[error("line {line}: unknown record kind '{kind}'")]
    UnknownKind { line: usize, kind: String },
    #[error("line {line}: missing field '{field}'")]
    MissingField { line: usize, field: &'static str },
    #[error("line {line}: bad number '{value}'")]
    BadNumber {
        line: usize,
        value: String,
        #[source]
        source: std::num::ParseIntError,
    },
    #[error("line {line}: unexpected trailing field '{value}'")]
    TrailingField { line: usize, value: String },
    #[error("line {line}: unknown flag '{flag}'")]
    UnknownFlag { line: usize, flag: char },
    #[error("reading trace")]
    Io(#[from] std::io::Error),
}

/// Yields one record per non-empty, non-comment line.
pub struct TraceReader<R: BufRead> {
    lines: std::io::Lines<R>,
    line: usize,
}

impl<R: BufRead> TraceReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            lines: reader.lines(),
            line: 0,
        }
    }

    /// 1-based number of the last line read.
    pub fn line(&self) -> usize {
        self.line
    }
}

impl<R: BufRead> Iterator for TraceReader<R> {
    type Item = Result<TraceRecord, TraceError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let text = match self.lines.next()? {
                Ok(text) => text,
                Err(e) => return Some(Err(e.into())),
            };
            self.line += 1;

            match parser::parse_line(&text, self.line) {
                Ok(Some(record)) => return Some(Ok(record)),
                Ok(None) => continue,
                Err(e) => return Some(Err(e)),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::{TraceError, TraceReader, TraceRecord};

    #[test]
    fn reads_records() {
        let text = "# header\n\nc|0|100|4|U|-\nr|1|2000|3000|100\n";
        let records = TraceReader::new(Cursor::new(text))
            .collect::<Result<Vec<_>, _>>()
            .unwrap();

        assert_eq!(records.len(), 2);
        assert!(matches!(records[0], TraceRecord::Commit { core: 0, .. }));
        assert_eq!(records[1].core(), 1);
    }

    #[test]
    fn reports_line_numbers() {
        let text = "c|0|100|4|U|-\n\nq|0\n";
        let mut reader = TraceReader::new(Cursor::new(text));

        assert!(reader.next().unwrap().is_ok());
        assert!(matches!(
            reader.next().unwrap(),
            Err(TraceError::UnknownKind { line: 3, .. })
        ));
        assert_eq!(reader.line(), 3);
        assert!(reader.next().is_none());
    }
}
