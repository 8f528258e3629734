//! Locating formula records in the bulk index.
//!
//! The index is one large JSON array. [`IndexLocator::find`] decodes it one
//! element at a time and stops as soon as every requested name has been seen;
//! [`IndexLocator::find_scanned`] splits raw objects with
//! [`objects::ObjectScanner`] and only decodes the ones whose name matches.

pub mod objects;

use std::collections::HashSet;
use std::fs::File;
use std::io::{BufRead, BufReader, Read, Seek, SeekFrom};
use std::path::Path;

use pour_schema::Formula;
use serde::Deserialize;
use serde::de::Error as _;

use crate::error::{Error, Result};
use objects::{ObjectScanner, top_level_string};

/// How the index is searched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LookupStrategy {
    /// Decode every element in turn.
    #[default]
    Stream,
    /// Split raw objects and decode only candidates.
    Scan,
}

/// Finds formula records by name in a seekable index source.
///
/// The source is rewound before every lookup, so one locator can serve
/// several passes over the same index.
#[derive(Debug)]
pub struct IndexLocator<R> {
    source: R,
}

impl IndexLocator<File> {
    /// Open an index file on disk.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] when the file cannot be opened.
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path).map_err(|e| Error::io(path, e))?;
        Ok(Self::new(file))
    }
}

impl<R: Read + Seek> IndexLocator<R> {
    /// Wrap a seekable index source.
    pub fn new(source: R) -> Self {
        Self { source }
    }

    /// Look up `names` with the given strategy.
    ///
    /// # Errors
    ///
    /// Fails as [`find`](Self::find) and [`find_scanned`](Self::find_scanned) do.
    pub fn locate<S: AsRef<str>>(
        &mut self,
        names: &[S],
        strategy: LookupStrategy,
    ) -> Result<Vec<Formula>> {
        match strategy {
            LookupStrategy::Stream => self.find(names),
            LookupStrategy::Scan => self.find_scanned(names),
        }
    }

    /// Stream-decode the index until every name in `names` is matched.
    ///
    /// A record matches on either `name` or `full_name`, and claims both, so
    /// the result holds each matching record once, in index order.
    ///
    /// # Errors
    ///
    /// When the index runs out first, fails with [`Error::NotFound`] listing
    /// exactly the names that were never seen. A malformed record before the
    /// last match is an [`Error::Decode`].
    pub fn find<S: AsRef<str>>(&mut self, names: &[S]) -> Result<Vec<Formula>> {
        let mut wanted: HashSet<&str> = names.iter().map(AsRef::as_ref).collect();
        let mut found = Vec::new();
        if wanted.is_empty() {
            return Ok(found);
        }

        self.rewind()?;
        let reader = BufReader::new(&mut self.source);
        for record in Records::new(reader) {
            let formula = record?;
            if claim(&mut wanted, &formula) {
                found.push(formula);
                if wanted.is_empty() {
                    return Ok(found);
                }
            }
        }

        Err(not_found(wanted))
    }

    /// Like [`find`](Self::find), but only decodes objects whose top-level
    /// `name` or `full_name` is requested.
    ///
    /// # Errors
    ///
    /// As for [`find`](Self::find); records that are never decoded cannot
    /// fail.
    pub fn find_scanned<S: AsRef<str>>(&mut self, names: &[S]) -> Result<Vec<Formula>> {
        let mut wanted: HashSet<&str> = names.iter().map(AsRef::as_ref).collect();
        let mut found = Vec::new();
        if wanted.is_empty() {
            return Ok(found);
        }

        self.rewind()?;
        for raw in ObjectScanner::new(&mut self.source) {
            let raw = raw.map_err(|e| Error::io("index", e))?;
            let candidate = ["name", "full_name"].iter().any(|key| {
                top_level_string(&raw.bytes, key).is_some_and(|v| wanted.contains(v))
            });
            if !candidate {
                continue;
            }

            let formula: Formula =
                serde_json::from_slice(&raw.bytes).map_err(|source| Error::Decode {
                    what: format!("index record at byte {}", raw.offset),
                    source,
                })?;
            if claim(&mut wanted, &formula) {
                found.push(formula);
                if wanted.is_empty() {
                    return Ok(found);
                }
            }
        }

        Err(not_found(wanted))
    }

    fn rewind(&mut self) -> Result<()> {
        self.source
            .seek(SeekFrom::Start(0))
            .map_err(|e| Error::io("index", e))?;
        Ok(())
    }
}

/// Remove both of the record's names from `wanted`, reporting whether either
/// was there.
fn claim(wanted: &mut HashSet<&str>, formula: &Formula) -> bool {
    let by_name = wanted.remove(formula.name.as_str());
    let by_full_name = wanted.remove(formula.full_name.as_str());
    by_name || by_full_name
}

fn not_found(wanted: HashSet<&str>) -> Error {
    let mut missing: Vec<String> = wanted.into_iter().map(str::to_string).collect();
    missing.sort();
    Error::NotFound { missing }
}

/// Element-at-a-time decoder over a JSON array of formulas.
///
/// The array punctuation is handled here; each element is decoded by a
/// fresh `serde_json` deserializer that stops at the element's closing brace.
struct Records<R> {
    reader: R,
    state: State,
    index: usize,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum State {
    Start,
    First,
    Rest,
    Done,
}

impl<R: BufRead> Records<R> {
    fn new(reader: R) -> Self {
        Self {
            reader,
            state: State::Start,
            index: 0,
        }
    }

    /// Skip whitespace and return the next byte without consuming it.
    fn peek(&mut self) -> std::io::Result<Option<u8>> {
        loop {
            let (skip, next) = {
                let buf = self.reader.fill_buf()?;
                if buf.is_empty() {
                    return Ok(None);
                }
                match buf.iter().position(|b| !b.is_ascii_whitespace()) {
                    Some(i) => (i, Some(buf[i])),
                    None => (buf.len(), None),
                }
            };
            self.reader.consume(skip);
            if next.is_some() {
                return Ok(next);
            }
        }
    }

    fn syntax(&self, msg: &str) -> Error {
        Error::Decode {
            what: format!("index near record {}", self.index),
            source: serde_json::Error::custom(msg),
        }
    }

    fn advance(&mut self) -> Result<Option<Formula>> {
        let io_err = |e| Error::io("index", e);
        loop {
            match self.state {
                State::Done => return Ok(None),
                State::Start => match self.peek().map_err(io_err)? {
                    Some(b'[') => {
                        self.reader.consume(1);
                        self.state = State::First;
                    }
                    _ => return Err(self.syntax("expected a JSON array")),
                },
                State::First | State::Rest => match self.peek().map_err(io_err)? {
                    None => return Err(self.syntax("unterminated array")),
                    Some(b']') => {
                        self.reader.consume(1);
                        self.state = State::Done;
                    }
                    Some(b',') if self.state == State::Rest => {
                        self.reader.consume(1);
                        self.state = State::First;
                    }
                    Some(b'{') => {
                        let mut de = serde_json::Deserializer::from_reader(&mut self.reader);
                        let formula =
                            Formula::deserialize(&mut de).map_err(|source| Error::Decode {
                                what: format!("index record {}", self.index),
                                source,
                            })?;
                        self.index += 1;
                        self.state = State::Rest;
                        return Ok(Some(formula));
                    }
                    Some(_) => return Err(self.syntax("expected a formula object")),
                },
            }
        }
    }
}

impl<R: BufRead> Iterator for Records<R> {
    type Item = Result<Formula>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.advance() {
            Ok(Some(formula)) => Some(Ok(formula)),
            Ok(None) => None,
            Err(e) => {
                self.state = State::Done;
                Some(Err(e))
            }
        }
    }
}
