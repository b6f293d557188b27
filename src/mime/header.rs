//-
// Copyright (c) 2026, the mimetree authors
//
// This file is part of mimetree.
//
// Mimetree is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free
// Software Foundation, either version 3 of the License, or (at your option)
// any later version.
//
// Mimetree is distributed in the hope that it will be useful, but WITHOUT ANY
// WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more
// details.
//
// You should have received a copy of the GNU General Public License along
// with mimetree. If not, see <http://www.gnu.org/licenses/>.

//! Reading SMTP/MIME header blocks.
//!
//! Real producers emit headers with unindented continuation lines, lines
//! that start with a colon, and bare LF line endings. `read_header` repairs
//! what it can into a canonical CRLF block before the strict parse, so the
//! rest of the parser only ever sees well-formed headers.

use std::io::{self, BufRead};

use memchr::memchr;

use crate::support::diagnostic::{Diagnostic, DiagnosticKind};
use crate::support::error::Error;

// Standard MIME header names
pub const CONTENT_DISPOSITION: &str = "Content-Disposition";
pub const CONTENT_TRANSFER_ENCODING: &str = "Content-Transfer-Encoding";
pub const CONTENT_TYPE: &str = "Content-Type";

// Standard MIME header parameters
pub const HP_BOUNDARY: &str = "boundary";
pub const HP_CHARSET: &str = "charset";
pub const HP_FILE: &str = "file";
pub const HP_FILENAME: &str = "filename";
pub const HP_NAME: &str = "name";

/// A case-insensitive-by-key header multimap.
///
/// Entries keep their on-wire order, both across keys and among values
/// sharing a key. Names are stored as sent (minus surrounding whitespace);
/// lookups ignore ASCII case.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct HeaderMap {
    entries: Vec<(String, String)>,
}

impl HeaderMap {
    /// The first value for `name`, if any.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// All values for `name`, in on-wire order.
    pub fn get_all<'a>(
        &'a self,
        name: &'a str,
    ) -> impl Iterator<Item = &'a str> + 'a {
        self.entries
            .iter()
            .filter(move |(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// All `(name, value)` entries in on-wire order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn append(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.entries.push((name.into(), value.into()));
    }
}

/// Reads a block of SMTP or MIME headers from `r` and returns a `HeaderMap`.
///
/// Repair warnings are pushed onto `diags`; I/O errors are returned
/// directly. `Error::EmptyHeaderBlock` is returned when the block ends
/// abnormally before yielding any bytes, which the tree builder relies on
/// to detect a part that does not actually exist.
pub(crate) fn read_header(
    r: &mut impl BufRead,
    diags: &mut Vec<Diagnostic>,
) -> Result<HeaderMap, Error> {
    // canonical holds the massaged block: one logical header per
    // CRLF-terminated line, continuations already unfolded.
    let mut canonical: Vec<u8> = Vec::new();
    let mut line: Vec<u8> = Vec::new();
    let mut first_header = true;

    loop {
        line.clear();
        let mut at_end = false;
        match r.read_until(b'\n', &mut line) {
            Ok(0) => break,
            Ok(_) => {},
            Err(e) if io::ErrorKind::UnexpectedEof == e.kind() => {
                if canonical.is_empty() && line.is_empty() {
                    return Err(Error::EmptyHeaderBlock);
                }
                at_end = true;
            },
            Err(e) => return Err(e.into()),
        }

        let s = trim_line_ending(&line);
        if s.is_empty() && !at_end {
            // Blank line ends the block
            break;
        }

        match (s.first(), memchr(b':', s)) {
            (Some(&b' ') | Some(&b'\t'), _) => {
                // Starts with space: continuation
                canonical.push(b' ');
                canonical.extend_from_slice(trim_bytes(s));
            },
            (Some(_), Some(0)) => {
                // A line opening with a colon has no name to repair; drop it
                diags.push(Diagnostic::new(
                    DiagnosticKind::MalformedHeader,
                    format!(
                        "header line {:?} started with a colon",
                        String::from_utf8_lossy(s)
                    ),
                ));
            },
            (Some(_), Some(_)) => {
                // A new header; terminate the one being accumulated
                if !first_header {
                    canonical.extend_from_slice(b"\r\n");
                }
                canonical.extend_from_slice(trim_bytes(s));
                first_header = false;
            },
            (Some(_), None) => {
                // No colon: repair as a non-indented continuation
                canonical.push(b' ');
                canonical.extend_from_slice(s);
                diags.push(Diagnostic::new(
                    DiagnosticKind::MalformedHeader,
                    format!(
                        "continued line {:?} was not indented",
                        String::from_utf8_lossy(s)
                    ),
                ));
            },
            (None, _) => {},
        }

        if at_end {
            break;
        }
    }

    canonical.extend_from_slice(b"\r\n");
    Ok(parse_block(&canonical, diags))
}

/// Parses the canonical CRLF block into a `HeaderMap`.
fn parse_block(canonical: &[u8], diags: &mut Vec<Diagnostic>) -> HeaderMap {
    let mut header = HeaderMap::default();

    for raw in canonical.split(|&b| b'\n' == b) {
        let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
        if raw.is_empty() {
            continue;
        }

        let colon = match memchr(b':', raw) {
            Some(colon) => colon,
            None => {
                diags.push(Diagnostic::new(
                    DiagnosticKind::MalformedHeader,
                    format!(
                        "dropped header line {:?} with no colon",
                        String::from_utf8_lossy(raw)
                    ),
                ));
                continue;
            },
        };

        let name = trim_bytes(&raw[..colon]);
        if !valid_header_name(name) {
            diags.push(Diagnostic::new(
                DiagnosticKind::MalformedHeader,
                format!(
                    "dropped header with invalid name {:?}",
                    String::from_utf8_lossy(name)
                ),
            ));
            continue;
        }

        let value = trim_bytes(&raw[colon + 1..]);
        header.append(
            String::from_utf8_lossy(name).into_owned(),
            String::from_utf8_lossy(value).into_owned(),
        );
    }

    header
}

fn valid_header_name(name: &[u8]) -> bool {
    // Rudimentary validity: printable ASCII, no whitespace, no colon.
    !name.is_empty()
        && name
            .iter()
            .all(|&b| b > b' ' && b < 0x7F && b != b':')
}

fn trim_line_ending(line: &[u8]) -> &[u8] {
    if line.ends_with(b"\r\n") {
        &line[..line.len() - 2]
    } else if line.ends_with(b"\n") {
        &line[..line.len() - 1]
    } else {
        line
    }
}

fn trim_bytes(mut s: &[u8]) -> &[u8] {
    while let Some((&first, rest)) = s.split_first() {
        if b' ' == first || b'\t' == first || b'\r' == first || b'\n' == first
        {
            s = rest;
        } else {
            break;
        }
    }
    while let Some((&last, rest)) = s.split_last() {
        if b' ' == last || b'\t' == last || b'\r' == last || b'\n' == last {
            s = rest;
        } else {
            break;
        }
    }
    s
}
