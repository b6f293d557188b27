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

//! Streaming segmentation of a multipart body.
//!
//! A `BoundaryReader` sits over the enclosing part's reader and presents
//! each child body as an independent byte stream: `next()` advances to the
//! start of the next part, and `Read` yields the current part's bytes,
//! stopping exactly at the line ending that precedes the next delimiter
//! line.
//!
//! Per RFC 2046 a delimiter is `--boundary` at the start of a line;
//! `--boundary--` closes the multipart. Both tolerate trailing transport
//! padding. Matching is exact: when a nested multipart's boundary has the
//! enclosing boundary as a prefix, the byte following the candidate
//! decides, so `--abc_d` never terminates a part delimited by `--abc`.

use std::io::{self, BufRead, Read};

/// Longest line chunk examined at once. Lines longer than this are
/// processed in pieces; a delimiter can only follow a line ending, so the
/// pieces cannot hide one.
#[cfg(not(test))]
const MAX_LINE: u64 = 8192;
// Substantially reduce the chunk size in testing so the split-line and
// split-CRLF paths actually get exercised.
#[cfg(test)]
pub(super) const MAX_LINE: u64 = 64;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum State {
    /// Before the first delimiter; everything up to it is preamble and is
    /// discarded.
    Preamble,
    /// Inside a part body.
    InPart,
    /// Stopped at a dash-boundary; `next()` enters the following part.
    AtDelimiter,
    /// The close-delimiter was consumed; the epilogue remains in the
    /// underlying reader.
    Closed,
    /// The underlying reader ended while a part (or the preamble) was
    /// still open.
    Eof,
}

enum Delim {
    Dash,
    Close,
}

pub(crate) struct BoundaryReader<'a, R: BufRead> {
    r: &'a mut R,
    /// Delimiter line prefix: `--` + boundary.
    prefix: Vec<u8>,
    /// Bytes consumed from `r`, delimiter lines included.
    consumed: u64,
    state: State,
    /// Content bytes ready to surface to the current part.
    pending: Vec<u8>,
    pending_pos: usize,
    /// Line ending held back until the next line proves it is content
    /// rather than the CRLF that belongs to a delimiter.
    held_ending: &'static [u8],
    /// A CR at the edge of a chunk split; it may pair with an LF at the
    /// start of the next chunk.
    pending_cr: bool,
    /// Whether the next chunk starts at the beginning of a line.
    at_line_start: bool,
    line: Vec<u8>,
}

impl<'a, R: BufRead> BoundaryReader<'a, R> {
    pub fn new(r: &'a mut R, boundary: &str) -> Self {
        let mut prefix = Vec::with_capacity(boundary.len() + 2);
        prefix.extend_from_slice(b"--");
        prefix.extend_from_slice(boundary.as_bytes());

        BoundaryReader {
            r,
            prefix,
            consumed: 0,
            state: State::Preamble,
            pending: Vec::new(),
            pending_pos: 0,
            held_ending: b"",
            pending_cr: false,
            at_line_start: true,
            line: Vec::new(),
        }
    }

    /// Advance to the start of the next part body.
    ///
    /// Discards the rest of the current part (or the preamble) if it was
    /// not fully read. Returns `false` at the close-delimiter or at EOF;
    /// `missing_close` distinguishes the two.
    pub fn next(&mut self) -> io::Result<bool> {
        loop {
            match self.state {
                State::AtDelimiter => {
                    self.state = State::InPart;
                    self.pending.clear();
                    self.pending_pos = 0;
                    return Ok(true);
                },
                State::Closed | State::Eof => return Ok(false),
                State::Preamble | State::InPart => {
                    self.pending.clear();
                    self.pending_pos = 0;
                    self.advance_line(false)?;
                },
            }
        }
    }

    /// Whether the multipart ended without its close-delimiter.
    pub fn missing_close(&self) -> bool {
        State::Eof == self.state
    }

    /// Bytes consumed from the underlying reader so far.
    ///
    /// After `next()` returns `true` this is exactly the offset of the
    /// next part's first header byte, relative to where this reader
    /// started.
    pub fn consumed(&self) -> u64 {
        self.consumed
    }

    /// Reads one line chunk from the underlying reader and either
    /// recognises a delimiter or accumulates content into `pending` (when
    /// `keep_content` is set; discarded otherwise).
    fn advance_line(&mut self, keep_content: bool) -> io::Result<()> {
        self.line.clear();
        let n = (&mut *self.r)
            .take(MAX_LINE)
            .read_until(b'\n', &mut self.line)?;
        self.consumed += n as u64;

        if 0 == n {
            // EOF with the current region still open.
            if keep_content {
                if self.pending_cr {
                    self.pending.push(b'\r');
                }
                self.pending.extend_from_slice(self.held_ending);
            }
            self.pending_cr = false;
            self.held_ending = b"";
            self.state = State::Eof;
            return Ok(());
        }

        let was_line_start = self.at_line_start;
        let complete = self.line.ends_with(b"\n");
        self.at_line_start = complete;

        if self.pending_cr {
            self.pending_cr = false;
            if self.line == b"\n" {
                // The CR/LF pair was split across chunks; rejoin it as a
                // held-back line ending.
                self.held_ending = b"\r\n";
                self.at_line_start = true;
                return Ok(());
            }
            if keep_content {
                self.pending.push(b'\r');
            }
        }

        if was_line_start && (complete || (n as u64) < MAX_LINE) {
            if let Some(kind) = self.classify_delimiter() {
                // The line ending before a delimiter belongs to the
                // delimiter, not to the content.
                self.held_ending = b"";
                self.state = match kind {
                    Delim::Dash => State::AtDelimiter,
                    Delim::Close => State::Closed,
                };
                return Ok(());
            }
        }

        // Ordinary content; the held-back ending is confirmed as content.
        if keep_content {
            self.pending.extend_from_slice(self.held_ending);
        }
        self.held_ending = b"";

        let mut content: &[u8] = &self.line;
        if complete {
            if content.ends_with(b"\r\n") {
                content = &content[..content.len() - 2];
                self.held_ending = b"\r\n";
            } else {
                content = &content[..content.len() - 1];
                self.held_ending = b"\n";
            }
        } else if n as u64 == MAX_LINE && content.ends_with(b"\r") {
            content = &content[..content.len() - 1];
            self.pending_cr = true;
        }

        if keep_content {
            self.pending.extend_from_slice(content);
        }

        Ok(())
    }

    fn classify_delimiter(&self) -> Option<Delim> {
        let mut line: &[u8] = &self.line;
        if line.ends_with(b"\n") {
            line = &line[..line.len() - 1];
        }
        if line.ends_with(b"\r") {
            line = &line[..line.len() - 1];
        }

        if !line.starts_with(&self.prefix) {
            return None;
        }

        let rest = trim_padding(&line[self.prefix.len()..]);
        if rest.starts_with(b"--") {
            if trim_padding(&rest[2..]).is_empty() {
                return Some(Delim::Close);
            }
            return None;
        }
        if rest.is_empty() {
            return Some(Delim::Dash);
        }

        // Further boundary-name bytes: some other (longer) boundary which
        // shares this one as a prefix. Body content.
        None
    }
}

fn trim_padding(mut s: &[u8]) -> &[u8] {
    while let Some((&b, rest)) = s.split_first() {
        if b' ' == b || b'\t' == b {
            s = rest;
        } else {
            break;
        }
    }
    while let Some((&b, rest)) = s.split_last() {
        if b' ' == b || b'\t' == b {
            s = rest;
        } else {
            break;
        }
    }
    s
}

impl<R: BufRead> Read for BoundaryReader<'_, R> {
    fn read(&mut self, dst: &mut [u8]) -> io::Result<usize> {
        loop {
            if self.pending_pos < self.pending.len() {
                let n = dst.len().min(self.pending.len() - self.pending_pos);
                dst[..n].copy_from_slice(
                    &self.pending[self.pending_pos..self.pending_pos + n],
                );
                self.pending_pos += n;
                return Ok(n);
            }

            if dst.is_empty() {
                return Ok(0);
            }

            match self.state {
                State::Preamble | State::AtDelimiter | State::Closed => {
                    return Ok(0)
                },
                State::Eof => {
                    return Err(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        "part truncated before closing boundary",
                    ))
                },
                State::InPart => {
                    self.pending.clear();
                    self.pending_pos = 0;
                    self.advance_line(true)?;
                },
            }
        }
    }
}
