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

//! Decoding the quoted-printable transfer encoding (RFC 2045 6.7).
//!
//! Producers get QP wrong in every imaginable way, so the decoder never
//! rejects input: a valid `=XY` escape becomes its byte, soft line breaks
//! disappear, and any other byte sequence after a `=` is emitted exactly
//! as it appeared on the wire.

use std::borrow::Cow;
use std::io::{self, Read};

use memchr::memchr;

/// What follows a `=` on the wire.
enum Escape {
    /// `=XY` with two hex digits: the encoded byte.
    Byte(u8),
    /// A soft line break whose ending spans this many bytes.
    SoftBreak(usize),
    /// Not a valid escape; the `=` is ordinary content.
    Literal,
    /// The buffer ends before the escape is complete.
    Truncated,
}

fn classify_escape(tail: &[u8]) -> Escape {
    match *tail {
        [b'\n', ..] => Escape::SoftBreak(1),
        [b'\r', b'\n', ..] => Escape::SoftBreak(2),
        [] | [_] => Escape::Truncated,
        [hi, lo, ..] => match (hex_digit(hi), hex_digit(lo)) {
            (Some(hi), Some(lo)) => Escape::Byte(hi << 4 | lo),
            _ => Escape::Literal,
        },
    }
}

fn hex_digit(b: u8) -> Option<u8> {
    match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'A'..=b'F' => Some(10 + b - b'A'),
        b'a'..=b'f' => Some(10 + b - b'a'),
        _ => None,
    }
}

/// Decodes one buffer of quoted-printable text. Never fails.
///
/// Returns the decoded bytes plus the "pending" suffix of `src`: an
/// escape cut off by the end of the buffer, which a streaming caller can
/// retry once more input has arrived. For a complete buffer the pending
/// slice is empty.
pub fn qp_decode(src: &[u8]) -> (Cow<[u8]>, &[u8]) {
    let mut eq = match memchr(b'=', src) {
        None => return (Cow::Borrowed(src), &[]),
        Some(ix) => ix,
    };

    let mut out = Vec::with_capacity(src.len());
    let mut pos = 0;
    loop {
        out.extend_from_slice(&src[pos..eq]);
        pos = match classify_escape(&src[eq + 1..]) {
            Escape::Byte(b) => {
                out.push(b);
                eq + 3
            },
            Escape::SoftBreak(ending) => eq + 1 + ending,
            Escape::Literal => {
                out.push(b'=');
                eq + 1
            },
            Escape::Truncated => return (Cow::Owned(out), &src[eq..]),
        };
        eq = match memchr(b'=', &src[pos..]) {
            None => {
                out.extend_from_slice(&src[pos..]);
                return (Cow::Owned(out), &[]);
            },
            Some(ix) => pos + ix,
        };
    }
}

const CHUNK: usize = 4096;

/// Streaming quoted-printable decoder.
///
/// Pulls raw QP text from the inner reader and yields decoded bytes,
/// carrying incomplete escape sequences across chunk boundaries. An
/// incomplete escape left over at EOF is discarded.
pub struct QpReader<R> {
    inner: R,
    carry: Vec<u8>,
    out: Vec<u8>,
    out_pos: usize,
    eof: bool,
}

impl<R: Read> QpReader<R> {
    pub fn new(inner: R) -> Self {
        QpReader {
            inner,
            carry: Vec::new(),
            out: Vec::new(),
            out_pos: 0,
            eof: false,
        }
    }

    fn refill(&mut self) -> io::Result<()> {
        let mut chunk = [0u8; CHUNK];
        let n = self.inner.read(&mut chunk)?;
        if 0 == n {
            self.eof = true;
            self.carry.clear();
            return Ok(());
        }

        self.out.clear();
        self.out_pos = 0;

        if self.carry.is_empty() {
            let (decoded, pending) = qp_decode(&chunk[..n]);
            self.out.extend_from_slice(&decoded);
            self.carry.extend_from_slice(pending);
        } else {
            let mut joined = Vec::with_capacity(self.carry.len() + n);
            joined.extend_from_slice(&self.carry);
            joined.extend_from_slice(&chunk[..n]);
            let (decoded, pending) = qp_decode(&joined);
            self.out.extend_from_slice(&decoded);
            self.carry.clear();
            self.carry.extend_from_slice(pending);
        }

        Ok(())
    }
}

impl<R: Read> Read for QpReader<R> {
    fn read(&mut self, dst: &mut [u8]) -> io::Result<usize> {
        loop {
            if self.out_pos < self.out.len() {
                let n = dst.len().min(self.out.len() - self.out_pos);
                dst[..n].copy_from_slice(
                    &self.out[self.out_pos..self.out_pos + n],
                );
                self.out_pos += n;
                return Ok(n);
            }

            if self.eof || dst.is_empty() {
                return Ok(0);
            }

            self.refill()?;
        }
    }
}
