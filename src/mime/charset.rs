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

//! Charset resolution and streaming conversion to UTF-8.

use std::io::{self, Read};

use encoding_rs::Encoding;

use crate::support::error::Error;

/// Resolves a charset label to an encoding, or `None` for labels nothing
/// in the WHATWG registry answers to.
pub fn lookup(label: &str) -> Option<&'static Encoding> {
    Encoding::for_label_no_replacement(label.trim().as_bytes())
}

/// Resolves `label` and wraps `r` in a reader converting its bytes to
/// UTF-8.
///
/// Unknown labels are an error so callers can run their own salvage
/// heuristics before giving up.
pub fn charset_reader(
    label: &str,
    r: Box<dyn Read>,
) -> Result<Box<dyn Read>, Error> {
    match lookup(label) {
        Some(encoding) => Ok(Box::new(CharsetConverter::new(encoding, r))),
        None => Err(Error::UnknownCharset(label.to_owned())),
    }
}

const CHUNK: usize = 4096;

/// Streaming converter from a known encoding to UTF-8.
///
/// Malformed sequences decode to U+FFFD rather than failing; an initial
/// BOM is removed.
pub struct CharsetConverter<R> {
    inner: R,
    decoder: encoding_rs::Decoder,
    out: Vec<u8>,
    out_pos: usize,
    finished: bool,
}

impl<R: Read> CharsetConverter<R> {
    pub fn new(encoding: &'static Encoding, inner: R) -> Self {
        CharsetConverter {
            inner,
            decoder: encoding.new_decoder_with_bom_removal(),
            out: Vec::new(),
            out_pos: 0,
            finished: false,
        }
    }

    fn refill(&mut self) -> io::Result<()> {
        let mut chunk = [0u8; CHUNK];
        let n = self.inner.read(&mut chunk)?;
        let last = 0 == n;

        let max = self
            .decoder
            .max_utf8_buffer_length(n)
            .ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::InvalidData,
                    "charset conversion buffer overflow",
                )
            })?;
        self.out.resize(max.max(16), 0);
        self.out_pos = 0;

        let (result, _nread, nwritten, _replaced) =
            self.decoder
                .decode_to_utf8(&chunk[..n], &mut self.out, last);
        debug_assert_eq!(encoding_rs::CoderResult::InputEmpty, result);
        self.out.truncate(nwritten);

        if last {
            self.finished = true;
        }

        Ok(())
    }
}

impl<R: Read> Read for CharsetConverter<R> {
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

            if self.finished || dst.is_empty() {
                return Ok(0);
            }

            self.refill()?;
        }
    }
}
