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

//! Cleaning and decoding base64 transfer-encoded bodies.

use std::cell::RefCell;
use std::io::{self, Read};
use std::rc::Rc;

use crate::support::diagnostic::{Diagnostic, DiagnosticKind};

/// Shared sink for diagnostics produced while a decode reader is pulled.
pub type DiagnosticSink = Rc<RefCell<Vec<Diagnostic>>>;

/// Stream filter upstream of the base64 decoder.
///
/// Passes through bytes in the base64 alphabet, silently drops whitespace
/// and `=` padding, and for any other byte records a `MalformedBase64`
/// diagnostic and drops the byte. Byte order is preserved.
pub struct Base64Cleaner<R> {
    inner: R,
    sink: DiagnosticSink,
}

impl<R: Read> Base64Cleaner<R> {
    pub fn new(inner: R, sink: DiagnosticSink) -> Self {
        Base64Cleaner { inner, sink }
    }
}

impl<R: Read> Read for Base64Cleaner<R> {
    fn read(&mut self, dst: &mut [u8]) -> io::Result<usize> {
        loop {
            let n = self.inner.read(dst)?;
            if 0 == n {
                return Ok(0);
            }

            let mut kept = 0;
            for i in 0..n {
                match dst[i] {
                    b'0'..=b'9' | b'a'..=b'z' | b'A'..=b'Z' | b'+'
                    | b'/' => {
                        dst[kept] = dst[i];
                        kept += 1;
                    },
                    // Padding and whitespace are dropped silently; the
                    // decoder runs in the no-padding mode.
                    b'=' | b' ' | b'\t' | b'\r' | b'\n' => (),
                    byte => {
                        self.sink.borrow_mut().push(Diagnostic::new(
                            DiagnosticKind::MalformedBase64,
                            format!(
                                "invalid base64 byte 0x{:02X} dropped",
                                byte
                            ),
                        ));
                    },
                }
            }

            // Keep pulling if everything in this chunk was dropped; an
            // early Ok(0) would end the stream.
            if kept > 0 {
                return Ok(kept);
            }
        }
    }
}

/// Streaming base64 decoder fed by a `Base64Cleaner`.
///
/// Decodes in whole 4-byte groups, carrying the remainder across reads;
/// the final short group is decoded without padding at EOF. Trailing
/// garbage that cannot form a group is discarded.
pub struct Base64Decoder<R> {
    inner: R,
    group: Vec<u8>,
    out: Vec<u8>,
    out_pos: usize,
    eof: bool,
}

impl<R: Read> Base64Decoder<R> {
    pub fn new(inner: R) -> Self {
        Base64Decoder {
            inner,
            group: Vec::new(),
            out: Vec::new(),
            out_pos: 0,
            eof: false,
        }
    }

    fn refill(&mut self) -> io::Result<()> {
        let mut chunk = [0u8; 4096];
        let n = self.inner.read(&mut chunk)?;

        self.out.clear();
        self.out_pos = 0;

        if 0 == n {
            self.eof = true;
            // A remainder of 1 sextet cannot encode a byte; drop it.
            if self.group.len() % 4 != 1 {
                let _ = base64::decode_config_buf(
                    &self.group,
                    base64::STANDARD_NO_PAD,
                    &mut self.out,
                );
            }
            self.group.clear();
            return Ok(());
        }

        self.group.extend_from_slice(&chunk[..n]);
        let usable = self.group.len() / 4 * 4;
        let _ = base64::decode_config_buf(
            &self.group[..usable],
            base64::STANDARD_NO_PAD,
            &mut self.out,
        );
        self.group.copy_within(usable.., 0);
        self.group.truncate(self.group.len() - usable);

        Ok(())
    }
}

impl<R: Read> Read for Base64Decoder<R> {
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
