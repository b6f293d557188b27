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

//! Non-fatal anomaly reports accumulated during parsing and decoding.

use std::fmt;

/// The class of a recoverable anomaly.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum DiagnosticKind {
    /// A header line could not be parsed as written and was repaired or
    /// skipped.
    MalformedHeader,
    /// A non-root part carried no `Content-Type` header; the `text/plain`
    /// default was applied.
    MissingContentType,
    /// A multipart body ended without its closing boundary marker.
    MissingBoundary,
    /// A byte outside the base64 alphabet was dropped from an encoded body.
    MalformedBase64,
    /// An unrecognised `Content-Transfer-Encoding`; the body was left
    /// undecoded.
    ContentEncoding,
    /// A charset could not be resolved; the body was left unconverted.
    CharsetConversion,
}

impl DiagnosticKind {
    pub fn name(self) -> &'static str {
        match self {
            Self::MalformedHeader => "malformed header",
            Self::MissingContentType => "missing Content-Type",
            Self::MissingBoundary => "missing boundary",
            Self::MalformedBase64 => "malformed base64",
            Self::ContentEncoding => "content encoding",
            Self::CharsetConversion => "character set conversion",
        }
    }
}

impl fmt::Display for DiagnosticKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One recoverable anomaly, in the order it was produced.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Diagnostic {
    pub kind: DiagnosticKind,
    pub message: String,
}

impl Diagnostic {
    pub fn new(kind: DiagnosticKind, message: impl Into<String>) -> Self {
        Diagnostic {
            kind,
            message: message.into(),
        }
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}
