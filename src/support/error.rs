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

use std::io;

use thiserror::Error;

/// Fatal parse errors.
///
/// Recoverable anomalies never surface here; they accumulate as
/// [`Diagnostic`](crate::support::diagnostic::Diagnostic) values on the
/// affected part instead.
#[derive(Error, Debug)]
pub enum Error {
    /// A header block ended abnormally before yielding any bytes.
    ///
    /// Internal sentinel: the tree builder interprets this as "the part
    /// after this boundary does not actually exist" and recovers. It never
    /// escapes `read_parts`.
    #[error("empty header block")]
    EmptyHeaderBlock,
    #[error("invalid media type: {0}")]
    InvalidMediaType(String),
    #[error("unknown charset {0:?}")]
    UnknownCharset(String),
    #[error("message parts nested too deeply")]
    TooDeeplyNested,
    #[error(transparent)]
    Io(#[from] io::Error),
}
