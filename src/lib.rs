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

//! Mimetree parses an RFC 822/2045/2046 message byte stream into a tree of
//! parts, each with decoded headers and lazy access to its raw and
//! transfer-decoded body bytes.
//!
//! The parser is designed to be robust moreso than strictly correct: it
//! accepts the malformations real mail producers emit (unindented header
//! continuations, duplicated media-type parameters, missing close
//! delimiters, boundaries that are prefixes of nested boundaries, corrupt
//! base64 and quoted-printable) and reports them as [`Diagnostic`] values on
//! the affected part rather than failing the parse.
//!
//! The message is materialised once into a backing store which spills to a
//! temporary file above a size threshold; every [`Part`] then exposes
//! windowed readers over that store, so bodies can be replayed and decoded
//! any number of times without rebuffering the message.
//!
//! ```no_run
//! use std::io::Read;
//!
//! let message = std::fs::File::open("message.eml")?;
//! let parsed = mimetree::read_parts(message)?;
//! parsed.walk(|part| -> Result<(), std::io::Error> {
//!     if part.is_attachment() {
//!         let mut content = Vec::new();
//!         part.decode().read_to_end(&mut content)?;
//!         println!("{}: {} bytes", part.filename, content.len());
//!     }
//!     Ok(())
//! })?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

#[cfg(test)]
macro_rules! assert_matches {
    ($expected:pat, $actual:expr) => {
        match $actual {
            $expected => (),
            _ => panic!(
                "Expected {} matches {}",
                stringify!($expected),
                stringify!($actual),
            ),
        }
    };
}

pub mod mime;
pub mod support;

pub use crate::mime::header::HeaderMap;
pub use crate::mime::part::{read_parts, DecodedReader, Message, Part, PartId};
pub use crate::support::diagnostic::{Diagnostic, DiagnosticKind};
pub use crate::support::error::Error;

#[cfg(test)]
static INIT_TEST_LOG: std::sync::Once = std::sync::Once::new();

#[cfg(test)]
fn init_test_log() {
    INIT_TEST_LOG.call_once(|| {
        if !std::env::var("TEST_LOG").ok().map_or(false, |v| "1" == v) {
            return;
        }

        let stderr = log4rs::append::console::ConsoleAppender::builder()
            .target(log4rs::append::console::Target::Stderr)
            .encoder(Box::new(log4rs::encode::pattern::PatternEncoder::new(
                "{d(%H:%M:%S%.3f)} [{l}][{t}] {m}{n}",
            )))
            .build();
        let log_config = log4rs::config::Config::builder()
            .appender(
                log4rs::config::Appender::builder()
                    .build("stderr", Box::new(stderr)),
            )
            .build(
                log4rs::config::Root::builder()
                    .appender("stderr")
                    .build(log::LevelFilter::Trace),
            )
            .unwrap();
        log4rs::init_config(log_config).unwrap();
    })
}
