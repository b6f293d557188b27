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

//! Parsing `Content-Type` and `Content-Disposition` values.

use std::collections::HashMap;

use crate::support::error::Error;

/// A parsed media type value: `type/subtype; attribute=value; ...`.
///
/// The essence and parameter names are lowercased; parameter values are
/// unquoted but otherwise as sent. Parameter names are unique (the RFC
/// forbids duplicates; the tolerance ladder deduplicates them before they
/// get here).
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MediaType {
    pub essence: String,
    pub params: HashMap<String, String>,
}

impl MediaType {
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name).map(String::as_str)
    }
}

/// Parses a media type, tolerating the malformations common producers
/// emit.
///
/// The tolerance ladder, first rung to succeed wins:
///
/// 1. Strict RFC 2045 parse.
/// 2. Deduplicate `;`-separated parameters by name (first wins), retry.
/// 3. Deduplicate space-separated parameters (some producers forget the
///    `;`), rewriting `name=""` to `name=" "` since the strict parser
///    rejects empty quoted parameters; retry.
///
/// If every rung fails, the strict parser's original error is returned.
pub fn parse_media_type(value: &str) -> Result<MediaType, Error> {
    let original_err = match parse_strict(value) {
        Ok(mt) => return Ok(mt),
        Err(e) => e,
    };

    // A repeated parameter is almost always the same value written twice;
    // dropping the later copies is harmless.
    if let Ok(mt) = parse_strict(&dedup_params(value, ';')) {
        return Ok(mt);
    }

    // Some producers separate parameters with spaces instead of ';'.
    let mut respaced = dedup_params(value, ' ');
    if respaced.contains("name=\"\"") {
        respaced = respaced.replace("name=\"\"", "name=\" \"");
    }
    match parse_strict(&respaced) {
        Ok(mt) => Ok(mt),
        Err(_) => Err(original_err),
    }
}

/// Rebuilds `value` with parameters separated by `sep`, keeping only the
/// first occurrence of each parameter name.
fn dedup_params(value: &str, sep: char) -> String {
    let mut out = String::new();
    for piece in value.split(sep) {
        if let Some(eq) = piece.find('=') {
            let name = &piece[..eq];
            if out.contains(&format!("{}=", name)) {
                continue;
            }
        }
        out.push_str(piece);
        out.push(';');
    }
    out
}

fn parse_strict(value: &str) -> Result<MediaType, Error> {
    let mut cursor = Cursor::new(value.as_bytes());

    cursor.skip_ws();
    let typ = cursor.token().map_err(|e| invalid(value, e))?;
    let essence = if cursor.eat(b'/') {
        let subtype = cursor.token().map_err(|e| invalid(value, e))?;
        format!(
            "{}/{}",
            typ.to_ascii_lowercase(),
            subtype.to_ascii_lowercase()
        )
    } else {
        // Content-Disposition values are a bare token with no subtype.
        typ.to_ascii_lowercase()
    };

    let mut params = HashMap::new();
    loop {
        cursor.skip_ws();
        if cursor.at_end() {
            break;
        }
        if !cursor.eat(b';') {
            return Err(invalid(value, "expected ';' before parameter"));
        }
        cursor.skip_ws();
        if cursor.at_end() {
            // Tolerate a trailing semicolon.
            break;
        }

        let attribute = cursor
            .token()
            .map_err(|e| invalid(value, e))?
            .to_ascii_lowercase();
        if !cursor.eat(b'=') {
            return Err(invalid(value, "expected '=' after parameter name"));
        }
        let parm_value = if cursor.peek() == Some(b'"') {
            cursor.quoted_string().map_err(|e| invalid(value, e))?
        } else {
            cursor.token().map_err(|e| invalid(value, e))?
        };
        if parm_value.is_empty() {
            return Err(invalid(value, "empty parameter value"));
        }

        if params.contains_key(&attribute) {
            return Err(invalid(
                value,
                format!("duplicate parameter {:?}", attribute),
            ));
        }
        params.insert(attribute, parm_value);
    }

    Ok(MediaType { essence, params })
}

fn invalid(value: &str, detail: impl AsRef<str>) -> Error {
    Error::InvalidMediaType(format!("{:?}: {}", value, detail.as_ref()))
}

struct Cursor<'a> {
    s: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(s: &'a [u8]) -> Self {
        Cursor { s, pos: 0 }
    }

    fn peek(&self) -> Option<u8> {
        self.s.get(self.pos).copied()
    }

    fn at_end(&self) -> bool {
        self.pos >= self.s.len()
    }

    fn eat(&mut self, b: u8) -> bool {
        if Some(b) == self.peek() {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn skip_ws(&mut self) {
        while let Some(b) = self.peek() {
            if b == b' ' || b == b'\t' || b == b'\r' || b == b'\n' {
                self.pos += 1;
            } else {
                break;
            }
        }
    }

    /// RFC 2045 token: any CHAR except SPACE, CTLs, and tspecials.
    /// 8-bit bytes are tolerated; plenty of agents put them in parameter
    /// values.
    fn token(&mut self) -> Result<String, &'static str> {
        let start = self.pos;
        while let Some(b) = self.peek() {
            if b > b' ' && b != 0x7F && !is_tspecial(b) {
                self.pos += 1;
            } else {
                break;
            }
        }

        if self.pos == start {
            Err("expected a token")
        } else {
            Ok(String::from_utf8_lossy(&self.s[start..self.pos])
                .into_owned())
        }
    }

    /// RFC 2045 quoted-string, with backslash escapes unquoted.
    fn quoted_string(&mut self) -> Result<String, &'static str> {
        if !self.eat(b'"') {
            return Err("expected a quoted string");
        }

        let mut out = Vec::new();
        loop {
            match self.peek() {
                None => return Err("unterminated quoted string"),
                Some(b'"') => {
                    self.pos += 1;
                    break;
                },
                Some(b'\\') => {
                    self.pos += 1;
                    match self.peek() {
                        None => return Err("unterminated quoted string"),
                        Some(b) => {
                            out.push(b);
                            self.pos += 1;
                        },
                    }
                },
                Some(b) => {
                    out.push(b);
                    self.pos += 1;
                },
            }
        }

        Ok(String::from_utf8_lossy(&out).into_owned())
    }
}

fn is_tspecial(b: u8) -> bool {
    matches!(
        b,
        b'(' | b')'
            | b'<'
            | b'>'
            | b'@'
            | b','
            | b';'
            | b':'
            | b'\\'
            | b'"'
            | b'/'
            | b'['
            | b']'
            | b'?'
            | b'='
    )
}
