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

//! RFC 2047 encoded words in header field values.
//!
//! Non-ASCII header text arrives packed into `=?charset?scheme?text?=`
//! tokens. Decoding follows the same policy as the rest of the parser: a
//! token that cannot be decoded stays exactly as written and the failure
//! is reported through the diagnostics sink, never thrown.

use std::borrow::Cow;

use lazy_static::lazy_static;
use regex::Regex;

use super::charset;
use super::quoted_printable::qp_decode;
use crate::support::diagnostic::{Diagnostic, DiagnosticKind};

lazy_static! {
    static ref ENCODED_WORD: Regex =
        Regex::new(r"^=\?([!->@-~]*)\?([!->@-~]*)\?([!->@-~]*)\?=$").unwrap();
}

fn is_linear_ws(c: char) -> bool {
    matches!(c, ' ' | '\t' | '\r' | '\n')
}

/// Decode every encoded word in an unstructured field value.
///
/// Words are the whitespace-separated runs of the text. Whitespace
/// between two adjacent encoded words is deleted, as RFC 2047 6.2
/// requires; all other spacing, and any word that is not a decodable
/// encoded word, stays exactly as written.
pub fn decode_unstructured<'a>(
    text: &'a str,
    diags: &mut Vec<Diagnostic>,
) -> Cow<'a, str> {
    if !text.contains("=?") {
        return Cow::Borrowed(text);
    }

    let mut result = String::with_capacity(text.len());
    let mut changed = false;
    // Whitespace run read but not yet emitted; it is dropped only when
    // decoded words end up on both sides of it.
    let mut gap = "";
    let mut after_encoded = false;
    let mut rest = text;

    while !rest.is_empty() {
        let word_end = rest.find(is_linear_ws).unwrap_or(rest.len());
        let (word, tail) = rest.split_at(word_end);

        match decode_word(word, diags) {
            Some(decoded) => {
                if !after_encoded {
                    result.push_str(gap);
                }
                result.push_str(&decoded);
                changed = true;
                after_encoded = true;
            },
            None => {
                result.push_str(gap);
                result.push_str(word);
                after_encoded = false;
            },
        }

        let gap_end =
            tail.find(|c: char| !is_linear_ws(c)).unwrap_or(tail.len());
        let (ws, next) = tail.split_at(gap_end);
        gap = ws;
        rest = next;
    }
    result.push_str(gap);

    if changed {
        Cow::Owned(result)
    } else {
        Cow::Borrowed(text)
    }
}

/// Decode `word` if the whole of it is a single RFC 2047 encoded word.
///
/// Returns `None` otherwise. A word that matches the encoded-word shape
/// but fails to decode also reports a diagnostic; a word that simply is
/// not an encoded word does not, since most words are not.
pub fn decode_word(word: &str, diags: &mut Vec<Diagnostic>) -> Option<String> {
    let captures = ENCODED_WORD.captures(word)?;
    let label = captures.get(1).map_or("", |m| m.as_str());
    let scheme = captures.get(2).map_or("", |m| m.as_str());
    let text = captures.get(3).map_or("", |m| m.as_str());

    let raw = match scheme {
        "q" | "Q" => {
            // In the Q scheme an underscore denotes a space regardless of
            // charset; the rest is quoted-printable.
            let unescaped: Vec<u8> = text
                .bytes()
                .map(|b| if b'_' == b { b' ' } else { b })
                .collect();
            qp_decode(&unescaped).0.into_owned()
        },
        "b" | "B" => match base64::decode(text) {
            Ok(raw) => raw,
            Err(_) => {
                diags.push(Diagnostic::new(
                    DiagnosticKind::MalformedHeader,
                    format!("undecodable base64 in encoded word {:?}", word),
                ));
                return None;
            },
        },
        other => {
            diags.push(Diagnostic::new(
                DiagnosticKind::MalformedHeader,
                format!("unknown encoded-word scheme {:?}", other),
            ));
            return None;
        },
    };

    // An RFC 2184 language tag may trail the charset after an asterisk.
    let label = label.split_once('*').map_or(label, |(charset, _)| charset);
    match charset::lookup(label) {
        Some(encoding) => {
            Some(encoding.decode_with_bom_removal(&raw).0.into_owned())
        },
        None => {
            diags.push(Diagnostic::new(
                DiagnosticKind::CharsetConversion,
                format!("unknown charset {:?} in encoded word", label),
            ));
            None
        },
    }
}

/// Re-encode every encoded-word token of `input` as `=?UTF-8?b?...?=`,
/// decoding through the original charset first.
///
/// Parentheses around a token (RFC 822 comments) are preserved outside
/// the new encoded word. Runs of whitespace between tokens collapse to a
/// single space.
pub fn to_utf8_base64_header(input: &str) -> String {
    if !input.contains("=?") {
        return input.to_owned();
    }

    // Tokens that fail to decode are re-encoded as they stand, so the
    // diagnostics are of no further interest here.
    let mut scratch = Vec::new();

    let tokens: Vec<&str> = input.split_ascii_whitespace().collect();
    let mut output = Vec::with_capacity(tokens.len());
    for token in tokens {
        if token.len() > 4 && token.contains("=?") {
            // Stash parenthesis, they should not be encoded
            let mut token = token;
            let mut prefix = "";
            let mut suffix = "";
            if token.starts_with('(') {
                prefix = "(";
                token = &token[1..];
            }
            if token.ends_with(')') {
                suffix = ")";
                token = &token[..token.len() - 1];
            }

            let decoded = decode_unstructured(token, &mut scratch);
            output.push(format!(
                "{}=?UTF-8?b?{}?={}",
                prefix,
                base64::encode(decoded.as_bytes()),
                suffix
            ));
        } else {
            output.push(token.to_owned());
        }
    }

    output.join(" ")
}
