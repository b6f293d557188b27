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

//! The part tree: recursive descent over a materialised message.
//!
//! ## Descriptors
//!
//! Every part is assigned a dotted-decimal descriptor following IMAP
//! section numbering (RFC 3501): children of a multipart are numbered from
//! 1, nested parts join their parent's numbers with `.`. Two departures
//! from plain section numbers make the tree self-describing: a part that
//! is itself a multipart carries a trailing `.0` segment (the root
//! multipart is plain `"0"`), and an embedded `message/rfc822` shares the
//! descriptor of its container, as it is the same logical node in
//! BODYSTRUCTURE terms.

use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::io::{self, Read};
use std::rc::Rc;
use std::sync::Arc;

use log::warn;

use super::base64_cleaner::{Base64Cleaner, Base64Decoder, DiagnosticSink};
use super::boundary::BoundaryReader;
use super::charset;
use super::encoded_word;
use super::header::{self, HeaderMap};
use super::media_type::{self, MediaType};
use super::quoted_printable::QpReader;
use crate::support::buffer::{MessageStore, SectionReader, StoreWriter};
use crate::support::diagnostic::{Diagnostic, DiagnosticKind};
use crate::support::error::Error;

const CONTENT_TYPE_RFC822: &str = "message/rfc822";

/// Parts nested deeper than this abort the parse; no legitimate message
/// comes close.
const MAX_NESTING_DEPTH: u32 = 20;
/// Parts beyond this count are not descended into.
const MAX_PARTS: usize = 1000;

/// Index of a part within its [`Message`] arena.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PartId(u32);

impl PartId {
    fn index(self) -> usize {
        self.0 as usize
    }
}

/// A parsed message: the part arena plus the shared backing store.
///
/// Index 0 is the root part. The tree is immutable once returned;
/// decoding instantiates fresh readers, so distinct parts may be decoded
/// from distinct threads concurrently.
#[derive(Debug)]
pub struct Message {
    parts: Vec<Part>,
    store: Arc<MessageStore>,
}

impl Message {
    /// The root part.
    pub fn root(&self) -> &Part {
        &self.parts[0]
    }

    pub fn part(&self, id: PartId) -> &Part {
        &self.parts[id.index()]
    }

    /// All parts, in the order they were parsed (pre-order, except that
    /// an embedded `message/rfc822` precedes its container's completion).
    pub fn parts(&self) -> impl Iterator<Item = &Part> {
        self.parts.iter()
    }

    pub fn len(&self) -> usize {
        self.parts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }

    /// Pre-order traversal from the root. The visitor halts traversal by
    /// returning `Err`.
    pub fn walk<E>(
        &self,
        mut visitor: impl FnMut(&Part) -> Result<(), E>,
    ) -> Result<(), E> {
        self.walk_from(PartId(0), &mut visitor)
    }

    fn walk_from<E>(
        &self,
        id: PartId,
        visitor: &mut impl FnMut(&Part) -> Result<(), E>,
    ) -> Result<(), E> {
        let part = self.part(id);
        visitor(part)?;
        for &child in &part.subparts {
            self.walk_from(child, visitor)?;
        }
        Ok(())
    }

    /// Releases the backing store, deleting its spill file if the message
    /// was large enough to need one.
    ///
    /// Dropping the `Message` has the same effect; this merely makes the
    /// point of release explicit.
    pub fn close(self) {}
}

/// A node in the message tree.
pub struct Part {
    /// Dotted-decimal position of this part within the tree; see the
    /// module documentation.
    pub descriptor: String,

    /// Lowercased `type/subtype`. `text/plain` when the header is absent.
    pub content_type: String,
    /// `Content-Type` parameters, names lowercased.
    pub content_params: HashMap<String, String>,
    /// Lowercased disposition (`attachment`, `inline`, or empty).
    pub disposition: String,
    /// `Content-Disposition` parameters, names lowercased.
    pub disposition_params: HashMap<String, String>,
    /// `Content-Transfer-Encoding` value as supplied.
    pub encoding: String,
    /// Lowercased charset, if known.
    pub charset: String,
    /// First non-empty of the disposition `filename`, content-type `name`
    /// and content-type `file` parameters, encoded words decoded.
    pub filename: String,

    /// The full header multimap.
    pub header: HeaderMap,

    pub parent: Option<PartId>,
    /// Children, in on-wire order.
    pub subparts: Vec<PartId>,
    /// Bytes after this multipart's close-delimiter, up to the parent's
    /// next boundary or EOF.
    pub epilogue: Vec<u8>,
    /// Recoverable anomalies, in the order they were produced.
    pub errors: Vec<Diagnostic>,

    /// Absolute offset of this part's first header byte in the backing
    /// store.
    pub part_offset: u64,
    /// Length of the header region, terminating blank line included.
    pub header_len: u64,
    /// Length of the whole part (header region plus body region).
    pub part_len: u64,

    store: Arc<MessageStore>,
    boundary: String,
}

impl Part {
    fn new(store: Arc<MessageStore>, parent: Option<PartId>) -> Self {
        Part {
            descriptor: String::new(),
            content_type: String::new(),
            content_params: HashMap::new(),
            disposition: String::new(),
            disposition_params: HashMap::new(),
            encoding: String::new(),
            charset: String::new(),
            filename: String::new(),
            header: HeaderMap::default(),
            parent,
            subparts: Vec::new(),
            epilogue: Vec::new(),
            errors: Vec::new(),
            part_offset: 0,
            header_len: 0,
            part_len: 0,
            store,
            boundary: String::new(),
        }
    }

    /// Body length in bytes (the raw, transfer-encoded body).
    pub fn size(&self) -> u64 {
        self.part_len - self.header_len
    }

    /// Whether this part is an attachment: an `attachment` disposition or
    /// any filename.
    pub fn is_attachment(&self) -> bool {
        "attachment" == self.disposition || !self.filename.is_empty()
    }

    /// A reader over the raw header region.
    pub fn header_reader(&self) -> SectionReader {
        SectionReader::new(
            Arc::clone(&self.store),
            self.part_offset,
            self.header_len,
        )
    }

    /// A reader over the raw (still transfer-encoded) body region.
    pub fn body_reader(&self) -> SectionReader {
        SectionReader::new(
            Arc::clone(&self.store),
            self.part_offset + self.header_len,
            self.part_len - self.header_len,
        )
    }

    /// A reader over the entire part: header region then body region.
    pub fn raw_reader(&self) -> SectionReader {
        SectionReader::new(
            Arc::clone(&self.store),
            self.part_offset,
            self.part_len,
        )
    }

    /// A reader over the transfer-decoded, charset-converted content.
    ///
    /// An unrecognised `Content-Transfer-Encoding` yields the raw bytes;
    /// a charset the registry cannot resolve yields transfer-decoded but
    /// unconverted bytes. Attachments are never charset-converted. Either
    /// condition, and any malformed base64 encountered while the reader is
    /// pulled, is reported through
    /// [`DecodedReader::diagnostics`]; `Part::errors` is not updated
    /// after the parse.
    pub fn decode(&self) -> DecodedReader {
        let diagnostics: DiagnosticSink = Rc::new(RefCell::new(Vec::new()));
        let mut r: Box<dyn Read> = Box::new(self.body_reader());
        let mut decodable = true;

        match self.encoding.to_ascii_lowercase().as_str() {
            "quoted-printable" => r = Box::new(QpReader::new(r)),
            "base64" => {
                r = Box::new(Base64Decoder::new(Base64Cleaner::new(
                    r,
                    Rc::clone(&diagnostics),
                )))
            },
            "7bit" | "8bit" | "binary" | "" => (),
            other => {
                decodable = false;
                diagnostics.borrow_mut().push(Diagnostic::new(
                    DiagnosticKind::ContentEncoding,
                    format!(
                        "unrecognized Content-Transfer-Encoding {:?}",
                        other
                    ),
                ));
            },
        }

        if decodable && !self.is_attachment() && !self.charset.is_empty() {
            // Badly formed charsets like charset="charset=utf-8" can often
            // be salvaged by retrying with the right-hand side.
            let encoding = charset::lookup(&self.charset).or_else(|| {
                match self.charset.split_once('=') {
                    Some((head, rest))
                        if head.trim().eq_ignore_ascii_case("charset") =>
                    {
                        charset::lookup(rest)
                    },
                    _ => None,
                }
            });

            match encoding {
                Some(encoding) => {
                    r = Box::new(charset::CharsetConverter::new(encoding, r))
                },
                None => diagnostics.borrow_mut().push(Diagnostic::new(
                    DiagnosticKind::CharsetConversion,
                    format!("no converter for charset {:?}", self.charset),
                )),
            }
        }

        DecodedReader {
            inner: r,
            diagnostics,
        }
    }
}

impl fmt::Display for Part {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} <{}>", self.descriptor, self.content_type)
    }
}

impl fmt::Debug for Part {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Part")
            .field("descriptor", &self.descriptor)
            .field("content_type", &self.content_type)
            .field("disposition", &self.disposition)
            .field("filename", &self.filename)
            .field("parent", &self.parent)
            .field("subparts", &self.subparts)
            .field("part_offset", &self.part_offset)
            .field("header_len", &self.header_len)
            .field("part_len", &self.part_len)
            .field("errors", &self.errors)
            .finish()
    }
}

/// Reader over a part's decoded content; see [`Part::decode`].
pub struct DecodedReader {
    inner: Box<dyn Read>,
    diagnostics: DiagnosticSink,
}

impl DecodedReader {
    /// Diagnostics produced while constructing and pulling this reader,
    /// in order of occurrence. Malformed-base64 reports only appear once
    /// the offending bytes have been read.
    pub fn diagnostics(&self) -> Vec<Diagnostic> {
        self.diagnostics.borrow().clone()
    }
}

impl Read for DecodedReader {
    fn read(&mut self, dst: &mut [u8]) -> io::Result<usize> {
        self.inner.read(dst)
    }
}

impl fmt::Debug for DecodedReader {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("DecodedReader")
            .field("diagnostics", &self.diagnostics.borrow())
            .finish()
    }
}

/// Consumes `input` to completion and parses it into a part tree.
pub fn read_parts(mut input: impl Read) -> Result<Message, Error> {
    let mut writer = StoreWriter::new();
    io::copy(&mut input, &mut writer)?;
    let store = Arc::new(writer.flip()?);
    let len = store.len();

    let mut parts = vec![Part::new(Arc::clone(&store), None)];
    parts[0].part_len = len;

    let mut reader = SectionReader::new(Arc::clone(&store), 0, len);
    read_part(&mut parts, 0, &mut reader, 0)?;

    Ok(Message { parts, store })
}

/// Counts the bytes pulled through it, so the tree builder can recover
/// absolute offsets from a forward-only read.
struct CountingReader<'a> {
    inner: &'a mut dyn Read,
    count: u64,
}

impl<'a> CountingReader<'a> {
    fn new(inner: &'a mut dyn Read) -> Self {
        CountingReader { inner, count: 0 }
    }
}

impl Read for CountingReader<'_> {
    fn read(&mut self, dst: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(dst)?;
        self.count += n as u64;
        Ok(n)
    }
}

/// Bytes of the current region consumed so far: everything pulled from the
/// underlying reader minus what still sits in the buffer.
fn consumed(br: &io::BufReader<CountingReader>) -> u64 {
    br.get_ref().count - br.buffer().len() as u64
}

/// Parses one part (headers, then body) whose first header byte is the
/// next byte of `r`. `parts[idx].part_offset` must already be set.
fn read_part(
    parts: &mut Vec<Part>,
    idx: usize,
    r: &mut dyn Read,
    depth: u32,
) -> Result<(), Error> {
    if depth > MAX_NESTING_DEPTH {
        return Err(Error::TooDeeplyNested);
    }

    let mut br = io::BufReader::new(CountingReader::new(r));

    let mut diags = Vec::new();
    let header = header::read_header(&mut br, &mut diags)?;
    parts[idx].header_len = consumed(&br);
    parts[idx].errors.append(&mut diags);

    // Content-Type, with the RFC 2046 5.1 text/plain us-ascii default.
    let mut media = MediaType {
        essence: "text/plain".to_owned(),
        params: [("charset".to_owned(), "us-ascii".to_owned())]
            .into_iter()
            .collect(),
    };
    match header.get(header::CONTENT_TYPE) {
        Some(ctype) => {
            // A Content-Type too mangled for the tolerance ladder is fatal
            // for the whole parse; there is no way to even guess at the
            // structure of the body.
            media = media_type::parse_media_type(ctype)?;
        },
        None => {
            // The default is defined for the root; anywhere else the
            // producer dropped a header it should have written.
            if parts[idx].parent.is_some() {
                parts[idx].errors.push(Diagnostic::new(
                    DiagnosticKind::MissingContentType,
                    "MIME parts should have a Content-Type header",
                ));
            }
        },
    }

    {
        let part = &mut parts[idx];
        part.content_type = media.essence.clone();
        part.charset = media
            .param(header::HP_CHARSET)
            .map(str::to_ascii_lowercase)
            .unwrap_or_default();
        part.encoding = header
            .get(header::CONTENT_TRANSFER_ENCODING)
            .unwrap_or_default()
            .to_owned();
        part.boundary = media
            .param(header::HP_BOUNDARY)
            .unwrap_or_default()
            .to_owned();
        part.header = header;
        part.content_params = media.params;
        setup_content_headers(part);
    }

    if !parts[idx].boundary.is_empty() {
        // A boundary parameter means the body is itself a multipart.
        parse_parts(parts, idx, &mut br, depth)?;
    } else if parts[idx].content_type == CONTENT_TYPE_RFC822 {
        // An embedded message: a single inner part sharing this one's
        // descriptor, starting right after this part's header block.
        let inner_idx = parts.len();
        let mut inner = Part::new(
            Arc::clone(&parts[idx].store),
            Some(PartId(idx as u32)),
        );
        inner.part_offset = parts[idx].part_offset + parts[idx].header_len;
        inner.descriptor = parts[idx].descriptor.clone();
        parts.push(inner);

        match read_part(parts, inner_idx, &mut br, depth + 1) {
            Ok(()) => (),
            Err(Error::EmptyHeaderBlock) => {
                // The container promised a message but the region ended
                // before one began.
                parts.truncate(inner_idx);
                warn!("empty message/rfc822 part {}", parts[idx].descriptor);
                parts[idx].errors.push(Diagnostic::new(
                    DiagnosticKind::MissingBoundary,
                    "message/rfc822 part ended before its embedded message",
                ));
            },
            Err(e) => return Err(e),
        }
    } else {
        // Leaf: drain to the end of the region so the extent is known. A
        // region cut short by a missing enclosing boundary is the
        // enclosing multipart's problem, not this part's.
        match io::copy(&mut br, &mut io::sink()) {
            Ok(_) => (),
            Err(e) if io::ErrorKind::UnexpectedEof == e.kind() => (),
            Err(e) => return Err(e.into()),
        }
    }

    if let Some(parent) = parts[idx].parent {
        let id = PartId(idx as u32);
        parts[parent.index()].subparts.push(id);
    }

    parts[idx].part_len = consumed(&br);

    Ok(())
}

/// Splits the body of `parts[parent_idx]` at its boundary and parses each
/// segment as a child part.
fn parse_parts(
    parts: &mut Vec<Part>,
    parent_idx: usize,
    br: &mut io::BufReader<CountingReader>,
    depth: u32,
) -> Result<(), Error> {
    let first_recursion = parts[parent_idx].parent.is_none();
    if first_recursion {
        parts[parent_idx].descriptor = "0".to_owned();
    }

    let boundary = parts[parent_idx].boundary.clone();
    let base_offset = parts[parent_idx].part_offset;
    let start = consumed(br);

    let mut bd = BoundaryReader::new(br, &boundary);
    let mut index = 0u32;
    let mut advance = true;
    let missing_close;

    loop {
        if advance {
            match bd.next() {
                Ok(true) => (),
                Ok(false) => {
                    missing_close = bd.missing_close();
                    break;
                },
                Err(e) if io::ErrorKind::UnexpectedEof == e.kind() => {
                    // The enclosing region itself was truncated.
                    missing_close = true;
                    break;
                },
                Err(e) => return Err(e.into()),
            }
        }
        advance = true;
        index += 1;

        if parts.len() >= MAX_PARTS {
            warn!(
                "too many parts, not descending past {}",
                parts[parent_idx].descriptor
            );
            missing_close = false;
            break;
        }

        let child_idx = parts.len();
        let mut child = Part::new(
            Arc::clone(&parts[parent_idx].store),
            Some(PartId(parent_idx as u32)),
        );
        child.part_offset = base_offset + start + bd.consumed();
        child.descriptor = if first_recursion {
            index.to_string()
        } else {
            format!("{}.{}", parts[parent_idx].descriptor, index)
        };
        parts.push(child);

        match read_part(parts, child_idx, &mut bd, depth + 1) {
            Ok(()) => (),
            Err(Error::EmptyHeaderBlock) => {
                // An empty header block right after a boundary means the
                // part does not actually exist, typically because the
                // final boundary lacked its trailing "--". Probe for a
                // further part before giving up.
                parts.truncate(child_idx);
                index -= 1;
                match bd.next() {
                    Ok(true) => advance = false,
                    Ok(false) => {
                        missing_close = bd.missing_close();
                        break;
                    },
                    Err(e)
                        if io::ErrorKind::UnexpectedEof == e.kind() =>
                    {
                        missing_close = true;
                        break;
                    },
                    Err(e) => return Err(e.into()),
                }
            },
            Err(e) => return Err(e),
        }
    }

    if missing_close {
        warn!("boundary {:?} was not closed correctly", boundary);
        parts[parent_idx].errors.push(Diagnostic::new(
            DiagnosticKind::MissingBoundary,
            format!("boundary {:?} was not closed", boundary),
        ));
    }

    // Anything left after the close-delimiter is the epilogue.
    let mut epilogue = Vec::new();
    match br.read_to_end(&mut epilogue) {
        Ok(_) => (),
        Err(e) if io::ErrorKind::UnexpectedEof == e.kind() => (),
        Err(e) => return Err(e.into()),
    }
    parts[parent_idx].epilogue = epilogue;

    // A nested multipart is the root of its own subtree; mark it.
    if !first_recursion {
        parts[parent_idx].descriptor.push_str(".0");
    }

    Ok(())
}

/// Populates disposition, disposition parameters and the filename from
/// `Content-Disposition` and the content-type parameters.
fn setup_content_headers(part: &mut Part) {
    if let Ok(disposition) = media_type::parse_media_type(
        part.header.get(header::CONTENT_DISPOSITION).unwrap_or(""),
    ) {
        // Disposition is optional; a missing or mangled one stays empty.
        part.disposition = disposition.essence.clone();
        part.filename = encoded_word::decode_unstructured(
            disposition.param(header::HP_FILENAME).unwrap_or(""),
            &mut part.errors,
        )
        .into_owned();
        part.disposition_params = disposition.params;
    }

    for fallback in [header::HP_NAME, header::HP_FILE] {
        if !part.filename.is_empty() {
            break;
        }
        if let Some(value) = part.content_params.get(fallback) {
            part.filename = encoded_word::decode_unstructured(
                value,
                &mut part.errors,
            )
            .into_owned();
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn parse(message: &[u8]) -> Message {
        crate::init_test_log();
        read_parts(message).expect("unexpected parse error")
    }

    fn decoded(part: &Part) -> Vec<u8> {
        let mut out = Vec::new();
        part.decode().read_to_end(&mut out).unwrap();
        out
    }

    fn raw_body(part: &Part) -> Vec<u8> {
        let mut out = Vec::new();
        part.body_reader().read_to_end(&mut out).unwrap();
        out
    }

    fn kinds(diags: &[Diagnostic]) -> Vec<DiagnosticKind> {
        diags.iter().map(|d| d.kind).collect()
    }

    /// Every tree must satisfy the structural invariants: offsets nest,
    /// every non-root part appears in its parent's subparts exactly once,
    /// and subparts point back at their parent.
    fn check_invariants(message: &Message) {
        let total = message.root().part_len;
        for (i, part) in message.parts().enumerate() {
            assert!(part.header_len <= part.part_len, "{}", part);
            assert!(part.part_offset + part.part_len <= total, "{}", part);

            match part.parent {
                None => assert_eq!(0, i),
                Some(parent) => {
                    let parent = message.part(parent);
                    assert_eq!(
                        1,
                        parent
                            .subparts
                            .iter()
                            .filter(|id| id.index() == i)
                            .count(),
                        "{} not linked exactly once from {}",
                        part,
                        parent
                    );
                    assert!(
                        part.part_offset >= parent.part_offset
                            && part.part_offset + part.part_len
                                <= parent.part_offset + parent.part_len,
                        "{} does not nest within {}",
                        part,
                        parent
                    );
                },
            }

            for &child in &part.subparts {
                assert_eq!(
                    Some(PartId(i as u32)),
                    message.part(child).parent
                );
            }
        }
    }

    #[test]
    fn plain_text_root() {
        let message = parse(
            b"Content-Type: text/plain; charset=us-ascii\r\n\
              Content-Transfer-Encoding: 7bit\r\n\
              \r\n\
              Test of text/plain section\r\n",
        );
        check_invariants(&message);

        let root = message.root();
        assert_eq!("text/plain", root.content_type);
        assert_eq!("us-ascii", root.charset);
        assert_eq!("7bit", root.encoding);
        assert_eq!("", root.descriptor);
        assert!(root.subparts.is_empty());
        assert!(root.errors.is_empty());

        assert_eq!(b"Test of text/plain section\r\n".to_vec(), raw_body(root));
        // Identity encodings decode to the raw body bytes.
        assert_eq!(raw_body(root), decoded(root));

        let mut header = Vec::new();
        root.header_reader().read_to_end(&mut header).unwrap();
        assert!(header.starts_with(b"Content-Type:"));
        assert!(header.ends_with(b"\r\n\r\n"));
    }

    #[test]
    fn quoted_printable_leaf() {
        let message = parse(
            b"Content-Type: text/plain; charset=us-ascii\r\n\
              Content-Transfer-Encoding: quoted-printable\r\n\
              \r\n\
              Start=\r\n\
              ABC=\r\n\
              Finish",
        );
        let root = message.root();
        assert_eq!("quoted-printable", root.encoding);
        assert_eq!(b"StartABCFinish".to_vec(), decoded(root));
    }

    #[test]
    fn multipart_alternative() {
        let message = parse(
            b"Content-Type: multipart/alternative; boundary=b\r\n\
              \r\n\
              --b\r\n\
              Content-Type: text/plain; charset=us-ascii\r\n\
              \r\n\
              A text section\r\n\
              --b\r\n\
              Content-Type: text/html; charset=us-ascii\r\n\
              \r\n\
              An HTML section\r\n\
              --b--\r\n",
        );
        check_invariants(&message);

        let root = message.root();
        assert_eq!("multipart/alternative", root.content_type);
        assert_eq!("0", root.descriptor);
        assert_eq!(2, root.subparts.len());
        assert!(root.errors.is_empty());

        let p1 = message.part(root.subparts[0]);
        assert_eq!("1", p1.descriptor);
        assert_eq!("text/plain", p1.content_type);
        assert_eq!("us-ascii", p1.charset);
        assert_eq!(b"A text section".to_vec(), decoded(p1));

        let p2 = message.part(root.subparts[1]);
        assert_eq!("2", p2.descriptor);
        assert_eq!("text/html", p2.content_type);
        assert_eq!(b"An HTML section".to_vec(), decoded(p2));
    }

    #[test]
    fn nested_alternative_with_related() {
        let message = parse(
            b"Content-Type: multipart/alternative; boundary=b-outer\r\n\
              \r\n\
              --b-outer\r\n\
              Content-Type: text/plain; charset=us-ascii\r\n\
              \r\n\
              A text section\r\n\
              --b-outer\r\n\
              Content-Type: multipart/related; boundary=b-inner\r\n\
              \r\n\
              --b-inner\r\n\
              Content-Type: text/html; charset=us-ascii\r\n\
              \r\n\
              An HTML section\r\n\
              --b-inner\r\n\
              Content-Type: text/plain\r\n\
              Content-Disposition: inline; filename=attach.txt\r\n\
              \r\n\
              An inline text attachment\r\n\
              --b-inner\r\n\
              Content-Type: text/plain\r\n\
              Content-Disposition: inline; filename=attach2.txt\r\n\
              \r\n\
              Another inline text attachment\r\n\
              --b-inner--\r\n\
              --b-outer--\r\n",
        );
        check_invariants(&message);

        let root = message.root();
        assert_eq!("0", root.descriptor);
        assert_eq!(2, root.subparts.len());

        let p1 = message.part(root.subparts[0]);
        assert_eq!("1", p1.descriptor);
        assert_eq!(b"A text section".to_vec(), decoded(p1));

        let p2 = message.part(root.subparts[1]);
        assert_eq!("2.0", p2.descriptor);
        assert_eq!("multipart/related", p2.content_type);
        assert_eq!(3, p2.subparts.len());

        let p3 = message.part(p2.subparts[0]);
        assert_eq!("2.1", p3.descriptor);
        assert_eq!("text/html", p3.content_type);
        assert_eq!(b"An HTML section".to_vec(), decoded(p3));

        let p4 = message.part(p2.subparts[1]);
        assert_eq!("2.2", p4.descriptor);
        assert_eq!("inline", p4.disposition);
        assert_eq!("attach.txt", p4.filename);
        assert!(p4.is_attachment());
        assert_eq!(b"An inline text attachment".to_vec(), decoded(p4));

        let p5 = message.part(p2.subparts[2]);
        assert_eq!("2.3", p5.descriptor);
        assert_eq!("attach2.txt", p5.filename);
        assert_eq!(
            b"Another inline text attachment".to_vec(),
            decoded(p5)
        );
    }

    #[test]
    fn prefix_collision_boundaries() {
        let message = parse(
            b"Content-Type: multipart/mixed; boundary=abc\r\n\
              \r\n\
              --abc\r\n\
              Content-Type: text/plain; charset=us-ascii\r\n\
              \r\n\
              Section one\r\n\
              --abc\r\n\
              Content-Type: multipart/alternative; boundary=abc_d\r\n\
              \r\n\
              --abc_d\r\n\
              Content-Type: text/plain; charset=us-ascii\r\n\
              \r\n\
              A text section\r\n\
              --abc_d\r\n\
              Content-Type: text/html; charset=us-ascii\r\n\
              \r\n\
              An HTML section\r\n\
              --abc_d--\r\n\
              --abc--\r\n",
        );
        check_invariants(&message);

        let root = message.root();
        assert_eq!(2, root.subparts.len());
        assert!(root.errors.is_empty());

        let p1 = message.part(root.subparts[0]);
        assert_eq!("1", p1.descriptor);
        assert_eq!(b"Section one".to_vec(), decoded(p1));

        let p2 = message.part(root.subparts[1]);
        assert_eq!("2.0", p2.descriptor);
        assert_eq!("multipart/alternative", p2.content_type);
        assert_eq!(2, p2.subparts.len());
        assert!(p2.errors.is_empty());

        assert_eq!(
            b"A text section".to_vec(),
            decoded(message.part(p2.subparts[0]))
        );
        assert_eq!("2.1", message.part(p2.subparts[0]).descriptor);
        assert_eq!(
            b"An HTML section".to_vec(),
            decoded(message.part(p2.subparts[1]))
        );
        assert_eq!("2.2", message.part(p2.subparts[1]).descriptor);
    }

    #[test]
    fn bad_closing_boundary() {
        let message = parse(
            b"Content-Type: multipart/alternative; boundary=b\r\n\
              \r\n\
              --b\r\n\
              Content-Type: text/plain; charset=us-ascii\r\n\
              \r\n\
              A text section\r\n\
              --b\r\n\
              Content-Type: text/html; charset=us-ascii\r\n\
              \r\n\
              An HTML section\r\n\
              --b\r\n",
        );
        check_invariants(&message);

        let root = message.root();
        assert_eq!(2, root.subparts.len());
        assert_eq!(
            vec![DiagnosticKind::MissingBoundary],
            kinds(&root.errors)
        );

        assert_eq!(
            b"A text section".to_vec(),
            decoded(message.part(root.subparts[0]))
        );
        assert_eq!(
            b"An HTML section".to_vec(),
            decoded(message.part(root.subparts[1]))
        );
    }

    #[test]
    fn missing_close_delimiter_entirely() {
        let message = parse(
            b"Content-Type: multipart/mixed; boundary=b\r\n\
              \r\n\
              --b\r\n\
              Content-Type: text/plain\r\n\
              \r\n\
              runs straight into EOF\r\n",
        );
        check_invariants(&message);

        let root = message.root();
        assert_eq!(1, root.subparts.len());
        assert_eq!(
            vec![DiagnosticKind::MissingBoundary],
            kinds(&root.errors)
        );
        // The part still yields everything up to EOF.
        assert_eq!(
            b"runs straight into EOF\r\n".to_vec(),
            raw_body(message.part(root.subparts[0]))
        );
    }

    #[test]
    fn binary_attachment_not_charset_converted() {
        let want = [
            0x50u8, 0x4B, 0x03, 0x04, 0x14, 0x00, 0x08, 0x00, 0x08, 0x00,
            0xC2, 0x02, 0x29, 0x4A, 0x00, 0x00,
        ];

        let message = parse(
            b"Content-Type: multipart/mixed; boundary=b\r\n\
              \r\n\
              --b\r\n\
              Content-Type: text/plain; charset=us-ascii\r\n\
              \r\n\
              A text section\r\n\
              --b\r\n\
              Content-Type: application/octet-stream; charset=us-ascii\r\n\
              Content-Disposition: attachment; filename=test.bin\r\n\
              Content-Transfer-Encoding: base64\r\n\
              \r\n\
              UEsDBBQACAAIAMICKUoAAA==\r\n\
              --b--\r\n",
        );
        check_invariants(&message);

        let p2 = message.part(message.root().subparts[1]);
        assert_eq!("application/octet-stream", p2.content_type);
        assert_eq!("attachment", p2.disposition);
        assert_eq!("test.bin", p2.filename);
        assert_eq!("us-ascii", p2.charset);
        assert!(p2.is_attachment());

        // The charset never touches an attachment; byte 0xC2 survives.
        assert_eq!(want.to_vec(), decoded(p2));
    }

    #[test]
    fn root_missing_content_type_defaults_silently() {
        let message = parse(b"Subject: hi\r\n\r\nbody\r\n");
        let root = message.root();
        assert_eq!("text/plain", root.content_type);
        assert_eq!("us-ascii", root.charset);
        assert!(root.errors.is_empty());
    }

    #[test]
    fn part_missing_content_type_warns() {
        let message = parse(
            b"Content-Type: multipart/alternative; boundary=b\r\n\
              \r\n\
              --b\r\n\
              X-Comment: no content type here\r\n\
              \r\n\
              A text section\r\n\
              --b\r\n\
              Content-Type: text/html; charset=us-ascii\r\n\
              \r\n\
              An HTML section\r\n\
              --b--\r\n",
        );
        check_invariants(&message);

        let p1 = message.part(message.root().subparts[0]);
        assert_eq!("text/plain", p1.content_type);
        assert_eq!("us-ascii", p1.charset);
        assert_eq!(
            vec![DiagnosticKind::MissingContentType],
            kinds(&p1.errors)
        );
        assert_eq!(b"A text section".to_vec(), decoded(p1));

        let p2 = message.part(message.root().subparts[1]);
        assert!(p2.errors.is_empty());
    }

    #[test]
    fn part_with_empty_header_block() {
        let message = parse(
            b"Content-Type: multipart/alternative; boundary=b\r\n\
              \r\n\
              --b\r\n\
              \r\n\
              A text section\r\n\
              --b--\r\n",
        );
        check_invariants(&message);

        let p1 = message.part(message.root().subparts[0]);
        assert!(p1.header.is_empty());
        assert_eq!("text/plain", p1.content_type);
        assert_eq!("us-ascii", p1.charset);
        assert_eq!(b"A text section".to_vec(), decoded(p1));
    }

    #[test]
    fn embedded_rfc822() {
        let message = parse(
            b"Content-Type: multipart/mixed; boundary=b\r\n\
              \r\n\
              --b\r\n\
              Content-Type: text/x-myown; charset=us-ascii\r\n\
              \r\n\
              hello\r\n\
              --b\r\n\
              Content-Type: message/rfc822\r\n\
              \r\n\
              Content-Type: multipart/alternative; boundary=c\r\n\
              \r\n\
              --c\r\n\
              Content-Type: text/html\r\n\
              \r\n\
              <p>Hello world</p>\r\n\
              --c\r\n\
              Content-Type: text/plain\r\n\
              \r\n\
              Hello another world\r\n\
              --c--\r\n\
              --b--\r\n",
        );
        check_invariants(&message);

        let root = message.root();
        assert_eq!("0", root.descriptor);
        assert_eq!(2, root.subparts.len());

        let p1 = message.part(root.subparts[0]);
        assert_eq!("1", p1.descriptor);
        assert_eq!("text/x-myown", p1.content_type);
        assert_eq!(b"hello".to_vec(), decoded(p1));

        let p2 = message.part(root.subparts[1]);
        assert_eq!("2", p2.descriptor);
        assert_eq!("message/rfc822", p2.content_type);
        assert_eq!(1, p2.subparts.len());

        // The embedded message shares its container's section number.
        let p3 = message.part(p2.subparts[0]);
        assert_eq!("2.0", p3.descriptor);
        assert_eq!("multipart/alternative", p3.content_type);
        assert_eq!(2, p3.subparts.len());

        let p4 = message.part(p3.subparts[0]);
        assert_eq!("2.1", p4.descriptor);
        assert_eq!(b"<p>Hello world</p>".to_vec(), decoded(p4));

        let p5 = message.part(p3.subparts[1]);
        assert_eq!("2.2", p5.descriptor);
        assert_eq!(b"Hello another world".to_vec(), decoded(p5));
    }

    #[test]
    fn single_rfc822_root() {
        let message = parse(
            b"Content-Type: message/rfc822\r\n\
              \r\n\
              Content-Type: text/plain; charset=us-ascii\r\n\
              \r\n\
              Hello world\r\n",
        );
        check_invariants(&message);

        let root = message.root();
        assert_eq!("message/rfc822", root.content_type);
        assert_eq!(1, root.subparts.len());

        let inner = message.part(root.subparts[0]);
        assert_eq!(root.descriptor, inner.descriptor);
        assert_eq!("text/plain", inner.content_type);
        assert_eq!(b"Hello world\r\n".to_vec(), decoded(inner));
        assert_eq!(
            root.part_offset + root.header_len,
            inner.part_offset
        );
    }

    #[test]
    fn preamble_and_epilogue() {
        let message = parse(
            b"Content-Type: multipart/mixed; boundary=b\r\n\
              \r\n\
              This is the preamble, to be ignored.\r\n\
              --b\r\n\
              Content-Type: text/plain\r\n\
              \r\n\
              x\r\n\
              --b--\r\n\
              the epilogue\r\n",
        );
        check_invariants(&message);

        let root = message.root();
        assert_eq!(1, root.subparts.len());
        assert_eq!(b"the epilogue\r\n".to_vec(), root.epilogue);
        assert_eq!(b"x".to_vec(), decoded(message.part(root.subparts[0])));
    }

    #[test]
    fn duplicate_charset_parameter_first_wins() {
        let message = parse(
            b"Content-Type: text/plain; charset=us-ascii; charset=utf-8\r\n\
              \r\n\
              x",
        );
        assert_eq!("us-ascii", message.root().charset);
    }

    #[test]
    fn filename_from_content_type_name() {
        let message = parse(
            b"Content-Type: application/pdf; name=\"doc.pdf\"\r\n\
              \r\n\
              x",
        );
        let root = message.root();
        assert_eq!("doc.pdf", root.filename);
        assert!(root.is_attachment());
    }

    #[test]
    fn filename_encoded_word_decoded() {
        let message = parse(
            b"Content-Type: application/pdf\r\n\
              Content-Disposition: attachment; \
              filename=\"=?ISO-8859-1?Q?Andr=E9?=\"\r\n\
              \r\n\
              x",
        );
        assert_eq!("Andr\u{e9}", message.root().filename);
    }

    #[test]
    fn decode_8bit_with_charset_conversion() {
        let message = parse(
            b"Content-Type: text/plain; charset=ISO-8859-1\r\n\
              Content-Transfer-Encoding: 8bit\r\n\
              \r\n\
              strange \xE6ons\r\n",
        );
        let root = message.root();
        assert_eq!("iso-8859-1", root.charset);
        assert_eq!(
            "strange \u{e6}ons\r\n".as_bytes().to_vec(),
            decoded(root)
        );
    }

    #[test]
    fn decode_salvages_nested_charset_label() {
        let message = parse(
            b"Content-Type: text/plain; charset=\"charset=ISO-8859-1\"\r\n\
              Content-Transfer-Encoding: 8bit\r\n\
              \r\n\
              strange \xE6ons\r\n",
        );
        let root = message.root();
        let mut reader = root.decode();
        let mut out = Vec::new();
        reader.read_to_end(&mut out).unwrap();
        assert_eq!("strange \u{e6}ons\r\n".as_bytes().to_vec(), out);
    }

    #[test]
    fn decode_unknown_charset_leaves_bytes() {
        let message = parse(
            b"Content-Type: text/plain; charset=x-no-such\r\n\
              \r\n\
              raw \xE6 bytes\r\n",
        );
        let mut reader = message.root().decode();
        let mut out = Vec::new();
        reader.read_to_end(&mut out).unwrap();
        assert_eq!(b"raw \xE6 bytes\r\n".to_vec(), out);
        assert_eq!(
            vec![DiagnosticKind::CharsetConversion],
            kinds(&reader.diagnostics())
        );
    }

    #[test]
    fn decode_unknown_transfer_encoding_leaves_bytes() {
        let message = parse(
            b"Content-Type: application/octet-stream\r\n\
              Content-Transfer-Encoding: uuencode\r\n\
              \r\n\
              raw body\r\n",
        );
        let mut reader = message.root().decode();
        let mut out = Vec::new();
        reader.read_to_end(&mut out).unwrap();
        assert_eq!(b"raw body\r\n".to_vec(), out);
        assert_eq!(
            vec![DiagnosticKind::ContentEncoding],
            kinds(&reader.diagnostics())
        );
    }

    #[test]
    fn decode_reports_malformed_base64() {
        let message = parse(
            b"Content-Type: application/octet-stream\r\n\
              Content-Transfer-Encoding: base64\r\n\
              Content-Disposition: attachment; filename=a.bin\r\n\
              \r\n\
              Zm$9v\r\n",
        );
        let mut reader = message.root().decode();
        let mut out = Vec::new();
        reader.read_to_end(&mut out).unwrap();
        assert_eq!(b"foo".to_vec(), out);
        assert_eq!(
            vec![DiagnosticKind::MalformedBase64],
            kinds(&reader.diagnostics())
        );
        // Decode diagnostics do not flow back onto the part.
        assert!(message.root().errors.is_empty());
    }

    #[test]
    fn walk_is_preorder_and_halts() {
        let message = parse(
            b"Content-Type: multipart/mixed; boundary=b\r\n\
              \r\n\
              --b\r\n\
              Content-Type: text/plain\r\n\
              \r\n\
              one\r\n\
              --b\r\n\
              Content-Type: text/plain\r\n\
              \r\n\
              two\r\n\
              --b--\r\n",
        );

        let mut seen = Vec::new();
        message
            .walk(|part| -> Result<(), ()> {
                seen.push(part.descriptor.clone());
                Ok(())
            })
            .unwrap();
        assert_eq!(vec!["0", "1", "2"], seen);

        let mut visits = 0;
        let halted = message.walk(|_| -> Result<(), &str> {
            visits += 1;
            Err("stop")
        });
        assert_eq!(Err("stop"), halted);
        assert_eq!(1, visits);
    }

    fn fill(ch: u8, size: usize) -> Vec<u8> {
        let mut buf = Vec::with_capacity(size + size / 70);
        for i in 0..size {
            buf.push(ch);
            if i > 0 && i % 70 == 0 {
                buf.push(b'\n');
            }
        }
        buf
    }

    fn generate(content: &[Vec<u8>]) -> Vec<u8> {
        let mut m = Vec::new();
        m.extend_from_slice(
            b"From: John Doe <jdoe@machine.example>\r\n\
              To: Mary Smith <mary@example.net>\r\n\
              Subject: Saying Hello\r\n\
              Content-Type: multipart/mixed; boundary=\"part_0\"\r\n\
              \r\n\
              preamble\r\n\
              \r\n",
        );

        let leaf = |m: &mut Vec<u8>, boundary: &str, ctype: &str, body: &[u8]| {
            m.extend_from_slice(format!("--{}\r\n", boundary).as_bytes());
            m.extend_from_slice(
                format!("Content-Type: {}\r\n\r\n", ctype).as_bytes(),
            );
            m.extend_from_slice(body);
            m.extend_from_slice(b"\r\n");
        };

        m.extend_from_slice(
            b"--part_0\r\n\
              Content-Type: multipart/related; boundary=\"part_1_0\"\r\n\
              \r\n",
        );
        m.extend_from_slice(
            b"--part_1_0\r\n\
              Content-Type: multipart/alternative; boundary=\"part_1_1_0\"\r\n\
              \r\n",
        );
        leaf(&mut m, "part_1_1_0", "text/plain", &content[0]);
        leaf(&mut m, "part_1_1_0", "text/html", &content[1]);
        m.extend_from_slice(b"--part_1_1_0--\r\n");
        leaf(&mut m, "part_1_0", "image/bmp", &content[2]);
        m.extend_from_slice(b"--part_1_0--\r\n");
        leaf(&mut m, "part_0", "application/octet-stream", &content[3]);
        leaf(&mut m, "part_0", "application/octet-stream", &content[4]);
        m.extend_from_slice(b"--part_0--\r\n\r\nepilogue");
        m
    }

    fn autogen(sizes: [usize; 5]) {
        let content: Vec<Vec<u8>> = [b'a', b'b', b'c', b'd', b'e']
            .iter()
            .zip(sizes)
            .map(|(&ch, size)| fill(ch, size))
            .collect();
        let raw = generate(&content);
        let message = parse(&raw);
        check_invariants(&message);

        assert_eq!(raw.len() as u64, message.root().part_len);
        assert_eq!(b"\r\nepilogue".to_vec(), message.root().epilogue);

        let mut descriptors = Vec::new();
        let mut leaves = Vec::new();
        message
            .walk(|part| -> Result<(), ()> {
                descriptors.push(part.descriptor.clone());
                if !part.content_type.starts_with("multipart") {
                    leaves.push(raw_body(part));
                }
                Ok(())
            })
            .unwrap();

        assert_eq!(
            vec!["0", "1.0", "1.1.0", "1.1.1", "1.1.2", "1.2", "2", "3"],
            descriptors
        );
        assert_eq!(content, leaves);
    }

    #[test]
    fn autogen_small() {
        autogen([10, 20, 30, 1, 2]);
    }

    #[test]
    fn autogen_medium() {
        autogen([100, 200, 3000, 10, 20]);
    }

    // Large enough that the backing store spills to a temporary file.
    #[test]
    fn autogen_large() {
        autogen([10000, 20000, 300, 1000, 20000]);
    }

    #[test]
    fn part_display() {
        let message = parse(
            b"Content-Type: multipart/mixed; boundary=b\r\n\
              \r\n\
              --b\r\n\
              Content-Type: text/plain\r\n\
              \r\n\
              x\r\n\
              --b--\r\n",
        );
        assert_eq!("0 <multipart/mixed>", message.root().to_string());
        assert_eq!(
            "1 <text/plain>",
            message.part(message.root().subparts[0]).to_string()
        );
    }

    #[test]
    fn raw_reader_replays_whole_part() {
        let raw: &[u8] = b"Content-Type: text/plain\r\n\r\nhello";
        let message = parse(raw);
        let mut replay = Vec::new();
        message
            .root()
            .raw_reader()
            .read_to_end(&mut replay)
            .unwrap();
        assert_eq!(raw.to_vec(), replay);
    }

    #[test]
    fn deeply_nested_parts_are_fatal() {
        let mut m = Vec::new();
        for i in 0..30 {
            m.extend_from_slice(
                format!(
                    "Content-Type: multipart/mixed; boundary=b{}\r\n\r\n--b{}\r\n",
                    i, i
                )
                .as_bytes(),
            );
        }
        assert_matches!(
            Err(Error::TooDeeplyNested),
            read_parts(&m[..])
        );
    }

    #[test]
    fn unparseable_content_type_is_fatal() {
        assert_matches!(
            Err(Error::InvalidMediaType(_)),
            read_parts(&b"Content-Type: ;;;\r\n\r\nbody"[..])
        );
    }
}
