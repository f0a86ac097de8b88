//! The parse entry point: header, `startxref` discovery, the chain walk
//! over tables, streams and hybrids, trailer consolidation, offset
//! validation, and security-gate installation.

use crate::document::{Document, ParseOptions};
use crate::encryption::{DecryptionError, Decryptor};
use crate::recovery::BruteForceScanner;
use crate::resolver::{load_stream_payload, Resolver};
use crate::scanner::{is_whitespace, Scanner};
use crate::source::Source;
use crate::xref::{Xref, XrefEntry};
use crate::xref_stream::decode_xref_stream;
use crate::{filters, parser};
use crate::{Dictionary, Error, Object, Result, XrefError};
use log::warn;
use std::collections::HashSet;

pub(crate) struct Reader {
    source: Source,
    options: ParseOptions,
}

impl Reader {
    pub fn new(buffer: Vec<u8>, mut options: ParseOptions) -> Reader {
        // The configured tail window has a floor of 16 bytes.
        options.eof_lookup_range = options.eof_lookup_range.max(16);
        Reader {
            source: Source::from_bytes(buffer),
            options,
        }
    }

    /// Read the whole document structure: header, cross-reference chain
    /// (or raw-scan rebuild), consolidated trailer, security gate.
    pub fn read(self) -> Result<Document> {
        let version = parser::header(self.source.as_bytes()).ok_or(Error::MissingHeader)?;

        let (mut xref, mut trailer) = match self.resolve_chain() {
            Ok(chain) => chain,
            Err(err) if self.options.lenient && recoverable(&err) => {
                warn!("cross-reference chain unusable ({err}), rebuilding from raw bytes");
                self.rebuild_from_scan()?
            }
            Err(err) => return Err(err),
        };

        if self.options.lenient && !self.offsets_are_valid(&xref) {
            warn!("cross-reference offsets failed validation, adopting the raw-scan map");
            let mut scanner = BruteForceScanner::new(&self.source);
            // No decryptor yet: the gate can only be built once a trailer
            // exists, and the resolver rescans after it is installed.
            let (rebuilt, rebuilt_trailer) = scanner.rebuild(self.options.scratch, None);
            xref.replace_with(rebuilt);
            if trailer.get(b"Root").is_err() {
                if let Some(recovered) = rebuilt_trailer {
                    for (key, value) in recovered {
                        trailer.set_if_absent(key, value);
                    }
                }
            }
        }

        let max_id = xref.max_id();
        if xref.size != max_id + 1 {
            warn!(
                "Size entry of trailer dictionary is {}, correct value is {}.",
                xref.size,
                max_id + 1
            );
            xref.size = max_id + 1;
        }

        let material = self.options.decryption_material.clone().unwrap_or_default();
        let Reader { source, options } = self;
        let resolver = Resolver::new(source, xref, options);

        let document = Document {
            version,
            trailer,
            max_id,
            resolver,
        };

        // The security gate goes in only after the trailer is final; the
        // encryption chain resolved here stays undecrypted in the pool.
        if let Ok(encrypt) = document.trailer.get(b"Encrypt") {
            if !encrypt.is_null() {
                let resolved = document.resolver.dereference(encrypt)?;
                let encrypt_dict = resolved
                    .as_dict()
                    .map_err(|_| Error::InvalidEncryption(DecryptionError::InvalidType))?;
                let file_id = document
                    .trailer
                    .get(b"ID")
                    .ok()
                    .and_then(|ids| ids.as_array().ok())
                    .and_then(|ids| ids.first())
                    .and_then(|first| first.as_str().ok())
                    .map(<[u8]>::to_vec);

                let decryptor = Decryptor::new(encrypt_dict, file_id.as_deref(), &material)?;
                document.resolver.install_decryptor(decryptor);
            }
        }

        Ok(document)
    }

    fn resolve_chain(&self) -> Result<(Xref, Dictionary)> {
        let claimed = self.locate_startxref()?;
        let mut recovery = BruteForceScanner::new(&self.source);
        let start = if self.options.lenient {
            self.validate_xref_offset(claimed, &mut recovery)
        } else {
            claimed
        };
        self.walk_chain(start, &mut recovery)
    }

    /// §"Locate startxref": find the last `%%EOF` within the tail window,
    /// scan backward from it for `startxref`, and read the offset that
    /// follows.
    fn locate_startxref(&self) -> Result<u64> {
        let length = self.source.length();
        let window = u64::from(self.options.eof_lookup_range).min(length);
        let tail = self.source.view(length - window, window);
        let scanner = Scanner::new(&tail);

        tail.seek(tail.length());
        let search_end = match scanner.rfind_keyword(b"%%EOF") {
            Some(eof) => eof,
            None if self.options.lenient => {
                warn!("missing %%EOF marker, scanning the whole tail window");
                tail.length()
            }
            None => return Err(Error::MissingEof),
        };

        tail.seek(search_end);
        let keyword = scanner.rfind_keyword(b"startxref").ok_or(Error::MissingStartxref)?;
        tail.seek(keyword + b"startxref".len() as u64);
        scanner.skip_whitespace_and_comments();
        scanner.read_unsigned().ok_or(Error::MissingStartxref)
    }

    /// Lenient offset repair: a claimed offset that does not point at a
    /// table or cross-reference stream header is replaced by the nearest
    /// discovered candidate.
    fn validate_xref_offset(&self, claimed: u64, recovery: &mut BruteForceScanner) -> u64 {
        if self.plausible_xref_at(claimed) {
            return claimed;
        }
        match recovery.nearest_xref(claimed) {
            Some((repaired, _)) => {
                warn!("cross-reference offset {claimed} is wrong, adopting nearest candidate {repaired}");
                repaired
            }
            None => claimed,
        }
    }

    fn plausible_xref_at(&self, offset: u64) -> bool {
        if offset >= self.source.length() {
            return false;
        }
        let body = &self.source.as_bytes()[offset as usize..];
        let trimmed = skip_leading_whitespace(body);
        trimmed.starts_with(b"xref") || parser::is_xref_stream_header(body)
    }

    /// Walk `startxref → section → /Prev …`, consolidating entries
    /// (newest definition wins) and trailers (union, newest value wins).
    fn walk_chain(&self, start: u64, recovery: &mut BruteForceScanner) -> Result<(Xref, Dictionary)> {
        let mut visited = HashSet::new();
        let mut xref: Option<Xref> = None;
        let mut trailer: Option<Dictionary> = None;
        let mut next = Some(start);

        while let Some(offset) = next {
            if !visited.insert(offset) {
                return Err(Error::Xref(XrefError::Loop(offset)));
            }

            let (mut section_xref, section_trailer) = self.parse_xref_section(offset)?;

            // Hybrid files: the supplementary stream contributes entries
            // but no trailer, and loses to the enclosing table's own
            // entries while beating anything older.
            if let Some(stm_claimed) = int_value(&section_trailer, b"XRefStm") {
                let stm_offset = if self.options.lenient {
                    self.validate_xref_offset(stm_claimed, recovery)
                } else {
                    stm_claimed
                };
                if visited.insert(stm_offset) {
                    match self.parse_xref_section(stm_offset) {
                        Ok((stm_xref, _)) => section_xref.extend(stm_xref),
                        Err(err) if self.options.lenient => {
                            warn!("hybrid cross-reference stream unusable: {err}");
                        }
                        Err(err) => return Err(err),
                    }
                }
            }

            next = int_value(&section_trailer, b"Prev");
            if let (Some(prev), true) = (next, self.options.lenient) {
                next = Some(self.validate_xref_offset(prev, recovery));
            }

            match &mut xref {
                None => xref = Some(section_xref),
                Some(existing) => existing.extend(section_xref),
            }
            match &mut trailer {
                None => trailer = Some(section_trailer),
                Some(existing) => {
                    for (key, value) in section_trailer {
                        existing.set_if_absent(key, value);
                    }
                }
            }
        }

        match (xref, trailer) {
            (Some(xref), Some(trailer)) => Ok((xref, trailer)),
            _ => Err(Error::Xref(XrefError::Start)),
        }
    }

    /// Parse one cross-reference element at `offset`: a textual table
    /// with its trailer, or a cross-reference stream whose dictionary
    /// doubles as the trailer.
    fn parse_xref_section(&self, offset: u64) -> Result<(Xref, Dictionary)> {
        if offset >= self.source.length() {
            return Err(Error::Xref(XrefError::Start));
        }

        let data = self.source.as_bytes();
        let body = &data[offset as usize..];
        if skip_leading_whitespace(body).starts_with(b"xref") {
            return parser::xref_and_trailer(skip_leading_whitespace(body));
        }

        let (_, mut object) = parser::indirect_object(data, offset, None)?;
        let stream = object.as_stream_mut().map_err(|_| Error::Xref(XrefError::Start))?;
        if !stream.dict.has_type(b"XRef") {
            if self.options.lenient {
                warn!("cross-reference stream at offset {offset} lacks /Type /XRef");
            } else {
                return Err(Error::Xref(XrefError::Start));
            }
        }

        load_stream_payload(&self.source, offset, stream, self.options.lenient, &mut |_| None)?;
        let decoded = filters::decode_stream(stream)?;
        let xref = decode_xref_stream(&stream.dict, &decoded)?;

        let mut trailer = stream.dict.clone();
        trailer.remove(b"Length");
        trailer.remove(b"W");
        trailer.remove(b"Index");
        Ok((xref, trailer))
    }

    /// §"Consolidate": every in-use entry must point at a header naming
    /// its key; one miss condemns the whole map.
    fn offsets_are_valid(&self, xref: &Xref) -> bool {
        let data = self.source.as_bytes();
        for (id, entry) in &xref.entries {
            if let XrefEntry::Normal { offset } = entry {
                let valid = (*offset as usize) < data.len()
                    && parser::object_header(&data[*offset as usize..]) == Some(*id);
                if !valid {
                    warn!(
                        "cross-reference names object {} {} at offset {offset}, but no matching header is there",
                        id.0, id.1
                    );
                    return false;
                }
            }
        }
        true
    }

    fn rebuild_from_scan(&self) -> Result<(Xref, Dictionary)> {
        let mut scanner = BruteForceScanner::new(&self.source);
        // Pre-gate by necessity; see the validation-failure path above.
        let (xref, trailer) = scanner.rebuild(self.options.scratch, None);
        if xref.is_empty() {
            return Err(Error::Xref(XrefError::Malformed("no objects found in the raw bytes")));
        }
        let trailer =
            trailer.ok_or(Error::Xref(XrefError::Malformed("no trailer could be reconstructed")))?;
        Ok((xref, trailer))
    }
}

/// Which chain failures the lenient parser may swallow by rebuilding.
/// Loops, bad passwords and resolution cycles always surface.
fn recoverable(err: &Error) -> bool {
    !matches!(
        err,
        Error::Xref(XrefError::Loop(_))
            | Error::InvalidPassword
            | Error::InvalidEncryption(_)
            | Error::CycleDetected(_)
            | Error::MissingHeader
            | Error::Io(_)
    )
}

fn int_value(dict: &Dictionary, key: &[u8]) -> Option<u64> {
    dict.get(key)
        .and_then(Object::as_i64)
        .ok()
        .and_then(|value| u64::try_from(value).ok())
}

fn skip_leading_whitespace(data: &[u8]) -> &[u8] {
    let mut i = 0;
    while i < data.len() && is_whitespace(data[i]) {
        i += 1;
    }
    &data[i..]
}
