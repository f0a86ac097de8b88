//! Brute-force repair: rediscovering objects, cross-references and
//! trailers by linear scans over the raw bytes.
//!
//! Each scan runs at most once per scanner and caches its result, so a
//! repair session touches every source byte a bounded number of times no
//! matter how often the resolver comes back for more.

use crate::encryption::Decryptor;
use crate::object_stream::ObjectStream;
use crate::resolver::load_stream_payload;
use crate::scanner::{is_delimiter, is_digit, is_whitespace, Scanner};
use crate::scratch::{Scratch, ScratchBuffer};
use crate::source::{ScopedSeek, Source};
use crate::xref::{Xref, XrefEntry, XrefKind};
use crate::{filters, parser};
use crate::{Dictionary, Object, ObjectId, Result};
use indexmap::IndexMap;
use log::{info, warn};

/// Scans never look below this offset; the header line owns those bytes.
pub(crate) const MINIMUM_SEARCH_OFFSET: u64 = 6;

/// How far behind a `/XRef` or `/ObjStm` token the containing object
/// header is searched for: 40 groups of 10 bytes.
const BACKWARD_HEADER_RANGE: usize = 400;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) enum XrefSiteKind {
    Table,
    Stream,
}

/// The repair subsystem. Construct one per parse; scans are lazy and
/// their results are memoized.
pub(crate) struct BruteForceScanner<'a> {
    source: &'a Source,
    object_offsets: Option<IndexMap<ObjectId, u64>>,
    xref_sites: Option<Vec<(u64, XrefSiteKind)>>,
    last_eof: Option<u64>,
}

impl<'a> BruteForceScanner<'a> {
    pub fn new(source: &'a Source) -> BruteForceScanner<'a> {
        BruteForceScanner {
            source,
            object_offsets: None,
            xref_sites: None,
            last_eof: None,
        }
    }

    /// Scan 1: every `N G obj` header in the file, keyed by object id.
    ///
    /// A header is only emitted once something proves the object was
    /// complete: a later header, an end-of-object keyword (the truncated
    /// `endo` counts), or the final `%%EOF`. Duplicate keys keep the
    /// highest offset.
    pub fn object_offsets(&mut self) -> &IndexMap<ObjectId, u64> {
        if self.object_offsets.is_none() {
            // Anything past the effective end-of-data is trailing garbage.
            let end_of_data = self.last_eof();

            let data = self.source.as_bytes();
            let mut headers: Vec<(ObjectId, u64)> = Vec::new();

            {
                let _guard = ScopedSeek::jump(self.source, MINIMUM_SEARCH_OFFSET);
                let scanner = Scanner::new(self.source);
                while let Some(hit) = scanner.find_keyword(b"obj") {
                    if hit >= end_of_data {
                        break;
                    }
                    let after = hit as usize + 3;
                    if after < data.len() && !is_whitespace(data[after]) && !is_delimiter(data[after]) {
                        continue;
                    }
                    if let Some(header) = object_header_before(data, hit as usize) {
                        headers.push(header);
                    }
                }
            }

            let mut map = IndexMap::new();
            let count = headers.len();
            for (index, (id, offset)) in headers.into_iter().enumerate() {
                let last = index + 1 == count;
                if last && !end_marker_after(data, offset) {
                    warn!(
                        "dropping trailing object {} {} at offset {offset}: no end-of-object marker",
                        id.0, id.1
                    );
                    continue;
                }
                map.insert(id, offset);
            }

            info!("raw scan found {} object headers", map.len());
            self.object_offsets = Some(map);
        }
        self.object_offsets.as_ref().unwrap()
    }

    /// Scan 2: the effective end of data.
    ///
    /// Every `%%EOF` is checked for plausible content following it; the
    /// last marker followed by garbage (or nothing) wins. A file without
    /// any marker reports `u64::MAX`, meaning "no bound".
    pub fn last_eof(&mut self) -> u64 {
        if self.last_eof.is_none() {
            let data = self.source.as_bytes();
            let mut markers = Vec::new();
            {
                let _guard = ScopedSeek::jump(self.source, MINIMUM_SEARCH_OFFSET);
                let scanner = Scanner::new(self.source);
                while let Some(hit) = scanner.find_keyword(b"%%EOF") {
                    markers.push(hit);
                }
            }

            let effective = markers
                .iter()
                .rev()
                .find(|&&eof| {
                    let tail = &data[(eof as usize + 5).min(data.len())..];
                    let trimmed = skip_leading_whitespace(tail);
                    !(trimmed.starts_with(b"xref") || parser::object_header(trimmed).is_some())
                })
                .copied();

            self.last_eof = Some(effective.unwrap_or(u64::MAX));
        }
        self.last_eof.unwrap()
    }

    /// Scans 3 and 4: candidate cross-reference sites, tables and streams
    /// together, sorted by offset.
    fn xref_sites(&mut self) -> &mut Vec<(u64, XrefSiteKind)> {
        if self.xref_sites.is_none() {
            let data = self.source.as_bytes();
            let mut sites = Vec::new();

            // Tables: `xref` preceded by white space, which rules out the
            // `startxref` keyword.
            {
                let _guard = ScopedSeek::jump(self.source, MINIMUM_SEARCH_OFFSET);
                let scanner = Scanner::new(self.source);
                while let Some(hit) = scanner.find_keyword(b"xref") {
                    let at = hit as usize;
                    if at > 0 && is_whitespace(data[at - 1]) {
                        sites.push((hit, XrefSiteKind::Table));
                    }
                }
            }

            // Streams: a `/XRef` type name inside a dictionary, mapped
            // back to the object header that carries it.
            {
                let _guard = ScopedSeek::jump(self.source, MINIMUM_SEARCH_OFFSET);
                let scanner = Scanner::new(self.source);
                while let Some(hit) = scanner.find_keyword(b"/XRef") {
                    let after = hit as usize + 5;
                    if after < data.len() && !is_whitespace(data[after]) && !is_delimiter(data[after]) {
                        // Longer name, e.g. /XRefStm.
                        continue;
                    }
                    if let Some(header) = containing_header_offset(data, hit as usize) {
                        sites.push((header, XrefSiteKind::Stream));
                    }
                }
            }

            sites.sort_unstable();
            sites.dedup();
            self.xref_sites = Some(sites);
        }
        self.xref_sites.as_mut().unwrap()
    }

    /// The nearest discovered cross-reference site by absolute distance,
    /// consumed from the candidate pool so repeated bad offsets map to
    /// distinct repairs. A stream beats a table at equal distance.
    pub fn nearest_xref(&mut self, claimed: u64) -> Option<(u64, XrefSiteKind)> {
        let sites = self.xref_sites();
        let best = sites
            .iter()
            .enumerate()
            .min_by_key(|(_, (offset, kind))| {
                (
                    offset.abs_diff(claimed),
                    if *kind == XrefSiteKind::Stream { 0u8 } else { 1 },
                )
            })
            .map(|(index, _)| index)?;
        Some(sites.remove(best))
    }

    /// Scan 5: object streams. Opens every `/ObjStm` container found in
    /// the raw bytes and returns `Compressed` entries for its members,
    /// in ascending container offset order so that later insertion lets
    /// the higher offset win.
    ///
    /// Containers read here come straight from the raw bytes, so on an
    /// encrypted document the caller must pass the installed decryptor —
    /// otherwise the filter pipeline would be fed ciphertext.
    pub fn compressed_entries(
        &mut self, scratch: Scratch, decryptor: Option<&Decryptor>,
    ) -> Vec<(ObjectId, XrefEntry)> {
        let data = self.source.as_bytes();
        let mut containers = Vec::new();
        {
            let _guard = ScopedSeek::jump(self.source, MINIMUM_SEARCH_OFFSET);
            let scanner = Scanner::new(self.source);
            while let Some(hit) = scanner.find_keyword(b"/ObjStm") {
                if let Some(header) = containing_header_offset(data, hit as usize) {
                    containers.push(header);
                }
            }
        }
        containers.sort_unstable();
        containers.dedup();

        let mut entries = Vec::new();
        for offset in containers {
            match self.open_object_stream(offset, scratch, decryptor) {
                Ok((container, stream)) => {
                    for (index, number) in stream.object_numbers().enumerate() {
                        entries.push((
                            (number, 0),
                            XrefEntry::Compressed {
                                container,
                                index: index as u32,
                            },
                        ));
                    }
                }
                Err(err) => warn!("skipping unreadable object stream at offset {offset}: {err}"),
            }
        }
        entries
    }

    fn open_object_stream(
        &self, offset: u64, scratch: Scratch, decryptor: Option<&Decryptor>,
    ) -> Result<(ObjectId, ObjectStream)> {
        let data = self.source.as_bytes();
        let (id, mut object) = parser::indirect_object(data, offset, None)?;
        let stream = object.as_stream_mut()?;
        load_stream_payload(self.source, offset, stream, true, &mut |_| None)?;

        if let Some(decryptor) = decryptor {
            if !stream.dict.has_type(b"XRef") {
                stream.content = decryptor.decrypt_stream(id, &stream.content)?;
            }
        }

        let decoded = filters::decode_stream(stream)?;
        let payload = ScratchBuffer::store(scratch, decoded)?;
        Ok(((id.0, 0), ObjectStream::new(&stream.dict, payload)?))
    }

    /// Scan 6: trailer discovery. Returns the best trailer dictionary the
    /// raw bytes support, either a literal `trailer` dictionary that
    /// passes the catalog and info predicates, or one synthesized from
    /// candidate objects.
    pub fn recover_trailer(&mut self) -> Option<Dictionary> {
        let data = self.source.as_bytes();

        let mut keyword_trailers = Vec::new();
        {
            let _guard = ScopedSeek::jump(self.source, MINIMUM_SEARCH_OFFSET);
            let scanner = Scanner::new(self.source);
            while let Some(hit) = scanner.find_keyword(b"trailer") {
                let tail = skip_leading_whitespace(&data[hit as usize + 7..]);
                if let Some(Object::Dictionary(dict)) = parser::direct_object(tail) {
                    keyword_trailers.push(dict);
                }
            }
        }

        for dict in keyword_trailers.iter().rev() {
            let root_ok = dict
                .get(b"Root")
                .and_then(Object::as_reference)
                .ok()
                .and_then(|id| self.fetch_dictionary(id))
                .is_some_and(|d| is_catalog_like(&d));
            let info_ok = dict
                .get(b"Info")
                .and_then(Object::as_reference)
                .ok()
                .and_then(|id| self.fetch_dictionary(id))
                .is_some_and(|d| is_info_like(&d));
            if root_ok && info_ok {
                return Some(dict.clone());
            }
        }

        // No trailer qualified; hunt for the catalog and info dictionaries
        // among the discovered objects instead.
        let mut catalog: Option<(ObjectId, u64)> = None;
        let mut info: Option<(ObjectId, u64)> = None;
        let candidates: Vec<(ObjectId, u64)> = self
            .object_offsets()
            .iter()
            .map(|(id, offset)| (*id, *offset))
            .collect();

        for (id, offset) in candidates {
            let Some(dict) = self.parse_dictionary_at(offset) else {
                continue;
            };
            if is_catalog_like(&dict) {
                catalog = Some(pick_candidate(catalog, (id, offset)));
            } else if is_info_like(&dict) {
                info = Some(pick_candidate(info, (id, offset)));
            }
        }

        let (catalog_id, _) = catalog?;
        let mut trailer = Dictionary::new();
        trailer.set("Root", Object::Reference(catalog_id));
        if let Some((info_id, _)) = info {
            trailer.set("Info", Object::Reference(info_id));
        }
        trailer.set("Size", (self.object_offsets().keys().map(|(n, _)| *n).max().unwrap_or(0) + 1) as i64);
        Some(trailer)
    }

    /// Rebuild the whole cross-reference from raw scans: in-use entries
    /// from object discovery, compressed entries from object streams on
    /// top, plus a recovered trailer.
    pub fn rebuild(&mut self, scratch: Scratch, decryptor: Option<&Decryptor>) -> (Xref, Option<Dictionary>) {
        let mut xref = Xref::new(0, XrefKind::Recovered);
        for (id, offset) in self.object_offsets() {
            xref.insert(*id, XrefEntry::Normal { offset: *offset });
        }
        for (id, entry) in self.compressed_entries(scratch, decryptor) {
            // Object-stream membership beats a raw file offset.
            xref.insert(id, entry);
        }
        xref.size = xref.max_id() + 1;

        let trailer = self.recover_trailer();
        (xref, trailer)
    }

    fn fetch_dictionary(&mut self, id: ObjectId) -> Option<Dictionary> {
        let offset = {
            let offsets = self.object_offsets();
            offsets.get(&id).copied().or_else(|| {
                // Fall back to the highest generation recorded for the
                // object number.
                offsets
                    .iter()
                    .filter(|((number, _), _)| *number == id.0)
                    .max_by_key(|((_, generation), _)| *generation)
                    .map(|(_, offset)| *offset)
            })
        }?;
        self.parse_dictionary_at(offset)
    }

    fn parse_dictionary_at(&self, offset: u64) -> Option<Dictionary> {
        let data = self.source.as_bytes();
        let (_, object) = parser::indirect_object(data, offset, None).ok()?;
        match object {
            Object::Dictionary(dict) => Some(dict),
            Object::Stream(stream) => Some(stream.dict),
            _ => None,
        }
    }
}

/// Walk backward from the `obj` keyword across generation and object
/// number. Returns the key and the offset of the first digit.
fn object_header_before(data: &[u8], keyword: usize) -> Option<(ObjectId, u64)> {
    let mut i = keyword;
    if i == 0 || !is_whitespace(data[i - 1]) {
        return None;
    }
    while i > 0 && is_whitespace(data[i - 1]) {
        i -= 1;
    }

    let generation_end = i;
    while i > 0 && is_digit(data[i - 1]) {
        i -= 1;
    }
    let generation_start = i;
    if generation_start == generation_end || i == 0 || !is_whitespace(data[i - 1]) {
        return None;
    }
    while i > 0 && is_whitespace(data[i - 1]) {
        i -= 1;
    }

    let number_end = i;
    while i > 0 && is_digit(data[i - 1]) {
        i -= 1;
    }
    let number_start = i;
    if number_start == number_end {
        return None;
    }

    let number = parse_ascii(&data[number_start..number_end])?;
    let generation = parse_ascii(&data[generation_start..generation_end]).and_then(|g| u32::try_from(g).ok())?;
    Some(((number, generation), number_start as u64))
}

/// Find the `N G obj` header that contains a token at `token`, walking
/// backward through at most [`BACKWARD_HEADER_RANGE`] bytes.
fn containing_header_offset(data: &[u8], token: usize) -> Option<u64> {
    let floor = token.saturating_sub(BACKWARD_HEADER_RANGE).max(MINIMUM_SEARCH_OFFSET as usize);
    for start in (floor..token).rev() {
        if !is_digit(data[start]) {
            continue;
        }
        if start > 0 && is_digit(data[start - 1]) {
            continue;
        }
        if parser::object_header(&data[start..token]).is_some() {
            return Some(start as u64);
        }
    }
    None
}

fn end_marker_after(data: &[u8], offset: u64) -> bool {
    let tail = &data[(offset as usize).min(data.len())..];
    // `endo` also matches a truncated end-of-object keyword.
    find_keyword_in(tail, b"endo") || find_keyword_in(tail, b"%%EOF")
}

fn find_keyword_in(data: &[u8], keyword: &[u8]) -> bool {
    data.windows(keyword.len()).any(|window| window == keyword)
}

fn skip_leading_whitespace(data: &[u8]) -> &[u8] {
    let mut i = 0;
    while i < data.len() && is_whitespace(data[i]) {
        i += 1;
    }
    &data[i..]
}

fn parse_ascii(digits: &[u8]) -> Option<u64> {
    std::str::from_utf8(digits).ok()?.parse().ok()
}

/// The literal tie-break for equally plausible candidates: the later one
/// wins unless its generation is lower.
fn pick_candidate(current: Option<(ObjectId, u64)>, candidate: (ObjectId, u64)) -> (ObjectId, u64) {
    match current {
        None => candidate,
        Some(current) => {
            if candidate.0 .1 >= current.0 .1 {
                candidate
            } else {
                current
            }
        }
    }
}

/// A dictionary identifiable as the document catalog.
fn is_catalog_like(dict: &Dictionary) -> bool {
    dict.has_type(b"Catalog") || dict.has(b"FDF")
}

const INFO_MARKER_KEYS: [&[u8]; 8] = [
    b"ModDate", b"Title", b"Author", b"Subject", b"Keywords", b"Creator", b"Producer", b"CreationDate",
];
const INFO_FORBIDDEN_KEYS: [&[u8]; 3] = [b"Parent", b"A", b"Dest"];

/// A dictionary identifiable as the document information dictionary.
fn is_info_like(dict: &Dictionary) -> bool {
    INFO_MARKER_KEYS.iter().any(|key| dict.has(key)) && !INFO_FORBIDDEN_KEYS.iter().any(|key| dict.has(key))
}
