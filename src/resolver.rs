//! Lazy, memoizing resolution of indirect objects.
//!
//! The resolver owns the object pool. Every key is in one of four states:
//! untouched, `Resolving` (materialization in progress), `Resolved`, or
//! permanently `Null`. Cycles are broken by materializing the in-progress
//! edge as null, which is the documented behavior for object-cycle
//! tolerance. All public entry points restore the source cursor before
//! returning, on success and error paths alike.

use crate::document::ParseOptions;
use crate::encryption::{Decryptor, DecryptionError, Permissions};
use crate::object_stream::ObjectStream;
use crate::recovery::BruteForceScanner;
use crate::scanner::Scanner;
use crate::scratch::ScratchBuffer;
use crate::source::{ScopedSeek, Source};
use crate::xref::{Xref, XrefEntry};
use crate::{filters, parser};
use crate::{Error, Object, ObjectId, Result, Stream, XrefError};
use indexmap::IndexMap;
use log::warn;
use std::cell::{Ref, RefCell};
use std::collections::BTreeMap;
use std::rc::Rc;

/// Resolution state of one pool cell.
enum Slot {
    Resolving,
    Resolved(Object),
    Null,
}

/// Discovered-by-scanning state, shared by the missing-key and
/// corrupt-object repair paths.
struct Discovered {
    objects: IndexMap<ObjectId, u64>,
    compressed: Vec<(ObjectId, XrefEntry)>,
}

pub(crate) struct Resolver {
    source: Source,
    options: ParseOptions,
    xref: RefCell<Xref>,
    pool: RefCell<BTreeMap<ObjectId, Slot>>,
    object_streams: RefCell<BTreeMap<ObjectId, Rc<ObjectStream>>>,
    decryptor: RefCell<Option<Decryptor>>,
    discovered: RefCell<Option<Discovered>>,
}

impl Resolver {
    pub fn new(source: Source, xref: Xref, options: ParseOptions) -> Resolver {
        Resolver {
            source,
            options,
            xref: RefCell::new(xref),
            pool: RefCell::new(BTreeMap::new()),
            object_streams: RefCell::new(BTreeMap::new()),
            decryptor: RefCell::new(None),
            discovered: RefCell::new(None),
        }
    }

    pub fn source(&self) -> &Source {
        &self.source
    }

    pub fn xref(&self) -> Ref<'_, Xref> {
        self.xref.borrow()
    }

    pub fn install_decryptor(&self, decryptor: Decryptor) {
        *self.decryptor.borrow_mut() = Some(decryptor);
        // A scan taken before the gate went in could not open encrypted
        // object-stream containers; forget it so the next one can.
        *self.discovered.borrow_mut() = None;
    }

    pub fn permissions(&self) -> Permissions {
        self.decryptor
            .borrow()
            .as_ref()
            .map(Decryptor::permissions)
            .unwrap_or_default()
    }

    pub fn is_encrypted(&self) -> bool {
        self.decryptor.borrow().is_some()
    }

    /// Materialize and memoize the object for `id`.
    pub fn get(&self, id: ObjectId) -> Result<Object> {
        let _restore = ScopedSeek::new(&self.source);
        self.get_inner(id, false)
    }

    /// Follow a parsed value to its target, resolving reference chains.
    pub fn dereference(&self, object: &Object) -> Result<Object> {
        let _restore = ScopedSeek::new(&self.source);
        let mut current = object.clone();
        let mut hops = 0u32;
        while let Object::Reference(id) = current {
            if hops > 32 {
                warn!("reference chain exceeds 32 hops, treating as null");
                return Ok(Object::Null);
            }
            current = self.get_inner(id, false)?;
            hops += 1;
        }
        Ok(current)
    }

    fn get_inner(&self, id: ObjectId, container_lookup: bool) -> Result<Object> {
        match self.pool.borrow().get(&id) {
            Some(Slot::Resolved(object)) => return Ok(object.clone()),
            Some(Slot::Null) => return Ok(Object::Null),
            Some(Slot::Resolving) => {
                warn!("object {} {} depends on its own resolution, breaking the cycle", id.0, id.1);
                return Ok(Object::Null);
            }
            None => {}
        }

        let mut entry = self.xref.borrow().get(id).cloned();
        if entry.is_none() && !container_lookup && self.options.lenient {
            self.recover_missing_entries();
            entry = self.xref.borrow().get(id).cloned();
        }

        let entry = match entry {
            Some(entry) => entry,
            // The compressed-object path must not grow the map while
            // chasing containers.
            None if container_lookup => {
                return Err(Error::Xref(XrefError::Malformed(
                    "object stream container is not in the cross-reference",
                )));
            }
            None => {
                // A reference to an undefined object is the null object.
                self.pool.borrow_mut().insert(id, Slot::Null);
                return Ok(Object::Null);
            }
        };

        if container_lookup && entry.is_compressed() {
            return Err(Error::CycleDetected(id));
        }

        self.pool.borrow_mut().insert(id, Slot::Resolving);
        match self.materialize(id, entry) {
            Ok(object) => {
                self.pool.borrow_mut().insert(id, Slot::Resolved(object.clone()));
                Ok(object)
            }
            Err(err) => {
                self.pool.borrow_mut().remove(&id);
                Err(err)
            }
        }
    }

    fn materialize(&self, id: ObjectId, entry: XrefEntry) -> Result<Object> {
        match entry {
            XrefEntry::Normal { offset } => match self.materialize_normal(id, offset) {
                Err(err @ (Error::CorruptObject { .. } | Error::ObjectMismatch { .. } | Error::Truncated))
                    if self.options.lenient =>
                {
                    warn!("object {} {} at offset {offset} is unreadable ({err}), rescanning", id.0, id.1);
                    self.retry_from_scan(id, offset)
                }
                other => other,
            },
            XrefEntry::Compressed { container, index } => {
                match self.materialize_compressed(id, container, index) {
                    // Container chains always surface; everything else is a
                    // local defect the lenient parser may swallow.
                    Err(err @ Error::CycleDetected(_)) => Err(err),
                    Err(err) if self.options.lenient => {
                        warn!("compressed object {} {} is unreadable ({err}), treating as null", id.0, id.1);
                        Ok(Object::Null)
                    }
                    other => other,
                }
            }
            XrefEntry::Free { .. } => Ok(Object::Null),
        }
    }

    /// Lenient fallback when the cross-referenced offset lied: adopt the
    /// offset the raw scan discovered for this key, if it differs.
    fn retry_from_scan(&self, id: ObjectId, bad_offset: u64) -> Result<Object> {
        self.ensure_scanned();
        let rediscovered = self
            .discovered
            .borrow()
            .as_ref()
            .and_then(|found| found.objects.get(&id).copied());

        match rediscovered {
            Some(offset) if offset != bad_offset => {
                self.xref.borrow_mut().insert(id, XrefEntry::Normal { offset });
                self.materialize_normal(id, offset).or_else(|err| {
                    warn!("rescanned object {} {} still unreadable ({err}), treating as null", id.0, id.1);
                    Ok(Object::Null)
                })
            }
            _ => {
                warn!("object {} {} not recoverable, treating as null", id.0, id.1);
                Ok(Object::Null)
            }
        }
    }

    fn materialize_normal(&self, id: ObjectId, offset: u64) -> Result<Object> {
        if offset >= self.source.length() {
            return Err(Error::CorruptObject { offset });
        }

        let (found, mut object) = parser::indirect_object(self.source.as_bytes(), offset, None)?;
        if found != id {
            if !self.options.lenient {
                return Err(Error::ObjectMismatch {
                    offset,
                    expected: id,
                    found,
                });
            }
            if found.0 == id.0 && found.1 > id.1 {
                warn!(
                    "object {} {} carries newer generation {}, promoting",
                    id.0, id.1, found.1
                );
            } else {
                warn!(
                    "object header at offset {offset} reads {} {}, expected {} {}",
                    found.0, found.1, id.0, id.1
                );
            }
        }

        if let Object::Stream(ref mut stream) = object {
            load_stream_payload(&self.source, offset, stream, self.options.lenient, &mut |length_id| {
                self.resolve_length(length_id)
            })?;
        }

        self.decrypt_materialized(found, &mut object)?;
        self.break_cycles(&mut object);

        if self.options.lenient && found != id && found.0 == id.0 && found.1 > id.1 {
            self.pool.borrow_mut().insert(found, Slot::Resolved(object.clone()));
        }

        Ok(object)
    }

    fn materialize_compressed(&self, id: ObjectId, container: ObjectId, index: u32) -> Result<Object> {
        let stream = self.object_stream(container)?;
        let (found, mut object) = stream.read(index)?;
        if found.0 != id.0 {
            warn!(
                "object stream {} {} lists object {} at index {index}, expected {}",
                container.0, container.1, found.0, id.0
            );
        }

        // Sub-objects are covered by the container stream's decryption;
        // they are never decrypted individually.
        self.break_cycles(&mut object);
        Ok(object)
    }

    fn object_stream(&self, container: ObjectId) -> Result<Rc<ObjectStream>> {
        if let Some(cached) = self.object_streams.borrow().get(&container) {
            return Ok(Rc::clone(cached));
        }

        let value = self.get_inner(container, true)?;
        let stream = value.as_stream()?;
        if !stream.dict.has_type(b"ObjStm") {
            warn!("container {} {} lacks /Type /ObjStm", container.0, container.1);
        }

        let decoded = filters::decode_stream(stream)?;
        let payload = ScratchBuffer::store(self.options.scratch, decoded)?;
        let parsed = Rc::new(ObjectStream::new(&stream.dict, payload)?);
        self.object_streams.borrow_mut().insert(container, Rc::clone(&parsed));
        Ok(parsed)
    }

    /// Resolve an indirect `/Length`. An in-progress or non-integer
    /// target falls back to the scan path instead of looping.
    fn resolve_length(&self, id: ObjectId) -> Option<i64> {
        match self.get_inner(id, false) {
            Ok(Object::Integer(length)) => Some(length),
            Ok(other) => {
                warn!("stream /Length resolves to {}, scanning instead", other.enum_variant());
                None
            }
            Err(err) => {
                warn!("stream /Length failed to resolve ({err}), scanning instead");
                None
            }
        }
    }

    fn decrypt_materialized(&self, id: ObjectId, object: &mut Object) -> Result<()> {
        let guard = self.decryptor.borrow();
        let Some(decryptor) = guard.as_ref() else {
            return Ok(());
        };

        if let Object::Stream(stream) = &mut *object {
            // Cross-reference streams are never encrypted.
            if !stream.dict.has_type(b"XRef") {
                stream.content = decryptor.decrypt_stream(id, &stream.content)?;
            }
        }
        decrypt_strings(decryptor, id, object)?;
        Ok(())
    }

    /// Replace references to keys currently being resolved with null, so
    /// a cycle edge materializes as the null object.
    fn break_cycles(&self, object: &mut Object) {
        match object {
            Object::Reference(id) => {
                let in_progress = matches!(self.pool.borrow().get(id), Some(Slot::Resolving));
                if in_progress {
                    warn!("object {} {} is part of a reference cycle", id.0, id.1);
                    *object = Object::Null;
                }
            }
            Object::Array(items) => {
                for item in items {
                    self.break_cycles(item);
                }
            }
            Object::Dictionary(dict) => {
                for (_, value) in dict.iter_mut() {
                    self.break_cycles(value);
                }
            }
            Object::Stream(stream) => {
                for (_, value) in stream.dict.iter_mut() {
                    self.break_cycles(value);
                }
            }
            _ => {}
        }
    }

    fn ensure_scanned(&self) {
        if self.discovered.borrow().is_some() {
            return;
        }
        let mut scanner = BruteForceScanner::new(&self.source);
        let objects = scanner.object_offsets().clone();
        let decryptor = self.decryptor.borrow();
        let compressed = scanner.compressed_entries(self.options.scratch, decryptor.as_ref());
        drop(decryptor);
        *self.discovered.borrow_mut() = Some(Discovered { objects, compressed });
    }

    /// Merge brute-force discoveries into the map without displacing
    /// entries the chain already established.
    fn recover_missing_entries(&self) {
        self.ensure_scanned();
        let guard = self.discovered.borrow();
        let Some(found) = guard.as_ref() else { return };

        let mut xref = self.xref.borrow_mut();
        for (id, offset) in &found.objects {
            xref.entries.entry(*id).or_insert(XrefEntry::Normal { offset: *offset });
        }
        for (id, entry) in &found.compressed {
            xref.entries.entry(*id).or_insert_with(|| entry.clone());
        }
        xref.size = xref.size.max(xref.max_id() + 1);
    }
}

fn decrypt_strings(decryptor: &Decryptor, id: ObjectId, object: &mut Object) -> std::result::Result<(), DecryptionError> {
    match object {
        Object::String(bytes, _) => *bytes = decryptor.decrypt_string(id, bytes)?,
        Object::Array(items) => {
            for item in items {
                decrypt_strings(decryptor, id, item)?;
            }
        }
        Object::Dictionary(dict) => {
            for (_, value) in dict.iter_mut() {
                decrypt_strings(decryptor, id, value)?;
            }
        }
        Object::Stream(stream) => {
            for (_, value) in stream.dict.iter_mut() {
                decrypt_strings(decryptor, id, value)?;
            }
        }
        _ => {}
    }
    Ok(())
}

/// Copy a stream's payload out of the source, resolving and validating
/// its length first.
///
/// The declared `/Length` (direct, or indirect through `resolve_length`)
/// is trusted only when `endstream` actually follows the claimed end;
/// otherwise the payload boundary is found by scanning forward for
/// `endstream`, falling back to `endobj` in lenient mode.
pub(crate) fn load_stream_payload(
    source: &Source, offset: u64, stream: &mut Stream, lenient: bool,
    resolve_length: &mut dyn FnMut(ObjectId) -> Option<i64>,
) -> Result<()> {
    let Some(start) = stream.start_position else {
        return Ok(());
    };
    let _restore = ScopedSeek::new(source);

    let declared = match stream.dict.get(b"Length") {
        Ok(Object::Integer(length)) => Some(*length),
        Ok(Object::Reference(id)) => resolve_length(*id),
        _ => None,
    };

    let mut end = None;
    if let Some(length) = declared {
        if length >= 0 {
            let candidate = start.saturating_add(length as u64);
            if candidate <= source.length() && endstream_follows(source, candidate) {
                end = Some(candidate);
            }
        }
        if end.is_none() {
            if !lenient {
                return Err(Error::StreamLengthInvalid {
                    offset,
                    declared: length,
                });
            }
            warn!("stream at offset {offset} declares length {length} but endstream is elsewhere, scanning");
        }
    }

    let mut scanned = false;
    let end = match end {
        Some(end) => end,
        None => {
            scanned = true;
            source.seek(start);
            let scanner = Scanner::new(source);
            match scanner.find_keyword(b"endstream") {
                Some(keyword) => keyword,
                None => {
                    source.seek(start);
                    match scanner.find_keyword(b"endobj") {
                        Some(keyword) if lenient => {
                            warn!("stream at offset {offset} has no endstream, accepting endobj");
                            keyword
                        }
                        Some(_) => {
                            return Err(Error::StreamLengthInvalid {
                                offset,
                                declared: declared.unwrap_or(-1),
                            });
                        }
                        None => return Err(Error::Truncated),
                    }
                }
            }
        }
    };

    let mut content = source.as_bytes()[start as usize..end as usize].to_vec();
    if scanned {
        // The end-of-line before the keyword belongs to the syntax, not
        // the payload.
        if content.ends_with(b"\r\n") {
            content.truncate(content.len() - 2);
        } else if content.ends_with(b"\n") || content.ends_with(b"\r") {
            content.truncate(content.len() - 1);
        }
    }

    check_stream_terminators(source, end, offset);

    let effective = content.len() as i64;
    stream.set_content(content);
    stream.dict.set("Length", effective);
    Ok(())
}

fn endstream_follows(source: &Source, pos: u64) -> bool {
    let mut tail = source.bytes_from(pos);
    while let Some((first, rest)) = tail.split_first() {
        if crate::scanner::is_whitespace(*first) {
            tail = rest;
        } else {
            break;
        }
    }
    tail.starts_with(b"endstream")
}

/// Post-payload diagnostics: `endstream` then `endobj` is expected, a
/// bare `endobj` or same-line garbage after `endstream` is tolerated
/// with a warning.
fn check_stream_terminators(source: &Source, end: u64, offset: u64) {
    let _restore = ScopedSeek::jump(source, end);
    let scanner = Scanner::new(source);

    scanner.skip_whitespace();
    if scanner.matches_keyword(b"endstream") {
        scanner.skip_whitespace();
        if !scanner.matches_keyword(b"endobj") {
            let garbage = scanner.read_line();
            if !garbage.is_empty() {
                warn!("garbage after endstream of object at offset {offset}");
            }
        }
    } else if scanner.matches_keyword(b"endobj") {
        warn!("stream at offset {offset} ends with endobj, endstream is missing");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::xref::XrefKind;

    fn resolver_for(data: &[u8], entries: &[(ObjectId, u64)]) -> Resolver {
        let mut xref = Xref::new(entries.len() as u64 + 1, XrefKind::Table);
        for (id, offset) in entries {
            xref.insert(*id, XrefEntry::Normal { offset: *offset });
        }
        Resolver::new(Source::from_bytes(data), xref, ParseOptions::default())
    }

    #[test]
    fn resolution_is_idempotent() {
        let data = b"1 0 obj\n(value)\nendobj\n";
        let resolver = resolver_for(data, &[((1, 0), 0)]);

        let first = resolver.get((1, 0)).unwrap();
        let second = resolver.get((1, 0)).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.as_str().unwrap(), b"value");
    }

    #[test]
    fn position_is_restored_after_get() {
        let data = b"1 0 obj\n<< /Length 3 >>\nstream\nabc\nendstream\nendobj\n";
        let resolver = resolver_for(data, &[((1, 0), 0)]);

        resolver.source().seek(5);
        let object = resolver.get((1, 0)).unwrap();
        assert_eq!(object.as_stream().unwrap().content, b"abc");
        assert_eq!(resolver.source().position(), 5);
    }

    #[test]
    fn self_reference_materializes_as_null() {
        let data = b"1 0 obj\n<< /Self 1 0 R /Other 2 0 R >>\nendobj\n2 0 obj\n7\nendobj\n";
        let resolver = resolver_for(data, &[((1, 0), 0), ((2, 0), 46)]);

        let object = resolver.get((1, 0)).unwrap();
        let dict = object.as_dict().unwrap();
        assert_eq!(dict.get(b"Self").unwrap(), &Object::Null);
        // Non-cyclic references stay lazy.
        assert_eq!(dict.get(b"Other").unwrap(), &Object::Reference((2, 0)));
        assert_eq!(resolver.dereference(dict.get(b"Other").unwrap()).unwrap().as_i64().unwrap(), 7);
    }

    #[test]
    fn indirect_length_is_resolved() {
        let data = b"1 0 obj\n<< /Length 2 0 R >>\nstream\nhello\nendstream\nendobj\n2 0 obj\n5\nendobj\n";
        let length_offset = data.windows(7).position(|w| w == b"2 0 obj").unwrap() as u64;
        let resolver = resolver_for(data, &[((1, 0), 0), ((2, 0), length_offset)]);

        let object = resolver.get((1, 0)).unwrap();
        assert_eq!(object.as_stream().unwrap().content, b"hello");
    }

    #[test]
    fn lying_length_falls_back_to_scan() {
        let payload = vec![b'x'; 100];
        let mut data = b"1 0 obj\n<< /Length 10 >>\nstream\n".to_vec();
        data.extend_from_slice(&payload);
        data.extend_from_slice(b"\nendstream\nendobj\n");
        let resolver = resolver_for(&data, &[((1, 0), 0)]);

        let object = resolver.get((1, 0)).unwrap();
        assert_eq!(object.as_stream().unwrap().content.len(), 100);
    }

    #[test]
    fn lying_length_is_fatal_in_strict_mode() {
        let data = b"1 0 obj\n<< /Length 10 >>\nstream\nshort\nendstream\nendobj\n";
        let mut xref = Xref::new(2, XrefKind::Table);
        xref.insert((1, 0), XrefEntry::Normal { offset: 0 });
        let options = ParseOptions {
            lenient: false,
            ..ParseOptions::default()
        };
        let resolver = Resolver::new(Source::from_bytes(&data[..]), xref, options);

        assert!(matches!(
            resolver.get((1, 0)),
            Err(Error::StreamLengthInvalid { declared: 10, .. })
        ));
    }

    #[test]
    fn absent_key_resolves_to_null() {
        let data = b"1 0 obj\n42\nendobj\n";
        let options = ParseOptions {
            lenient: false,
            ..ParseOptions::default()
        };
        let resolver = Resolver::new(
            Source::from_bytes(&data[..]),
            Xref::new(0, XrefKind::Table),
            options,
        );
        assert_eq!(resolver.get((9, 0)).unwrap(), Object::Null);
    }

    #[test]
    fn missing_key_triggers_scan_in_lenient_mode() {
        let data = b"%PDF-1.4\n5 0 obj\n(found)\nendobj\n%%EOF";
        let resolver = Resolver::new(
            Source::from_bytes(&data[..]),
            Xref::new(0, XrefKind::Table),
            ParseOptions::default(),
        );
        assert_eq!(resolver.get((5, 0)).unwrap().as_str().unwrap(), b"found");
    }
}
