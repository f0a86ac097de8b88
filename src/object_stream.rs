//! Reader for object streams (`/Type /ObjStm`).

use crate::parser;
use crate::scratch::ScratchBuffer;
use crate::{Dictionary, Error, Object, ObjectId, Result};

/// A decoded object stream: the `/N` header pairs plus the payload.
///
/// The stream is a self-contained sub-scope; sub-objects are addressed by
/// their index and parsed on demand, without consulting the file position.
#[derive(Debug)]
pub struct ObjectStream {
    /// `(object number, absolute offset within the decoded payload)`.
    entries: Vec<(u64, usize)>,
    payload: ScratchBuffer,
}

impl ObjectStream {
    /// Parse the header of a decoded `/ObjStm` payload.
    pub(crate) fn new(dict: &Dictionary, payload: ScratchBuffer) -> Result<ObjectStream> {
        let count = dict.get(b"N").and_then(Object::as_i64)?.max(0) as usize;
        let first = dict.get(b"First").and_then(Object::as_i64)?.max(0) as usize;

        let entries = {
            let bytes = payload.bytes()?;
            let header = bytes
                .get(..first.min(bytes.len()))
                .ok_or(Error::Truncated)?;

            // The header is `count` pairs of `object_number offset`.
            let header = String::from_utf8_lossy(header);
            let mut numbers = header.split_whitespace().map(str::parse::<u64>);

            let mut entries = Vec::with_capacity(count);
            for _ in 0..count {
                let number = numbers
                    .next()
                    .and_then(|n| n.ok())
                    .ok_or(Error::CorruptObject { offset: 0 })?;
                let relative = numbers
                    .next()
                    .and_then(|n| n.ok())
                    .ok_or(Error::CorruptObject { offset: 0 })?;
                entries.push((number, first + relative as usize));
            }
            entries
        };

        Ok(ObjectStream { entries, payload })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The object numbers packed into this stream, in header order.
    pub fn object_numbers(&self) -> impl Iterator<Item = u64> + '_ {
        self.entries.iter().map(|(number, _)| *number)
    }

    /// Parse the sub-object at `index`. The generation of a compressed
    /// object is always zero.
    pub(crate) fn read(&self, index: u32) -> Result<(ObjectId, Object)> {
        let (number, offset) = *self
            .entries
            .get(index as usize)
            .ok_or(Error::CorruptObject { offset: 0 })?;

        let bytes = self.payload.bytes()?;
        let slice = bytes.get(offset..).ok_or(Error::Truncated)?;
        let object = parser::direct_object(slice).ok_or(Error::CorruptObject {
            offset: offset as u64,
        })?;

        Ok(((number, 0), object))
    }
}
