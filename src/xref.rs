use crate::object::ObjectId;
use indexmap::IndexMap;

/// Which form of cross-reference produced a set of entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum XrefKind {
    /// Textual table introduced by the `xref` keyword.
    Table,
    /// Binary cross-reference stream (PDF 1.5+).
    Stream,
    /// Rebuilt by scanning the raw bytes.
    Recovered,
}

/// One cross-reference entry.
#[derive(Debug, Clone, PartialEq)]
pub enum XrefEntry {
    /// The object slot is unused; the free chain ends at the reserved
    /// sentinel generation.
    Free { next_free: ObjectId },
    /// The object body begins at `offset` bytes from the start of the file.
    Normal { offset: u64 },
    /// The object is element `index` of the object stream `container`
    /// (whose own generation is always 0).
    Compressed { container: ObjectId, index: u32 },
}

impl XrefEntry {
    pub fn is_normal(&self) -> bool {
        matches!(self, XrefEntry::Normal { .. })
    }

    pub fn is_compressed(&self) -> bool {
        matches!(self, XrefEntry::Compressed { .. })
    }

    pub fn is_free(&self) -> bool {
        matches!(self, XrefEntry::Free { .. })
    }
}

/// The consolidated cross-reference map.
///
/// Keys are unique; insertion order is irrelevant for lookup but is kept
/// so that recovery walks entries deterministically.
#[derive(Debug, Clone)]
pub struct Xref {
    /// Entries for indirect objects.
    pub entries: IndexMap<ObjectId, XrefEntry>,

    /// Total number of entries as declared by the trailer, equal to the
    /// highest object number plus one when the file is honest about it.
    pub size: u64,

    pub kind: XrefKind,
}

impl Xref {
    pub fn new(size: u64, kind: XrefKind) -> Xref {
        Xref {
            entries: IndexMap::new(),
            size,
            kind,
        }
    }

    pub fn get(&self, id: ObjectId) -> Option<&XrefEntry> {
        self.entries.get(&id)
    }

    /// The entry for `number` with the highest generation, if any.
    pub fn get_by_number(&self, number: u64) -> Option<(ObjectId, &XrefEntry)> {
        self.entries
            .iter()
            .filter(|((num, _), _)| *num == number)
            .max_by_key(|((_, generation), _)| *generation)
            .map(|(id, entry)| (*id, entry))
    }

    pub fn insert(&mut self, id: ObjectId, entry: XrefEntry) {
        self.entries.insert(id, entry);
    }

    /// Merge `other` in, keeping entries already present. Chains are
    /// walked newest-first, so existing definitions win.
    pub fn extend(&mut self, other: Xref) {
        for (id, entry) in other.entries {
            self.entries.entry(id).or_insert(entry);
        }
    }

    /// Throw every entry away and adopt the other map wholesale.
    pub fn replace_with(&mut self, other: Xref) {
        self.entries = other.entries;
        self.size = self.size.max(other.size);
        self.kind = other.kind;
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Highest object number across all entries.
    pub fn max_id(&self) -> u64 {
        self.entries.keys().map(|(number, _)| *number).max().unwrap_or(0)
    }
}
