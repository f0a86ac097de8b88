use crate::encryption::{Material, Permissions};
use crate::reader::Reader;
use crate::resolver::Resolver;
use crate::scratch::Scratch;
use crate::xref::Xref;
use crate::{filters, Dictionary, Object, ObjectId, Result};
use std::cell::Ref;
use std::fs;
use std::io::Read;
use std::path::Path;

/// Configuration for one parse. Options are consumed when loading
/// starts; there is no way to change them afterwards.
#[derive(Debug, Clone)]
pub struct ParseOptions {
    /// Enables every repair path. On by default.
    pub lenient: bool,
    /// How many trailing bytes are scanned for `%%EOF` and `startxref`.
    /// Values below 16 are raised to 16.
    pub eof_lookup_range: u32,
    /// Backing storage policy for decoded stream payloads.
    pub scratch: Scratch,
    /// Password material for encrypted documents. `None` behaves like an
    /// empty user password.
    pub decryption_material: Option<Material>,
}

impl Default for ParseOptions {
    fn default() -> Self {
        ParseOptions {
            lenient: true,
            eof_lookup_range: 2048,
            scratch: Scratch::default(),
            decryption_material: None,
        }
    }
}

impl ParseOptions {
    /// Strict parsing: the first structural error is fatal.
    pub fn strict() -> Self {
        ParseOptions {
            lenient: false,
            ..ParseOptions::default()
        }
    }

    pub fn with_password<P: Into<Vec<u8>>>(mut self, password: P) -> Self {
        self.decryption_material = Some(Material::Password(password.into()));
        self
    }

    pub fn with_scratch(mut self, scratch: Scratch) -> Self {
        self.scratch = scratch;
        self
    }

    pub fn with_eof_lookup_range(mut self, range: u32) -> Self {
        self.eof_lookup_range = range;
        self
    }
}

/// A parsed PDF document.
///
/// Owns the object pool, the consolidated cross-reference map, the
/// trailer, and the highest used object number. Objects materialize
/// lazily on [`Document::resolve`].
pub struct Document {
    /// The version of the PDF specification the file claims to conform to.
    pub version: String,

    /// The consolidated trailer dictionary.
    pub trailer: Dictionary,

    /// Highest object number across all revisions.
    pub max_id: u64,

    pub(crate) resolver: Resolver,
}

impl Document {
    /// Load a PDF document from a file path.
    #[inline]
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Document> {
        Self::load_with(path, ParseOptions::default())
    }

    pub fn load_with<P: AsRef<Path>>(path: P, options: ParseOptions) -> Result<Document> {
        let buffer = fs::read(path)?;
        Reader::new(buffer, options).read()
    }

    /// Load a PDF document from an arbitrary source.
    pub fn load_from<R: Read>(mut source: R) -> Result<Document> {
        let mut buffer = Vec::new();
        source.read_to_end(&mut buffer)?;
        Reader::new(buffer, ParseOptions::default()).read()
    }

    /// Load a PDF document from a memory slice.
    #[inline]
    pub fn load_mem(buffer: &[u8]) -> Result<Document> {
        Self::load_mem_with(buffer, ParseOptions::default())
    }

    pub fn load_mem_with(buffer: &[u8], options: ParseOptions) -> Result<Document> {
        Reader::new(buffer.to_vec(), options).read()
    }

    /// Materialize the object for `id`, memoizing the result.
    ///
    /// Unknown keys resolve to [`Object::Null`]; cycle edges materialize
    /// as null instead of failing.
    pub fn resolve(&self, id: ObjectId) -> Result<Object> {
        self.resolver.get(id)
    }

    /// Follow a parsed value to its target, resolving reference chains.
    /// Non-reference values come back unchanged.
    pub fn dereference(&self, object: &Object) -> Result<Object> {
        self.resolver.dereference(object)
    }

    /// The consolidated cross-reference map.
    ///
    /// The returned guard borrows the map; drop it before resolving
    /// objects, since lenient resolution may grow the map.
    pub fn xref_table(&self) -> Ref<'_, Xref> {
        self.resolver.xref()
    }

    pub fn trailer(&self) -> &Dictionary {
        &self.trailer
    }

    /// Highest object number used across all revisions.
    pub fn highest_object_number(&self) -> u64 {
        self.max_id
    }

    /// The document catalog, resolved through the trailer's `/Root`.
    pub fn catalog(&self) -> Result<Object> {
        self.dereference(self.trailer.get(b"Root")?)
    }

    pub fn is_encrypted(&self) -> bool {
        self.resolver.is_encrypted()
    }

    /// The user-access permissions granted by the security handler, or
    /// everything for unencrypted documents.
    pub fn permissions(&self) -> Permissions {
        self.resolver.permissions()
    }

    /// Resolve a stream object and run its payload through the filter
    /// pipeline.
    pub fn decoded_stream_content(&self, id: ObjectId) -> Result<Vec<u8>> {
        let object = self.resolve(id)?;
        let stream = object.as_stream()?;
        filters::decode_stream(stream)
    }
}

impl std::fmt::Debug for Document {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Document")
            .field("version", &self.version)
            .field("max_id", &self.max_id)
            .field("trailer", &self.trailer)
            .finish()
    }
}
