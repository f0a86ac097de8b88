//! The security gate: a thin facade over the standard security handler.
//!
//! The resolver hands the `/Encrypt` dictionary and the caller's
//! decryption material to [`Decryptor::new`]; from then on every stream
//! and string it materializes goes through [`Decryptor::decrypt_stream`]
//! or [`Decryptor::decrypt_string`]. Supported schemes: RC4 (40–128 bit),
//! AES-128 (`/AESV2`) and AES-256 (`/AESV3`).

mod rc4;

use crate::{Dictionary, Object, ObjectId};
use aes::cipher::block_padding::NoPadding;
use aes::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use bitflags::bitflags;
use log::warn;
use md5::{Digest as _, Md5};
use rc4::Rc4;
use sha2::{Sha256, Sha384, Sha512};
use thiserror::Error;

type Aes128CbcEnc = cbc::Encryptor<aes::Aes128>;
type Aes128CbcDec = cbc::Decryptor<aes::Aes128>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;

#[derive(Error, Debug)]
pub enum DecryptionError {
    #[error("missing encryption revision")]
    MissingRevision,
    #[error("missing the owner password (/O)")]
    MissingOwnerPassword,
    #[error("missing the user password (/U)")]
    MissingUserPassword,
    #[error("missing the permissions field (/P)")]
    MissingPermissions,
    #[error("missing the key material (/UE and /OE)")]
    MissingKeyMaterial,

    #[error("invalid key length")]
    InvalidKeyLength,
    #[error("invalid ciphertext length")]
    InvalidCipherTextLength,
    #[error("unexpected type; document does not comply with the spec")]
    InvalidType,

    #[error("the supplied password is incorrect")]
    IncorrectPassword,

    #[error("the document uses an encryption scheme that is not implemented")]
    UnsupportedEncryption,
    #[error("the encryption revision is not implemented")]
    UnsupportedRevision,

    #[error("invalid padding encountered when decrypting, key might be incorrect")]
    Padding,
}

/// Decryption material supplied by the caller.
///
/// Only password material is understood by the standard security handler;
/// the enum leaves room for keystore-based handlers.
#[derive(Debug, Clone)]
pub enum Material {
    Password(Vec<u8>),
}

impl Default for Material {
    fn default() -> Self {
        Material::Password(Vec::new())
    }
}

bitflags! {
    /// The user-access permissions carried in the `/P` field.
    #[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
    pub struct Permissions: u64 {
        /// Print the document (possibly degraded unless
        /// [`Permissions::PRINTABLE_IN_HIGH_QUALITY`] is also set).
        const PRINTABLE = 1 << 2;
        /// Modify contents other than annotations and form fields.
        const MODIFIABLE = 1 << 3;
        /// Copy or otherwise extract text and graphics.
        const COPYABLE = 1 << 4;
        /// Add or modify annotations and fill in form fields.
        const ANNOTABLE = 1 << 5;
        /// Fill in existing form fields even if ANNOTABLE is clear.
        const FILLABLE = 1 << 8;
        /// Extract content for accessibility purposes.
        const COPYABLE_FOR_ACCESSIBILITY = 1 << 9;
        /// Insert, rotate, or delete pages.
        const ASSEMBLABLE = 1 << 10;
        /// Print to a representation allowing a faithful copy.
        const PRINTABLE_IN_HIGH_QUALITY = 1 << 11;
    }
}

impl Default for Permissions {
    fn default() -> Self {
        Self::all()
    }
}

/// The 32-byte password padding string from the standard handler.
const PAD: [u8; 32] = [
    0x28, 0xBF, 0x4E, 0x5E, 0x4E, 0x75, 0x8A, 0x41, 0x64, 0x00, 0x4E, 0x56, 0xFF, 0xFA, 0x01, 0x08, 0x2E, 0x2E,
    0x00, 0xB6, 0xD0, 0x68, 0x3E, 0x80, 0x2F, 0x0C, 0xA9, 0xFE, 0x64, 0x53, 0x69, 0x7A,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CryptMethod {
    Identity,
    Rc4,
    Aes128,
    Aes256,
}

/// Decrypts streams and strings on behalf of the resolver.
pub struct Decryptor {
    file_key: Vec<u8>,
    stream_method: CryptMethod,
    string_method: CryptMethod,
    permissions: Permissions,
}

impl std::fmt::Debug for Decryptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // The file key stays out of debug output.
        f.debug_struct("Decryptor")
            .field("stream_method", &self.stream_method)
            .field("string_method", &self.string_method)
            .field("permissions", &self.permissions)
            .finish()
    }
}

impl Decryptor {
    /// Authenticate `material` against the `/Encrypt` dictionary and
    /// derive the file encryption key.
    ///
    /// `file_id` is the first element of the trailer `/ID` array, when
    /// present.
    pub fn new(
        encrypt: &Dictionary, file_id: Option<&[u8]>, material: &Material,
    ) -> Result<Decryptor, DecryptionError> {
        if let Ok(filter) = encrypt.get(b"Filter").and_then(Object::as_name) {
            if filter != b"Standard" {
                return Err(DecryptionError::UnsupportedEncryption);
            }
        }

        let version = encrypt.get(b"V").and_then(Object::as_i64).unwrap_or(0);
        let revision = encrypt
            .get(b"R")
            .and_then(Object::as_i64)
            .map_err(|_| DecryptionError::MissingRevision)?;
        let owner_entry = encrypt
            .get(b"O")
            .and_then(Object::as_str)
            .map_err(|_| DecryptionError::MissingOwnerPassword)?;
        let user_entry = encrypt
            .get(b"U")
            .and_then(Object::as_str)
            .map_err(|_| DecryptionError::MissingUserPassword)?;
        let p = encrypt
            .get(b"P")
            .and_then(Object::as_i64)
            .map_err(|_| DecryptionError::MissingPermissions)?;
        let encrypt_metadata = encrypt
            .get(b"EncryptMetadata")
            .and_then(Object::as_bool)
            .unwrap_or(true);

        let (stream_method, string_method) = match version {
            1 | 2 => (CryptMethod::Rc4, CryptMethod::Rc4),
            4 | 5 => (
                crypt_filter_method(encrypt, b"StmF")?,
                crypt_filter_method(encrypt, b"StrF")?,
            ),
            _ => return Err(DecryptionError::UnsupportedEncryption),
        };

        let Material::Password(password) = material;

        let file_key = match revision {
            2..=4 => {
                let key_len = if version == 1 {
                    5
                } else {
                    let bits = encrypt.get(b"Length").and_then(Object::as_i64).unwrap_or(40);
                    ((bits / 8) as usize).clamp(5, 16)
                };
                authenticate_rc4_family(
                    password,
                    owner_entry,
                    user_entry,
                    p,
                    file_id,
                    revision,
                    key_len,
                    encrypt_metadata,
                )?
            }
            5 | 6 => {
                let user_wrapped = encrypt
                    .get(b"UE")
                    .and_then(Object::as_str)
                    .map_err(|_| DecryptionError::MissingKeyMaterial)?;
                let owner_wrapped = encrypt
                    .get(b"OE")
                    .and_then(Object::as_str)
                    .map_err(|_| DecryptionError::MissingKeyMaterial)?;
                authenticate_aes256(password, owner_entry, user_entry, user_wrapped, owner_wrapped, revision)?
            }
            _ => return Err(DecryptionError::UnsupportedRevision),
        };

        Ok(Decryptor {
            file_key,
            stream_method,
            string_method,
            permissions: Permissions::from_bits_truncate(p as u32 as u64),
        })
    }

    pub fn permissions(&self) -> Permissions {
        self.permissions
    }

    pub fn decrypt_stream(&self, id: ObjectId, content: &[u8]) -> Result<Vec<u8>, DecryptionError> {
        self.decrypt(self.stream_method, id, content)
    }

    pub fn decrypt_string(&self, id: ObjectId, content: &[u8]) -> Result<Vec<u8>, DecryptionError> {
        self.decrypt(self.string_method, id, content)
    }

    fn decrypt(&self, method: CryptMethod, id: ObjectId, content: &[u8]) -> Result<Vec<u8>, DecryptionError> {
        match method {
            CryptMethod::Identity => Ok(content.to_vec()),
            CryptMethod::Rc4 => {
                let key = self.object_key(id, false);
                Ok(Rc4::new(&key).apply(content))
            }
            CryptMethod::Aes128 => {
                let key = self.object_key(id, true);
                decrypt_aes_cbc(&key, content)
            }
            CryptMethod::Aes256 => decrypt_aes_cbc(&self.file_key, content),
        }
    }

    /// Algorithm 1: extend the file key with the low-order bytes of the
    /// object number and generation (and `sAlT` for AES), then hash.
    fn object_key(&self, id: ObjectId, aes: bool) -> Vec<u8> {
        let mut hasher = Md5::new();
        hasher.update(&self.file_key);
        hasher.update(&id.0.to_le_bytes()[..3]);
        hasher.update(&id.1.to_le_bytes()[..2]);
        if aes {
            hasher.update(b"sAlT");
        }

        let key_len = (self.file_key.len() + 5).min(16);
        hasher.finalize()[..key_len].to_vec()
    }
}

fn crypt_filter_method(encrypt: &Dictionary, which: &[u8]) -> Result<CryptMethod, DecryptionError> {
    let name = match encrypt.get(which).and_then(Object::as_name) {
        Ok(name) => name,
        // Absent stream/string filter selectors mean identity.
        Err(_) => return Ok(CryptMethod::Identity),
    };
    if name == b"Identity" {
        return Ok(CryptMethod::Identity);
    }

    let filter = encrypt
        .get(b"CF")
        .and_then(Object::as_dict)
        .and_then(|cf| cf.get(name))
        .and_then(Object::as_dict)
        .map_err(|_| DecryptionError::UnsupportedEncryption)?;

    match filter.get(b"CFM").and_then(Object::as_name) {
        Ok(b"V2") => Ok(CryptMethod::Rc4),
        Ok(b"AESV2") => Ok(CryptMethod::Aes128),
        Ok(b"AESV3") => Ok(CryptMethod::Aes256),
        Ok(b"None") => Ok(CryptMethod::Identity),
        _ => Err(DecryptionError::UnsupportedEncryption),
    }
}

fn pad_password(password: &[u8]) -> [u8; 32] {
    let mut padded = [0u8; 32];
    let used = password.len().min(32);
    padded[..used].copy_from_slice(&password[..used]);
    padded[used..].copy_from_slice(&PAD[..32 - used]);
    padded
}

/// Algorithm 2: derive the RC4-family file key from a padded password.
#[allow(clippy::too_many_arguments)]
fn compute_file_key(
    padded: &[u8; 32], owner_entry: &[u8], p: i64, file_id: Option<&[u8]>, revision: i64, key_len: usize,
    encrypt_metadata: bool,
) -> Vec<u8> {
    let mut hasher = Md5::new();
    hasher.update(padded);
    hasher.update(&owner_entry[..owner_entry.len().min(32)]);
    hasher.update((p as u32).to_le_bytes());
    if let Some(id) = file_id {
        hasher.update(id);
    }
    if revision >= 4 && !encrypt_metadata {
        hasher.update([0xFF, 0xFF, 0xFF, 0xFF]);
    }

    let mut hash = hasher.finalize().to_vec();
    if revision >= 3 {
        for _ in 0..50 {
            hash = Md5::digest(&hash[..key_len]).to_vec();
        }
    }

    hash.truncate(key_len);
    hash
}

/// Algorithms 4/5: check a candidate file key against the `/U` entry.
fn user_entry_matches(key: &[u8], user_entry: &[u8], file_id: Option<&[u8]>, revision: i64) -> bool {
    if revision == 2 {
        let expected = Rc4::new(key).apply(PAD);
        user_entry.len() >= 32 && expected == user_entry[..32]
    } else {
        let mut hasher = Md5::new();
        hasher.update(PAD);
        if let Some(id) = file_id {
            hasher.update(id);
        }
        let mut cipher = Rc4::new(key).apply(hasher.finalize());
        for round in 1..=19u8 {
            let round_key: Vec<u8> = key.iter().map(|b| b ^ round).collect();
            cipher = Rc4::new(&round_key).apply(&cipher);
        }
        user_entry.len() >= 16 && cipher[..16] == user_entry[..16]
    }
}

#[allow(clippy::too_many_arguments)]
fn authenticate_rc4_family(
    password: &[u8], owner_entry: &[u8], user_entry: &[u8], p: i64, file_id: Option<&[u8]>, revision: i64,
    key_len: usize, encrypt_metadata: bool,
) -> Result<Vec<u8>, DecryptionError> {
    // Try the material as the user password first.
    let padded = pad_password(password);
    let key = compute_file_key(&padded, owner_entry, p, file_id, revision, key_len, encrypt_metadata);
    if user_entry_matches(&key, user_entry, file_id, revision) {
        return Ok(key);
    }

    // Algorithm 7: treat it as the owner password and recover the padded
    // user password from /O.
    let mut hash = Md5::digest(pad_password(password)).to_vec();
    if revision >= 3 {
        for _ in 0..50 {
            hash = Md5::digest(&hash).to_vec();
        }
    }
    let owner_key = &hash[..key_len];

    let recovered = if revision == 2 {
        Rc4::new(owner_key).apply(owner_entry)
    } else {
        let mut data = owner_entry.to_vec();
        for round in (0..=19u8).rev() {
            let round_key: Vec<u8> = owner_key.iter().map(|b| b ^ round).collect();
            data = Rc4::new(&round_key).apply(&data);
        }
        data
    };

    if recovered.len() >= 32 {
        let mut padded = [0u8; 32];
        padded.copy_from_slice(&recovered[..32]);
        let key = compute_file_key(&padded, owner_entry, p, file_id, revision, key_len, encrypt_metadata);
        if user_entry_matches(&key, user_entry, file_id, revision) {
            return Ok(key);
        }
    }

    Err(DecryptionError::IncorrectPassword)
}

/// Algorithm 2.B: the iterated SHA-2 hash used by revision 6. Revision 5
/// (a deprecated extension) uses a single SHA-256 round.
fn revision_6_hash(password: &[u8], salt: &[u8], user_data: &[u8], revision: i64) -> Result<[u8; 32], DecryptionError> {
    let mut hasher = Sha256::new();
    hasher.update(password);
    hasher.update(salt);
    hasher.update(user_data);
    let mut k = hasher.finalize().to_vec();

    if revision >= 6 {
        let mut round = 0usize;
        loop {
            let mut block = Vec::with_capacity(64 * (password.len() + k.len() + user_data.len()));
            for _ in 0..64 {
                block.extend_from_slice(password);
                block.extend_from_slice(&k);
                block.extend_from_slice(user_data);
            }

            let mut buf = block.clone();
            let total = buf.len();
            let encrypted = Aes128CbcEnc::new(k[..16].into(), k[16..32].into())
                .encrypt_padded_mut::<NoPadding>(&mut buf, total)
                .map_err(|_| DecryptionError::Padding)?;

            let modulo = encrypted[..16].iter().map(|b| *b as usize).sum::<usize>() % 3;
            k = match modulo {
                0 => Sha256::digest(encrypted).to_vec(),
                1 => Sha384::digest(encrypted).to_vec(),
                _ => Sha512::digest(encrypted).to_vec(),
            };

            round += 1;
            if round >= 64 && (*encrypted.last().unwrap() as usize) <= round - 32 {
                break;
            }
        }
    }

    let mut out = [0u8; 32];
    out.copy_from_slice(&k[..32]);
    Ok(out)
}

fn authenticate_aes256(
    password: &[u8], owner_entry: &[u8], user_entry: &[u8], user_wrapped: &[u8], owner_wrapped: &[u8],
    revision: i64,
) -> Result<Vec<u8>, DecryptionError> {
    if user_entry.len() < 48 || owner_entry.len() < 48 {
        return Err(DecryptionError::InvalidType);
    }
    // Passwords are taken as UTF-8 bytes, truncated to 127 bytes.
    let password = &password[..password.len().min(127)];

    let (key_salt, wrapped, user_data): (_, _, &[u8]) = {
        let user_hash = revision_6_hash(password, &user_entry[32..40], b"", revision)?;
        if user_hash == user_entry[..32] {
            (&user_entry[40..48], user_wrapped, b"")
        } else {
            let owner_hash = revision_6_hash(password, &owner_entry[32..40], &user_entry[..48], revision)?;
            if owner_hash != owner_entry[..32] {
                return Err(DecryptionError::IncorrectPassword);
            }
            (&owner_entry[40..48], owner_wrapped, &user_entry[..48])
        }
    };

    if wrapped.len() != 32 {
        return Err(DecryptionError::InvalidKeyLength);
    }

    let intermediate = revision_6_hash(password, key_salt, user_data, revision)?;
    let mut buf = wrapped.to_vec();
    let key = Aes256CbcDec::new((&intermediate).into(), (&[0u8; 16]).into())
        .decrypt_padded_mut::<NoPadding>(&mut buf)
        .map_err(|_| DecryptionError::Padding)?;

    Ok(key.to_vec())
}

/// AES-CBC with the IV prefixed to the ciphertext. Padding is stripped
/// leniently afterwards; real-world files get it wrong often enough that
/// a strict PKCS#5 check would reject readable documents.
fn decrypt_aes_cbc(key: &[u8], content: &[u8]) -> Result<Vec<u8>, DecryptionError> {
    if content.is_empty() || content.len() == 16 {
        return Ok(vec![]);
    }
    if content.len() < 16 || (content.len() - 16) % 16 != 0 {
        return Err(DecryptionError::InvalidCipherTextLength);
    }

    let iv = &content[..16];
    let mut buf = content[16..].to_vec();

    let plain_len = match key.len() {
        16 => Aes128CbcDec::new(key.into(), iv.into())
            .decrypt_padded_mut::<NoPadding>(&mut buf)
            .map_err(|_| DecryptionError::Padding)?
            .len(),
        32 => Aes256CbcDec::new(key.into(), iv.into())
            .decrypt_padded_mut::<NoPadding>(&mut buf)
            .map_err(|_| DecryptionError::Padding)?
            .len(),
        _ => return Err(DecryptionError::InvalidKeyLength),
    };
    buf.truncate(plain_len);

    match buf.last().copied() {
        Some(pad @ 1..=16) if (pad as usize) <= buf.len() => {
            let len = buf.len() - pad as usize;
            buf.truncate(len);
        }
        _ => warn!("stream carries invalid block padding, keeping raw plaintext"),
    }

    Ok(buf)
}
