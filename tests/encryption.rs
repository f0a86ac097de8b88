//! Encrypted documents: password authentication, gate ordering, and
//! permissions.

use md5::{Digest, Md5};
use vellum::{Document, Error, ParseOptions, Permissions};

const PAD: [u8; 32] = [
    0x28, 0xBF, 0x4E, 0x5E, 0x4E, 0x75, 0x8A, 0x41, 0x64, 0x00, 0x4E, 0x56, 0xFF, 0xFA, 0x01, 0x08, 0x2E, 0x2E,
    0x00, 0xB6, 0xD0, 0x68, 0x3E, 0x80, 0x2F, 0x0C, 0xA9, 0xFE, 0x64, 0x53, 0x69, 0x7A,
];

const FILE_ID: [u8; 8] = [0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08];
const P: i64 = -44;
const KEY_LEN: usize = 16;

fn rc4(key: &[u8], data: &[u8]) -> Vec<u8> {
    let mut state = [0u8; 256];
    for (i, v) in state.iter_mut().enumerate() {
        *v = i as u8;
    }
    let mut j = 0u8;
    for i in 0..256 {
        j = j.wrapping_add(state[i]).wrapping_add(key[i % key.len()]);
        state.swap(i, j as usize);
    }

    let mut out = Vec::with_capacity(data.len());
    let (mut i, mut j) = (0u8, 0u8);
    for byte in data {
        i = i.wrapping_add(1);
        j = j.wrapping_add(state[i as usize]);
        state.swap(i as usize, j as usize);
        out.push(byte ^ state[(state[i as usize].wrapping_add(state[j as usize])) as usize]);
    }
    out
}

fn pad_password(password: &[u8]) -> [u8; 32] {
    let mut padded = [0u8; 32];
    let used = password.len().min(32);
    padded[..used].copy_from_slice(&password[..used]);
    padded[used..].copy_from_slice(&PAD[..32 - used]);
    padded
}

/// Writer-side standard security handler, revision 3 with RC4-128.
struct Handler {
    owner_entry: Vec<u8>,
    user_entry: Vec<u8>,
    file_key: Vec<u8>,
}

impl Handler {
    fn new(user_password: &[u8], owner_password: &[u8]) -> Handler {
        // Algorithm 3: the /O entry.
        let mut owner_hash = Md5::digest(pad_password(owner_password)).to_vec();
        for _ in 0..50 {
            owner_hash = Md5::digest(&owner_hash).to_vec();
        }
        let owner_key = &owner_hash[..KEY_LEN];
        let mut owner_entry = pad_password(user_password).to_vec();
        for round in 0..=19u8 {
            let round_key: Vec<u8> = owner_key.iter().map(|b| b ^ round).collect();
            owner_entry = rc4(&round_key, &owner_entry);
        }

        // Algorithm 2: the file key.
        let mut hasher = Md5::new();
        hasher.update(pad_password(user_password));
        hasher.update(&owner_entry);
        hasher.update((P as u32).to_le_bytes());
        hasher.update(FILE_ID);
        let mut file_key = hasher.finalize().to_vec();
        for _ in 0..50 {
            file_key = Md5::digest(&file_key[..KEY_LEN]).to_vec();
        }
        file_key.truncate(KEY_LEN);

        // Algorithm 5: the /U entry.
        let mut hasher = Md5::new();
        hasher.update(PAD);
        hasher.update(FILE_ID);
        let mut user_entry = rc4(&file_key, &hasher.finalize());
        for round in 1..=19u8 {
            let round_key: Vec<u8> = file_key.iter().map(|b| b ^ round).collect();
            user_entry = rc4(&round_key, &user_entry);
        }
        user_entry.extend_from_slice(&[0u8; 16]);

        Handler {
            owner_entry,
            user_entry,
            file_key,
        }
    }

    fn object_key(&self, id: (u64, u32)) -> Vec<u8> {
        let mut hasher = Md5::new();
        hasher.update(&self.file_key);
        hasher.update(&id.0.to_le_bytes()[..3]);
        hasher.update(&id.1.to_le_bytes()[..2]);
        hasher.finalize()[..16].to_vec()
    }

    fn encrypt(&self, id: (u64, u32), plaintext: &[u8]) -> Vec<u8> {
        rc4(&self.object_key(id), plaintext)
    }
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02X}")).collect()
}

fn encrypted_pdf(handler: &Handler) -> Vec<u8> {
    let mut buf = b"%PDF-1.4\n".to_vec();
    let mut offsets = Vec::new();

    offsets.push(buf.len());
    buf.extend_from_slice(b"1 0 obj\n<< /Type /Catalog >>\nendobj\n");

    offsets.push(buf.len());
    let secret = handler.encrypt((2, 0), b"secret");
    buf.extend_from_slice(format!("2 0 obj\n<{}>\nendobj\n", hex(&secret)).as_bytes());

    offsets.push(buf.len());
    buf.extend_from_slice(
        format!(
            "3 0 obj\n<< /Filter /Standard /V 2 /R 3 /Length 128 /P {P} /O <{}> /U <{}> >>\nendobj\n",
            hex(&handler.owner_entry),
            hex(&handler.user_entry)
        )
        .as_bytes(),
    );

    offsets.push(buf.len());
    let body = handler.encrypt((4, 0), b"stream-data");
    buf.extend_from_slice(format!("4 0 obj\n<< /Length {} >>\nstream\n", body.len()).as_bytes());
    buf.extend_from_slice(&body);
    buf.extend_from_slice(b"\nendstream\nendobj\n");

    // An encrypted object stream holding object 6. The cross-reference
    // below deliberately omits object 6, so only a raw rescan finds it.
    offsets.push(buf.len());
    let packed = handler.encrypt((5, 0), b"6 0 (hidden)");
    buf.extend_from_slice(
        format!(
            "5 0 obj\n<< /Type /ObjStm /N 1 /First 4 /Length {} >>\nstream\n",
            packed.len()
        )
        .as_bytes(),
    );
    buf.extend_from_slice(&packed);
    buf.extend_from_slice(b"\nendstream\nendobj\n");

    let xref_offset = buf.len();
    buf.extend_from_slice(b"xref\n0 6\n");
    buf.extend_from_slice(b"0000000000 65535 f \n");
    for offset in &offsets {
        buf.extend_from_slice(format!("{offset:010} 00000 n \n").as_bytes());
    }
    buf.extend_from_slice(
        format!(
            "trailer\n<< /Size 6 /Root 1 0 R /Encrypt 3 0 R /ID [<{id}> <{id}>] >>\nstartxref\n{xref_offset}\n%%EOF\n",
            id = hex(&FILE_ID)
        )
        .as_bytes(),
    );
    buf
}

#[test]
fn user_password_unlocks_strings_and_streams() {
    let handler = Handler::new(b"user", b"owner");
    let pdf = encrypted_pdf(&handler);

    let document = Document::load_mem_with(&pdf, ParseOptions::default().with_password("user")).unwrap();
    assert!(document.is_encrypted());
    assert_eq!(document.resolve((2, 0)).unwrap().as_str().unwrap(), b"secret");
    assert_eq!(
        document.resolve((4, 0)).unwrap().as_stream().unwrap().content,
        b"stream-data"
    );
}

#[test]
fn owner_password_unlocks_the_same_document() {
    let handler = Handler::new(b"user", b"owner");
    let pdf = encrypted_pdf(&handler);

    let document = Document::load_mem_with(&pdf, ParseOptions::default().with_password("owner")).unwrap();
    assert_eq!(document.resolve((2, 0)).unwrap().as_str().unwrap(), b"secret");
}

#[test]
fn wrong_password_surfaces_in_both_modes() {
    let handler = Handler::new(b"user", b"owner");
    let pdf = encrypted_pdf(&handler);

    for options in [
        ParseOptions::default().with_password("nope"),
        ParseOptions::strict().with_password("nope"),
        ParseOptions::default(),
    ] {
        match Document::load_mem_with(&pdf, options) {
            Err(Error::InvalidPassword) => {}
            other => panic!("expected InvalidPassword, got {other:?}"),
        }
    }
}

#[test]
fn compressed_objects_are_rediscovered_behind_the_gate() {
    let handler = Handler::new(b"user", b"owner");
    let pdf = encrypted_pdf(&handler);

    let document = Document::load_mem_with(&pdf, ParseOptions::default().with_password("user")).unwrap();
    // Object 6 only exists inside the encrypted object stream and is
    // absent from the cross-reference; the rescan must decrypt the
    // container before opening it.
    assert!(document.xref_table().get((6, 0)).is_none());
    assert_eq!(document.resolve((6, 0)).unwrap().as_str().unwrap(), b"hidden");
}

#[test]
fn encryption_dictionary_is_never_decrypted() {
    let handler = Handler::new(b"user", b"owner");
    let pdf = encrypted_pdf(&handler);

    let document = Document::load_mem_with(&pdf, ParseOptions::default().with_password("user")).unwrap();

    // The encryption chain was materialized before the gate went in; its
    // strings must be the raw bytes from the file.
    let encrypt = document.resolve((3, 0)).unwrap();
    let dict = encrypt.as_dict().unwrap();
    assert_eq!(dict.get(b"O").unwrap().as_str().unwrap(), handler.owner_entry.as_slice());
    assert_eq!(dict.get(b"U").unwrap().as_str().unwrap(), handler.user_entry.as_slice());

    // Trailer strings (the file ID) are exempt as well.
    let ids = document.trailer.get(b"ID").unwrap().as_array().unwrap();
    assert_eq!(ids[0].as_str().unwrap(), FILE_ID);
}

#[test]
fn permissions_reflect_the_p_field() {
    let handler = Handler::new(b"user", b"owner");
    let pdf = encrypted_pdf(&handler);

    let document = Document::load_mem_with(&pdf, ParseOptions::default().with_password("user")).unwrap();
    let permissions = document.permissions();
    // -44 = ...11010100: printing and copying allowed, modification not.
    assert!(permissions.contains(Permissions::PRINTABLE));
    assert!(permissions.contains(Permissions::COPYABLE));
    assert!(!permissions.contains(Permissions::MODIFIABLE));
    assert!(!permissions.contains(Permissions::ANNOTABLE));
}

#[test]
fn unencrypted_documents_grant_everything() {
    let mut buf = b"%PDF-1.4\n".to_vec();
    let catalog_offset = buf.len();
    buf.extend_from_slice(b"1 0 obj\n<< /Type /Catalog >>\nendobj\n");
    let xref_offset = buf.len();
    buf.extend_from_slice(b"xref\n0 2\n");
    buf.extend_from_slice(b"0000000000 65535 f \n");
    buf.extend_from_slice(format!("{catalog_offset:010} 00000 n \n").as_bytes());
    buf.extend_from_slice(format!("trailer\n<< /Size 2 /Root 1 0 R >>\nstartxref\n{xref_offset}\n%%EOF\n").as_bytes());

    let document = Document::load_mem(&buf).unwrap();
    assert!(!document.is_encrypted());
    assert_eq!(document.permissions(), Permissions::all());
}
