//! Well-formed documents: table-form and stream-form cross-references
//! must produce identical object graphs.

use vellum::{Document, Object, ParseOptions, XrefEntry};

/// A two-object document with a textual cross-reference table.
fn table_pdf() -> Vec<u8> {
    let mut buf = b"%PDF-1.5\n".to_vec();

    let catalog_offset = buf.len();
    buf.extend_from_slice(b"1 0 obj\n<< /Type /Catalog /Pages 2 0 R >>\nendobj\n");
    let pages_offset = buf.len();
    buf.extend_from_slice(b"2 0 obj\n<< /Type /Pages /Count 0 /Kids [] >>\nendobj\n");

    let xref_offset = buf.len();
    buf.extend_from_slice(b"xref\n0 3\n");
    buf.extend_from_slice(b"0000000000 65535 f \n");
    buf.extend_from_slice(format!("{catalog_offset:010} 00000 n \n").as_bytes());
    buf.extend_from_slice(format!("{pages_offset:010} 00000 n \n").as_bytes());
    buf.extend_from_slice(b"trailer\n<< /Size 3 /Root 1 0 R >>\nstartxref\n");
    buf.extend_from_slice(xref_offset.to_string().as_bytes());
    buf.extend_from_slice(b"\n%%EOF\n");
    buf
}

/// The same two objects, indexed by a cross-reference stream.
fn stream_pdf() -> Vec<u8> {
    let mut buf = b"%PDF-1.5\n".to_vec();

    let catalog_offset = buf.len();
    buf.extend_from_slice(b"1 0 obj\n<< /Type /Catalog /Pages 2 0 R >>\nendobj\n");
    let pages_offset = buf.len();
    buf.extend_from_slice(b"2 0 obj\n<< /Type /Pages /Count 0 /Kids [] >>\nendobj\n");

    let xref_offset = buf.len();
    let mut payload = Vec::new();
    for (kind, field2, field3) in [
        (0u8, 0u16, 65535u16),
        (1, catalog_offset as u16, 0),
        (1, pages_offset as u16, 0),
        (1, xref_offset as u16, 0),
    ] {
        payload.push(kind);
        payload.extend_from_slice(&field2.to_be_bytes());
        payload.push(field3 as u8);
    }

    buf.extend_from_slice(
        format!(
            "3 0 obj\n<< /Type /XRef /Size 4 /W [1 2 1] /Index [0 4] /Root 1 0 R /Length {} >>\nstream\n",
            payload.len()
        )
        .as_bytes(),
    );
    buf.extend_from_slice(&payload);
    buf.extend_from_slice(b"\nendstream\nendobj\nstartxref\n");
    buf.extend_from_slice(xref_offset.to_string().as_bytes());
    buf.extend_from_slice(b"\n%%EOF\n");
    buf
}

fn assert_two_object_graph(document: &Document) {
    let catalog = document.resolve((1, 0)).unwrap();
    let catalog = catalog.as_dict().unwrap();
    assert_eq!(catalog.get(b"Type").unwrap().as_name().unwrap(), b"Catalog");
    assert_eq!(catalog.get(b"Pages").unwrap().as_reference().unwrap(), (2, 0));

    let pages = document.resolve((2, 0)).unwrap();
    let pages = pages.as_dict().unwrap();
    assert_eq!(pages.get(b"Count").unwrap().as_i64().unwrap(), 0);
    assert!(pages.get(b"Kids").unwrap().as_array().unwrap().is_empty());
}

#[test]
fn table_xref_resolves_both_objects() {
    let document = Document::load_mem(&table_pdf()).unwrap();
    assert_eq!(document.version, "1.5");
    assert_eq!(document.highest_object_number(), 2);
    assert_two_object_graph(&document);
}

#[test]
fn stream_xref_resolves_the_same_graph() {
    let document = Document::load_mem(&stream_pdf()).unwrap();
    assert_two_object_graph(&document);
    assert_eq!(
        document.xref_table().get((1, 0)),
        Document::load_mem(&table_pdf()).unwrap().xref_table().get((1, 0))
    );
}

#[test]
fn resolution_is_idempotent() {
    let document = Document::load_mem(&table_pdf()).unwrap();
    let first = document.resolve((1, 0)).unwrap();
    let second = document.resolve((1, 0)).unwrap();
    let third = document.resolve((1, 0)).unwrap();
    assert_eq!(first, second);
    assert_eq!(second, third);
}

#[test]
fn strict_and_lenient_agree_on_valid_input() {
    for pdf in [table_pdf(), stream_pdf()] {
        let lenient = Document::load_mem(&pdf).unwrap();
        let strict = Document::load_mem_with(&pdf, ParseOptions::strict()).unwrap();

        assert_eq!(lenient.version, strict.version);
        assert_eq!(lenient.max_id, strict.max_id);
        assert_eq!(format!("{:?}", lenient.trailer), format!("{:?}", strict.trailer));
        for number in 1..=2u64 {
            assert_eq!(
                lenient.resolve((number, 0)).unwrap(),
                strict.resolve((number, 0)).unwrap()
            );
        }
    }
}

#[test]
fn free_entries_are_recorded_but_resolve_to_null() {
    let document = Document::load_mem(&table_pdf()).unwrap();
    assert!(matches!(
        document.xref_table().get((0, 65535)),
        Some(XrefEntry::Free { .. })
    ));
    assert_eq!(document.resolve((0, 65535)).unwrap(), Object::Null);
}

#[test]
fn catalog_is_reachable_through_the_trailer() {
    let document = Document::load_mem(&table_pdf()).unwrap();
    let catalog = document.catalog().unwrap();
    assert_eq!(catalog.as_dict().unwrap().get(b"Type").unwrap().as_name().unwrap(), b"Catalog");
    assert!(!document.is_encrypted());
}
