//! Repair paths: missing anchors, lying offsets, and trailer
//! reconstruction from raw bytes.

use vellum::{Document, Error, Object, ParseOptions, XrefEntry};

/// The repair paths narrate what they do; surface that during test runs.
fn init_logs() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Objects only — no cross-reference, no `startxref`.
fn headless_pdf() -> Vec<u8> {
    let mut buf = b"%PDF-1.4\n".to_vec();
    buf.extend_from_slice(b"1 0 obj\n<< /Type /Catalog /Pages 2 0 R >>\nendobj\n");
    buf.extend_from_slice(b"2 0 obj\n<< /Type /Pages /Count 0 /Kids [] >>\nendobj\n");
    buf.extend_from_slice(b"%%EOF\n");
    buf
}

#[test]
fn missing_startxref_rebuilds_in_lenient_mode() {
    init_logs();
    let document = Document::load_mem(&headless_pdf()).unwrap();

    let root = document.trailer.get(b"Root").unwrap().as_reference().unwrap();
    assert_eq!(root, (1, 0));

    let catalog = document.catalog().unwrap();
    assert_eq!(catalog.as_dict().unwrap().get(b"Type").unwrap().as_name().unwrap(), b"Catalog");
    assert_eq!(
        document
            .resolve((2, 0))
            .unwrap()
            .as_dict()
            .unwrap()
            .get(b"Count")
            .unwrap()
            .as_i64()
            .unwrap(),
        0
    );
}

#[test]
fn missing_startxref_is_fatal_in_strict_mode() {
    match Document::load_mem_with(&headless_pdf(), ParseOptions::strict()) {
        Err(Error::MissingStartxref) => {}
        other => panic!("expected MissingStartxref, got {other:?}"),
    }
}

fn table_pdf_with_startxref(skew: i64) -> Vec<u8> {
    let mut buf = b"%PDF-1.4\n".to_vec();
    let catalog_offset = buf.len();
    buf.extend_from_slice(b"1 0 obj\n<< /Type /Catalog >>\nendobj\n");
    let xref_offset = buf.len();
    buf.extend_from_slice(b"xref\n0 2\n");
    buf.extend_from_slice(b"0000000000 65535 f \n");
    buf.extend_from_slice(format!("{catalog_offset:010} 00000 n \n").as_bytes());
    let claimed = (xref_offset as i64 + skew) as u64;
    buf.extend_from_slice(format!("trailer\n<< /Size 2 /Root 1 0 R >>\nstartxref\n{claimed}\n%%EOF\n").as_bytes());
    buf
}

#[test]
fn wrong_startxref_offset_is_repaired_to_the_nearest_candidate() {
    let document = Document::load_mem(&table_pdf_with_startxref(3)).unwrap();
    assert_eq!(
        document
            .catalog()
            .unwrap()
            .as_dict()
            .unwrap()
            .get(b"Type")
            .unwrap()
            .as_name()
            .unwrap(),
        b"Catalog"
    );
}

#[test]
fn wrong_startxref_offset_is_fatal_in_strict_mode() {
    assert!(Document::load_mem_with(&table_pdf_with_startxref(3), ParseOptions::strict()).is_err());
}

#[test]
fn lying_entry_offsets_condemn_the_whole_map() {
    init_logs();
    // The xref claims object 1 lives where object 2 actually is.
    let mut buf = b"%PDF-1.4\n".to_vec();
    let first_offset = buf.len();
    buf.extend_from_slice(b"1 0 obj\n<< /Type /Catalog /Pages 2 0 R >>\nendobj\n");
    let second_offset = buf.len();
    buf.extend_from_slice(b"2 0 obj\n<< /Type /Pages /Count 0 >>\nendobj\n");
    let xref_offset = buf.len();
    buf.extend_from_slice(b"xref\n0 3\n");
    buf.extend_from_slice(b"0000000000 65535 f \n");
    buf.extend_from_slice(format!("{second_offset:010} 00000 n \n").as_bytes());
    buf.extend_from_slice(format!("{first_offset:010} 00000 n \n").as_bytes());
    buf.extend_from_slice(format!("trailer\n<< /Size 3 /Root 1 0 R >>\nstartxref\n{xref_offset}\n%%EOF\n").as_bytes());

    let document = Document::load_mem(&buf).unwrap();
    // After the raw-scan replacement both objects resolve correctly.
    assert_eq!(
        document
            .resolve((1, 0))
            .unwrap()
            .as_dict()
            .unwrap()
            .get(b"Type")
            .unwrap()
            .as_name()
            .unwrap(),
        b"Catalog"
    );
    assert_eq!(
        document
            .resolve((2, 0))
            .unwrap()
            .as_dict()
            .unwrap()
            .get(b"Count")
            .unwrap()
            .as_i64()
            .unwrap(),
        0
    );
}

#[test]
fn keyword_trailer_with_valid_predicates_is_adopted() {
    let mut buf = b"%PDF-1.4\n".to_vec();
    buf.extend_from_slice(b"1 0 obj\n<< /Type /Catalog /Pages 2 0 R >>\nendobj\n");
    buf.extend_from_slice(b"2 0 obj\n<< /Type /Pages /Count 0 >>\nendobj\n");
    buf.extend_from_slice(b"3 0 obj\n<< /Producer (vellum test) >>\nendobj\n");
    buf.extend_from_slice(b"trailer\n<< /Size 4 /Root 1 0 R /Info 3 0 R /Marker (kept) >>\n%%EOF\n");

    let document = Document::load_mem(&buf).unwrap();
    // The literal trailer qualified, so its extra keys survive.
    assert_eq!(document.trailer.get(b"Marker").unwrap().as_str().unwrap(), b"kept");
    assert_eq!(document.trailer.get(b"Info").unwrap().as_reference().unwrap(), (3, 0));
}

#[test]
fn root_tie_break_prefers_the_later_catalog() {
    let mut buf = b"%PDF-1.4\n".to_vec();
    buf.extend_from_slice(b"1 0 obj\n<< /Type /Catalog /Variant (first) >>\nendobj\n");
    buf.extend_from_slice(b"3 0 obj\n<< /Type /Catalog /Variant (second) >>\nendobj\n");
    buf.extend_from_slice(b"%%EOF\n");

    let document = Document::load_mem(&buf).unwrap();
    assert_eq!(document.trailer.get(b"Root").unwrap().as_reference().unwrap(), (3, 0));
}

#[test]
fn root_tie_break_keeps_the_earlier_catalog_when_its_generation_is_higher() {
    let mut buf = b"%PDF-1.4\n".to_vec();
    buf.extend_from_slice(b"1 5 obj\n<< /Type /Catalog /Variant (first) >>\nendobj\n");
    buf.extend_from_slice(b"3 0 obj\n<< /Type /Catalog /Variant (second) >>\nendobj\n");
    buf.extend_from_slice(b"%%EOF\n");

    let document = Document::load_mem(&buf).unwrap();
    assert_eq!(document.trailer.get(b"Root").unwrap().as_reference().unwrap(), (1, 5));
}

#[test]
fn missing_compressed_entry_is_rediscovered() {
    // The cross-reference stream forgets object 1, which lives inside an
    // object stream; lenient resolution rediscovers it by scanning.
    let mut buf = b"%PDF-1.5\n".to_vec();

    let container_offset = buf.len();
    let contents = b"<< /Type /Catalog >>";
    let header = b"1 0 ";
    let first = header.len();
    let mut payload = header.to_vec();
    payload.extend_from_slice(contents);
    buf.extend_from_slice(
        format!(
            "4 0 obj\n<< /Type /ObjStm /N 1 /First {first} /Length {} >>\nstream\n",
            payload.len()
        )
        .as_bytes(),
    );
    buf.extend_from_slice(&payload);
    buf.extend_from_slice(b"\nendstream\nendobj\n");

    let xref_offset = buf.len();
    let mut rows = Vec::new();
    for (kind, field2, field3) in [(1u8, container_offset as u16, 0u8), (1, xref_offset as u16, 0)] {
        rows.push(kind);
        rows.extend_from_slice(&field2.to_be_bytes());
        rows.push(field3);
    }
    buf.extend_from_slice(
        format!(
            "5 0 obj\n<< /Type /XRef /Size 6 /W [1 2 1] /Index [4 2] /Root 1 0 R /Length {} >>\nstream\n",
            rows.len()
        )
        .as_bytes(),
    );
    buf.extend_from_slice(&rows);
    buf.extend_from_slice(b"\nendstream\nendobj\nstartxref\n");
    buf.extend_from_slice(xref_offset.to_string().as_bytes());
    buf.extend_from_slice(b"\n%%EOF\n");

    let document = Document::load_mem(&buf).unwrap();
    assert!(document.xref_table().get((1, 0)).is_none());

    let catalog = document.resolve((1, 0)).unwrap();
    assert_eq!(catalog.as_dict().unwrap().get(b"Type").unwrap().as_name().unwrap(), b"Catalog");

    // The rediscovered entry landed in the map.
    assert!(matches!(
        document.xref_table().get((1, 0)),
        Some(XrefEntry::Compressed { container: (4, 0), .. })
    ));
}

#[test]
fn unknown_key_still_resolves_to_null_after_recovery() {
    let document = Document::load_mem(&headless_pdf()).unwrap();
    assert_eq!(document.resolve((99, 0)).unwrap(), Object::Null);
}
