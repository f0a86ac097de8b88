//! Decoder for the binary cross-reference stream format.

use crate::xref::{Xref, XrefEntry, XrefKind};
use crate::{Dictionary, Object, Result, XrefError};
use std::io::{Cursor, Read};

/// Decode a cross-reference stream payload into an [`Xref`].
///
/// `content` must already be run through the filter pipeline. The `W`
/// array gives per-field byte widths; `Index` enumerates `(first, count)`
/// runs and defaults to `[0, Size]`.
pub fn decode_xref_stream(dict: &Dictionary, content: &[u8]) -> Result<Xref> {
    let size = dict
        .get(b"Size")
        .and_then(Object::as_i64)
        .map_err(|_| XrefError::Malformed("cross-reference stream has no /Size"))?;

    let section_indices = match dict.get(b"Index") {
        Ok(index) => parse_integer_array(index).map_err(|_| XrefError::Malformed("non-numeric /Index"))?,
        Err(_) => vec![0, size],
    };
    if section_indices.len() % 2 != 0 {
        return Err(XrefError::Malformed("/Index is missing a trailing count").into());
    }

    let field_widths = dict
        .get(b"W")
        .and_then(parse_integer_array)
        .map_err(|_| XrefError::Malformed("missing or non-numeric /W"))?;

    if field_widths.len() < 3
        || field_widths[0].is_negative()
        || field_widths[1].is_negative()
        || field_widths[2].is_negative()
        || field_widths.iter().take(3).any(|w| *w > 8)
    {
        return Err(XrefError::Malformed("invalid /W field widths").into());
    }

    let mut bytes1 = vec![0_u8; field_widths[0] as usize];
    let mut bytes2 = vec![0_u8; field_widths[1] as usize];
    let mut bytes3 = vec![0_u8; field_widths[2] as usize];

    let mut xref = Xref::new(size.max(0) as u64, XrefKind::Stream);
    let mut reader = Cursor::new(content);

    for run in section_indices.chunks(2) {
        let (start, count) = (run[0], run[1]);
        if start.is_negative() || count.is_negative() {
            return Err(XrefError::Malformed("negative /Index run").into());
        }

        for j in 0..count as u64 {
            let number = start as u64 + j;

            // A zero-width type column defaults the entry type to 1.
            let entry_type = if !bytes1.is_empty() {
                read_big_endian_integer(&mut reader, bytes1.as_mut_slice())?
            } else {
                1
            };
            let field2 = if !bytes2.is_empty() {
                read_big_endian_integer(&mut reader, bytes2.as_mut_slice())?
            } else {
                0
            };
            let field3 = if !bytes3.is_empty() {
                read_big_endian_integer(&mut reader, bytes3.as_mut_slice())?
            } else {
                0
            };

            match entry_type {
                0 => {
                    let generation = field3 as u32;
                    xref.insert(
                        (number, generation),
                        XrefEntry::Free {
                            next_free: (field2, generation),
                        },
                    );
                }
                1 => {
                    xref.insert((number, field3 as u32), XrefEntry::Normal { offset: field2 });
                }
                2 => {
                    xref.insert(
                        (number, 0),
                        XrefEntry::Compressed {
                            container: (field2, 0),
                            index: field3 as u32,
                        },
                    );
                }
                // Readers shall ignore entries of unknown type.
                _ => {}
            }
        }
    }

    Ok(xref)
}

fn read_big_endian_integer(reader: &mut Cursor<&[u8]>, buffer: &mut [u8]) -> Result<u64> {
    reader
        .read_exact(buffer)
        .map_err(|_| XrefError::Malformed("truncated cross-reference stream row"))?;
    let mut value = 0u64;
    for &mut byte in buffer {
        value = (value << 8) + u64::from(byte);
    }
    Ok(value)
}

fn parse_integer_array(array: &Object) -> Result<Vec<i64>> {
    let array = array.as_array()?;
    let mut out = Vec::with_capacity(array.len());

    for n in array {
        out.push(n.as_i64()?);
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dictionary;

    fn widths(w0: i64, w1: i64, w2: i64) -> Object {
        Object::Array(vec![w0.into(), w1.into(), w2.into()])
    }

    #[test]
    fn decode_basic_rows() {
        let dict = dictionary! {
            "Size" => 3,
            "W" => widths(1, 2, 1),
        };
        #[rustfmt::skip]
        let content = vec![
            0x00, 0x00, 0x00, 0xFF, // free
            0x01, 0x00, 0x0F, 0x00, // in use at offset 15
            0x02, 0x00, 0x05, 0x01, // element 1 of object stream 5
        ];

        let xref = decode_xref_stream(&dict, &content).unwrap();
        assert!(matches!(xref.get((0, 255)), Some(XrefEntry::Free { .. })));
        assert_eq!(xref.get((1, 0)), Some(&XrefEntry::Normal { offset: 15 }));
        assert_eq!(
            xref.get((2, 0)),
            Some(&XrefEntry::Compressed {
                container: (5, 0),
                index: 1
            })
        );
    }

    #[test]
    fn zero_width_type_defaults_to_in_use() {
        let dict = dictionary! {
            "Size" => 2,
            "W" => widths(0, 1, 1),
        };
        let content = vec![0x0A, 0x00, 0x14, 0x03];

        let xref = decode_xref_stream(&dict, &content).unwrap();
        assert_eq!(xref.get((0, 0)), Some(&XrefEntry::Normal { offset: 10 }));
        assert_eq!(xref.get((1, 3)), Some(&XrefEntry::Normal { offset: 20 }));
    }

    #[test]
    fn index_runs_are_honored() {
        let dict = dictionary! {
            "Size" => 100,
            "Index" => Object::Array(vec![40.into(), 1.into(), 90.into(), 1.into()]),
            "W" => widths(1, 1, 1),
        };
        let content = vec![0x01, 0x07, 0x00, 0x01, 0x09, 0x00];

        let xref = decode_xref_stream(&dict, &content).unwrap();
        assert_eq!(xref.get((40, 0)), Some(&XrefEntry::Normal { offset: 7 }));
        assert_eq!(xref.get((90, 0)), Some(&XrefEntry::Normal { offset: 9 }));
        assert_eq!(xref.len(), 2);
    }

    #[test]
    fn odd_index_is_an_error() {
        let dict = dictionary! {
            "Size" => 2,
            "Index" => Object::Array(vec![0.into()]),
            "W" => widths(1, 1, 1),
        };
        assert!(decode_xref_stream(&dict, &[]).is_err());
    }

    #[test]
    fn truncated_rows_are_an_error() {
        let dict = dictionary! {
            "Size" => 2,
            "W" => widths(1, 2, 1),
        };
        let content = vec![0x01, 0x00, 0x0F, 0x00, 0x01, 0x00];
        assert!(decode_xref_stream(&dict, &content).is_err());
    }

    #[test]
    fn unknown_entry_types_are_skipped() {
        let dict = dictionary! {
            "Size" => 2,
            "W" => widths(1, 1, 1),
        };
        let content = vec![0x07, 0x01, 0x02, 0x01, 0x0A, 0x00];

        let xref = decode_xref_stream(&dict, &content).unwrap();
        assert_eq!(xref.len(), 1);
        assert_eq!(xref.get((1, 0)), Some(&XrefEntry::Normal { offset: 10 }));
    }
}
