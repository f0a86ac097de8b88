//! The stream filter pipeline.
//!
//! Applies a stream dictionary's `/Filter` chain (with `/DecodeParms`) to
//! raw payload bytes. Image codecs (DCT, JPX, CCITT, JBIG2) are not
//! decoded here; the pipeline stops and hands their bytes through
//! unchanged for the consumer to feed into an image decoder.

mod png;

use crate::{Dictionary, Error, Object, Result, Stream};
use flate2::read::{DeflateDecoder, ZlibDecoder};
use log::warn;
use std::io::Read;

/// Decode a materialized stream's payload.
pub fn decode_stream(stream: &Stream) -> Result<Vec<u8>> {
    decode(&stream.dict, &stream.content)
}

/// Apply the `/Filter` chain described by `dict` to `content`.
pub fn decode(dict: &Dictionary, content: &[u8]) -> Result<Vec<u8>> {
    let filters = filter_names(dict)?;
    let params = decode_parms(dict, filters.len());

    let mut data = content.to_vec();
    for (name, parms) in filters.into_iter().zip(params) {
        match name.as_slice() {
            b"FlateDecode" | b"Fl" => {
                data = flate_decode(&data)?;
                data = apply_predictor(data, parms.as_ref())?;
            }
            b"LZWDecode" | b"LZW" => {
                data = lzw_decode(&data, parms.as_ref())?;
                data = apply_predictor(data, parms.as_ref())?;
            }
            b"ASCIIHexDecode" | b"AHx" => data = ascii_hex_decode(&data)?,
            b"ASCII85Decode" | b"A85" => data = ascii_85_decode(&data)?,
            b"RunLengthDecode" | b"RL" => data = run_length_decode(&data)?,
            b"Crypt" => {
                // Decryption happens before the pipeline; only the
                // identity crypt filter may still appear here.
                let is_identity = parms
                    .as_ref()
                    .and_then(|p| p.get(b"Name").and_then(Object::as_name).ok())
                    .is_none_or(|name| name == b"Identity");
                if !is_identity {
                    return Err(Error::Filter("unexpected non-identity Crypt filter".to_string()));
                }
            }
            b"DCTDecode" | b"JPXDecode" | b"CCITTFaxDecode" | b"JBIG2Decode" => {
                warn!(
                    "leaving image filter {} undecoded",
                    String::from_utf8_lossy(&name)
                );
                break;
            }
            other => {
                return Err(Error::Filter(format!(
                    "unknown stream filter {}",
                    String::from_utf8_lossy(other)
                )));
            }
        }
    }

    Ok(data)
}

fn filter_names(dict: &Dictionary) -> Result<Vec<Vec<u8>>> {
    let filter = match dict.get(b"Filter") {
        Ok(filter) => filter,
        Err(_) => return Ok(vec![]),
    };

    if let Ok(name) = filter.as_name() {
        Ok(vec![name.to_vec()])
    } else if let Ok(names) = filter.as_array() {
        names.iter().map(|n| n.as_name().map(<[u8]>::to_vec)).collect()
    } else {
        Err(Error::ObjectType {
            expected: "Name or Array",
            found: filter.enum_variant(),
        })
    }
}

/// `/DecodeParms` (or its `/DP` abbreviation), aligned to the filter list.
fn decode_parms(dict: &Dictionary, filters: usize) -> Vec<Option<Dictionary>> {
    let parms = dict.get(b"DecodeParms").or_else(|_| dict.get(b"DP")).ok();

    let mut out = vec![None; filters];
    match parms {
        Some(Object::Dictionary(single)) => {
            if let Some(slot) = out.first_mut() {
                *slot = Some(single.clone());
            }
        }
        Some(Object::Array(list)) => {
            for (slot, entry) in out.iter_mut().zip(list) {
                if let Object::Dictionary(dict) = entry {
                    *slot = Some(dict.clone());
                }
            }
        }
        Some(other) => warn!("ignoring /DecodeParms of type {}", other.enum_variant()),
        None => {}
    }
    out
}

fn parm_i64(parms: Option<&Dictionary>, key: &[u8], default: i64) -> i64 {
    parms
        .and_then(|p| p.get(key).and_then(Object::as_i64).ok())
        .unwrap_or(default)
}

fn flate_decode(data: &[u8]) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    if ZlibDecoder::new(data).read_to_end(&mut out).is_ok() {
        return Ok(out);
    }

    // Some generators omit the zlib wrapper; retry as raw deflate.
    out.clear();
    if DeflateDecoder::new(data).read_to_end(&mut out).is_ok() {
        return Ok(out);
    }

    Err(Error::Filter("FlateDecode stream is corrupt".to_string()))
}

fn lzw_decode(data: &[u8], parms: Option<&Dictionary>) -> Result<Vec<u8>> {
    let early_change = parm_i64(parms, b"EarlyChange", 1);
    let mut decoder = if early_change == 0 {
        weezl::decode::Decoder::new(weezl::BitOrder::Msb, 8)
    } else {
        weezl::decode::Decoder::with_tiff_size_switch(weezl::BitOrder::Msb, 8)
    };
    decoder
        .decode(data)
        .map_err(|err| Error::Filter(format!("LZWDecode failed: {err}")))
}

fn ascii_hex_decode(data: &[u8]) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(data.len() / 2);
    let mut pending: Option<u8> = None;

    for &byte in data {
        let digit = match byte {
            b'>' => break,
            b'0'..=b'9' => byte - b'0',
            b'a'..=b'f' => byte - b'a' + 10,
            b'A'..=b'F' => byte - b'A' + 10,
            c if crate::scanner::is_whitespace(c) => continue,
            other => {
                return Err(Error::Filter(format!("invalid ASCIIHexDecode byte 0x{other:02x}")));
            }
        };
        match pending.take() {
            Some(high) => out.push((high << 4) | digit),
            None => pending = Some(digit),
        }
    }

    // An odd final digit behaves as if followed by zero.
    if let Some(high) = pending {
        out.push(high << 4);
    }

    Ok(out)
}

fn ascii_85_decode(data: &[u8]) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(data.len() * 4 / 5);
    let mut group = [0u8; 5];
    let mut filled = 0usize;

    let mut input = data;
    if input.starts_with(b"<~") {
        input = &input[2..];
    }

    let mut iter = input.iter().copied();
    while let Some(byte) = iter.next() {
        match byte {
            b'~' => break,
            b'z' if filled == 0 => out.extend_from_slice(&[0, 0, 0, 0]),
            b'!'..=b'u' => {
                group[filled] = byte - b'!';
                filled += 1;
                if filled == 5 {
                    let value = group.iter().fold(0u32, |acc, &d| acc.wrapping_mul(85).wrapping_add(d as u32));
                    out.extend_from_slice(&value.to_be_bytes());
                    filled = 0;
                }
            }
            c if crate::scanner::is_whitespace(c) => continue,
            other => {
                return Err(Error::Filter(format!("invalid ASCII85Decode byte 0x{other:02x}")));
            }
        }
    }

    // A partial group of n digits encodes n - 1 bytes.
    if filled == 1 {
        return Err(Error::Filter("dangling ASCII85Decode digit".to_string()));
    }
    if filled > 1 {
        for slot in group.iter_mut().skip(filled) {
            *slot = 84;
        }
        let value = group.iter().fold(0u32, |acc, &d| acc.wrapping_mul(85).wrapping_add(d as u32));
        out.extend_from_slice(&value.to_be_bytes()[..filled - 1]);
    }

    Ok(out)
}

fn run_length_decode(data: &[u8]) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    let mut pos = 0usize;

    while pos < data.len() {
        let length = data[pos];
        pos += 1;
        match length {
            128 => break,
            0..=127 => {
                let count = length as usize + 1;
                let literal = data
                    .get(pos..pos + count)
                    .ok_or_else(|| Error::Filter("truncated RunLengthDecode literal".to_string()))?;
                out.extend_from_slice(literal);
                pos += count;
            }
            129..=255 => {
                let byte = *data
                    .get(pos)
                    .ok_or_else(|| Error::Filter("truncated RunLengthDecode run".to_string()))?;
                out.extend(std::iter::repeat_n(byte, 257 - length as usize));
                pos += 1;
            }
        }
    }

    Ok(out)
}

fn apply_predictor(data: Vec<u8>, parms: Option<&Dictionary>) -> Result<Vec<u8>> {
    let predictor = parm_i64(parms, b"Predictor", 1);
    if predictor < 2 {
        return Ok(data);
    }

    let colors = parm_i64(parms, b"Colors", 1).max(1) as usize;
    let bits = parm_i64(parms, b"BitsPerComponent", 8).max(1) as usize;
    let columns = parm_i64(parms, b"Columns", 1).max(1) as usize;

    let bytes_per_pixel = (colors * bits).div_ceil(8).max(1);
    let bytes_per_row = (columns * colors * bits).div_ceil(8);

    match predictor {
        2 => {
            if bits != 8 {
                warn!("TIFF predictor with {bits} bits per component is not supported");
                return Ok(data);
            }
            let mut data = data;
            for row in data.chunks_mut(bytes_per_row) {
                for i in bytes_per_pixel..row.len() {
                    row[i] = row[i].wrapping_add(row[i - bytes_per_pixel]);
                }
            }
            Ok(data)
        }
        10..=15 => png::decode_frame(&data, bytes_per_pixel, bytes_per_row),
        other => Err(Error::Filter(format!("unknown predictor {other}"))),
    }
}
