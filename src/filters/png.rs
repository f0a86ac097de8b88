//! PNG row predictors, as used by Flate and LZW `/DecodeParms`.

use crate::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RowFilter {
    None,
    Sub,
    Up,
    Avg,
    Paeth,
}

impl RowFilter {
    fn from_tag(n: u8) -> Option<RowFilter> {
        match n {
            0 => Some(RowFilter::None),
            1 => Some(RowFilter::Sub),
            2 => Some(RowFilter::Up),
            3 => Some(RowFilter::Avg),
            4 => Some(RowFilter::Paeth),
            _ => None,
        }
    }
}

fn paeth_predict(left: u8, above: u8, upper_left: u8) -> u8 {
    let expand_left = left as i16;
    let expand_above = above as i16;
    let expand_upper_left = upper_left as i16;

    let initial_estimate = expand_left + expand_above - expand_upper_left;

    let dist_left = (initial_estimate - expand_left).abs();
    let dist_above = (initial_estimate - expand_above).abs();
    let dist_upper_left = (initial_estimate - expand_upper_left).abs();

    if dist_left <= dist_above && dist_left <= dist_upper_left {
        left
    } else if dist_above <= dist_upper_left {
        above
    } else {
        upper_left
    }
}

fn decode_row(filter: RowFilter, bpp: usize, previous: &[u8], current: &mut [u8]) {
    let len = current.len();

    match filter {
        RowFilter::None => (),
        RowFilter::Sub => {
            for i in bpp..len {
                current[i] = current[i].wrapping_add(current[i - bpp]);
            }
        }
        RowFilter::Up => {
            for i in 0..len {
                current[i] = current[i].wrapping_add(previous[i]);
            }
        }
        RowFilter::Avg => {
            for i in 0..bpp {
                current[i] = current[i].wrapping_add(previous[i] / 2);
            }

            for i in bpp..len {
                current[i] = current[i].wrapping_add(((current[i - bpp] as i16 + previous[i] as i16) / 2) as u8);
            }
        }
        RowFilter::Paeth => {
            for i in 0..bpp {
                current[i] = current[i].wrapping_add(paeth_predict(0, previous[i], 0));
            }

            for i in bpp..len {
                current[i] =
                    current[i].wrapping_add(paeth_predict(current[i - bpp], previous[i], previous[i - bpp]));
            }
        }
    }
}

/// Undo per-row PNG filtering. Each row is one tag byte followed by
/// `bytes_per_row` filtered bytes; a short trailing row is an error.
pub(crate) fn decode_frame(content: &[u8], bytes_per_pixel: usize, bytes_per_row: usize) -> Result<Vec<u8>> {
    let mut previous = vec![0_u8; bytes_per_row];
    let mut current = vec![0_u8; bytes_per_row];
    let mut decoded = Vec::with_capacity(content.len());
    let mut pos = 0;

    while pos < content.len() {
        let filter = RowFilter::from_tag(content[pos])
            .ok_or_else(|| Error::Filter(format!("invalid PNG predictor row tag {}", content[pos])))?;
        pos += 1;

        let row = content
            .get(pos..pos + bytes_per_row)
            .ok_or_else(|| Error::Filter("truncated PNG predictor row".to_string()))?;
        current.copy_from_slice(row);
        pos += bytes_per_row;

        decode_row(filter, bytes_per_pixel, previous.as_slice(), current.as_mut_slice());
        decoded.extend_from_slice(current.as_slice());
        std::mem::swap(&mut previous, &mut current);
    }

    Ok(decoded)
}
