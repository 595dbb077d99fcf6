//! PNG row predictors (`/Predictor` 10..=15), as used by xref and object streams.

use crate::model::PDFDict;

/// Predictor parameters read from a `DecodeParms` dictionary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PredictorParams {
    pub predictor: usize,
    pub columns: usize,
    pub colors: usize,
    pub bits_per_component: usize,
}

impl PredictorParams {
    pub fn from_dict(parms: &PDFDict) -> Self {
        let int = |key: &str, default: i64| {
            parms
                .get(key)
                .and_then(|v| v.as_int().ok())
                .unwrap_or(default)
                .max(0) as usize
        };
        Self {
            predictor: int("Predictor", 1),
            columns: int("Columns", 1),
            colors: int("Colors", 1),
            bits_per_component: int("BitsPerComponent", 8),
        }
    }
}

/// Undo PNG prediction. Data without a PNG predictor is returned untouched.
pub fn apply_png_predictor(data: &[u8], params: PredictorParams) -> Vec<u8> {
    if params.predictor < 10 {
        return data.to_vec();
    }
    let row_bytes = (params.colors * params.columns * params.bits_per_component).div_ceil(8);
    let bpp = (params.colors * params.bits_per_component / 8).max(1);
    let row_size = row_bytes + 1;

    let mut result = Vec::with_capacity(data.len());
    let mut prev_row = vec![0u8; row_bytes];
    let mut current_row = vec![0u8; row_bytes];

    for row in data.chunks_exact(row_size) {
        let (filter_type, row_data) = (row[0], &row[1..]);
        for i in 0..row_bytes {
            let left = if i >= bpp { current_row[i - bpp] } else { 0 };
            let above = prev_row[i];
            let upper_left = if i >= bpp { prev_row[i - bpp] } else { 0 };
            let predicted = match filter_type {
                1 => left,
                2 => above,
                3 => ((left as u16 + above as u16) / 2) as u8,
                4 => paeth_predictor(left, above, upper_left),
                _ => 0,
            };
            current_row[i] = row_data[i].wrapping_add(predicted);
        }
        result.extend_from_slice(&current_row);
        std::mem::swap(&mut prev_row, &mut current_row);
    }
    result
}

const fn paeth_predictor(left: u8, above: u8, upper_left: u8) -> u8 {
    let a = left as i32;
    let b = above as i32;
    let c = upper_left as i32;
    let p = a + b - c;
    let pa = (p - a).abs();
    let pb = (p - b).abs();
    let pc = (p - c).abs();

    if pa <= pb && pa <= pc {
        left
    } else if pb <= pc {
        above
    } else {
        upper_left
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(columns: usize) -> PredictorParams {
        PredictorParams {
            predictor: 12,
            columns,
            colors: 1,
            bits_per_component: 8,
        }
    }

    #[test]
    fn test_up_filter_accumulates_rows() {
        // Two xref-stream rows of width 3, second row stored as a delta
        let data = [2, 1, 0, 10, 2, 0, 0, 5];
        assert_eq!(apply_png_predictor(&data, params(3)), vec![1, 0, 10, 1, 0, 15]);
    }

    #[test]
    fn test_sub_filter_uses_left_byte() {
        let data = [1, 5, 1, 1];
        assert_eq!(apply_png_predictor(&data, params(3)), vec![5, 6, 7]);
    }

    #[test]
    fn test_no_png_predictor_is_identity() {
        let mut p = params(3);
        p.predictor = 1;
        assert_eq!(apply_png_predictor(&[9, 9], p), vec![9, 9]);
    }
}
