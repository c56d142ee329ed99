//! Mask exchange codec
//!
//! Binary layout, all integers big-endian:
//!
//! ```text
//! offset 0..3  : rows (u32)
//! offset 4..7  : cols (u32)
//! offset 8..   : ceil(rows*cols/8) bytes, row-major, LSB-first,
//!                bit = flat index mod 8, unused high bits zero
//! ```
//!
//! The text layout is one line per row of ASCII `0`/`1`, newline terminated.

use crate::error::{Result, SegmentError};
use crate::types::Mask;
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

/// Size of the row/column header in bytes
pub const HEADER_LEN: usize = 8;

/// On-disk mask representation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum MaskFormat {
    #[default]
    Binary,
    Text,
}

impl MaskFormat {
    /// Map the command-line flag: literal `True` selects binary, anything else text
    #[must_use]
    pub fn from_flag(flag: &str) -> Self {
        if flag == "True" {
            Self::Binary
        } else {
            Self::Text
        }
    }

    #[must_use]
    pub fn as_flag(self) -> &'static str {
        match self {
            Self::Binary => "True",
            Self::Text => "False",
        }
    }

    /// Serialize a mask in this format
    pub fn encode(self, mask: &Mask) -> Result<Vec<u8>> {
        match self {
            Self::Binary => encode_binary(mask),
            Self::Text => Ok(encode_text(mask).into_bytes()),
        }
    }

    /// Deserialize a mask written in this format
    pub fn decode(self, bytes: &[u8]) -> Result<Mask> {
        match self {
            Self::Binary => decode_binary(bytes),
            Self::Text => {
                let text = std::str::from_utf8(bytes)
                    .map_err(|e| SegmentError::corrupt_data(format!("text mask is not UTF-8: {e}")))?;
                decode_text(text)
            },
        }
    }
}

/// Number of payload bytes for a `rows x cols` grid
#[must_use]
pub fn packed_len(rows: usize, cols: usize) -> usize {
    (rows * cols).div_ceil(8)
}

/// Encode a mask into the bit-packed binary layout
pub fn encode_binary(mask: &Mask) -> Result<Vec<u8>> {
    let rows = u32::try_from(mask.rows())
        .map_err(|_| SegmentError::invalid_input(format!("too many rows: {}", mask.rows())))?;
    let cols = u32::try_from(mask.cols())
        .map_err(|_| SegmentError::invalid_input(format!("too many columns: {}", mask.cols())))?;

    let mut out = Vec::with_capacity(HEADER_LEN + packed_len(mask.rows(), mask.cols()));
    out.write_u32::<BigEndian>(rows)?;
    out.write_u32::<BigEndian>(cols)?;

    let mut current = 0u8;
    let mut bit = 0u8;
    // Array2 iteration is row-major for standard layout
    for &value in mask.as_array() {
        if value {
            current |= 1 << bit;
        }
        bit += 1;
        if bit == 8 {
            out.push(current);
            current = 0;
            bit = 0;
        }
    }
    if bit > 0 {
        out.push(current);
    }

    Ok(out)
}

/// Decode the bit-packed binary layout
pub fn decode_binary(bytes: &[u8]) -> Result<Mask> {
    let mut header = bytes.get(..HEADER_LEN).ok_or_else(|| {
        SegmentError::corrupt_data(format!(
            "mask buffer has {} bytes, header needs {}",
            bytes.len(),
            HEADER_LEN
        ))
    })?;
    let rows = header.read_u32::<BigEndian>()? as usize;
    let cols = header.read_u32::<BigEndian>()? as usize;

    if rows == 0 || cols == 0 {
        return Err(SegmentError::corrupt_data(format!(
            "mask header declares an empty grid ({rows}x{cols})"
        )));
    }
    let cells = rows
        .checked_mul(cols)
        .ok_or_else(|| SegmentError::corrupt_data(format!("mask header overflows: {rows}x{cols}")))?;

    let needed = cells.div_ceil(8);
    let payload = bytes
        .get(HEADER_LEN..HEADER_LEN + needed)
        .ok_or_else(|| {
            SegmentError::corrupt_data(format!(
                "mask buffer truncated: {rows}x{cols} needs {} bytes, got {}",
                HEADER_LEN + needed,
                bytes.len()
            ))
        })?;

    let flat: Vec<bool> = (0..cells)
        .map(|index| {
            payload
                .get(index / 8)
                .is_some_and(|byte| (byte >> (index % 8)) & 1 == 1)
        })
        .collect();

    let data = Array2::from_shape_vec((rows, cols), flat)
        .map_err(|e| SegmentError::corrupt_data(format!("mask shape error: {e}")))?;
    Mask::new(data)
}

/// Encode a mask as `0`/`1` text lines
#[must_use]
pub fn encode_text(mask: &Mask) -> String {
    let mut out = String::with_capacity(mask.rows() * (mask.cols() + 1));
    for row in mask.as_array().rows() {
        out.extend(row.iter().map(|&v| if v { '1' } else { '0' }));
        out.push('\n');
    }
    out
}

/// Decode `0`/`1` text lines
///
/// Line terminators are not part of the row, so a row of `n` characters
/// decodes to exactly `n` columns.
pub fn decode_text(text: &str) -> Result<Mask> {
    let mut rows: Vec<Vec<bool>> = Vec::new();
    for (line_no, line) in text.lines().enumerate() {
        let row = line
            .chars()
            .map(|c| match c {
                '1' => Ok(true),
                '0' => Ok(false),
                other => Err(SegmentError::corrupt_data(format!(
                    "unexpected character {:?} on line {}",
                    other,
                    line_no + 1
                ))),
            })
            .collect::<Result<Vec<bool>>>()?;
        rows.push(row);
    }

    Mask::from_rows(&rows).map_err(|e| match e {
        SegmentError::InvalidInput(msg) => SegmentError::corrupt_data(msg),
        other => other,
    })
}

/// Write a mask file in the given format
pub fn write_mask<P: AsRef<Path>>(path: P, mask: &Mask, format: MaskFormat) -> Result<()> {
    let path = path.as_ref();
    let bytes = format.encode(mask)?;
    let file = File::create(path).map_err(|e| SegmentError::file_io_error("create mask file", path, e))?;
    let mut writer = BufWriter::new(file);
    writer
        .write_all(&bytes)
        .and_then(|()| writer.flush())
        .map_err(|e| SegmentError::file_io_error("write mask file", path, e))?;
    tracing::trace!(path = %path.display(), rows = mask.rows(), cols = mask.cols(), "mask written");
    Ok(())
}

/// Read a mask file in the given format
pub fn read_mask<P: AsRef<Path>>(path: P, format: MaskFormat) -> Result<Mask> {
    let path = path.as_ref();
    let file = File::open(path).map_err(|e| SegmentError::file_io_error("open mask file", path, e))?;
    let mut bytes = Vec::new();
    BufReader::new(file)
        .read_to_end(&mut bytes)
        .map_err(|e| SegmentError::file_io_error("read mask file", path, e))?;
    format.decode(&bytes).map_err(|e| match e {
        SegmentError::CorruptData(msg) => {
            SegmentError::corrupt_data(format!("{}: {}", path.display(), msg))
        },
        other => other,
    })
}
