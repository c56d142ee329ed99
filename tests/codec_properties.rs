//! Property and vector tests for the mask exchange codec

use ndarray::Array2;
use proptest::prelude::*;
use segany::codec::{decode_binary, decode_text, encode_binary, encode_text, packed_len, HEADER_LEN};
use segany::{read_mask, write_mask, Mask, MaskFormat, SegmentError};
use tempfile::TempDir;

fn arb_mask() -> impl Strategy<Value = Mask> {
    (1usize..=200, 1usize..=200).prop_flat_map(|(rows, cols)| {
        proptest::collection::vec(any::<bool>(), rows * cols).prop_map(move |cells| {
            Mask::new(Array2::from_shape_vec((rows, cols), cells).unwrap()).unwrap()
        })
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn binary_preserves_every_cell(mask in arb_mask()) {
        let bytes = encode_binary(&mask).unwrap();
        prop_assert_eq!(bytes.len(), HEADER_LEN + packed_len(mask.rows(), mask.cols()));
        prop_assert_eq!(decode_binary(&bytes).unwrap(), mask);
    }

    #[test]
    fn binary_padding_bits_are_zero(mask in arb_mask()) {
        let bytes = encode_binary(&mask).unwrap();
        let used = (mask.rows() * mask.cols()) % 8;
        if used != 0 {
            let last = *bytes.last().unwrap();
            prop_assert_eq!(last >> used, 0);
        }
    }

    #[test]
    fn text_preserves_every_cell(mask in arb_mask()) {
        let text = encode_text(&mask);
        prop_assert_eq!(text.lines().count(), mask.rows());
        prop_assert_eq!(decode_text(&text).unwrap(), mask);
    }
}

#[test]
fn header_is_big_endian_rows_then_cols() {
    let mask = Mask::empty(3, 258).unwrap();
    let bytes = encode_binary(&mask).unwrap();
    assert_eq!(&bytes[..HEADER_LEN], &[0, 0, 0, 3, 0, 0, 1, 2]);
}

#[test]
fn bits_pack_lsb_first_row_major() {
    // 2x5: row 0 = 1,0,0,0,0  row 1 = 0,0,1,0,1
    let mask = Mask::from_rows(&[
        vec![true, false, false, false, false],
        vec![false, false, true, false, true],
    ])
    .unwrap();
    let bytes = encode_binary(&mask).unwrap();
    // flat indices 0, 7, 9 -> byte0 = 0b1000_0001, byte1 = 0b0000_0010
    assert_eq!(&bytes[HEADER_LEN..], &[0b1000_0001, 0b0000_0010]);
}

#[test]
fn truncated_or_empty_buffers_are_corrupt() {
    assert!(matches!(decode_binary(&[0, 0, 0]), Err(SegmentError::CorruptData(_))));
    assert!(matches!(
        decode_binary(&[0, 0, 0, 4, 0, 0, 0, 4, 0xFF]),
        Err(SegmentError::CorruptData(_))
    ));
    assert!(matches!(
        decode_binary(&[0, 0, 0, 0, 0, 0, 0, 4]),
        Err(SegmentError::CorruptData(_))
    ));
    assert!(matches!(decode_text("01\n0\n"), Err(SegmentError::CorruptData(_))));
    assert!(matches!(decode_text("0x\n"), Err(SegmentError::CorruptData(_))));
}

#[test]
fn files_round_trip_in_both_formats() {
    let dir = TempDir::new().unwrap();
    let mask = Mask::from_rows(&[vec![true, false, true], vec![false, true, false]]).unwrap();

    for format in [MaskFormat::Binary, MaskFormat::Text] {
        let path = dir.path().join(format!("mask_{}.seg", format.as_flag()));
        write_mask(&path, &mask, format).unwrap();
        assert_eq!(read_mask(&path, format).unwrap(), mask);
    }

    let text = std::fs::read_to_string(dir.path().join("mask_False.seg")).unwrap();
    assert_eq!(text, "101\n010\n");
}
