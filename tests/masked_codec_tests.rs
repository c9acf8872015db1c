//! Property tests for the masked volume codec
//!
//! rebuild(flatten(V, M), M) must reproduce V inside the mask and the fill
//! value outside it, for any shape and any mask.

use ndarray::Array3;
use phenostat::masked::{flatten, rebuild, Mask, MaskedVector};
use phenostat::StatsError;
use proptest::prelude::*;

fn volume_and_mask() -> impl Strategy<Value = (Array3<f32>, Array3<bool>)> {
    (1usize..6, 1usize..6, 1usize..6).prop_flat_map(|(x, y, z)| {
        let n = x * y * z;
        (
            prop::collection::vec(-1000.0f32..1000.0, n),
            prop::collection::vec(any::<bool>(), n),
        )
            .prop_map(move |(values, inside)| {
                (
                    Array3::from_shape_vec((x, y, z), values).unwrap(),
                    Array3::from_shape_vec((x, y, z), inside).unwrap(),
                )
            })
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    #[test]
    fn prop_round_trip_inside_mask((volume, inside) in volume_and_mask(), fill in -5.0f32..5.0) {
        let mask = Mask::new(inside.clone());
        let flat = flatten(&volume, &mask).unwrap();
        prop_assert_eq!(flat.len(), mask.count());

        let rebuilt = rebuild(&flat, &mask, fill).unwrap();
        for ((r, v), m) in rebuilt.iter().zip(volume.iter()).zip(inside.iter()) {
            if *m {
                prop_assert_eq!(r.to_bits(), v.to_bits());
            } else {
                prop_assert_eq!(*r, fill);
            }
        }
    }

    #[test]
    fn prop_flatten_follows_coordinates((volume, inside) in volume_and_mask()) {
        let mask = Mask::new(inside);
        let flat = flatten(&volume, &mask).unwrap();
        for (value, (x, y, z)) in flat.iter().zip(mask.coordinates()) {
            prop_assert_eq!(*value, volume[[x, y, z]]);
        }
    }
}

#[test]
fn test_all_true_mask_round_trip() {
    let volume = Array3::from_shape_fn((3, 2, 4), |(x, y, z)| (x * 8 + y * 4 + z) as f32);
    let mask = Mask::all_true((3, 2, 4));
    let flat = flatten(&volume, &mask).unwrap();
    assert_eq!(flat.len(), 24);
    assert_eq!(rebuild(&flat, &mask, -1.0).unwrap(), volume);
}

#[test]
fn test_all_false_mask_round_trip() {
    let volume = Array3::from_elem((2, 2, 2), 7.0f32);
    let mask = Mask::new(Array3::from_elem((2, 2, 2), false));
    let flat = flatten(&volume, &mask).unwrap();
    assert!(flat.is_empty());
    assert_eq!(rebuild(&flat, &mask, 0.0).unwrap(), Array3::<f32>::zeros((2, 2, 2)));
}

#[test]
fn test_shape_mismatch_is_rejected() {
    let mask = Mask::all_true((2, 2, 2));
    let err = flatten(&Array3::zeros((2, 2, 3)), &mask).unwrap_err();
    assert!(matches!(err, StatsError::ShapeMismatch { .. }));
}

#[test]
fn test_rebuild_rejects_foreign_vector() {
    let mask = Mask::all_true((1, 1, 2));
    let other = Mask::new(Array3::from_shape_vec((1, 2, 2), vec![true, false, false, true]).unwrap());
    let vector = MaskedVector::new(vec![1.0, 2.0], other.id());
    assert!(matches!(rebuild(&vector, &mask, 0.0), Err(StatsError::MaskMismatch)));

    let short = MaskedVector::new(vec![1.0], mask.id());
    assert!(matches!(
        rebuild(&short, &mask, 0.0),
        Err(StatsError::LengthMismatch { expected: 2, actual: 1 })
    ));
}
