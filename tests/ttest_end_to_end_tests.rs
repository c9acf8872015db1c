//! End-to-end t-test scenario: 5 wild-type and 5 mutant specimens over 100
//! voxels, one voxel carrying a large consistent shift

use ndarray::Array3;
use phenostat::assemble::ResultAssembler;
use phenostat::masked::{Mask, MaskedVector, Population, Specimen};
use phenostat::stats::{StatisticalTest, TwoSampleTTest};

const VOXELS: usize = 100;
const SHIFTED: usize = 42;

/// 4 x 5 x 6 volume whose first 100 voxels (row-major) are masked in
fn mask() -> Mask {
    let mut index = 0;
    Mask::new(Array3::from_shape_fn((4, 5, 6), |_| {
        index += 1;
        index <= VOXELS
    }))
}

fn noise(voxel: usize, specimen: usize) -> f32 {
    ((voxel * 7 + specimen * 13) as f32).sin()
}

fn populations(mask: &Mask) -> (Population, Population) {
    let wildtype: Vec<Specimen> = (0..5)
        .map(|s| {
            let values = (0..VOXELS).map(|v| 10.0 + noise(v, s)).collect();
            Specimen::new(format!("wt{}", s), MaskedVector::new(values, mask.id()))
        })
        .collect();

    // Null voxels reuse the wild-type values in reverse specimen order, so
    // their group means are identical.
    let mutant: Vec<Specimen> = (0..5)
        .map(|s| {
            let values = (0..VOXELS)
                .map(|v| {
                    let base = 10.0 + noise(v, 4 - s);
                    if v == SHIFTED {
                        base + 10.0
                    } else {
                        base
                    }
                })
                .collect();
            Specimen::new(format!("mut{}", s), MaskedVector::new(values, mask.id()))
        })
        .collect();

    (
        Population::new("wildtype", wildtype).unwrap(),
        Population::new("mutant", mutant).unwrap(),
    )
}

#[test]
fn test_single_shifted_voxel_is_the_only_discovery() {
    let mask = mask();
    assert_eq!(mask.count(), VOXELS);
    let (wildtype, mutant) = populations(&mask);

    let result = TwoSampleTTest::default().run(&wildtype, &mutant).unwrap();
    assert_eq!(result.len(), VOXELS);

    for (voxel, &q) in result.qvalues().iter().enumerate() {
        if voxel == SHIFTED {
            assert!(q <= 0.05, "shifted voxel q = {}", q);
        } else {
            assert!(q > 0.05, "voxel {} q = {}", voxel, q);
        }
    }
    assert!(result.tstats()[SHIFTED] > 0.0);
}

#[test]
fn test_assembled_volume_is_nonzero_only_at_shifted_voxel() {
    let mask = mask();
    let (wildtype, mutant) = populations(&mask);
    let result = TwoSampleTTest::default().run(&wildtype, &mutant).unwrap();

    let volume = ResultAssembler::new(0.05, 50.0).assemble(&result, &mask).unwrap();
    assert_eq!(volume.dim(), (4, 5, 6));

    let (x, y, z) = mask.coordinates()[SHIFTED];
    for ((i, j, k), &value) in volume.indexed_iter() {
        if (i, j, k) == (x, y, z) {
            assert!(value > 0.0 && value <= 50.0, "value = {}", value);
        } else {
            assert_eq!(value, 0.0, "voxel ({}, {}, {})", i, j, k);
        }
    }
}

#[test]
fn test_swapping_groups_flips_sign() {
    let mask = mask();
    let (wildtype, mutant) = populations(&mask);
    let test = TwoSampleTTest::default();

    let forward = test.run(&wildtype, &mutant).unwrap();
    let backward = test.run(&mutant, &wildtype).unwrap();
    assert_eq!(forward.tstats()[SHIFTED], -backward.tstats()[SHIFTED]);
    assert_eq!(forward.pvalues().as_slice(), backward.pvalues().as_slice());
}
