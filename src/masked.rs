//! Masked volume codec
//!
//! Maps between full 3D volumes and the compact 1D representation holding only
//! the voxels selected by an anatomical mask. Both directions walk the volume in
//! logical row-major order, so `rebuild(flatten(v, m), m)` reproduces `v`
//! bit-for-bit inside the mask.

use crate::error::{Result, StatsError};
use ndarray::Array3;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::ops::Index;

/// Fingerprint of the mask a vector was flattened with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MaskId(u64);

/// Immutable boolean volume selecting the voxels under analysis
#[derive(Debug, Clone)]
pub struct Mask {
    voxels: Array3<bool>,
    count: usize,
    id: MaskId,
}

impl Mask {
    pub fn new(voxels: Array3<bool>) -> Self {
        let count = voxels.iter().filter(|&&v| v).count();

        let mut hasher = DefaultHasher::new();
        voxels.dim().hash(&mut hasher);
        for &v in voxels.iter() {
            v.hash(&mut hasher);
        }
        let id = MaskId(hasher.finish());

        Self { voxels, count, id }
    }

    /// Build a mask from a label/intensity volume: every non-zero voxel is in
    pub fn from_volume(volume: &Array3<f32>) -> Self {
        Self::new(volume.mapv(|v| v != 0.0))
    }

    /// Mask selecting every voxel of the given shape
    pub fn all_true(shape: (usize, usize, usize)) -> Self {
        Self::new(Array3::from_elem(shape, true))
    }

    pub fn shape(&self) -> (usize, usize, usize) {
        self.voxels.dim()
    }

    /// Number of voxels inside the mask (N)
    pub fn count(&self) -> usize {
        self.count
    }

    pub fn id(&self) -> MaskId {
        self.id
    }

    pub fn voxels(&self) -> &Array3<bool> {
        &self.voxels
    }

    /// Coordinates of the masked-in voxels, in flatten order
    pub fn coordinates(&self) -> Vec<(usize, usize, usize)> {
        self.voxels
            .indexed_iter()
            .filter_map(|(idx, &inside)| inside.then_some(idx))
            .collect()
    }
}

/// One value per masked-in voxel, in flatten order
#[derive(Debug, Clone, PartialEq)]
pub struct MaskedVector {
    values: Vec<f32>,
    mask_id: MaskId,
}

impl MaskedVector {
    /// Wrap values that are already aligned with the mask identified by `mask_id`
    pub fn new(values: Vec<f32>, mask_id: MaskId) -> Self {
        Self { values, mask_id }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn mask_id(&self) -> MaskId {
        self.mask_id
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.values
    }

    pub fn into_values(self) -> Vec<f32> {
        self.values
    }

    pub fn iter(&self) -> std::slice::Iter<'_, f32> {
        self.values.iter()
    }

    /// Element-wise transformation producing a new vector over the same mask
    pub fn map<F: FnMut(f32) -> f32>(&self, f: F) -> Self {
        Self {
            values: self.values.iter().copied().map(f).collect(),
            mask_id: self.mask_id,
        }
    }

    /// Fail unless `other` is positionally aligned with `self`
    pub fn ensure_aligned(&self, other: &MaskedVector) -> Result<()> {
        if self.len() != other.len() {
            return Err(StatsError::LengthMismatch {
                expected: self.len(),
                actual: other.len(),
            });
        }
        if self.mask_id != other.mask_id {
            return Err(StatsError::MaskMismatch);
        }
        Ok(())
    }
}

impl Index<usize> for MaskedVector {
    type Output = f32;

    fn index(&self, index: usize) -> &f32 {
        &self.values[index]
    }
}

/// Select the voxels of `volume` where `mask` is true
pub fn flatten(volume: &Array3<f32>, mask: &Mask) -> Result<MaskedVector> {
    if volume.dim() != mask.shape() {
        return Err(StatsError::ShapeMismatch {
            volume: volume.dim(),
            mask: mask.shape(),
        });
    }

    let values = volume
        .iter()
        .zip(mask.voxels.iter())
        .filter_map(|(&value, &inside)| inside.then_some(value))
        .collect();

    Ok(MaskedVector::new(values, mask.id()))
}

/// Scatter `vector` back into a full volume of the mask's shape
///
/// Voxels outside the mask receive `fill`.
pub fn rebuild(vector: &MaskedVector, mask: &Mask, fill: f32) -> Result<Array3<f32>> {
    if vector.len() != mask.count() {
        return Err(StatsError::LengthMismatch {
            expected: mask.count(),
            actual: vector.len(),
        });
    }
    if vector.mask_id() != mask.id() {
        return Err(StatsError::MaskMismatch);
    }

    let mut output = Array3::from_elem(mask.shape(), fill);
    let mut values = vector.iter();
    for (out, &inside) in output.iter_mut().zip(mask.voxels.iter()) {
        if inside {
            // Length was checked above, so the iterator cannot run dry
            if let Some(&value) = values.next() {
                *out = value;
            }
        }
    }

    Ok(output)
}

/// A single specimen's flattened data
#[derive(Debug, Clone)]
pub struct Specimen {
    pub id: String,
    pub data: MaskedVector,
}

impl Specimen {
    pub fn new(id: impl Into<String>, data: MaskedVector) -> Self {
        Self {
            id: id.into(),
            data,
        }
    }
}

/// Ordered specimens of one experimental group, all flattened with the same mask
#[derive(Debug, Clone)]
pub struct Population {
    name: String,
    specimens: Vec<Specimen>,
    voxels: usize,
    mask_id: MaskId,
}

impl Population {
    pub fn new(name: impl Into<String>, specimens: Vec<Specimen>) -> Result<Self> {
        let name = name.into();
        let first = specimens
            .first()
            .ok_or_else(|| StatsError::EmptyPopulation {
                group: name.clone(),
            })?;
        let voxels = first.data.len();
        let mask_id = first.data.mask_id();

        for specimen in &specimens[1..] {
            if specimen.data.len() != voxels {
                return Err(StatsError::LengthMismatch {
                    expected: voxels,
                    actual: specimen.data.len(),
                });
            }
            if specimen.data.mask_id() != mask_id {
                return Err(StatsError::MaskMismatch);
            }
        }

        Ok(Self {
            name,
            specimens,
            voxels,
            mask_id,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of specimens
    pub fn len(&self) -> usize {
        self.specimens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.specimens.is_empty()
    }

    /// Number of voxels per specimen (N)
    pub fn voxel_count(&self) -> usize {
        self.voxels
    }

    pub fn mask_id(&self) -> MaskId {
        self.mask_id
    }

    pub fn specimens(&self) -> &[Specimen] {
        &self.specimens
    }

    pub fn ids(&self) -> Vec<&str> {
        self.specimens.iter().map(|s| s.id.as_str()).collect()
    }

    /// Copy the values of every specimen at `voxel` into `buf`
    pub fn column_into(&self, voxel: usize, buf: &mut Vec<f64>) {
        buf.clear();
        buf.extend(self.specimens.iter().map(|s| s.data[voxel] as f64));
    }

    /// Fail unless `other` was flattened with the same mask
    pub fn ensure_compatible(&self, other: &Population) -> Result<()> {
        if self.voxels != other.voxels {
            return Err(StatsError::LengthMismatch {
                expected: self.voxels,
                actual: other.voxels,
            });
        }
        if self.mask_id != other.mask_id {
            return Err(StatsError::MaskMismatch);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array3;

    fn checker_mask() -> Mask {
        Mask::new(Array3::from_shape_fn((2, 3, 4), |(z, y, x)| (z + y + x) % 2 == 0))
    }

    #[test]
    fn test_flatten_selects_mask_voxels_in_row_major_order() {
        let volume = Array3::from_shape_fn((2, 3, 4), |(z, y, x)| (z * 100 + y * 10 + x) as f32);
        let mask = checker_mask();
        let flat = flatten(&volume, &mask).unwrap();

        assert_eq!(flat.len(), mask.count());
        assert_eq!(flat.len(), 12);
        assert_eq!(&flat.as_slice()[..4], &[0.0, 2.0, 11.0, 13.0]);
    }

    #[test]
    fn test_rebuild_fills_outside_mask() {
        let volume = Array3::from_elem((2, 3, 4), 7.5f32);
        let mask = checker_mask();
        let flat = flatten(&volume, &mask).unwrap();
        let rebuilt = rebuild(&flat, &mask, -1.0).unwrap();

        for ((z, y, x), &v) in rebuilt.indexed_iter() {
            if (z + y + x) % 2 == 0 {
                assert_eq!(v, 7.5);
            } else {
                assert_eq!(v, -1.0);
            }
        }
    }

    #[test]
    fn test_flatten_shape_mismatch() {
        let volume = Array3::<f32>::zeros((2, 3, 5));
        let err = flatten(&volume, &checker_mask()).unwrap_err();
        assert!(matches!(err, StatsError::ShapeMismatch { .. }));
    }

    #[test]
    fn test_rebuild_length_mismatch() {
        let mask = checker_mask();
        let vector = MaskedVector::new(vec![1.0; 5], mask.id());
        let err = rebuild(&vector, &mask, 0.0).unwrap_err();
        assert!(matches!(
            err,
            StatsError::LengthMismatch {
                expected: 12,
                actual: 5
            }
        ));
    }

    #[test]
    fn test_rebuild_rejects_foreign_mask() {
        let mask = checker_mask();
        let other = Mask::all_true((1, 1, 12));
        let vector = flatten(&Array3::zeros((1, 1, 12)), &other).unwrap();
        assert!(matches!(
            rebuild(&vector, &mask, 0.0),
            Err(StatsError::MaskMismatch)
        ));
    }

    #[test]
    fn test_identical_masks_share_id() {
        assert_eq!(checker_mask().id(), checker_mask().id());
        assert_ne!(checker_mask().id(), Mask::all_true((2, 3, 4)).id());
    }

    #[test]
    fn test_coordinates_follow_flatten_order() {
        let mask = checker_mask();
        let coords = mask.coordinates();
        assert_eq!(coords.len(), mask.count());
        assert_eq!(coords[0], (0, 0, 0));
        assert_eq!(coords[2], (0, 1, 1));
    }

    #[test]
    fn test_population_rejects_unequal_lengths() {
        let mask = checker_mask();
        let a = Specimen::new("a", MaskedVector::new(vec![0.0; 12], mask.id()));
        let b = Specimen::new("b", MaskedVector::new(vec![0.0; 11], mask.id()));
        assert!(Population::new("wt", vec![a, b]).is_err());
    }

    #[test]
    fn test_population_rejects_empty() {
        let err = Population::new("mutant", vec![]).unwrap_err();
        assert!(matches!(err, StatsError::EmptyPopulation { .. }));
    }

    #[test]
    fn test_population_column() {
        let mask = Mask::all_true((1, 1, 2));
        let pop = Population::new(
            "wt",
            vec![
                Specimen::new("a", MaskedVector::new(vec![1.0, 2.0], mask.id())),
                Specimen::new("b", MaskedVector::new(vec![3.0, 4.0], mask.id())),
            ],
        )
        .unwrap();

        let mut col = Vec::new();
        pop.column_into(1, &mut col);
        assert_eq!(col, vec![2.0, 4.0]);
        assert_eq!(pop.ids(), vec!["a", "b"]);
    }
}
