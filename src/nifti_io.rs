//! NIfTI-1 volume I/O
//!
//! Reading goes through the `nifti` crate, with gzip detected from the magic
//! bytes. Arrays are indexed `[x, y, z]` as the crate returns them. Vector
//! fields (4D/5D, e.g. deformations) are reduced to per-voxel magnitude.
//!
//! Writing produces a single-file float32 NIfTI-1 image, gzip-compressed when
//! the path ends in `.gz`.

use crate::error::{Result, StatsError};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use nifti::volume::ndarray::IntoNdArray;
use nifti::{InMemNiftiObject, NiftiObject};
use ndarray::{Array3, ArrayD, Ix3};
use std::fs;
use std::io::{Cursor, Write};
use std::path::Path;

const HEADER_SIZE: usize = 348;
const VOX_OFFSET: usize = 352;
const DT_FLOAT32: i16 = 16;

/// A scalar volume with its voxel spacing in mm
#[derive(Debug, Clone, PartialEq)]
pub struct Volume {
    pub data: Array3<f32>,
    pub spacing: [f32; 3],
}

fn is_gzip(bytes: &[u8]) -> bool {
    bytes.len() >= 2 && bytes[0] == 0x1f && bytes[1] == 0x8b
}

/// Collapse trailing axes into a per-voxel Euclidean magnitude
fn magnitude(array: &ArrayD<f32>) -> Array3<f32> {
    let shape = array.shape();
    let mut out = Array3::<f32>::zeros((shape[0], shape[1], shape[2]));
    for (index, &v) in array.indexed_iter() {
        out[[index[0], index[1], index[2]]] += v * v;
    }
    out.mapv_inplace(f32::sqrt);
    out
}

/// Read a `.nii` or `.nii.gz` file as a scalar volume
pub fn read_volume(path: &Path) -> Result<Volume> {
    let bytes = fs::read(path)?;
    let object = if is_gzip(&bytes) {
        InMemNiftiObject::from_reader(GzDecoder::new(Cursor::new(bytes)))
    } else {
        InMemNiftiObject::from_reader(Cursor::new(bytes))
    }
    .map_err(|e| StatsError::volume(path, e.to_string()))?;

    let pixdim = object.header().pixdim;
    let spacing = [pixdim[1], pixdim[2], pixdim[3]];

    let array: ArrayD<f32> = object
        .into_volume()
        .into_ndarray()
        .map_err(|e| StatsError::volume(path, e.to_string()))?;

    let data = match array.ndim() {
        3 => array
            .into_dimensionality::<Ix3>()
            .map_err(|e| StatsError::volume(path, e.to_string()))?,
        4 | 5 => magnitude(&array),
        n => return Err(StatsError::volume(path, format!("unsupported {}D image", n))),
    };

    Ok(Volume { data, spacing })
}

/// Encode a float32 NIfTI-1 single-file image
pub fn encode(data: &Array3<f32>, spacing: [f32; 3]) -> Result<Vec<u8>> {
    let (nx, ny, nz) = data.dim();
    let dim_i16 = |n: usize| {
        i16::try_from(n).map_err(|_| StatsError::config(format!("dimension {} too large for NIfTI-1", n)))
    };

    let mut header = [0u8; HEADER_SIZE];
    header[0..4].copy_from_slice(&(HEADER_SIZE as i32).to_le_bytes());

    let dim = [3, dim_i16(nx)?, dim_i16(ny)?, dim_i16(nz)?, 1, 1, 1, 1];
    for (i, d) in dim.iter().enumerate() {
        header[40 + i * 2..42 + i * 2].copy_from_slice(&d.to_le_bytes());
    }
    header[70..72].copy_from_slice(&DT_FLOAT32.to_le_bytes());
    header[72..74].copy_from_slice(&32i16.to_le_bytes());

    let pixdim = [1.0f32, spacing[0], spacing[1], spacing[2], 1.0, 1.0, 1.0, 1.0];
    for (i, p) in pixdim.iter().enumerate() {
        header[76 + i * 4..80 + i * 4].copy_from_slice(&p.to_le_bytes());
    }
    header[108..112].copy_from_slice(&(VOX_OFFSET as f32).to_le_bytes());
    header[112..116].copy_from_slice(&1.0f32.to_le_bytes());

    // sform: scanner anatomy, axis-aligned with the voxel spacing
    header[254..256].copy_from_slice(&1i16.to_le_bytes());
    for (row, axis) in [280usize, 296, 312].iter().zip(0..3) {
        let mut srow = [0.0f32; 4];
        srow[axis] = spacing[axis];
        for (i, v) in srow.iter().enumerate() {
            header[row + i * 4..row + 4 + i * 4].copy_from_slice(&v.to_le_bytes());
        }
    }
    header[344..348].copy_from_slice(b"n+1\0");

    let mut buffer = Vec::with_capacity(VOX_OFFSET + data.len() * 4);
    buffer.extend_from_slice(&header);
    buffer.extend_from_slice(&[0u8; VOX_OFFSET - HEADER_SIZE]);

    // x varies fastest on disk
    for v in data.t().iter() {
        buffer.extend_from_slice(&v.to_le_bytes());
    }
    Ok(buffer)
}

/// Write `data` to `path`, gzip-compressed if the name ends in `.gz`
pub fn write_volume(path: &Path, data: &Array3<f32>, spacing: [f32; 3]) -> Result<()> {
    let bytes = encode(data, spacing)?;
    let compressed = path.extension().is_some_and(|ext| ext == "gz");

    if compressed {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&bytes)?;
        fs::write(path, encoder.finish()?)?;
    } else {
        fs::write(path, bytes)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sample() -> Array3<f32> {
        Array3::from_shape_fn((3, 4, 2), |(x, y, z)| (x * 100 + y * 10 + z) as f32 - 50.5)
    }

    #[test]
    fn test_write_read_compressed() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("stats.nii.gz");
        write_volume(&path, &sample(), [0.5, 0.5, 1.0]).unwrap();

        let bytes = fs::read(&path).unwrap();
        assert!(is_gzip(&bytes));

        let volume = read_volume(&path).unwrap();
        assert_eq!(volume.data, sample());
        assert_eq!(volume.spacing, [0.5, 0.5, 1.0]);
    }

    #[test]
    fn test_write_read_uncompressed() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("mask.nii");
        write_volume(&path, &sample(), [1.0, 1.0, 1.0]).unwrap();
        assert!(!is_gzip(&fs::read(&path).unwrap()));
        assert_eq!(read_volume(&path).unwrap().data, sample());
    }

    #[test]
    fn test_encode_layout() {
        let bytes = encode(&sample(), [1.0, 2.0, 3.0]).unwrap();
        assert_eq!(bytes.len(), VOX_OFFSET + 24 * 4);
        assert_eq!(&bytes[344..348], b"n+1\0");
        // First two voxels on disk are x = 0 and x = 1
        let first = f32::from_le_bytes([bytes[352], bytes[353], bytes[354], bytes[355]]);
        let second = f32::from_le_bytes([bytes[356], bytes[357], bytes[358], bytes[359]]);
        assert_eq!(first, -50.5);
        assert_eq!(second, 49.5);
    }

    #[test]
    fn test_magnitude_of_vector_field() {
        let field = ArrayD::from_shape_fn(vec![2, 1, 1, 1, 3], |i| {
            let component = [3.0, 4.0, 0.0][i[4]];
            component * (i[0] + 1) as f32
        });
        let mag = magnitude(&field);
        assert_eq!(mag[[0, 0, 0]], 5.0);
        assert_eq!(mag[[1, 0, 0]], 10.0);
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let err = read_volume(Path::new("/nonexistent/volume.nii.gz")).unwrap_err();
        assert!(matches!(err, StatsError::Io(_)));
    }

    #[test]
    fn test_garbage_is_volume_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bad.nii");
        fs::write(&path, b"not a nifti file").unwrap();
        assert!(matches!(read_volume(&path), Err(StatsError::Volume { .. })));
    }
}
