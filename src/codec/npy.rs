use std::path::Path;

use ndarray::Array2;
use ndarray_npy::{read_npy, write_npy};

use crate::core::error::{FieldmapError, FieldmapResult};
use crate::core::mask::LabelMask;

/// Reads a 2D label array. Any of `i32`, `i64`, `u32`, `u16`, `u8` or `bool`
/// element types is accepted; negative labels are rejected.
pub fn read_mask(path: &Path) -> FieldmapResult<LabelMask> {
    let wide: Array2<i64> = match read_npy::<_, Array2<i32>>(path) {
        Ok(array) => array.mapv(i64::from),
        Err(first) => read_npy::<_, Array2<i64>>(path)
            .or_else(|_| read_npy::<_, Array2<u32>>(path).map(|a| a.mapv(i64::from)))
            .or_else(|_| read_npy::<_, Array2<u16>>(path).map(|a| a.mapv(i64::from)))
            .or_else(|_| read_npy::<_, Array2<u8>>(path).map(|a| a.mapv(i64::from)))
            .or_else(|_| read_npy::<_, Array2<bool>>(path).map(|a| a.mapv(i64::from)))
            .map_err(|_| FieldmapError::input_format(path, first.to_string()))?,
    };

    let (rows, cols) = wide.dim();
    let (width, height) = match (u32::try_from(cols), u32::try_from(rows)) {
        (Ok(w), Ok(h)) => (w, h),
        _ => return Err(FieldmapError::input_format(path, "array is too large")),
    };

    // logical (row-major) order regardless of the on-disk memory layout
    let data = wide
        .iter()
        .map(|&v| u32::try_from(v))
        .collect::<Result<Vec<u32>, _>>()
        .map_err(|_| FieldmapError::input_format(path, "labels must be non-negative 32-bit integers"))?;

    LabelMask::from_raw(width, height, data)
        .ok_or_else(|| FieldmapError::input_format(path, "array shape does not match its data"))
}

/// Writes the mask as a `(height, width)` `i32` array.
pub fn write_mask(path: &Path, mask: &LabelMask) -> FieldmapResult<()> {
    let (width, height) = mask.dimensions();
    let data = mask
        .as_raw()
        .iter()
        .map(|&v| i32::try_from(v))
        .collect::<Result<Vec<i32>, _>>()
        .map_err(|_| FieldmapError::input_format(path, "label exceeds the i32 range"))?;
    let array = Array2::from_shape_vec((height as usize, width as usize), data)
        .map_err(|e| FieldmapError::input_format(path, e.to_string()))?;
    write_npy(path, &array).map_err(|e| FieldmapError::input_format(path, e.to_string()))
}
