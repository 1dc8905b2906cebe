//! Row-major matrix helpers
//!
//! The text formats lay matrices out row by row. glam stores columns, so all
//! conversions between the two go through here.

use glam::{DMat3, DMat4, DVec3};

/// Build a matrix from its rows
pub fn mat4_from_rows(rows: [[f64; 4]; 4]) -> DMat4 {
    DMat4::from_cols_array_2d(&rows).transpose()
}

/// Matrix rows, top to bottom
pub fn mat4_to_rows(m: &DMat4) -> [[f64; 4]; 4] {
    m.transpose().to_cols_array_2d()
}

/// Build a matrix from 16 floats in file order (row-major)
pub fn mat4_from_row_major(values: &[f64; 16]) -> DMat4 {
    DMat4::from_cols_array(values).transpose()
}

/// 16 floats in file order (row-major)
pub fn mat4_to_row_major(m: &DMat4) -> [f64; 16] {
    m.transpose().to_cols_array()
}

/// Upper-left 3x3 block of row `index`
pub fn row3(m: &DMat4, index: usize) -> DVec3 {
    m.row(index).truncate()
}

/// Build a 3x3 matrix from its rows
pub fn mat3_from_rows(r0: DVec3, r1: DVec3, r2: DVec3) -> DMat3 {
    DMat3::from_cols(r0, r1, r2).transpose()
}
