//! Matrix stack (§4.4 "Matrix stack").
//!
//! Grounded directly in `CLegacy3D::InitMatrixStack`/`MultMatrix`: the
//! hardware stores vectors in Z,X,Y order with Y/Z flipped relative to
//! view space, so a fixed conversion matrix undoes that before any
//! scene matrix is applied.

use glam::{Mat4, Vec3, Vec4};

/// Undoes the hardware's Z,X,Y vector order and flips Y,Z into
/// view-space (-Y,-Z).
fn conversion_matrix() -> Mat4 {
    Mat4::from_cols(
        Vec4::new(0.0, 0.0, -1.0, 0.0),
        Vec4::new(1.0, 0.0, 0.0, 0.0),
        Vec4::new(0.0, -1.0, 0.0, 0.0),
        Vec4::new(0.0, 0.0, 0.0, 1.0),
    )
}

pub struct MatrixStack {
    stack: Vec<Mat4>,
}

impl MatrixStack {
    pub fn new() -> Self {
        Self {
            stack: vec![Mat4::IDENTITY],
        }
    }

    pub fn top(&self) -> Mat4 {
        *self.stack.last().expect("matrix stack is never empty")
    }

    pub fn push(&mut self) {
        let top = self.top();
        self.stack.push(top);
    }

    pub fn pop(&mut self) {
        if self.stack.len() > 1 {
            self.stack.pop();
        }
    }

    pub fn depth(&self) -> usize {
        self.stack.len()
    }

    /// Reset to the base coordinate-system matrix: the fixed
    /// conversion matrix, scaled by `coord_scale` (1/2048 for stepping
    /// 1.0, 1.0 otherwise), then post-multiplied by matrix #0.
    pub fn load_base(&mut self, matrix_base: &[f32], coord_scale: f32) {
        let base = if coord_scale != 1.0 {
            Mat4::from_scale(Vec3::splat(coord_scale)) * conversion_matrix()
        } else {
            conversion_matrix()
        };
        self.stack.clear();
        self.stack.push(base);
        self.mult_matrix(matrix_base, 0);
    }

    /// Post-multiply the top of stack by matrix `index`: 12 floats at
    /// `matrix_base[index*12..]`, laid out as translation xyz then the
    /// 3x3 rotation row-major. Indices whose base is out of range are
    /// skipped (no-op), matching the original's null-pointer guard.
    pub fn mult_matrix(&mut self, matrix_base: &[f32], index: u32) {
        let offset = index as usize * 12;
        let Some(src) = matrix_base.get(offset..offset + 12) else {
            return;
        };
        let m = Mat4::from_cols(
            Vec4::new(src[3], src[6], src[9], 0.0),
            Vec4::new(src[4], src[7], src[10], 0.0),
            Vec4::new(src[5], src[8], src[11], 0.0),
            Vec4::new(src[0], src[1], src[2], 1.0),
        );
        let top = self.top();
        *self.stack.last_mut().unwrap() = top * m;
    }

    /// Post-multiply the top of stack by a pure translation, used for
    /// nodes that carry a raw (x, y, z) triple instead of a matrix
    /// index.
    pub fn translate(&mut self, x: f32, y: f32, z: f32) {
        let top = self.top();
        *self.stack.last_mut().unwrap() = top * Mat4::from_translation(Vec3::new(x, y, z));
    }

    /// "Weird matrix" safeguard: reject the viewport if matrix #0's
    /// three diagonal-like rotation entries fall outside [0.95, 1.05],
    /// which signals uninitialised scene data rather than a real
    /// orientation.
    pub fn coordinate_matrix_is_sane(matrix_base: &[f32]) -> bool {
        let Some(src) = matrix_base.get(0..12) else {
            return false;
        };
        [src[3], src[7], src[11]]
            .iter()
            .all(|v| v.abs() >= 0.95 && v.abs() <= 1.05)
    }

    /// Sign of the coordinate matrix's `m13` entry, used to correct
    /// triangle winding during model decode.
    pub fn coord_matrix_m13_sign(matrix_base: &[f32]) -> f32 {
        let s = matrix_base.get(5).copied().unwrap_or(1.0);
        if s < 0.0 { -1.0 } else { 1.0 }
    }
}

impl Default for MatrixStack {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity_coord_matrix() -> Vec<f32> {
        // matrix #0: translation (0,0,0) then identity rotation rows
        vec![0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0]
    }

    #[test]
    fn load_base_with_identity_coord_matrix_is_the_conversion_matrix() {
        let mut stack = MatrixStack::new();
        stack.load_base(&identity_coord_matrix(), 1.0);
        assert_eq!(stack.top(), conversion_matrix());
    }

    #[test]
    fn push_pop_restores_prior_top() {
        let mut stack = MatrixStack::new();
        let before = stack.top();
        stack.push();
        stack.mult_matrix(&identity_coord_matrix(), 0);
        assert_ne!(stack.top(), before);
        stack.pop();
        assert_eq!(stack.top(), before);
    }

    #[test]
    fn pop_never_empties_stack() {
        let mut stack = MatrixStack::new();
        stack.pop();
        stack.pop();
        assert_eq!(stack.depth(), 1);
    }

    #[test]
    fn sane_identity_matrix_passes_weird_matrix_check() {
        assert!(MatrixStack::coordinate_matrix_is_sane(&identity_coord_matrix()));
    }

    #[test]
    fn zeroed_matrix_fails_weird_matrix_check() {
        assert!(!MatrixStack::coordinate_matrix_is_sane(&vec![0.0; 12]));
    }

    #[test]
    fn m13_sign_reflects_source_sign() {
        let mut m = identity_coord_matrix();
        m[5] = -1.0;
        assert_eq!(MatrixStack::coord_matrix_m13_sign(&m), -1.0);
        m[5] = 1.0;
        assert_eq!(MatrixStack::coord_matrix_m13_sign(&m), 1.0);
    }
}
