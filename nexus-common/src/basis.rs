//! Bone basis conversion
//!
//! Host edit bones are armature-space matrices (column vectors, Y along the
//! bone). The interchange formats store a parent-relative position plus an
//! x,y,z,w quaternion, and an inverse world matrix, in a basis rotated 90
//! degrees about Z with two axes swapped.
//!
//! Import accumulates a row-vector rotation down the hierarchy
//! ([`BoneFrame`]); export undoes it. The permutation matrices below are
//! fixed by the formats and must not be re-derived.

use glam::{DMat3, DMat4, DQuat, DVec3, DVec4};

use crate::math::{mat3_from_rows, mat4_from_rows};

/// Edit-bone length used for imported bones
pub const BONE_LENGTH: f64 = 3.0;

/// Axis permutation applied to a transposed bone matrix on export
pub const PERMUTE_ROWS: [[f64; 4]; 4] = [
    [0.0, 0.0, -1.0, 0.0],
    [0.0, 1.0, 0.0, 0.0],
    [1.0, 0.0, 0.0, 0.0],
    [0.0, 0.0, 0.0, 1.0],
];

/// Transposed +90 degree rotation about Z
pub const Z90_TRANSPOSED_ROWS: [[f64; 4]; 4] = [
    [0.0, 1.0, 0.0, 0.0],
    [-1.0, 0.0, 0.0, 0.0],
    [0.0, 0.0, 1.0, 0.0],
    [0.0, 0.0, 0.0, 1.0],
];

/// Column swap applied to the inverted permuted matrix
pub const INVERSE_SWAP_ROWS: [[f64; 4]; 4] = [
    [0.0, -1.0, 0.0, 0.0],
    [1.0, 0.0, 0.0, 0.0],
    [0.0, 0.0, 1.0, 0.0],
    [0.0, 0.0, 0.0, 1.0],
];

/// Accumulated orientation of a bone in the file basis
///
/// `rotation` is applied to row vectors; `head` is the armature-space origin.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoneFrame {
    pub rotation: DMat3,
    pub head: DVec3,
}

impl BoneFrame {
    /// Compose a file-local position/rotation under an optional parent
    pub fn from_local(position: DVec3, rotation: DQuat, parent: Option<&BoneFrame>) -> Self {
        let local = DMat3::from_quat(rotation).transpose();
        match parent {
            Some(parent) => Self {
                // row vector `position @ parent.rotation`
                head: parent.rotation.transpose() * position + parent.head,
                rotation: local * parent.rotation,
            },
            None => Self {
                rotation: local,
                head: position,
            },
        }
    }

    /// Host edit-bone matrix, including the -90 degree roll fix
    pub fn edit_matrix(&self) -> DMat4 {
        let r = &self.rotation;
        DMat4::from_cols(
            r.row(2).extend(0.0),
            r.row(0).extend(0.0),
            r.row(1).extend(0.0),
            self.head.extend(1.0),
        )
    }

    /// Recover the frame from a host edit-bone matrix
    pub fn from_edit_matrix(matrix: &DMat4) -> Self {
        Self {
            rotation: mat3_from_rows(
                matrix.y_axis.truncate(),
                matrix.z_axis.truncate(),
                matrix.x_axis.truncate(),
            ),
            head: matrix.w_axis.truncate(),
        }
    }

    /// Tail of an edit bone of `length` along the bone's Y axis
    pub fn tail(&self, length: f64) -> DVec3 {
        self.head + self.rotation.row(0) * length
    }
}

/// Armature-space bone matrix in the file basis (row-vector layout)
fn permuted_world(bone: &DMat4) -> DMat4 {
    mat4_from_rows(Z90_TRANSPOSED_ROWS) * mat4_from_rows(PERMUTE_ROWS) * bone.transpose()
}

/// Parent-relative position and x,y,z,w-ready rotation of a host bone
///
/// The quaternion is returned with a non-negative `w`.
pub fn local_transform(bone: &DMat4, parent: Option<&DMat4>) -> (DVec3, DQuat) {
    let mut matrix = permuted_world(bone);
    if let Some(parent) = parent {
        matrix *= permuted_world(parent).inverse();
    }
    let (_scale, rotation, translation) = matrix.transpose().to_scale_rotation_translation();
    let rotation = if rotation.w < 0.0 { -rotation } else { rotation };
    (translation, rotation.normalize())
}

/// Inverse world matrix of a host bone, in file row order
pub fn inverse_world_matrix(bone: &DMat4) -> DMat4 {
    let permuted = mat4_from_rows(PERMUTE_ROWS) * bone.transpose();
    permuted.inverse() * mat4_from_rows(INVERSE_SWAP_ROWS)
}

/// Armature-space pose matrix for one NA2 frame matrix (file row order)
pub fn pose_matrix(frame: &DMat4) -> DMat4 {
    let row = |i: usize| -> DVec4 { frame.row(i) };
    DMat4::from_cols(
        row(2).truncate().extend(0.0),
        row(0).truncate().extend(0.0),
        row(1).truncate().extend(0.0),
        row(3).truncate().extend(1.0),
    )
}

/// NA2 frame matrix (file row order) for an armature-space pose matrix
pub fn frame_matrix(pose: &DMat4) -> DMat4 {
    mat4_from_rows([
        pose.y_axis.truncate().extend(0.0).to_array(),
        pose.z_axis.truncate().extend(0.0).to_array(),
        pose.x_axis.truncate().extend(0.0).to_array(),
        pose.w_axis.truncate().extend(1.0).to_array(),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::FRAC_PI_2;

    fn frame(position: DVec3, rotation: DQuat, parent: Option<&BoneFrame>) -> BoneFrame {
        BoneFrame::from_local(position, rotation, parent)
    }

    #[test]
    fn test_identity_root_layout() {
        let root = frame(DVec3::new(1.0, 2.0, 3.0), DQuat::IDENTITY, None);
        let m = root.edit_matrix();
        assert_eq!(m.x_axis.truncate(), DVec3::Z);
        assert_eq!(m.y_axis.truncate(), DVec3::X);
        assert_eq!(m.z_axis.truncate(), DVec3::Y);
        assert_eq!(m.w_axis.truncate(), DVec3::new(1.0, 2.0, 3.0));
        assert!(m.determinant() > 0.0);
        assert_eq!(root.tail(BONE_LENGTH), DVec3::new(4.0, 2.0, 3.0));
    }

    #[test]
    fn test_child_offset_follows_parent_rotation() {
        let parent_rot = DQuat::from_rotation_z(FRAC_PI_2);
        let root = frame(DVec3::ZERO, parent_rot, None);
        let child = frame(DVec3::new(0.0, 1.0, 0.0), DQuat::IDENTITY, Some(&root));
        // parent.rotation = R(q)^T, so the row-vector offset is rotated by R(q)
        assert!(child.head.abs_diff_eq(parent_rot * DVec3::Y, 1e-12));
        assert!(child.rotation.abs_diff_eq(root.rotation, 1e-12));
    }

    #[test]
    fn test_edit_matrix_round_trip() {
        let q = DQuat::from_euler(glam::EulerRot::XYZ, 0.3, -1.1, 2.0);
        let f = frame(DVec3::new(-4.0, 0.5, 7.0), q, None);
        let back = BoneFrame::from_edit_matrix(&f.edit_matrix());
        assert!(back.rotation.abs_diff_eq(f.rotation, 1e-12));
        assert!(back.head.abs_diff_eq(f.head, 1e-12));
    }

    #[test]
    fn test_export_inverts_import() {
        let root_q = DQuat::from_euler(glam::EulerRot::XYZ, 0.2, 0.4, -0.7);
        let child_q = DQuat::from_euler(glam::EulerRot::ZYX, -1.2, 0.1, 0.9);
        let root_pos = DVec3::new(0.5, -2.0, 10.0);
        let child_pos = DVec3::new(0.0, 1.0, 0.25);

        let root = frame(root_pos, root_q, None);
        let child = frame(child_pos, child_q, Some(&root));
        let root_m = root.edit_matrix();
        let child_m = child.edit_matrix();

        let (pos, rot) = local_transform(&root_m, None);
        assert!(pos.abs_diff_eq(root_pos, 1e-9));
        assert!(rot.abs_diff_eq(root_q, 1e-9) || rot.abs_diff_eq(-root_q, 1e-9));

        let (pos, rot) = local_transform(&child_m, Some(&root_m));
        assert!(pos.abs_diff_eq(child_pos, 1e-9));
        assert!(rot.abs_diff_eq(child_q, 1e-9) || rot.abs_diff_eq(-child_q, 1e-9));
        assert!(rot.w >= 0.0);
    }

    #[test]
    fn test_inverse_world_matches_permuted_world() {
        let q = DQuat::from_euler(glam::EulerRot::XYZ, 1.0, 0.2, -0.3);
        let f = frame(DVec3::new(3.0, -1.0, 2.0), q, None);
        let bone = f.edit_matrix();
        let inverse = inverse_world_matrix(&bone);
        let world = permuted_world(&bone);
        assert!((world * inverse).abs_diff_eq(DMat4::IDENTITY, 1e-10));
        // last row carries the inverse translation
        assert!(inverse.row(3).truncate().abs_diff_eq(-(f.rotation * f.head), 1e-10));
    }

    #[test]
    fn test_identity_bone_inverse_world() {
        let f = frame(DVec3::ZERO, DQuat::IDENTITY, None);
        let inverse = inverse_world_matrix(&f.edit_matrix());
        assert!(inverse.abs_diff_eq(DMat4::IDENTITY, 1e-12));
    }

    #[test]
    fn test_pose_matrix_uses_edit_layout() {
        let q = DQuat::from_rotation_y(0.4);
        let f = frame(DVec3::new(1.0, 1.0, 0.0), q, None);
        let file = crate::math::mat4_from_rows([
            f.rotation.row(0).extend(0.0).to_array(),
            f.rotation.row(1).extend(0.0).to_array(),
            f.rotation.row(2).extend(0.0).to_array(),
            f.head.extend(1.0).to_array(),
        ]);
        assert!(pose_matrix(&file).abs_diff_eq(f.edit_matrix(), 1e-12));
        assert!(frame_matrix(&pose_matrix(&file)).abs_diff_eq(file, 1e-12));
    }
}
