use std::f64::consts::PI;

use super::{Matrix, MatrixError};

/// Tolerance on the `[0, 0, 0, 1]` last row of a homogeneous pose.
const HOMOGENEOUS_TOLERANCE: f64 = 1e-9;
/// Distance from ±1 at which an Euler decomposition is treated as gimbal locked.
const GIMBAL_TOLERANCE: f64 = 1e-6;
/// Rotation magnitude below which an axis-angle vector is the identity.
const SMALL_ANGLE: f64 = 1e-6;

type Rotation = [[f64; 3]; 3];

fn pose_from_parts(rot: Rotation, t: [f64; 3]) -> Matrix {
    let mut out = Matrix::identity(4);
    for (i, row) in rot.iter().enumerate() {
        for (j, value) in row.iter().enumerate() {
            out[(i, j)] = *value;
        }
        out[(i, 3)] = t[i];
    }
    out
}

fn rot_x(a: f64) -> Rotation {
    let (s, c) = a.sin_cos();
    [[1.0, 0.0, 0.0], [0.0, c, -s], [0.0, s, c]]
}

fn rot_y(a: f64) -> Rotation {
    let (s, c) = a.sin_cos();
    [[c, 0.0, s], [0.0, 1.0, 0.0], [-s, 0.0, c]]
}

fn rot_z(a: f64) -> Rotation {
    let (s, c) = a.sin_cos();
    [[c, -s, 0.0], [s, c, 0.0], [0.0, 0.0, 1.0]]
}

fn rot_mul(a: &Rotation, b: &Rotation) -> Rotation {
    let mut out = [[0.0; 3]; 3];
    for (i, row) in out.iter_mut().enumerate() {
        for (j, cell) in row.iter_mut().enumerate() {
            *cell = (0..3).map(|k| a[i][k] * b[k][j]).sum();
        }
    }
    out
}

impl Matrix {
    /// Pure translation pose.
    pub fn from_translation(x: f64, y: f64, z: f64) -> Matrix {
        let mut out = Matrix::identity(4);
        out[(0, 3)] = x;
        out[(1, 3)] = y;
        out[(2, 3)] = z;
        out
    }

    /// Rotation about X by `radians`.
    pub fn rotation_x(radians: f64) -> Matrix {
        pose_from_parts(rot_x(radians), [0.0; 3])
    }

    /// Rotation about Y by `radians`.
    pub fn rotation_y(radians: f64) -> Matrix {
        pose_from_parts(rot_y(radians), [0.0; 3])
    }

    /// Rotation about Z by `radians`.
    pub fn rotation_z(radians: f64) -> Matrix {
        pose_from_parts(rot_z(radians), [0.0; 3])
    }

    /// `self · translation(x, y, z)`.
    pub fn translate(&self, x: f64, y: f64, z: f64) -> Result<Matrix, MatrixError> {
        self.multiply(&Matrix::from_translation(x, y, z))
    }

    /// `self · rotation_x(radians)`.
    pub fn rotate_x(&self, radians: f64) -> Result<Matrix, MatrixError> {
        self.multiply(&Matrix::rotation_x(radians))
    }

    /// `self · rotation_y(radians)`.
    pub fn rotate_y(&self, radians: f64) -> Result<Matrix, MatrixError> {
        self.multiply(&Matrix::rotation_y(radians))
    }

    /// `self · rotation_z(radians)`.
    pub fn rotate_z(&self, radians: f64) -> Result<Matrix, MatrixError> {
        self.multiply(&Matrix::rotation_z(radians))
    }

    /// Pose from `[x, y, z, w, p, r]` as used by Fanuc, Kuka and Motoman
    /// controllers: `R = Rz(r) · Ry(p) · Rx(w)`, angles in degrees.
    pub fn from_xyzwpr(xyzwpr: [f64; 6]) -> Matrix {
        let [x, y, z, w, p, r] = xyzwpr;
        let rot = rot_mul(
            &rot_mul(&rot_z(r.to_radians()), &rot_y(p.to_radians())),
            &rot_x(w.to_radians()),
        );
        pose_from_parts(rot, [x, y, z])
    }

    /// Inverse of [`Matrix::from_xyzwpr`].
    ///
    /// At gimbal lock (pitch of ±90°) `w` is reported as 0 and `r` carries the
    /// whole rotation about the vertical axis.
    pub fn to_xyzwpr(&self) -> Result<[f64; 6], MatrixError> {
        let [x, y, z] = self.position()?;
        let m = |i: usize, j: usize| self[(i, j)];
        let (w, p, r) = if m(2, 0) > 1.0 - GIMBAL_TOLERANCE {
            (0.0, -PI / 2.0, (-m(1, 2)).atan2(m(1, 1)))
        } else if m(2, 0) < -1.0 + GIMBAL_TOLERANCE {
            (0.0, PI / 2.0, m(1, 2).atan2(m(1, 1)))
        } else {
            let p = (-m(2, 0)).atan2(m(0, 0).hypot(m(1, 0)));
            (m(2, 1).atan2(m(2, 2)), p, m(1, 0).atan2(m(0, 0)))
        };
        Ok([x, y, z, w.to_degrees(), p.to_degrees(), r.to_degrees()])
    }

    /// Pose from `[tx, ty, tz, rx, ry, rz]` with intrinsic XYZ rotation
    /// `R = Rx(rx) · Ry(ry) · Rz(rz)`, angles in degrees.
    pub fn from_txyz_rxyz(values: [f64; 6]) -> Matrix {
        let [x, y, z, rx, ry, rz] = values;
        let rot = rot_mul(
            &rot_mul(&rot_x(rx.to_radians()), &rot_y(ry.to_radians())),
            &rot_z(rz.to_radians()),
        );
        pose_from_parts(rot, [x, y, z])
    }

    /// Inverse of [`Matrix::from_txyz_rxyz`]. At gimbal lock `rx` is 0.
    pub fn to_txyz_rxyz(&self) -> Result<[f64; 6], MatrixError> {
        let [x, y, z] = self.position()?;
        let m = |i: usize, j: usize| self[(i, j)];
        let sy = m(0, 2);
        let (rx, ry, rz) = if sy.abs() > 1.0 - GIMBAL_TOLERANCE {
            (0.0, (PI / 2.0).copysign(sy), m(1, 0).atan2(m(1, 1)))
        } else {
            let ry = sy.atan2(m(0, 0).hypot(m(0, 1)));
            ((-m(1, 2)).atan2(m(2, 2)), ry, (-m(0, 1)).atan2(m(0, 0)))
        };
        Ok([x, y, z, rx.to_degrees(), ry.to_degrees(), rz.to_degrees()])
    }

    /// Rotation-only pose from a scalar-first quaternion `[q0, q1, q2, q3]`.
    /// The quaternion is normalised first.
    pub fn from_quaternion(q: [f64; 4]) -> Result<Matrix, MatrixError> {
        let norm = q.iter().map(|v| v * v).sum::<f64>().sqrt();
        if norm < f64::EPSILON {
            return Err(MatrixError::DegenerateQuaternion);
        }
        let [a, b, c, d] = q.map(|v| v / norm);
        let rot = [
            [
                1.0 - 2.0 * (c * c + d * d),
                2.0 * (b * c - a * d),
                2.0 * (b * d + a * c),
            ],
            [
                2.0 * (b * c + a * d),
                1.0 - 2.0 * (b * b + d * d),
                2.0 * (c * d - a * b),
            ],
            [
                2.0 * (b * d - a * c),
                2.0 * (c * d + a * b),
                1.0 - 2.0 * (b * b + c * c),
            ],
        ];
        Ok(pose_from_parts(rot, [0.0; 3]))
    }

    /// Scalar-first unit quaternion of the rotation block, with `q0 >= 0`.
    pub fn to_quaternion(&self) -> Result<[f64; 4], MatrixError> {
        self.ensure_pose_shape()?;
        let m = |i: usize, j: usize| self[(i, j)];
        let trace = m(0, 0) + m(1, 1) + m(2, 2);
        let mut q = if trace > 0.0 {
            let s = (trace + 1.0).sqrt() * 2.0;
            [
                s / 4.0,
                (m(2, 1) - m(1, 2)) / s,
                (m(0, 2) - m(2, 0)) / s,
                (m(1, 0) - m(0, 1)) / s,
            ]
        } else if m(0, 0) > m(1, 1) && m(0, 0) > m(2, 2) {
            let s = (1.0 + m(0, 0) - m(1, 1) - m(2, 2)).sqrt() * 2.0;
            [
                (m(2, 1) - m(1, 2)) / s,
                s / 4.0,
                (m(0, 1) + m(1, 0)) / s,
                (m(0, 2) + m(2, 0)) / s,
            ]
        } else if m(1, 1) > m(2, 2) {
            let s = (1.0 + m(1, 1) - m(0, 0) - m(2, 2)).sqrt() * 2.0;
            [
                (m(0, 2) - m(2, 0)) / s,
                (m(0, 1) + m(1, 0)) / s,
                s / 4.0,
                (m(1, 2) + m(2, 1)) / s,
            ]
        } else {
            let s = (1.0 + m(2, 2) - m(0, 0) - m(1, 1)).sqrt() * 2.0;
            [
                (m(1, 0) - m(0, 1)) / s,
                (m(0, 2) + m(2, 0)) / s,
                (m(1, 2) + m(2, 1)) / s,
                s / 4.0,
            ]
        };
        if q[0] < 0.0 {
            q = q.map(|v| -v);
        }
        Ok(q)
    }

    /// Pose from ABB's `[x, y, z, q0, q1, q2, q3]`.
    pub fn from_abb(values: [f64; 7]) -> Result<Matrix, MatrixError> {
        let [x, y, z, q0, q1, q2, q3] = values;
        let mut pose = Matrix::from_quaternion([q0, q1, q2, q3])?;
        pose.set_position([x, y, z])?;
        Ok(pose)
    }

    /// Inverse of [`Matrix::from_abb`].
    pub fn to_abb(&self) -> Result<[f64; 7], MatrixError> {
        let [x, y, z] = self.position()?;
        let [q0, q1, q2, q3] = self.to_quaternion()?;
        Ok([x, y, z, q0, q1, q2, q3])
    }

    /// Pose from a Universal Robots `[x, y, z, rx, ry, rz]` rotation vector
    /// (axis scaled by the angle in radians).
    pub fn from_axis_angle_vector(values: [f64; 6]) -> Matrix {
        let [x, y, z, rx, ry, rz] = values;
        let angle = (rx * rx + ry * ry + rz * rz).sqrt();
        if angle < SMALL_ANGLE {
            return Matrix::from_translation(x, y, z);
        }
        let k = [rx / angle, ry / angle, rz / angle];
        let (s, c) = angle.sin_cos();
        let v = 1.0 - c;
        let rot = [
            [
                c + k[0] * k[0] * v,
                k[0] * k[1] * v - k[2] * s,
                k[0] * k[2] * v + k[1] * s,
            ],
            [
                k[1] * k[0] * v + k[2] * s,
                c + k[1] * k[1] * v,
                k[1] * k[2] * v - k[0] * s,
            ],
            [
                k[2] * k[0] * v - k[1] * s,
                k[2] * k[1] * v + k[0] * s,
                c + k[2] * k[2] * v,
            ],
        ];
        pose_from_parts(rot, [x, y, z])
    }

    /// Inverse of [`Matrix::from_axis_angle_vector`].
    pub fn to_axis_angle_vector(&self) -> Result<[f64; 6], MatrixError> {
        let [x, y, z] = self.position()?;
        let m = |i: usize, j: usize| self[(i, j)];
        let cos = ((m(0, 0) + m(1, 1) + m(2, 2) - 1.0) / 2.0).clamp(-1.0, 1.0);
        let angle = cos.acos();
        if angle < SMALL_ANGLE {
            return Ok([x, y, z, 0.0, 0.0, 0.0]);
        }
        let skew = [m(2, 1) - m(1, 2), m(0, 2) - m(2, 0), m(1, 0) - m(0, 1)];
        let axis = if PI - angle < 1e-3 {
            // sin(angle) is too small to divide by; read the axis from the
            // symmetric part instead.
            let v = 1.0 - cos;
            let diag = [m(0, 0), m(1, 1), m(2, 2)];
            let i = (0..3)
                .max_by(|a, b| diag[*a].total_cmp(&diag[*b]))
                .unwrap_or(0);
            let ki = ((diag[i] - cos) / v).max(0.0).sqrt();
            let mut axis = [0.0; 3];
            for j in 0..3 {
                axis[j] = if j == i {
                    ki
                } else {
                    (m(i, j) + m(j, i)) / (2.0 * v * ki)
                };
            }
            let dot: f64 = axis.iter().zip(skew).map(|(a, b)| a * b).sum();
            if dot < 0.0 {
                axis = axis.map(|a| -a);
            }
            axis
        } else {
            let s = 2.0 * angle.sin();
            skew.map(|v| v / s)
        };
        Ok([x, y, z, axis[0] * angle, axis[1] * angle, axis[2] * angle])
    }

    /// Whether this is a 4×4 matrix with last row `[0, 0, 0, 1]`.
    pub fn is_homogeneous(&self) -> bool {
        self.shape() == (4, 4)
            && [0.0, 0.0, 0.0, 1.0]
                .iter()
                .enumerate()
                .all(|(j, want)| (self[(3, j)] - want).abs() <= HOMOGENEOUS_TOLERANCE)
    }

    pub fn ensure_homogeneous(&self) -> Result<(), MatrixError> {
        if self.is_homogeneous() {
            Ok(())
        } else {
            Err(MatrixError::NotHomogeneous {
                rows: self.rows(),
                cols: self.cols(),
            })
        }
    }

    /// Inverse of a rigid transform, `[Rᵀ | −Rᵀt]`.
    pub fn invert(&self) -> Result<Matrix, MatrixError> {
        self.ensure_homogeneous()?;
        let mut out = Matrix::identity(4);
        for i in 0..3 {
            for j in 0..3 {
                out[(i, j)] = self[(j, i)];
            }
        }
        for i in 0..3 {
            out[(i, 3)] = -(0..3).map(|k| self[(k, i)] * self[(k, 3)]).sum::<f64>();
        }
        Ok(out)
    }

    /// Translation part of a 4×4 matrix.
    pub fn position(&self) -> Result<[f64; 3], MatrixError> {
        self.ensure_pose_shape()?;
        Ok([self[(0, 3)], self[(1, 3)], self[(2, 3)]])
    }

    /// Overwrite the translation part of a 4×4 matrix.
    pub fn set_position(&mut self, xyz: [f64; 3]) -> Result<(), MatrixError> {
        self.ensure_pose_shape()?;
        for (i, value) in xyz.into_iter().enumerate() {
            self[(i, 3)] = value;
        }
        Ok(())
    }

    fn ensure_pose_shape(&self) -> Result<(), MatrixError> {
        if self.shape() == (4, 4) {
            Ok(())
        } else {
            Err(MatrixError::NotPose {
                rows: self.rows(),
                cols: self.cols(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TOL: f64 = 1e-9;

    fn assert_close(a: &[f64], b: &[f64], tol: f64) {
        assert_eq!(a.len(), b.len());
        for (x, y) in a.iter().zip(b) {
            assert!((x - y).abs() <= tol, "{a:?} != {b:?}");
        }
    }

    #[test]
    fn elementary_rotations_compose_like_chaining() {
        let chained = Matrix::identity(4)
            .translate(1.0, 2.0, 3.0)
            .and_then(|m| m.rotate_z(PI / 2.0))
            .unwrap();
        let x_axis = chained.column(0).unwrap();
        assert_close(&x_axis, &[0.0, 1.0, 0.0, 0.0], TOL);
        assert_eq!(chained.position().unwrap(), [1.0, 2.0, 3.0]);
    }

    #[test]
    fn xyzwpr_round_trip() {
        let values = [100.0, -20.0, 5.5, 30.0, -45.0, 120.0];
        let pose = Matrix::from_xyzwpr(values);
        assert!(pose.is_homogeneous());
        assert_close(&pose.to_xyzwpr().unwrap(), &values, 1e-9);
    }

    #[test]
    fn xyzwpr_matches_elementary_product() {
        let pose = Matrix::from_xyzwpr([0.0, 0.0, 0.0, 10.0, 20.0, 30.0]);
        let expected = Matrix::rotation_z(30f64.to_radians())
            .multiply(&Matrix::rotation_y(20f64.to_radians()))
            .and_then(|m| m.multiply(&Matrix::rotation_x(10f64.to_radians())))
            .unwrap();
        assert!(pose.approx_eq(&expected, TOL));
    }

    #[test]
    fn xyzwpr_gimbal_lock_forces_w_to_zero() {
        for pitch in [90.0, -90.0] {
            let pose = Matrix::from_xyzwpr([1.0, 2.0, 3.0, 25.0, pitch, 40.0]);
            let decoded = pose.to_xyzwpr().unwrap();
            assert_eq!(&decoded[..3], &[1.0, 2.0, 3.0]);
            assert_eq!(decoded[3], 0.0);
            assert!((decoded[4] - pitch).abs() < 1e-9);
            assert!(Matrix::from_xyzwpr(decoded).approx_eq(&pose, 1e-9));
        }
    }

    #[test]
    fn txyz_rxyz_round_trip_and_gimbal() {
        let values = [1.0, 2.0, 3.0, -15.0, 40.0, 170.0];
        let pose = Matrix::from_txyz_rxyz(values);
        assert_close(&pose.to_txyz_rxyz().unwrap(), &values, 1e-9);

        let locked = Matrix::from_txyz_rxyz([0.0, 0.0, 0.0, 33.0, 90.0, 12.0]);
        let decoded = locked.to_txyz_rxyz().unwrap();
        assert_eq!(decoded[3], 0.0);
        assert!((decoded[4] - 90.0).abs() < 1e-9);
        assert!(Matrix::from_txyz_rxyz(decoded).approx_eq(&locked, 1e-9));
    }

    #[test]
    fn quaternion_round_trip_across_orientations() {
        let cases = [
            [0.0, 0.0, 0.0],
            [1e-7, 0.0, 0.0],
            [180.0, 0.0, 0.0],
            [0.0, 180.0, 0.0],
            [0.0, 0.0, 180.0],
            [179.999, 0.0, 0.0],
            [90.0, 45.0, -30.0],
            [-120.0, 10.0, 80.0],
            [45.0, -89.0, 0.0],
            [0.5, 0.5, 0.5],
            [170.0, 60.0, -100.0],
        ];
        for [w, p, r] in cases {
            let pose = Matrix::from_xyzwpr([0.0, 0.0, 0.0, w, p, r]);
            let q = pose.to_quaternion().unwrap();
            assert!(q[0] >= 0.0);
            let norm: f64 = q.iter().map(|v| v * v).sum();
            assert!((norm - 1.0).abs() < 1e-12);
            let rebuilt = Matrix::from_quaternion(q).unwrap();
            assert!(rebuilt.approx_eq(&pose, 1e-9), "case {w} {p} {r}");
        }
    }

    #[test]
    fn quaternion_is_normalised_and_rejects_zero() {
        let a = Matrix::from_quaternion([2.0, 0.0, 0.0, 0.0]).unwrap();
        assert!(a.approx_eq(&Matrix::identity(4), TOL));
        assert_eq!(
            Matrix::from_quaternion([0.0; 4]),
            Err(MatrixError::DegenerateQuaternion)
        );
    }

    #[test]
    fn abb_carries_position_and_quaternion() {
        let abb = [10.0, 20.0, 30.0, 0.5, 0.5, 0.5, 0.5];
        let pose = Matrix::from_abb(abb).unwrap();
        assert_close(&pose.to_abb().unwrap(), &abb, 1e-12);
    }

    #[test]
    fn axis_angle_round_trip() {
        let values = [0.1, 0.2, 0.3, 0.4, -1.2, 0.7];
        let pose = Matrix::from_axis_angle_vector(values);
        assert_close(&pose.to_axis_angle_vector().unwrap(), &values, 1e-9);
    }

    #[test]
    fn axis_angle_degenerate_magnitude_keeps_translation() {
        let pose = Matrix::from_axis_angle_vector([4.0, 5.0, 6.0, 1e-9, 0.0, 0.0]);
        assert_eq!(pose, Matrix::from_translation(4.0, 5.0, 6.0));
        assert_eq!(
            pose.to_axis_angle_vector().unwrap(),
            [4.0, 5.0, 6.0, 0.0, 0.0, 0.0]
        );
    }

    #[test]
    fn axis_angle_near_half_turn_uses_diagonal() {
        for angle in [PI, PI - 1e-5] {
            let axis = [0.6, 0.0, 0.8];
            let values = [0.0, 0.0, 0.0, axis[0] * angle, axis[1] * angle, axis[2] * angle];
            let pose = Matrix::from_axis_angle_vector(values);
            let decoded = pose.to_axis_angle_vector().unwrap();
            assert!(Matrix::from_axis_angle_vector(decoded).approx_eq(&pose, 1e-9));
        }
    }

    #[test]
    fn invert_round_trips_and_cancels() {
        let pose = Matrix::from_xyzwpr([10.0, -5.0, 3.0, 20.0, 30.0, 40.0]);
        let inv = pose.invert().unwrap();
        assert!(inv.invert().unwrap().approx_eq(&pose, 1e-9));
        assert!(pose
            .multiply(&inv)
            .unwrap()
            .approx_eq(&Matrix::identity(4), 1e-9));
    }

    #[test]
    fn invert_rejects_non_homogeneous_input() {
        assert_eq!(
            Matrix::identity(3).invert(),
            Err(MatrixError::NotHomogeneous { rows: 3, cols: 3 })
        );
        let mut bad = Matrix::identity(4);
        bad[(3, 0)] = 0.5;
        assert!(matches!(
            bad.invert(),
            Err(MatrixError::NotHomogeneous { .. })
        ));
    }

    #[test]
    fn position_requires_four_by_four() {
        let mut pose = Matrix::identity(4);
        pose.set_position([1.0, 2.0, 3.0]).unwrap();
        assert_eq!(pose.position().unwrap(), [1.0, 2.0, 3.0]);
        assert_eq!(
            Matrix::zeros(3, 4).position(),
            Err(MatrixError::NotPose { rows: 3, cols: 4 })
        );
    }
}
