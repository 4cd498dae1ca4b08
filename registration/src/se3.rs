use nalgebra::{Matrix3, Matrix4, Vector3, Vector6};

/// Exponential map from se(3) to SE(3): Rodrigues rotation plus the left
/// Jacobian acting on the translation part. `delta` is ordered
/// (translation, rotation).
pub fn exponential_map(delta: &Vector6<f32>) -> Matrix4<f32> {
    let v = Vector3::new(delta[0], delta[1], delta[2]);
    let omega = Vector3::new(delta[3], delta[4], delta[5]);

    let theta = omega.norm();

    let (rotation, translation) = if theta < 1e-6 {
        (Matrix3::identity(), v)
    } else {
        let k = omega / theta;
        let k_cross = skew(&k);
        let k_cross_sq = k_cross * k_cross;
        let rotation =
            Matrix3::identity() + k_cross * theta.sin() + k_cross_sq * (1.0 - theta.cos());
        let left_jacobian = Matrix3::identity()
            + k_cross * ((1.0 - theta.cos()) / theta)
            + k_cross_sq * ((theta - theta.sin()) / theta);
        (rotation, left_jacobian * v)
    };

    let mut transform = Matrix4::identity();
    transform.fixed_view_mut::<3, 3>(0, 0).copy_from(&rotation);
    transform
        .fixed_view_mut::<3, 1>(0, 3)
        .copy_from(&translation);
    transform
}

fn skew(k: &Vector3<f32>) -> Matrix3<f32> {
    Matrix3::new(0.0, -k.z, k.y, k.z, 0.0, -k.x, -k.y, k.x, 0.0)
}
