//! Color-ICP behaviour on synthetic clouds: identity alignment, rigid
//! round-trip recovery, and the failure modes of the state machine.

use gpc_core::HostPoint;
use gpc_hal::GpuContext;
use gpc_point_cloud::PointCloud;
use gpc_registration::{ColorIcp, IcpState};
use nalgebra::{Matrix3, Matrix4, Point3, Rotation3, Vector3, Vector6};

/// Cube surface with inward normals and a position-dependent colour ramp.
fn cube_cloud(half: f32, per_side: usize) -> (Vec<HostPoint>, Vec<Vector3<f32>>) {
    let mut points = Vec::new();
    let mut normals = Vec::new();
    let step = 2.0 * half / per_side as f32;
    for (axis, sign) in [(2, 1.0f32), (2, -1.0), (0, 1.0), (0, -1.0), (1, 1.0), (1, -1.0)] {
        for i in 0..per_side {
            for j in 0..per_side {
                let a = -half + (i as f32 + 0.5) * step;
                let b = -half + (j as f32 + 0.5) * step;
                let (p, n) = match axis {
                    0 => (
                        Point3::new(sign * half, a, b),
                        Vector3::new(-sign, 0.0, 0.0),
                    ),
                    1 => (
                        Point3::new(a, sign * half, b),
                        Vector3::new(0.0, -sign, 0.0),
                    ),
                    _ => (
                        Point3::new(a, b, sign * half),
                        Vector3::new(0.0, 0.0, -sign),
                    ),
                };
                points.push(HostPoint::new(
                    p.x,
                    p.y,
                    p.z,
                    (p.x + half) / (2.0 * half),
                    (p.y + half) / (2.0 * half),
                    0.5,
                ));
                normals.push(n);
            }
        }
    }
    (points, normals)
}

fn transformed(points: &[HostPoint], normals: &[Vector3<f32>], t: &Matrix4<f32>) -> (Vec<HostPoint>, Vec<Vector3<f32>>) {
    let r = t.fixed_view::<3, 3>(0, 0).into_owned();
    let moved = points
        .iter()
        .map(|p| {
            let q = t.transform_point(&p.xyz());
            HostPoint::new(q.x, q.y, q.z, p.r, p.g, p.b)
        })
        .collect();
    let rotated = normals.iter().map(|n| r * n).collect();
    (moved, rotated)
}

#[test]
fn test_identity_alignment_converges_immediately() {
    let Some(_) = GpuContext::global() else {
        return;
    };
    let (points, normals) = cube_cloud(0.5, 12);
    let source = PointCloud::create_from_host(&points).unwrap();
    let mut target = PointCloud::create_from_host(&points).unwrap();
    target.attach_normals(&normals).unwrap();

    let mut icp = ColorIcp::new(50, 0.1, 0.1).unwrap();
    icp.set_source_point_cloud(&source);
    icp.set_target_point_cloud(&target);
    assert_eq!(icp.state(), IcpState::Ready);

    icp.align().unwrap();
    assert_eq!(icp.state(), IcpState::Aligned);
    assert_eq!(icp.iterations().unwrap(), 1);
    assert!(icp.rmse().unwrap() < 1e-6);

    let t = icp.transformation().unwrap();
    assert!((t - Matrix4::identity()).norm() < 1e-4);
    assert!((icp.fitness().unwrap() - 1.0).abs() < 1e-6);
}

#[test]
fn test_rigid_round_trip_recovery() {
    let Some(_) = GpuContext::global() else {
        return;
    };
    let (points, normals) = cube_cloud(0.5, 15);

    // Ground truth: 10 degrees about z plus a 2 cm x shift.
    let angle = 10.0f32.to_radians();
    let mut t_true = Matrix4::identity();
    t_true
        .fixed_view_mut::<3, 3>(0, 0)
        .copy_from(Rotation3::from_euler_angles(0.0, 0.0, angle).matrix());
    t_true[(0, 3)] = 0.02;

    let (tgt_points, tgt_normals) = transformed(&points, &normals, &t_true);
    let source = PointCloud::create_from_host(&points).unwrap();
    let mut target = PointCloud::create_from_host(&tgt_points).unwrap();
    target.attach_normals(&tgt_normals).unwrap();

    let mut icp = ColorIcp::new(50, 0.1, 0.08).unwrap();
    icp.set_source_point_cloud(&source);
    icp.set_target_point_cloud(&target);
    icp.align().unwrap();

    let t = icp.transformation().unwrap();

    // Rotation stays orthonormal.
    let r = t.fixed_view::<3, 3>(0, 0).into_owned();
    assert!((r * r.transpose() - Matrix3::identity()).norm() < 1e-5);

    // Recovered against ground truth.
    let residual = t * t_true.try_inverse().unwrap();
    let dt = Vector3::new(residual[(0, 3)], residual[(1, 3)], residual[(2, 3)]);
    assert!(dt.norm() < 2e-3, "translation error {} m", dt.norm());

    let rr = residual.fixed_view::<3, 3>(0, 0).into_owned();
    let trace = (rr.trace() - 1.0) / 2.0;
    let angle_err = trace.clamp(-1.0, 1.0).acos();
    assert!(
        angle_err < 0.5f32.to_radians(),
        "rotation error {} rad",
        angle_err
    );

    assert!(icp.rmse().unwrap() < 1e-3);
}

#[test]
fn test_missing_normals_fails() {
    let Some(_) = GpuContext::global() else {
        return;
    };
    let (points, _) = cube_cloud(0.5, 6);
    let source = PointCloud::create_from_host(&points).unwrap();
    let target = PointCloud::create_from_host(&points).unwrap();

    let mut icp = ColorIcp::new(10, 0.1, 0.08).unwrap();
    icp.set_source_point_cloud(&source);
    icp.set_target_point_cloud(&target);
    let res = icp.align();
    assert!(matches!(res, Err(gpc_core::Error::MissingNormals(_))));
    assert_eq!(icp.state(), IcpState::Failed);
    assert!(icp.transformation().is_err());
}

#[test]
fn test_disjoint_clouds_have_no_correspondences() {
    let Some(_) = GpuContext::global() else {
        return;
    };
    let (points, normals) = cube_cloud(0.5, 6);
    let far: Vec<HostPoint> = points
        .iter()
        .map(|p| HostPoint::new(p.x + 100.0, p.y, p.z, p.r, p.g, p.b))
        .collect();

    let source = PointCloud::create_from_host(&far).unwrap();
    let mut target = PointCloud::create_from_host(&points).unwrap();
    target.attach_normals(&normals).unwrap();

    let mut icp = ColorIcp::new(10, 0.1, 0.08).unwrap();
    icp.set_source_point_cloud(&source);
    icp.set_target_point_cloud(&target);
    let res = icp.align();
    assert!(matches!(res, Err(gpc_core::Error::NoCorrespondences(_))));
    assert_eq!(icp.state(), IcpState::Failed);
}

#[test]
fn test_small_translation_recovery() {
    let Some(_) = GpuContext::global() else {
        return;
    };
    // Small pure translation, well inside the correspondence radius.
    let (points, normals) = cube_cloud(0.5, 12);
    let t_true = {
        let mut t = Matrix4::identity();
        t[(1, 3)] = 0.015;
        t
    };
    let (tgt_points, tgt_normals) = transformed(&points, &normals, &t_true);

    let source = PointCloud::create_from_host(&points).unwrap();
    let mut target = PointCloud::create_from_host(&tgt_points).unwrap();
    target.attach_normals(&tgt_normals).unwrap();

    let mut icp = ColorIcp::new(30, 0.08, 0.1).unwrap();
    icp.set_source_point_cloud(&source);
    icp.set_target_point_cloud(&target);
    icp.align().unwrap();

    let t = icp.transformation().unwrap();
    let delta = Vector6::new(
        t[(0, 3)],
        t[(1, 3)] - 0.015,
        t[(2, 3)],
        0.0,
        0.0,
        0.0,
    );
    assert!(delta.norm() < 1e-3, "translation residual {}", delta.norm());
}
