//! End-to-end scenarios for the cloud operations, plus the invariants the
//! pipeline is expected to hold.

use gpc_core::{HostPoint, PointProperty};
use gpc_hal::GpuContext;
use gpc_point_cloud::PointCloud;
use nalgebra::{Point3, Vector3};
use rand::{Rng, SeedableRng};

fn host_point(x: f32, y: f32, z: f32) -> HostPoint {
    HostPoint::new(x, y, z, 0.5, 0.5, 0.5)
}

fn random_cloud(seed: u64, n: usize) -> Vec<HostPoint> {
    let mut rng = rand::rngs::StdRng::seed_from_u64(seed);
    (0..n)
        .map(|_| {
            host_point(
                rng.random_range(0.0..1.0),
                rng.random_range(0.0..1.0),
                rng.random_range(0.0..1.0),
            )
        })
        .collect()
}

/// Cube surface sample: `per_side` x `per_side` interior grid points on all
/// six faces of an axis-aligned cube of the given half extent, with inward
/// normals.
fn cube_surface(half: f32, per_side: usize) -> (Vec<HostPoint>, Vec<Vector3<f32>>) {
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
                points.push(host_point(p.x, p.y, p.z));
                normals.push(n);
            }
        }
    }
    (points, normals)
}

#[test]
fn test_voxel_downsample_collinear_points() {
    let Some(_) = GpuContext::global() else {
        return;
    };
    // Ten collinear points at 0.01 spacing collapse into five 0.02 voxels.
    let points: Vec<HostPoint> = (0..10)
        .map(|i| host_point(i as f32 * 0.01, 0.0, 0.0))
        .collect();
    let cloud = PointCloud::create_from_host(&points).unwrap();
    let down = cloud.voxel_grid_down_sample(0.02).unwrap();

    assert_eq!(down.points_number(), 5);
    let out = down.download().unwrap();
    let expected = [0.005f32, 0.025, 0.045, 0.065, 0.085];
    for (p, &e) in out.iter().zip(expected.iter()) {
        assert!((p.x - e).abs() < 1e-6, "voxel centre {} vs {}", p.x, e);
        assert_eq!(p.property, PointProperty::Active as u32);
    }
    // Input untouched.
    assert_eq!(cloud.points_number(), 10);
}

#[test]
fn test_voxel_downsample_idempotent() {
    let Some(_) = GpuContext::global() else {
        return;
    };
    let cloud = PointCloud::create_from_host(&random_cloud(5, 2000)).unwrap();
    let once = cloud.voxel_grid_down_sample(0.1).unwrap();
    let twice = once.voxel_grid_down_sample(0.1).unwrap();
    let n1 = once.points_number();
    let n2 = twice.points_number();
    assert!(n2 <= n1);
    assert!(n1 - n2 <= n1 / 10, "second pass dropped {} of {}", n1 - n2, n1);
}

#[test]
fn test_voxel_downsample_rejects_bad_leaf() {
    let Some(_) = GpuContext::global() else {
        return;
    };
    let cloud = PointCloud::create_from_host(&[host_point(0.0, 0.0, 0.0)]).unwrap();
    assert!(cloud.voxel_grid_down_sample(0.0).is_err());
    assert!(cloud.voxel_grid_down_sample(-1.0).is_err());
}

#[test]
fn test_outlier_removal_drops_isolated_point() {
    let Some(_) = GpuContext::global() else {
        return;
    };
    // A 10x10 sheet plus one isolated point far away.
    let mut points = Vec::new();
    for i in 0..10 {
        for j in 0..10 {
            points.push(host_point(i as f32 / 9.0, j as f32 / 9.0, 0.0));
        }
    }
    points.push(host_point(10.0, 10.0, 10.0));

    let cloud = PointCloud::create_from_host(&points).unwrap();
    let kept = cloud.radius_outlier_removal(0.3, 3).unwrap();

    assert_eq!(kept.points_number(), 100);
    let out = kept.download().unwrap();
    // Original ordering is preserved.
    for (k, p) in out.iter().enumerate() {
        assert_eq!(p.xyz(), points[k].xyz());
    }
}

#[test]
fn test_outlier_removal_monotonicity() {
    let Some(_) = GpuContext::global() else {
        return;
    };
    let cloud = PointCloud::create_from_host(&random_cloud(17, 800)).unwrap();

    let loose = cloud.radius_outlier_removal(0.1, 2).unwrap().points_number();
    let strict = cloud.radius_outlier_removal(0.1, 5).unwrap().points_number();
    assert!(strict <= loose, "more required neighbors grew the output");

    let small = cloud.radius_outlier_removal(0.05, 3).unwrap().points_number();
    let large = cloud.radius_outlier_removal(0.15, 3).unwrap().points_number();
    assert!(small <= large, "larger radius shrank the output");
}

#[test]
fn test_normals_on_noisy_plane() {
    let Some(_) = GpuContext::global() else {
        return;
    };
    let mut rng = rand::rngs::StdRng::seed_from_u64(99);
    let mut points = Vec::new();
    for i in 0..20 {
        for j in 0..20 {
            let noise: f32 = rng.random_range(-1e-4..1e-4);
            points.push(host_point(i as f32 * 0.01, j as f32 * 0.01, noise));
        }
    }
    let mut cloud = PointCloud::create_from_host(&points).unwrap();
    cloud.set_sensor_origin(Point3::new(0.1, 0.1, 10.0));
    cloud.estimate_normals(0.05).unwrap();

    let normals = cloud.download_normals().unwrap();
    let out = cloud.download().unwrap();
    let cos_5deg = 5.0f32.to_radians().cos();
    let mut good = 0;
    let mut live = 0;
    for (p, n) in out.iter().zip(normals.iter()) {
        if p.property == PointProperty::Invalid as u32 {
            continue;
        }
        live += 1;
        // Unit length.
        assert!((n.norm() - 1.0).abs() <= 1e-5, "normal {:?} not unit", n);
        if n.z >= cos_5deg {
            good += 1;
        }
    }
    assert!(live > 0);
    assert!(
        good as f32 >= 0.95 * live as f32,
        "{} of {} normals near +z",
        good,
        live
    );
}

#[test]
fn test_normals_isolated_points_become_invalid() {
    let Some(_) = GpuContext::global() else {
        return;
    };
    let points = vec![
        host_point(0.0, 0.0, 0.0),
        host_point(5.0, 0.0, 0.0),
        host_point(0.0, 5.0, 0.0),
    ];
    let mut cloud = PointCloud::create_from_host(&points).unwrap();
    cloud.estimate_normals(0.1).unwrap();

    let out = cloud.download().unwrap();
    let normals = cloud.download_normals().unwrap();
    for (p, n) in out.iter().zip(normals.iter()) {
        assert_eq!(p.property, PointProperty::Invalid as u32);
        assert_eq!(n.norm(), 0.0);
    }
    assert_eq!(cloud.live_points(), 0);
}

#[test]
fn test_spatial_index_matches_brute_force() {
    let Some(_) = GpuContext::global() else {
        return;
    };
    let points = random_cloud(23, 500);
    let cloud = PointCloud::create_from_host(&points).unwrap();
    let index = cloud.build_index(0.1).unwrap();

    let mut rng = rand::rngs::StdRng::seed_from_u64(24);
    let queries: Vec<Point3<f32>> = (0..50)
        .map(|_| {
            Point3::new(
                rng.random_range(0.0..1.0),
                rng.random_range(0.0..1.0),
                rng.random_range(0.0..1.0),
            )
        })
        .collect();

    for radius in [0.1f32, 0.07] {
        let results = index.radius_search(&queries, radius).unwrap();
        for (q, hits) in queries.iter().zip(results.iter()) {
            let mut got: Vec<u32> = hits.iter().map(|&(id, _)| id).collect();
            got.sort_unstable();
            let mut expected: Vec<u32> = points
                .iter()
                .enumerate()
                .filter(|(_, p)| (p.xyz() - q).norm_squared() <= radius * radius)
                .map(|(i, _)| i as u32)
                .collect();
            expected.sort_unstable();
            assert_eq!(got, expected);

            for &(id, d2) in hits {
                let true_d2 = (points[id as usize].xyz() - q).norm_squared();
                assert!((d2 - true_d2).abs() < 1e-6);
            }
        }
    }

    assert!(index.radius_search(&queries, 0.2).is_err());
}

#[test]
fn test_euclidean_clustering_two_cubes() {
    let Some(_) = GpuContext::global() else {
        return;
    };
    let mut points = Vec::new();
    for c in 0..2 {
        let base = c as f32 * 0.65; // 0.5 m gap between 0.15-wide cubes
        for i in 0..4 {
            for j in 0..4 {
                for k in 0..4 {
                    points.push(host_point(
                        base + i as f32 * 0.05,
                        j as f32 * 0.05,
                        k as f32 * 0.05,
                    ));
                }
            }
        }
    }
    let mut cloud = PointCloud::create_from_host(&points).unwrap();
    let clusters = cloud.euclidean_clustering(0.1, 10, 100000).unwrap();

    assert_eq!(clusters.len(), 2);
    assert_eq!(clusters[0].len(), 64);
    assert_eq!(clusters[1].len(), 64);
    // Stable numbering: cluster 0 holds the smallest point index.
    assert_eq!(clusters[0][0], 0);
    assert!(clusters[1].iter().all(|&i| i >= 64));

    // Partition property: every point in exactly one cluster.
    let ids = cloud.download_cluster_ids().unwrap().unwrap();
    let mut seen = vec![0u32; points.len()];
    for c in &clusters {
        for &m in c {
            seen[m as usize] += 1;
        }
    }
    assert!(seen.iter().all(|&s| s == 1));
    assert!(ids.iter().all(|&id| id == 0 || id == 1));
}

#[test]
fn test_clustering_size_filter() {
    let Some(_) = GpuContext::global() else {
        return;
    };
    // 5-point clump and a 2-point clump.
    let mut points: Vec<HostPoint> = (0..5)
        .map(|i| host_point(i as f32 * 0.01, 0.0, 0.0))
        .collect();
    points.push(host_point(2.0, 0.0, 0.0));
    points.push(host_point(2.01, 0.0, 0.0));

    let mut cloud = PointCloud::create_from_host(&points).unwrap();
    let clusters = cloud.euclidean_clustering(0.05, 3, 100).unwrap();
    assert_eq!(clusters.len(), 1);
    assert_eq!(clusters[0].len(), 5);

    let ids = cloud.download_cluster_ids().unwrap().unwrap();
    assert_eq!(ids[5], -1);
    assert_eq!(ids[6], -1);
}

#[test]
fn test_convex_segmentation_requires_normals() {
    let Some(_) = GpuContext::global() else {
        return;
    };
    let mut cloud = PointCloud::create_from_host(&random_cloud(31, 50)).unwrap();
    let res = cloud.convex_obj_segmentation(0.1, 1, 1000);
    assert!(matches!(res, Err(gpc_core::Error::MissingNormals(_))));
}

#[test]
fn test_convex_segmentation_cube_and_dent() {
    let Some(_) = GpuContext::global() else {
        return;
    };
    let (points, normals) = cube_surface(0.5, 10);
    let mut cloud = PointCloud::create_from_host(&points).unwrap();
    cloud.attach_normals(&normals).unwrap();

    // All face joins of a cube are convex toward the interior.
    let clusters = cloud.convex_obj_segmentation(0.12, 10, 100000).unwrap();
    assert_eq!(clusters.len(), 1);
    assert_eq!(clusters[0].len(), 600);

    // Sink a 4x4 patch of the top face: its rim joins become concave.
    let (mut dented, dent_normals) = (points.clone(), normals.clone());
    let mut pit = 0;
    for (p, _) in dented.iter_mut().zip(dent_normals.iter()) {
        if p.z == 0.5 && p.x.abs() < 0.2 && p.y.abs() < 0.2 {
            p.z = 0.45;
            pit += 1;
        }
    }
    assert_eq!(pit, 16);

    let mut dent_cloud = PointCloud::create_from_host(&dented).unwrap();
    dent_cloud.attach_normals(&dent_normals).unwrap();

    let euclid = dent_cloud.euclidean_clustering(0.12, 10, 100000).unwrap();
    assert_eq!(euclid.len(), 1, "dent should stay Euclidean-connected");

    let convex = dent_cloud.convex_obj_segmentation(0.12, 10, 100000).unwrap();
    assert!(convex.len() >= 2, "dent rim should break convexity");

    // Convex clusters refine the Euclidean ones.
    for c in &convex {
        let host = euclid
            .iter()
            .position(|e| e.contains(&c[0]))
            .expect("convex cluster outside every Euclidean cluster");
        assert!(c.iter().all(|m| euclid[host].contains(m)));
    }
}

#[test]
fn test_transform_moves_bbox_and_rotates_normals() {
    let Some(_) = GpuContext::global() else {
        return;
    };
    let (points, normals) = cube_surface(0.5, 4);
    let mut cloud = PointCloud::create_from_host(&points).unwrap();
    cloud.attach_normals(&normals).unwrap();

    let before = cloud.get_bbox().unwrap().unwrap();

    let mut t = nalgebra::Matrix4::identity();
    t[(0, 3)] = 2.0;
    cloud.transform(&t).unwrap();

    let after = cloud.get_bbox().unwrap().unwrap();
    assert!((after.min.x - (before.min.x + 2.0)).abs() < 1e-5);
    assert!((after.max.x - (before.max.x + 2.0)).abs() < 1e-5);

    // Pure translation leaves normals untouched.
    let n_after = cloud.download_normals().unwrap();
    for (a, b) in n_after.iter().zip(normals.iter()) {
        assert!((a - b).norm() < 1e-6);
    }
}

#[test]
fn test_rgbd_construction_filters_depth() {
    let Some(_) = GpuContext::global() else {
        return;
    };
    let intr = gpc_core::CameraIntrinsics::new(500.0, 500.0, 2.0, 2.0, 4, 4);
    let mut depth = vec![0u16; 16];
    depth[5] = 800; // 0.8 m
    depth[6] = 2000; // 2.0 m, past z_max
    let color = vec![128u8; 48];

    let cloud = PointCloud::create_from_rgbd(&depth, &color, &intr, 0.3, 1.5).unwrap();
    assert_eq!(cloud.points_number(), 16);
    assert_eq!(cloud.live_points(), 1);

    let out = cloud.download().unwrap();
    assert_eq!(out[5].property, PointProperty::Active as u32);
    assert_eq!(out[6].property, PointProperty::Invalid as u32);
    assert!((out[5].z - 0.8).abs() < 1e-6);

    // Invalid points are excluded from the filters.
    let down = cloud.voxel_grid_down_sample(0.05).unwrap();
    assert_eq!(down.points_number(), 1);
}

#[test]
fn test_download_roundtrip() {
    let Some(_) = GpuContext::global() else {
        return;
    };
    let points = random_cloud(41, 123);
    let cloud = PointCloud::create_from_host(&points).unwrap();
    assert_eq!(cloud.download().unwrap(), points);
}
