//! ASCII PLY reader/writer for `x y z`, 8-bit colour, and optional normals.

use std::io::{BufRead, Write};

use nalgebra::Vector3;

use gpc_core::HostPoint;

use crate::{Error, Result};

/// A host cloud as loaded from PLY: interchange records plus the optional
/// normal array.
#[derive(Debug, Clone, Default)]
pub struct PlyCloud {
    pub points: Vec<HostPoint>,
    pub normals: Option<Vec<Vector3<f32>>>,
}

pub fn write_ply<W: Write>(
    writer: &mut W,
    points: &[HostPoint],
    normals: Option<&[Vector3<f32>]>,
) -> Result<()> {
    if let Some(n) = normals {
        if n.len() != points.len() {
            return Err(Error::invalid_argument(format!(
                "{} normals for {} points",
                n.len(),
                points.len()
            )));
        }
    }

    writeln!(writer, "ply")?;
    writeln!(writer, "format ascii 1.0")?;
    writeln!(writer, "element vertex {}", points.len())?;
    writeln!(writer, "property float x")?;
    writeln!(writer, "property float y")?;
    writeln!(writer, "property float z")?;
    writeln!(writer, "property uchar red")?;
    writeln!(writer, "property uchar green")?;
    writeln!(writer, "property uchar blue")?;
    if normals.is_some() {
        writeln!(writer, "property float nx")?;
        writeln!(writer, "property float ny")?;
        writeln!(writer, "property float nz")?;
    }
    writeln!(writer, "end_header")?;

    for (i, p) in points.iter().enumerate() {
        let r = (p.r * 255.0).clamp(0.0, 255.0) as u8;
        let g = (p.g * 255.0).clamp(0.0, 255.0) as u8;
        let b = (p.b * 255.0).clamp(0.0, 255.0) as u8;
        write!(writer, "{} {} {} {} {} {}", p.x, p.y, p.z, r, g, b)?;
        if let Some(ns) = normals {
            let n = ns[i];
            write!(writer, " {} {} {}", n.x, n.y, n.z)?;
        }
        writeln!(writer)?;
    }
    Ok(())
}

pub fn read_ply<R: BufRead>(reader: R) -> Result<PlyCloud> {
    let mut lines = reader.lines();

    let mut vertex_count = 0usize;
    let mut has_colors = false;
    let mut has_normals = false;
    let mut header_ended = false;

    for line in lines.by_ref() {
        let line = line?;
        if line.starts_with("element vertex") {
            let parts: Vec<&str> = line.split_whitespace().collect();
            if parts.len() >= 3 {
                vertex_count = parts[2].parse().unwrap_or(0);
            }
        } else if line.contains("property uchar red") {
            has_colors = true;
        } else if line.contains("property float nx") {
            has_normals = true;
        } else if line.trim() == "end_header" {
            header_ended = true;
            break;
        }
    }
    if !header_ended {
        return Err(Error::IoError("PLY header not found".to_string()));
    }

    let mut points = Vec::with_capacity(vertex_count);
    let mut normals = has_normals.then(|| Vec::with_capacity(vertex_count));

    for _ in 0..vertex_count {
        let line = lines
            .next()
            .ok_or_else(|| Error::IoError("unexpected EOF in PLY body".to_string()))??;
        let mut parts = line.split_whitespace();
        let mut next_f32 = || -> Result<f32> {
            parts
                .next()
                .ok_or_else(|| Error::IoError(format!("short PLY row: {}", line)))?
                .parse()
                .map_err(|_| Error::IoError(format!("bad number in PLY row: {}", line)))
        };

        let x = next_f32()?;
        let y = next_f32()?;
        let z = next_f32()?;
        let (r, g, b) = if has_colors {
            (
                next_f32()? / 255.0,
                next_f32()? / 255.0,
                next_f32()? / 255.0,
            )
        } else {
            (0.0, 0.0, 0.0)
        };
        points.push(HostPoint::new(x, y, z, r, g, b));

        if let Some(ns) = &mut normals {
            ns.push(Vector3::new(next_f32()?, next_f32()?, next_f32()?));
        }
    }

    Ok(PlyCloud { points, normals })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::BufReader;

    #[test]
    fn test_ply_roundtrip_with_normals() {
        let points = vec![
            HostPoint::new(0.0, 0.0, 0.0, 1.0, 0.0, 0.0),
            HostPoint::new(1.0, 1.0, 1.0, 0.0, 1.0, 0.0),
        ];
        let normals = vec![Vector3::new(0.0, 0.0, 1.0), Vector3::new(1.0, 0.0, 0.0)];

        let mut buf = Vec::new();
        write_ply(&mut buf, &points, Some(&normals)).unwrap();
        let loaded = read_ply(BufReader::new(buf.as_slice())).unwrap();

        assert_eq!(loaded.points.len(), 2);
        assert_eq!(loaded.normals.as_ref().unwrap()[0].z, 1.0);
        assert!((loaded.points[0].r - 1.0).abs() < 1.0 / 255.0);
        assert_eq!(loaded.points[1].y, 1.0);
    }

    #[test]
    fn test_ply_without_normals() {
        let points = vec![HostPoint::new(2.0, 3.0, 4.0, 0.0, 0.0, 0.0)];
        let mut buf = Vec::new();
        write_ply(&mut buf, &points, None).unwrap();
        let loaded = read_ply(BufReader::new(buf.as_slice())).unwrap();
        assert!(loaded.normals.is_none());
        assert_eq!(loaded.points[0].x, 2.0);
    }

    #[test]
    fn test_ply_normal_length_mismatch() {
        let points = vec![HostPoint::new(0.0, 0.0, 0.0, 0.0, 0.0, 0.0)];
        let normals = vec![Vector3::zeros(), Vector3::zeros()];
        let mut buf = Vec::new();
        assert!(write_ply(&mut buf, &points, Some(&normals)).is_err());
    }
}
