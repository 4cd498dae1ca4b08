//! PCD (Point Cloud Data) I/O, ASCII variant. Binary and compressed PCD
//! are out of scope.

use std::io::{BufRead, Write};

use rayon::prelude::*;

use gpc_core::HostPoint;

use crate::{Error, Result};

#[derive(Debug, Clone)]
enum PcdData {
    Ascii,
    Binary,
    BinaryCompressed,
}

/// Read an ASCII PCD stream. Understands `x y z` plus optional `r g b`
/// (float in [0,1]) and `property` columns.
pub fn read_pcd<R: BufRead>(reader: R) -> Result<Vec<HostPoint>> {
    let mut lines = reader.lines();

    let mut fields: Vec<String> = Vec::new();
    let mut width = 0usize;
    let mut height = 1usize;
    let mut points_count = 0usize;
    let mut data_format = PcdData::Ascii;
    let mut in_header = true;

    while in_header {
        let line = lines
            .next()
            .ok_or_else(|| Error::IoError("unexpected EOF in PCD header".to_string()))??;
        let line = line.trim();

        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let parts: Vec<&str> = line.split_whitespace().collect();
        match parts[0] {
            "FIELDS" => {
                fields = parts[1..].iter().map(|s| s.to_string()).collect();
            }
            "WIDTH" => {
                width = parts.get(1).and_then(|s| s.parse().ok()).unwrap_or(0);
            }
            "HEIGHT" => {
                height = parts.get(1).and_then(|s| s.parse().ok()).unwrap_or(1);
            }
            "POINTS" => {
                points_count = parts.get(1).and_then(|s| s.parse().ok()).unwrap_or(0);
            }
            "DATA" => {
                data_format = match parts.get(1).copied() {
                    Some("binary") => PcdData::Binary,
                    Some("binary_compressed") => PcdData::BinaryCompressed,
                    _ => PcdData::Ascii,
                };
                in_header = false;
            }
            _ => {}
        }
    }

    if points_count == 0 {
        points_count = width * height;
    }
    match data_format {
        PcdData::Ascii => {}
        PcdData::Binary | PcdData::BinaryCompressed => {
            return Err(Error::IoError(
                "only ASCII PCD data is supported".to_string(),
            ));
        }
    }

    let xi = field_index(&fields, "x")?;
    let yi = field_index(&fields, "y")?;
    let zi = field_index(&fields, "z")?;
    let ri = fields.iter().position(|f| f == "r");
    let gi = fields.iter().position(|f| f == "g");
    let bi = fields.iter().position(|f| f == "b");
    let pi = fields.iter().position(|f| f == "property");

    let rows: Vec<String> = lines
        .take(points_count)
        .collect::<std::io::Result<Vec<_>>>()?;
    if rows.len() != points_count {
        return Err(Error::IoError(format!(
            "PCD body has {} rows, header promised {}",
            rows.len(),
            points_count
        )));
    }

    rows.par_iter()
        .map(|row| {
            let cols: Vec<&str> = row.split_whitespace().collect();
            let get = |idx: usize| -> Result<f32> {
                cols.get(idx)
                    .ok_or_else(|| Error::IoError(format!("short PCD row: {}", row)))?
                    .parse()
                    .map_err(|_| Error::IoError(format!("bad float in PCD row: {}", row)))
            };
            let mut p = HostPoint::new(get(xi)?, get(yi)?, get(zi)?, 0.0, 0.0, 0.0);
            if let (Some(r), Some(g), Some(b)) = (ri, gi, bi) {
                p.r = get(r)?;
                p.g = get(g)?;
                p.b = get(b)?;
            }
            if let Some(prop) = pi {
                p.property = get(prop)? as u32;
            }
            Ok(p)
        })
        .collect()
}

fn field_index(fields: &[String], name: &str) -> Result<usize> {
    fields
        .iter()
        .position(|f| f == name)
        .ok_or_else(|| Error::IoError(format!("PCD header lacks required field '{}'", name)))
}

/// Write an ASCII PCD stream with `x y z r g b property` columns.
pub fn write_pcd<W: Write>(writer: &mut W, points: &[HostPoint]) -> Result<()> {
    writeln!(writer, "# .PCD v0.7 - Point Cloud Data file format")?;
    writeln!(writer, "VERSION 0.7")?;
    writeln!(writer, "FIELDS x y z r g b property")?;
    writeln!(writer, "SIZE 4 4 4 4 4 4 4")?;
    writeln!(writer, "TYPE F F F F F F U")?;
    writeln!(writer, "COUNT 1 1 1 1 1 1 1")?;
    writeln!(writer, "WIDTH {}", points.len())?;
    writeln!(writer, "HEIGHT 1")?;
    writeln!(writer, "VIEWPOINT 0 0 0 1 0 0 0")?;
    writeln!(writer, "POINTS {}", points.len())?;
    writeln!(writer, "DATA ascii")?;

    for p in points {
        writeln!(
            writer,
            "{} {} {} {} {} {} {}",
            p.x, p.y, p.z, p.r, p.g, p.b, p.property
        )?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use gpc_core::PointProperty;
    use std::io::BufReader;

    #[test]
    fn test_pcd_roundtrip() {
        let points = vec![
            HostPoint::new(0.0, 1.0, 2.0, 0.5, 0.25, 1.0),
            HostPoint {
                property: PointProperty::Inactive as u32,
                ..HostPoint::new(-1.0, -2.0, -3.0, 0.0, 0.0, 0.0)
            },
        ];

        let mut buf = Vec::new();
        write_pcd(&mut buf, &points).unwrap();
        let loaded = read_pcd(BufReader::new(buf.as_slice())).unwrap();

        assert_eq!(loaded, points);
    }

    #[test]
    fn test_pcd_positions_only() {
        let src = "VERSION 0.7\nFIELDS x y z\nWIDTH 2\nHEIGHT 1\nDATA ascii\n1 2 3\n4 5 6\n";
        let loaded = read_pcd(BufReader::new(src.as_bytes())).unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[1].z, 6.0);
        assert_eq!(loaded[0].property, PointProperty::Active as u32);
    }

    #[test]
    fn test_pcd_rejects_binary() {
        let src = "FIELDS x y z\nWIDTH 1\nDATA binary\n";
        assert!(read_pcd(BufReader::new(src.as_bytes())).is_err());
    }
}
