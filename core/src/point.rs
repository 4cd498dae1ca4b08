use nalgebra::{Point3, Vector3};

/// Lifecycle state of a point. `Invalid` points are skipped by every
/// neighbor query and dropped by compacting filters; `Active` and
/// `Inactive` behave identically for queries.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PointProperty {
    Invalid = 0,
    #[default]
    Active = 1,
    Inactive = 2,
}

impl From<u32> for PointProperty {
    fn from(v: u32) -> Self {
        match v {
            1 => PointProperty::Active,
            2 => PointProperty::Inactive,
            _ => PointProperty::Invalid,
        }
    }
}

/// Device-side point layout. Matches the WGSL `Point` struct: a vec3
/// position padded by the property word, then a vec3 colour padded to
/// 32 bytes.
#[repr(C)]
#[derive(Debug, Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
pub struct GpuPoint {
    pub position: [f32; 3],
    pub property: u32,
    pub color: [f32; 3],
    pub _pad: u32,
}

impl GpuPoint {
    pub fn new(position: Point3<f32>, color: Vector3<f32>, property: PointProperty) -> Self {
        Self {
            position: [position.x, position.y, position.z],
            property: property as u32,
            color: [color.x, color.y, color.z],
            _pad: 0,
        }
    }

    pub fn xyz(&self) -> Point3<f32> {
        Point3::new(self.position[0], self.position[1], self.position[2])
    }

    pub fn is_valid(&self) -> bool {
        self.property != PointProperty::Invalid as u32
    }
}

/// Host interchange record: contiguous `(x, y, z, r, g, b, property)`
/// little-endian layout shared with viewers and file loaders. Coordinates
/// are meters in the camera frame, colours in `[0, 1]`.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct HostPoint {
    pub x: f32,
    pub y: f32,
    pub z: f32,
    pub r: f32,
    pub g: f32,
    pub b: f32,
    pub property: u32,
}

impl HostPoint {
    pub fn new(x: f32, y: f32, z: f32, r: f32, g: f32, b: f32) -> Self {
        Self {
            x,
            y,
            z,
            r,
            g,
            b,
            property: PointProperty::Active as u32,
        }
    }

    pub fn xyz(&self) -> Point3<f32> {
        Point3::new(self.x, self.y, self.z)
    }

    pub fn intensity(&self) -> f32 {
        intensity(self.r, self.g, self.b)
    }
}

impl From<GpuPoint> for HostPoint {
    fn from(p: GpuPoint) -> Self {
        Self {
            x: p.position[0],
            y: p.position[1],
            z: p.position[2],
            r: p.color[0],
            g: p.color[1],
            b: p.color[2],
            property: p.property,
        }
    }
}

impl From<HostPoint> for GpuPoint {
    fn from(p: HostPoint) -> Self {
        Self {
            position: [p.x, p.y, p.z],
            property: p.property,
            color: [p.r, p.g, p.b],
            _pad: 0,
        }
    }
}

/// Rec. 709 luma weights, the derived intensity for photometric residuals.
pub const LUMA_R: f32 = 0.2126;
pub const LUMA_G: f32 = 0.7152;
pub const LUMA_B: f32 = 0.0722;

pub fn intensity(r: f32, g: f32, b: f32) -> f32 {
    LUMA_R * r + LUMA_G * g + LUMA_B * b
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_property_roundtrip() {
        for p in [
            PointProperty::Invalid,
            PointProperty::Active,
            PointProperty::Inactive,
        ] {
            assert_eq!(PointProperty::from(p as u32), p);
        }
        assert_eq!(PointProperty::from(17), PointProperty::Invalid);
    }

    #[test]
    fn test_gpu_point_layout() {
        assert_eq!(std::mem::size_of::<GpuPoint>(), 32);
        assert_eq!(std::mem::size_of::<HostPoint>(), 28);
    }

    #[test]
    fn test_intensity_weights() {
        assert!((intensity(1.0, 1.0, 1.0) - 1.0).abs() < 1e-6);
        assert_eq!(intensity(1.0, 0.0, 0.0), LUMA_R);
    }

    #[test]
    fn test_host_gpu_conversion() {
        let h = HostPoint::new(1.0, 2.0, 3.0, 0.5, 0.25, 0.125);
        let g = GpuPoint::from(h);
        assert_eq!(HostPoint::from(g), h);
        assert!(g.is_valid());
    }
}
