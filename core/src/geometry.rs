use nalgebra::{Point3, Vector3};

/// Axis-aligned bounding box over the live points of a cloud.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Aabb {
    pub min: Point3<f32>,
    pub max: Point3<f32>,
}

impl Aabb {
    pub fn new(min: Point3<f32>, max: Point3<f32>) -> Self {
        Self { min, max }
    }

    /// Grow to contain `p`.
    pub fn extend(&mut self, p: &Point3<f32>) {
        self.min = Point3::from(self.min.coords.inf(&p.coords));
        self.max = Point3::from(self.max.coords.sup(&p.coords));
    }

    pub fn from_points<'a, I: IntoIterator<Item = &'a Point3<f32>>>(points: I) -> Option<Self> {
        let mut iter = points.into_iter();
        let first = iter.next()?;
        let mut aabb = Aabb::new(*first, *first);
        for p in iter {
            aabb.extend(p);
        }
        Some(aabb)
    }

    pub fn extent(&self) -> Vector3<f32> {
        self.max - self.min
    }

    pub fn center(&self) -> Point3<f32> {
        Point3::from((self.min.coords + self.max.coords) * 0.5)
    }

    /// Per-axis cell counts for a grid of the given cell size anchored at
    /// `min`. Points exactly on the upper boundary land in the last cell.
    pub fn grid_dims(&self, cell: f32) -> [u32; 3] {
        let e = self.extent();
        [
            (e.x / cell).floor() as u32 + 1,
            (e.y / cell).floor() as u32 + 1,
            (e.z / cell).floor() as u32 + 1,
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_points() {
        let pts = [
            Point3::new(0.0, 1.0, -1.0),
            Point3::new(2.0, -3.0, 0.5),
            Point3::new(1.0, 0.0, 0.0),
        ];
        let aabb = Aabb::from_points(pts.iter()).unwrap();
        assert_eq!(aabb.min, Point3::new(0.0, -3.0, -1.0));
        assert_eq!(aabb.max, Point3::new(2.0, 1.0, 0.5));
        assert!(Aabb::from_points(Vec::<Point3<f32>>::new().iter()).is_none());
    }

    #[test]
    fn test_grid_dims() {
        let aabb = Aabb::new(Point3::origin(), Point3::new(1.0, 0.5, 0.0));
        assert_eq!(aabb.grid_dims(0.5), [3, 2, 1]);
    }
}
