//! Axis-aligned bounds with a bounding sphere radius.

use glam::Vec3;

/// Box center, half extents and the radius of the sphere enclosing the box.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Bounds {
    pub origin: Vec3,
    pub extents: Vec3,
    pub sphere_radius: f32,
}

impl Bounds {
    pub fn from_min_max(min: Vec3, max: Vec3) -> Self {
        let extents = (max - min) * 0.5;
        Self {
            origin: (max + min) * 0.5,
            extents,
            sphere_radius: extents.length(),
        }
    }

    /// Tight bounds around `points`. An empty set gives zero bounds at the origin.
    pub fn from_points<I>(points: I) -> Self
    where
        I: IntoIterator<Item = Vec3>,
    {
        let mut points = points.into_iter();
        let Some(first) = points.next() else {
            return Self::default();
        };
        let (min, max) = points.fold((first, first), |(min, max), p| (min.min(p), max.max(p)));
        Self::from_min_max(min, max)
    }

    pub fn min(&self) -> Vec3 {
        self.origin - self.extents
    }

    pub fn max(&self) -> Vec3 {
        self.origin + self.extents
    }

    /// The eight box corners.
    pub fn corners(&self) -> [Vec3; 8] {
        let signs = [
            Vec3::new(1.0, 1.0, 1.0),
            Vec3::new(1.0, 1.0, -1.0),
            Vec3::new(1.0, -1.0, 1.0),
            Vec3::new(1.0, -1.0, -1.0),
            Vec3::new(-1.0, 1.0, 1.0),
            Vec3::new(-1.0, 1.0, -1.0),
            Vec3::new(-1.0, -1.0, 1.0),
            Vec3::new(-1.0, -1.0, -1.0),
        ];
        signs.map(|sign| self.origin + sign * self.extents)
    }
}
