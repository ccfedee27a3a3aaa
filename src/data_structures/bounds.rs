/// Axis-aligned bounds tracking for geometry and point clouds
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bounds {
    pub min: [f64; 3],
    pub max: [f64; 3],
}

impl Bounds {
    /// Create new bounds initialised to infinity values
    pub fn new() -> Self {
        Self {
            min: [f64::INFINITY; 3],
            max: [f64::NEG_INFINITY; 3],
        }
    }

    pub fn from_points<I: IntoIterator<Item = [f64; 3]>>(points: I) -> Self {
        let mut bounds = Self::new();
        for p in points {
            bounds.update(p[0], p[1], p[2]);
        }
        bounds
    }

    /// Update bounds with a new point
    pub fn update(&mut self, x: f64, y: f64, z: f64) {
        for (axis, v) in [x, y, z].into_iter().enumerate() {
            self.min[axis] = self.min[axis].min(v);
            self.max[axis] = self.max[axis].max(v);
        }
    }

    pub fn union(&mut self, other: &Bounds) {
        if other.is_empty() {
            return;
        }
        self.update(other.min[0], other.min[1], other.min[2]);
        self.update(other.max[0], other.max[1], other.max[2]);
    }

    /// No point was ever added.
    pub fn is_empty(&self) -> bool {
        self.min[0] > self.max[0]
    }

    /// World space dimensions
    pub fn dimensions(&self) -> [f64; 3] {
        if self.is_empty() {
            return [0.0; 3];
        }
        [
            self.max[0] - self.min[0],
            self.max[1] - self.min[1],
            self.max[2] - self.min[2],
        ]
    }

    pub fn max_dimension(&self) -> f64 {
        let [x, y, z] = self.dimensions();
        x.max(y).max(z)
    }

    pub fn center(&self) -> [f64; 3] {
        if self.is_empty() {
            return [0.0; 3];
        }
        [
            (self.min[0] + self.max[0]) * 0.5,
            (self.min[1] + self.max[1]) * 0.5,
            (self.min[2] + self.max[2]) * 0.5,
        ]
    }

    /// Normalise a coordinate on `axis` to the 0-1 range (0.5 when flat)
    pub fn normalize(&self, axis: usize, v: f64) -> f32 {
        let span = self.max[axis] - self.min[axis];
        if span <= 0.0 || !span.is_finite() {
            return 0.5;
        }
        ((v - self.min[axis]) / span).clamp(0.0, 1.0) as f32
    }

    /// Whether the bounds look like longitude/latitude degrees rather than meters.
    ///
    /// Two patterns are recognised: a standard lon/lat window spanning less than
    /// ten degrees, and the swapped layout some scanners emit where X/Y hold
    /// sub-degree offsets and Z holds the latitude.
    pub fn looks_geographic(&self) -> bool {
        if self.is_empty() {
            return false;
        }
        let [x_range, y_range, _] = self.dimensions();
        let in_range = |v: f64, limit: f64| (-limit..=limit).contains(&v);
        let swapped = x_range < 1.0
            && y_range < 1.0
            && (20.0..=70.0).contains(&self.min[2])
            && (20.0..=70.0).contains(&self.max[2]);
        let standard = in_range(self.min[0], 180.0)
            && in_range(self.max[0], 180.0)
            && in_range(self.min[1], 90.0)
            && in_range(self.max[1], 90.0)
            && x_range < 10.0
            && y_range < 10.0;
        swapped || standard
    }
}

impl Default for Bounds {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_bounds_have_no_extent() {
        let bounds = Bounds::new();
        assert!(bounds.is_empty());
        assert_eq!(bounds.max_dimension(), 0.0);
        assert_eq!(bounds.center(), [0.0; 3]);
    }

    #[test]
    fn tracks_extent_and_center() {
        let bounds = Bounds::from_points([[-1.0, 0.0, 2.0], [3.0, 4.0, 2.0]]);
        assert_eq!(bounds.dimensions(), [4.0, 4.0, 0.0]);
        assert_eq!(bounds.center(), [1.0, 2.0, 2.0]);
        assert_eq!(bounds.normalize(2, 2.0), 0.5);
        assert_eq!(bounds.normalize(0, 3.0), 1.0);
    }

    #[test]
    fn classifies_geographic_extents() {
        let degrees = Bounds::from_points([[126.97, 37.56, 10.0], [126.98, 37.57, 40.0]]);
        assert!(degrees.looks_geographic());

        let swapped = Bounds::from_points([[0.001, 0.002, 37.5], [0.004, 0.005, 37.6]]);
        assert!(swapped.looks_geographic());

        let utm = Bounds::from_points([[312_000.0, 4_150_000.0, 10.0], [312_500.0, 4_150_400.0, 60.0]]);
        assert!(!utm.looks_geographic());
    }
}
