//! Axis-aligned bounding boxes and the half-space classification used by
//! both the SAH builder and the hull query (spec §3, §4.4, §4.5).

use cgmath::{Matrix4, Point3, Transform, Vector4};

/// `(xmin, xmax, ymin, ymax, zmin, zmax)`, matching the original's
/// `float bbox[6]` layout so the `PositiveProduct`-style corner order below
/// lines up with `original_source/mesh.cpp`'s `Query(BSP*, int planes, ...)`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Aabb {
    pub xmin: f32,
    pub xmax: f32,
    pub ymin: f32,
    pub ymax: f32,
    pub zmin: f32,
    pub zmax: f32,
}

impl Aabb {
    pub const EMPTY: Aabb = Aabb {
        xmin: f32::MAX,
        xmax: f32::MIN,
        ymin: f32::MAX,
        ymax: f32::MIN,
        zmin: f32::MAX,
        zmax: f32::MIN,
    };

    pub fn from_point(p: Point3<f32>) -> Self {
        Aabb {
            xmin: p.x,
            xmax: p.x,
            ymin: p.y,
            ymax: p.y,
            zmin: p.z,
            zmax: p.z,
        }
    }

    /// Extends this box to also enclose `p`.
    pub fn extend(&mut self, p: Point3<f32>) {
        self.xmin = self.xmin.min(p.x);
        self.xmax = self.xmax.max(p.x);
        self.ymin = self.ymin.min(p.y);
        self.ymax = self.ymax.max(p.y);
        self.zmin = self.zmin.min(p.z);
        self.zmax = self.zmax.max(p.z);
    }

    pub fn union(&self, other: &Aabb) -> Aabb {
        Aabb {
            xmin: self.xmin.min(other.xmin),
            xmax: self.xmax.max(other.xmax),
            ymin: self.ymin.min(other.ymin),
            ymax: self.ymax.max(other.ymax),
            zmin: self.zmin.min(other.zmin),
            zmax: self.zmax.max(other.zmax),
        }
    }

    /// The weighted half-surface SAH metric from spec §4.4:
    /// `(Δx·Δy)·height_scale + (Δy·Δz) + (Δz·Δx)`.
    pub fn sah_area(&self, height_scale: f64) -> f64 {
        let dx = (self.xmax - self.xmin) as f64;
        let dy = (self.ymax - self.ymin) as f64;
        let dz = (self.zmax - self.zmin) as f64;
        dx * dy * height_scale + dy * dz + dz * dx
    }

    /// The 8 corners in the fixed order spec §4.5 walks:
    /// `(xmin,ymin,zmin) (xmax,ymin,zmin) (xmax,ymax,zmin) (xmin,ymax,zmin)
    ///  (xmin,ymax,zmax) (xmax,ymax,zmax) (xmax,ymin,zmax) (xmin,ymin,zmax)`.
    pub fn corners(&self) -> [Vector4<f32>; 8] {
        [
            Vector4::new(self.xmin, self.ymin, self.zmin, 1.0),
            Vector4::new(self.xmax, self.ymin, self.zmin, 1.0),
            Vector4::new(self.xmax, self.ymax, self.zmin, 1.0),
            Vector4::new(self.xmin, self.ymax, self.zmin, 1.0),
            Vector4::new(self.xmin, self.ymax, self.zmax, 1.0),
            Vector4::new(self.xmax, self.ymax, self.zmax, 1.0),
            Vector4::new(self.xmax, self.ymin, self.zmax, 1.0),
            Vector4::new(self.xmin, self.ymin, self.zmax, 1.0),
        ]
    }

    /// `true` for an outside corner, `false` for inside, matching
    /// `PositiveProduct(plane, corner)` in the original: `plane` is
    /// `(a,b,c,d)` with `ax+by+cz+d <= 0` meaning "inside".
    pub fn corner_is_outside(plane: [f64; 4], corner: Vector4<f32>) -> bool {
        let value = plane[0] * corner.x as f64
            + plane[1] * corner.y as f64
            + plane[2] * corner.z as f64
            + plane[3];
        value > 0.0
    }

    /// Classifies this box against `plane`: `Outside` if all 8 corners are
    /// outside, `Inside` if all 8 are inside, `Straddling` otherwise.
    pub fn classify(&self, plane: [f64; 4]) -> PlaneSide {
        let mut outside = 0;
        for c in self.corners() {
            if Aabb::corner_is_outside(plane, c) {
                outside += 1;
            }
        }
        if outside == 8 {
            PlaneSide::Outside
        } else if outside == 0 {
            PlaneSide::Inside
        } else {
            PlaneSide::Straddling
        }
    }

    /// Recomputes a world AABB by transforming every point in `points`
    /// through `tm` (spec §4.3, "Transform -> AABB"). Returns `None` if
    /// `points` is empty (the caller must not query an undefined AABB).
    pub fn from_transformed_points<I>(tm: &Matrix4<f64>, points: I) -> Option<Aabb>
    where
        I: IntoIterator<Item = Point3<f64>>,
    {
        let mut iter = points.into_iter();
        let first = iter.next()?;
        let w = tm.transform_point(first);
        let mut bbox = Aabb::from_point(Point3::new(w.x as f32, w.y as f32, w.z as f32));
        for p in iter {
            let w = tm.transform_point(p);
            bbox.extend(Point3::new(w.x as f32, w.y as f32, w.z as f32));
        }
        Some(bbox)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaneSide {
    Outside,
    Inside,
    Straddling,
}
