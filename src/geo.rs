//! Geographic primitives and the geofence containment test.
//!
//! Coordinates are WGS84 degrees. Containment treats latitude as the y axis
//! and longitude as the x axis of a plane, which is accurate at the scale of
//! a single golf hole.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::GeometryError;

/// Mean Earth radius (m), IUGG.
pub const EARTH_RADIUS_M: f64 = 6_371_008.8;

/// Tolerance (degrees) for the on-edge test. Roughly 0.1 µm on the ground.
pub const EDGE_EPSILON: f64 = 1e-12;

/// Minimum clearance (degrees) between an agreement sample and the boundary.
const SAMPLE_CLEARANCE: f64 = 1e-9;

/// A WGS84 position in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
}

impl GeoPoint {
    pub const fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    pub fn is_finite(&self) -> bool {
        self.latitude.is_finite() && self.longitude.is_finite()
    }

    /// Great-circle distance in meters (haversine).
    pub fn distance_m(&self, other: &GeoPoint) -> f64 {
        let lat1 = self.latitude.to_radians();
        let lat2 = other.latitude.to_radians();
        let dlat = lat2 - lat1;
        let dlon = (other.longitude - self.longitude).to_radians();

        let h = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
        2.0 * EARTH_RADIUS_M * h.sqrt().min(1.0).asin()
    }

    /// Coordinate-wise comparison within `eps` degrees.
    pub fn approx_eq(&self, other: &GeoPoint, eps: f64) -> bool {
        (self.latitude - other.latitude).abs() <= eps
            && (self.longitude - other.longitude).abs() <= eps
    }
}

impl fmt::Display for GeoPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({:.7}, {:.7})", self.latitude, self.longitude)
    }
}

/// A closed boundary ring. The last vertex connects back to the first.
///
/// Construction guarantees at least 3 finite vertices. Self-intersection is
/// not checked; a self-intersecting ring is a configuration error and its
/// containment result is unspecified.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<GeoPoint>", into = "Vec<GeoPoint>")]
pub struct Polygon {
    vertices: Vec<GeoPoint>,
}

impl Polygon {
    pub fn new(vertices: Vec<GeoPoint>) -> Result<Self, GeometryError> {
        if vertices.len() < 3 {
            return Err(GeometryError::TooFewVertices {
                got: vertices.len(),
            });
        }
        if let Some((index, p)) = vertices.iter().enumerate().find(|(_, p)| !p.is_finite()) {
            return Err(GeometryError::NonFinite {
                index,
                latitude: p.latitude,
                longitude: p.longitude,
            });
        }
        Ok(Self { vertices })
    }

    pub fn vertices(&self) -> &[GeoPoint] {
        &self.vertices
    }

    /// Iterate edges as `(a, b)` pairs, including the closing edge.
    pub fn edges(&self) -> impl Iterator<Item = (GeoPoint, GeoPoint)> + '_ {
        let n = self.vertices.len();
        (0..n).map(move |i| (self.vertices[i], self.vertices[(i + 1) % n]))
    }

    /// Ray-casting parity test. Points on an edge or vertex count as inside.
    pub fn contains(&self, point: GeoPoint) -> bool {
        let (px, py) = (point.longitude, point.latitude);
        let mut inside = false;

        for (a, b) in self.edges() {
            if on_segment(point, a, b) {
                return true;
            }
            let (ax, ay) = (a.longitude, a.latitude);
            let (bx, by) = (b.longitude, b.latitude);
            // Half-open rule on y: each vertex is counted for exactly one of
            // its two edges, so rays through vertices are not double counted.
            if (ay > py) != (by > py) {
                let x_cross = ax + (py - ay) * (bx - ax) / (by - ay);
                if px < x_cross {
                    inside = !inside;
                }
            }
        }
        inside
    }

    /// Whether `point` lies on an edge or vertex, with a wider tolerance than
    /// [`Polygon::contains`] uses.
    fn touches_boundary(&self, point: GeoPoint) -> bool {
        self.edges().any(|(a, b)| on_segment_within(point, a, b, SAMPLE_CLEARANCE))
    }

    /// Arithmetic mean of the vertices.
    pub fn vertex_centroid(&self) -> GeoPoint {
        let n = self.vertices.len() as f64;
        let (lat, lon) = self
            .vertices
            .iter()
            .fold((0.0, 0.0), |(lat, lon), p| (lat + p.latitude, lon + p.longitude));
        GeoPoint::new(lat / n, lon / n)
    }

    /// `(min, max)` corners of the bounding box.
    pub fn bounding_box(&self) -> (GeoPoint, GeoPoint) {
        let first = self.vertices[0];
        self.vertices.iter().skip(1).fold((first, first), |(lo, hi), p| {
            (
                GeoPoint::new(lo.latitude.min(p.latitude), lo.longitude.min(p.longitude)),
                GeoPoint::new(hi.latitude.max(p.latitude), hi.longitude.max(p.longitude)),
            )
        })
    }
}

impl TryFrom<Vec<GeoPoint>> for Polygon {
    type Error = GeometryError;

    fn try_from(vertices: Vec<GeoPoint>) -> Result<Self, Self::Error> {
        Self::new(vertices)
    }
}

impl From<Polygon> for Vec<GeoPoint> {
    fn from(p: Polygon) -> Self {
        p.vertices
    }
}

/// Free-function form of [`Polygon::contains`].
pub fn contains(point: GeoPoint, polygon: &Polygon) -> bool {
    polygon.contains(point)
}

fn on_segment(p: GeoPoint, a: GeoPoint, b: GeoPoint) -> bool {
    on_segment_within(p, a, b, EDGE_EPSILON)
}

fn on_segment_within(p: GeoPoint, a: GeoPoint, b: GeoPoint, eps: f64) -> bool {
    let (px, py) = (p.longitude, p.latitude);
    let (ax, ay) = (a.longitude, a.latitude);
    let (bx, by) = (b.longitude, b.latitude);

    let cross = (bx - ax) * (py - ay) - (by - ay) * (px - ax);
    if cross.abs() > eps {
        return false;
    }
    px >= ax.min(bx) - eps
        && px <= ax.max(bx) + eps
        && py >= ay.min(by) - eps
        && py <= ay.max(by) + eps
}

// ---------------------------------------------------------------------------
// Evaluator consistency
// ---------------------------------------------------------------------------

/// Anything that answers inside/outside for a point against one hole.
///
/// The rendering surface runs its own copy of the containment test; wrap it
/// in this trait to check it against the core before a round starts.
pub trait ContainmentEvaluator {
    fn evaluate(&self, point: GeoPoint) -> bool;
}

impl ContainmentEvaluator for Polygon {
    fn evaluate(&self, point: GeoPoint) -> bool {
        self.contains(point)
    }
}

impl<F> ContainmentEvaluator for F
where
    F: Fn(GeoPoint) -> bool,
{
    fn evaluate(&self, point: GeoPoint) -> bool {
        self(point)
    }
}

/// Fixed sample set for [`verify_agreement`].
///
/// Vertex centroid, edge midpoints pulled toward the centroid, and the four
/// corners of the bounding box pushed out by its own size. Exact boundary
/// points are left out: evaluators may legitimately differ there. A pulled
/// midpoint that lands on another edge (concave rings) is pulled further,
/// and dropped if it never clears the boundary.
pub fn sample_points(polygon: &Polygon) -> Vec<GeoPoint> {
    let c = polygon.vertex_centroid();
    let mut samples = Vec::new();
    if !polygon.touches_boundary(c) {
        samples.push(c);
    }

    for (a, b) in polygon.edges() {
        let mid = GeoPoint::new((a.latitude + b.latitude) / 2.0, (a.longitude + b.longitude) / 2.0);
        let pulled = [0.1, 0.2, 0.3, 0.4]
            .into_iter()
            .map(|t| {
                GeoPoint::new(
                    mid.latitude + (c.latitude - mid.latitude) * t,
                    mid.longitude + (c.longitude - mid.longitude) * t,
                )
            })
            .find(|p| !polygon.touches_boundary(*p));
        samples.extend(pulled);
    }

    let (lo, hi) = polygon.bounding_box();
    let dlat = (hi.latitude - lo.latitude).max(1e-6);
    let dlon = (hi.longitude - lo.longitude).max(1e-6);
    samples.extend([
        GeoPoint::new(lo.latitude - dlat, lo.longitude - dlon),
        GeoPoint::new(lo.latitude - dlat, hi.longitude + dlon),
        GeoPoint::new(hi.latitude + dlat, lo.longitude - dlon),
        GeoPoint::new(hi.latitude + dlat, hi.longitude + dlon),
    ]);
    samples
}

/// Check that `external` agrees with the core test on every sample point.
pub fn verify_agreement(
    polygon: &Polygon,
    external: &impl ContainmentEvaluator,
    samples: &[GeoPoint],
) -> Result<(), GeometryError> {
    for &point in samples {
        let core = polygon.contains(point);
        let ext = external.evaluate(point);
        if core != ext {
            return Err(GeometryError::EvaluatorMismatch {
                point,
                core,
                external: ext,
            });
        }
    }
    Ok(())
}
