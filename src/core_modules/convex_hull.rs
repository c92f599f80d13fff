// THEORY:
// The hull engine refines the chroma filter's coarse guess into a precise shape.
// It takes the labelled components of a filtered frame, keeps only the largest
// few, wraps each in a convex hull and picks the one that looks most like a
// circle, on the assumption that the tracked target is a compact, round blob.
//
// Key architectural principles & algorithm steps:
// 1.  **Size Gate**: Components are ranked by bounding-box area (the row/column
//     tally proxies) and anything below a fraction of the frame area is dropped
//     before any geometry is done.
// 2.  **Monotone Chain**: Hulls are built with Andrew's algorithm over points
//     sorted by (x, y). A turn that is not strictly counter-clockwise
//     (`cross <= 0`) pops the last point, so collinear points never survive. The
//     result is closed: its last point repeats the first.
// 3.  **Diameter Circle**: The "enclosing circle" is the circle whose diameter is
//     the farthest pair of hull vertices. It is an approximation, not a true
//     minimal enclosing circle.
// 4.  **Circularity Error**: The circle's circumference is sampled once per hull
//     vertex. Each sample consumes the nearest unused vertex by Manhattan
//     distance, normalised by the diameter. The mean is the error. Its units are
//     arbitrary and only comparable within one set of candidates.

use crate::core_modules::object::{ObjectDetails, Point, SelectionTally};
use crate::core_modules::object_map::{ObjectMap, labeler};
use crate::core_modules::pixel::{FrameLayout, Yuv};
use std::f64::consts::PI;
use tracing::trace;

/// Fraction of the frame area a component's bounding box must cover to be considered.
pub const RELATIVE_OBJECT_SIZE_THRESHOLD: f64 = 0.025;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Circle {
    pub center_x: f64,
    pub center_y: f64,
    pub radius: f64,
}

/// A closed convex polygon: the last point equals the first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConvexHull {
    /// Label of the component the hull was built from.
    pub id: u32,
    pub points: Vec<Point>,
}

#[inline]
fn cross(origin: Point, a: Point, b: Point) -> i64 {
    let (ox, oy) = (origin.x as i64, origin.y as i64);
    (a.x as i64 - ox) * (b.y as i64 - oy) - (a.y as i64 - oy) * (b.x as i64 - ox)
}

impl ConvexHull {
    /// Andrew's monotone chain over an arbitrary point set.
    pub fn from_points(id: u32, points: &[Point]) -> Self {
        let mut sorted = points.to_vec();
        sorted.sort_unstable();
        sorted.dedup();

        if sorted.len() < 2 {
            return Self { id, points: sorted };
        }

        let mut hull: Vec<Point> = Vec::with_capacity(sorted.len() * 2);

        // Lower hull.
        for &point in &sorted {
            while hull.len() >= 2 && cross(hull[hull.len() - 2], hull[hull.len() - 1], point) <= 0 {
                hull.pop();
            }
            hull.push(point);
        }

        // Upper hull, finishing back on the first point.
        let lower_len = hull.len() + 1;
        for &point in sorted.iter().rev().skip(1) {
            while hull.len() >= lower_len
                && cross(hull[hull.len() - 2], hull[hull.len() - 1], point) <= 0
            {
                hull.pop();
            }
            hull.push(point);
        }

        Self { id, points: hull }
    }

    /// Distinct vertices, without the closing repeat.
    pub fn vertices(&self) -> &[Point] {
        match self.points.len() {
            0 | 1 => &self.points,
            len => &self.points[..len - 1],
        }
    }

    /// Bounding box of the hull. `None` for fewer than two points.
    pub fn dimensions(&self) -> Option<ObjectDetails> {
        if self.points.len() < 2 {
            return None;
        }
        let min_x = self.points.iter().map(|p| p.x).min()?;
        let max_x = self.points.iter().map(|p| p.x).max()?;
        let min_y = self.points.iter().map(|p| p.y).min()?;
        let max_y = self.points.iter().map(|p| p.y).max()?;

        Some(ObjectDetails {
            id: self.id,
            area: self.area().round() as u32,
            width: max_x - min_x,
            height: max_y - min_y,
            center_x: (min_x + max_x) / 2,
            center_y: (min_y + max_y) / 2,
        })
    }

    /// Shoelace area of the closed polygon.
    pub fn area(&self) -> f64 {
        let twice: i64 = self
            .points
            .windows(2)
            .map(|edge| {
                edge[0].x as i64 * edge[1].y as i64 - edge[1].x as i64 * edge[0].y as i64
            })
            .sum();
        twice.abs() as f64 / 2.0
    }

    /// Circle through the two farthest vertices. `None` when all vertices coincide.
    pub fn minimal_enclosing_circle(&self) -> Option<Circle> {
        let vertices = self.vertices();
        let mut farthest: Option<(Point, Point, f64)> = None;

        for (i, a) in vertices.iter().enumerate() {
            for b in &vertices[i + 1..] {
                let dx = a.x as f64 - b.x as f64;
                let dy = a.y as f64 - b.y as f64;
                let distance = (dx * dx + dy * dy).sqrt();
                if farthest.is_none_or(|(_, _, best)| distance > best) {
                    farthest = Some((*a, *b, distance));
                }
            }
        }

        let (a, b, diameter) = farthest.filter(|(_, _, d)| *d > 0.0)?;
        Some(Circle {
            center_x: (a.x as f64 + b.x as f64) / 2.0,
            center_y: (a.y as f64 + b.y as f64) / 2.0,
            radius: diameter / 2.0,
        })
    }

    /// Mean normalised distance between circumference samples and hull vertices.
    /// Lower means rounder.
    pub fn circularity_error(&self) -> Option<f64> {
        let circle = self.minimal_enclosing_circle()?;
        let diameter = circle.radius * 2.0;
        let mut remaining = self.vertices().to_vec();
        let count = remaining.len();
        let step = 2.0 * PI / count as f64;
        let mut error = 0.0;

        for k in 0..count {
            let angle = k as f64 * step;
            let sample_x = circle.center_x + circle.radius * angle.cos();
            let sample_y = circle.center_y + circle.radius * angle.sin();

            let (index, distance) = remaining
                .iter()
                .map(|p| (p.x as f64 - sample_x).abs() + (p.y as f64 - sample_y).abs())
                .enumerate()
                .min_by(|a, b| a.1.total_cmp(&b.1))?;
            remaining.swap_remove(index);
            error += distance / diameter;
        }

        Some(error / count as f64)
    }

    /// Whether a coarse estimate's centre sits inside the hull's bounding box.
    pub fn contains_center(&self, object: &ObjectDetails) -> bool {
        let Some(hull) = self.dimensions() else {
            return false;
        };
        let dx = (hull.center_x as f64 - object.center_x as f64).abs();
        let dy = (hull.center_y as f64 - object.center_y as f64).abs();
        dx <= hull.width as f64 / 2.0 && dy <= hull.height as f64 / 2.0
    }

    /// Draws the outline onto a frame.
    pub fn draw(&self, frame: &mut [u8], layout: &FrameLayout, colour: Yuv) {
        for edge in self.points.windows(2) {
            layout.draw_line(
                frame,
                (edge[0].x as i64, edge[0].y as i64),
                (edge[1].x as i64, edge[1].y as i64),
                colour,
            );
        }
    }
}

/// Pixel coordinates of every component, indexed by `label - 1`, in scan order.
pub fn component_points(map: &ObjectMap, count: usize) -> Vec<Vec<Point>> {
    let mut components = vec![Vec::new(); count];
    for y in 0..map.height {
        for x in 0..map.width {
            let label = map.label(x, y) as usize;
            if label != 0 && label <= count {
                components[label - 1].push(Point::new(x as u32, y as u32));
            }
        }
    }
    components
}

/// Row/column tally estimate for one component's points.
fn details_of(id: u32, points: &[Point]) -> Option<ObjectDetails> {
    let min_x = points.iter().map(|p| p.x).min()?;
    let max_x = points.iter().map(|p| p.x).max()?;
    let min_y = points.iter().map(|p| p.y).min()?;
    let max_y = points.iter().map(|p| p.y).max()?;

    let mut tally = SelectionTally::new(
        min_x,
        min_y,
        (max_x - min_x + 1) as usize,
        (max_y - min_y + 1) as usize,
    );
    for point in points {
        tally.add(point.x, point.y);
    }
    tally.estimate(id)
}

/// One estimate per component, in label order.
pub fn extract_object_details(components: &[Vec<Point>]) -> Vec<ObjectDetails> {
    components
        .iter()
        .enumerate()
        .filter_map(|(index, points)| details_of(index as u32 + 1, points))
        .collect()
}

/// Ids of the objects whose `width * height` reaches `min_size`, largest first.
pub fn resolve_large_object_ids(mut objects: Vec<ObjectDetails>, min_size: u64) -> Vec<u32> {
    let size = |o: &ObjectDetails| o.width as u64 * o.height as u64;
    objects.sort_by(|a, b| size(b).cmp(&size(a)));
    objects
        .into_iter()
        .filter(|o| size(o) >= min_size)
        .map(|o| o.id)
        .collect()
}

/// Hulls of at most `max_candidates` of the largest components of a filtered frame.
pub fn extract_convex_hulls_of_largest_objects(
    frame: &[u8],
    layout: &FrameLayout,
    max_candidates: usize,
    relative_size: f64,
) -> Vec<ConvexHull> {
    let mut map = labeler::build_object_map(frame, layout);
    let count = labeler::compact(&mut map);
    if count == 0 {
        return Vec::new();
    }

    let components = component_points(&map, count);
    let min_size = (layout.width as f64 * layout.height as f64 * relative_size) as u64;
    let ids = resolve_large_object_ids(extract_object_details(&components), min_size);
    trace!(count, large = ids.len(), "labelled components");

    ids.into_iter()
        .take(max_candidates)
        .map(|id| ConvexHull::from_points(id, &components[id as usize - 1]))
        .collect()
}

/// The candidate with the lowest circularity error. Degenerate hulls never win.
pub fn convex_hull_closest_to_circle(hulls: Vec<ConvexHull>) -> Option<ConvexHull> {
    hulls
        .into_iter()
        .filter_map(|hull| hull.circularity_error().map(|error| (hull, error)))
        .min_by(|a, b| a.1.total_cmp(&b.1))
        .map(|(hull, error)| {
            trace!(id = hull.id, error, "most circular hull");
            hull
        })
}

/// Labels, hulls and scores a filtered frame in one go.
pub fn best_circular_hull(
    frame: &[u8],
    layout: &FrameLayout,
    max_candidates: usize,
    relative_size: f64,
) -> Option<ConvexHull> {
    convex_hull_closest_to_circle(extract_convex_hulls_of_largest_objects(
        frame,
        layout,
        max_candidates,
        relative_size,
    ))
}
