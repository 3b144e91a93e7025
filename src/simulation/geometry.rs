//! Line-of-sight occlusion tests for scenario obstacles.
//!
//! A transmission reaches a receiver only when the straight segment between
//! them crosses no obstacle. Rectangles are axis-aligned; circles use a
//! closest-point-on-segment distance test. The segment-segment case handles
//! collinear overlap, which matters for nodes placed exactly on an
//! obstacle's edge line.

use super::types::{CircleShape, Obstacle, Point, RectShape};

/// True when any obstacle blocks the segment between `a` and `b`.
pub fn line_of_sight_blocked(a: &Point, b: &Point, obstacles: &[Obstacle]) -> bool {
    if a == b {
        // Degenerate segment: a node inside an obstacle is considered blocked.
        return obstacles.iter().any(|obstacle| match obstacle {
            Obstacle::Rectangle { shape } => point_in_rect(a, shape),
            Obstacle::Circle { shape } => point_in_circle(a, shape),
        });
    }
    obstacles.iter().any(|obstacle| match obstacle {
        Obstacle::Rectangle { shape } => segment_hits_rect(a, b, shape),
        Obstacle::Circle { shape } => segment_hits_circle(a, b, shape),
    })
}

fn rect_bounds(rect: &RectShape) -> (f64, f64, f64, f64) {
    (
        rect.top_left.x.min(rect.bottom_right.x),
        rect.top_left.x.max(rect.bottom_right.x),
        rect.top_left.y.min(rect.bottom_right.y),
        rect.top_left.y.max(rect.bottom_right.y),
    )
}

fn point_in_rect(p: &Point, rect: &RectShape) -> bool {
    let (left, right, top, bottom) = rect_bounds(rect);
    p.x >= left && p.x <= right && p.y >= top && p.y <= bottom
}

fn point_in_circle(p: &Point, circle: &CircleShape) -> bool {
    let dx = p.x - circle.center.x;
    let dy = p.y - circle.center.y;
    dx * dx + dy * dy <= circle.radius * circle.radius
}

fn segment_hits_rect(a: &Point, b: &Point, rect: &RectShape) -> bool {
    if point_in_rect(a, rect) || point_in_rect(b, rect) {
        return true;
    }
    let (left, right, top, bottom) = rect_bounds(rect);
    let corners = [
        Point { x: left, y: top },
        Point { x: right, y: top },
        Point { x: right, y: bottom },
        Point { x: left, y: bottom },
    ];
    (0..4).any(|i| segments_cross(a, b, &corners[i], &corners[(i + 1) % 4]))
}

fn segment_hits_circle(a: &Point, b: &Point, circle: &CircleShape) -> bool {
    let dx = b.x - a.x;
    let dy = b.y - a.y;
    let len2 = dx * dx + dy * dy;
    let t = if len2 == 0.0 {
        0.0
    } else {
        (((circle.center.x - a.x) * dx + (circle.center.y - a.y) * dy) / len2).clamp(0.0, 1.0)
    };
    let closest = Point { x: a.x + t * dx, y: a.y + t * dy };
    point_in_circle(&closest, circle)
}

/// Orientation of the ordered triple: positive clockwise, negative
/// counter-clockwise, zero collinear.
fn orientation(a: &Point, b: &Point, c: &Point) -> i32 {
    let v = (b.y - a.y) * (c.x - b.x) - (b.x - a.x) * (c.y - b.y);
    if v > 0.0 {
        1
    } else if v < 0.0 {
        -1
    } else {
        0
    }
}

fn within_bounds(a: &Point, p: &Point, b: &Point) -> bool {
    p.x >= a.x.min(b.x) && p.x <= a.x.max(b.x) && p.y >= a.y.min(b.y) && p.y <= a.y.max(b.y)
}

fn segments_cross(p1: &Point, q1: &Point, p2: &Point, q2: &Point) -> bool {
    let o1 = orientation(p1, q1, p2);
    let o2 = orientation(p1, q1, q2);
    let o3 = orientation(p2, q2, p1);
    let o4 = orientation(p2, q2, q1);

    if o1 != o2 && o3 != o4 {
        return true;
    }
    (o1 == 0 && within_bounds(p1, p2, q1))
        || (o2 == 0 && within_bounds(p1, q2, q1))
        || (o3 == 0 && within_bounds(p2, p1, q2))
        || (o4 == 0 && within_bounds(p2, q1, q2))
}
