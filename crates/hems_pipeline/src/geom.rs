//! Planar polygon math in local meters. Everything here is deterministic
//! pure arithmetic; rings are open (last vertex != first), wound CCW unless
//! stated otherwise.

pub type P2 = [f64; 2];

const EPS: f64 = 1e-9;

#[inline]
pub fn sub(a: P2, b: P2) -> P2 {
    [a[0] - b[0], a[1] - b[1]]
}

#[inline]
pub fn cross(a: P2, b: P2) -> f64 {
    a[0] * b[1] - a[1] * b[0]
}

#[inline]
pub fn dist(a: P2, b: P2) -> f64 {
    let d = sub(a, b);
    (d[0] * d[0] + d[1] * d[1]).sqrt()
}

/// Signed area; positive for counter-clockwise winding.
pub fn signed_area(ring: &[P2]) -> f64 {
    let n = ring.len();
    if n < 3 {
        return 0.0;
    }
    let mut sum = 0.0;
    for i in 0..n {
        let a = ring[i];
        let b = ring[(i + 1) % n];
        sum += cross(a, b);
    }
    sum * 0.5
}

pub fn area(ring: &[P2]) -> f64 {
    signed_area(ring).abs()
}

pub fn centroid(ring: &[P2]) -> P2 {
    let n = ring.len();
    if n == 0 {
        return [0.0, 0.0];
    }
    let a = signed_area(ring);
    if a.abs() < EPS {
        // Collinear/degenerate: fall back to the vertex mean.
        let mut c = [0.0, 0.0];
        for p in ring {
            c[0] += p[0];
            c[1] += p[1];
        }
        return [c[0] / n as f64, c[1] / n as f64];
    }
    let mut c = [0.0, 0.0];
    for i in 0..n {
        let p = ring[i];
        let q = ring[(i + 1) % n];
        let w = cross(p, q);
        c[0] += (p[0] + q[0]) * w;
        c[1] += (p[1] + q[1]) * w;
    }
    [c[0] / (6.0 * a), c[1] / (6.0 * a)]
}

/// Even-odd point-in-polygon test.
pub fn point_in_polygon(ring: &[P2], p: P2) -> bool {
    let n = ring.len();
    let mut inside = false;
    let mut j = n.wrapping_sub(1);
    for i in 0..n {
        let [xi, yi] = ring[i];
        let [xj, yj] = ring[j];
        if (yi > p[1]) != (yj > p[1]) {
            let x_inter = (xj - xi) * ((p[1] - yi) / ((yj - yi) + 1e-20)) + xi;
            if p[0] < x_inter {
                inside = !inside;
            }
        }
        j = i;
    }
    inside
}

/// Proper segment intersection (shared endpoints do not count).
pub fn segments_intersect(p1: P2, p2: P2, p3: P2, p4: P2) -> bool {
    let d1 = cross(sub(p2, p1), sub(p3, p1));
    let d2 = cross(sub(p2, p1), sub(p4, p1));
    let d3 = cross(sub(p4, p3), sub(p1, p3));
    let d4 = cross(sub(p4, p3), sub(p2, p3));
    (d1 * d2 < -EPS) && (d3 * d4 < -EPS)
}

/// True when any two non-adjacent edges of the ring cross.
pub fn is_self_intersecting(ring: &[P2]) -> bool {
    let n = ring.len();
    if n < 4 {
        return false;
    }
    for i in 0..n {
        let a1 = ring[i];
        let a2 = ring[(i + 1) % n];
        for j in (i + 1)..n {
            // Skip adjacent edge pairs (they share a vertex).
            if j == i || (j + 1) % n == i || (i + 1) % n == j {
                continue;
            }
            let b1 = ring[j];
            let b2 = ring[(j + 1) % n];
            if segments_intersect(a1, a2, b1, b2) {
                return true;
            }
        }
    }
    false
}

pub fn ensure_ccw(ring: &mut Vec<P2>) {
    if signed_area(ring) < 0.0 {
        ring.reverse();
    }
}

/// Clip a ring against one directed line a->b, keeping the left side.
fn clip_halfplane(ring: &[P2], a: P2, b: P2, keep_left: bool) -> Vec<P2> {
    let side = |p: P2| {
        let s = cross(sub(b, a), sub(p, a));
        if keep_left {
            s
        } else {
            -s
        }
    };
    let mut out = Vec::with_capacity(ring.len() + 2);
    let n = ring.len();
    for i in 0..n {
        let cur = ring[i];
        let next = ring[(i + 1) % n];
        let s_cur = side(cur);
        let s_next = side(next);
        if s_cur >= -EPS {
            out.push(cur);
        }
        if (s_cur > EPS && s_next < -EPS) || (s_cur < -EPS && s_next > EPS) {
            let t = s_cur / (s_cur - s_next);
            out.push([
                cur[0] + t * (next[0] - cur[0]),
                cur[1] + t * (next[1] - cur[1]),
            ]);
        }
    }
    dedup_ring(&out, 1e-6)
}

/// Sutherland-Hodgman: intersection of a ring with a convex clip ring (CCW).
pub fn clip_to_convex(subject: &[P2], clip: &[P2]) -> Vec<P2> {
    let mut current = subject.to_vec();
    let n = clip.len();
    for i in 0..n {
        if current.len() < 3 {
            return Vec::new();
        }
        current = clip_halfplane(&current, clip[i], clip[(i + 1) % n], true);
    }
    if current.len() < 3 {
        Vec::new()
    } else {
        current
    }
}

/// Subtract a convex CCW ring from a subject ring. Returns the pieces of the
/// subject outside the clip ring: for clip edge i, the part of the subject
/// inside edges 0..i and outside edge i is one piece.
pub fn subtract_convex(subject: &[P2], clip: &[P2]) -> Vec<Vec<P2>> {
    let mut pieces = Vec::new();
    let mut current = subject.to_vec();
    let n = clip.len();
    for i in 0..n {
        if current.len() < 3 {
            break;
        }
        let a = clip[i];
        let b = clip[(i + 1) % n];
        let outside = clip_halfplane(&current, a, b, false);
        if outside.len() >= 3 && area(&outside) > EPS {
            pieces.push(outside);
        }
        current = clip_halfplane(&current, a, b, true);
    }
    pieces
}

/// Andrew monotone chain; returns a CCW hull without the closing vertex.
pub fn convex_hull(points: &[P2]) -> Vec<P2> {
    let mut pts: Vec<P2> = points.to_vec();
    pts.sort_by(|a, b| {
        a[0].partial_cmp(&b[0])
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a[1].partial_cmp(&b[1]).unwrap_or(std::cmp::Ordering::Equal))
    });
    pts.dedup_by(|a, b| dist(*a, *b) < EPS);
    let n = pts.len();
    if n < 3 {
        return pts;
    }
    fn sweep(points: impl Iterator<Item = P2>) -> Vec<P2> {
        let mut chain: Vec<P2> = Vec::new();
        for p in points {
            while chain.len() >= 2 {
                let a = chain[chain.len() - 2];
                let b = chain[chain.len() - 1];
                if cross(sub(b, a), sub(p, b)) <= EPS {
                    chain.pop();
                } else {
                    break;
                }
            }
            chain.push(p);
        }
        chain
    }
    let mut lower = sweep(pts.iter().copied());
    let mut upper = sweep(pts.iter().rev().copied());
    // Each chain's endpoint restarts the other; drop both seams.
    lower.pop();
    upper.pop();
    lower.extend(upper);
    lower
}

/// Drop consecutive vertices closer than `tol` (closing pair included).
pub fn dedup_ring(ring: &[P2], tol: f64) -> Vec<P2> {
    let mut out: Vec<P2> = Vec::with_capacity(ring.len());
    for &p in ring {
        if out.last().map_or(true, |q| dist(*q, p) >= tol) {
            out.push(p);
        }
    }
    while out.len() >= 2 && dist(out[0], *out.last().unwrap()) < tol {
        out.pop();
    }
    out
}

/// Open polyline variant: only consecutive duplicates are dropped.
pub fn dedup_polyline(points: &[P2], tol: f64) -> Vec<P2> {
    let mut out: Vec<P2> = Vec::with_capacity(points.len());
    for &p in points {
        if out.last().map_or(true, |q| dist(*q, p) >= tol) {
            out.push(p);
        }
    }
    out
}

/// Ear-clipping triangulation of a simple CCW ring; returns vertex index
/// triples. Deterministic: ears are searched in ascending vertex order.
pub fn triangulate(ring: &[P2]) -> Vec<[usize; 3]> {
    let n = ring.len();
    if n < 3 {
        return Vec::new();
    }
    let mut indices: Vec<usize> = (0..n).collect();
    let mut tris = Vec::with_capacity(n - 2);

    let is_ear = |idx: &[usize], i: usize| -> bool {
        let m = idx.len();
        let a = ring[idx[(i + m - 1) % m]];
        let b = ring[idx[i]];
        let c = ring[idx[(i + 1) % m]];
        // Reflex corner cannot be an ear.
        if cross(sub(b, a), sub(c, b)) <= EPS {
            return false;
        }
        // No other vertex may sit inside the candidate triangle.
        for (k, &vi) in idx.iter().enumerate() {
            if k == (i + m - 1) % m || k == i || k == (i + 1) % m {
                continue;
            }
            let p = ring[vi];
            let d1 = cross(sub(b, a), sub(p, a));
            let d2 = cross(sub(c, b), sub(p, b));
            let d3 = cross(sub(a, c), sub(p, c));
            if d1 > -EPS && d2 > -EPS && d3 > -EPS {
                return false;
            }
        }
        true
    };

    let mut guard = 0usize;
    while indices.len() > 3 {
        let m = indices.len();
        let mut clipped = false;
        for i in 0..m {
            if is_ear(&indices, i) {
                let prev = indices[(i + m - 1) % m];
                let cur = indices[i];
                let next = indices[(i + 1) % m];
                tris.push([prev, cur, next]);
                indices.remove(i);
                clipped = true;
                break;
            }
        }
        if !clipped {
            // Numerically stuck (near-degenerate ring); emit a fan rather
            // than loop forever.
            guard += 1;
            if guard > 1 {
                break;
            }
            for i in 1..indices.len() - 1 {
                tris.push([indices[0], indices[i], indices[i + 1]]);
            }
            return tris;
        }
    }
    if indices.len() == 3 {
        tris.push([indices[0], indices[1], indices[2]]);
    }
    tris
}

/// Do two rings overlap (vertex containment or edge crossing)?
pub fn polygons_intersect(a: &[P2], b: &[P2]) -> bool {
    if a.len() < 3 || b.len() < 3 {
        return false;
    }
    if a.iter().any(|&p| point_in_polygon(b, p)) {
        return true;
    }
    if b.iter().any(|&p| point_in_polygon(a, p)) {
        return true;
    }
    let na = a.len();
    let nb = b.len();
    for i in 0..na {
        for j in 0..nb {
            if segments_intersect(a[i], a[(i + 1) % na], b[j], b[(j + 1) % nb]) {
                return true;
            }
        }
    }
    false
}

/// Axis-aligned bounds as (min, max) corners.
pub fn bounds(ring: &[P2]) -> (P2, P2) {
    let mut lo = [f64::INFINITY, f64::INFINITY];
    let mut hi = [f64::NEG_INFINITY, f64::NEG_INFINITY];
    for p in ring {
        lo[0] = lo[0].min(p[0]);
        lo[1] = lo[1].min(p[1]);
        hi[0] = hi[0].max(p[0]);
        hi[1] = hi[1].max(p[1]);
    }
    (lo, hi)
}

/// Axis-aligned CCW square centered at `c`.
pub fn square(c: P2, half: f64) -> Vec<P2> {
    vec![
        [c[0] - half, c[1] - half],
        [c[0] + half, c[1] - half],
        [c[0] + half, c[1] + half],
        [c[0] - half, c[1] + half],
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit_square() -> Vec<P2> {
        square([0.5, 0.5], 0.5)
    }

    #[test]
    fn area_and_centroid() {
        let sq = unit_square();
        assert!((signed_area(&sq) - 1.0).abs() < 1e-12);
        let c = centroid(&sq);
        assert!((c[0] - 0.5).abs() < 1e-12 && (c[1] - 0.5).abs() < 1e-12);
    }

    #[test]
    fn point_in_polygon_basics() {
        let sq = unit_square();
        assert!(point_in_polygon(&sq, [0.5, 0.5]));
        assert!(!point_in_polygon(&sq, [1.5, 0.5]));
    }

    #[test]
    fn bowtie_is_self_intersecting() {
        let bowtie = vec![[0.0, 0.0], [1.0, 1.0], [1.0, 0.0], [0.0, 1.0]];
        assert!(is_self_intersecting(&bowtie));
        assert!(!is_self_intersecting(&unit_square()));
    }

    #[test]
    fn clip_keeps_overlap() {
        let big = square([0.0, 0.0], 2.0);
        let clip = square([1.0, 1.0], 1.0);
        let out = clip_to_convex(&big, &clip);
        assert!((area(&out) - 4.0).abs() < 1e-9);
    }

    #[test]
    fn clip_disjoint_is_empty() {
        let a = square([0.0, 0.0], 1.0);
        let b = square([10.0, 10.0], 1.0);
        assert!(clip_to_convex(&a, &b).is_empty());
    }

    #[test]
    fn subtract_removes_hole_area() {
        let big = square([0.0, 0.0], 2.0); // area 16
        let hole = square([0.0, 0.0], 1.0); // area 4
        let pieces = subtract_convex(&big, &hole);
        let total: f64 = pieces.iter().map(|p| area(p)).sum();
        assert!((total - 12.0).abs() < 1e-6, "total = {}", total);
        // No piece may overlap the subtracted region's interior.
        for piece in &pieces {
            let c = centroid(piece);
            assert!(!point_in_polygon(&hole, c));
        }
    }

    #[test]
    fn subtract_disjoint_returns_subject_area() {
        let subject = square([0.0, 0.0], 1.0);
        let clip = square([10.0, 0.0], 1.0);
        let pieces = subtract_convex(&subject, &clip);
        let total: f64 = pieces.iter().map(|p| area(p)).sum();
        assert!((total - 4.0).abs() < 1e-6);
    }

    #[test]
    fn hull_of_square_with_interior_point() {
        let mut pts = unit_square();
        pts.push([0.5, 0.5]);
        let hull = convex_hull(&pts);
        assert_eq!(hull.len(), 4);
        assert!((area(&hull) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn hull_keeps_upper_and_lower_extremes() {
        let pts = vec![
            [0.0, 0.0],
            [2.0, -1.0],
            [4.0, 0.0],
            [4.0, 2.0],
            [2.0, 3.0],
            [0.0, 2.0],
            [2.0, 1.0],
        ];
        let hull = convex_hull(&pts);
        assert_eq!(hull.len(), 6);
        assert!((area(&hull) - 12.0).abs() < 1e-9);
        assert!(hull.contains(&[2.0, -1.0]));
        assert!(hull.contains(&[2.0, 3.0]));
    }

    #[test]
    fn dedup_drops_near_duplicates() {
        let line = vec![[0.0, 0.0], [0.005, 0.0], [1.0, 0.0], [1.0, 0.0]];
        let out = dedup_polyline(&line, 0.01);
        assert_eq!(out.len(), 2);
    }

    #[test]
    fn triangulate_square_and_concave() {
        assert_eq!(triangulate(&unit_square()).len(), 2);
        // L-shape: 6 vertices -> 4 triangles.
        let l = vec![
            [0.0, 0.0],
            [2.0, 0.0],
            [2.0, 1.0],
            [1.0, 1.0],
            [1.0, 2.0],
            [0.0, 2.0],
        ];
        let tris = triangulate(&l);
        assert_eq!(tris.len(), 4);
        // Triangle areas must sum to the polygon area.
        let total: f64 = tris
            .iter()
            .map(|t| area(&[l[t[0]], l[t[1]], l[t[2]]]))
            .sum();
        assert!((total - area(&l)).abs() < 1e-9);
    }

    #[test]
    fn intersection_detects_containment() {
        let outer = square([0.0, 0.0], 2.0);
        let inner = square([0.0, 0.0], 0.5);
        assert!(polygons_intersect(&outer, &inner));
        assert!(!polygons_intersect(&inner, &square([5.0, 5.0], 0.5)));
    }
}
