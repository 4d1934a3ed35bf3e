//! Scene Builder: extrudes classified footprints into building meshes,
//! turns parking footprints into draped quads, places the helipad and
//! scatters props. Pure function of (resolved campus, job); the only
//! "randomness" is a ChaCha stream seeded from content digests.

use crate::error::PipelineError;
use crate::geo::{ResolvedCampus, ResolvedFootprint};
use crate::geom::{self, P2};
use crate::hash::{Digest, DigestBuilder};
use crate::job::{BuildingRole, HelipadMode, HospitalJob, QualityTier};
use crate::scene::{
    BuildingMesh, GroundPolygon, MaterialRef, Mesh, PropInstance, PropKind, SurfaceKind, Vertex,
};
use log::debug;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rstar::{RTree, RTreeObject, AABB};
use serde::{Deserialize, Serialize};

/// Meters per storey, from the original floors model.
pub const FLOOR_HEIGHT_M: f64 = 3.8;

/// Fixed per-role heights used at Low tier (and for non-main roles at every
/// tier). Main at Low is 4 storeys.
pub fn role_height_m(role: BuildingRole, tier: QualityTier, area_m2: f64) -> f64 {
    match role {
        BuildingRole::Main => match tier {
            QualityTier::Low => 4.0 * FLOOR_HEIGHT_M,
            _ => {
                let floors = (area_m2 / 1200.0).round().clamp(2.0, 8.0);
                floors * FLOOR_HEIGHT_M
            }
        },
        BuildingRole::Clinic => 3.0 * FLOOR_HEIGHT_M,
        BuildingRole::Office => 2.0 * FLOOR_HEIGHT_M,
        BuildingRole::Service => FLOOR_HEIGHT_M,
        BuildingRole::Parking => 0.0,
        BuildingRole::Unclassified => 3.0,
    }
}

pub const HELIPAD_SIDE_M: f64 = 26.0;
pub const HELIPAD_CLEARANCE_M: f64 = 6.0;
pub const HELIPAD_SCAN_STEP_M: f64 = 10.0;

const UV_METERS_PER_TILE: f64 = 10.0;
const MIN_EXTRUDE_AREA_M2: f64 = 1.0;

#[inline]
fn face_normal(a: [f64; 3], b: [f64; 3], c: [f64; 3]) -> [f64; 3] {
    let u = [b[0] - a[0], b[1] - a[1], b[2] - a[2]];
    let v = [c[0] - a[0], c[1] - a[1], c[2] - a[2]];
    let n = [
        u[1] * v[2] - u[2] * v[1],
        u[2] * v[0] - u[0] * v[2],
        u[0] * v[1] - u[1] * v[0],
    ];
    let len = (n[0] * n[0] + n[1] * n[1] + n[2] * n[2]).sqrt().max(1e-12);
    [n[0] / len, n[1] / len, n[2] / len]
}

/// Extrude a CCW ring to a prism with vertical walls and a flat cap.
/// Rejects degenerate input before any geometry is produced.
pub fn extrude_footprint(id: &str, ring: &[P2], height: f64) -> Result<Mesh, PipelineError> {
    let ring = geom::dedup_ring(ring, 0.01);
    if ring.len() < 3 || geom::area(&ring) < MIN_EXTRUDE_AREA_M2 {
        return Err(PipelineError::DegenerateGeometry(format!(
            "footprint '{}' has near-zero area",
            id
        )));
    }
    if geom::is_self_intersecting(&ring) {
        return Err(PipelineError::DegenerateGeometry(format!(
            "footprint '{}' is self-intersecting",
            id
        )));
    }
    if height < 0.0 {
        return Err(PipelineError::DegenerateGeometry(format!(
            "footprint '{}' has negative height {}",
            id, height
        )));
    }

    let mut mesh = Mesh::default();
    let n = ring.len();

    // Walls: one quad per edge. Ring is CCW, so the outward normal of the
    // directed edge a->b is (dy, -dx).
    for i in 0..n {
        let a = ring[i];
        let b = ring[(i + 1) % n];
        let len = geom::dist(a, b);
        if len < 0.01 {
            continue;
        }
        let normal = [(b[1] - a[1]) / len, -(b[0] - a[0]) / len, 0.0];
        let u1 = len / UV_METERS_PER_TILE;
        let v1 = height / UV_METERS_PER_TILE;
        let base = mesh.vertices.len() as u32;
        mesh.vertices.push(Vertex {
            position: [a[0], a[1], 0.0],
            normal,
            uv: [0.0, 0.0],
        });
        mesh.vertices.push(Vertex {
            position: [b[0], b[1], 0.0],
            normal,
            uv: [u1, 0.0],
        });
        mesh.vertices.push(Vertex {
            position: [b[0], b[1], height],
            normal,
            uv: [u1, v1],
        });
        mesh.vertices.push(Vertex {
            position: [a[0], a[1], height],
            normal,
            uv: [0.0, v1],
        });
        mesh.indices
            .extend_from_slice(&[base, base + 1, base + 2, base, base + 2, base + 3]);
    }

    // Flat cap.
    let up = [0.0, 0.0, 1.0];
    let base = mesh.vertices.len() as u32;
    for p in &ring {
        mesh.vertices.push(Vertex {
            position: [p[0], p[1], height],
            normal: up,
            uv: [p[0] / UV_METERS_PER_TILE, p[1] / UV_METERS_PER_TILE],
        });
    }
    for tri in geom::triangulate(&ring) {
        mesh.indices.extend_from_slice(&[
            base + tri[0] as u32,
            base + tri[1] as u32,
            base + tri[2] as u32,
        ]);
    }

    Ok(mesh)
}

/// Replace the flat cap assumption for near-rectangular rings: two sloped
/// trapezoids plus two gable triangles rising to a ridge over the long axis.
/// Returns the extra roof geometry; the caller keeps the walls as-is.
fn hipped_roof(ring: &[P2], eave_h: f64) -> Option<Mesh> {
    if ring.len() != 4 {
        return None;
    }
    let e: Vec<f64> = (0..4)
        .map(|i| geom::dist(ring[i], ring[(i + 1) % 4]))
        .collect();
    // Long axis along edges 0/2 or 1/3; ridge connects the short-edge
    // midpoints.
    let (s0, s1) = if e[0] + e[2] >= e[1] + e[3] {
        (1, 3)
    } else {
        (0, 2)
    };
    let short_span = e[s0].min(e[s1]);
    if short_span < 4.0 {
        return None;
    }
    let rise = (0.25 * short_span).min(4.0);
    let mid = |i: usize| -> P2 {
        let a = ring[i];
        let b = ring[(i + 1) % 4];
        [(a[0] + b[0]) * 0.5, (a[1] + b[1]) * 0.5]
    };
    let r0 = mid(s0);
    let r1 = mid(s1);
    let ridge0 = [r0[0], r0[1], eave_h + rise];
    let ridge1 = [r1[0], r1[1], eave_h + rise];

    let mut mesh = Mesh::default();
    let mut face = |quad: &[[f64; 3]]| {
        let normal = face_normal(quad[0], quad[1], quad[2]);
        let base = mesh.vertices.len() as u32;
        for (k, p) in quad.iter().enumerate() {
            let uv = match k {
                0 => [0.0, 0.0],
                1 => [1.0, 0.0],
                2 => [1.0, 1.0],
                _ => [0.0, 1.0],
            };
            mesh.vertices.push(Vertex {
                position: *p,
                normal,
                uv,
            });
        }
        if quad.len() == 4 {
            mesh.indices
                .extend_from_slice(&[base, base + 1, base + 2, base, base + 2, base + 3]);
        } else {
            mesh.indices.extend_from_slice(&[base, base + 1, base + 2]);
        }
    };

    let at = |i: usize| [ring[i % 4][0], ring[i % 4][1], eave_h];
    // Two slopes from the long edges up to the ridge, then the two gables.
    // Vertex order keeps each face wound outward.
    face(&[at(s0 + 1), at(s0 + 2), ridge1, ridge0]);
    face(&[at(s1 + 1), at(s1 + 2), ridge0, ridge1]);
    face(&[at(s0), at(s0 + 1), ridge0]);
    face(&[at(s1), at(s1 + 1), ridge1]);

    Some(mesh)
}

fn merge_mesh(target: &mut Mesh, extra: Mesh) {
    let base = target.vertices.len() as u32;
    target.vertices.extend(extra.vertices);
    target
        .indices
        .extend(extra.indices.into_iter().map(|i| i + base));
}

/// Building-mesh stage artifact: everything derived from the classified
/// footprints without looking at the helipad.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BuildingSet {
    pub buildings: Vec<BuildingMesh>,
    pub lots: Vec<GroundPolygon>,
    pub props: Vec<PropInstance>,
}

pub fn build_buildings(
    campus: &ResolvedCampus,
    job: &HospitalJob,
) -> Result<BuildingSet, PipelineError> {
    let tier = job.output.quality;
    let mut out = BuildingSet::default();

    for fp in &campus.buildings {
        if fp.role == BuildingRole::Parking {
            out.lots.push(GroundPolygon {
                id: format!("lot_{}", fp.id),
                kind: SurfaceKind::Parking,
                ring: fp.ring.clone(),
                material: "parking".to_string(),
            });
            continue;
        }

        let height = role_height_m(fp.role, tier, fp.area_m2);
        let mut mesh = extrude_footprint(&fp.id, &fp.ring, height)?;
        let mut roof_detail = 0u32;
        if tier != QualityTier::Low {
            if let Some(roof) = hipped_roof(&fp.ring, height) {
                merge_mesh(&mut mesh, roof);
                roof_detail = 1;
            }
        }

        out.buildings.push(BuildingMesh {
            id: format!("bld_{}", fp.id),
            role: fp.role,
            primary: fp.primary,
            height_m: height,
            mesh,
            material: MaterialRef {
                texture: format!("{}.png", fp.role.as_str()),
                lit_texture: None,
            },
            footprint: fp.ring.clone(),
            roof_detail,
        });
    }

    if tier != QualityTier::Low {
        scatter_props(campus, job, &mut out);
    }

    debug!(
        "built {} meshes, {} lots, {} props for {}",
        out.buildings.len(),
        out.lots.len(),
        out.props.len(),
        job.id
    );
    Ok(out)
}

/// Deterministic prop scatter: cars in parking lots, trees on the campus
/// hull. The RNG is ChaCha seeded from content digests, so identical inputs
/// place identical props.
fn scatter_props(campus: &ResolvedCampus, job: &HospitalJob, out: &mut BuildingSet) {
    let mut rng = ChaCha8Rng::from_seed(props_seed(job).0);

    if job.ground.parking && job.props.cars_density > 0.0 {
        const STALL_PITCH_M: f64 = 6.0;
        for lot in &out.lots {
            let (lo, hi) = geom::bounds(&lot.ring);
            let mut k = 0usize;
            let mut y = lo[1] + STALL_PITCH_M * 0.5;
            while y < hi[1] {
                let mut x = lo[0] + STALL_PITCH_M * 0.5;
                while x < hi[0] {
                    if geom::point_in_polygon(&lot.ring, [x, y])
                        && rng.gen::<f64>() < job.props.cars_density
                    {
                        out.props.push(PropInstance {
                            id: format!("car_{}_{:03}", lot.id, k),
                            kind: PropKind::Car,
                            pos: [x, y],
                            heading_rad: if rng.gen::<bool>() {
                                0.0
                            } else {
                                std::f64::consts::PI
                            },
                        });
                        k += 1;
                    }
                    x += STALL_PITCH_M;
                }
                y += STALL_PITCH_M;
            }
        }
    }

    if job.props.trees {
        let campus_points: Vec<P2> = campus
            .buildings
            .iter()
            .filter(|b| b.cluster == 0)
            .flat_map(|b| b.ring.iter().copied())
            .collect();
        let hull = geom::convex_hull(&campus_points);
        if hull.len() >= 3 {
            const TREE_SPACING_M: f64 = 25.0;
            const TREE_OFFSET_M: f64 = 8.0;
            let c = geom::centroid(&hull);
            let mut k = 0usize;
            let n = hull.len();
            for i in 0..n {
                let a = hull[i];
                let b = hull[(i + 1) % n];
                let len = geom::dist(a, b);
                let count = (len / TREE_SPACING_M).floor() as usize;
                for s in 0..count {
                    let t = (s as f64 + 0.5) / count as f64;
                    let p = [a[0] + t * (b[0] - a[0]), a[1] + t * (b[1] - a[1])];
                    // Push outward from the hull centroid.
                    let d = geom::dist(c, p).max(1e-6);
                    let pos = [
                        p[0] + (p[0] - c[0]) / d * TREE_OFFSET_M,
                        p[1] + (p[1] - c[1]) / d * TREE_OFFSET_M,
                    ];
                    out.props.push(PropInstance {
                        id: format!("tree_{:03}", k),
                        kind: PropKind::Tree,
                        pos,
                        heading_rad: 0.0,
                    });
                    k += 1;
                }
            }
        }
    }
}

/// Helipad-site stage artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HelipadSite {
    pub center: P2,
    pub side_m: f64,
    pub surface: String,
    pub flatten: bool,
}

impl HelipadSite {
    pub fn ring(&self) -> Vec<P2> {
        geom::square(self.center, self.side_m * 0.5)
    }
}

struct FootprintBox {
    idx: usize,
    env: AABB<[f64; 2]>,
}

impl RTreeObject for FootprintBox {
    type Envelope = AABB<[f64; 2]>;

    #[inline]
    fn envelope(&self) -> Self::Envelope {
        self.env
    }
}

/// Place the helipad. Manual mode projects the job position; auto mode scans
/// square rings outward from the AOI center, row-major within each ring,
/// 10 m step, and takes the first cell whose clearance square stays inside
/// the AOI circle and clear of every building footprint.
pub fn place_helipad(
    campus: &ResolvedCampus,
    job: &HospitalJob,
) -> Result<HelipadSite, PipelineError> {
    let site = |center: P2| HelipadSite {
        center,
        side_m: HELIPAD_SIDE_M,
        surface: job.helipad.surface.clone(),
        flatten: job.output.flatten_helipad,
    };

    if job.helipad.mode == HelipadMode::Manual {
        let pos = job
            .helipad
            .position
            .ok_or_else(|| PipelineError::SchemaViolation("manual helipad without position".into()))?;
        return Ok(site(campus.frame.to_local(pos)));
    }

    let tree = RTree::bulk_load(
        campus
            .buildings
            .iter()
            .enumerate()
            .map(|(idx, fp)| {
                let (lo, hi) = geom::bounds(&fp.ring);
                FootprintBox {
                    idx,
                    env: AABB::from_corners(lo, hi),
                }
            })
            .collect(),
    );

    let clear_half = HELIPAD_SIDE_M * 0.5 + HELIPAD_CLEARANCE_M;
    let half_diag = clear_half * std::f64::consts::SQRT_2;
    let is_clear = |center: P2| -> bool {
        if geom::dist([0.0, 0.0], center) + half_diag > campus.aoi_radius_m {
            return false;
        }
        let candidate = geom::square(center, clear_half);
        let env = AABB::from_corners(
            [center[0] - clear_half, center[1] - clear_half],
            [center[0] + clear_half, center[1] + clear_half],
        );
        for hit in tree.locate_in_envelope_intersecting(&env) {
            if geom::polygons_intersect(&candidate, &campus.buildings[hit.idx].ring) {
                return false;
            }
        }
        true
    };

    let step = HELIPAD_SCAN_STEP_M;
    let max_ring = (campus.aoi_radius_m / step).floor() as i64;
    for k in 0..=max_ring {
        // Row-major over the ring: top row down, left to right, keeping only
        // the perimeter cells of ring k.
        for iy in -k..=k {
            let y = (-iy) as f64 * step; // rows top-down: k, k-1, ..., -k
            for ix in -k..=k {
                if ix.abs() != k && iy.abs() != k {
                    continue;
                }
                let center = [ix as f64 * step, y];
                if is_clear(center) {
                    debug!("helipad auto-placed at ({:.0}, {:.0})", center[0], center[1]);
                    return Ok(site(center));
                }
            }
        }
    }

    Err(PipelineError::NoHelipadSite)
}

/// Prop-scatter RNG seed: a function of the prop spec and the footprint
/// pins, nothing else.
pub fn props_seed(job: &HospitalJob) -> Digest {
    let digest = job.digest();
    DigestBuilder::new("props/seed")
        .digest_field(&digest.props)
        .digest_field(&digest.footprints)
        .finish()
}
