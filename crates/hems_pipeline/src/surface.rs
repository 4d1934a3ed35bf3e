//! Surface Composer: draped ground cover and linework derived from the
//! resolved campus and the placed helipad. Everything here is flat polygon
//! work in the local frame; no meshes.

use crate::builder::HelipadSite;
use crate::error::PipelineError;
use crate::geo::ResolvedCampus;
use crate::geom::{self, P2};
use crate::job::HospitalJob;
use crate::scene::{GroundPolygon, LineKind, Linework, SurfaceKind};
use log::debug;
use serde::{Deserialize, Serialize};

/// Apron margin around the primary building footprint.
const APRON_MARGIN_M: f64 = 12.0;
/// Fence offset outward from the campus hull.
const FENCE_OFFSET_M: f64 = 5.0;
/// Pad marking inset as a fraction of the pad side.
const MARKING_INSET: f64 = 0.8;

/// Surfaces stage artifact.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SurfaceSet {
    pub surfaces: Vec<GroundPolygon>,
    pub linework: Vec<Linework>,
}

pub fn compose_surfaces(
    campus: &ResolvedCampus,
    pad: &HelipadSite,
    job: &HospitalJob,
) -> Result<SurfaceSet, PipelineError> {
    let mut out = SurfaceSet::default();

    // Helipad deck plus its painted perimeter.
    out.surfaces.push(GroundPolygon {
        id: "helipad".to_string(),
        kind: SurfaceKind::Helipad,
        ring: pad.ring(),
        material: pad.surface.clone(),
    });
    out.linework.push(Linework {
        id: "pad_marking".to_string(),
        kind: LineKind::PadMarking,
        points: geom::square(pad.center, pad.side_m * 0.5 * MARKING_INSET),
        closed: true,
    });

    let primary = campus
        .buildings
        .iter()
        .find(|b| b.primary)
        .ok_or(PipelineError::NoFootprintFound)?;

    // Apron: an expanded quad around the primary building with every
    // built footprint carved out. Cutters are convex hulls, so the pieces
    // stay convex and non-overlapping.
    let (lo, hi) = geom::bounds(&primary.ring);
    let apron = vec![
        [lo[0] - APRON_MARGIN_M, lo[1] - APRON_MARGIN_M],
        [hi[0] + APRON_MARGIN_M, lo[1] - APRON_MARGIN_M],
        [hi[0] + APRON_MARGIN_M, hi[1] + APRON_MARGIN_M],
        [lo[0] - APRON_MARGIN_M, hi[1] + APRON_MARGIN_M],
    ];
    let mut pieces = geom::subtract_convex(&apron, &geom::convex_hull(&primary.ring));
    for b in campus
        .buildings
        .iter()
        .filter(|b| !b.primary && b.role != crate::job::BuildingRole::Parking)
    {
        let cutter = geom::convex_hull(&b.ring);
        if cutter.len() < 3 {
            continue;
        }
        pieces = pieces
            .into_iter()
            .flat_map(|piece| {
                if geom::polygons_intersect(&piece, &cutter) {
                    geom::subtract_convex(&piece, &cutter)
                } else {
                    vec![piece]
                }
            })
            .collect();
    }
    for (k, piece) in pieces.into_iter().enumerate() {
        if geom::area(&piece) < 1.0 {
            continue;
        }
        out.surfaces.push(GroundPolygon {
            id: format!("apron_{:03}", k),
            kind: SurfaceKind::Apron,
            ring: piece,
            material: "apron".to_string(),
        });
    }

    // Sidewalks: straight paths from each secondary building to the primary
    // entrance, plus one from the pad.
    if job.ground.sidewalks {
        let entrance = primary.centroid;
        let mut targets: Vec<(String, P2)> = campus
            .buildings
            .iter()
            .filter(|b| !b.primary && b.role != crate::job::BuildingRole::Parking)
            .map(|b| (format!("walk_{}", b.id), b.centroid))
            .collect();
        targets.push(("walk_helipad".to_string(), pad.center));
        targets.sort_by(|a, b| a.0.cmp(&b.0));
        for (id, from) in targets {
            let points = geom::dedup_polyline(&[from, entrance], 0.01);
            if points.len() < 2 {
                continue;
            }
            out.linework.push(Linework {
                id,
                kind: LineKind::Path,
                points,
                closed: false,
            });
        }
    }

    // Access road: a straight approach from the south AOI rim to the apron
    // edge, detouring through the nearest parking lot when one exists.
    if job.ground.roads {
        let cx = primary.centroid[0];
        let apron_edge = [cx, lo[1] - APRON_MARGIN_M];
        let mut points = vec![[cx, -campus.aoi_radius_m]];
        let nearest_lot = campus
            .buildings
            .iter()
            .filter(|b| b.role == crate::job::BuildingRole::Parking)
            .min_by(|a, b| {
                geom::dist(a.centroid, apron_edge)
                    .partial_cmp(&geom::dist(b.centroid, apron_edge))
                    .unwrap_or(std::cmp::Ordering::Equal)
            });
        if let Some(lot) = nearest_lot {
            points.push(lot.centroid);
        }
        points.push(apron_edge);
        let points = geom::dedup_polyline(&points, 0.01);
        if points.len() >= 2 {
            out.linework.push(Linework {
                id: "road_access".to_string(),
                kind: LineKind::Road,
                points,
                closed: false,
            });
        }
    }

    // Fence: the campus hull pushed outward from its centroid.
    if job.ground.fences {
        let campus_points: Vec<P2> = campus
            .buildings
            .iter()
            .filter(|b| b.cluster == 0)
            .flat_map(|b| b.ring.iter().copied())
            .collect();
        let hull = geom::convex_hull(&campus_points);
        if hull.len() >= 3 {
            let c = geom::centroid(&hull);
            let ring: Vec<P2> = hull
                .iter()
                .map(|p| {
                    let d = geom::dist(c, *p).max(1e-6);
                    [
                        p[0] + (p[0] - c[0]) / d * FENCE_OFFSET_M,
                        p[1] + (p[1] - c[1]) / d * FENCE_OFFSET_M,
                    ]
                })
                .collect();
            out.linework.push(Linework {
                id: "fence_campus".to_string(),
                kind: LineKind::Fence,
                points: geom::dedup_ring(&ring, 0.01),
                closed: true,
            });
        }
    }

    debug!(
        "composed {} surfaces, {} linework runs for {}",
        out.surfaces.len(),
        out.linework.len(),
        job.id
    );
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::HELIPAD_SIDE_M;
    use crate::geo::{LocalFrame, ResolvedFootprint};
    use crate::job::{BuildingRole, HospitalJob, LatLon};

    const CENTER: LatLon = LatLon {
        lat: 47.6042,
        lon: -122.3237,
    };

    fn campus() -> ResolvedCampus {
        let ring = geom::square([0.0, 0.0], 30.0);
        ResolvedCampus {
            frame: LocalFrame::new(CENTER),
            aoi_radius_m: 500.0,
            site_elev_m: 0.0,
            buildings: vec![ResolvedFootprint {
                id: "m1".into(),
                role: BuildingRole::Main,
                primary: true,
                area_m2: geom::area(&ring),
                centroid: geom::centroid(&ring),
                ring,
                cluster: 0,
            }],
        }
    }

    fn pad() -> HelipadSite {
        HelipadSite {
            center: [150.0, 0.0],
            side_m: HELIPAD_SIDE_M,
            surface: "concrete".into(),
            flatten: true,
        }
    }

    fn job() -> HospitalJob {
        HospitalJob::new_default("WA22", "Harborview", CENTER, 500.0)
    }

    #[test]
    fn apron_excludes_building_interior() {
        let set = compose_surfaces(&campus(), &pad(), &job()).unwrap();
        let aprons: Vec<_> = set
            .surfaces
            .iter()
            .filter(|s| s.kind == SurfaceKind::Apron)
            .collect();
        assert!(!aprons.is_empty());
        // The building center lies in no apron piece, but a point in the
        // margin band does.
        for a in &aprons {
            assert!(!geom::point_in_polygon(&a.ring, [0.0, 0.0]));
        }
        assert!(aprons
            .iter()
            .any(|a| geom::point_in_polygon(&a.ring, [36.0, 0.0])));
        // Total apron area = expanded quad minus footprint.
        let total: f64 = aprons.iter().map(|a| geom::area(&a.ring)).sum();
        let expected = 84.0 * 84.0 - 60.0 * 60.0;
        assert!((total - expected).abs() < 1.0, "apron area {}", total);
    }

    #[test]
    fn helipad_surface_and_marking_present() {
        let set = compose_surfaces(&campus(), &pad(), &job()).unwrap();
        let deck = set.surfaces.iter().find(|s| s.id == "helipad").unwrap();
        assert_eq!(deck.kind, SurfaceKind::Helipad);
        assert_eq!(deck.material, "concrete");
        let marking = set.linework.iter().find(|l| l.id == "pad_marking").unwrap();
        assert!(marking.closed);
        assert_eq!(marking.kind, LineKind::PadMarking);
    }

    #[test]
    fn ground_linework_toggles() {
        let mut j = job();
        j.ground.sidewalks = false;
        j.ground.fences = false;
        j.ground.roads = false;
        let set = compose_surfaces(&campus(), &pad(), &j).unwrap();
        assert!(set
            .linework
            .iter()
            .all(|l| l.kind == LineKind::PadMarking));

        let on = compose_surfaces(&campus(), &pad(), &job()).unwrap();
        assert!(on.linework.iter().any(|l| l.kind == LineKind::Path));
        assert!(on.linework.iter().any(|l| l.kind == LineKind::Fence));
        assert!(on.linework.iter().any(|l| l.kind == LineKind::Road));
    }

    #[test]
    fn access_road_runs_from_rim_to_apron() {
        let set = compose_surfaces(&campus(), &pad(), &job()).unwrap();
        let road = set.linework.iter().find(|l| l.id == "road_access").unwrap();
        assert_eq!(road.kind, LineKind::Road);
        assert!(!road.closed);
        assert_eq!(road.points.first().unwrap(), &[0.0, -500.0]);
        assert_eq!(road.points.last().unwrap(), &[0.0, -42.0]);
    }

    #[test]
    fn apron_avoids_secondary_buildings() {
        let mut c = campus();
        let ring = geom::square([40.0, 0.0], 6.0);
        c.buildings.push(ResolvedFootprint {
            id: "c1".into(),
            role: BuildingRole::Clinic,
            primary: false,
            area_m2: geom::area(&ring),
            centroid: geom::centroid(&ring),
            ring,
            cluster: 0,
        });
        let set = compose_surfaces(&c, &pad(), &job()).unwrap();
        let aprons: Vec<_> = set
            .surfaces
            .iter()
            .filter(|s| s.kind == SurfaceKind::Apron)
            .collect();
        // The clinic straddles the eastern apron band; no piece may cover
        // its center, while the rest of the band stays paved.
        for a in &aprons {
            assert!(!geom::point_in_polygon(&a.ring, [40.0, 0.0]));
        }
        assert!(aprons
            .iter()
            .any(|a| geom::point_in_polygon(&a.ring, [0.0, 36.0])));
        let total: f64 = aprons.iter().map(|a| geom::area(&a.ring)).sum();
        let expected = 84.0 * 84.0 - 60.0 * 60.0 - 96.0;
        assert!((total - expected).abs() < 1.0, "apron area {}", total);
    }

    #[test]
    fn missing_primary_is_an_error() {
        let mut c = campus();
        c.buildings[0].primary = false;
        assert!(matches!(
            compose_surfaces(&c, &pad(), &job()),
            Err(PipelineError::NoFootprintFound)
        ));
    }
}
