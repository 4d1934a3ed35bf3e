//! Geo Resolver: projects raw lat/lon footprints into a local planar frame
//! centered on the job location, clips them to the AOI, classifies roles and
//! groups the campus. Deterministic by construction: no randomness, no clock,
//! footprints processed in id order.

use crate::error::PipelineError;
use crate::geodata::RawGeodata;
use crate::geom::{self, P2};
use crate::job::{BuildingRole, HospitalJob, LatLon};
use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub mod wgs84 {
    /// Semi-major axis (equatorial radius) in meters.
    pub const A: f64 = 6_378_137.0;

    /// Flattening factor (1 / 298.257223563).
    pub const F: f64 = 1.0 / 298.257_223_563;

    /// First eccentricity squared.
    pub const E2: f64 = F * (2.0 - F);
}

/// Meters per degree of latitude/longitude at a given latitude, from the
/// meridional and prime-vertical radii of curvature.
fn meters_per_degree(lat_deg: f64) -> (f64, f64) {
    let lat_rad = lat_deg.to_radians();
    let (sin_lat, cos_lat) = lat_rad.sin_cos();
    let denom = (1.0 - wgs84::E2 * sin_lat * sin_lat).sqrt();

    // Prime vertical radius of curvature (east-west distances).
    let n = wgs84::A / denom;
    // Meridional radius of curvature (north-south distances).
    let m = wgs84::A * (1.0 - wgs84::E2) / (denom * denom * denom);

    let per_deg_lat = m.to_radians();
    let per_deg_lon = (n * cos_lat.abs().max(1e-6)).to_radians();
    (per_deg_lat, per_deg_lon)
}

/// Planar ground distance between nearby coordinates. Good to well under a
/// meter at AOI scale; not intended for long baselines.
pub fn ground_distance_m(a: LatLon, b: LatLon) -> f64 {
    let (per_lat, per_lon) = meters_per_degree(0.5 * (a.lat + b.lat));
    let dy = (b.lat - a.lat) * per_lat;
    let dx = (b.lon - a.lon) * per_lon;
    (dx * dx + dy * dy).sqrt()
}

/// Local Cartesian frame: meters east (+x) / north (+y) of the origin, with
/// curvature-correct degree scaling fixed at the origin latitude. Distortion
/// stays negligible within AOI-sized radii.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LocalFrame {
    pub origin: LatLon,
    meters_per_deg_lat: f64,
    meters_per_deg_lon: f64,
}

impl LocalFrame {
    pub fn new(origin: LatLon) -> Self {
        let (meters_per_deg_lat, meters_per_deg_lon) = meters_per_degree(origin.lat);
        Self {
            origin,
            meters_per_deg_lat,
            meters_per_deg_lon,
        }
    }

    pub fn to_local(&self, p: LatLon) -> P2 {
        [
            (p.lon - self.origin.lon) * self.meters_per_deg_lon,
            (p.lat - self.origin.lat) * self.meters_per_deg_lat,
        ]
    }

    pub fn to_geodetic(&self, p: P2) -> LatLon {
        LatLon {
            lat: self.origin.lat + p[1] / self.meters_per_deg_lat,
            lon: self.origin.lon + p[0] / self.meters_per_deg_lon,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedFootprint {
    pub id: String,
    pub role: BuildingRole,
    pub primary: bool,
    /// CCW ring in local meters, clipped to the AOI.
    pub ring: Vec<P2>,
    pub area_m2: f64,
    pub centroid: P2,
    /// Campus cluster index; 0 is the cluster containing the main building.
    pub cluster: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedCampus {
    pub frame: LocalFrame,
    pub aoi_radius_m: f64,
    pub site_elev_m: f64,
    pub buildings: Vec<ResolvedFootprint>,
}

impl ResolvedCampus {
    pub fn primary(&self) -> Option<&ResolvedFootprint> {
        self.buildings.iter().find(|b| b.primary)
    }
}

const MIN_FOOTPRINT_AREA_M2: f64 = 10.0;
const CLINIC_PROXIMITY_M: f64 = 150.0;
const CLUSTER_LINK_M: f64 = 120.0;

/// Tag-driven role, before size/proximity heuristics.
fn role_from_tags(tags: &BTreeMap<String, String>) -> Option<BuildingRole> {
    let get = |key: &str| tags.get(key).map(String::as_str);

    if get("amenity") == Some("parking") || get("building") == Some("parking") {
        return Some(BuildingRole::Parking);
    }
    if get("amenity") == Some("clinic") || get("healthcare") == Some("clinic") {
        return Some(BuildingRole::Clinic);
    }
    if get("building") == Some("hospital") || get("amenity") == Some("hospital") {
        return Some(BuildingRole::Main);
    }
    if matches!(get("building"), Some("office") | Some("commercial")) {
        return Some(BuildingRole::Office);
    }
    if matches!(get("building"), Some("service") | Some("garage") | Some("shed")) {
        return Some(BuildingRole::Service);
    }
    None
}

/// Size/proximity fallback once tags and pins had their chance.
fn role_from_shape(area_m2: f64, dist_to_main: Option<f64>) -> BuildingRole {
    if area_m2 >= 600.0 {
        match dist_to_main {
            Some(d) if d <= CLINIC_PROXIMITY_M => BuildingRole::Clinic,
            _ => BuildingRole::Office,
        }
    } else if area_m2 >= 200.0 {
        BuildingRole::Office
    } else if area_m2 >= 30.0 {
        BuildingRole::Service
    } else {
        BuildingRole::Unclassified
    }
}

pub fn resolve(job: &HospitalJob, raw: &RawGeodata) -> Result<ResolvedCampus, PipelineError> {
    let frame = LocalFrame::new(job.location);
    let r = job.aoi.radius_m;
    let aoi_square = geom::square([0.0, 0.0], r);

    // Project, clip and measure, in footprint-id order.
    let mut fps: Vec<&crate::geodata::RawFootprint> = raw.footprints.iter().collect();
    fps.sort_by(|a, b| a.id.cmp(&b.id));

    struct Candidate<'a> {
        id: &'a str,
        tags: &'a BTreeMap<String, String>,
        ring: Vec<P2>,
        area: f64,
        centroid: P2,
    }

    let mut candidates: Vec<Candidate> = Vec::new();
    for fp in fps {
        let projected: Vec<P2> = fp.ring.iter().map(|v| frame.to_local(*v)).collect();
        let mut ring = geom::dedup_ring(&projected, 0.01);
        if ring.len() < 3 {
            continue;
        }
        geom::ensure_ccw(&mut ring);
        let clipped = geom::clip_to_convex(&ring, &aoi_square);
        let area = geom::area(&clipped);
        if area < MIN_FOOTPRINT_AREA_M2 {
            continue;
        }
        let centroid = geom::centroid(&clipped);
        candidates.push(Candidate {
            id: &fp.id,
            tags: &fp.tags,
            ring: clipped,
            area,
            centroid,
        });
    }

    if candidates.is_empty() {
        return Err(PipelineError::NoFootprintFound);
    }

    // Pins from the job win over everything.
    let pins: BTreeMap<&str, (&BuildingRole, bool)> = job
        .campus
        .buildings
        .iter()
        .map(|p| (p.id.as_str(), (&p.role, p.primary)))
        .collect();

    // Pass one: roles fixed by pin or tag; remember where the main sits.
    let mut roles: Vec<Option<BuildingRole>> = Vec::with_capacity(candidates.len());
    let mut primary_idx: Option<usize> = None;
    for (i, c) in candidates.iter().enumerate() {
        let pinned = pins.get(c.id);
        if let Some((role, primary)) = pinned {
            roles.push(Some(**role));
            if *primary {
                primary_idx = Some(i);
            }
        } else {
            roles.push(role_from_tags(c.tags));
        }
    }

    // If nothing is pinned primary, the largest building fixed as Main (or
    // the largest overall when no tag said Main) becomes the primary.
    if primary_idx.is_none() {
        let mut best: Option<(usize, f64, bool)> = None;
        for (i, c) in candidates.iter().enumerate() {
            let is_main = roles[i] == Some(BuildingRole::Main);
            let better = match best {
                None => true,
                Some((_, best_area, best_main)) => {
                    (is_main && !best_main) || (is_main == best_main && c.area > best_area)
                }
            };
            if better && roles[i] != Some(BuildingRole::Parking) {
                best = Some((i, c.area, is_main));
            }
        }
        primary_idx = best.map(|(i, _, _)| i);
    }
    if let Some(i) = primary_idx {
        roles[i] = Some(BuildingRole::Main);
    }

    let main_centroid = primary_idx.map(|i| candidates[i].centroid);

    // Pass two: shape heuristics for anything still open.
    for (i, c) in candidates.iter().enumerate() {
        if roles[i].is_none() {
            let dist = main_centroid.map(|m| geom::dist(m, c.centroid));
            roles[i] = Some(role_from_shape(c.area, dist));
        }
    }

    // Campus grouping: single-link clusters over centroid distance, with
    // cluster 0 anchored at the primary building.
    let n = candidates.len();
    let mut cluster_of: Vec<u32> = vec![u32::MAX; n];
    let mut next_cluster = 0u32;
    let order: Vec<usize> = {
        let mut o: Vec<usize> = (0..n).collect();
        if let Some(p) = primary_idx {
            o.retain(|&i| i != p);
            o.insert(0, p);
        }
        o
    };
    for &seed in &order {
        if cluster_of[seed] != u32::MAX {
            continue;
        }
        let label = next_cluster;
        next_cluster += 1;
        let mut stack = vec![seed];
        cluster_of[seed] = label;
        while let Some(i) = stack.pop() {
            for j in 0..n {
                if cluster_of[j] == u32::MAX
                    && geom::dist(candidates[i].centroid, candidates[j].centroid)
                        <= CLUSTER_LINK_M
                {
                    cluster_of[j] = label;
                    stack.push(j);
                }
            }
        }
    }

    // Elevation: mean of the samples that made it into the AOI.
    let site_elev_m = if raw.elevation.is_empty() {
        0.0
    } else {
        raw.elevation.iter().map(|s| s.elev_m).sum::<f64>() / raw.elevation.len() as f64
    };

    let buildings: Vec<ResolvedFootprint> = candidates
        .into_iter()
        .enumerate()
        .map(|(i, c)| ResolvedFootprint {
            id: c.id.to_string(),
            role: roles[i].unwrap_or(BuildingRole::Unclassified),
            primary: Some(i) == primary_idx,
            ring: c.ring,
            area_m2: c.area,
            centroid: c.centroid,
            cluster: cluster_of[i],
        })
        .collect();

    debug!(
        "resolved {} footprints for {} (elev {:.1} m)",
        buildings.len(),
        job.id,
        site_elev_m
    );

    Ok(ResolvedCampus {
        frame,
        aoi_radius_m: r,
        site_elev_m,
        buildings,
    })
}
