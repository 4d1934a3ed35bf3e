//! Lighting composer: named lights around the pad and at the entrance, plus
//! the lit-texture assignments that make windows glow at night. Pure
//! function of (pad, campus, job); the night strength scales intensity, it
//! never changes placement.

use crate::builder::HelipadSite;
use crate::error::PipelineError;
use crate::geo::ResolvedCampus;
use crate::geom::{self, P2};
use crate::job::{BuildingRole, HospitalJob, QualityTier};
use crate::scene::LightInstance;
use serde::{Deserialize, Serialize};

/// Pad perimeter light count by tier.
pub fn perimeter_light_count(tier: QualityTier) -> usize {
    match tier {
        QualityTier::Low | QualityTier::Medium => 8,
        QualityTier::High => 12,
    }
}

const PAD_LIGHT_HEIGHT_M: f64 = 0.3;
const ENTRY_LIGHT_HEIGHT_M: f64 = 4.0;

/// Lighting stage artifact.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LightingSet {
    pub lights: Vec<LightInstance>,
    /// Building id -> lit texture, applied by the exporter.
    pub building_lit: Vec<(String, String)>,
}

/// Evenly spaced points along a closed ring's perimeter, starting at the
/// first vertex.
fn along_perimeter(ring: &[P2], count: usize) -> Vec<P2> {
    let n = ring.len();
    let lens: Vec<f64> = (0..n).map(|i| geom::dist(ring[i], ring[(i + 1) % n])).collect();
    let total: f64 = lens.iter().sum();
    let mut out = Vec::with_capacity(count);
    for k in 0..count {
        let mut d = total * k as f64 / count as f64;
        let mut i = 0;
        while d > lens[i] && i + 1 < n {
            d -= lens[i];
            i += 1;
        }
        let a = ring[i];
        let b = ring[(i + 1) % n];
        let t = if lens[i] > 1e-9 { d / lens[i] } else { 0.0 };
        out.push([a[0] + t * (b[0] - a[0]), a[1] + t * (b[1] - a[1])]);
    }
    out
}

pub fn compose_lighting(
    campus: &ResolvedCampus,
    pad: &HelipadSite,
    job: &HospitalJob,
) -> Result<LightingSet, PipelineError> {
    let mut out = LightingSet::default();
    let strength = job.lighting.night_strength;

    if job.helipad.perimeter_lights {
        let ring = pad.ring();
        for (k, p) in along_perimeter(&ring, perimeter_light_count(job.output.quality))
            .into_iter()
            .enumerate()
        {
            out.lights.push(LightInstance {
                id: format!("pad_light_{:02}", k),
                name: "heli_pad_green".to_string(),
                pos: [p[0], p[1], PAD_LIGHT_HEIGHT_M],
                intensity: strength,
            });
        }
    }

    // One flood at the primary entrance, facing the pad side of the building.
    if let Some(primary) = campus.buildings.iter().find(|b| b.primary) {
        let c = primary.centroid;
        let d = geom::dist(c, pad.center).max(1e-6);
        let (lo, hi) = geom::bounds(&primary.ring);
        let reach = 0.5 * ((hi[0] - lo[0]).min(hi[1] - lo[1])) + 2.0;
        let p = [
            c[0] + (pad.center[0] - c[0]) / d * reach,
            c[1] + (pad.center[1] - c[1]) / d * reach,
        ];
        out.lights.push(LightInstance {
            id: "entry_flood".to_string(),
            name: "full_custom_halo".to_string(),
            pos: [p[0], p[1], ENTRY_LIGHT_HEIGHT_M],
            intensity: strength,
        });
    }

    if job.lighting.interior_glow {
        for b in &campus.buildings {
            if b.role == BuildingRole::Parking {
                continue;
            }
            out.building_lit.push((
                format!("bld_{}", b.id),
                format!("{}_lit.png", b.role.as_str()),
            ));
        }
        out.building_lit.sort();
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::HELIPAD_SIDE_M;
    use crate::geo::{LocalFrame, ResolvedFootprint};
    use crate::job::LatLon;

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

    #[test]
    fn eight_pad_lights_below_high_tier() {
        let job = HospitalJob::new_default("WA22", "Harborview", CENTER, 500.0);
        let set = compose_lighting(&campus(), &pad(), &job).unwrap();
        let pads: Vec<_> = set
            .lights
            .iter()
            .filter(|l| l.name == "heli_pad_green")
            .collect();
        assert_eq!(pads.len(), 8);
        // All on the pad perimeter square.
        for l in &pads {
            let dx = (l.pos[0] - 150.0).abs();
            let dy = l.pos[1].abs();
            let half = HELIPAD_SIDE_M * 0.5;
            assert!((dx - half).abs() < 1e-6 || (dy - half).abs() < 1e-6);
        }
    }

    #[test]
    fn twelve_pad_lights_at_high_tier() {
        let mut job = HospitalJob::new_default("WA22", "Harborview", CENTER, 500.0);
        job.output.quality = QualityTier::High;
        let set = compose_lighting(&campus(), &pad(), &job).unwrap();
        assert_eq!(
            set.lights.iter().filter(|l| l.name == "heli_pad_green").count(),
            12
        );
    }

    #[test]
    fn night_strength_scales_intensity_not_placement() {
        let mut a_job = HospitalJob::new_default("WA22", "Harborview", CENTER, 500.0);
        a_job.lighting.night_strength = 0.2;
        let mut b_job = a_job.clone();
        b_job.lighting.night_strength = 0.9;
        let a = compose_lighting(&campus(), &pad(), &a_job).unwrap();
        let b = compose_lighting(&campus(), &pad(), &b_job).unwrap();
        assert_eq!(a.lights.len(), b.lights.len());
        for (la, lb) in a.lights.iter().zip(&b.lights) {
            assert_eq!(la.pos, lb.pos);
            assert!((la.intensity - 0.2).abs() < 1e-12);
            assert!((lb.intensity - 0.9).abs() < 1e-12);
        }
    }

    #[test]
    fn interior_glow_assigns_lit_textures() {
        let mut job = HospitalJob::new_default("WA22", "Harborview", CENTER, 500.0);
        job.lighting.interior_glow = true;
        let set = compose_lighting(&campus(), &pad(), &job).unwrap();
        assert_eq!(
            set.building_lit,
            vec![("bld_m1".to_string(), "main_lit.png".to_string())]
        );

        job.lighting.interior_glow = false;
        let off = compose_lighting(&campus(), &pad(), &job).unwrap();
        assert!(off.building_lit.is_empty());
    }

    #[test]
    fn perimeter_lights_toggle() {
        let mut job = HospitalJob::new_default("WA22", "Harborview", CENTER, 500.0);
        job.helipad.perimeter_lights = false;
        let set = compose_lighting(&campus(), &pad(), &job).unwrap();
        assert!(set.lights.iter().all(|l| l.name != "heli_pad_green"));
    }
}
