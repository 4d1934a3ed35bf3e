//! Job descriptor model: the single source of truth for one hospital site.
//!
//! A loaded job is immutable; UI-style edits go through [`JobOverride`] and
//! produce a new job value with fresh digests. The pipeline itself never
//! mutates a job.

use crate::error::PipelineError;
use crate::geo;
use crate::hash::{Digest, DigestBuilder};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct LatLon {
    pub lat: f64,
    pub lon: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Aoi {
    pub radius_m: f64,
}

impl Default for Aoi {
    fn default() -> Self {
        Self { radius_m: 600.0 }
    }
}

/// Closed role set; classification never silently defaults, it falls back to
/// `Unclassified` which downstream stages treat as a low small structure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BuildingRole {
    Main,
    Clinic,
    Office,
    Service,
    Parking,
    Unclassified,
}

impl BuildingRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            BuildingRole::Main => "main",
            BuildingRole::Clinic => "clinic",
            BuildingRole::Office => "office",
            BuildingRole::Service => "service",
            BuildingRole::Parking => "parking",
            BuildingRole::Unclassified => "unclassified",
        }
    }
}

/// A user-pinned role for one footprint id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildingPin {
    pub id: String,
    pub role: BuildingRole,
    #[serde(default)]
    pub primary: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CampusSpec {
    #[serde(default)]
    pub buildings: Vec<BuildingPin>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HelipadMode {
    Auto,
    Manual,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HelipadSpec {
    pub mode: HelipadMode,
    #[serde(default)]
    pub position: Option<LatLon>,
    #[serde(default = "default_surface")]
    pub surface: String,
    #[serde(default = "default_true")]
    pub perimeter_lights: bool,
}

fn default_surface() -> String {
    "concrete".to_string()
}

fn default_true() -> bool {
    true
}

impl Default for HelipadSpec {
    fn default() -> Self {
        Self {
            mode: HelipadMode::Auto,
            position: None,
            surface: default_surface(),
            perimeter_lights: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroundSpec {
    #[serde(default = "default_true")]
    pub parking: bool,
    #[serde(default = "default_true")]
    pub sidewalks: bool,
    #[serde(default = "default_true")]
    pub fences: bool,
    #[serde(default = "default_true")]
    pub roads: bool,
}

impl Default for GroundSpec {
    fn default() -> Self {
        Self {
            parking: true,
            sidewalks: true,
            fences: true,
            roads: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropsSpec {
    #[serde(default = "default_cars_density")]
    pub cars_density: f64,
    #[serde(default = "default_true")]
    pub trees: bool,
}

fn default_cars_density() -> f64 {
    0.7
}

impl Default for PropsSpec {
    fn default() -> Self {
        Self {
            cars_density: default_cars_density(),
            trees: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LightingSpec {
    #[serde(default = "default_night_strength")]
    pub night_strength: f64,
    #[serde(default = "default_true")]
    pub interior_glow: bool,
}

fn default_night_strength() -> f64 {
    0.6
}

impl Default for LightingSpec {
    fn default() -> Self {
        Self {
            night_strength: default_night_strength(),
            interior_glow: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QualityTier {
    Low,
    Medium,
    High,
}

impl QualityTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            QualityTier::Low => "low",
            QualityTier::Medium => "medium",
            QualityTier::High => "high",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputSpec {
    pub quality: QualityTier,
    #[serde(default = "default_true")]
    pub flatten_helipad: bool,
}

impl Default for OutputSpec {
    fn default() -> Self {
        Self {
            quality: QualityTier::Medium,
            flatten_helipad: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HospitalJob {
    pub id: String,
    pub name: String,
    pub location: LatLon,
    #[serde(default)]
    pub aoi: Aoi,
    #[serde(default)]
    pub campus: CampusSpec,
    #[serde(default)]
    pub helipad: HelipadSpec,
    #[serde(default)]
    pub ground: GroundSpec,
    #[serde(default)]
    pub props: PropsSpec,
    #[serde(default)]
    pub lighting: LightingSpec,
    #[serde(default)]
    pub output: OutputSpec,
}

/// Per-component digests; cache keys draw only on the components a stage
/// actually consumes, which is what localizes invalidation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JobDigest {
    pub full: Digest,
    pub site: Digest,
    pub footprints: Digest,
    pub helipad: Digest,
    pub ground: Digest,
    pub props: Digest,
    pub lighting: Digest,
    pub output: Digest,
}

/// Explicit preview-edit operations. Each produces a new job value.
#[derive(Debug, Clone, PartialEq)]
pub enum JobOverride {
    /// Helipad drag in the preview: pin the pad and switch to manual mode.
    HelipadPosition(LatLon),
    /// Reassign the role of one pinned footprint (added if absent).
    PinRole { id: String, role: BuildingRole },
    /// Mark one footprint as the primary main building, clearing any other.
    SelectPrimary { id: String },
    Quality(QualityTier),
}

impl HospitalJob {
    pub fn new_default(id: &str, name: &str, location: LatLon, aoi_radius_m: f64) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            location,
            aoi: Aoi {
                radius_m: aoi_radius_m,
            },
            campus: CampusSpec::default(),
            helipad: HelipadSpec::default(),
            ground: GroundSpec::default(),
            props: PropsSpec::default(),
            lighting: LightingSpec::default(),
            output: OutputSpec::default(),
        }
    }

    pub fn from_json(text: &str) -> Result<Self, PipelineError> {
        serde_json::from_str(text).map_err(|e| PipelineError::InvalidJob(e.to_string()))
    }

    pub fn to_json(&self) -> String {
        // Struct field order is the serialization order, which keeps the
        // persisted form stable across runs.
        serde_json::to_string_pretty(self).unwrap_or_default()
    }

    pub fn load(path: &Path) -> Result<Self, PipelineError> {
        let text = fs::read_to_string(path)
            .map_err(|e| PipelineError::InvalidJob(format!("{}: {}", path.display(), e)))?;
        Self::from_json(&text)
    }

    pub fn save(&self, path: &Path) -> Result<(), PipelineError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, self.to_json())?;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), PipelineError> {
        let violation = |msg: String| Err(PipelineError::SchemaViolation(msg));

        if self.id.trim().is_empty() {
            return violation("site id is empty".into());
        }
        if !self.location.lat.is_finite() || !self.location.lon.is_finite() {
            return violation("location has non-finite coordinates".into());
        }
        if self.location.lat.abs() > 90.0 || self.location.lon.abs() > 180.0 {
            return violation(format!(
                "location out of range: lat={} lon={}",
                self.location.lat, self.location.lon
            ));
        }
        if !(self.aoi.radius_m > 0.0) {
            return violation(format!("AOI radius must be > 0, got {}", self.aoi.radius_m));
        }

        let mut seen_ids = std::collections::BTreeSet::new();
        let mut primaries = 0usize;
        for pin in &self.campus.buildings {
            if !seen_ids.insert(pin.id.as_str()) {
                return violation(format!("duplicate building pin id '{}'", pin.id));
            }
            if pin.primary {
                primaries += 1;
                if pin.role != BuildingRole::Main {
                    return violation(format!(
                        "primary pin '{}' must have role 'main', got '{}'",
                        pin.id,
                        pin.role.as_str()
                    ));
                }
            }
        }
        if primaries > 1 {
            return violation(format!("{} primary pins, at most one allowed", primaries));
        }

        match (self.helipad.mode, self.helipad.position) {
            (HelipadMode::Manual, None) => {
                return violation("manual helipad mode requires a position".into());
            }
            (HelipadMode::Manual, Some(pos)) => {
                let dist = geo::ground_distance_m(self.location, pos);
                if dist > self.aoi.radius_m {
                    return violation(format!(
                        "manual helipad {:.0} m from site center, outside {:.0} m AOI",
                        dist, self.aoi.radius_m
                    ));
                }
            }
            (HelipadMode::Auto, _) => {}
        }

        if !(0.0..=1.0).contains(&self.props.cars_density) {
            return violation(format!(
                "cars_density must be in [0, 1], got {}",
                self.props.cars_density
            ));
        }
        if !(0.0..=1.0).contains(&self.lighting.night_strength) {
            return violation(format!(
                "night_strength must be in [0, 1], got {}",
                self.lighting.night_strength
            ));
        }

        Ok(())
    }

    /// Pure content digest over normalized field values. Building pins hash
    /// as a set keyed by id: reordering the pin list changes nothing.
    pub fn digest(&self) -> JobDigest {
        let site = DigestBuilder::new("job/site")
            .str_field(&self.id)
            .str_field(&self.name)
            .f64_field(self.location.lat)
            .f64_field(self.location.lon)
            .f64_field(self.aoi.radius_m)
            .finish();

        let mut pins: Vec<&BuildingPin> = self.campus.buildings.iter().collect();
        pins.sort_by(|a, b| a.id.cmp(&b.id));
        let mut fp = DigestBuilder::new("job/footprints");
        for pin in pins {
            fp = fp
                .str_field(&pin.id)
                .str_field(pin.role.as_str())
                .field(&[pin.primary as u8]);
        }
        let footprints = fp.finish();

        let mut hp = DigestBuilder::new("job/helipad").str_field(match self.helipad.mode {
            HelipadMode::Auto => "auto",
            HelipadMode::Manual => "manual",
        });
        match self.helipad.position {
            Some(pos) => hp = hp.f64_field(pos.lat).f64_field(pos.lon),
            None => hp = hp.str_field("none"),
        }
        let helipad = hp
            .str_field(&self.helipad.surface)
            .field(&[self.helipad.perimeter_lights as u8])
            .finish();

        let ground = DigestBuilder::new("job/ground")
            .field(&[
                self.ground.parking as u8,
                self.ground.sidewalks as u8,
                self.ground.fences as u8,
                self.ground.roads as u8,
            ])
            .finish();

        let props = DigestBuilder::new("job/props")
            .f64_field(self.props.cars_density)
            .field(&[self.props.trees as u8])
            .finish();

        let lighting = DigestBuilder::new("job/lighting")
            .f64_field(self.lighting.night_strength)
            .field(&[self.lighting.interior_glow as u8])
            .finish();

        let output = DigestBuilder::new("job/output")
            .str_field(self.output.quality.as_str())
            .field(&[self.output.flatten_helipad as u8])
            .finish();

        let full = DigestBuilder::new("job/full")
            .digest_field(&site)
            .digest_field(&footprints)
            .digest_field(&helipad)
            .digest_field(&ground)
            .digest_field(&props)
            .digest_field(&lighting)
            .digest_field(&output)
            .finish();

        JobDigest {
            full,
            site,
            footprints,
            helipad,
            ground,
            props,
            lighting,
            output,
        }
    }

    /// Apply one override, producing a new job. The receiver is untouched.
    pub fn with_override(&self, op: JobOverride) -> HospitalJob {
        let mut next = self.clone();
        match op {
            JobOverride::HelipadPosition(pos) => {
                next.helipad.mode = HelipadMode::Manual;
                next.helipad.position = Some(pos);
            }
            JobOverride::PinRole { id, role } => {
                match next.campus.buildings.iter_mut().find(|p| p.id == id) {
                    Some(pin) => pin.role = role,
                    None => next.campus.buildings.push(BuildingPin {
                        id,
                        role,
                        primary: false,
                    }),
                }
            }
            JobOverride::SelectPrimary { id } => {
                for pin in &mut next.campus.buildings {
                    pin.primary = false;
                }
                match next.campus.buildings.iter_mut().find(|p| p.id == id) {
                    Some(pin) => {
                        pin.primary = true;
                        pin.role = BuildingRole::Main;
                    }
                    None => next.campus.buildings.push(BuildingPin {
                        id,
                        role: BuildingRole::Main,
                        primary: true,
                    }),
                }
            }
            JobOverride::Quality(tier) => next.output.quality = tier,
        }
        next
    }
}
