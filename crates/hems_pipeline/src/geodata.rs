//! Geodata collaborator boundary. The pipeline consumes footprints and
//! elevation samples keyed by (location, radius); how they were fetched
//! (Overpass, DEM tiles) is not this crate's concern.

use crate::error::PipelineError;
use crate::geo;
use crate::hash::{Digest, DigestBuilder};
use crate::job::LatLon;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawFootprint {
    pub id: String,
    /// Outer ring in lat/lon, open (no closing vertex).
    pub ring: Vec<LatLon>,
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ElevationSample {
    pub pos: LatLon,
    pub elev_m: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawGeodata {
    #[serde(default)]
    pub footprints: Vec<RawFootprint>,
    #[serde(default)]
    pub elevation: Vec<ElevationSample>,
}

impl RawGeodata {
    /// Content digest used in cache key derivation; footprint order in the
    /// source never matters.
    pub fn digest(&self) -> Digest {
        let mut fps: Vec<&RawFootprint> = self.footprints.iter().collect();
        fps.sort_by(|a, b| a.id.cmp(&b.id));
        let mut b = DigestBuilder::new("geodata");
        for fp in fps {
            b = b.str_field(&fp.id);
            for v in &fp.ring {
                b = b.f64_field(v.lat).f64_field(v.lon);
            }
            for (k, v) in &fp.tags {
                b = b.str_field(k).str_field(v);
            }
        }
        for s in &self.elevation {
            b = b.f64_field(s.pos.lat).f64_field(s.pos.lon).f64_field(s.elev_m);
        }
        b.finish()
    }

    fn filtered_to(&self, center: LatLon, radius_m: f64) -> RawGeodata {
        // Keep footprints with any vertex inside the AOI (plus a margin so
        // boundary-crossing rings survive to the clipping stage).
        let margin = radius_m + 100.0;
        RawGeodata {
            footprints: self
                .footprints
                .iter()
                .filter(|fp| {
                    fp.ring
                        .iter()
                        .any(|v| geo::ground_distance_m(center, *v) <= margin)
                })
                .cloned()
                .collect(),
            elevation: self
                .elevation
                .iter()
                .filter(|s| geo::ground_distance_m(center, s.pos) <= margin)
                .copied()
                .collect(),
        }
    }
}

pub trait GeodataSource: Sync {
    fn query(&self, center: LatLon, radius_m: f64) -> Result<RawGeodata, PipelineError>;
}

/// Fixed in-memory geodata; the test and preview source.
#[derive(Debug, Clone, Default)]
pub struct StaticGeodata {
    pub data: RawGeodata,
}

impl StaticGeodata {
    pub fn new(data: RawGeodata) -> Self {
        Self { data }
    }
}

impl GeodataSource for StaticGeodata {
    fn query(&self, center: LatLon, radius_m: f64) -> Result<RawGeodata, PipelineError> {
        Ok(self.data.filtered_to(center, radius_m))
    }
}

/// Reads pre-fetched geodata fixtures (`*.json`, one `RawGeodata` each) from
/// a directory and serves whatever covers the queried AOI. An empty result
/// is not an error here; the resolver decides whether that is fatal.
/// Parsed files are memoized so a batch does not re-read them per job.
pub struct FileGeodataSource {
    files: Vec<PathBuf>,
    parsed: RwLock<BTreeMap<PathBuf, Arc<RawGeodata>>>,
}

impl FileGeodataSource {
    pub fn open(dir: &Path) -> Result<Self, PipelineError> {
        let mut files = Vec::new();
        if dir.is_dir() {
            for entry in fs::read_dir(dir)
                .map_err(|e| PipelineError::Geodata(format!("{}: {}", dir.display(), e)))?
            {
                let entry = entry.map_err(|e| PipelineError::Geodata(e.to_string()))?;
                let path = entry.path();
                if path.extension().and_then(|s| s.to_str()) == Some("json") {
                    files.push(path);
                }
            }
        }
        // Deterministic service order regardless of directory enumeration.
        files.sort();
        Ok(Self {
            files,
            parsed: RwLock::new(BTreeMap::new()),
        })
    }

    fn load(&self, path: &Path) -> Result<Arc<RawGeodata>, PipelineError> {
        if let Some(raw) = self.parsed.read().get(path) {
            return Ok(Arc::clone(raw));
        }
        let text = fs::read_to_string(path)
            .map_err(|e| PipelineError::Geodata(format!("{}: {}", path.display(), e)))?;
        let raw: RawGeodata = serde_json::from_str(&text)
            .map_err(|e| PipelineError::Geodata(format!("{}: {}", path.display(), e)))?;
        let raw = Arc::new(raw);
        self.parsed
            .write()
            .insert(path.to_path_buf(), Arc::clone(&raw));
        Ok(raw)
    }
}

impl GeodataSource for FileGeodataSource {
    fn query(&self, center: LatLon, radius_m: f64) -> Result<RawGeodata, PipelineError> {
        let mut merged = RawGeodata::default();
        for path in &self.files {
            let raw = self.load(path)?;
            let hit = raw.filtered_to(center, radius_m);
            merged.footprints.extend(hit.footprints);
            merged.elevation.extend(hit.elevation);
        }
        Ok(merged)
    }
}
