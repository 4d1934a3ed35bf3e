//! In-memory scene graph for one site: typed nodes in local meters, with
//! stable string ids. The graph is rebuilt each run from job + cache; it is
//! persisted (`scene.json`) for inspection and diffing only, never read back
//! as a source of truth.

use crate::error::PipelineError;
use crate::geom::P2;
use crate::job::{BuildingRole, LatLon};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Vertex {
    pub position: [f64; 3],
    pub normal: [f64; 3],
    pub uv: [f64; 2],
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Mesh {
    pub vertices: Vec<Vertex>,
    pub indices: Vec<u32>,
}

impl Mesh {
    pub fn triangle_count(&self) -> usize {
        self.indices.len() / 3
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MaterialRef {
    pub texture: String,
    /// Night texture variant, filled in by the Lighting Composer.
    #[serde(default)]
    pub lit_texture: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildingMesh {
    pub id: String,
    pub role: BuildingRole,
    pub primary: bool,
    pub height_m: f64,
    pub mesh: Mesh,
    pub material: MaterialRef,
    /// Ground-plane ring the mesh was extruded from.
    pub footprint: Vec<P2>,
    /// Number of roof-detail nodes beyond the flat cap (0 at Low tier).
    pub roof_detail: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SurfaceKind {
    Helipad,
    Parking,
    Apron,
    Sidewalk,
}

impl SurfaceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SurfaceKind::Helipad => "helipad",
            SurfaceKind::Parking => "parking",
            SurfaceKind::Apron => "apron",
            SurfaceKind::Sidewalk => "sidewalk",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroundPolygon {
    pub id: String,
    pub kind: SurfaceKind,
    pub ring: Vec<P2>,
    /// Draped-polygon definition name, e.g. `apron`.
    pub material: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LineKind {
    Path,
    Road,
    Fence,
    PadMarking,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Linework {
    pub id: String,
    pub kind: LineKind,
    pub points: Vec<P2>,
    /// Closed loop (fences, pad markings) vs open path.
    pub closed: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PropKind {
    Car,
    Tree,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropInstance {
    pub id: String,
    pub kind: PropKind,
    pub pos: P2,
    pub heading_rad: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LightInstance {
    pub id: String,
    /// Named light as understood by the sim, e.g. `heli_pad_green`.
    pub name: String,
    pub pos: [f64; 3],
    pub intensity: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SceneGraph {
    pub origin: LatLon,
    pub site_elev_m: f64,
    pub buildings: Vec<BuildingMesh>,
    pub surfaces: Vec<GroundPolygon>,
    pub linework: Vec<Linework>,
    pub props: Vec<PropInstance>,
    pub lights: Vec<LightInstance>,
}

impl SceneGraph {
    /// Sort every node class by id; export traverses in this order, which is
    /// what keeps regenerated output byte-identical.
    pub fn sort_nodes(&mut self) {
        self.buildings.sort_by(|a, b| a.id.cmp(&b.id));
        self.surfaces.sort_by(|a, b| a.id.cmp(&b.id));
        self.linework.sort_by(|a, b| a.id.cmp(&b.id));
        self.props.sort_by(|a, b| a.id.cmp(&b.id));
        self.lights.sort_by(|a, b| a.id.cmp(&b.id));
    }

    pub fn node_ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = Vec::new();
        ids.extend(self.buildings.iter().map(|n| n.id.as_str()));
        ids.extend(self.surfaces.iter().map(|n| n.id.as_str()));
        ids.extend(self.linework.iter().map(|n| n.id.as_str()));
        ids.extend(self.props.iter().map(|n| n.id.as_str()));
        ids.extend(self.lights.iter().map(|n| n.id.as_str()));
        ids
    }

    pub fn check_unique_ids(&self) -> Result<(), PipelineError> {
        let mut seen = BTreeSet::new();
        for id in self.node_ids() {
            if !seen.insert(id) {
                return Err(PipelineError::Internal(format!(
                    "duplicate scene node id '{}'",
                    id
                )));
            }
        }
        Ok(())
    }

    pub fn helipad(&self) -> Option<&GroundPolygon> {
        self.surfaces.iter().find(|s| s.kind == SurfaceKind::Helipad)
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_default()
    }

    pub fn save(&self, path: &Path) -> Result<(), PipelineError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, self.to_json())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_ids_are_rejected() {
        let mut scene = SceneGraph::default();
        scene.props.push(PropInstance {
            id: "x".into(),
            kind: PropKind::Tree,
            pos: [0.0, 0.0],
            heading_rad: 0.0,
        });
        scene.lights.push(LightInstance {
            id: "x".into(),
            name: "heli_pad_green".into(),
            pos: [0.0, 0.0, 0.0],
            intensity: 1.0,
        });
        assert!(scene.check_unique_ids().is_err());
    }

    #[test]
    fn sorting_is_stable_by_id() {
        let mut scene = SceneGraph::default();
        for id in ["b", "a", "c"] {
            scene.props.push(PropInstance {
                id: id.into(),
                kind: PropKind::Car,
                pos: [0.0, 0.0],
                heading_rad: 0.0,
            });
        }
        scene.sort_nodes();
        assert_eq!(scene.node_ids(), vec!["a", "b", "c"]);
    }
}
