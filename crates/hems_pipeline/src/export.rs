//! Exporter: scene graph -> scenery file set. The only format-aware stage;
//! everything upstream works in local meters, everything here goes through
//! `xpfmt`. Output is an in-memory bundle so it can live in the artifact
//! cache and be written or zipped later.
//!
//! Axis convention: scene space is x east, y north, z up. OBJ8 space is
//! x east, y up, z south, so a scene point maps to `[x, z, -y]`.

use crate::error::PipelineError;
use crate::geo::LocalFrame;
use crate::hash::{Digest, DigestBuilder};
use crate::scene::{LineKind, Mesh, PropKind, SceneGraph, SurfaceKind};
use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use xpfmt::{
    dsf_folder_name, dsf_text_to_bytes, dsf_tile_for, dsf_tile_name, lin_to_bytes, obj8_to_bytes,
    pol_to_bytes, DsfObject, DsfOverlay, DsfPolygon, LinDef, NamedLight, Obj8, ObjVertex, PolDef,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileRole {
    Object,
    Surface,
    Line,
    Overlay,
}

impl FileRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileRole::Object => "object",
            FileRole::Surface => "surface",
            FileRole::Line => "line",
            FileRole::Overlay => "overlay",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportFile {
    /// Forward-slash path relative to the scenery pack root.
    pub path: String,
    pub role: FileRole,
    pub data: Vec<u8>,
}

/// Export stage artifact: the complete scenery pack as path -> bytes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExportBundle {
    pub files: Vec<ExportFile>,
}

impl ExportBundle {
    pub fn find(&self, path: &str) -> Option<&ExportFile> {
        self.files.iter().find(|f| f.path == path)
    }

    pub fn digest(&self) -> Digest {
        let mut b = DigestBuilder::new("export/bundle");
        for f in &self.files {
            b = b.str_field(&f.path).field(&f.data);
        }
        b.finish()
    }
}

/// Format backend seam. One implementation today; the trait keeps the
/// pipeline stages format-agnostic.
pub trait SceneryExporter: Sync {
    fn export(&self, scene: &SceneGraph) -> Result<ExportBundle, PipelineError>;
}

/// X-Plane scenery pack exporter: OBJ8 objects, draped .pol/.lin
/// definitions, and a DSFTool-text overlay tile.
#[derive(Debug, Clone, Copy, Default)]
pub struct XPlaneExporter {
    /// Request terrain flattening under the overlay (helipad sites on
    /// slopes).
    pub flatten: bool,
}

const CAR_LIBRARY_OBJ: &str = "lib/cars/car_static.obj";
const TREE_LIBRARY_OBJ: &str = "lib/vegetation/tree_deciduous.obj";

fn check_mesh(id: &str, mesh: &Mesh) -> Result<(), PipelineError> {
    if mesh.indices.is_empty() || mesh.indices.len() % 3 != 0 {
        return Err(PipelineError::UnsupportedPrimitive(format!(
            "mesh '{}' index count {} is not a triangle list",
            id,
            mesh.indices.len()
        )));
    }
    let n = mesh.vertices.len() as u32;
    if let Some(bad) = mesh.indices.iter().find(|&&i| i >= n) {
        return Err(PipelineError::UnsupportedPrimitive(format!(
            "mesh '{}' index {} out of range ({} vertices)",
            id, bad, n
        )));
    }
    Ok(())
}

#[inline]
fn to_obj_space(p: [f64; 3]) -> [f64; 3] {
    [p[0], p[2], -p[1]]
}

fn line_def_name(kind: LineKind) -> &'static str {
    match kind {
        LineKind::Path => "path",
        LineKind::Road => "road",
        LineKind::Fence => "fence",
        LineKind::PadMarking => "pad_marking",
    }
}

fn lin_def_for(kind: LineKind) -> LinDef {
    let scale_m = match kind {
        LineKind::Path => [5.0, 1.5],
        LineKind::Road => [10.0, 6.0],
        LineKind::Fence => [4.0, 0.3],
        LineKind::PadMarking => [5.0, 0.5],
    };
    LinDef {
        texture: format!("{}.png", line_def_name(kind)),
        scale_m,
    }
}

fn pol_def_for(kind: SurfaceKind, material: &str) -> PolDef {
    let surface = match kind {
        SurfaceKind::Helipad | SurfaceKind::Apron | SurfaceKind::Sidewalk => "concrete",
        SurfaceKind::Parking => "asphalt",
    };
    PolDef {
        texture: format!("{}.png", material),
        scale_m: [25.0, 25.0],
        surface: Some(surface.to_string()),
    }
}

impl SceneryExporter for XPlaneExporter {
    fn export(&self, scene: &SceneGraph) -> Result<ExportBundle, PipelineError> {
        scene.check_unique_ids()?;
        let mut scene = scene.clone();
        scene.sort_nodes();

        let frame = LocalFrame::new(scene.origin);
        let (south, west) = dsf_tile_for(scene.origin.lat, scene.origin.lon);
        let mut dsf = DsfOverlay {
            south,
            west,
            flatten: self.flatten,
            ..DsfOverlay::default()
        };
        let mut files: Vec<ExportFile> = Vec::new();

        // Buildings: one OBJ8 per mesh, re-centered at the footprint
        // centroid so the DSF placement carries the geodetic position.
        for b in &scene.buildings {
            check_mesh(&b.id, &b.mesh)?;
            let c = crate::geom::centroid(&b.footprint);
            let obj = Obj8 {
                texture: b.material.texture.clone(),
                lit_texture: b.material.lit_texture.clone(),
                vertices: b
                    .mesh
                    .vertices
                    .iter()
                    .map(|v| ObjVertex {
                        position: to_obj_space([
                            v.position[0] - c[0],
                            v.position[1] - c[1],
                            v.position[2],
                        ]),
                        normal: to_obj_space(v.normal),
                        uv: v.uv,
                    })
                    .collect(),
                indices: b.mesh.indices.clone(),
                lights: Vec::new(),
            };
            let path = format!("objects/{}.obj", b.id);
            let geo = frame.to_geodetic(c);
            dsf.object_defs.push(path.clone());
            dsf.objects.push(DsfObject {
                def: dsf.object_defs.len() - 1,
                lon: geo.lon,
                lat: geo.lat,
                heading_deg: 0.0,
            });
            files.push(ExportFile {
                path,
                role: FileRole::Object,
                data: obj8_to_bytes(&obj),
            });
        }

        // All named lights ride in one geometry-free object placed at the
        // site origin.
        if !scene.lights.is_empty() {
            let obj = Obj8 {
                texture: "lights.png".to_string(),
                lit_texture: None,
                vertices: Vec::new(),
                indices: Vec::new(),
                lights: scene
                    .lights
                    .iter()
                    .map(|l| NamedLight {
                        name: l.name.clone(),
                        position: to_obj_space(l.pos),
                    })
                    .collect(),
            };
            let path = "objects/site_lights.obj".to_string();
            dsf.object_defs.push(path.clone());
            dsf.objects.push(DsfObject {
                def: dsf.object_defs.len() - 1,
                lon: scene.origin.lon,
                lat: scene.origin.lat,
                heading_deg: 0.0,
            });
            files.push(ExportFile {
                path,
                role: FileRole::Object,
                data: obj8_to_bytes(&obj),
            });
        }

        // Props resolve to library objects; defs are added on first use.
        let mut lib_defs: BTreeMap<&'static str, usize> = BTreeMap::new();
        for p in &scene.props {
            let lib = match p.kind {
                PropKind::Car => CAR_LIBRARY_OBJ,
                PropKind::Tree => TREE_LIBRARY_OBJ,
            };
            let def = *lib_defs.entry(lib).or_insert_with(|| {
                dsf.object_defs.push(lib.to_string());
                dsf.object_defs.len() - 1
            });
            let geo = frame.to_geodetic(p.pos);
            dsf.objects.push(DsfObject {
                def,
                lon: geo.lon,
                lat: geo.lat,
                heading_deg: p.heading_rad.to_degrees().rem_euclid(360.0),
            });
        }

        // Draped surfaces share one .pol per material.
        let mut pol_defs: BTreeMap<String, usize> = BTreeMap::new();
        for s in &scene.surfaces {
            if s.ring.len() < 3 {
                return Err(PipelineError::UnsupportedPrimitive(format!(
                    "surface '{}' has fewer than 3 vertices",
                    s.id
                )));
            }
            let def = match pol_defs.get(&s.material) {
                Some(&def) => def,
                None => {
                    let path = format!("surfaces/{}.pol", s.material);
                    files.push(ExportFile {
                        path: path.clone(),
                        role: FileRole::Surface,
                        data: pol_to_bytes(&pol_def_for(s.kind, &s.material)),
                    });
                    dsf.polygon_defs.push(path);
                    let def = dsf.polygon_defs.len() - 1;
                    pol_defs.insert(s.material.clone(), def);
                    def
                }
            };
            dsf.polygons.push(DsfPolygon {
                def,
                param: 65535,
                winding: s
                    .ring
                    .iter()
                    .map(|p| {
                        let geo = frame.to_geodetic(*p);
                        [geo.lon, geo.lat]
                    })
                    .collect(),
            });
        }

        // Linework shares one .lin per kind; the DSF param carries the
        // closed flag.
        let mut lin_defs: BTreeMap<&'static str, usize> = BTreeMap::new();
        for l in &scene.linework {
            if l.points.len() < 2 {
                return Err(PipelineError::UnsupportedPrimitive(format!(
                    "linework '{}' has fewer than 2 points",
                    l.id
                )));
            }
            let name = line_def_name(l.kind);
            let def = *lin_defs.entry(name).or_insert_with(|| {
                let path = format!("lines/{}.lin", name);
                files.push(ExportFile {
                    path: path.clone(),
                    role: FileRole::Line,
                    data: lin_to_bytes(&lin_def_for(l.kind)),
                });
                dsf.polygon_defs.push(path);
                dsf.polygon_defs.len() - 1
            });
            dsf.polygons.push(DsfPolygon {
                def,
                param: l.closed as u16,
                winding: l
                    .points
                    .iter()
                    .map(|p| {
                        let geo = frame.to_geodetic(*p);
                        [geo.lon, geo.lat]
                    })
                    .collect(),
            });
        }

        files.push(ExportFile {
            path: format!(
                "Earth nav data/{}/{}.dsf",
                dsf_folder_name(south, west),
                dsf_tile_name(south, west)
            ),
            role: FileRole::Overlay,
            data: dsf_text_to_bytes(&dsf),
        });

        files.sort_by(|a, b| a.path.cmp(&b.path));
        debug!("exported {} scenery files", files.len());
        Ok(ExportBundle { files })
    }
}
