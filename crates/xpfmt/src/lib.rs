//! xpfmt: dependency-free writers for the X-Plane scenery text formats.
//!
//! Three formats, all line-oriented ASCII, all emitted with fixed float
//! precision so that identical inputs produce identical bytes:
//!
//! OBJ8 (scenery object geometry, version 800):
//!   A
//!   800
//!   OBJ
//!   TEXTURE <day.png>
//!   [TEXTURE_LIT <night.png>]
//!   POINT_COUNTS <n_vt> 0 0 <n_idx>
//!   VT <x> <y> <z> <nx> <ny> <nz> <s> <t>     (one per vertex, meters)
//!   IDX10 <i0> .. <i9>                        (ten indices per line)
//!   IDX <i>                                   (remainder, one per line)
//!   [LIGHT_NAMED <name> <x> <y> <z>]          (command section)
//!   TRIS <offset> <count>
//!
//! POL (draped polygon definition, version 850):
//!   A
//!   850
//!   DRAPED_POLYGON
//!   TEXTURE_NOWRAP <texture.png>
//!   SCALE <h_m> <v_m>
//!   [SURFACE <name>]
//!
//! LIN (painted line definition, version 850):
//!   A
//!   850
//!   LINE_PAINT
//!   TEXTURE <texture.png>
//!   SCALE <len_m> <width_m>
//!
//! DSF overlay, expressed as DSFTool text source ("DSF2Text"). The binary
//! DSF container is produced from this source by external tooling; the text
//! grammar is the authoritative interchange form this crate targets:
//!   PROPERTY sim/planet earth
//!   PROPERTY sim/overlay 1
//!   PROPERTY sim/west <deg> ... (east/south/north)
//!   OBJECT_DEF <path.obj>
//!   POLYGON_DEF <path.pol>
//!   OBJECT <def-index> <lon> <lat> <heading_deg>
//!   BEGIN_POLYGON <def-index> <param> 2
//!   BEGIN_WINDING
//!   POLYGON_POINT <lon> <lat>
//!   END_WINDING
//!   END_POLYGON

use std::io::{self, Write};

/// One OBJ8 vertex record: position, normal, texture coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ObjVertex {
    pub position: [f64; 3],
    pub normal: [f64; 3],
    pub uv: [f64; 2],
}

/// A named light instance inside an object (e.g. `heli_pad_green`).
#[derive(Debug, Clone, PartialEq)]
pub struct NamedLight {
    pub name: String,
    pub position: [f64; 3],
}

/// In-memory OBJ8 object ready for serialization.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Obj8 {
    pub texture: String,
    pub lit_texture: Option<String>,
    pub vertices: Vec<ObjVertex>,
    pub indices: Vec<u32>,
    pub lights: Vec<NamedLight>,
}

/// Draped-polygon (.pol) definition.
#[derive(Debug, Clone, PartialEq)]
pub struct PolDef {
    pub texture: String,
    /// Horizontal and vertical texture scale in meters.
    pub scale_m: [f64; 2],
    pub surface: Option<String>,
}

/// Painted-line (.lin) definition.
#[derive(Debug, Clone, PartialEq)]
pub struct LinDef {
    pub texture: String,
    /// Texture length along the line and painted width, in meters.
    pub scale_m: [f64; 2],
}

/// An object placement inside a DSF overlay.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DsfObject {
    /// Index into the overlay's `object_defs`.
    pub def: usize,
    pub lon: f64,
    pub lat: f64,
    pub heading_deg: f64,
}

/// A draped-polygon placement: one outer winding of lon/lat vertices.
#[derive(Debug, Clone, PartialEq)]
pub struct DsfPolygon {
    /// Index into the overlay's `polygon_defs`.
    pub def: usize,
    /// Format parameter; 65535 selects texture-space UV mapping for .pol.
    pub param: u16,
    pub winding: Vec<[f64; 2]>,
}

/// One 1x1-degree DSF overlay tile.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DsfOverlay {
    pub south: i32,
    pub west: i32,
    /// Emit `PROPERTY sim/flatten 1` so the sim levels terrain under the
    /// overlay's footprint.
    pub flatten: bool,
    pub object_defs: Vec<String>,
    pub polygon_defs: Vec<String>,
    pub objects: Vec<DsfObject>,
    pub polygons: Vec<DsfPolygon>,
}

/// Tile folder/file stem for a location, e.g. `+47-123`.
pub fn dsf_tile_name(south: i32, west: i32) -> String {
    format!(
        "{}{:02}{}{:03}",
        if south >= 0 { "+" } else { "-" },
        south.abs(),
        if west >= 0 { "+" } else { "-" },
        west.abs()
    )
}

/// Tile containing a geographic coordinate (floor to 1-degree grid).
pub fn dsf_tile_for(lat: f64, lon: f64) -> (i32, i32) {
    (lat.floor() as i32, lon.floor() as i32)
}

/// Enclosing 10x10-degree folder for a tile, e.g. `+40-130` for `+47-123`.
pub fn dsf_folder_name(south: i32, west: i32) -> String {
    dsf_tile_name(south.div_euclid(10) * 10, west.div_euclid(10) * 10)
}

#[inline]
fn fmt3(v: f64) -> String {
    format!("{:.3}", v)
}

#[inline]
fn fmt4(v: f64) -> String {
    format!("{:.4}", v)
}

#[inline]
fn fmt8(v: f64) -> String {
    format!("{:.8}", v)
}

pub fn write_obj8<W: Write>(w: &mut W, obj: &Obj8) -> io::Result<()> {
    writeln!(w, "A")?;
    writeln!(w, "800")?;
    writeln!(w, "OBJ")?;
    writeln!(w)?;
    writeln!(w, "TEXTURE {}", obj.texture)?;
    if let Some(lit) = &obj.lit_texture {
        writeln!(w, "TEXTURE_LIT {}", lit)?;
    }
    writeln!(w)?;
    writeln!(
        w,
        "POINT_COUNTS {} 0 0 {}",
        obj.vertices.len(),
        obj.indices.len()
    )?;
    writeln!(w)?;

    for v in &obj.vertices {
        writeln!(
            w,
            "VT {} {} {} {} {} {} {} {}",
            fmt3(v.position[0]),
            fmt3(v.position[1]),
            fmt3(v.position[2]),
            fmt3(v.normal[0]),
            fmt3(v.normal[1]),
            fmt3(v.normal[2]),
            fmt4(v.uv[0]),
            fmt4(v.uv[1]),
        )?;
    }
    writeln!(w)?;

    // Indices: batches of ten on IDX10 lines, the remainder one per IDX line.
    let mut chunks = obj.indices.chunks_exact(10);
    for chunk in &mut chunks {
        let joined: Vec<String> = chunk.iter().map(|i| i.to_string()).collect();
        writeln!(w, "IDX10 {}", joined.join(" "))?;
    }
    for i in chunks.remainder() {
        writeln!(w, "IDX {}", i)?;
    }
    writeln!(w)?;

    for light in &obj.lights {
        writeln!(
            w,
            "LIGHT_NAMED {} {} {} {}",
            light.name,
            fmt3(light.position[0]),
            fmt3(light.position[1]),
            fmt3(light.position[2]),
        )?;
    }
    writeln!(w, "TRIS 0 {}", obj.indices.len())?;

    Ok(())
}

pub fn write_pol<W: Write>(w: &mut W, pol: &PolDef) -> io::Result<()> {
    writeln!(w, "A")?;
    writeln!(w, "850")?;
    writeln!(w, "DRAPED_POLYGON")?;
    writeln!(w)?;
    writeln!(w, "TEXTURE_NOWRAP {}", pol.texture)?;
    writeln!(w, "SCALE {} {}", fmt3(pol.scale_m[0]), fmt3(pol.scale_m[1]))?;
    if let Some(surface) = &pol.surface {
        writeln!(w, "SURFACE {}", surface)?;
    }

    Ok(())
}

pub fn write_lin<W: Write>(w: &mut W, lin: &LinDef) -> io::Result<()> {
    writeln!(w, "A")?;
    writeln!(w, "850")?;
    writeln!(w, "LINE_PAINT")?;
    writeln!(w)?;
    writeln!(w, "TEXTURE {}", lin.texture)?;
    writeln!(w, "SCALE {} {}", fmt3(lin.scale_m[0]), fmt3(lin.scale_m[1]))?;

    Ok(())
}

pub fn write_dsf_text<W: Write>(w: &mut W, dsf: &DsfOverlay) -> io::Result<()> {
    writeln!(w, "PROPERTY sim/planet earth")?;
    writeln!(w, "PROPERTY sim/overlay 1")?;
    if dsf.flatten {
        writeln!(w, "PROPERTY sim/flatten 1")?;
    }
    writeln!(w, "PROPERTY sim/west {}", dsf.west)?;
    writeln!(w, "PROPERTY sim/east {}", dsf.west + 1)?;
    writeln!(w, "PROPERTY sim/south {}", dsf.south)?;
    writeln!(w, "PROPERTY sim/north {}", dsf.south + 1)?;

    for def in &dsf.object_defs {
        writeln!(w, "OBJECT_DEF {}", def)?;
    }
    for def in &dsf.polygon_defs {
        writeln!(w, "POLYGON_DEF {}", def)?;
    }

    for obj in &dsf.objects {
        writeln!(
            w,
            "OBJECT {} {} {} {}",
            obj.def,
            fmt8(obj.lon),
            fmt8(obj.lat),
            fmt4(obj.heading_deg),
        )?;
    }

    for poly in &dsf.polygons {
        writeln!(w, "BEGIN_POLYGON {} {} 2", poly.def, poly.param)?;
        writeln!(w, "BEGIN_WINDING")?;
        for p in &poly.winding {
            writeln!(w, "POLYGON_POINT {} {}", fmt8(p[0]), fmt8(p[1]))?;
        }
        writeln!(w, "END_WINDING")?;
        writeln!(w, "END_POLYGON")?;
    }

    Ok(())
}

/// Serialize to an owned byte buffer; infallible writer, so no io error path.
pub fn obj8_to_bytes(obj: &Obj8) -> Vec<u8> {
    let mut out = Vec::new();
    write_obj8(&mut out, obj).expect("write to Vec cannot fail");
    out
}

pub fn pol_to_bytes(pol: &PolDef) -> Vec<u8> {
    let mut out = Vec::new();
    write_pol(&mut out, pol).expect("write to Vec cannot fail");
    out
}

pub fn lin_to_bytes(lin: &LinDef) -> Vec<u8> {
    let mut out = Vec::new();
    write_lin(&mut out, lin).expect("write to Vec cannot fail");
    out
}

pub fn dsf_text_to_bytes(dsf: &DsfOverlay) -> Vec<u8> {
    let mut out = Vec::new();
    write_dsf_text(&mut out, dsf).expect("write to Vec cannot fail");
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quad() -> Obj8 {
        let n = [0.0, 1.0, 0.0];
        Obj8 {
            texture: "hospital.png".into(),
            lit_texture: Some("hospital_LIT.png".into()),
            vertices: vec![
                ObjVertex { position: [-1.0, 0.0, -1.0], normal: n, uv: [0.0, 0.0] },
                ObjVertex { position: [1.0, 0.0, -1.0], normal: n, uv: [1.0, 0.0] },
                ObjVertex { position: [1.0, 0.0, 1.0], normal: n, uv: [1.0, 1.0] },
                ObjVertex { position: [-1.0, 0.0, 1.0], normal: n, uv: [0.0, 1.0] },
            ],
            indices: vec![0, 1, 2, 0, 2, 3],
            lights: vec![],
        }
    }

    #[test]
    fn obj8_header_and_counts() {
        let text = String::from_utf8(obj8_to_bytes(&quad())).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(&lines[..3], &["A", "800", "OBJ"]);
        assert!(text.contains("TEXTURE hospital.png"));
        assert!(text.contains("TEXTURE_LIT hospital_LIT.png"));
        assert!(text.contains("POINT_COUNTS 4 0 0 6"));
        assert!(text.contains("VT -1.000 0.000 -1.000 0.000 1.000 0.000 0.0000 0.0000"));
        assert!(text.ends_with("TRIS 0 6\n"));
    }

    #[test]
    fn obj8_index_batching() {
        let mut obj = quad();
        obj.indices = (0..23).collect();
        let text = String::from_utf8(obj8_to_bytes(&obj)).unwrap();
        assert_eq!(text.matches("IDX10 ").count(), 2);
        assert_eq!(text.matches("\nIDX ").count(), 3);
    }

    #[test]
    fn obj8_is_byte_stable() {
        let obj = quad();
        assert_eq!(obj8_to_bytes(&obj), obj8_to_bytes(&obj));
    }

    #[test]
    fn pol_grammar() {
        let pol = PolDef {
            texture: "apron.png".into(),
            scale_m: [25.0, 25.0],
            surface: Some("concrete".into()),
        };
        let text = String::from_utf8(pol_to_bytes(&pol)).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(&lines[..3], &["A", "850", "DRAPED_POLYGON"]);
        assert!(text.contains("TEXTURE_NOWRAP apron.png"));
        assert!(text.contains("SCALE 25.000 25.000"));
        assert!(text.contains("SURFACE concrete"));
    }

    #[test]
    fn dsf_tile_naming() {
        assert_eq!(dsf_tile_name(47, -123), "+47-123");
        assert_eq!(dsf_tile_name(-9, 7), "-09+007");
        assert_eq!(dsf_tile_for(47.6, -122.3), (47, -123));
        assert_eq!(dsf_folder_name(47, -123), "+40-130");
        assert_eq!(dsf_folder_name(-9, 7), "-10+000");
    }

    #[test]
    fn lin_grammar() {
        let lin = LinDef {
            texture: "path.png".into(),
            scale_m: [5.0, 1.2],
        };
        let text = String::from_utf8(lin_to_bytes(&lin)).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(&lines[..3], &["A", "850", "LINE_PAINT"]);
        assert!(text.contains("SCALE 5.000 1.200"));
    }

    #[test]
    fn dsf_text_overlay() {
        let dsf = DsfOverlay {
            south: 47,
            west: -123,
            flatten: true,
            object_defs: vec!["objects/bld_a.obj".into()],
            polygon_defs: vec!["polygons/apron.pol".into()],
            objects: vec![DsfObject { def: 0, lon: -122.5, lat: 47.25, heading_deg: 0.0 }],
            polygons: vec![DsfPolygon {
                def: 0,
                param: 65535,
                winding: vec![[-122.5, 47.25], [-122.499, 47.25], [-122.499, 47.251]],
            }],
        };
        let text = String::from_utf8(dsf_text_to_bytes(&dsf)).unwrap();
        assert!(text.starts_with("PROPERTY sim/planet earth\nPROPERTY sim/overlay 1\n"));
        assert!(text.contains("PROPERTY sim/flatten 1"));
        assert!(text.contains("PROPERTY sim/west -123"));
        assert!(text.contains("PROPERTY sim/east -122"));
        assert!(text.contains("OBJECT_DEF objects/bld_a.obj"));
        assert!(text.contains("OBJECT 0 -122.50000000 47.25000000 0.0000"));
        assert!(text.contains("BEGIN_POLYGON 0 65535 2"));
        assert_eq!(text.matches("POLYGON_POINT").count(), 3);
    }
}
