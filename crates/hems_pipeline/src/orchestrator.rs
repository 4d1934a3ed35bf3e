//! Batch orchestrator: runs jobs across a bounded rayon pool, chaining the
//! six cached stages per job and packaging the result. One job failing
//! never aborts its siblings; the batch report carries every outcome.
//!
//! Stage inputs chain content digests, so two jobs sharing identical
//! upstream inputs share cache entries even when run concurrently.

use crate::builder::{self, BuildingSet, HelipadSite};
use crate::cache::{self, ArtifactCache};
use crate::error::{JobFailure, PipelineError};
use crate::export::{ExportBundle, SceneryExporter, XPlaneExporter};
use crate::geo::{self, ResolvedCampus};
use crate::geodata::GeodataSource;
use crate::job::HospitalJob;
use crate::lighting::{self, LightingSet};
use crate::package::{self, PackageArtifacts};
use crate::scene::SceneGraph;
use crate::surface::{self, SurfaceSet};
use log::{info, warn};
use rayon::prelude::*;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

pub const STAGE_GEO_RESOLVE: &str = "geo_resolve";
pub const STAGE_BUILDING_MESHES: &str = "building_meshes";
pub const STAGE_HELIPAD_SITE: &str = "helipad_site";
pub const STAGE_SURFACES: &str = "surfaces";
pub const STAGE_LIGHTING: &str = "lighting";
pub const STAGE_EXPORT: &str = "export";

#[derive(Debug, Clone)]
pub struct PipelineOptions {
    pub output_dir: PathBuf,
    /// Worker threads for the batch pool; 0 means one per core.
    pub parallelism: usize,
    pub overwrite: bool,
    pub job_timeout: Option<Duration>,
    /// Also write `scene.json` into each pack directory for inspection.
    pub write_scene_json: bool,
    /// Collect finished site zips into one dated bulk archive.
    pub bulk: bool,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("output"),
            parallelism: 0,
            overwrite: false,
            job_timeout: None,
            write_scene_json: false,
            bulk: true,
        }
    }
}

/// Cooperative cancellation checked at stage boundaries. A stage that has
/// already started runs to completion; the next boundary observes the flag.
#[derive(Debug, Clone)]
pub struct StageGate {
    cancel: Arc<AtomicBool>,
    deadline: Option<Instant>,
}

impl StageGate {
    pub fn new(cancel: Arc<AtomicBool>, deadline: Option<Instant>) -> Self {
        Self { cancel, deadline }
    }

    pub fn open() -> Self {
        Self::new(Arc::new(AtomicBool::new(false)), None)
    }

    pub fn with_timeout(cancel: Arc<AtomicBool>, timeout: Option<Duration>) -> Self {
        Self::new(cancel, timeout.map(|t| Instant::now() + t))
    }

    pub fn check(&self) -> Result<(), PipelineError> {
        if self.cancel.load(Ordering::Relaxed) {
            return Err(PipelineError::Cancelled);
        }
        if let Some(deadline) = self.deadline {
            if Instant::now() >= deadline {
                return Err(PipelineError::Timeout);
            }
        }
        Ok(())
    }
}

#[derive(Debug)]
pub struct JobOutcome {
    pub site_id: String,
    pub job_hash: String,
    pub package: PackageArtifacts,
    pub elapsed: Duration,
}

#[derive(Debug, Default)]
pub struct BatchReport {
    pub outcomes: Vec<Result<JobOutcome, JobFailure>>,
    pub bulk_path: Option<PathBuf>,
    pub elapsed: Duration,
}

impl BatchReport {
    pub fn succeeded(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_ok()).count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes.len() - self.succeeded()
    }

    pub fn is_success(&self) -> bool {
        self.failed() == 0
    }
}

pub struct Orchestrator {
    cache: Arc<ArtifactCache>,
    geodata: Arc<dyn GeodataSource + Send + Sync>,
    options: PipelineOptions,
}

impl Orchestrator {
    pub fn new(geodata: Arc<dyn GeodataSource + Send + Sync>, options: PipelineOptions) -> Self {
        Self {
            cache: Arc::new(ArtifactCache::new()),
            geodata,
            options,
        }
    }

    pub fn cache(&self) -> &ArtifactCache {
        &self.cache
    }

    /// Run one job end to end. Every stage boundary checks the gate; the
    /// expensive stages are cache-gated by content digests.
    pub fn run_job(&self, job: &HospitalJob, gate: &StageGate) -> Result<JobOutcome, JobFailure> {
        let started = Instant::now();
        self.run_job_inner(job, gate)
            .map(|package| JobOutcome {
                site_id: job.id.clone(),
                job_hash: job.digest().full.to_hex(),
                package,
                elapsed: started.elapsed(),
            })
            .map_err(|e| JobFailure::new(&job.id, e))
    }

    fn run_job_inner(
        &self,
        job: &HospitalJob,
        gate: &StageGate,
    ) -> Result<PackageArtifacts, PipelineError> {
        job.validate()?;
        let digest = job.digest();
        let cache = &self.cache;

        gate.check()?;
        let raw = self.geodata.query(job.location, job.aoi.radius_m)?;
        let geo_input = cache::stage_input(
            STAGE_GEO_RESOLVE,
            &[digest.site, digest.footprints, raw.digest()],
        );
        let (campus, geo_art): (ResolvedCampus, _) =
            cache::run_stage(cache, STAGE_GEO_RESOLVE, geo_input, || {
                geo::resolve(job, &raw)
            })?;

        gate.check()?;
        // Building meshes never see the helipad spec: moving the pad must
        // not invalidate them. They do read ground.parking for lot scatter.
        let bld_input = cache::stage_input(
            STAGE_BUILDING_MESHES,
            &[geo_art, digest.props, digest.ground, digest.output],
        );
        let (buildings, bld_art): (BuildingSet, _) =
            cache::run_stage(cache, STAGE_BUILDING_MESHES, bld_input, || {
                builder::build_buildings(&campus, job)
            })?;

        gate.check()?;
        let pad_input =
            cache::stage_input(STAGE_HELIPAD_SITE, &[geo_art, digest.helipad, digest.output]);
        let (pad, pad_art): (HelipadSite, _) =
            cache::run_stage(cache, STAGE_HELIPAD_SITE, pad_input, || {
                builder::place_helipad(&campus, job)
            })?;

        gate.check()?;
        let surf_input = cache::stage_input(STAGE_SURFACES, &[geo_art, pad_art, digest.ground]);
        let (surfaces, surf_art): (SurfaceSet, _) =
            cache::run_stage(cache, STAGE_SURFACES, surf_input, || {
                surface::compose_surfaces(&campus, &pad, job)
            })?;

        gate.check()?;
        let light_input = cache::stage_input(
            STAGE_LIGHTING,
            &[geo_art, pad_art, digest.helipad, digest.lighting, digest.output],
        );
        let (lights, light_art): (LightingSet, _) =
            cache::run_stage(cache, STAGE_LIGHTING, light_input, || {
                lighting::compose_lighting(&campus, &pad, job)
            })?;

        gate.check()?;
        // The exporter also reads the scene origin for DSF tile selection,
        // which only the geo stage pins down.
        let export_input = cache::stage_input(
            STAGE_EXPORT,
            &[geo_art, bld_art, pad_art, surf_art, light_art, digest.output],
        );
        let flatten = pad.flatten;
        let scene = assemble_scene(&campus, buildings, surfaces, lights);
        let (bundle, _): (ExportBundle, _) =
            cache::run_stage(cache, STAGE_EXPORT, export_input, || {
                XPlaneExporter { flatten }.export(&scene)
            })?;

        gate.check()?;
        let package = package::write_package(
            &self.options.output_dir,
            job,
            digest.full,
            &bundle,
            self.options.overwrite,
        )?;
        if self.options.write_scene_json {
            scene.save(&package.pack_dir.join("scene.json"))?;
        }
        Ok(package)
    }

    /// Run a batch over a bounded pool. Failures are reported, never
    /// propagated to siblings.
    pub fn run_batch(&self, jobs: &[HospitalJob]) -> Result<BatchReport, PipelineError> {
        let started = Instant::now();
        std::fs::create_dir_all(&self.options.output_dir)?;

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.options.parallelism)
            .build()
            .map_err(|e| PipelineError::Internal(format!("worker pool: {}", e)))?;
        let cancel = Arc::new(AtomicBool::new(false));
        let timeout = self.options.job_timeout;

        let outcomes: Vec<Result<JobOutcome, JobFailure>> = pool.install(|| {
            jobs.par_iter()
                .map(|job| {
                    let gate = StageGate::with_timeout(Arc::clone(&cancel), timeout);
                    let result = self.run_job(job, &gate);
                    match &result {
                        Ok(o) => info!(
                            "job {} done in {:.1}s",
                            o.site_id,
                            o.elapsed.as_secs_f64()
                        ),
                        Err(e) => warn!("{}", e),
                    }
                    result
                })
                .collect()
        });

        let bulk_path = if self.options.bulk {
            let zips: Vec<PathBuf> = outcomes
                .iter()
                .filter_map(|o| o.as_ref().ok())
                .map(|o| o.package.zip_path.clone())
                .collect();
            if zips.is_empty() {
                None
            } else {
                let date = chrono::Utc::now().date_naive();
                Some(package::write_bulk(&self.options.output_dir, &zips, date)?)
            }
        } else {
            None
        };

        Ok(BatchReport {
            outcomes,
            bulk_path,
            elapsed: started.elapsed(),
        })
    }
}

/// Merge the stage artifacts into one scene graph, in stable id order.
fn assemble_scene(
    campus: &ResolvedCampus,
    buildings: BuildingSet,
    surfaces: SurfaceSet,
    lights: LightingSet,
) -> SceneGraph {
    let mut scene = SceneGraph {
        origin: campus.frame.origin,
        site_elev_m: campus.site_elev_m,
        buildings: buildings.buildings,
        surfaces: surfaces.surfaces,
        linework: surfaces.linework,
        props: buildings.props,
        lights: lights.lights,
    };
    scene.surfaces.extend(buildings.lots);
    for (id, lit) in lights.building_lit {
        if let Some(b) = scene.buildings.iter_mut().find(|b| b.id == id) {
            b.material.lit_texture = Some(lit);
        }
    }
    scene.sort_nodes();
    scene
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geodata::{RawFootprint, RawGeodata, StaticGeodata};
    use crate::job::{HelipadMode, LatLon};
    use std::collections::BTreeMap;
    use std::io::Read;

    const CENTER: LatLon = LatLon {
        lat: 47.6042,
        lon: -122.3237,
    };

    fn rect_footprint(id: &str, c: LatLon, half_e: f64, half_n: f64) -> RawFootprint {
        let dlat = half_n / 111_000.0;
        let dlon = half_e / 75_000.0;
        let mut tags = BTreeMap::new();
        tags.insert("building".to_string(), "hospital".to_string());
        RawFootprint {
            id: id.to_string(),
            ring: vec![
                LatLon { lat: c.lat - dlat, lon: c.lon - dlon },
                LatLon { lat: c.lat - dlat, lon: c.lon + dlon },
                LatLon { lat: c.lat + dlat, lon: c.lon + dlon },
                LatLon { lat: c.lat + dlat, lon: c.lon - dlon },
            ],
            tags,
        }
    }

    fn geodata_for(centers: &[(String, LatLon)]) -> Arc<dyn GeodataSource + Send + Sync> {
        let footprints = centers
            .iter()
            .map(|(id, c)| rect_footprint(id, *c, 40.0, 20.0))
            .collect();
        Arc::new(StaticGeodata::new(RawGeodata {
            footprints,
            elevation: Vec::new(),
        }))
    }

    fn job_at(id: &str, name: &str, location: LatLon) -> HospitalJob {
        let mut j = HospitalJob::new_default(id, name, location, 500.0);
        j.output.quality = crate::job::QualityTier::Low;
        j
    }

    fn options(dir: &std::path::Path) -> PipelineOptions {
        PipelineOptions {
            output_dir: dir.to_path_buf(),
            bulk: false,
            ..PipelineOptions::default()
        }
    }

    #[test]
    fn single_job_produces_package() {
        let dir = tempfile::tempdir().unwrap();
        let geodata = geodata_for(&[("a".to_string(), CENTER)]);
        let orch = Orchestrator::new(geodata, options(dir.path()));
        let job = job_at("WA22", "Harborview", CENTER);
        let out = orch.run_job(&job, &StageGate::open()).unwrap();
        assert!(out.package.zip_path.exists());
        assert!(out
            .package
            .pack_dir
            .join("Earth nav data/+40-130/+47-123.dsf")
            .exists());
        assert_eq!(out.job_hash, job.digest().full.to_hex());
    }

    #[test]
    fn repeated_runs_are_byte_identical() {
        let geodata = geodata_for(&[("a".to_string(), CENTER)]);
        let job = job_at("WA22", "Harborview", CENTER);

        let read_zip = |dir: &std::path::Path| -> Vec<u8> {
            let orch = Orchestrator::new(Arc::clone(&geodata), options(dir));
            let out = orch.run_job(&job, &StageGate::open()).unwrap();
            let mut data = Vec::new();
            std::fs::File::open(out.package.zip_path)
                .unwrap()
                .read_to_end(&mut data)
                .unwrap();
            data
        };

        let dir_a = tempfile::tempdir().unwrap();
        let dir_b = tempfile::tempdir().unwrap();
        assert_eq!(read_zip(dir_a.path()), read_zip(dir_b.path()));
    }

    #[test]
    fn helipad_change_leaves_building_stage_cached() {
        let dir = tempfile::tempdir().unwrap();
        let geodata = geodata_for(&[("a".to_string(), CENTER)]);
        let mut opts = options(dir.path());
        opts.overwrite = true;
        let orch = Orchestrator::new(geodata, opts);

        let job_a = job_at("WA22", "Harborview", CENTER);
        orch.run_job(&job_a, &StageGate::open()).unwrap();
        let entries_after_first = orch.cache().len();

        let mut job_b = job_a.clone();
        job_b.helipad.mode = HelipadMode::Manual;
        job_b.helipad.position = Some(LatLon {
            lat: CENTER.lat + 0.002,
            lon: CENTER.lon,
        });
        orch.run_job(&job_b, &StageGate::open()).unwrap();

        // geo_resolve and building_meshes hit; helipad_site, surfaces,
        // lighting, export re-run with new keys.
        assert_eq!(orch.cache().len(), entries_after_first + 4);
    }

    #[test]
    fn parking_toggle_invalidates_building_stage() {
        let dir = tempfile::tempdir().unwrap();
        let mut lot = rect_footprint(
            "p1",
            LatLon {
                lat: CENTER.lat,
                lon: CENTER.lon + 0.0015,
            },
            30.0,
            20.0,
        );
        lot.tags.insert("building".to_string(), "parking".to_string());
        let geodata: Arc<dyn GeodataSource + Send + Sync> = Arc::new(StaticGeodata::new(
            RawGeodata {
                footprints: vec![rect_footprint("a", CENTER, 40.0, 20.0), lot],
                elevation: Vec::new(),
            },
        ));
        let mut opts = options(dir.path());
        opts.overwrite = true;
        opts.write_scene_json = true;
        let orch = Orchestrator::new(geodata, opts);

        let mut job_a = HospitalJob::new_default("WA22", "Harborview", CENTER, 500.0);
        job_a.output.quality = crate::job::QualityTier::Medium;
        job_a.props.cars_density = 1.0;
        job_a.ground.parking = true;
        let out_a = orch.run_job(&job_a, &StageGate::open()).unwrap();
        let scene_a =
            std::fs::read_to_string(out_a.package.pack_dir.join("scene.json")).unwrap();
        assert!(scene_a.contains("car_"));

        // Same site, parking off: the building stage must re-run rather
        // than hand back the cached set with the cars still in it.
        let mut job_b = job_a.clone();
        job_b.ground.parking = false;
        let out_b = orch.run_job(&job_b, &StageGate::open()).unwrap();
        let scene_b =
            std::fs::read_to_string(out_b.package.pack_dir.join("scene.json")).unwrap();
        assert!(!scene_b.contains("car_"));
    }

    #[test]
    fn batch_reports_failures_without_aborting_siblings() {
        let dir = tempfile::tempdir().unwrap();
        let far = LatLon {
            lat: 35.0,
            lon: -100.0,
        };
        // Sites 1, 2, 4, 5 sit on footprints; site 3's AOI is empty.
        let sites: Vec<(String, LatLon)> = (0..5)
            .map(|i| {
                (
                    format!("s{}", i),
                    LatLon {
                        lat: CENTER.lat + i as f64 * 0.1,
                        lon: CENTER.lon,
                    },
                )
            })
            .collect();
        let mut with_data = sites.clone();
        with_data.remove(2);
        let geodata = geodata_for(&with_data);

        let orch = Orchestrator::new(geodata, options(dir.path()));
        let jobs: Vec<HospitalJob> = sites
            .iter()
            .enumerate()
            .map(|(i, (_, loc))| {
                job_at(
                    &format!("ID{:02}", i + 1),
                    &format!("Site {}", i + 1),
                    if i == 2 { far } else { *loc },
                )
            })
            .collect();

        let report = orch.run_batch(&jobs).unwrap();
        assert_eq!(report.outcomes.len(), 5);
        assert_eq!(report.succeeded(), 4);
        assert_eq!(report.failed(), 1);
        let failure = report.outcomes[2].as_ref().unwrap_err();
        assert_eq!(failure.site_id, "ID03");
        assert!(matches!(failure.error, PipelineError::NoFootprintFound));
        assert!(failure.error.is_recoverable());
    }

    #[test]
    fn bulk_archive_collects_successes() {
        let dir = tempfile::tempdir().unwrap();
        let geodata = geodata_for(&[("a".to_string(), CENTER)]);
        let mut opts = options(dir.path());
        opts.bulk = true;
        let orch = Orchestrator::new(geodata, opts);
        let report = orch
            .run_batch(&[job_at("WA22", "Harborview", CENTER)])
            .unwrap();
        assert!(report.is_success());
        let bulk = report.bulk_path.unwrap();
        assert!(bulk.exists());
        let name = bulk.file_name().unwrap().to_str().unwrap();
        assert!(name.starts_with("BULK_") && name.ends_with(".zip"));
    }

    #[test]
    fn cancelled_gate_stops_at_stage_boundary() {
        let dir = tempfile::tempdir().unwrap();
        let geodata = geodata_for(&[("a".to_string(), CENTER)]);
        let orch = Orchestrator::new(geodata, options(dir.path()));
        let cancel = Arc::new(AtomicBool::new(true));
        let gate = StageGate::with_timeout(cancel, None);
        let failure = orch
            .run_job(&job_at("WA22", "Harborview", CENTER), &gate)
            .unwrap_err();
        assert!(matches!(failure.error, PipelineError::Cancelled));
    }

    #[test]
    fn expired_deadline_times_out() {
        let dir = tempfile::tempdir().unwrap();
        let geodata = geodata_for(&[("a".to_string(), CENTER)]);
        let orch = Orchestrator::new(geodata, options(dir.path()));
        let gate = StageGate::with_timeout(
            Arc::new(AtomicBool::new(false)),
            Some(Duration::from_secs(0)),
        );
        let failure = orch
            .run_job(&job_at("WA22", "Harborview", CENTER), &gate)
            .unwrap_err();
        assert!(matches!(failure.error, PipelineError::Timeout));
    }
}
