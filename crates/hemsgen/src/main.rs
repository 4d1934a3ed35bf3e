use anyhow::{bail, Context, Result};
use clap::{Parser, ValueEnum};
use log::{info, warn};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use walkdir::WalkDir;

use hems_pipeline::job::LatLon;
use hems_pipeline::{
    FileGeodataSource, HospitalJob, JobOverride, Orchestrator, PipelineOptions, QualityTier,
};

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Quality {
    Low,
    Medium,
    High,
}

impl From<Quality> for QualityTier {
    fn from(q: Quality) -> Self {
        match q {
            Quality::Low => QualityTier::Low,
            Quality::Medium => QualityTier::Medium,
            Quality::High => QualityTier::High,
        }
    }
}

#[derive(Parser, Debug)]
#[command(name = "hemsgen", version, about = "Generate helipad scenery packages for hospital sites")]
struct Args {
    /// Comma-separated site ids to run. Defaults to every job in --jobs-dir.
    #[arg(long, value_delimiter = ',')]
    ids: Vec<String>,

    /// Site roster CSV: `faa_id,name[,lat,lon]`. Rows with coordinates
    /// create missing job files.
    #[arg(long)]
    csv: Option<PathBuf>,

    /// Directory of per-site job files (`<id>.json`).
    #[arg(long, default_value = "jobs")]
    jobs_dir: PathBuf,

    /// Directory of pre-fetched geodata fixtures.
    #[arg(long, default_value = "geodata")]
    geodata_dir: PathBuf,

    #[arg(long, default_value = "output")]
    output: PathBuf,

    /// AOI radius for jobs created from CSV rows.
    #[arg(long, default_value_t = 600.0)]
    aoi_radius: f64,

    /// Force a quality tier onto every job in this run.
    #[arg(long, value_enum)]
    quality: Option<Quality>,

    /// Worker threads; 0 = one per core.
    #[arg(long, default_value_t = 0)]
    parallel: usize,

    /// Per-job deadline in seconds.
    #[arg(long)]
    job_timeout_secs: Option<u64>,

    #[arg(long, default_value_t = false)]
    overwrite: bool,

    /// Skip the dated bulk archive.
    #[arg(long, default_value_t = false)]
    no_bulk: bool,

    /// Write `scene.json` into each package for inspection.
    #[arg(long, default_value_t = false)]
    scene_json: bool,
}

/// One roster row: site id, display name, optional coordinates.
#[derive(Debug, Clone)]
struct RosterRow {
    id: String,
    name: String,
    location: Option<LatLon>,
}

/// Hand-rolled CSV reader: comma fields, `#` comments, an optional header
/// row, quoted names allowed. Roster files are small and hand-edited, so
/// diagnostics carry line numbers.
fn read_roster(path: &Path) -> Result<Vec<RosterRow>> {
    let text = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    let mut rows = Vec::new();
    for (lineno, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let fields: Vec<&str> = line
            .split(',')
            .map(|f| f.trim().trim_matches('"'))
            .collect();
        // Header row: a named id column, or a first row whose lat field
        // is not numeric.
        let header = fields[0].eq_ignore_ascii_case("id")
            || fields[0].eq_ignore_ascii_case("faa_id")
            || (fields.len() == 4 && fields[2].parse::<f64>().is_err());
        if rows.is_empty() && header {
            continue;
        }
        if fields.len() != 2 && fields.len() != 4 {
            bail!(
                "{}:{}: expected `id,name` or `id,name,lat,lon`, got {} fields",
                path.display(),
                lineno + 1,
                fields.len()
            );
        }
        let location = if fields.len() == 4 {
            let lat: f64 = fields[2]
                .parse()
                .with_context(|| format!("{}:{}: bad latitude", path.display(), lineno + 1))?;
            let lon: f64 = fields[3]
                .parse()
                .with_context(|| format!("{}:{}: bad longitude", path.display(), lineno + 1))?;
            Some(LatLon { lat, lon })
        } else {
            None
        };
        rows.push(RosterRow {
            id: fields[0].to_string(),
            name: fields[1].to_string(),
            location,
        });
    }
    Ok(rows)
}

/// Job files under the jobs directory, keyed by stem.
fn scan_jobs_dir(dir: &Path) -> BTreeMap<String, PathBuf> {
    let mut found = BTreeMap::new();
    if !dir.is_dir() {
        return found;
    }
    for entry in WalkDir::new(dir)
        .max_depth(1)
        .into_iter()
        .filter_map(|e| e.ok())
    {
        let path = entry.path();
        if path.extension().and_then(|s| s.to_str()) == Some("json") {
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                found.insert(stem.to_string(), path.to_path_buf());
            }
        }
    }
    found
}

/// Assemble the run list: roster rows create missing job files, `--ids`
/// narrows the selection, otherwise every job file runs.
fn collect_jobs(args: &Args) -> Result<Vec<HospitalJob>> {
    let mut on_disk = scan_jobs_dir(&args.jobs_dir);

    if let Some(csv) = &args.csv {
        for row in read_roster(csv)? {
            if on_disk.contains_key(&row.id) {
                continue;
            }
            let Some(location) = row.location else {
                bail!(
                    "site '{}' has no job file and the roster row carries no coordinates",
                    row.id
                );
            };
            let job = HospitalJob::new_default(&row.id, &row.name, location, args.aoi_radius);
            let path = args.jobs_dir.join(format!("{}.json", row.id));
            job.save(&path)?;
            info!("created job file {}", path.display());
            on_disk.insert(row.id, path);
        }
    }

    let selected: Vec<(String, PathBuf)> = if args.ids.is_empty() {
        on_disk.into_iter().collect()
    } else {
        args.ids
            .iter()
            .map(|id| {
                on_disk
                    .get(id)
                    .map(|p| (id.clone(), p.clone()))
                    .with_context(|| format!("no job file for site '{}'", id))
            })
            .collect::<Result<_>>()?
    };
    if selected.is_empty() {
        bail!("no jobs to run (checked {})", args.jobs_dir.display());
    }

    let mut jobs = Vec::with_capacity(selected.len());
    for (id, path) in selected {
        let mut job =
            HospitalJob::load(&path).with_context(|| format!("loading job '{}'", id))?;
        if let Some(q) = args.quality {
            job = job.with_override(JobOverride::Quality(q.into()));
        }
        jobs.push(job);
    }
    Ok(jobs)
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let jobs = collect_jobs(&args)?;
    info!("running {} job(s)", jobs.len());

    let geodata = Arc::new(
        FileGeodataSource::open(&args.geodata_dir)
            .with_context(|| format!("opening geodata at {}", args.geodata_dir.display()))?,
    );
    let orchestrator = Orchestrator::new(
        geodata,
        PipelineOptions {
            output_dir: args.output.clone(),
            parallelism: args.parallel,
            overwrite: args.overwrite,
            job_timeout: args.job_timeout_secs.map(Duration::from_secs),
            write_scene_json: args.scene_json,
            bulk: !args.no_bulk,
        },
    );

    let report = orchestrator.run_batch(&jobs)?;

    println!();
    println!("{:<10} {:<8} {}", "SITE", "STATUS", "DETAIL");
    for outcome in &report.outcomes {
        match outcome {
            Ok(o) => println!(
                "{:<10} {:<8} {} ({:.1}s)",
                o.site_id,
                "ok",
                o.package.zip_path.display(),
                o.elapsed.as_secs_f64()
            ),
            Err(e) => println!("{:<10} {:<8} {}", e.site_id, "FAILED", e.error),
        }
    }
    println!(
        "\n{} succeeded, {} failed in {:.1}s",
        report.succeeded(),
        report.failed(),
        report.elapsed.as_secs_f64()
    );
    if let Some(bulk) = &report.bulk_path {
        println!("bulk archive: {}", bulk.display());
    }

    if !report.is_success() {
        warn!("{} job(s) failed", report.failed());
        std::process::exit(1);
    }
    Ok(())
}
