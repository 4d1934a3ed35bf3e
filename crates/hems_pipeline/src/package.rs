//! Packager: export bundle -> scenery pack directory, per-site zip, and the
//! bulk archive. Zip entries use fixed timestamps and sorted paths so a
//! repeated run produces byte-identical archives.

use crate::error::PipelineError;
use crate::export::ExportBundle;
use crate::hash::Digest;
use crate::job::HospitalJob;
use chrono::NaiveDate;
use log::info;
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{self, Cursor, Read, Write};
use std::path::{Path, PathBuf};
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipWriter};

pub const MANIFEST_FORMAT: &str = "hems-scenery/1";
pub const MANIFEST_NAME: &str = "manifest.json";

/// Lowercase site-name slug for file naming: alphanumerics kept, every
/// other run collapsed to a single underscore. A name with no usable
/// characters slugs to `unknown`.
pub fn slugify(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut pending_sep = false;
    for c in name.chars() {
        if c.is_ascii_alphanumeric() {
            if pending_sep && !out.is_empty() {
                out.push('_');
            }
            pending_sep = false;
            out.push(c.to_ascii_lowercase());
        } else {
            pending_sep = true;
        }
    }
    if out.is_empty() {
        out.push_str("unknown");
    }
    out
}

/// `HOSP_<id>_<slug>`, the package directory and zip stem.
pub fn package_name(job: &HospitalJob) -> String {
    format!("HOSP_{}_{}", job.id, slugify(&job.name))
}

/// `BULK_<YYYYMMDD>.zip` stem for a batch date.
pub fn bulk_name(date: NaiveDate) -> String {
    format!("BULK_{}", date.format("%Y%m%d"))
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub path: String,
    pub role: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PackageManifest {
    pub format: String,
    pub job_hash: String,
    pub files: Vec<ManifestEntry>,
}

impl PackageManifest {
    pub fn new(job_hash: Digest, bundle: &ExportBundle) -> Self {
        Self {
            format: MANIFEST_FORMAT.to_string(),
            job_hash: job_hash.to_hex(),
            files: bundle
                .files
                .iter()
                .map(|f| ManifestEntry {
                    path: f.path.clone(),
                    role: f.role.as_str().to_string(),
                })
                .collect(),
        }
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_default()
    }
}

/// Everything the packager produced for one site.
#[derive(Debug, Clone)]
pub struct PackageArtifacts {
    pub pack_dir: PathBuf,
    pub zip_path: PathBuf,
    pub manifest: PackageManifest,
}

fn zip_err(e: zip::result::ZipError) -> PipelineError {
    PipelineError::PackagingIo(io::Error::new(io::ErrorKind::Other, e))
}

fn zip_options() -> FileOptions {
    // DOS epoch timestamp; wall clock never reaches the archive.
    FileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .last_modified_time(zip::DateTime::default())
        .unix_permissions(0o644)
}

/// Zip the bundle plus its manifest in memory, entries under `<root>/`.
pub fn zip_bundle(
    root: &str,
    bundle: &ExportBundle,
    manifest: &PackageManifest,
) -> Result<Vec<u8>, PipelineError> {
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    let options = zip_options();

    writer
        .start_file(format!("{}/{}", root, MANIFEST_NAME), options)
        .map_err(zip_err)?;
    writer.write_all(manifest.to_json().as_bytes())?;

    for f in &bundle.files {
        writer
            .start_file(format!("{}/{}", root, f.path), options)
            .map_err(zip_err)?;
        writer.write_all(&f.data)?;
    }

    let cursor = writer.finish().map_err(zip_err)?;
    Ok(cursor.into_inner())
}

/// Write the pack directory and its zip under `output_dir`. An existing
/// pack directory is an error unless `overwrite` is set.
pub fn write_package(
    output_dir: &Path,
    job: &HospitalJob,
    job_hash: Digest,
    bundle: &ExportBundle,
    overwrite: bool,
) -> Result<PackageArtifacts, PipelineError> {
    let name = package_name(job);
    let pack_dir = output_dir.join(&name);
    if pack_dir.exists() {
        if !overwrite {
            return Err(PipelineError::PackagingIo(io::Error::new(
                io::ErrorKind::AlreadyExists,
                format!("package directory '{}' already exists", pack_dir.display()),
            )));
        }
        fs::remove_dir_all(&pack_dir)?;
    }
    fs::create_dir_all(&pack_dir)?;

    let manifest = PackageManifest::new(job_hash, bundle);
    fs::write(pack_dir.join(MANIFEST_NAME), manifest.to_json())?;
    for f in &bundle.files {
        let dest = pack_dir.join(&f.path);
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(dest, &f.data)?;
    }

    let zip_path = output_dir.join(format!("{}.zip", name));
    let bytes = zip_bundle(&name, bundle, &manifest)?;
    fs::write(&zip_path, bytes)?;

    info!(
        "packaged {} ({} files) -> {}",
        name,
        bundle.files.len() + 1,
        zip_path.display()
    );
    Ok(PackageArtifacts {
        pack_dir,
        zip_path,
        manifest,
    })
}

/// Bundle finished per-site zips into `BULK_<date>.zip`. Entries are sorted
/// by file name and stored without recompression.
pub fn write_bulk(
    output_dir: &Path,
    zips: &[PathBuf],
    date: NaiveDate,
) -> Result<PathBuf, PipelineError> {
    let bulk_path = output_dir.join(format!("{}.zip", bulk_name(date)));
    let mut sorted: Vec<&PathBuf> = zips.iter().collect();
    sorted.sort();

    let mut writer = ZipWriter::new(File::create(&bulk_path)?);
    let options = zip_options().compression_method(CompressionMethod::Stored);
    for zip_path in sorted {
        let entry_name = zip_path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| {
                PipelineError::PackagingIo(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!("unrepresentable zip path '{}'", zip_path.display()),
                ))
            })?;
        writer.start_file(entry_name, options).map_err(zip_err)?;
        let mut data = Vec::new();
        File::open(zip_path)?.read_to_end(&mut data)?;
        writer.write_all(&data)?;
    }
    writer.finish().map_err(zip_err)?;

    info!("bulk archive {} ({} packages)", bulk_path.display(), zips.len());
    Ok(bulk_path)
}
