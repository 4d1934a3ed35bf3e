//! Deterministic scenery generation for hospital helipad sites.
//!
//! The pipeline turns a JSON job description into a simulator scenery
//! package: resolve building footprints around the site, extrude and
//! classify them, place the helipad, compose ground surfaces and lighting,
//! export the scenery file set, and zip it. Identical jobs over identical
//! geodata produce byte-identical packages; a content-addressed cache skips
//! every stage whose inputs are unchanged.

pub mod builder;
pub mod cache;
pub mod error;
pub mod export;
pub mod geo;
pub mod geodata;
pub mod geom;
pub mod hash;
pub mod job;
pub mod lighting;
pub mod orchestrator;
pub mod package;
pub mod scene;
pub mod surface;

pub use error::{JobFailure, PipelineError};
pub use geodata::{FileGeodataSource, GeodataSource, StaticGeodata};
pub use job::{HospitalJob, JobOverride, QualityTier};
pub use orchestrator::{BatchReport, JobOutcome, Orchestrator, PipelineOptions, StageGate};
