//! Domain types shared by every regscore crate.
//!
//! The register store and its per-block leases, the run state machine's
//! status/error encodings, and the three capability seams (image source,
//! uploader, scorer) the orchestrator is built on. Nothing in here does
//! I/O; adapters for real collaborators live in `regscore-sourcer` and
//! `regscore-pipeline`.

pub mod capability;
pub mod error;
pub mod registers;
pub mod run;
pub mod score;
pub mod types;
