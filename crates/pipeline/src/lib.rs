//! `regscore-pipeline` -- the register-triggered scoring pipeline.
//!
//! [`orchestrator::Orchestrator`] sequences sourcing, uploading, grading
//! and result publication for one base address at a time, writing its
//! progress into the shared register store. The real collaborators it is
//! wired with in production are [`upload::ScoringServiceClient`] and
//! [`grading::RhaiGrader`]; the sourcer comes from `regscore-sourcer`.

pub mod grading;
pub mod orchestrator;
pub mod upload;
