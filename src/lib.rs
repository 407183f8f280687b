//! S3 bucket security diagnostics.
//!
//! Runs a fixed battery of configuration checks against each bucket, scores
//! the results, remediates the fixable findings and optionally asks an LLM
//! backend for a root-cause narrative.

pub mod ai;
pub mod aws;
pub mod checks;
pub mod config;
pub mod diagnostic;
pub mod error;
pub mod fleet;
pub mod logging;
pub mod remediation;
pub mod report;
pub mod scoring;
pub mod service;
pub mod snapshot;
pub mod storage;

pub use diagnostic::DiagnosticEngine;
pub use error::{AdapterError, AiError, DoctorError};
pub use fleet::{FleetScanSummary, FleetScanner};
pub use remediation::RemediationEngine;
pub use report::{BucketDiagnosticReport, CheckResult, CheckStatus, RemediationResult, Severity};
pub use scoring::{HealthLabel, ScoringPolicy};
pub use service::DoctorService;
