//! modlens - mod collection analyzer
//!
//! Reads Bethesda plugin headers, builds file manifests from mod archives,
//! checks load order against master dependencies and reports file
//! conflicts between mods. The [`pipeline`] ties these together for a
//! batch of mods fetched from Nexus Mods, plain URLs or local disk.

pub mod archive;
pub mod config;
pub mod conflict;
pub mod downloaders;
pub mod error;
pub mod games;
pub mod hash;
pub mod load_order;
pub mod manifest;
pub mod paths;
pub mod pipeline;
pub mod plugin;
pub mod report;

pub use config::{AnalysisOptions, Settings};
pub use error::{AcquireError, DecodeError, ExtractError, FailureKind, ValidationError};
pub use games::GameType;
pub use pipeline::{CancelToken, Pipeline, PipelineEvent};
pub use report::{AnalysisReport, AnalysisRequest, ModOutcome, ModRequest, ModSource};
