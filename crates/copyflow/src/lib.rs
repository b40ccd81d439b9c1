//! Copyflow Library
//!
//! Builds and checks the workflow documents that orchestrate long-running
//! copy jobs:
//!
//! - **Template expansion**: turn annotated definitions, with replicated
//!   sub-machines and task handler references, into concrete documents
//! - **Workflow documents**: typed model, validation and the copy-job
//!   polling template with its retry classification
//! - **Local execution**: dry-run a document against a virtual clock
//!
//! ## Modules
//!
//! - [`template`]: annotated/concrete trees and the expansion engine
//! - [`machine`]: document model, validation and the job template
//! - [`engine`]: local executor
//! - [`config`]: configuration loading from environment variables
//! - [`error`]: error types
//!
//! ## Example
//!
//! ```ignore
//! use copyflow::{
//!     machine::{JobHandlers, JobTemplate, WorkflowDocument},
//!     template::expand,
//!     AppConfig,
//! };
//!
//! let config = AppConfig::from_env()?;
//! let handlers = JobHandlers::remote(|task| config.resource_name(task));
//! let template = JobTemplate::from_config(&config, handlers);
//! let concrete = expand(&template.fan_out(4, "{shard}")?)?;
//! let document = WorkflowDocument::from_concrete(&concrete)?;
//! ```

pub mod config;
pub mod engine;
pub mod error;
pub mod machine;
pub mod result_ext;
pub mod template;

pub use config::{AppConfig, OutputFormat};
pub use error::{AppError, AppResult};
pub use result_ext::{OptionResultExt, ResultExt};
