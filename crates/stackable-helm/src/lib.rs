//! ## Crate Features
//!
//! - `clap` enables `clap::Args` support for [`values::ValueOverrides`] and
//!   [`release::ReleaseOptions`], so that they can be flattened into CLIs.
pub mod chart;
pub mod kvp;
pub mod logging;
pub mod manifest;
pub mod release;
pub mod values;

/// The error type of user-provided extensions, such as getters and post-renderers.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

// External re-exports
pub use k8s_openapi;
pub use kube;
