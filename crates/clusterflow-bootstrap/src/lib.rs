//! ClusterFlow bootstrap
//!
//! Server pool instances receive a rendered shell script as user data. This
//! crate holds the built-in templates, the asset lookup interface and the
//! renderer.

pub mod assets;
pub mod error;
pub mod injector;

pub use assets::{BootstrapAssets, DirectoryAssets, EmbeddedAssets, get_builtin_template};
pub use error::{BootstrapError, Result};
pub use injector::{API_PORT, BootstrapInjector, BootstrapVars};
