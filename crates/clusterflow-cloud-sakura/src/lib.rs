//! Sakura Cloud provider for ClusterFlow
//!
//! This crate implements the CloudProvider trait for Sakura Cloud on top of
//! the `usacloud` CLI.
//!
//! # Requirements
//!
//! - `usacloud` CLI must be installed and configured
//! - Authentication is managed through usacloud configuration
//!
//! # Example
//!
//! ```ignore
//! use clusterflow_cloud_sakura::SakuraCloudProvider;
//! use clusterflow_cloud::CloudProvider;
//!
//! let provider = SakuraCloudProvider::new("is1a");
//!
//! let auth = provider.check_auth().await?;
//! if !auth.authenticated {
//!     panic!("Not authenticated: {:?}", auth.error);
//! }
//! ```

pub mod error;
pub mod provider;
pub mod usacloud;

pub use error::{Result, SakuraError};
pub use provider::{SUPPORTED_KINDS, SakuraCloudProvider, check_definition, parse_size};
pub use usacloud::{CreateServerConfig, ServerInfo, SshKeyInfo, Usacloud};
