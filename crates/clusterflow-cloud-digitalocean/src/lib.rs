//! DigitalOcean provider for ClusterFlow
//!
//! Talks to the DigitalOcean v2 REST API directly. The token is read from
//! `DIGITALOCEAN_TOKEN` or the `[digitalocean]` section of the settings file.
//!
//! # Example
//!
//! ```ignore
//! use clusterflow_cloud_digitalocean::DigitalOceanProvider;
//! use clusterflow_cloud::CloudProvider;
//!
//! let provider = DigitalOceanProvider::new(token, "nyc3")?;
//! let auth = provider.check_auth().await?;
//! ```

pub mod api;
pub mod error;
pub mod provider;

pub use api::{DIGITALOCEAN_API_BASE, DigitalOceanClient};
pub use error::{DigitalOceanError, Result};
pub use provider::{DigitalOceanProvider, PollConfig, SUPPORTED_KINDS};
