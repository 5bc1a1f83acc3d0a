//! Bootstrap payload rendering
//!
//! A template is rendered with tera against a fixed set of string
//! variables. Rendering is pure: the same template and variables always give
//! the same bytes.

use crate::assets::BootstrapAssets;
use crate::error::{BootstrapError, Result};
use clusterflow_core::{Cluster, NodeRole};
use serde::Serialize;
use std::sync::Arc;
use tera::{Context, Tera};
use tracing::{debug, instrument};

/// Port the Kubernetes API server listens on
pub const API_PORT: u16 = 6443;

/// Variables available to every template
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BootstrapVars {
    pub cluster_name: String,
    pub node_role: String,
    pub kubernetes_version: String,
    pub join_token: String,
    /// Address node pools join; empty while no master is running
    pub api_endpoint: String,
    pub api_port: String,
}

impl BootstrapVars {
    /// Variables for a pool of `role` in `cluster`
    pub fn for_pool(cluster: &Cluster, role: NodeRole) -> Self {
        Self {
            cluster_name: cluster.name.clone(),
            node_role: role.as_str().to_string(),
            kubernetes_version: cluster.kubernetes_version.clone(),
            join_token: cluster.join_token.clone().unwrap_or_default(),
            api_endpoint: cluster.api_endpoint.clone().unwrap_or_default(),
            api_port: API_PORT.to_string(),
        }
    }

    /// Non-empty stand-ins used to check a template before any run
    pub fn placeholder(role: NodeRole) -> Self {
        Self {
            cluster_name: "cluster".to_string(),
            node_role: role.as_str().to_string(),
            kubernetes_version: "0.0.0".to_string(),
            join_token: "000000.0000000000000000".to_string(),
            api_endpoint: "192.0.2.1".to_string(),
            api_port: API_PORT.to_string(),
        }
    }

    fn context(&self) -> Result<Context> {
        Context::from_serialize(self).map_err(|e| BootstrapError::RenderError {
            name: String::new(),
            message: e.to_string(),
        })
    }
}

/// Renders named templates from an asset source
#[derive(Clone)]
pub struct BootstrapInjector {
    assets: Arc<dyn BootstrapAssets>,
}

impl BootstrapInjector {
    pub fn new(assets: impl BootstrapAssets + 'static) -> Self {
        Self {
            assets: Arc::new(assets),
        }
    }

    pub fn from_arc(assets: Arc<dyn BootstrapAssets>) -> Self {
        Self { assets }
    }

    fn source(&self, name: &str) -> Result<String> {
        let bytes = self.assets.lookup(name)?;
        String::from_utf8(bytes).map_err(|e| BootstrapError::InvalidTemplate {
            name: name.to_string(),
            message: e.to_string(),
        })
    }

    /// Check that `name` exists, parses and renders for every role
    ///
    /// Uses placeholder values, so a reference to a variable outside
    /// [`BootstrapVars`] is caught here instead of mid-run.
    pub fn validate(&self, name: &str) -> Result<()> {
        let source = self.source(name)?;
        let invalid = |e: tera::Error| BootstrapError::InvalidTemplate {
            name: name.to_string(),
            message: error_detail(&e),
        };
        let mut tera = Tera::default();
        tera.add_raw_template(name, &source).map_err(invalid)?;
        for role in [NodeRole::Master, NodeRole::Node] {
            let context = BootstrapVars::placeholder(role).context()?;
            tera.render(name, &context).map_err(invalid)?;
        }
        debug!(template = name, "Bootstrap template is valid");
        Ok(())
    }

    /// Render `name` with `vars`
    #[instrument(skip(self, vars), fields(cluster = %vars.cluster_name, role = %vars.node_role))]
    pub fn render(&self, name: &str, vars: &BootstrapVars) -> Result<Vec<u8>> {
        let source = self.source(name)?;
        let context = vars.context()?;
        let rendered = Tera::default()
            .render_str(&source, &context)
            .map_err(|e| BootstrapError::RenderError {
                name: name.to_string(),
                message: error_detail(&e),
            })?;
        debug!(template = name, bytes = rendered.len(), "Rendered bootstrap payload");
        Ok(rendered.into_bytes())
    }
}

/// Flatten a tera error and its sources into one message
fn error_detail(e: &tera::Error) -> String {
    use std::error::Error;

    let mut details = vec![e.to_string()];
    let mut source = e.source();
    while let Some(err) = source {
        details.push(err.to_string());
        source = err.source();
    }
    details.join(" | ")
}
