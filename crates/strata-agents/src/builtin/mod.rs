//! Agents shipped with Strata, selectable by name from `[agents] builtin`.

mod deployment_agent;
mod policy_agent;

use std::sync::Arc;

use strata_core::error::{Result, StrataError};
use strata_core::traits::Agent;
use strata_core::types::Fields;
use strata_graph::Catalog;

pub use deployment_agent::DeploymentAgent;
pub use policy_agent::PolicyAgent;

/// Instantiate the built-in agents named in configuration.
pub fn builtin_agents(names: &[String], catalog: &Catalog) -> Result<Vec<Arc<dyn Agent>>> {
    names
        .iter()
        .map(|name| -> Result<Arc<dyn Agent>> {
            match name.as_str() {
                "policy" => Ok(Arc::new(PolicyAgent::new(catalog.graph().clone()))),
                "deployment" => Ok(Arc::new(DeploymentAgent::new(catalog.clone()))),
                other => Err(StrataError::Config(format!("unknown built-in agent '{}'", other))),
            }
        })
        .collect()
}

/// Read a required string field from a request payload.
fn required_str<'a>(payload: &'a Fields, key: &str) -> Result<&'a str> {
    payload
        .get(key)
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| StrataError::Validation(format!("missing '{}' in request payload", key)))
}
