//! Platform graph: the dependency graph of applications, services, versions,
//! environments, resources, and policies.
//!
//! `Graph` is the plain node/edge model. `PlatformGraph` wraps it behind a
//! single read/write lock together with a snapshot backend and the installed
//! policy validators; it is the only mutation entry point. The `planner`
//! orders nodes over a chosen subset of edge types, and `Catalog` offers
//! typed helpers for the platform's entity kinds.

pub mod catalog;
pub mod model;
pub mod planner;
pub mod platform;
pub mod policy;

#[cfg(test)]
mod testing;

pub use catalog::Catalog;
pub use model::Graph;
pub use planner::{plan, plan_from};
pub use platform::{EdgeOutcome, PlatformGraph};
pub use policy::{
    AllowListRule, EnforcedPolicyRule, PolicyChain, PolicyValidator, PromotionOrderRule,
};
