pub mod addon_bindings;
pub mod addons;
pub mod compliance;
pub mod deployments;
pub mod env_vars;
pub mod environments;
pub mod models;
pub mod pool;
pub mod projects;
pub mod releases;
pub mod rotation;
pub mod services;
pub mod usage;
pub mod webhooks;
