pub mod client;
pub mod cnpg;

pub use client::{DeploymentStatusInfo, K8sClient, StatefulSetStatusInfo};

/// Label written on every object the control plane manages, per the
/// "Labels written on every managed object" contract.
pub const LABEL_MANAGED_BY: &str = "app.kubernetes.io/managed-by";
pub const LABEL_MANAGED_BY_VALUE: &str = "enclii";
pub const LABEL_ADDON_ID: &str = "enclii.dev/addon-id";
pub const LABEL_PROJECT_ID: &str = "enclii.dev/project-id";
pub const LABEL_ADDON_TYPE: &str = "enclii.dev/addon-type";

pub fn managed_labels(
    addon_id: uuid::Uuid,
    project_id: uuid::Uuid,
    addon_type: &str,
) -> std::collections::BTreeMap<String, String> {
    std::collections::BTreeMap::from([
        (LABEL_MANAGED_BY.to_string(), LABEL_MANAGED_BY_VALUE.to_string()),
        (LABEL_ADDON_ID.to_string(), addon_id.to_string()),
        (LABEL_PROJECT_ID.to_string(), project_id.to_string()),
        (LABEL_ADDON_TYPE.to_string(), addon_type.to_string()),
    ])
}
