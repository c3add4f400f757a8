//! Stable labels identifying toolhive-managed containers.

use std::collections::HashMap;

use thv_core::{ToolType, TransportType};

pub const LABEL_MANAGED: &str = "toolhive";
pub const LABEL_NAME: &str = "toolhive-name";
pub const LABEL_TRANSPORT: &str = "toolhive-transport";
pub const LABEL_TOOL_TYPE: &str = "toolhive-tool-type";
pub const LABEL_TARGET_PORT: &str = "toolhive-target-port";
pub const LABEL_GROUP: &str = "toolhive-group";

/// Labels stamped on every container the core creates.
pub fn standard_labels(
    name: &str,
    transport: TransportType,
    tool_type: ToolType,
    target_port: Option<u16>,
    group: &str,
) -> HashMap<String, String> {
    let mut labels = HashMap::from([
        (LABEL_MANAGED.to_string(), "true".to_string()),
        (LABEL_NAME.to_string(), name.to_string()),
        (LABEL_TRANSPORT.to_string(), transport.as_str().to_string()),
        (LABEL_TOOL_TYPE.to_string(), tool_type.as_str().to_string()),
        (LABEL_GROUP.to_string(), group.to_string()),
    ]);
    if let Some(port) = target_port {
        labels.insert(LABEL_TARGET_PORT.to_string(), port.to_string());
    }
    labels
}

pub fn is_managed(labels: &HashMap<String, String>) -> bool {
    labels.get(LABEL_MANAGED).is_some_and(|v| v == "true")
}

pub fn workload_name(labels: &HashMap<String, String>) -> Option<&str> {
    labels.get(LABEL_NAME).map(String::as_str)
}

pub fn group_name(labels: &HashMap<String, String>) -> Option<&str> {
    labels.get(LABEL_GROUP).map(String::as_str)
}
