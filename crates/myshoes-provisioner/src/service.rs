//! The provisioner seam and its request/response types.

use async_trait::async_trait;
use myshoes_core::ResourceType;

use crate::error::ProvisionResult;

/// What to boot.
#[derive(Debug, Clone, PartialEq)]
pub struct InstanceSpec {
    /// Hostname and hosting-service runner name (`myshoes-<id>`).
    pub runner_name: String,
    pub setup_script: String,
    pub resource_type: ResourceType,
    pub labels: Vec<String>,
}

/// What was booted.
#[derive(Debug, Clone, PartialEq)]
pub struct Instance {
    pub cloud_id: String,
    pub shoes_type: String,
    pub ip_address: String,
    pub resource_type: ResourceType,
}

#[async_trait]
pub trait Provisioner: Send + Sync {
    async fn add_instance(&self, spec: &InstanceSpec) -> ProvisionResult<Instance>;

    /// Tear an instance down. `NotFound` means it is already gone.
    async fn delete_instance(&self, cloud_id: &str, labels: &[String]) -> ProvisionResult<()>;
}

/// Wire value of a resource type (`Unknown` is 0).
pub fn resource_type_to_wire(rt: ResourceType) -> i32 {
    ResourceType::ALL
        .iter()
        .position(|r| *r == rt)
        .map(|i| i as i32 + 1)
        .unwrap_or(0)
}

/// Resource type for a wire value; `None` for `Unknown` and out-of-range values.
pub fn resource_type_from_wire(value: i32) -> Option<ResourceType> {
    usize::try_from(value - 1)
        .ok()
        .and_then(|i| ResourceType::ALL.get(i).copied())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_values_follow_size_order() {
        assert_eq!(resource_type_to_wire(ResourceType::Nano), 1);
        assert_eq!(resource_type_to_wire(ResourceType::XLarge4), 9);
        assert_eq!(resource_type_from_wire(5), Some(ResourceType::Large));
    }

    #[test]
    fn unknown_wire_values() {
        assert_eq!(resource_type_from_wire(0), None);
        assert_eq!(resource_type_from_wire(10), None);
        assert_eq!(resource_type_from_wire(-3), None);
    }
}
