use std::env;
use std::net::SocketAddr;

use anyhow::{Context, Result};

pub const DEFAULT_HOURLY_COST_EUR: f64 = 0.53;
const DEFAULT_BIND_ADDR: &str = "[::]:8080";

/// Everything the process needs from its environment, resolved once at
/// startup. A missing required variable aborts startup instead of surfacing
/// mid-request.
#[derive(Debug, Clone)]
pub struct Config {
    pub subscription_id: String,
    pub resource_group: String,
    pub vm_name: String,
    pub tenant_id: String,
    pub client_id: String,
    pub client_secret: String,
    pub hourly_cost_eur: f64,
    pub bind_addr: SocketAddr,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let required = |key: &str| {
            lookup(key)
                .filter(|value| !value.trim().is_empty())
                .with_context(|| format!("missing required environment variable {key}"))
        };

        let hourly_cost_eur = match lookup("VM_HOURLY_COST_EUR") {
            Some(raw) => raw
                .parse::<f64>()
                .with_context(|| format!("VM_HOURLY_COST_EUR is not a number: {raw:?}"))?,
            None => DEFAULT_HOURLY_COST_EUR,
        };

        let bind_addr = lookup("BIND_ADDR")
            .unwrap_or_else(|| DEFAULT_BIND_ADDR.to_string())
            .parse::<SocketAddr>()
            .context("BIND_ADDR is not a valid socket address")?;

        Ok(Self {
            subscription_id: required("AZURE_SUBSCRIPTION_ID")?,
            resource_group: required("AZURE_RESOURCE_GROUP")?,
            vm_name: required("AZURE_VM_NAME")?,
            tenant_id: required("AZURE_TENANT_ID")?,
            client_id: required("AZURE_CLIENT_ID")?,
            client_secret: required("AZURE_CLIENT_SECRET")?,
            hourly_cost_eur,
            bind_addr,
        })
    }

    /// ARM resource id of the virtual machine, the addressing scheme shared
    /// by the compute and metrics endpoints.
    pub fn vm_resource_id(&self) -> String {
        format!(
            "/subscriptions/{}/resourceGroups/{}/providers/Microsoft.Compute/virtualMachines/{}",
            self.subscription_id, self.resource_group, self.vm_name
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn vars(extra: &[(&str, &str)]) -> HashMap<String, String> {
        let mut map: HashMap<String, String> = [
            ("AZURE_SUBSCRIPTION_ID", "sub-123"),
            ("AZURE_RESOURCE_GROUP", "rg-dash"),
            ("AZURE_VM_NAME", "vm-dash"),
            ("AZURE_TENANT_ID", "tenant-1"),
            ("AZURE_CLIENT_ID", "client-1"),
            ("AZURE_CLIENT_SECRET", "hunter2"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
        for (k, v) in extra {
            map.insert(k.to_string(), v.to_string());
        }
        map
    }

    fn from_map(map: &HashMap<String, String>) -> Result<Config> {
        Config::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn loads_complete_environment() {
        let config = from_map(&vars(&[])).unwrap();
        assert_eq!(config.vm_name, "vm-dash");
        assert_eq!(config.hourly_cost_eur, DEFAULT_HOURLY_COST_EUR);
        assert_eq!(config.bind_addr.port(), 8080);
    }

    #[test]
    fn missing_variable_names_the_variable() {
        let mut map = vars(&[]);
        map.remove("AZURE_VM_NAME");
        let err = from_map(&map).unwrap_err();
        assert!(err.to_string().contains("AZURE_VM_NAME"), "{err}");
    }

    #[test]
    fn blank_variable_counts_as_missing() {
        let map = vars(&[("AZURE_SUBSCRIPTION_ID", "  ")]);
        let err = from_map(&map).unwrap_err();
        assert!(err.to_string().contains("AZURE_SUBSCRIPTION_ID"), "{err}");
    }

    #[test]
    fn hourly_cost_override_and_rejects_garbage() {
        let config = from_map(&vars(&[("VM_HOURLY_COST_EUR", "1.25")])).unwrap();
        assert_eq!(config.hourly_cost_eur, 1.25);

        let err = from_map(&vars(&[("VM_HOURLY_COST_EUR", "cheap")])).unwrap_err();
        assert!(err.to_string().contains("VM_HOURLY_COST_EUR"), "{err}");
    }

    #[test]
    fn resource_id_addresses_the_vm() {
        let config = from_map(&vars(&[])).unwrap();
        assert_eq!(
            config.vm_resource_id(),
            "/subscriptions/sub-123/resourceGroups/rg-dash\
             /providers/Microsoft.Compute/virtualMachines/vm-dash"
        );
    }
}
