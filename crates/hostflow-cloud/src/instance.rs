//! Instance model shared by every provider backend

use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Live status of a physical instance, as reported by the provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceStatus {
    /// Instance is up
    Running,
    /// Instance exists but is powered off
    Stopped,
    /// Instance is gone (deleted or never existed)
    Terminated,
    /// Instance is transitioning (booting, shutting down, migrating)
    Pending,
    /// Provider returned something we cannot interpret
    Unknown,
}

impl std::fmt::Display for InstanceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InstanceStatus::Running => write!(f, "running"),
            InstanceStatus::Stopped => write!(f, "stopped"),
            InstanceStatus::Terminated => write!(f, "terminated"),
            InstanceStatus::Pending => write!(f, "pending"),
            InstanceStatus::Unknown => write!(f, "unknown"),
        }
    }
}

/// Identifies which provider implementation owns a host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProviderKind {
    #[serde(rename = "mock")]
    Mock,
    #[serde(rename = "sakura-cloud")]
    SakuraCloud,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::Mock => "mock",
            ProviderKind::SakuraCloud => "sakura-cloud",
        }
    }
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "mock" => Ok(ProviderKind::Mock),
            "sakura-cloud" | "sakura" => Ok(ProviderKind::SakuraCloud),
            other => Err(format!("unknown provider: {}", other)),
        }
    }
}

/// Named template describing how to provision a host
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Distro {
    /// Distro identifier (e.g., "ubuntu2404-small")
    pub id: String,

    /// Provider backing hosts of this distro
    pub provider: ProviderKind,

    /// Image / AMI / OS type to boot
    #[serde(default)]
    pub image: Option<String>,

    /// Instance type or plan (e.g., "2core-4gb")
    #[serde(default)]
    pub instance_type: Option<String>,

    /// Region or zone
    #[serde(default)]
    pub region: Option<String>,
}

impl Distro {
    pub fn new(id: impl Into<String>, provider: ProviderKind) -> Self {
        Self {
            id: id.into(),
            provider,
            image: None,
            instance_type: None,
            region: None,
        }
    }

    pub fn with_image(mut self, image: impl Into<String>) -> Self {
        self.image = Some(image.into());
        self
    }

    pub fn with_instance_type(mut self, instance_type: impl Into<String>) -> Self {
        self.instance_type = Some(instance_type.into());
        self
    }

    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.region = Some(region.into());
        self
    }
}

/// What a provider needs to address one instance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceTarget {
    /// Orchestrator-side host ID
    pub host_id: String,

    /// Provider-side identifier, once allocated
    pub tag: Option<String>,

    /// Provisioning template
    pub distro: Distro,
}

impl InstanceTarget {
    pub fn new(host_id: impl Into<String>, tag: Option<String>, distro: Distro) -> Self {
        Self {
            host_id: host_id.into(),
            tag,
            distro,
        }
    }

    /// Identifier to use against the provider API: the tag if the instance
    /// has been allocated, the host ID otherwise.
    pub fn instance_id(&self) -> &str {
        self.tag.as_deref().unwrap_or(&self.host_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_instance_id_prefers_tag() {
        let distro = Distro::new("d", ProviderKind::Mock);
        let target = InstanceTarget::new("host-1", None, distro.clone());
        assert_eq!(target.instance_id(), "host-1");

        let target = InstanceTarget::new("host-1", Some("113400001".to_string()), distro);
        assert_eq!(target.instance_id(), "113400001");
    }

    #[test]
    fn test_provider_kind_serde_names() {
        let json = serde_json::to_string(&ProviderKind::SakuraCloud).unwrap();
        assert_eq!(json, "\"sakura-cloud\"");
        assert_eq!("sakura".parse::<ProviderKind>(), Ok(ProviderKind::SakuraCloud));
        assert!("ec2".parse::<ProviderKind>().is_err());
    }
}
