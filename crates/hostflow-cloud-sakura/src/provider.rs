//! Sakura Cloud provider implementation

use crate::usacloud::{CreateServerConfig, HOST_TAG_PREFIX, ServerInfo, Usacloud};
use async_trait::async_trait;
use hostflow_cloud::{CloudError, CloudProvider, InstanceStatus, InstanceTarget, ProviderKind};
use tokio_util::sync::CancellationToken;

/// Parse plan string like "2core-4gb" to (core, memory_gb)
fn parse_plan(plan: Option<&str>) -> (i32, i32) {
    if let Some(p) = plan {
        // Try to parse "NcoreN-Mgb" format
        let parts: Vec<&str> = p.split('-').collect();
        if parts.len() == 2 {
            let core = parts[0]
                .trim_end_matches("core")
                .parse::<i32>()
                .unwrap_or(1);
            let memory = parts[1].trim_end_matches("gb").parse::<i32>().unwrap_or(1);
            return (core, memory);
        }
    }
    (1, 1) // Default: 1 core, 1GB
}

/// Sakura Cloud provider
///
/// Hosts address their server by `tag` (the Sakura server ID) once it has
/// been allocated. The distro's region selects the zone, falling back to the
/// provider default.
pub struct SakuraCloudProvider {
    zone: String,
}

impl SakuraCloudProvider {
    pub fn new(zone: impl Into<String>) -> Self {
        Self { zone: zone.into() }
    }

    fn client(&self, target: &InstanceTarget) -> Usacloud {
        Usacloud::new(target.distro.region.as_deref().unwrap_or(&self.zone))
    }

    /// Resolve the server for a target: by ID when tagged, by host tag otherwise
    async fn find_server(
        &self,
        cancel: &CancellationToken,
        target: &InstanceTarget,
    ) -> hostflow_cloud::Result<Option<ServerInfo>> {
        let usacloud = self.client(target);
        let server = match &target.tag {
            Some(id) => usacloud.get_server_by_id(cancel, id).await?,
            None => {
                usacloud
                    .find_server_by_host_tag(cancel, &target.host_id)
                    .await?
            }
        };
        Ok(server)
    }

    async fn require_server(
        &self,
        cancel: &CancellationToken,
        target: &InstanceTarget,
    ) -> hostflow_cloud::Result<ServerInfo> {
        self.find_server(cancel, target)
            .await?
            .ok_or_else(|| CloudError::InstanceNotFound(target.instance_id().to_string()))
    }
}

#[async_trait]
impl CloudProvider for SakuraCloudProvider {
    fn name(&self) -> &str {
        "sakura-cloud"
    }

    fn kind(&self) -> ProviderKind {
        ProviderKind::SakuraCloud
    }

    async fn create_instance(
        &self,
        cancel: &CancellationToken,
        target: &InstanceTarget,
    ) -> hostflow_cloud::Result<String> {
        let usacloud = self.client(target);

        if let Some(existing) = usacloud
            .find_server_by_host_tag(cancel, &target.host_id)
            .await?
        {
            tracing::info!(
                "Server for {} already exists (ID: {})",
                target.host_id,
                existing.id_str()
            );
            return Ok(existing.id_str());
        }

        let (core, memory) = parse_plan(target.distro.instance_type.as_deref());
        let config = CreateServerConfig {
            name: target.host_id.clone(),
            core,
            memory,
            os_type: target.distro.image.clone(),
            tags: vec![
                format!("{}{}", HOST_TAG_PREFIX, target.host_id),
                format!("hostflow.distro={}", target.distro.id),
            ],
        };

        tracing::info!("Creating server: {} in {}", config.name, usacloud.zone());
        let server = usacloud.create_server(cancel, &config).await?;
        Ok(server.id_str())
    }

    async fn start_instance(
        &self,
        cancel: &CancellationToken,
        target: &InstanceTarget,
    ) -> hostflow_cloud::Result<()> {
        let server = self.require_server(cancel, target).await?;
        if server.status() == InstanceStatus::Running {
            return Ok(());
        }
        tracing::info!("Booting server: {}", server.id_str());
        self.client(target)
            .power_on(cancel, &server.id_str())
            .await?;
        Ok(())
    }

    async fn stop_instance(
        &self,
        cancel: &CancellationToken,
        target: &InstanceTarget,
    ) -> hostflow_cloud::Result<()> {
        let server = self.require_server(cancel, target).await?;
        if server.status() == InstanceStatus::Stopped {
            return Ok(());
        }
        tracing::info!("Shutting down server: {}", server.id_str());
        self.client(target)
            .power_off(cancel, &server.id_str())
            .await?;
        Ok(())
    }

    async fn terminate_instance(
        &self,
        cancel: &CancellationToken,
        target: &InstanceTarget,
    ) -> hostflow_cloud::Result<()> {
        let Some(server) = self.find_server(cancel, target).await? else {
            tracing::debug!("Server for {} already gone", target.host_id);
            return Ok(());
        };

        tracing::info!("Deleting server: {}", server.id_str());
        match self.client(target).delete_server(cancel, &server.id_str()).await {
            Ok(()) => Ok(()),
            Err(crate::SakuraError::ServerNotFound(_)) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn get_instance_status(
        &self,
        cancel: &CancellationToken,
        target: &InstanceTarget,
    ) -> hostflow_cloud::Result<InstanceStatus> {
        Ok(self
            .find_server(cancel, target)
            .await?
            .map(|s| s.status())
            .unwrap_or(InstanceStatus::Terminated))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hostflow_cloud::Distro;

    #[test]
    fn test_parse_plan() {
        assert_eq!(parse_plan(Some("2core-4gb")), (2, 4));
        assert_eq!(parse_plan(Some("garbage")), (1, 1));
        assert_eq!(parse_plan(None), (1, 1));
    }

    #[test]
    fn test_zone_follows_distro_region() {
        let provider = SakuraCloudProvider::new("tk1a");
        let distro = Distro::new("ci", ProviderKind::SakuraCloud);
        let target = InstanceTarget::new("h1", None, distro.clone());
        assert_eq!(provider.client(&target).zone(), "tk1a");

        let target = InstanceTarget::new("h1", None, distro.with_region("is1b"));
        assert_eq!(provider.client(&target).zone(), "is1b");
    }
}
