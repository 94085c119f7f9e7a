use crate::app::{self, App};
use colored::Colorize;
use hostflow_cloud::{Distro, ProviderKind};
use hostflow_core::JobSpec;
use tokio_util::sync::CancellationToken;

/// Distro fields taken from the command line
pub struct DistroArgs {
    pub name: String,
    pub provider: String,
    pub image: Option<String>,
    pub instance_type: Option<String>,
    pub region: Option<String>,
}

impl DistroArgs {
    fn into_distro(self) -> anyhow::Result<Distro> {
        let provider: ProviderKind = self.provider.parse().map_err(anyhow::Error::msg)?;
        let mut distro = Distro::new(self.name, provider);
        if let Some(image) = self.image {
            distro = distro.with_image(image);
        }
        if let Some(instance_type) = self.instance_type {
            distro = distro.with_instance_type(instance_type);
        }
        if let Some(region) = self.region {
            distro = distro.with_region(region);
        }
        Ok(distro)
    }
}

pub async fn handle(
    app: &App,
    host: String,
    distro: DistroArgs,
    cancel: &CancellationToken,
) -> anyhow::Result<()> {
    let distro = distro.into_distro()?;
    println!(
        "{}",
        format!("Provisioning '{}' on {}...", host, distro.provider).yellow()
    );
    println!("Distro: {}", distro.id.cyan());

    let spec = JobSpec::new("host-provision", host, app::operator())
        .with_params(serde_json::json!({ "distro": distro }));
    let report = app.dispatcher.dispatch(spec, cancel).await;

    println!();
    app::print_report(&report)
}
