use clap::Parser;
use std::path::PathBuf;

use cloudha_core::config::FailoverConfig;
use cloudha_core::observability::init_logging;
use cloudha_core::types::NodeResourceType;
use cloudha_core::{run_failover, CloudProvider, FailoverResult, ManagedCloudProvider, ProviderContext};

#[derive(Parser)]
#[command(name = "cloudha")]
#[command(about = "Cloud failover and primary election for BIG-IP HA clusters", long_about = None)]
struct Cli {
    /// Configuration file (TOML)
    #[arg(long, short, default_value = "/etc/cloudha/config.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand)]
enum Commands {
    /// Point routes and NIC addresses at this device
    Failover,
    /// Print the unified instance map as JSON
    Instances,
    /// Print the elected primary
    Elect {
        /// Re-check the winner's live hostname against its record
        #[arg(long)]
        validate: bool,
    },
    /// List nodes behind a scale set or resource group
    Nodes {
        #[arg(long)]
        resource_id: String,

        /// "scale-set" or "resource-group"
        #[arg(long = "type", default_value = "scale-set")]
        resource_type: String,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config = match FailoverConfig::from_file(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            init_logging("info");
            tracing::error!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };
    init_logging(&config.logging.level);

    if let Err(e) = run(cli.command, config).await {
        tracing::error!("{}", e);
        std::process::exit(1);
    }
}

async fn run(command: Commands, config: FailoverConfig) -> FailoverResult<()> {
    let ctx = ProviderContext::from_config(config)?;

    match command {
        Commands::Failover => {
            let report = run_failover(&ctx).await?;
            tracing::info!(
                recovered = report.recovered,
                routes = report.plan.routes.len(),
                disassociated = report.plan.nics.disassociate.len(),
                associated = report.plan.nics.associate.len(),
                "failover finished"
            );
        }
        Commands::Instances => {
            let provider = ManagedCloudProvider::new(ctx);
            let options = provider.default_options()?;
            let instances = provider.get_instances(&options).await?;
            println!("{}", serde_json::to_string_pretty(&instances)?);
        }
        Commands::Elect { validate } => {
            let provider = ManagedCloudProvider::new(ctx);
            let options = provider.default_options()?;
            let instances = provider.get_instances(&options).await?;
            let primary = provider.elect_primary(&instances).await?;
            if validate {
                let valid = provider.is_valid_primary(&primary, &instances).await?;
                println!("{} (valid: {})", primary, valid);
            } else {
                println!("{}", primary);
            }
        }
        Commands::Nodes {
            resource_id,
            resource_type,
        } => {
            let resource_type: NodeResourceType = resource_type.parse()?;
            let provider = ManagedCloudProvider::new(ctx);
            let nodes = provider.get_nodes_by_resource_id(&resource_id, resource_type).await?;
            println!("{}", serde_json::to_string_pretty(&nodes)?);
        }
    }
    Ok(())
}
