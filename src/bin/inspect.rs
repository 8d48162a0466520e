//! Bootcart Inspector
//!
//! Read-only view of a firmware image: list container directories, resolve
//! component regions, and run a full authenticated load.

use anyhow::{Context, Result};
use bootcart::{ComponentId, ComponentType, LoaderBuilder, Region, Tag};
use clap::{Args as ClapArgs, Parser, Subcommand};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::path::PathBuf;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "bootcart-inspect")]
#[command(about = "Inspect and verify components in a firmware image")]
struct Args {
    /// Path to the firmware image
    #[arg(short = 'i', long)]
    image: PathBuf,

    /// Flash map TOML
    #[arg(short = 'm', long)]
    flash_map: PathBuf,

    /// Loader configuration TOML
    #[arg(short = 'c', long)]
    config: Option<PathBuf>,

    /// Disable verified boot regardless of the configuration
    #[arg(long)]
    no_verified_boot: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List the directory of an authenticated container
    List {
        /// Container signature, e.g. IPFW
        container: Tag,
    },
    /// Resolve a component's storage region without loading it
    Region(Target),
    /// Authenticate and decompress a component
    Load {
        #[command(flatten)]
        target: Target,

        /// Write the decompressed bytes to this file
        #[arg(short = 'o', long)]
        output: Option<PathBuf>,
    },
}

#[derive(ClapArgs, Debug)]
struct Target {
    /// Container signature (container mode)
    #[arg(long, requires = "name", conflicts_with = "flash")]
    container: Option<Tag>,

    /// Component name inside the container
    #[arg(long)]
    name: Option<Tag>,

    /// Flash signature of a stand-alone component, e.g. SG02
    #[arg(long)]
    flash: Option<Tag>,
}

impl Target {
    fn component_id(&self) -> Result<ComponentId> {
        match (self.container, self.name, self.flash) {
            (Some(container), Some(name), None) => Ok(ComponentId::in_container(container, name)),
            (None, None, Some(flash)) => Ok(ComponentId::by_type(
                ComponentType::from_flash_signature(flash),
            )),
            _ => anyhow::bail!("specify either --container and --name, or --flash"),
        }
    }
}

#[derive(Serialize)]
struct RegionReport {
    component: String,
    base: u64,
    size: u64,
}

#[derive(Serialize)]
struct LoadReport {
    component: String,
    len: usize,
    sha256: String,
    output: Option<PathBuf>,
}

fn region_report(id: &ComponentId, region: Region) -> RegionReport {
    RegionReport {
        component: id.to_string(),
        base: region.base,
        size: region.size,
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let mut builder = LoaderBuilder::new()
        .image(&args.image)
        .flash_map(&args.flash_map);
    if let Some(config) = &args.config {
        builder = builder.config(config);
    }
    if args.no_verified_boot {
        builder = builder.verified_boot(false);
    }
    let loader = builder
        .build()
        .with_context(|| format!("Failed to open {}", args.image.display()))?;

    match args.command {
        Command::List { container } => {
            let components = loader
                .list_components(container)
                .with_context(|| format!("Failed to list container {}", container))?;
            println!("{}", serde_json::to_string_pretty(&components)?);
        }
        Command::Region(target) => {
            let id = target.component_id()?;
            let region = loader
                .locate_component_region(&id)
                .with_context(|| format!("Failed to locate {}", id))?;
            println!("{}", serde_json::to_string_pretty(&region_report(&id, region))?);
        }
        Command::Load { target, output } => {
            let id = target.component_id()?;
            let component = loader
                .load_component(&id, None)
                .with_context(|| format!("Failed to load {}", id))?;

            let digest = hex::encode(Sha256::digest(component.as_bytes()));
            if let Some(path) = &output {
                std::fs::write(path, component.as_bytes())
                    .with_context(|| format!("Failed to write {}", path.display()))?;
                info!(path = %path.display(), len = component.len(), "Wrote component");
            }

            let report = LoadReport {
                component: id.to_string(),
                len: component.len(),
                sha256: digest,
                output,
            };
            loader.release(component);
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
    }

    Ok(())
}
