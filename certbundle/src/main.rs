//! certbundle: command-line certificate bundler.

use anyhow::{bail, Context, Result};
use certbundle_lib::{BundleFlavor, Bundler, PlatformSet};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "certbundle",
    about = "Build trusted, optimized certificate chains"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build a bundle from certificate files or from a live TLS server
    Bundle {
        /// PEM file with the leaf certificate and any intermediates
        #[arg(long, conflicts_with = "domain")]
        cert: Option<PathBuf>,
        /// PEM private key file for the leaf
        #[arg(long, requires = "cert")]
        key: Option<PathBuf>,
        /// Bundle the chain served by this TLS server (port 443)
        #[arg(long)]
        domain: Option<String>,
        /// Dial this IP instead of resolving the domain
        #[arg(long, requires = "domain")]
        ip: Option<String>,
        /// Chain selection strategy (remote bundling always uses ubiquitous)
        #[arg(long, value_enum, default_value = "ubiquitous")]
        flavor: Flavor,
        /// PEM bundle of trusted root certificates
        #[arg(long = "ca-bundle", value_name = "FILE")]
        ca_bundle: PathBuf,
        /// PEM bundle of known intermediate certificates
        #[arg(long = "int-bundle", value_name = "FILE")]
        int_bundle: Option<PathBuf>,
        /// JSON platform metadata for ubiquity scoring
        #[arg(long, value_name = "FILE")]
        metadata: Option<PathBuf>,
        /// Directory where fetched intermediates are stashed
        #[arg(long, value_name = "DIR", default_value = certbundle_lib::DEFAULT_STASH_DIR)]
        stash: PathBuf,
    },
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Flavor {
    Optimal,
    Ubiquitous,
}

impl From<Flavor> for BundleFlavor {
    fn from(flavor: Flavor) -> Self {
        match flavor {
            Flavor::Optimal => BundleFlavor::Optimal,
            Flavor::Ubiquitous => BundleFlavor::Ubiquitous,
        }
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Bundle {
            cert,
            key,
            domain,
            ip,
            flavor,
            ca_bundle,
            int_bundle,
            metadata,
            stash,
        } => {
            let mut bundler = Bundler::new(&ca_bundle, int_bundle.as_deref())
                .context("failed to load certificate pools")?
                .with_stash_dir(stash);

            if let Some(metadata_path) = &metadata {
                let platforms = PlatformSet::from_metadata_file(metadata_path)
                    .context("failed to load platform metadata")?;
                bundler = bundler.with_platforms(platforms);
            }

            let bundle = match (&cert, &domain) {
                (Some(cert_file), None) => bundler
                    .bundle_from_file(cert_file, key.as_deref(), flavor.into())
                    .with_context(|| format!("failed to bundle {}", cert_file.display()))?,
                (None, Some(domain)) => bundler
                    .bundle_from_remote(domain, ip.as_deref())
                    .with_context(|| format!("failed to bundle from {}", domain))?,
                _ => bail!("exactly one of --cert or --domain is required"),
            };

            println!("{}", serde_json::to_string_pretty(&bundle)?);
        }
    }

    Ok(())
}
