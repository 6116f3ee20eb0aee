// SPDX-License-Identifier: MIT

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use ncalink::{
    client::SigningClient,
    config::{load_config, Config},
};
use tracing_subscriber::{fmt::format::FmtSpan, layer::SubscriberExt, EnvFilter};

// The path, relative to $XDG_CONFIG_HOME, of the default config file location.
const DEFAULT_CONFIG: &str = "ncalink/client.toml";

/// Diagnostics for the NCALayer signing service.
#[derive(Debug, Parser)]
#[command(version)]
struct Cli {
    /// The path to the client's configuration file.
    ///
    /// If no path is provided, the configuration file at
    /// $XDG_CONFIG_HOME/ncalink/client.toml is used, if it exists. If it
    /// does not exist, the configuration defaults are used; those match the
    /// production NCALayer endpoint.
    #[arg(long, short, env = "NCALINK_CONFIG")]
    config: Option<PathBuf>,

    /// A set of one or more comma-separated directives to filter logs.
    ///
    /// The general format is "target_name[span_name{field=value}]=level"
    /// where level is one of TRACE, DEBUG, INFO, WARN, ERROR.
    ///
    /// Details: https://docs.rs/tracing-subscriber/0.3.19/tracing_subscriber/filter/struct.EnvFilter.html#directives
    #[arg(long, env = "NCALINK_LOG", default_value = "WARN,ncalink=INFO")]
    pub log_filter: String,
    #[command(subcommand)]
    pub command: Command,
}

#[derive(clap::Subcommand, Debug)]
enum Command {
    /// Check whether the signing daemon is reachable.
    Probe,
    /// List the credential stores currently available to the daemon.
    Stores,
    /// Show the certificate metadata for a credential store.
    KeyInfo {
        /// The store to inspect; defaults to the configured default store.
        store: Option<String>,
    },
    /// See the current configuration, or the defaults if no configuration
    /// file is supplied.
    Config,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let opts = Cli::parse();

    // Unfortunately we can't use clap's value_parser since EnvFilter does not
    // implement Clone.
    let log_filter = EnvFilter::builder().parse(&opts.log_filter).context(
        "NCALINK_LOG contains an invalid log directive; refer to \
            https://docs.rs/tracing-subscriber/0.3.19/tracing_subscriber/\
            filter/struct.EnvFilter.html#directives for format details.",
    )?;
    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_span_events(FmtSpan::NEW | FmtSpan::CLOSE)
        .with_writer(std::io::stderr);
    let registry = tracing_subscriber::registry()
        .with(stderr_layer)
        .with(log_filter);
    tracing::subscriber::set_global_default(registry)
        .expect("Programming error: set_global_default should only be called once.");

    let config: Config = load_config(opts.config, PathBuf::from(DEFAULT_CONFIG).as_path())?;

    if let Command::Config = opts.command {
        println!(
            "# This is the current configuration\n\n{config}\n# This concludes the configuration.\n"
        );
        return Ok(());
    }

    let default_store = config.default_store.clone();
    let client = SigningClient::new(std::sync::Arc::new(config));
    let result = run(&client, opts.command, default_store).await;
    client.connection().close().await;
    result
}

async fn run(client: &SigningClient, command: Command, default_store: String) -> anyhow::Result<()> {
    match command {
        Command::Probe => {
            if client.probe().await {
                println!("The signing daemon is running.");
            } else {
                println!("The signing daemon is not reachable.");
                std::process::exit(1);
            }
        }
        Command::Stores => {
            client
                .connection()
                .connect()
                .await
                .context("could not reach the signing daemon")?;
            let stores = client.list_credential_stores().await?;
            println!("{}", stores.join("\n"));
        }
        Command::KeyInfo { store } => {
            client
                .connection()
                .connect()
                .await
                .context("could not reach the signing daemon")?;
            let store = store.unwrap_or(default_store);
            let info = client.get_key_info(&store).await?;
            println!("alias:         {}", info.alias.as_deref().unwrap_or("-"));
            println!("subject:       {}", info.subject_dn.as_deref().unwrap_or("-"));
            println!("issuer:        {}", info.issuer_dn.as_deref().unwrap_or("-"));
            println!("algorithm:     {}", info.algorithm.as_deref().unwrap_or("-"));
            println!("serial number: {}", info.serial_number.as_deref().unwrap_or("-"));
        }
        Command::Config => unreachable!("Command handled prior to this match"),
    }

    Ok(())
}
