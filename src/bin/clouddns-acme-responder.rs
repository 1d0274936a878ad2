mod cli;

use std::{process::ExitCode, time::Duration};

use clap::Parser;
use env_logger::Builder;
use itertools::Itertools;
use log::{error, info, warn};

use clouddns_acme_responder::{
    config::{AuthMode, ResponderConfig},
    domain::BatchEntry,
    error::ResponderError,
    propagation::PropagationConfig,
    responder::{ChallengeResponder, CloudDnsResponder},
    retry::{RetryPolicy, Shutdown},
};

use cli::{Cli, Command};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    Builder::new().filter_level(cli.loglevel.into()).init();

    match run(cli).await {
        Ok(_) => {
            info!("Completed");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

fn get_config(cli: &Cli) -> Result<ResponderConfig, ResponderError> {
    let project_id = cli.project_id.to_owned().ok_or_else(|| {
        ResponderError::Configuration("you need to specify a project id".to_owned())
    })?;
    let auth = AuthMode::from_options(
        cli.compute_engine_service_account,
        cli.private_key_json_file.to_owned(),
    )?;

    let mut config = ResponderConfig::new(&project_id, auth);
    config.ttl = cli.ttl;
    config.change_poll = RetryPolicy::fixed(Duration::from_secs(cli.change_poll_interval))
        .with_max_elapsed(Duration::from_secs(cli.change_timeout));
    config.propagation = PropagationConfig {
        retry: RetryPolicy::fixed(Duration::from_secs(cli.propagation_interval))
            .with_max_elapsed(Duration::from_secs(cli.propagation_timeout)),
        query_timeout: Duration::from_secs(cli.dns_query_timeout),
        ..PropagationConfig::default()
    };
    config.resolvers = cli.resolver_dns_servers.to_owned();
    Ok(config)
}

async fn run(cli: Cli) -> Result<(), ResponderError> {
    let config = get_config(&cli)?;

    let (trigger, shutdown) = Shutdown::channel();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, stopping all pending waits");
            trigger.trigger();
        }
    });

    let responder = CloudDnsResponder::from_config(&config, shutdown).await?;

    let batch = cli
        .command
        .challenges()
        .iter()
        .map(|c| c.to_entry(&cli.record_name))
        .collect_vec();
    info!(
        "Handling challenges for: {}",
        batch.iter().map(BatchEntry::record_name).join(", ")
    );

    match cli.command {
        Command::Respond(_) => responder.respond_all(&batch).await,
        Command::Cleanup(_) => responder.cleanup_all(&batch).await,
    }
}
