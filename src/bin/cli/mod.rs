use std::{net::Ipv4Addr, path::PathBuf};

use clap::{Args, Parser, Subcommand, ValueEnum};
use clouddns_acme_responder::{
    domain::{BatchEntry, Challenge, ACME_CHALLENGE_RECORD},
    provider::{Ttl, DEFAULT_TTL},
};
use log::LevelFilter;

macro_rules! env_prefix {
    () => {
        "CLOUDDNS_ACME_"
    };
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Parser)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Set the loglevel of the application
    #[arg(
        value_enum,
        short = 'l',
        long,
        global = true,
        default_value_t = Loglevel::Info,
        value_name = "LEVEL",
        env = concat!(env_prefix!(), "LOGLEVEL")
    )]
    pub loglevel: Loglevel,

    /// Google Cloud project that owns the managed zones. Required
    #[arg(
        short = 'p',
        long,
        global = true,
        value_name = "PROJECT",
        env = concat!(env_prefix!(), "PROJECT_ID")
    )]
    pub project_id: Option<String>,

    /// Authenticate with the service account attached to this workload
    #[arg(
        long,
        action,
        global = true,
        default_value_t = false,
        conflicts_with = "private_key_json_file",
        env = concat!(env_prefix!(), "COMPUTE_ENGINE_SERVICE_ACCOUNT")
    )]
    pub compute_engine_service_account: bool,

    /// Authenticate with this service account JSON key file
    #[arg(
        long,
        global = true,
        value_name = "FILE",
        env = concat!(env_prefix!(), "PRIVATE_KEY_JSON_FILE")
    )]
    pub private_key_json_file: Option<PathBuf>,

    /// TTL of the challenge records in seconds
    #[arg(
        long,
        global = true,
        default_value_t = DEFAULT_TTL,
        value_name = "TTL",
        env = concat!(env_prefix!(), "TTL")
    )]
    pub ttl: Ttl,

    /// Label prepended to every domain to form the challenge record name
    #[arg(
        long,
        global = true,
        default_value = ACME_CHALLENGE_RECORD,
        value_name = "LABEL",
        env = concat!(env_prefix!(), "RECORD_NAME")
    )]
    pub record_name: String,

    /// Seconds between status checks of a submitted change
    #[arg(
        long,
        global = true,
        default_value_t = 5,
        env = concat!(env_prefix!(), "CHANGE_POLL_INTERVAL")
    )]
    pub change_poll_interval: u64,

    /// Give up on a change that is not applied after this many seconds. 0 waits forever
    #[arg(
        long,
        global = true,
        default_value_t = 600,
        env = concat!(env_prefix!(), "CHANGE_TIMEOUT")
    )]
    pub change_timeout: u64,

    /// Seconds between propagation checks against a nameserver
    #[arg(
        long,
        global = true,
        default_value_t = 5,
        env = concat!(env_prefix!(), "PROPAGATION_INTERVAL")
    )]
    pub propagation_interval: u64,

    /// Give up on a nameserver that does not serve the records after this many seconds. 0 waits forever
    #[arg(
        long,
        global = true,
        default_value_t = 600,
        env = concat!(env_prefix!(), "PROPAGATION_TIMEOUT")
    )]
    pub propagation_timeout: u64,

    /// Timeout of a single TXT query in seconds
    #[arg(
        long,
        global = true,
        default_value_t = 5,
        env = concat!(env_prefix!(), "DNS_QUERY_TIMEOUT")
    )]
    pub dns_query_timeout: u64,

    /// List of DNS servers used to resolve nameserver hostnames, as a comma-separated string
    #[arg(
        long,
        global = true,
        value_name = "SERVER_IP",
        use_value_delimiter = true,
        value_delimiter = ',',
        default_values = ["8.8.8.8", "1.1.1.1"],
        env = concat!(env_prefix!(), "RESOLVER_DNS_SERVERS")
    )]
    pub resolver_dns_servers: Vec<Ipv4Addr>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Subcommand)]
pub enum Command {
    /// Publish challenge records and wait until they are served
    Respond(ChallengeArgs),
    /// Remove previously published challenge values
    Cleanup(ChallengeArgs),
}

impl Command {
    pub fn challenges(&self) -> &[ChallengeArg] {
        match self {
            Command::Respond(args) | Command::Cleanup(args) => &args.challenges,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Args)]
pub struct ChallengeArgs {
    /// Challenge to handle, as DOMAIN=CONTENT. Can be given multiple times
    #[arg(
        long = "challenge",
        short = 'c',
        required = true,
        value_name = "DOMAIN=CONTENT",
        value_parser = parse_challenge
    )]
    pub challenges: Vec<ChallengeArg>,
}

/// A domain and the key authorization digest to publish for it
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChallengeArg {
    pub domain: String,
    pub content: String,
}

impl ChallengeArg {
    pub fn to_entry(&self, record_name: &str) -> BatchEntry {
        BatchEntry::new(&self.domain, Challenge::dns01(record_name, &self.content))
    }
}

fn parse_challenge(s: &str) -> Result<ChallengeArg, String> {
    match s.split_once('=') {
        Some((domain, content)) if !domain.is_empty() && !content.is_empty() => Ok(ChallengeArg {
            domain: domain.to_owned(),
            content: content.to_owned(),
        }),
        _ => Err(format!("expected DOMAIN=CONTENT, got '{}'", s)),
    }
}

/// Used to set the applications loglevel
// This is essentially a re-creation of log:Level. However, that enum doesn't derive ValueEnum, so we have to do it manually here
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, ValueEnum)]
pub enum Loglevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}
impl From<Loglevel> for LevelFilter {
    fn from(ll: Loglevel) -> Self {
        match ll {
            Loglevel::Error => LevelFilter::Error,
            Loglevel::Warn => LevelFilter::Warn,
            Loglevel::Info => LevelFilter::Info,
            Loglevel::Debug => LevelFilter::Debug,
            Loglevel::Trace => LevelFilter::Trace,
        }
    }
}
