#![deny(warnings)]
#![warn(unused_extern_crates)]
#![deny(clippy::todo)]
#![deny(clippy::unimplemented)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![deny(clippy::unreachable)]
#![deny(clippy::await_holding_lock)]
#![deny(clippy::needless_pass_by_value)]
#![deny(clippy::trivially_copy_pass_by_ref)]

#[macro_use]
extern crate tracing;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use authgate_common::client::call_daemon;
use authgate_common::config::AuthgatedConfig;
use authgate_common::constants::DEFAULT_CONFIG_PATH;
use authgate_common::daemon_proto::DaemonRequest;

#[derive(Debug, Parser)]
#[command(name = "authgate", about = "Authgate administration tool")]
struct AuthgateParser {
    #[command(subcommand)]
    commands: AuthgateOpt,
}

#[derive(Debug, Subcommand)]
enum AuthgateOpt {
    /// Check that the daemon is online and show its status
    Status {
        #[arg(short, long)]
        debug: bool,
    },
    /// List the configured authentication brokers
    ListBrokers {
        #[arg(short, long)]
        debug: bool,
    },
    /// Look up a provisional user by uid
    UserById {
        #[arg(short, long)]
        debug: bool,
        uid: u32,
    },
    /// Look up a provisional user by login name
    UserByLogin {
        #[arg(short, long)]
        debug: bool,
        login: String,
    },
    /// Look up a provisional user by generated display name
    UserByName {
        #[arg(short, long)]
        debug: bool,
        name: String,
    },
    /// Show the authgate version
    Version {
        #[arg(short, long)]
        debug: bool,
    },
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let opt = AuthgateParser::parse();

    let debug = match opt.commands {
        AuthgateOpt::Status { debug }
        | AuthgateOpt::ListBrokers { debug }
        | AuthgateOpt::UserById { debug, .. }
        | AuthgateOpt::UserByLogin { debug, .. }
        | AuthgateOpt::UserByName { debug, .. }
        | AuthgateOpt::Version { debug } => debug,
    };

    if debug {
        std::env::set_var("RUST_LOG", "debug");
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();

    let req = match opt.commands {
        AuthgateOpt::Status { .. } => DaemonRequest::Status,
        AuthgateOpt::ListBrokers { .. } => DaemonRequest::ListBrokers,
        AuthgateOpt::UserById { uid, .. } => DaemonRequest::UserByID(uid),
        AuthgateOpt::UserByLogin { login, .. } => DaemonRequest::UserByLogin(login),
        AuthgateOpt::UserByName { name, .. } => DaemonRequest::UserByName(name),
        AuthgateOpt::Version { .. } => {
            println!("authgate {}", env!("CARGO_PKG_VERSION"));
            return ExitCode::SUCCESS;
        }
    };

    let Ok(cfg) = AuthgatedConfig::new().read_options_from_optional_config(DEFAULT_CONFIG_PATH)
    else {
        error!("Failed to parse {}", DEFAULT_CONFIG_PATH);
        return ExitCode::FAILURE;
    };

    debug!("Using authgated socket path: {:?}", cfg.sock_path.as_str());

    // See if the daemon socket exists and quit if not.
    if !PathBuf::from(&cfg.sock_path).exists() {
        error!(
            "Failed to find unix socket at {}, is authgated running?",
            cfg.sock_path.as_str()
        );
        return ExitCode::FAILURE;
    }

    match call_daemon(cfg.sock_path.as_str(), req, cfg.conn_timeout).await {
        Ok(resp) => {
            match serde_json::to_string_pretty(&resp) {
                Ok(text) => println!("{}", text),
                Err(_) => println!("{:#?}", resp),
            }
            ExitCode::SUCCESS
        }
        Err(err) => {
            error!(
                "Failed to make request to authgated at {} -> {:?}",
                cfg.sock_path.as_str(),
                err
            );
            ExitCode::FAILURE
        }
    }
}
