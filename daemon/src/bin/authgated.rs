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

use std::io;
use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use bytes::{BufMut, BytesMut};
use clap::{Arg, ArgAction, Command};
use futures::{SinkExt, StreamExt};
use tokio::net::{UnixListener, UnixStream};
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::broadcast;
use tokio::time;
use tokio_util::codec::{Decoder, Encoder, Framed};
use tracing_subscriber::EnvFilter;

use authgate_common::config::AuthgatedConfig;
use authgate_common::constants::{DEFAULT_CONFIG_PATH, PREAUTH_UID_MAX, PREAUTH_UID_MIN};
use authgate_common::daemon_proto::{DaemonRequest, DaemonResponse, DaemonStatus};

use authgate::broker::Broker;
use authgate::catalog::BrokerCatalog;
use authgate::session::{SessionCoordinator, SessionError};
use authgate::tempentries::{RandomIdSource, RegistryError, TempIdentityRegistry};

//=== the codec

#[derive(Default)]
struct DaemonCodec;

impl Decoder for DaemonCodec {
    type Error = io::Error;
    type Item = DaemonRequest;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        trace!("Attempting to decode request ...");
        match serde_json::from_slice::<DaemonRequest>(src) {
            Ok(msg) => {
                // Clear the buffer for the next message.
                src.clear();
                Ok(Some(msg))
            }
            _ => Ok(None),
        }
    }
}

impl Encoder<DaemonResponse> for DaemonCodec {
    type Error = io::Error;

    fn encode(&mut self, msg: DaemonResponse, dst: &mut BytesMut) -> Result<(), Self::Error> {
        trace!("Attempting to send response -> {:?} ...", msg);
        let data = serde_json::to_vec(&msg).map_err(|e| {
            error!("socket encoding error -> {:?}", e);
            io::Error::new(io::ErrorKind::Other, "JSON encode error")
        })?;
        dst.put(data.as_slice());
        Ok(())
    }
}

/// Pass this a file path and it'll look for the file and remove it if it's there.
fn rm_if_exist(p: &str) {
    if Path::new(p).exists() {
        debug!("Removing requested file {:?}", p);
        let _ = std::fs::remove_file(p).map_err(|e| {
            error!(
                "Failure while attempting to attempting to remove {:?} -> {:?}",
                p, e
            );
        });
    } else {
        debug!("Path {:?} doesn't exist, not attempting to remove.", p);
    }
}

async fn handle_client(
    sock: UnixStream,
    catalog: Arc<BrokerCatalog>,
    registry: Arc<TempIdentityRegistry>,
    authorize_timeout: Duration,
    shutdown_tx: broadcast::Sender<()>,
) {
    debug!("Accepted connection");

    let mut reqs = Framed::new(sock, DaemonCodec);
    let mut session: Option<SessionCoordinator> = None;

    trace!("Waiting for requests ...");
    while let Some(Ok(req)) = reqs.next().await {
        debug!("Client request -> {}", req.as_safe_string());

        let resp = match req {
            DaemonRequest::ListBrokers => DaemonResponse::Brokers(catalog.list()),
            DaemonRequest::BeginSession {
                broker,
                username,
                lang,
            } => {
                if let Some(mut stale) = session.take() {
                    // Invalid to begin a second attempt on one connection.
                    // Tear the stale one down, something is wrong.
                    warn!("Attempt to begin a session while one is active");
                    stale.end().await;
                    DaemonResponse::Error("session already active".to_string())
                } else {
                    match catalog.broker_by_name(&broker) {
                        Some(handle) => {
                            let proxy: Arc<dyn Broker + Send + Sync> = handle.broker.clone();
                            match SessionCoordinator::begin(
                                proxy,
                                registry.clone(),
                                &username,
                                &lang,
                                authorize_timeout,
                                shutdown_tx.subscribe(),
                            )
                            .await
                            {
                                Ok(coordinator) => {
                                    let encryption_key =
                                        coordinator.encryption_key().to_string();
                                    session = Some(coordinator);
                                    DaemonResponse::SessionBegun { encryption_key }
                                }
                                Err(SessionError::Registry(RegistryError::CapacityReached)) => {
                                    // Existing sessions are unaffected, this
                                    // attempt just has to come back later.
                                    DaemonResponse::Error(
                                        "too many pending logins, try again later".to_string(),
                                    )
                                }
                                Err(err) => {
                                    warn!("unable to begin session -> {:?}", err);
                                    DaemonResponse::Error(
                                        "unable to start authentication session".to_string(),
                                    )
                                }
                            }
                        }
                        None => {
                            warn!("no broker named {:?}", broker);
                            DaemonResponse::Error("no such broker".to_string())
                        }
                    }
                }
            }
            DaemonRequest::AuthenticationModes {
                supported_ui_layouts,
            } => match &mut session {
                Some(coordinator) => {
                    match coordinator.authentication_modes(&supported_ui_layouts).await {
                        Ok(modes) => DaemonResponse::AuthenticationModes(modes),
                        Err(err) => {
                            warn!("authentication mode query failed -> {:?}", err);
                            DaemonResponse::Error("authentication error".to_string())
                        }
                    }
                }
                None => {
                    warn!("Attempt to continue auth session while current session is inactive");
                    DaemonResponse::Error("no active session".to_string())
                }
            },
            DaemonRequest::SelectAuthenticationMode(mode_id) => match &mut session {
                Some(coordinator) => match coordinator.select_mode(&mode_id).await {
                    Ok(layout) => DaemonResponse::UiLayout(layout),
                    Err(err) => {
                        warn!("mode selection failed -> {:?}", err);
                        DaemonResponse::Error("authentication error".to_string())
                    }
                },
                None => {
                    warn!("Attempt to continue auth session while current session is inactive");
                    DaemonResponse::Error("no active session".to_string())
                }
            },
            DaemonRequest::Authorize {
                authentication_data,
            } => match &mut session {
                Some(coordinator) => match coordinator.authorize(&authentication_data).await {
                    Ok((verdict, user_info)) => {
                        DaemonResponse::AccessResult { verdict, user_info }
                    }
                    Err(err) => {
                        warn!("authorization failed -> {:?}", err);
                        DaemonResponse::Error("authentication error".to_string())
                    }
                },
                None => {
                    warn!("Attempt to continue auth session while current session is inactive");
                    DaemonResponse::Error("no active session".to_string())
                }
            },
            DaemonRequest::EndSession => {
                if let Some(mut coordinator) = session.take() {
                    coordinator.end().await;
                }
                DaemonResponse::Ok
            }
            DaemonRequest::UserByID(uid) => DaemonResponse::User(
                registry.user_by_id(uid).ok().map(|u| u.as_provisional()),
            ),
            DaemonRequest::UserByLogin(login) => DaemonResponse::User(
                registry
                    .user_by_login(login.as_str())
                    .ok()
                    .map(|u| u.as_provisional()),
            ),
            DaemonRequest::UserByName(name) => DaemonResponse::User(
                registry
                    .user_by_name(name.as_str())
                    .ok()
                    .map(|u| u.as_provisional()),
            ),
            DaemonRequest::Status => DaemonResponse::Status(DaemonStatus {
                brokers: catalog.list(),
                pre_auth_users: registry.len(),
                max_pre_auth_users: registry.capacity(),
            }),
        };

        if let Err(err) = reqs.send(resp).await {
            warn!("unable to send response -> {:?}", err);
            break;
        }
        if let Err(err) = reqs.flush().await {
            warn!("unable to flush response -> {:?}", err);
            break;
        }
        debug!("flushed response!");
    }

    // The connection is gone. An in-flight attempt must not leak its
    // broker session or registry entry.
    if let Some(mut coordinator) = session.take() {
        coordinator.end().await;
    }

    debug!("Disconnecting client ...");
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let clap_args = Command::new("authgated")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Authgate authentication daemon")
        .arg(
            Arg::new("debug")
                .help("Show extra debug information")
                .short('d')
                .long("debug")
                .env("AUTHGATED_DEBUG")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("configtest")
                .help("Display the configuration and exit")
                .short('t')
                .long("configtest")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("config")
                .help("Set the config file path")
                .short('c')
                .long("config")
                .default_value(DEFAULT_CONFIG_PATH),
        )
        .get_matches();

    if clap_args.get_flag("debug") {
        std::env::set_var("RUST_LOG", "debug");
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let Some(cfg_path_str) = clap_args.get_one::<String>("config") else {
        error!("Failed to pull the configuration path");
        return ExitCode::FAILURE;
    };

    let cfg = match AuthgatedConfig::new().read_options_from_optional_config(cfg_path_str) {
        Ok(cfg) => cfg,
        Err(err) => {
            error!("Failed to parse {} [{}]", cfg_path_str, err);
            return ExitCode::FAILURE;
        }
    };

    if clap_args.get_flag("configtest") {
        println!("Configuration found at {}:", cfg_path_str);
        println!("{}", cfg);
        return ExitCode::SUCCESS;
    }

    let registry = Arc::new(TempIdentityRegistry::with_capacity(
        Box::new(RandomIdSource::new(PREAUTH_UID_MIN, PREAUTH_UID_MAX)),
        cfg.max_pre_auth_users,
    ));

    let catalog = Arc::new(BrokerCatalog::load_from_dir(
        &cfg.broker_dir,
        Duration::from_secs(cfg.conn_timeout),
    ));
    info!("{} authentication broker(s) available", catalog.len());

    rm_if_exist(&cfg.sock_path);
    let listener = match UnixListener::bind(&cfg.sock_path) {
        Ok(listener) => listener,
        Err(err) => {
            error!("Failed to bind unix socket {} -> {:?}", cfg.sock_path, err);
            return ExitCode::FAILURE;
        }
    };
    info!("Listening on {}", cfg.sock_path);

    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(sigterm) => sigterm,
        Err(err) => {
            error!("Failed to install SIGTERM handler -> {:?}", err);
            return ExitCode::FAILURE;
        }
    };

    // Every coordinator subscribes to this channel so that a daemon
    // shutdown cancels in-flight IsAuthorized calls.
    let (shutdown_tx, _shutdown_rx) = broadcast::channel(4);
    let authorize_timeout = Duration::from_secs(cfg.authorize_timeout);

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            _ = sigterm.recv() => break,
            accepted = listener.accept() => match accepted {
                Ok((socket, _addr)) => {
                    let catalog = catalog.clone();
                    let registry = registry.clone();
                    let shutdown_tx = shutdown_tx.clone();
                    tokio::spawn(async move {
                        handle_client(socket, catalog, registry, authorize_timeout, shutdown_tx)
                            .await
                    });
                }
                Err(err) => {
                    error!("Error while handling connection -> {:?}", err);
                }
            }
        }
    }

    info!("Signal received, shutting down");
    let _ = shutdown_tx.send(());
    // Give in-flight attempts a moment to cancel and tear down.
    time::sleep(Duration::from_millis(500)).await;

    rm_if_exist(&cfg.sock_path);
    info!("Stopped");
    ExitCode::SUCCESS
}
