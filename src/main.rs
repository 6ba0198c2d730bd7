//! remedy-link - operator CLI for the remediation control panel API

use anyhow::Context;
use clap::Parser;
use reqwest::cookie::Jar;
use serde_json::Value;
use std::sync::Arc;
use tracing::{error, info, warn};

use remedy_link::{
    auth::{AuthStatus, SessionBackend},
    config::{Args, Command},
    events::{ANY_EVENT, NO_CREDENTIAL},
    logging, ClientConfig, CredentialStore, EventBridge, EventStreamClient, LoginRequest,
    RequestClient, RouteTracker,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file if present
    let _ = dotenvy::dotenv();

    let args = Args::parse();

    logging::init(&args.log_level, args.log_format)?;

    if let Err(e) = args.validate() {
        error!("Configuration error: {}", e);
        std::process::exit(1);
    }

    let client_config: ClientConfig = args.client_config();
    let jar = Arc::new(Jar::default());
    let credentials = Arc::new(CredentialStore::standard(
        &args.credential_file,
        SessionBackend::new(),
        Arc::clone(&jar),
        client_config.base()?,
    ));
    let client = RequestClient::with_cookie_jar(
        client_config,
        Arc::clone(&credentials),
        Arc::new(RouteTracker::default()),
        jar,
    )?;

    info!(api = %args.api_url, credential_file = %args.credential_file.display(), "remedy-link starting");

    match args.command.clone() {
        Command::Login { email, password } => {
            let session = client
                .login(&LoginRequest { email, password })
                .await
                .context("Login failed")?;
            match session.expires_at {
                Some(at) => println!("Logged in, credential valid until {}", at.to_rfc3339()),
                None => println!("Logged in"),
            }
        }
        Command::Logout => {
            client.logout().await?;
            println!("Logged out");
        }
        Command::Get { path, paginated } => {
            if paginated {
                let page = client.get_paginated::<Value>(&path).await?;
                println!("{}", serde_json::to_string_pretty(&page.items)?);
                eprintln!("{} of {} items", page.items.len(), page.total);
            } else {
                let body: Value = client.get(&path).await?;
                println!("{}", serde_json::to_string_pretty(&body)?);
            }
        }
        Command::Watch { events } => watch(&args, &client, credentials, events).await?,
    }

    Ok(())
}

async fn watch(
    args: &Args,
    client: &RequestClient,
    credentials: Arc<CredentialStore>,
    events: Vec<String>,
) -> anyhow::Result<()> {
    let stream = Arc::new(EventStreamClient::new(
        args.stream_config(),
        Arc::clone(&credentials),
    )?);

    let keys = if events.is_empty() {
        vec![ANY_EVENT.to_string()]
    } else {
        events
    };
    for key in &keys {
        stream.add_event_listener(key, |event| match serde_json::to_string(event) {
            Ok(line) => println!("{}", line),
            Err(e) => warn!(error = %e, "Failed to render event"),
        });
    }

    let bridge = EventBridge::spawn(Arc::clone(&stream), credentials.watch_status());

    if client.check_session().await != AuthStatus::Authenticated {
        error!("{}, run `remedy-link login` first", NO_CREDENTIAL);
        bridge.shutdown();
        std::process::exit(1);
    }

    let mut status_rx = stream.watch_status();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted, closing event stream");
                break;
            }
            changed = status_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                let status = status_rx.borrow_and_update().clone();
                if status.exhausted {
                    error!(error = ?status.last_error, "Event stream gave up");
                    break;
                }
            }
        }
    }

    bridge.shutdown();
    Ok(())
}
