//! `calsync auth <provider>`: connect an account through the browser.

use calsync_core::ProviderKind;
use calsync_providers::{AuthorizationCoordinator, DeepLinkRouter, FlowState, TokenRecord};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::config::ClientConfig;
use crate::error::ClientResult;

/// Runs the authorization code flow for `provider` and stores the token.
///
/// With a custom-scheme redirect URI the browser cannot reach this process,
/// so the redirected URL is read from stdin instead.
pub async fn run(config: &ClientConfig, provider: ProviderKind, force: bool) -> ClientResult<()> {
    let oauth = config.oauth_config(provider)?;
    oauth.require_client_id()?;

    let tokens = config.token_manager()?;
    if !force && let Some(existing) = tokens.load(provider).await? {
        println!("Already connected to {provider}{}.", account_suffix(&existing));
        println!("Use --force to reconnect.");
        return Ok(());
    }

    let router = DeepLinkRouter::default();
    let coordinator = AuthorizationCoordinator::new(tokens, router.clone());

    println!("Connecting {provider}...");
    println!();
    println!("A browser window will open for you to grant calendar access.");
    println!("If it does not, open the URL printed below.");
    println!();

    let progress = report_progress(&coordinator);
    let paste = oauth.custom_scheme().map(|scheme| {
        println!("After approving, paste the {scheme}:// URL the browser was sent to:");
        forward_pasted_redirects(router)
    });

    let result = coordinator.connect(&oauth).await;
    progress.abort();
    if let Some(paste) = paste {
        paste.abort();
    }
    let record = result?;

    info!(%provider, "account connected");
    println!();
    println!("Connected to {provider}{}.", account_suffix(&record));
    if record.is_read_only() {
        println!("Access is read-only: notes links are kept locally only.");
    }
    Ok(())
}

fn account_suffix(record: &TokenRecord) -> String {
    record
        .account_email
        .as_deref()
        .map(|email| format!(" as {email}"))
        .unwrap_or_default()
}

fn report_progress(coordinator: &AuthorizationCoordinator) -> JoinHandle<()> {
    let mut states = coordinator.subscribe();
    tokio::spawn(async move {
        while states.changed().await.is_ok() {
            let state = states.borrow_and_update().clone();
            debug!(?state, "authorization state");
            match state {
                FlowState::AwaitingCallback => println!("Waiting for authorization..."),
                FlowState::Exchanging => println!("Exchanging authorization code..."),
                state if state.is_terminal() => break,
                _ => {}
            }
        }
    })
}

/// Hands lines read from stdin to the router until one is accepted.
fn forward_pasted_redirects(router: DeepLinkRouter) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            if router.deliver(line) {
                break;
            }
            eprintln!("That is not the expected redirect URL, try again.");
        }
    })
}
