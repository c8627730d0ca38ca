//! `calsync logout <provider>`: forget a stored token.

use calsync_core::ProviderKind;
use calsync_providers::TokenManager;
use tracing::info;

use crate::config::ClientConfig;
use crate::error::ClientResult;

/// Removes the token for `provider`. Calendar selections and notes links
/// are kept so reconnecting restores the previous state.
pub async fn run(config: &ClientConfig, provider: ProviderKind) -> ClientResult<()> {
    let tokens = config.token_manager()?;
    if forget(&tokens, provider).await? {
        info!(%provider, "token removed");
        println!("Disconnected {provider}.");
    } else {
        println!("{provider} was not connected.");
    }
    Ok(())
}

async fn forget(tokens: &TokenManager, provider: ProviderKind) -> ClientResult<bool> {
    if tokens.load(provider).await?.is_none() {
        return Ok(false);
    }
    tokens.remove(provider).await?;
    Ok(true)
}
