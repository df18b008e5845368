//! Purchase engine spawn utilities.
use crate::{
    chain::{ChainApi, RpcChain},
    cli::Args,
    config::PurchaseConfig,
    orchestrator::PurchaseOrchestrator,
    price::{PriceOracle, PriceOracleConfig},
    service::{PurchaseHandle, PurchaseService},
};
use alloy::{
    providers::{Provider, ProviderBuilder},
    rpc::client::ClientBuilder,
    signers::local::PrivateKeySigner,
    transports::layers::RetryBackoffLayer,
};
use eyre::OptionExt;
use std::{path::Path, sync::Arc};
use tokio::task::JoinHandle;
use tracing::info;

/// [`RetryBackoffLayer`] used for the chain provider.
///
/// We are allowing max 10 retries with a backoff of 800ms. The CU/s is set to max value to avoid
/// any throttling.
pub const RETRY_LAYER: RetryBackoffLayer = RetryBackoffLayer::new(10, 800, u64::MAX);

/// Context returned once the purchase engine is launched.
///
/// Dropping it stops the service and the price feed.
#[derive(Debug)]
pub struct PurchaseEngine {
    /// Handle to the purchase service.
    handle: PurchaseHandle,
    /// The service task.
    service: JoinHandle<()>,
    /// The price feed task, if a feed is configured.
    feed: Option<JoinHandle<()>>,
}

impl PurchaseEngine {
    /// Returns a handle to the purchase service.
    pub fn handle(&self) -> PurchaseHandle {
        self.handle.clone()
    }
}

impl Drop for PurchaseEngine {
    fn drop(&mut self) {
        self.service.abort();
        if let Some(feed) = &self.feed {
            feed.abort();
        }
    }
}

/// Attempts to spawn the purchase engine using CLI arguments and a configuration file.
///
/// A missing configuration file is created from the defaults and the CLI values.
pub async fn try_spawn_with_args<P: AsRef<Path>>(
    args: Args,
    config_path: P,
) -> eyre::Result<PurchaseEngine> {
    let config = if !config_path.as_ref().exists() {
        let config = args.merge_purchase_config(PurchaseConfig::default());
        config.save_to_file(&config_path)?;
        config
    } else {
        // File exists: load and override with CLI values.
        args.merge_purchase_config(PurchaseConfig::load_from_file(&config_path)?)
    };

    try_spawn(config).await
}

/// Spawns the purchase engine against the configured RPC endpoint.
pub async fn try_spawn(config: PurchaseConfig) -> eyre::Result<PurchaseEngine> {
    let signer: PrivateKeySigner = config
        .secrets
        .private_key
        .as_deref()
        .ok_or_eyre("a private key is required to sign transactions")?
        .parse()?;
    let account = signer.address();

    let endpoint = config.chain.endpoint.clone().ok_or_eyre("an RPC endpoint is required")?;
    let client = ClientBuilder::default().layer(RETRY_LAYER).http(endpoint);
    let provider = ProviderBuilder::new().wallet(signer).connect_client(client).erased();

    let chain_id = provider.get_chain_id().await?;
    info!(
        %account,
        chain_id,
        required_chain_id = config.chain.required_chain_id,
        sale = %config.sale.contract,
        "Connected to chain"
    );

    let chain = RpcChain::new(provider, account, config.sale.contract);
    Ok(spawn_with_chain(config, Arc::new(chain)))
}

/// Spawns the purchase engine on top of an arbitrary [`ChainApi`].
pub fn spawn_with_chain(config: PurchaseConfig, chain: Arc<dyn ChainApi>) -> PurchaseEngine {
    let oracle = PriceOracle::new(PriceOracleConfig {
        rate_ttl: config.pricefeed.rate_ttl,
        fallback_price: config.pricefeed.fallback_price,
    });

    let (oracle, feed) = match (config.pricefeed.constant_rate, &config.pricefeed.url) {
        (Some(rate), _) => (oracle.with_constant_rate(rate), None),
        (None, Some(url)) => {
            let feed = oracle.spawn_feed(url.clone(), config.pricefeed.refresh_interval);
            (oracle, Some(feed))
        }
        (None, None) => {
            info!(price = config.pricefeed.fallback_price, "No price feed configured");
            (oracle, None)
        }
    };

    let (orchestrator, events_rx) = PurchaseOrchestrator::new(&config, chain, oracle);
    let (handle, service) =
        PurchaseService::spawn(orchestrator, events_rx, config.allowance.refresh_interval);

    PurchaseEngine { handle, service, feed }
}
