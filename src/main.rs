use alloy::primitives::Address;
use dotenvy::dotenv;
use eyre::WrapErr;
use std::sync::Arc;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;
use uniswapish_gateway::config::{self, config_path};
use uniswapish_gateway::math::parse_amount;
use uniswapish_gateway::{
    EvmChain, NetworkSelectionRequest, Uniswapish, V2Connector, V3Connector,
};

fn env_var(key: &str) -> eyre::Result<String> {
    std::env::var(key).map_err(|_| eyre::eyre!("{} must be set", key))
}

fn env_address(key: &str) -> eyre::Result<Address> {
    env_var(key)?
        .parse()
        .wrap_err_with(|| format!("{} is not an address", key))
}

#[tokio::main]
async fn main() -> eyre::Result<()> {
    // Initialize logging
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    dotenv().ok();

    let path = config_path("GATEWAY_CONFIG", "gateway.json");
    let gateway = config::load_gateway_config(&path.to_string_lossy())?;

    let request = NetworkSelectionRequest {
        connector: Some(std::env::var("CONNECTOR").unwrap_or_else(|_| "uniswap".to_string())),
        chain: env_var("CHAIN")?,
        network: env_var("NETWORK")?,
    };
    let selection = gateway.resolve(&request)?;
    let (connector_config, contracts) = selection
        .connector
        .ok_or_else(|| eyre::eyre!("no connector selected"))?;

    info!(
        "Quoting on {} {}/{}",
        connector_config.name, request.chain, request.network
    );

    let spenders = gateway.spenders(&request.chain, &request.network);
    let chain = Arc::new(EvmChain::new(&selection.network, spenders)?);
    let connector: Arc<dyn Uniswapish> = if connector_config.protocol.is_v2_family() {
        Arc::new(V2Connector::new(
            chain,
            &selection.network,
            connector_config,
            contracts,
        ))
    } else {
        Arc::new(V3Connector::new(
            chain,
            &selection.network,
            connector_config,
            contracts,
        )?)
    };
    connector.init().await?;

    let base = connector.get_token_by_address(env_address("BASE")?)?;
    let quote = connector.get_token_by_address(env_address("QUOTE")?)?;
    let amount = parse_amount(&env_var("AMOUNT")?, base.decimals())?;

    let expected = connector
        .estimate_sell_trade(&base, &quote, amount, None)
        .await?;
    info!("{}", serde_json::to_string_pretty(&expected)?);

    Ok(())
}
