use crate::types::{NetworkSelectionRequest, Protocol, Token};
use alloy::primitives::Address;
use eyre::{Result, WrapErr};
use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;

/// Format of each network entry in the gateway config (camelCase).
#[derive(serde::Deserialize)]
struct NetworkEntry {
    #[serde(rename = "chainId")]
    chain_id: u64,
    #[serde(rename = "nodeURL", default)]
    node_url: String,
    #[serde(rename = "tokenListType", default = "default_token_list_type")]
    token_list_type: String,
    #[serde(rename = "tokenListSource")]
    token_list_source: String,
    #[serde(rename = "gasPrice")]
    gas_price: Option<f64>,
}

fn default_token_list_type() -> String {
    "FILE".to_string()
}

/// Format of each chain entry: shared settings plus its networks.
#[derive(serde::Deserialize)]
struct ChainEntry {
    #[serde(rename = "nativeCurrencySymbol")]
    native_currency_symbol: String,
    #[serde(rename = "gasPrice", default)]
    gas_price: f64,
    networks: HashMap<String, NetworkEntry>,
}

#[derive(serde::Deserialize)]
struct ContractsEntry {
    router: String,
    factory: String,
    quoter: Option<String>,
    #[serde(rename = "nftManager")]
    nft_manager: Option<String>,
}

/// Format of each connector entry (camelCase).
#[derive(serde::Deserialize)]
struct ConnectorEntry {
    protocol: Protocol,
    #[serde(rename = "allowedSlippage")]
    allowed_slippage: String,
    #[serde(rename = "gasLimitEstimate")]
    gas_limit_estimate: u64,
    ttl: u64,
    #[serde(rename = "feeBps", default = "default_fee_bps")]
    fee_bps: u32,
    #[serde(rename = "feeTiers", default = "default_fee_tiers")]
    fee_tiers: Vec<u32>,
    /// chain -> network -> addresses
    contracts: HashMap<String, HashMap<String, ContractsEntry>>,
}

fn default_fee_bps() -> u32 {
    30
}

fn default_fee_tiers() -> Vec<u32> {
    vec![100, 500, 3000, 10000]
}

/// Root format: { "chains": { "ethereum": {...} }, "connectors": { "uniswap": {...} } }
#[derive(serde::Deserialize)]
struct GatewayFile {
    chains: HashMap<String, ChainEntry>,
    connectors: HashMap<String, ConnectorEntry>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TokenListSource {
    File(PathBuf),
    Url(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct NetworkConfig {
    pub chain: String,
    pub network: String,
    pub chain_id: u64,
    pub node_url: String,
    pub native_currency_symbol: String,
    /// Gas price in gwei.
    pub gas_price: f64,
    pub token_list: TokenListSource,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectorContracts {
    pub router: Address,
    pub factory: Address,
    pub quoter: Option<Address>,
    pub nft_manager: Option<Address>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConnectorConfig {
    pub name: String,
    pub protocol: Protocol,
    pub allowed_slippage: String,
    pub gas_limit: u64,
    /// Seconds a quoted trade stays valid.
    pub ttl: u64,
    /// Pair fee of v2-family protocols.
    pub fee_bps: u32,
    /// Fee tiers a v3 connector searches when quoting.
    pub fee_tiers: Vec<u32>,
    pub contracts: HashMap<(String, String), ConnectorContracts>,
}

impl ConnectorConfig {
    pub fn contracts_for(&self, chain: &str, network: &str) -> Result<ConnectorContracts> {
        self.contracts
            .get(&(chain.to_string(), network.to_string()))
            .copied()
            .ok_or_else(|| {
                eyre::eyre!(
                    "connector {} is not available on {}/{}",
                    self.name,
                    chain,
                    network
                )
            })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct GatewayConfig {
    pub networks: HashMap<(String, String), NetworkConfig>,
    pub connectors: HashMap<String, ConnectorConfig>,
}

/// Network and (optionally) connector settings picked by a
/// `NetworkSelectionRequest`.
#[derive(Debug, Clone)]
pub struct Selection {
    pub network: NetworkConfig,
    pub connector: Option<(ConnectorConfig, ConnectorContracts)>,
}

impl GatewayConfig {
    pub fn network(&self, chain: &str, network: &str) -> Result<&NetworkConfig> {
        self.networks
            .get(&(chain.to_string(), network.to_string()))
            .ok_or_else(|| eyre::eyre!("network {}/{} is not configured", chain, network))
    }

    pub fn resolve(&self, request: &NetworkSelectionRequest) -> Result<Selection> {
        let network = self.network(&request.chain, &request.network)?.clone();
        let connector = match &request.connector {
            None => None,
            Some(name) => {
                let config = self
                    .connectors
                    .get(name)
                    .ok_or_else(|| eyre::eyre!("connector {} is not configured", name))?;
                let contracts = config.contracts_for(&request.chain, &request.network)?;
                Some((config.clone(), contracts))
            }
        };
        Ok(Selection { network, connector })
    }

    /// Spender addresses on a network: `<connector>` -> router and
    /// `<connector>LP` -> position manager.
    pub fn spenders(&self, chain: &str, network: &str) -> HashMap<String, Address> {
        let mut out = HashMap::new();
        for (name, connector) in &self.connectors {
            if let Ok(contracts) = connector.contracts_for(chain, network) {
                out.insert(name.clone(), contracts.router);
                if let Some(manager) = contracts.nft_manager {
                    out.insert(format!("{}LP", name), manager);
                }
            }
        }
        out
    }
}

fn parse_address(raw: &str, what: &str) -> Result<Address> {
    raw.parse()
        .wrap_err_with(|| format!("invalid {} address {:?}", what, raw))
}

/// Parse the gateway config. Networks with an empty `nodeURL` fall back to
/// the `RPC_URL` environment variable.
pub fn parse_gateway_config(content: &str) -> Result<GatewayConfig> {
    let file: GatewayFile = serde_json::from_str(content)?;
    let rpc_url = std::env::var("RPC_URL").unwrap_or_default();

    let mut networks = HashMap::new();
    for (chain, entry) in file.chains {
        for (network, net) in entry.networks {
            let node_url = if net.node_url.is_empty() {
                if rpc_url.is_empty() {
                    tracing::warn!("{}/{} has no nodeURL and RPC_URL is not set", chain, network);
                }
                rpc_url.clone()
            } else {
                net.node_url
            };
            let token_list = match net.token_list_type.to_ascii_uppercase().as_str() {
                "URL" => TokenListSource::Url(net.token_list_source),
                _ => TokenListSource::File(PathBuf::from(net.token_list_source)),
            };
            networks.insert(
                (chain.clone(), network.clone()),
                NetworkConfig {
                    chain: chain.clone(),
                    network,
                    chain_id: net.chain_id,
                    node_url,
                    native_currency_symbol: entry.native_currency_symbol.clone(),
                    gas_price: net.gas_price.unwrap_or(entry.gas_price),
                    token_list,
                },
            );
        }
    }

    let mut connectors = HashMap::new();
    for (name, entry) in file.connectors {
        let mut contracts = HashMap::new();
        for (chain, by_network) in entry.contracts {
            for (network, c) in by_network {
                let quoter = c.quoter.as_deref().map(|q| parse_address(q, "quoter")).transpose()?;
                let nft_manager = c
                    .nft_manager
                    .as_deref()
                    .map(|m| parse_address(m, "nftManager"))
                    .transpose()?;
                contracts.insert(
                    (chain.clone(), network),
                    ConnectorContracts {
                        router: parse_address(&c.router, "router")?,
                        factory: parse_address(&c.factory, "factory")?,
                        quoter,
                        nft_manager,
                    },
                );
            }
        }
        connectors.insert(
            name.clone(),
            ConnectorConfig {
                name,
                protocol: entry.protocol,
                allowed_slippage: entry.allowed_slippage,
                gas_limit: entry.gas_limit_estimate,
                ttl: entry.ttl,
                fee_bps: entry.fee_bps,
                fee_tiers: entry.fee_tiers,
                contracts,
            },
        );
    }

    Ok(GatewayConfig {
        networks,
        connectors,
    })
}

pub fn load_gateway_config(path: &str) -> Result<GatewayConfig> {
    let content =
        fs::read_to_string(path).wrap_err_with(|| format!("reading gateway config {}", path))?;
    parse_gateway_config(&content)
}

/// Root format of a token list: { "tokens": [ { chainId, address, symbol, name, decimals } ] }
#[derive(serde::Deserialize)]
struct TokenListFile {
    tokens: Vec<Token>,
}

/// Load a token list and keep the entries for `chain_id`.
pub async fn load_token_list(source: &TokenListSource, chain_id: u64) -> Result<Vec<Token>> {
    let file: TokenListFile = match source {
        TokenListSource::File(path) => {
            let content = fs::read_to_string(path)
                .wrap_err_with(|| format!("reading token list {}", path.display()))?;
            serde_json::from_str(&content)?
        }
        TokenListSource::Url(url) => reqwest::get(url).await?.error_for_status()?.json().await?,
    };
    Ok(file
        .tokens
        .into_iter()
        .filter(|t| t.chain_id == chain_id)
        .collect())
}

/// Path from `env_key`, or `default` relative to the current directory.
pub fn config_path(env_key: &str, default: &str) -> PathBuf {
    std::env::var(env_key)
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            std::env::current_dir()
                .map(|dir| dir.join(default))
                .unwrap_or_else(|_| PathBuf::from(default))
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::address;

    const SAMPLE: &str = r#"{
        "chains": {
            "avalanche": {
                "nativeCurrencySymbol": "AVAX",
                "gasPrice": 25,
                "networks": {
                    "fuji": {
                        "chainId": 43113,
                        "nodeURL": "https://api.avax-test.network/ext/bc/C/rpc",
                        "tokenListType": "FILE",
                        "tokenListSource": "lists/fuji.json"
                    }
                }
            },
            "ethereum": {
                "nativeCurrencySymbol": "ETH",
                "gasPrice": 30,
                "networks": {
                    "mainnet": {
                        "chainId": 1,
                        "nodeURL": "https://eth.example",
                        "tokenListType": "URL",
                        "tokenListSource": "https://tokens.example/list.json",
                        "gasPrice": 12.5
                    }
                }
            }
        },
        "connectors": {
            "pangolin": {
                "protocol": "Pangolin",
                "allowedSlippage": "1/100",
                "gasLimitEstimate": 150688,
                "ttl": 300,
                "contracts": {
                    "avalanche": {
                        "fuji": {
                            "router": "0x2D99ABD9008Dc933ff5c0CD271B88309593aB921",
                            "factory": "0xE4A575550C2b460d2307b82dCd7aFe84AD1484dd"
                        }
                    }
                }
            },
            "uniswap": {
                "protocol": "UniswapV3",
                "allowedSlippage": "2/100",
                "gasLimitEstimate": 300000,
                "ttl": 600,
                "feeTiers": [500, 3000],
                "contracts": {
                    "ethereum": {
                        "mainnet": {
                            "router": "0xE592427A0AEce92De3Edee1F18E0157C05861564",
                            "factory": "0x1F98431c8aD98523631AE4a59f267346ea31F984",
                            "quoter": "0xb27308f9F90D607463bb33eA1BeBb41C27CE5AB6",
                            "nftManager": "0xC36442b4a4522E871399CD717aBDD847Ab11FE88"
                        }
                    }
                }
            }
        }
    }"#;

    #[test]
    fn test_parse_gateway_config() {
        let config = parse_gateway_config(SAMPLE).unwrap();
        let fuji = config.network("avalanche", "fuji").unwrap();
        assert_eq!(fuji.chain_id, 43113);
        assert_eq!(fuji.gas_price, 25.0);
        assert_eq!(fuji.native_currency_symbol, "AVAX");
        assert_eq!(fuji.token_list, TokenListSource::File(PathBuf::from("lists/fuji.json")));

        let mainnet = config.network("ethereum", "mainnet").unwrap();
        assert_eq!(mainnet.gas_price, 12.5);
        assert!(matches!(mainnet.token_list, TokenListSource::Url(_)));

        let pangolin = &config.connectors["pangolin"];
        assert_eq!(pangolin.protocol, Protocol::Pangolin);
        assert_eq!(pangolin.fee_bps, 30);
        assert_eq!(pangolin.fee_tiers, vec![100, 500, 3000, 10000]);
        assert_eq!(config.connectors["uniswap"].fee_tiers, vec![500, 3000]);
    }

    #[test]
    fn test_resolve_network_selection() {
        let config = parse_gateway_config(SAMPLE).unwrap();
        let selection = config
            .resolve(&NetworkSelectionRequest {
                connector: Some("pangolin".to_string()),
                chain: "avalanche".to_string(),
                network: "fuji".to_string(),
            })
            .unwrap();
        let (connector, contracts) = selection.connector.unwrap();
        assert_eq!(connector.name, "pangolin");
        assert_eq!(
            contracts.router,
            address!("2D99ABD9008Dc933ff5c0CD271B88309593aB921")
        );

        let no_connector = config
            .resolve(&NetworkSelectionRequest {
                connector: None,
                chain: "ethereum".to_string(),
                network: "mainnet".to_string(),
            })
            .unwrap();
        assert!(no_connector.connector.is_none());

        // pangolin is not deployed on ethereum in this config
        assert!(config
            .resolve(&NetworkSelectionRequest {
                connector: Some("pangolin".to_string()),
                chain: "ethereum".to_string(),
                network: "mainnet".to_string(),
            })
            .is_err());
    }

    #[test]
    fn test_spenders() {
        let config = parse_gateway_config(SAMPLE).unwrap();
        let spenders = config.spenders("ethereum", "mainnet");
        assert_eq!(
            spenders["uniswap"],
            address!("E592427A0AEce92De3Edee1F18E0157C05861564")
        );
        assert_eq!(
            spenders["uniswapLP"],
            address!("C36442b4a4522E871399CD717aBDD847Ab11FE88")
        );
        assert!(!spenders.contains_key("pangolin"));
    }

    #[tokio::test]
    async fn test_load_token_list_filters_chain() {
        let dir = std::env::temp_dir().join(format!("uniswapish-tokens-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join("tokens.json");
        fs::write(
            &path,
            r#"{"name":"test","tokens":[
                {"chainId":43113,"address":"0xd00ae08403B9bbb9124bB305C09058E32C39A48c","symbol":"WAVAX","name":"Wrapped AVAX","decimals":18},
                {"chainId":1,"address":"0xC02aaA39b223FE8D0A0e5C4F27eAD9083C756Cc2","symbol":"WETH","name":"Wrapped Ether","decimals":18}
            ]}"#,
        )
        .unwrap();
        let tokens = load_token_list(&TokenListSource::File(path), 43113).await.unwrap();
        assert_eq!(tokens.len(), 1);
        assert_eq!(tokens[0].symbol, "WAVAX");
    }

    #[test]
    fn test_missing_network_is_an_error() {
        let config = parse_gateway_config(SAMPLE).unwrap();
        assert!(config.network("harmony", "mainnet").is_err());
    }
}
