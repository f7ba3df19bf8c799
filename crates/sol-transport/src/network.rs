const MAINNET_RPC: &str = "https://api.mainnet-beta.solana.com";
const TESTNET_RPC: &str = "https://api.testnet.solana.com";
const DEVNET_RPC: &str = "https://api.devnet.solana.com";
const LOCALNET_RPC: &str = "http://127.0.0.1:8899";

const EXPLORER: &str = "https://explorer.solana.com";

/// Name reported for the in-process chain.
pub const LOCAL_NETWORK: &str = "local";

pub fn infer_network_from_url(url: &str) -> Option<&'static str> {
    let lower = url.to_lowercase();
    if lower.contains("testnet") {
        Some("testnet")
    } else if lower.contains("devnet") {
        Some("devnet")
    } else if lower.contains("mainnet") {
        Some("mainnet-beta")
    } else if lower.contains("127.0.0.1") || lower.contains("localhost") {
        Some("localnet")
    } else {
        None
    }
}

pub fn infer_network(rpc_url: &str) -> String {
    infer_network_from_url(rpc_url)
        .unwrap_or("devnet")
        .to_string()
}

pub fn default_rpc_endpoint(network: &str) -> String {
    match network {
        "mainnet" | "mainnet-beta" => MAINNET_RPC.to_string(),
        "testnet" => TESTNET_RPC.to_string(),
        "localnet" => LOCALNET_RPC.to_string(),
        _ => DEVNET_RPC.to_string(),
    }
}

fn cluster_query(network: &str) -> Option<String> {
    match network {
        "mainnet" | "mainnet-beta" => Some(String::new()),
        "testnet" | "devnet" => Some(format!("?cluster={network}")),
        "localnet" => Some("?cluster=custom&customUrl=http%3A%2F%2F127.0.0.1%3A8899".to_string()),
        _ => None,
    }
}

/// Explorer link for an account, or `None` when the network has no explorer
/// (the in-process chain, unknown custom clusters).
pub fn explorer_address_url(network: &str, address: &str) -> Option<String> {
    cluster_query(network).map(|q| format!("{EXPLORER}/address/{address}{q}"))
}

pub fn explorer_tx_url(network: &str, signature: &str) -> Option<String> {
    cluster_query(network).map(|q| format!("{EXPLORER}/tx/{signature}{q}"))
}
