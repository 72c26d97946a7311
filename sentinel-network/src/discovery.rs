//! Node discovery (C5, §4.5): periodically fetch a candidate list from an
//! HTTP directory, enrich it with geolocation, and push the filtered result
//! into the [`Pool`].

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use sentinel_store::GeoInfo;
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::constants::{
    DISCOVERY_BACKOFF_UNIT, DISCOVERY_GEOLOCATE_BATCH, DISCOVERY_GEOLOCATE_CAP, DISCOVERY_MAX_RETRIES,
};
use crate::pool::{PeerEndpoint, Pool};

#[derive(Debug, thiserror::Error)]
pub enum DiscoveryError {
    #[error("node directory request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("node directory returned status {0}")]
    UnexpectedStatus(reqwest::StatusCode),
    #[error("node directory exhausted {0} retries against repeated rate-limiting")]
    RateLimited(u32),
}

#[derive(Debug, Deserialize)]
struct NodeDirectoryResponse {
    nodes: HashMap<String, serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct GeoEntry {
    status: String,
    query: String,
    #[serde(rename = "countryCode")]
    country_code: Option<String>,
    city: Option<String>,
    lat: Option<f64>,
    lon: Option<f64>,
    org: Option<String>,
    #[serde(rename = "as")]
    asn: Option<String>,
}


/// Fetches the directory's candidate map, retrying on HTTP 429 with linear
/// backoff (30 s × attempt, up to 3 attempts per §4.5). Any other non-200
/// response aborts the cycle without touching the pool.
async fn fetch_node_directory(client: &reqwest::Client, url: &str) -> Result<HashMap<String, serde_json::Value>, DiscoveryError> {
    for attempt in 1..=DISCOVERY_MAX_RETRIES {
        let response = client.get(url).send().await?;
        match response.status() {
            status if status.is_success() => {
                let body: NodeDirectoryResponse = response.json().await?;
                return Ok(body.nodes);
            }
            reqwest::StatusCode::TOO_MANY_REQUESTS => {
                warn!(attempt, "node directory rate-limited, backing off");
                tokio::time::sleep(DISCOVERY_BACKOFF_UNIT * attempt).await;
            }
            status => return Err(DiscoveryError::UnexpectedStatus(status)),
        }
    }
    Err(DiscoveryError::RateLimited(DISCOVERY_MAX_RETRIES))
}

/// Parses directory keys, keeping only those that resolve to an IPv4 socket
/// address (§4.5 rule 1 — IPv6 and onion forms are ignored).
fn parse_ipv4_candidates(nodes: &HashMap<String, serde_json::Value>) -> Vec<SocketAddr> {
    nodes
        .keys()
        .filter_map(|key| key.parse::<SocketAddr>().ok())
        .filter(|addr| addr.is_ipv4())
        .collect()
}

/// Geolocates up to `DISCOVERY_GEOLOCATE_BATCH` IPs per POST, keyed by the
/// original address string (§6 "successful entries are keyed by the
/// original IP").
async fn geolocate_batch(client: &reqwest::Client, url: &str, ips: &[IpAddr]) -> Result<HashMap<IpAddr, GeoInfo>, DiscoveryError> {
    let queries: Vec<String> = ips.iter().map(IpAddr::to_string).collect();
    let response = client.post(url).json(&queries).send().await?;
    if !response.status().is_success() {
        return Err(DiscoveryError::UnexpectedStatus(response.status()));
    }
    let entries: Vec<GeoEntry> = response.json().await?;

    let mut results = HashMap::new();
    for entry in entries {
        if entry.status != "success" {
            continue;
        }
        let Ok(ip) = entry.query.parse::<IpAddr>() else {
            continue;
        };
        let (Some(country_code), Some(lat), Some(lon)) = (entry.country_code, entry.lat, entry.lon) else {
            continue;
        };
        results.insert(
            ip,
            GeoInfo {
                country_code,
                city: entry.city,
                latitude: lat,
                longitude: lon,
                // The directory's "as" field is a free-text string
                // ("AS15169 Google LLC"), not a numeric id; kept in
                // `organization` rather than parsed.
                asn: None,
                organization: entry.org.or(entry.asn),
            },
        );
    }
    Ok(results)
}

/// Runs one full discovery cycle (§4.5 steps 1-4) and, on success, replaces
/// the pool's candidate lists for every populated target region.
pub async fn run_discovery_cycle(config: &Config, pool: &Pool, client: &reqwest::Client) -> Result<(), DiscoveryError> {
    let nodes = fetch_node_directory(client, &config.node_directory_url).await?;
    let mut candidates = parse_ipv4_candidates(&nodes);
    candidates.truncate(DISCOVERY_GEOLOCATE_CAP);

    debug!(count = candidates.len(), "fetched ipv4 discovery candidates");

    let mut geo: HashMap<IpAddr, GeoInfo> = HashMap::new();
    for chunk in candidates.chunks(DISCOVERY_GEOLOCATE_BATCH) {
        let ips: Vec<IpAddr> = chunk.iter().map(|addr| addr.ip()).collect();
        match geolocate_batch(client, &config.geolocation_url, &ips).await {
            Ok(batch) => geo.extend(batch),
            Err(error) => warn!(%error, "geolocation batch failed, continuing with partial results"),
        }
        tokio::time::sleep(crate::constants::DISCOVERY_BATCH_PAUSE).await;
    }

    let mut per_region: HashMap<String, Vec<PeerEndpoint>> = HashMap::new();
    for addr in candidates {
        let Some(located) = geo.get(&addr.ip()) else {
            continue;
        };
        if !config.target_countries.contains(&located.country_code) {
            continue;
        }
        let region = per_region.entry(located.country_code.clone()).or_default();
        if region.len() < config.per_country_cap {
            region.push(PeerEndpoint {
                addr,
                geo: located.clone(),
            });
        }
    }

    let populated_regions = per_region.len();
    for (region, list) in per_region {
        debug!(region = %region, count = list.len(), "refreshing pool candidates for region");
        pool.set_candidates(&region, list);
    }
    info!(regions = populated_regions, "discovery cycle complete");
    Ok(())
}

/// Runs [`run_discovery_cycle`] once at startup, then every
/// [`Config::discovery_interval`] until `cancelled` fires (§4.8).
pub async fn run_discovery_loop(config: &Config, pool: &Pool, client: reqwest::Client, cancelled: tokio_util::sync::CancellationToken) {
    if let Err(error) = run_discovery_cycle(config, pool, &client).await {
        warn!(%error, "initial discovery cycle failed, candidate pool left unchanged");
    }

    let mut ticker = tokio::time::interval(config.discovery_interval());
    ticker.tick().await; // first tick fires immediately; already ran above
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if let Err(error) = run_discovery_cycle(config, pool, &client).await {
                    warn!(%error, "discovery cycle failed, candidate pool left unchanged");
                }
            }
            _ = cancelled.cancelled() => return,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_ipv4_candidates_skips_non_ipv4() {
        let mut nodes = HashMap::new();
        nodes.insert("127.0.0.1:8333".to_string(), serde_json::json!([]));
        nodes.insert("[::1]:8333".to_string(), serde_json::json!([]));
        nodes.insert("not-an-address".to_string(), serde_json::json!([]));

        let candidates = parse_ipv4_candidates(&nodes);
        assert_eq!(candidates.len(), 1);
        assert!(candidates[0].is_ipv4());
    }

    #[tokio::test]
    async fn geolocate_batch_skips_failed_entries() {
        use wiremock::matchers::{method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/geo"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(
                r#"[
                    {"status":"success","query":"1.2.3.4","countryCode":"US","city":"Ashburn","lat":39.0,"lon":-77.5,"org":"Example"},
                    {"status":"fail","query":"5.6.7.8"}
                ]"#,
                "application/json",
            ))
            .mount(&server)
            .await;

        let client = reqwest::Client::new();
        let url = format!("{}/geo", server.uri());
        let ips = vec!["1.2.3.4".parse().unwrap(), "5.6.7.8".parse().unwrap()];
        let results = geolocate_batch(&client, &url, &ips).await.unwrap();

        assert_eq!(results.len(), 1);
        assert_eq!(results[&"1.2.3.4".parse::<IpAddr>().unwrap()].country_code, "US");
    }
}
