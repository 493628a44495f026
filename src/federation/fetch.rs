//! Outbound GETs to other servers
//!
//! Every fetch of a remote document goes through the host guard below, so
//! a hostile actor can't point us at loopback or private network services.

use std::net::IpAddr;
use std::time::Instant;

use serde_json::Value;

use crate::error::AppError;
use crate::metrics::{FEDERATION_REQUESTS_TOTAL, FEDERATION_REQUEST_DURATION_SECONDS};

pub const ACTIVITY_JSON: &str = "application/activity+json";
const LD_JSON: &str =
    "application/ld+json; profile=\"https://www.w3.org/ns/activitystreams\"";

fn is_disallowed_ip(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            v4.is_loopback()
                || v4.is_private()
                || v4.is_link_local()
                || v4.is_multicast()
                || v4.is_unspecified()
        }
        IpAddr::V6(v6) => {
            v6.is_loopback()
                || v6.is_unique_local()
                || v6.is_unicast_link_local()
                || v6.is_multicast()
                || v6.is_unspecified()
        }
    }
}

fn is_disallowed_host(host: &str) -> bool {
    let normalized = host.trim_end_matches('.').to_ascii_lowercase();
    if normalized == "localhost" || normalized.ends_with(".localhost") {
        return true;
    }

    normalized
        .trim_start_matches('[')
        .trim_end_matches(']')
        .parse::<IpAddr>()
        .map(is_disallowed_ip)
        .unwrap_or(false)
}

async fn validate_resolved_host_ips(host: &str, port: u16) -> Result<(), AppError> {
    let normalized = host.trim_end_matches('.').to_ascii_lowercase();

    let mut resolved_any = false;
    let lookup = tokio::net::lookup_host((normalized.as_str(), port))
        .await
        .map_err(|e| AppError::Federation(format!("Failed to resolve {}: {}", host, e)))?;

    for addr in lookup {
        resolved_any = true;
        if is_disallowed_ip(addr.ip()) {
            return Err(AppError::Forbidden);
        }
    }

    if !resolved_any {
        return Err(AppError::Federation(format!("No DNS records for {}", host)));
    }

    Ok(())
}

/// Host of a remote http(s) URL, lowercased
///
/// Rejects other schemes, and local or private hosts unless
/// `allow_private` is set.
pub fn remote_host(url: &str, allow_private: bool) -> Result<String, AppError> {
    let without_fragment = url.split('#').next().unwrap_or(url);
    let parsed = url::Url::parse(without_fragment)
        .map_err(|e| AppError::Validation(format!("Invalid remote URL: {}", e)))?;

    match parsed.scheme() {
        "http" | "https" => {}
        scheme => {
            return Err(AppError::Validation(format!(
                "Unsupported URL scheme: {}",
                scheme
            )));
        }
    }

    let host = parsed
        .host_str()
        .ok_or_else(|| AppError::Validation("Missing host in remote URL".to_string()))?
        .to_ascii_lowercase();

    if !allow_private && is_disallowed_host(&host) {
        return Err(AppError::Forbidden);
    }

    Ok(host)
}

/// Check a URL before we make a request to it
pub async fn guard_url(url: &str, allow_private: bool) -> Result<(), AppError> {
    let host = remote_host(url, allow_private)?;
    if allow_private {
        return Ok(());
    }

    let port = url::Url::parse(url.split('#').next().unwrap_or(url))
        .ok()
        .and_then(|u| u.port_or_known_default())
        .ok_or_else(|| AppError::Validation("Missing port in remote URL".to_string()))?;
    validate_resolved_host_ips(&host, port).await
}

/// GET a JSON document with the given Accept header
pub async fn fetch_json(
    client: &reqwest::Client,
    url: &str,
    accept: &str,
    allow_private: bool,
) -> Result<Value, AppError> {
    guard_url(url, allow_private).await?;

    let start = Instant::now();
    let result = client.get(url).header("Accept", accept).send().await;
    FEDERATION_REQUEST_DURATION_SECONDS
        .with_label_values(&["fetch"])
        .observe(start.elapsed().as_secs_f64());

    let response = match result {
        Ok(response) => response,
        Err(e) => {
            FEDERATION_REQUESTS_TOTAL
                .with_label_values(&["fetch", "error"])
                .inc();
            return Err(AppError::Federation(format!("Failed to fetch {}: {}", url, e)));
        }
    };

    if !response.status().is_success() {
        FEDERATION_REQUESTS_TOTAL
            .with_label_values(&["fetch", "error"])
            .inc();
        return Err(AppError::Federation(format!(
            "Failed to fetch {}: HTTP {}",
            url,
            response.status()
        )));
    }

    FEDERATION_REQUESTS_TOTAL
        .with_label_values(&["fetch", "success"])
        .inc();

    response
        .json()
        .await
        .map_err(|e| AppError::Federation(format!("Invalid JSON from {}: {}", url, e)))
}

/// GET an ActivityPub document
pub async fn fetch_activity_json(
    client: &reqwest::Client,
    url: &str,
    allow_private: bool,
) -> Result<Value, AppError> {
    fetch_json(client, url, &format!("{}, {}", ACTIVITY_JSON, LD_JSON), allow_private).await
}
