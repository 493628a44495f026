//! WebFinger
//!
//! Maps `user@domain` addresses to ActivityPub actor URIs, both for our own
//! users (the JRD we serve) and for remote users we look up.

use serde::{Deserialize, Serialize};

use super::fetch::{ACTIVITY_JSON, fetch_json};
use crate::error::AppError;

/// WebFinger JRD response
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WebFingerResponse {
    pub subject: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aliases: Option<Vec<String>>,
    #[serde(default)]
    pub links: Vec<WebFingerLink>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WebFingerLink {
    pub rel: String,
    #[serde(rename = "type")]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub href: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template: Option<String>,
}

impl WebFingerResponse {
    /// The `rel=self` ActivityPub link
    pub fn actor_uri(&self) -> Option<&str> {
        self.links
            .iter()
            .find(|link| {
                link.rel == "self"
                    && link.link_type.as_deref().is_none_or(|t| {
                        t.starts_with("application/activity+json")
                            || t.starts_with("application/ld+json")
                    })
            })
            .and_then(|link| link.href.as_deref())
    }
}

/// JRD for a local user
pub fn generate_webfinger_response(
    localname: &str,
    domain: &str,
    actor_uri: &str,
) -> WebFingerResponse {
    WebFingerResponse {
        subject: format!("acct:{}@{}", localname, domain),
        aliases: Some(vec![actor_uri.to_string()]),
        links: vec![
            WebFingerLink {
                rel: "self".to_string(),
                link_type: Some(ACTIVITY_JSON.to_string()),
                href: Some(actor_uri.to_string()),
                template: None,
            },
            WebFingerLink {
                rel: "http://webfinger.net/rel/profile-page".to_string(),
                link_type: Some("text/html".to_string()),
                href: Some(actor_uri.to_string()),
                template: None,
            },
        ],
    }
}

/// Split `user@domain` (leading `@` and `acct:` allowed)
pub fn parse_address(address: &str) -> Option<(String, String)> {
    let trimmed = address.trim();
    let trimmed = trimmed.strip_prefix("acct:").unwrap_or(trimmed);
    let trimmed = trimmed.strip_prefix('@').unwrap_or(trimmed);
    let (user, domain) = trimmed.split_once('@')?;

    if user.is_empty() || domain.is_empty() || domain.contains('@') || domain.contains('/') {
        return None;
    }

    Some((user.to_string(), domain.to_ascii_lowercase()))
}

/// Look up a remote address and return its actor URI
pub async fn resolve_webfinger(
    client: &reqwest::Client,
    scheme: &str,
    address: &str,
    allow_private: bool,
) -> Result<String, AppError> {
    let (user, domain) = parse_address(address)
        .ok_or_else(|| AppError::Validation(format!("Not a user@domain address: {}", address)))?;

    let url = format!(
        "{}://{}/.well-known/webfinger?resource={}",
        scheme,
        domain,
        urlencoding::encode(&format!("acct:{}@{}", user, domain))
    );

    let body = fetch_json(client, &url, "application/jrd+json, application/json", allow_private)
        .await?;
    let response: WebFingerResponse = serde_json::from_value(body)
        .map_err(|e| AppError::Federation(format!("Invalid webfinger response: {}", e)))?;

    response
        .actor_uri()
        .map(str::to_string)
        .ok_or_else(|| AppError::Federation(format!("No self link for {}", address)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_response_links_to_actor() {
        let response = generate_webfinger_response(
            "mouse",
            "local.com",
            "https://local.com/user/mouse",
        );
        assert_eq!(response.subject, "acct:mouse@local.com");
        assert_eq!(response.actor_uri(), Some("https://local.com/user/mouse"));
    }

    #[test]
    fn parse_address_strips_prefixes() {
        assert_eq!(
            parse_address("@rat@Remote.com"),
            Some(("rat".to_string(), "remote.com".to_string()))
        );
        assert_eq!(
            parse_address("acct:rat@remote.com"),
            Some(("rat".to_string(), "remote.com".to_string()))
        );
    }

    #[test]
    fn parse_address_rejects_bare_names() {
        assert_eq!(parse_address("rat"), None);
        assert_eq!(parse_address("rat@"), None);
        assert_eq!(parse_address("@remote.com"), None);
        assert_eq!(parse_address("a@b@c"), None);
    }

    #[test]
    fn actor_uri_ignores_html_self_links() {
        let response: WebFingerResponse = serde_json::from_value(serde_json::json!({
            "subject": "acct:rat@remote.com",
            "links": [
                {"rel": "self", "type": "text/html", "href": "https://remote.com/@rat"},
                {"rel": "self", "type": "application/activity+json", "href": "https://remote.com/user/rat"}
            ]
        }))
        .unwrap();
        assert_eq!(response.actor_uri(), Some("https://remote.com/user/rat"));
    }
}
