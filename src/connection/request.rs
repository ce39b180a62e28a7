//! WebSocket URL and handshake headers for the pull server.

use serde::{Deserialize, Serialize};

use crate::auth::SessionCredentials;
use crate::protocol::constants::{CONNECTION_MODE, PROTOCOL_VERSION, SUBPROTOCOL, WIRE_FORMAT};
use crate::subscription::SubscriptionRegistry;

/// Connection parameters handed to [`ConnectionManager::start`](super::ConnectionManager::start).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionParams {
    /// `ws://` or `wss://` base URL, without the query string
    pub endpoint: String,
    pub origin: String,
    pub user_id: i64,
    pub site_id: String,
    /// Defaults to the local machine's hostname
    pub hostname: Option<String>,
    /// Unix seconds; defaults to the time of each connect attempt
    pub timestamp: Option<i64>,
}

impl ConnectionParams {
    pub fn new(
        endpoint: impl Into<String>,
        origin: impl Into<String>,
        user_id: i64,
        site_id: impl Into<String>,
    ) -> Self {
        Self {
            endpoint: endpoint.into(),
            origin: origin.into(),
            user_id,
            site_id: site_id.into(),
            hostname: None,
            timestamp: None,
        }
    }

    pub fn with_hostname(mut self, hostname: impl Into<String>) -> Self {
        self.hostname = Some(hostname.into());
        self
    }

    pub fn with_timestamp(mut self, timestamp: i64) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    fn resolved_hostname(&self) -> String {
        self.hostname.clone().unwrap_or_else(|| {
            hostname::get()
                .map(|h| h.to_string_lossy().into_owned())
                .unwrap_or_else(|_| "localhost".to_string())
        })
    }
}

/// Everything a [`PullConnector`](crate::traits::PullConnector) needs to open a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectRequest {
    pub url: String,
    pub headers: Vec<(String, String)>,
}

impl ConnectRequest {
    pub fn build(
        params: &ConnectionParams,
        registry: &SubscriptionRegistry,
        credentials: &SessionCredentials,
    ) -> Self {
        let timestamp = params
            .timestamp
            .unwrap_or_else(|| chrono::Utc::now().timestamp());

        let query: Vec<(&str, String)> = vec![
            ("CHANNEL_ID", registry.channel_id_param()),
            ("user_id", params.user_id.to_string()),
            ("site_id", params.site_id.clone()),
            ("hostname", params.resolved_hostname()),
            ("timestamp", timestamp.to_string()),
            ("version", PROTOCOL_VERSION.to_string()),
            ("format", WIRE_FORMAT.to_string()),
            ("mode", CONNECTION_MODE.to_string()),
            ("binary", "true".to_string()),
        ];
        let query_string = query
            .iter()
            .map(|(k, v)| format!("{}={}", k, urlencoding::encode(v)))
            .collect::<Vec<_>>()
            .join("&");

        let separator = if params.endpoint.contains('?') { '&' } else { '?' };
        let url = format!("{}{}{}", params.endpoint, separator, query_string);

        let mut headers = vec![
            ("Origin".to_string(), params.origin.clone()),
            ("Sec-WebSocket-Protocol".to_string(), SUBPROTOCOL.to_string()),
        ];
        if let Some(cookie) = credentials.cookie_header() {
            headers.push(("Cookie".to_string(), cookie));
        }

        Self { url, headers }
    }

    /// Header value by case-insensitive name.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Decoded query parameter value.
    pub fn query_param(&self, name: &str) -> Option<String> {
        let (_, query) = self.url.split_once('?')?;
        query.split('&').find_map(|pair| {
            let (k, v) = pair.split_once('=')?;
            if k == name {
                urlencoding::decode(v).ok().map(|v| v.into_owned())
            } else {
                None
            }
        })
    }
}
