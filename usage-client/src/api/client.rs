use std::time::Duration;

use reqwest::{header, Url};

use super::{ApiError, TimeRange};

/// Connection and account details for the readings API.
#[derive(Debug, Clone)]
pub struct ApiSettings {
    pub base_url: String,
    pub username: String,
    pub password: String,
    pub account: String,
    pub service_location: String,
    /// Upstream `timeFrame` value, e.g. `HOURLY` or `FIFTEEN_MINUTE`.
    pub interval: String,
    pub accept_invalid_certs: bool,
    pub timeout: Duration,
}

#[derive(serde::Deserialize)]
#[serde(rename_all = "camelCase")]
struct AuthResponse {
    #[serde(default)]
    authorization_token: Option<String>,
}

pub struct SmartHubClient {
    http: reqwest::Client,
    base_url: Url,
    settings: ApiSettings,
}

impl SmartHubClient {
    pub fn new(settings: ApiSettings) -> Result<Self, ApiError> {
        let base_url = Url::parse(settings.base_url.trim_end_matches('/'))
            .map_err(|e| ApiError::Config(format!("invalid base_url '{}': {e}", settings.base_url)))?;
        if base_url.host_str().is_none() {
            return Err(ApiError::Config(format!("base_url '{}' has no host", settings.base_url)));
        }

        let http = reqwest::Client::builder()
            .danger_accept_invalid_certs(settings.accept_invalid_certs)
            .timeout(settings.timeout)
            .build()
            .map_err(|e| ApiError::Config(format!("failed to build http client: {e}")))?;

        Ok(Self {
            http,
            base_url,
            settings,
        })
    }

    pub fn settings(&self) -> &ApiSettings {
        &self.settings
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.base_url.as_str().trim_end_matches('/'), path)
    }

    /// Exchange the configured credentials for a bearer token.
    pub async fn authenticate(&self) -> Result<String, ApiError> {
        let url = self.endpoint("/services/oauth/auth/v2");
        let authority = self.base_url.host_str().unwrap_or_default().to_string();
        let form = [
            ("userId", self.settings.username.as_str()),
            ("password", self.settings.password.as_str()),
        ];

        tracing::debug!(%url, "requesting authorization token");
        let resp = self
            .http
            .post(&url)
            .header("authority", authority)
            .form(&form)
            .send()
            .await
            .map_err(|e| ApiError::Auth(e.to_string()))?
            .error_for_status()
            .map_err(|e| ApiError::Auth(e.to_string()))?;

        let body = resp.bytes().await.map_err(|e| ApiError::Auth(e.to_string()))?;
        let parsed: AuthResponse = serde_json::from_slice(&body)
            .map_err(|e| ApiError::Auth(format!("undecodable auth response: {e}")))?;

        match parsed.authorization_token {
            Some(token) if !token.is_empty() => Ok(token),
            _ => Err(ApiError::Auth("auth response did not include auth token".to_string())),
        }
    }

    /// Fetch the raw readings body for `range`. The body is returned
    /// undecoded so callers can persist it verbatim.
    pub async fn fetch_readings(&self, range: &TimeRange, token: &str) -> Result<Vec<u8>, ApiError> {
        let url = self.endpoint(&format!(
            "/services/secured/readings/graph/{}/{}",
            self.settings.service_location, self.settings.account
        ));
        let query = [
            ("startDateTime", range.start_millis().to_string()),
            ("endDateTime", range.end_millis().to_string()),
            ("applicationName", "CONSUMER".to_string()),
            ("graphUnitOfMeasure", "KWH".to_string()),
            ("timeFrame", self.settings.interval.clone()),
        ];

        tracing::debug!(
            %url,
            start = range.start_millis(),
            end = range.end_millis(),
            "fetching readings"
        );
        let resp = self
            .http
            .get(&url)
            .query(&query)
            .bearer_auth(token)
            .header("x-nisc-smarthub-username", &self.settings.username)
            .header(header::CONTENT_TYPE, "application/json")
            .send()
            .await
            .map_err(|e| ApiError::Fetch(e.to_string()))?
            .error_for_status()
            .map_err(|e| ApiError::Fetch(e.to_string()))?;

        let body = resp.bytes().await.map_err(|e| ApiError::Fetch(e.to_string()))?;
        Ok(body.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(base_url: &str) -> ApiSettings {
        ApiSettings {
            base_url: base_url.to_string(),
            username: "user@example.com".to_string(),
            password: "secret".to_string(),
            account: "1001".to_string(),
            service_location: "2002".to_string(),
            interval: "HOURLY".to_string(),
            accept_invalid_certs: false,
            timeout: Duration::from_secs(5),
        }
    }

    #[test]
    fn new_rejects_unparseable_base_url() {
        let res = SmartHubClient::new(settings("not a url"));
        assert!(matches!(res, Err(ApiError::Config(_))));
    }

    #[test]
    fn endpoint_ignores_trailing_slash() {
        let client = SmartHubClient::new(settings("https://coop.example.com/")).unwrap();
        assert_eq!(
            client.endpoint("/services/oauth/auth/v2"),
            "https://coop.example.com/services/oauth/auth/v2"
        );
    }
}
