//! Android account token exchange.
//!
//! The auth endpoint takes a form body and answers with `key=value` lines.
//! An OAuth token captured from the browser becomes a long-lived master
//! token, which in turn mints short-lived access tokens for the notes API.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use keepsync_core::{Error, Result};
use std::collections::HashMap;
use tracing::{debug, warn};

use crate::client::GoogleClient;

const ACCOUNT_TYPE: &str = "HOSTED_OR_GOOGLE";
const NOTES_SCOPE: &str =
    "oauth2:https://www.googleapis.com/auth/memento https://www.googleapis.com/auth/reminders";
const NOTES_APP: &str = "com.google.android.keep";
const DROIDGUARD_RESULTS: &str = "dummy123";

/// Split each line at its first `=`. Lines without one are ignored.
pub fn parse_auth_response(body: &str) -> HashMap<String, String> {
    body.lines()
        .filter_map(|line| line.split_once('='))
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

/// Access token expiry: `ExpiresInDurationSec` from now, else the absolute
/// `Expiry` epoch, else the Unix epoch.
pub fn parse_expiry(fields: &HashMap<String, String>, now: DateTime<Utc>) -> DateTime<Utc> {
    if let Some(secs) = fields
        .get("ExpiresInDurationSec")
        .and_then(|v| v.trim().parse::<f64>().ok())
    {
        return now + ChronoDuration::milliseconds((secs * 1000.0) as i64);
    }
    if let Some(epoch) = fields.get("Expiry").and_then(|v| v.trim().parse::<f64>().ok()) {
        if let Some(at) = DateTime::from_timestamp(epoch as i64, 0) {
            return at;
        }
    }
    DateTime::<Utc>::default()
}

fn encode_form(fields: &[(&str, String)]) -> String {
    fields
        .iter()
        .map(|(k, v)| format!("{}={}", urlencoding::encode(k), urlencoding::encode(v)))
        .collect::<Vec<_>>()
        .join("&")
}

fn server_error(fields: &HashMap<String, String>) -> Error {
    Error::Auth(
        fields
            .get("Error")
            .cloned()
            .unwrap_or_else(|| "Unknown error".to_string()),
    )
}

impl GoogleClient {
    fn device_fields(&self) -> Vec<(&'static str, String)> {
        vec![
            ("source", "android".to_string()),
            ("androidId", self.config.android_id.clone()),
            ("device_country", "us".to_string()),
            ("operatorCountry", "us".to_string()),
            ("lang", "en".to_string()),
            ("sdk_version", self.config.sdk_version.to_string()),
            (
                "google_play_services_version",
                self.config.play_services_version.to_string(),
            ),
            ("client_sig", self.config.client_sig.clone()),
        ]
    }

    async fn post_auth(&self, fields: &[(&str, String)]) -> Result<HashMap<String, String>> {
        let response = self
            .http
            .post(&self.config.auth_url)
            .header("User-Agent", &self.config.user_agent)
            .header("Accept-Encoding", "identity")
            .header("Content-Type", "application/x-www-form-urlencoded")
            .body(encode_form(fields))
            .send()
            .await
            .map_err(|e| Error::Network(format!("Auth request failed: {}", e)))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| Error::Network(format!("Auth response unreadable: {}", e)))?;
        debug!(status = %status, "Auth endpoint answered");
        Ok(parse_auth_response(&body))
    }

    /// Exchange a browser `oauth_token` for a master token.
    pub async fn fetch_master_token(&self, email: &str, oauth_token: &str) -> Result<String> {
        let mut fields = vec![
            ("accountType", ACCOUNT_TYPE.to_string()),
            ("Email", email.to_string()),
            ("has_permission", "1".to_string()),
            ("add_account", "1".to_string()),
            ("ACCESS_TOKEN", "1".to_string()),
            ("Token", oauth_token.to_string()),
            ("service", "ac2dm".to_string()),
        ];
        fields.extend(self.device_fields());
        fields.push(("callerSig", self.config.client_sig.clone()));
        fields.push(("droidguard_results", DROIDGUARD_RESULTS.to_string()));

        let response = self.post_auth(&fields).await?;
        match response.get("Token") {
            Some(token) => Ok(token.clone()),
            None => {
                let err = server_error(&response);
                warn!(email = %email, error = %err, "Master token exchange rejected");
                Err(err)
            }
        }
    }

    /// Mint an access token for the notes API from a master token.
    pub async fn fetch_access_token(
        &self,
        email: &str,
        master_token: &str,
    ) -> Result<(String, DateTime<Utc>)> {
        let mut fields = vec![
            ("accountType", ACCOUNT_TYPE.to_string()),
            ("Email", email.to_string()),
            ("has_permission", "1".to_string()),
            ("EncryptedPasswd", master_token.to_string()),
            ("service", NOTES_SCOPE.to_string()),
            ("app", NOTES_APP.to_string()),
        ];
        fields.extend(self.device_fields());

        let response = self.post_auth(&fields).await?;
        match response.get("Auth") {
            Some(token) => Ok((token.clone(), parse_expiry(&response, Utc::now()))),
            None => {
                let err = server_error(&response);
                warn!(email = %email, error = %err, "Access token exchange rejected");
                Err(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keepsync_core::config::{GoogleConfig, NetworkConfig};
    use wiremock::matchers::{body_string_contains, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(server: &MockServer) -> GoogleClient {
        let config = GoogleConfig {
            auth_url: format!("{}/auth", server.uri()),
            ..Default::default()
        };
        let network = NetworkConfig {
            proxy: Some(String::new()),
            ..Default::default()
        };
        GoogleClient::new(config, &network)
    }

    #[test]
    fn test_parse_auth_response() {
        let fields = parse_auth_response("SID=1\nToken=aas_et/abc=def\n\nnoequals\nError=");
        assert_eq!(fields.get("SID").map(String::as_str), Some("1"));
        assert_eq!(fields.get("Token").map(String::as_str), Some("aas_et/abc=def"));
        assert_eq!(fields.get("Error").map(String::as_str), Some(""));
        assert!(!fields.contains_key("noequals"));
    }

    #[test]
    fn test_parse_expiry_precedence() {
        let now = DateTime::from_timestamp(1_700_000_000, 0).unwrap();
        let mut fields = HashMap::new();
        fields.insert("Expiry".to_string(), "1800000000".to_string());
        assert_eq!(parse_expiry(&fields, now).timestamp(), 1_800_000_000);

        fields.insert("ExpiresInDurationSec".to_string(), "3599".to_string());
        assert_eq!(parse_expiry(&fields, now).timestamp(), 1_700_003_599);

        assert_eq!(parse_expiry(&HashMap::new(), now).timestamp(), 0);
        fields.clear();
        fields.insert("Expiry".to_string(), "soon".to_string());
        assert_eq!(parse_expiry(&fields, now).timestamp(), 0);
    }

    #[test]
    fn test_encode_form() {
        let body = encode_form(&[("service", NOTES_SCOPE.to_string()), ("Email", "a+b@x.com".to_string())]);
        assert!(body.starts_with("service=oauth2%3Ahttps%3A%2F%2Fwww.googleapis.com%2Fauth%2Fmemento%20"));
        assert!(body.ends_with("&Email=a%2Bb%40x.com"));
    }

    #[tokio::test]
    async fn test_master_token_success() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth"))
            .and(header("User-Agent", "GoogleAuth/1.4"))
            .and(header("Accept-Encoding", "identity"))
            .and(body_string_contains("Token=oauth2_4%2Fcaptured"))
            .and(body_string_contains("service=ac2dm"))
            .and(body_string_contains("droidguard_results=dummy123"))
            .respond_with(ResponseTemplate::new(200).set_body_string("Token=abc123\n"))
            .expect(1)
            .mount(&server)
            .await;

        let token = client(&server)
            .fetch_master_token("user@example.com", "oauth2_4/captured")
            .await
            .unwrap();
        assert_eq!(token, "abc123");
    }

    #[tokio::test]
    async fn test_master_token_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth"))
            .respond_with(ResponseTemplate::new(403).set_body_string("Error=BadAuthentication\n"))
            .mount(&server)
            .await;

        match client(&server).fetch_master_token("user@example.com", "t").await {
            Err(Error::Auth(msg)) => assert_eq!(msg, "BadAuthentication"),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_master_token_unknown_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth"))
            .respond_with(ResponseTemplate::new(500).set_body_string("garbage"))
            .mount(&server)
            .await;

        match client(&server).fetch_master_token("user@example.com", "t").await {
            Err(Error::Auth(msg)) => assert_eq!(msg, "Unknown error"),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_access_token_with_duration() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth"))
            .and(body_string_contains("EncryptedPasswd=aas_et%2Fmaster"))
            .and(body_string_contains("app=com.google.android.keep"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string("Auth=ya29.token\nExpiry=1\nExpiresInDurationSec=3599\n"),
            )
            .mount(&server)
            .await;

        let before = Utc::now();
        let (token, expiry) = client(&server)
            .fetch_access_token("user@example.com", "aas_et/master")
            .await
            .unwrap();
        assert_eq!(token, "ya29.token");
        assert!(expiry >= before + ChronoDuration::seconds(3590));
        assert!(expiry <= Utc::now() + ChronoDuration::seconds(3600));
    }
}
