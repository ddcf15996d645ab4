use chrono::{SecondsFormat, Utc};
use keepsync_core::{Account, Error, Note, Result, Store};
use serde_json::{json, Value};
use tracing::{debug, info};

use crate::client::GoogleClient;

const CAPABILITIES: [&str; 11] = [
    "NC", "PI", "LB", "AN", "SH", "DR", "TR", "IN", "SNB", "MI", "CO",
];

/// `s--<unix millis>--<random u32>`, fresh per request.
pub fn client_session_id() -> String {
    let random = uuid::Uuid::new_v4().as_u128() as u32;
    format!("s--{}--{}", Utc::now().timestamp_millis(), random)
}

fn changes_request() -> Value {
    let capabilities: Vec<Value> = CAPABILITIES.iter().map(|c| json!({ "type": c })).collect();
    json!({
        "nodes": [],
        "clientTimestamp": Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
        "requestHeader": {
            "clientSessionId": client_session_id(),
            "clientPlatform": "ANDROID",
            "clientVersion": { "major": "9", "minor": "9", "build": "9", "revision": "9" },
            "capabilities": capabilities,
        }
    })
}

impl GoogleClient {
    /// A usable access token for `account`, refreshing and persisting it when
    /// missing or expired.
    pub async fn get_access_token(&self, store: &dyn Store, account: &mut Account) -> Result<String> {
        if !account.access_token.is_empty() && !account.is_access_token_expired(Utc::now()) {
            return Ok(account.access_token.clone());
        }
        if !account.has_master_token() {
            return Err(Error::Auth(format!("{} has no master token", account.email)));
        }

        let (token, expiry) = self
            .fetch_access_token(&account.email, &account.master_token)
            .await?;
        account.access_token = token.clone();
        account.access_token_expiry = Some(expiry);
        store.upsert_account(account)?;
        debug!(email = %account.email, expiry = %expiry, "Access token refreshed");
        Ok(token)
    }

    /// Raw note records from the changes endpoint. A response without a
    /// `nodes` array yields no records.
    pub async fn fetch_note_changes(&self, email: &str, access_token: &str) -> Result<Vec<Value>> {
        let response = self
            .http
            .post(&self.config.notes_url)
            .header("Authorization", format!("OAuth {}", access_token))
            .header("User-Agent", &self.config.notes_user_agent)
            .json(&changes_request())
            .send()
            .await
            .map_err(|e| Error::Network(format!("Notes request failed: {}", e)))?;

        let status = response.status();
        if status.as_u16() == 401 {
            return Err(Error::Auth(format!("access token for {} was rejected", email)));
        }
        if !status.is_success() {
            return Err(Error::Network(format!("Notes request returned HTTP {}", status)));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| Error::NoteParsing(format!("invalid notes response: {}", e)))?;
        let nodes = match body.get("nodes") {
            Some(Value::Array(nodes)) => nodes.clone(),
            _ => Vec::new(),
        };
        debug!(email = %email, nodes = nodes.len(), "Fetched note changes");
        Ok(nodes)
    }

    /// Fetch all notes for a token-linked account and replace the stored set.
    pub async fn sync_notes(&self, store: &dyn Store, account: &mut Account) -> Result<usize> {
        let token = self.get_access_token(store, account).await?;
        let nodes = self.fetch_note_changes(&account.email, &token).await?;
        let notes = nodes
            .iter()
            .map(|n| Note::parse(n, &account.email))
            .collect::<Result<Vec<_>>>()?;
        store.replace_notes(&account.email, &notes)?;
        info!(email = %account.email, notes = notes.len(), "API sync complete");
        Ok(notes.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use keepsync_core::config::{GoogleConfig, NetworkConfig};
    use keepsync_storage::SqliteStore;
    use wiremock::matchers::{body_string_contains, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(server: &MockServer) -> GoogleClient {
        let config = GoogleConfig {
            auth_url: format!("{}/auth", server.uri()),
            notes_url: format!("{}/notes/v1/changes", server.uri()),
            ..Default::default()
        };
        let network = NetworkConfig {
            proxy: Some(String::new()),
            ..Default::default()
        };
        GoogleClient::new(config, &network)
    }

    fn token_account(access_token: &str, expires_in: i64) -> Account {
        Account {
            master_token: "aas_et/master".to_string(),
            access_token: access_token.to_string(),
            access_token_expiry: Some(Utc::now() + Duration::seconds(expires_in)),
            ..Account::new("user@example.com")
        }
    }

    #[test]
    fn test_client_session_id_shape() {
        let id = client_session_id();
        let parts: Vec<&str> = id.split("--").collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0], "s");
        assert!(parts[1].parse::<i64>().unwrap() > 1_600_000_000_000);
        assert!(parts[2].parse::<u32>().is_ok());
    }

    #[test]
    fn test_changes_request_shape() {
        let body = changes_request();
        let header = &body["requestHeader"];
        assert_eq!(header["clientPlatform"], "ANDROID");
        assert_eq!(header["clientVersion"]["revision"], "9");
        assert_eq!(header["capabilities"].as_array().unwrap().len(), 11);
        assert_eq!(header["capabilities"][8]["type"], "SNB");
        let ts = body["clientTimestamp"].as_str().unwrap();
        assert!(ts.ends_with('Z'));
        assert!(chrono::DateTime::parse_from_rfc3339(ts).is_ok());
    }

    #[tokio::test]
    async fn test_valid_token_skips_network() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth"))
            .respond_with(ResponseTemplate::new(200).set_body_string("Auth=new\n"))
            .expect(0)
            .mount(&server)
            .await;
        let store = SqliteStore::open_in_memory().unwrap();
        let mut account = token_account("ya29.cached", 600);

        let token = client(&server).get_access_token(&store, &mut account).await.unwrap();
        assert_eq!(token, "ya29.cached");
    }

    #[tokio::test]
    async fn test_expired_token_refreshes_and_persists() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth"))
            .respond_with(
                ResponseTemplate::new(200).set_body_string("Auth=ya29.fresh\nExpiresInDurationSec=3599\n"),
            )
            .expect(1)
            .mount(&server)
            .await;
        let store = SqliteStore::open_in_memory().unwrap();
        let mut account = token_account("ya29.stale", -60);
        store.upsert_account(&account).unwrap();

        let token = client(&server).get_access_token(&store, &mut account).await.unwrap();
        assert_eq!(token, "ya29.fresh");
        let stored = store.account("user@example.com").unwrap().unwrap();
        assert_eq!(stored.access_token, "ya29.fresh");
        assert!(!stored.is_access_token_expired(Utc::now()));
    }

    #[tokio::test]
    async fn test_missing_master_token_is_auth_error() {
        let server = MockServer::start().await;
        let store = SqliteStore::open_in_memory().unwrap();
        let mut account = Account::with_profile("user@example.com", "Default");

        let err = client(&server)
            .get_access_token(&store, &mut account)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Auth(_)));
        assert!(server.received_requests().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_fetch_note_changes() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/notes/v1/changes"))
            .and(header("Authorization", "OAuth ya29.token"))
            .and(body_string_contains("\"clientPlatform\":\"ANDROID\""))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "kind": "notes#downSync",
                "nodes": [ { "id": "a" }, { "id": "b" } ]
            })))
            .mount(&server)
            .await;

        let nodes = client(&server)
            .fetch_note_changes("user@example.com", "ya29.token")
            .await
            .unwrap();
        assert_eq!(nodes.len(), 2);
        assert_eq!(nodes[1]["id"], "b");
    }

    #[tokio::test]
    async fn test_fetch_without_nodes_is_empty() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/notes/v1/changes"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "kind": "notes#downSync" })))
            .mount(&server)
            .await;

        let nodes = client(&server)
            .fetch_note_changes("user@example.com", "t")
            .await
            .unwrap();
        assert!(nodes.is_empty());
    }

    #[tokio::test]
    async fn test_sync_notes_replaces_stored_set() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/notes/v1/changes"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "nodes": [
                    { "id": "n1", "parentId": "root", "type": "NOTE", "title": "Groceries" },
                    { "id": "i1", "parentId": "n1", "type": "LIST_ITEM", "text": "milk" }
                ]
            })))
            .mount(&server)
            .await;
        let store = SqliteStore::open_in_memory().unwrap();
        let old = Note {
            id: "old".to_string(),
            email: "user@example.com".to_string(),
            ..Default::default()
        };
        store.replace_notes("user@example.com", &[old]).unwrap();
        let mut account = token_account("ya29.token", 600);

        let count = client(&server).sync_notes(&store, &mut account).await.unwrap();
        assert_eq!(count, 2);
        let notes = store.notes("user@example.com").unwrap();
        assert_eq!(notes.len(), 2);
        assert!(notes.iter().all(|n| n.id != "old" && n.email == "user@example.com"));
    }

    #[tokio::test]
    async fn test_rejected_token_keeps_notes() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/notes/v1/changes"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;
        let store = SqliteStore::open_in_memory().unwrap();
        let old = Note {
            id: "old".to_string(),
            email: "user@example.com".to_string(),
            ..Default::default()
        };
        store.replace_notes("user@example.com", &[old]).unwrap();
        let mut account = token_account("ya29.token", 600);

        let err = client(&server).sync_notes(&store, &mut account).await.unwrap_err();
        assert!(matches!(err, Error::Auth(_)));
        assert_eq!(store.notes("user@example.com").unwrap().len(), 1);
    }
}
