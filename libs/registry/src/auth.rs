//! Registry authentication challenges and token exchange.

use std::collections::HashMap;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use reqwest::Client;
use serde::Deserialize;
use tokio::sync::RwLock;
use tracing::debug;

use crate::credentials::Credential;
use crate::error::RegistryError;

const CLIENT_ID: &str = "onmetal-image";

/// Parsed `WWW-Authenticate` challenge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Challenge {
    Basic,
    Bearer {
        realm: String,
        service: Option<String>,
        scope: Option<String>,
    },
}

impl Challenge {
    pub(crate) fn parse(header: &str) -> Option<Self> {
        let header = header.trim();
        let (scheme, rest) = header.split_once(char::is_whitespace).unwrap_or((header, ""));

        if scheme.eq_ignore_ascii_case("basic") {
            return Some(Challenge::Basic);
        }
        if !scheme.eq_ignore_ascii_case("bearer") {
            return None;
        }

        let mut params = parse_params(rest);
        let realm = params.remove("realm")?;
        Some(Challenge::Bearer {
            realm,
            service: params.remove("service"),
            scope: params.remove("scope"),
        })
    }
}

/// Parse `key="value", key=value` auth parameters. Quoted values may contain
/// commas.
fn parse_params(input: &str) -> HashMap<String, String> {
    let mut params = HashMap::new();
    let mut chars = input.chars().peekable();

    loop {
        while chars.peek().is_some_and(|c| *c == ',' || c.is_whitespace()) {
            chars.next();
        }

        let key: String = chars.by_ref().take_while(|c| *c != '=').collect();
        if key.is_empty() {
            break;
        }

        let mut value = String::new();
        if chars.peek() == Some(&'"') {
            chars.next();
            while let Some(c) = chars.next() {
                match c {
                    '\\' => value.extend(chars.next()),
                    '"' => break,
                    c => value.push(c),
                }
            }
        } else {
            while let Some(c) = chars.next_if(|c| *c != ',') {
                value.push(c);
            }
        }

        params.insert(key.trim().to_ascii_lowercase(), value.trim().to_string());
    }

    params
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    #[serde(default)]
    token: Option<String>,
    #[serde(default)]
    access_token: Option<String>,
}

/// Authorization header values keyed by `host` and `scope`.
#[derive(Debug, Default)]
pub(crate) struct TokenCache {
    entries: RwLock<HashMap<(String, String), String>>,
}

impl TokenCache {
    pub(crate) async fn get(&self, host: &str, scope: &str) -> Option<String> {
        self.entries
            .read()
            .await
            .get(&(host.to_string(), scope.to_string()))
            .cloned()
    }

    pub(crate) async fn insert(&self, host: &str, scope: &str, value: String) {
        self.entries
            .write()
            .await
            .insert((host.to_string(), scope.to_string()), value);
    }
}

/// Build a basic `Authorization` header value.
pub(crate) fn basic_header(username: &str, password: &str) -> String {
    format!("Basic {}", STANDARD.encode(format!("{username}:{password}")))
}

/// Answer a challenge, returning the `Authorization` header value to retry
/// with. Returns `None` if the challenge cannot be answered with what we have.
pub(crate) async fn answer(
    client: &Client,
    challenge: &Challenge,
    scope: &str,
    credential: Option<&Credential>,
) -> Result<Option<String>, RegistryError> {
    match (challenge, credential) {
        (_, Some(Credential::RegistryToken(token))) => Ok(Some(format!("Bearer {token}"))),
        (Challenge::Basic, Some(Credential::Basic { username, password })) => {
            Ok(Some(basic_header(username, password)))
        }
        (Challenge::Basic, _) => Ok(None),
        (
            Challenge::Bearer {
                realm,
                service,
                scope: challenge_scope,
            },
            credential,
        ) => {
            let scope = challenge_scope.as_deref().unwrap_or(scope);
            let token = fetch_token(client, realm, service.as_deref(), scope, credential).await?;
            Ok(Some(format!("Bearer {token}")))
        }
    }
}

async fn fetch_token(
    client: &Client,
    realm: &str,
    service: Option<&str>,
    scope: &str,
    credential: Option<&Credential>,
) -> Result<String, RegistryError> {
    debug!(realm = %realm, scope = %scope, "Requesting registry token");

    let request = match credential {
        Some(Credential::IdentityToken { token, .. }) => {
            let mut form = vec![
                ("grant_type", "refresh_token"),
                ("refresh_token", token.as_str()),
                ("client_id", CLIENT_ID),
                ("scope", scope),
            ];
            if let Some(service) = service {
                form.push(("service", service));
            }
            client.post(realm).form(&form)
        }
        credential => {
            let mut query = vec![("scope", scope)];
            if let Some(service) = service {
                query.push(("service", service));
            }
            let request = client.get(realm).query(&query);
            match credential {
                Some(Credential::Basic { username, password }) => {
                    request.basic_auth(username, Some(password))
                }
                _ => request,
            }
        }
    };

    let response = request.send().await?;
    let status = response.status();
    if !status.is_success() {
        return Err(RegistryError::Token {
            realm: realm.to_string(),
            reason: format!("status {status}"),
        });
    }

    let body: TokenResponse = response.json().await?;
    body.token
        .or(body.access_token)
        .filter(|t| !t.is_empty())
        .ok_or_else(|| RegistryError::Token {
            realm: realm.to_string(),
            reason: "response carries no token".to_string(),
        })
}
