use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use reqwest::blocking::Client;
use serde::Deserialize;

use crate::error::ElError;

const METADATA_TOKEN_URL: &str =
    "http://metadata.google.internal/computeMetadata/v1/instance/service-accounts/default/token";

/// Seconds shaved off a token's lifetime before it is refreshed.
const EXPIRY_SLACK_SECS: u64 = 60;

/// OAuth bearer tokens for the Google REST APIs.
///
/// `GOOGLE_OAUTH_ACCESS_TOKEN` wins when set (handy locally with
/// `gcloud auth print-access-token`); otherwise tokens come from the
/// metadata server of the Cloud Run / GCE instance and are cached until
/// shortly before they expire.
#[derive(Clone)]
pub enum Credentials {
    Static(String),
    Metadata {
        client: Client,
        cached: Arc<Mutex<Option<CachedToken>>>,
    },
}

#[derive(Debug, Clone)]
pub struct CachedToken {
    token: String,
    expires_at: Instant,
}

#[derive(Deserialize)]
struct MetadataToken {
    access_token: String,
    expires_in: u64,
}

impl Credentials {
    pub fn from_env() -> Result<Self, ElError> {
        if let Some(token) = std::env::var("GOOGLE_OAUTH_ACCESS_TOKEN")
            .ok()
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
        {
            return Ok(Credentials::Static(token));
        }
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|err| ElError::Auth(err.to_string()))?;
        Ok(Credentials::Metadata {
            client,
            cached: Arc::new(Mutex::new(None)),
        })
    }

    pub fn bearer(&self) -> Result<String, ElError> {
        match self {
            Credentials::Static(token) => Ok(token.clone()),
            Credentials::Metadata { client, cached } => {
                let mut guard = cached
                    .lock()
                    .map_err(|_| ElError::Auth("token cache poisoned".to_string()))?;
                if let Some(token) = guard.as_ref()
                    && token.expires_at > Instant::now()
                {
                    return Ok(token.token.clone());
                }
                let fresh = fetch_metadata_token(client)?;
                let token = fresh.token.clone();
                *guard = Some(fresh);
                Ok(token)
            }
        }
    }
}

fn fetch_metadata_token(client: &Client) -> Result<CachedToken, ElError> {
    let response = client
        .get(METADATA_TOKEN_URL)
        .header("Metadata-Flavor", "Google")
        .send()
        .map_err(|err| ElError::Auth(format!("metadata server unreachable: {err}")))?;
    if !response.status().is_success() {
        let status = response.status().as_u16();
        return Err(ElError::Auth(format!("metadata server returned status {status}")));
    }
    let token: MetadataToken = response
        .json()
        .map_err(|err| ElError::Auth(err.to_string()))?;
    let lifetime = token.expires_in.saturating_sub(EXPIRY_SLACK_SECS);
    Ok(CachedToken {
        token: token.access_token,
        expires_at: Instant::now() + Duration::from_secs(lifetime),
    })
}
