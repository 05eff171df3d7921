//! Shared HTTP client construction (§4's "HTTP Client" component, §6).

use reqwest::Client;

use crate::config::{Config, CONNECT_TIMEOUT, USER_AGENT};
use crate::error::Result;

/// Build the single `reqwest::Client` shared by the scanner and every
/// worker. Safe for concurrent use across tasks (§5).
pub fn build_client(_config: &Config) -> Result<Client> {
    let client = Client::builder()
        .user_agent(USER_AGENT)
        .connect_timeout(CONNECT_TIMEOUT)
        .build()?;
    Ok(client)
}

/// Attach HTTP Basic auth to a request builder if credentials are configured.
pub fn with_basic_auth(
    request: reqwest::RequestBuilder,
    config: &Config,
) -> reqwest::RequestBuilder {
    match &config.s3_credentials {
        Some(creds) => request.basic_auth(&creds.access, Some(&creds.secret)),
        None => request,
    }
}
