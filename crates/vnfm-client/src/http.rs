//! ---
//! vnfm_section: "05-external-interfaces"
//! vnfm_subsection: "module"
//! vnfm_type: "source"
//! vnfm_scope: "code"
//! vnfm_description: "Shared request plumbing for the reqwest-backed clients."
//! vnfm_version: "v0.0.0-prealpha"
//! vnfm_owner: "tbd"
//! ---
use std::time::Duration;

use reqwest::{Method, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use tracing::debug;
use url::Url;

use crate::error::{RemoteError, Result};

const MAX_ERROR_BODY: usize = 512;

/// Base URL plus a configured `reqwest` client.
#[derive(Debug, Clone)]
pub(crate) struct Endpoint {
    base: Url,
    client: reqwest::Client,
}

impl Endpoint {
    pub(crate) fn new(mut base: Url, timeout: Duration) -> Result<Self> {
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { base, client })
    }

    pub(crate) fn url(&self, path: &str) -> Result<Url> {
        Ok(self.base.join(path)?)
    }

    /// Append `segments` to the base path, percent-encoding each one.
    pub(crate) fn url_segments(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|()| {
                RemoteError::InvalidEndpoint(url::ParseError::RelativeUrlWithCannotBeABaseBase)
            })?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    pub(crate) fn request(&self, method: Method, url: Url) -> RequestBuilder {
        self.client.request(method, url)
    }

    /// Send a request and map non-success statuses onto [`RemoteError`].
    /// `what` names the addressed object for `NotFound`.
    pub(crate) async fn send(&self, request: RequestBuilder, what: &str) -> Result<Response> {
        let request = request.build()?;
        let method = request.method().to_string();
        let url = request.url().to_string();
        debug!(%method, %url, "remote call");
        let response = self.client.execute(request).await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(RemoteError::NotFound {
                what: what.to_string(),
            });
        }
        let mut body = response.text().await.unwrap_or_default();
        if body.len() > MAX_ERROR_BODY {
            let cut = (0..=MAX_ERROR_BODY)
                .rev()
                .find(|idx| body.is_char_boundary(*idx))
                .unwrap_or(0);
            body.truncate(cut);
        }
        Err(RemoteError::Status {
            method,
            url,
            status: status.as_u16(),
            body,
        })
    }

    /// Send and decode a JSON body.
    pub(crate) async fn send_json<T: DeserializeOwned>(
        &self,
        request: RequestBuilder,
        what: &str,
    ) -> Result<T> {
        let response = self.send(request, what).await?;
        let url = response.url().to_string();
        let bytes = response.bytes().await?;
        serde_json::from_slice(&bytes).map_err(|source| RemoteError::Decode { url, source })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn segments_are_percent_encoded_below_the_base() {
        let base = Url::parse("http://heat.local/v1/tenant").unwrap();
        let endpoint = Endpoint::new(base, Duration::from_secs(5)).unwrap();

        let url = endpoint
            .url_segments(&["stacks", "stack-1", "resources", "VDU 1/a?b#c"])
            .unwrap();
        assert_eq!(
            url.as_str(),
            "http://heat.local/v1/tenant/stacks/stack-1/resources/VDU%201%2Fa%3Fb%23c"
        );
    }
}
