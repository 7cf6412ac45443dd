//! Thin HTTP wrapper shared by all assistant endpoints.

use crate::stream::{TokenStream, decode_stream};
use anyhow::Result;
use serde::{Serialize, de::DeserializeOwned};
use std::fmt::Debug;
use tracing::{Level, event, instrument};

#[derive(Clone, Default)]
pub struct Client {
    client: reqwest::Client,
}

impl Client {
    pub fn new() -> Self {
        Client {
            client: reqwest::Client::new(),
        }
    }

    #[instrument(level = "trace", skip(self))]
    pub async fn get_json<U, T>(&self, url: U) -> Result<T>
    where
        U: reqwest::IntoUrl + Debug,
        T: DeserializeOwned,
    {
        let response = self.client.get(url).send().await?;
        if !response.status().is_success() {
            return Err(anyhow::anyhow!(
                "Request failed with status: {}",
                response.status()
            ));
        }
        let text = response.text().await?;
        event!(Level::TRACE, response = text);

        Ok(serde_json::from_str::<T>(&text)?)
    }

    #[instrument(level = "trace", skip(self, request), fields(json_request = serde_json::to_string(request).unwrap_or_default()))]
    pub async fn post_json<U, S, T>(&self, url: U, request: &S) -> Result<T>
    where
        U: reqwest::IntoUrl + Debug,
        S: Serialize + Sized,
        T: DeserializeOwned,
    {
        let response = self.client.post(url).json(request).send().await?;
        if !response.status().is_success() {
            let status = response.status();
            let error_body = response
                .text()
                .await
                .unwrap_or_else(|_| "Failed to read error body".to_string());
            return Err(anyhow::anyhow!(
                "Request failed with status {}: {}",
                status,
                error_body
            ));
        }
        let text = response.text().await?;
        event!(Level::TRACE, response = text);

        Ok(serde_json::from_str::<T>(&text)?)
    }

    /// Open a streamed request and decode its body into a token stream.
    ///
    /// Dropping the returned stream drops the response body, which cancels
    /// any reads still in flight.
    #[instrument(level = "trace", skip(self, request))]
    pub async fn post_stream<U, S>(&self, url: U, request: &S) -> Result<TokenStream>
    where
        U: reqwest::IntoUrl + Debug,
        S: Serialize + Sized,
    {
        let response = self.client.post(url).json(&request).send().await?;
        if !response.status().is_success() {
            let status = response.status();
            let error_body = response
                .text()
                .await
                .unwrap_or_else(|_| "Failed to read error body".to_string());
            return Err(anyhow::anyhow!(
                "Request failed with status {}: {}",
                status,
                error_body
            ));
        }

        Ok(decode_stream(response.bytes_stream()))
    }

    #[instrument(level = "trace", skip(self, form))]
    pub async fn post_multipart<U, T>(&self, url: U, form: reqwest::multipart::Form) -> Result<T>
    where
        U: reqwest::IntoUrl + Debug,
        T: DeserializeOwned,
    {
        let response = self.client.post(url).multipart(form).send().await?;
        if !response.status().is_success() {
            let status = response.status();
            let error_body = response
                .text()
                .await
                .unwrap_or_else(|_| "Failed to read error body".to_string());
            return Err(anyhow::anyhow!(
                "Request failed with status {}: {}",
                status,
                error_body
            ));
        }
        let text = response.text().await?;
        event!(Level::TRACE, response = text);

        Ok(serde_json::from_str::<T>(&text)?)
    }

    /// POST a form and return the raw response body bytes.
    #[instrument(level = "trace", skip(self, form))]
    pub async fn post_form_bytes<U>(&self, url: U, form: &[(&str, &str)]) -> Result<Vec<u8>>
    where
        U: reqwest::IntoUrl + Debug,
    {
        let response = self.client.post(url).form(form).send().await?;
        if !response.status().is_success() {
            let status = response.status();
            let error_body = response
                .text()
                .await
                .unwrap_or_else(|_| "Failed to read error body".to_string());
            return Err(anyhow::anyhow!(
                "Request failed with status {}: {}",
                status,
                error_body
            ));
        }
        Ok(response.bytes().await?.to_vec())
    }
}

/// Whether a base URL can carry microphone audio confidentially: HTTPS, or
/// plain HTTP to a loopback host only.
pub fn secure_origin(base_url: &str) -> bool {
    let Ok(url) = reqwest::Url::parse(base_url) else {
        return false;
    };
    match url.scheme() {
        "https" => true,
        "http" => matches!(
            url.host_str(),
            Some("localhost") | Some("127.0.0.1") | Some("[::1]") | Some("::1")
        ),
        _ => false,
    }
}
