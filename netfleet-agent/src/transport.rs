//! HTTP transport to the root node.

use async_trait::async_trait;
use netfleet_core::wire::{self, CommandTable};
use netfleet_core::{ClientInfo, CommandRecord, DeviceRecord, FleetError, Result, RootTransport};
use reqwest::{Client, RequestBuilder, Response};
use std::time::Duration;

pub struct HttpTransport {
    client: Client,
    base_url: String,
    api_key: String,
}

fn transport_error(e: reqwest::Error) -> FleetError {
    FleetError::Transport(e.to_string())
}

impl HttpTransport {
    pub fn new(base_url: &str, api_key: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()
            .map_err(transport_error)?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response> {
        request
            .header("x-api-key", &self.api_key)
            .send()
            .await
            .and_then(Response::error_for_status)
            .map_err(transport_error)
    }
}

#[async_trait]
impl RootTransport for HttpTransport {
    async fn pull(&self, client: &str) -> Result<Vec<CommandRecord>> {
        let request = self.client.get(self.url("/api/v1/commands")).query(&[("id", client)]);
        let table: CommandTable = self.send(request).await?.json().await.map_err(transport_error)?;
        Ok(wire::decode_commands(table))
    }

    async fn push(&self, records: Vec<CommandRecord>) -> Result<()> {
        let table = wire::encode_commands(&records);
        self.send(self.client.post(self.url("/api/v1/commands")).json(&table)).await?;
        Ok(())
    }

    async fn push_devices(&self, devices: Vec<DeviceRecord>) -> Result<()> {
        let table = wire::encode_devices(&devices);
        self.send(self.client.post(self.url("/api/v1/devices")).json(&table)).await?;
        Ok(())
    }

    async fn register(&self, info: ClientInfo) -> Result<()> {
        self.send(self.client.post(self.url("/api/v1/register")).json(&info)).await?;
        Ok(())
    }
}
