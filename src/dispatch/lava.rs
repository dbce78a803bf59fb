//! LAVA dispatch backend.
//!
//! Submits rendered job descriptors to a LAVA scheduler over XML-RPC and
//! answers device status queries from the same server, so one backend covers
//! both the availability gate and dispatch.
//!
//! `scheduler.submit_job` returns either one job id or, for multinode jobs, a
//! list of sub-job ids. Both shapes are normalised into a list of result URLs
//! of the form `<web_ui_address>/scheduler/job/<id>`.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Url;
use tracing::debug;

use super::xmlrpc::{Value, XmlRpcClient};
use super::{DispatchError, DispatchResult, Dispatcher};
use crate::board::Board;
use crate::config::LavaDispatchConfig;
use crate::device::{DeviceError, DeviceResult, DeviceStatus, DeviceStatusProvider};
use crate::job::Job;

/// Scheduler answer to a job submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitResponse {
    Single(String),
    Multiple(Vec<String>),
}

impl SubmitResponse {
    pub fn into_ids(self) -> Vec<String> {
        match self {
            SubmitResponse::Single(id) => vec![id],
            SubmitResponse::Multiple(ids) => ids,
        }
    }
}

/// The two scheduler calls the launcher needs.
#[async_trait]
pub trait SchedulerClient: Send + Sync {
    /// Submits a job descriptor.
    async fn submit_job(&self, definition: &str) -> DispatchResult<SubmitResponse>;

    /// Returns the raw status string of a device, e.g. `idle` or `offline`.
    async fn get_device_status(&self, device: &str) -> DispatchResult<String>;
}

fn scalar_id(value: &Value) -> Option<String> {
    match value {
        Value::Int(id) => Some(id.to_string()),
        Value::String(id) => Some(id.clone()),
        _ => None,
    }
}

#[async_trait]
impl SchedulerClient for XmlRpcClient {
    async fn submit_job(&self, definition: &str) -> DispatchResult<SubmitResponse> {
        let value = self
            .call("scheduler.submit_job", &[Value::from(definition)])
            .await
            .map_err(|e| DispatchError::Unavailable(e.to_string()))?;

        match &value {
            Value::Array(items) => items
                .iter()
                .map(|item| {
                    scalar_id(item).ok_or_else(|| {
                        DispatchError::Unavailable(format!("Unexpected job id {:?}", item))
                    })
                })
                .collect::<DispatchResult<Vec<_>>>()
                .map(SubmitResponse::Multiple),
            other => scalar_id(other).map(SubmitResponse::Single).ok_or_else(|| {
                DispatchError::Unavailable(format!("Unexpected submit response {:?}", other))
            }),
        }
    }

    async fn get_device_status(&self, device: &str) -> DispatchResult<String> {
        let value = self
            .call("scheduler.get_device_status", &[Value::from(device)])
            .await
            .map_err(|e| DispatchError::Unavailable(e.to_string()))?;

        value
            .member("status")
            .and_then(Value::as_str)
            .or_else(|| value.as_str())
            .map(str::to_string)
            .ok_or_else(|| {
                DispatchError::Unavailable(format!("No status for device {}: {:?}", device, value))
            })
    }
}

/// Builds the XML-RPC endpoint from the configured server address.
///
/// Only scheme, host and port of `server` are kept; the path is always
/// `/RPC2`. Credentials are not embedded as URL userinfo: [`XmlRpcClient`]
/// sends them in a Basic `Authorization` header, so the token never shows up
/// where the endpoint is logged.
pub fn rpc_endpoint(server: &str) -> DispatchResult<Url> {
    let parsed = Url::parse(server)
        .map_err(|e| DispatchError::Unavailable(format!("Invalid server {}: {}", server, e)))?;
    let host = parsed
        .host_str()
        .ok_or_else(|| DispatchError::Unavailable(format!("No host in server {}", server)))?;

    let endpoint = match parsed.port() {
        Some(port) => format!("{}://{}:{}/RPC2", parsed.scheme(), host, port),
        None => format!("{}://{}/RPC2", parsed.scheme(), host),
    };
    Url::parse(&endpoint)
        .map_err(|e| DispatchError::Unavailable(format!("Invalid server {}: {}", server, e)))
}

/// Renders the result URL of every job id.
pub fn result_urls(web_ui_address: &str, response: SubmitResponse) -> Vec<String> {
    let base = web_ui_address.trim_end_matches('/');
    response
        .into_ids()
        .into_iter()
        .map(|id| format!("{}/scheduler/job/{}", base, id))
        .collect()
}

/// Dispatcher and device status provider backed by a LAVA scheduler.
pub struct LavaDispatcher<C = XmlRpcClient> {
    client: C,
    web_ui_address: String,
    device_suffix: String,
}

impl LavaDispatcher<XmlRpcClient> {
    /// Creates the backend, expanding `${VAR}` references in the credentials.
    pub fn from_config(config: &LavaDispatchConfig) -> Result<Self> {
        let username = shellexpand::env(&config.username)
            .context("Failed to expand LAVA username")?
            .into_owned();
        let token = shellexpand::env(&config.token)
            .context("Failed to expand LAVA token")?
            .into_owned();
        let endpoint = rpc_endpoint(&config.server)?;

        debug!("LAVA endpoint: {}", endpoint);

        let client = XmlRpcClient::new(
            endpoint,
            username,
            token,
            Duration::from_secs(config.timeout_secs),
        )
        .context("Failed to create XML-RPC client")?;

        Ok(Self::with_client(
            client,
            &config.web_ui_address,
            &config.device_suffix,
        ))
    }
}

impl<C: SchedulerClient> LavaDispatcher<C> {
    pub fn with_client(client: C, web_ui_address: &str, device_suffix: &str) -> Self {
        Self {
            client,
            web_ui_address: web_ui_address.to_string(),
            device_suffix: device_suffix.to_string(),
        }
    }

    /// Scheduler device name of `board`.
    pub fn device_name(&self, board: &Board) -> String {
        format!("{}{}", board.id, self.device_suffix)
    }
}

#[async_trait]
impl<C: SchedulerClient> Dispatcher for LavaDispatcher<C> {
    fn name(&self) -> &'static str {
        "lava"
    }

    async fn write(&self, _board: &Board, name: &str, job: &Job) -> DispatchResult<Vec<String>> {
        let definition = job.render()?;
        debug!("  Submitting {}", name);
        let response = self.client.submit_job(&definition).await?;
        Ok(result_urls(&self.web_ui_address, response))
    }
}

#[async_trait]
impl<C: SchedulerClient> DeviceStatusProvider for LavaDispatcher<C> {
    async fn device_status(&self, board: &Board) -> DeviceResult<DeviceStatus> {
        let device = self.device_name(board);
        let status = self
            .client
            .get_device_status(&device)
            .await
            .map_err(|e| DeviceError::Query(format!("{}: {}", device, e)))?;
        debug!("Device {} reports status {}", device, status);
        Ok(DeviceStatus::from_remote(&status))
    }
}
