use std::io::Read;

use reqwest::blocking::{Client, RequestBuilder};
use reqwest::header::{HeaderValue, CONTENT_LENGTH, RANGE};
use reqwest::StatusCode;

use crate::config::EngineConfig;
use crate::error::{CoreError, CoreResult};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeResponse {
    pub status_code: u16,
    pub content_length: Option<u64>,
}

pub struct RangeResponse {
    pub status_code: u16,
    pub body: Box<dyn Read + Send>,
}

pub trait NetClient: Send + Sync {
    /// Metadata request used to learn the resource size.
    fn probe(&self, url: &str) -> CoreResult<ProbeResponse>;
    /// GET with `Range: bytes=start-end` (inclusive).
    fn fetch_range(&self, url: &str, start: u64, end: u64) -> CoreResult<RangeResponse>;
}

pub fn is_success(status_code: u16) -> bool {
    (200..300).contains(&status_code)
}

#[derive(Clone)]
pub struct ReqwestNetClient {
    probe_client: Client,
    transfer_client: Client,
}

impl ReqwestNetClient {
    pub fn new(config: &EngineConfig) -> CoreResult<Self> {
        let probe_client = Client::builder()
            .user_agent(config.user_agent.as_str())
            .connect_timeout(config.probe_timeout)
            .timeout(config.probe_timeout)
            .build()
            .map_err(|err| CoreError::Config(err.to_string()))?;
        let transfer_client = Client::builder()
            .user_agent(config.user_agent.as_str())
            .connect_timeout(config.probe_timeout)
            .timeout(config.read_timeout)
            .build()
            .map_err(|err| CoreError::Config(err.to_string()))?;
        Ok(Self {
            probe_client,
            transfer_client,
        })
    }

    fn send_probe(&self, request: RequestBuilder) -> CoreResult<ProbeResponse> {
        let resp = request
            .send()
            .map_err(|err| CoreError::Probe(err.to_string()))?;
        let content_length = resp
            .headers()
            .get(CONTENT_LENGTH)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.trim().parse::<u64>().ok());
        Ok(ProbeResponse {
            status_code: resp.status().as_u16(),
            content_length,
        })
    }
}

impl NetClient for ReqwestNetClient {
    fn probe(&self, url: &str) -> CoreResult<ProbeResponse> {
        let head = self.send_probe(self.probe_client.head(url))?;
        let head_refused = head.status_code == StatusCode::METHOD_NOT_ALLOWED.as_u16()
            || head.status_code == StatusCode::NOT_IMPLEMENTED.as_u16();
        if !head_refused {
            return Ok(head);
        }
        tracing::debug!(url, status = head.status_code, "HEAD refused, probing with GET");
        // headers only; the body is dropped unread
        self.send_probe(self.probe_client.get(url))
    }

    fn fetch_range(&self, url: &str, start: u64, end: u64) -> CoreResult<RangeResponse> {
        let range = HeaderValue::from_str(&format!("bytes={}-{}", start, end))
            .map_err(|err| CoreError::Transfer(err.to_string()))?;
        let resp = self
            .transfer_client
            .get(url)
            .header(RANGE, range)
            .send()
            .map_err(|err| CoreError::Transfer(err.to_string()))?;
        Ok(RangeResponse {
            status_code: resp.status().as_u16(),
            body: Box::new(resp),
        })
    }
}
