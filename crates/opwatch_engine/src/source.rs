use eventsource_stream::Eventsource;
use futures_util::StreamExt;
use opwatch_core::{StatusRecord, TaskStatus};
use reqwest::header::ACCEPT;
use reqwest::StatusCode;
use url::Url;

use crate::{
    ActiveOperation, CancelReply, FailureKind, FrameStream, MonitorSettings, RawFrame,
    TransportError,
};

/// Backend endpoints a monitor talks to.
#[async_trait::async_trait]
pub trait StatusSource: Send + Sync {
    /// One pull query. Unknown ids come back as a `not_found` record, not an error.
    async fn fetch_status(
        &self,
        kind: &str,
        operation_id: &str,
    ) -> Result<StatusRecord, TransportError>;

    /// Opens the push subscription for an operation.
    async fn open_stream(&self, kind: &str, operation_id: &str)
        -> Result<FrameStream, TransportError>;

    async fn cancel(&self, kind: &str, operation_id: &str) -> Result<CancelReply, TransportError>;

    /// The task currently registered for `kind`, if the server knows one.
    async fn current(&self, kind: &str) -> Result<Option<ActiveOperation>, TransportError>;
}

#[derive(Debug, Clone)]
pub struct ReqwestStatusSource {
    settings: MonitorSettings,
    client: reqwest::Client,
    stream_client: reqwest::Client,
}

impl ReqwestStatusSource {
    pub fn new(settings: MonitorSettings) -> Result<Self, TransportError> {
        Url::parse(&settings.base_url)
            .map_err(|err| TransportError::new(FailureKind::InvalidUrl, err.to_string()))?;
        let client = reqwest::Client::builder()
            .connect_timeout(settings.connect_timeout)
            .timeout(settings.request_timeout)
            .build()
            .map_err(|err| TransportError::new(FailureKind::Network, err.to_string()))?;
        // A total timeout would cut long-lived event streams.
        let stream_client = reqwest::Client::builder()
            .connect_timeout(settings.connect_timeout)
            .build()
            .map_err(|err| TransportError::new(FailureKind::Network, err.to_string()))?;

        Ok(Self {
            settings,
            client,
            stream_client,
        })
    }

    pub fn settings(&self) -> &MonitorSettings {
        &self.settings
    }

    fn endpoint(
        &self,
        template: &str,
        kind: &str,
        operation_id: Option<&str>,
    ) -> Result<Url, TransportError> {
        build_endpoint(&self.settings.base_url, template, kind, operation_id)
    }
}

/// Resolves an endpoint template against the base url.
pub fn build_endpoint(
    base_url: &str,
    template: &str,
    kind: &str,
    operation_id: Option<&str>,
) -> Result<Url, TransportError> {
    let mut url = Url::parse(base_url)
        .map_err(|err| TransportError::new(FailureKind::InvalidUrl, err.to_string()))?;
    {
        let mut segments = url.path_segments_mut().map_err(|_| {
            TransportError::new(FailureKind::InvalidUrl, "base url cannot carry a path")
        })?;
        segments.pop_if_empty();
        for segment in template.split('/').filter(|segment| !segment.is_empty()) {
            let value = match segment {
                "{kind}" => kind,
                "{id}" => operation_id.ok_or_else(|| {
                    TransportError::new(FailureKind::InvalidUrl, "template needs an operation id")
                })?,
                literal => literal,
            };
            segments.push(value);
        }
    }
    Ok(url)
}

#[async_trait::async_trait]
impl StatusSource for ReqwestStatusSource {
    async fn fetch_status(
        &self,
        kind: &str,
        operation_id: &str,
    ) -> Result<StatusRecord, TransportError> {
        let url = self.endpoint(&self.settings.endpoints.status, kind, Some(operation_id))?;
        let response = self
            .client
            .get(url)
            .header(ACCEPT, "application/json")
            .send()
            .await
            .map_err(map_reqwest_error)?;

        let status = response.status();
        let body = response.bytes().await.map_err(map_reqwest_error)?;

        if status == StatusCode::NOT_FOUND {
            // Registration may lag submission; some servers answer with a bare 404.
            return Ok(StatusRecord::parse_bytes(&body).unwrap_or_else(|_| {
                StatusRecord::not_found(format!("operation {operation_id} not found"))
            }));
        }
        if !status.is_success() {
            return Err(TransportError::new(
                FailureKind::HttpStatus(status.as_u16()),
                status.to_string(),
            ));
        }

        StatusRecord::parse_bytes(&body)
            .map_err(|err| TransportError::new(FailureKind::MalformedBody, err.to_string()))
    }

    async fn open_stream(
        &self,
        kind: &str,
        operation_id: &str,
    ) -> Result<FrameStream, TransportError> {
        let url = self.endpoint(&self.settings.endpoints.stream, kind, Some(operation_id))?;
        let response = self
            .stream_client
            .get(url)
            .header(ACCEPT, "text/event-stream")
            .send()
            .await
            .map_err(map_reqwest_error)?;

        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::new(
                FailureKind::HttpStatus(status.as_u16()),
                status.to_string(),
            ));
        }

        let frames = response.bytes_stream().eventsource().map(|item| match item {
            Ok(event) => Ok(RawFrame {
                event: event.event,
                data: event.data,
            }),
            Err(err) => Err(TransportError::new(FailureKind::Network, err.to_string())),
        });
        Ok(Box::pin(frames))
    }

    async fn cancel(&self, kind: &str, operation_id: &str) -> Result<CancelReply, TransportError> {
        let url = self.endpoint(&self.settings.endpoints.cancel, kind, Some(operation_id))?;
        let response = self
            .client
            .post(url)
            .header(ACCEPT, "application/json")
            .send()
            .await
            .map_err(map_reqwest_error)?;

        let status = response.status();
        let body = response.bytes().await.map_err(map_reqwest_error)?;
        let parsed = serde_json::from_slice::<CancelReply>(&body);
        if status.is_success() {
            return parsed
                .map_err(|err| TransportError::new(FailureKind::MalformedBody, err.to_string()));
        }
        match parsed {
            // Refusals often come back as 4xx with a regular reply body.
            Ok(reply) if !reply.success => Ok(reply),
            _ => Err(TransportError::new(
                FailureKind::HttpStatus(status.as_u16()),
                status.to_string(),
            )),
        }
    }

    async fn current(&self, kind: &str) -> Result<Option<ActiveOperation>, TransportError> {
        let url = self.endpoint(&self.settings.endpoints.current, kind, None)?;
        let response = self
            .client
            .get(url)
            .header(ACCEPT, "application/json")
            .send()
            .await
            .map_err(map_reqwest_error)?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND || status == StatusCode::NO_CONTENT {
            return Ok(None);
        }
        if !status.is_success() {
            return Err(TransportError::new(
                FailureKind::HttpStatus(status.as_u16()),
                status.to_string(),
            ));
        }

        let body = response.bytes().await.map_err(map_reqwest_error)?;
        parse_active_operation(&body)
    }
}

fn parse_active_operation(body: &[u8]) -> Result<Option<ActiveOperation>, TransportError> {
    let malformed = |message: String| TransportError::new(FailureKind::MalformedBody, message);
    let value: serde_json::Value =
        serde_json::from_slice(body).map_err(|err| malformed(err.to_string()))?;
    let operation_id = value
        .get("operation_id")
        .and_then(serde_json::Value::as_str)
        .map(ToOwned::to_owned);
    let record = StatusRecord::from_value(value).map_err(|err| malformed(err.to_string()))?;
    if record.status == TaskStatus::NotFound {
        return Ok(None);
    }
    let operation_id = operation_id.ok_or_else(|| malformed("missing operation_id".to_string()))?;
    Ok(Some(ActiveOperation {
        operation_id,
        record,
    }))
}

fn map_reqwest_error(err: reqwest::Error) -> TransportError {
    if err.is_timeout() {
        return TransportError::new(FailureKind::Timeout, err.to_string());
    }
    if err.is_decode() {
        return TransportError::new(FailureKind::MalformedBody, err.to_string());
    }
    TransportError::new(FailureKind::Network, err.to_string())
}
