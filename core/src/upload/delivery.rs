use crate::detection::Detection;
use crate::upload::buffer::UploadBatch;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(thiserror::Error, Debug)]
pub enum DeliveryError {
    #[error("connection failed: {0}")]
    Connection(String),
    #[error("request timed out after {0:?}")]
    Timeout(Duration),
    #[error("endpoint returned status {0}")]
    Status(u16),
    #[error("malformed response: {0}")]
    Response(String),
    #[error("no delivery endpoint configured")]
    Unconfigured,
}

/// Wire form of one detection event.
#[derive(Debug, Serialize)]
pub struct WireRecord<'a> {
    pub timestamp: f64,
    pub latitude: f64,
    pub longitude: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub altitude: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speed: Option<f64>,
    pub detections: &'a [Detection],
}

#[derive(Debug, Serialize)]
pub struct UploadRequest<'a> {
    pub detections: Vec<WireRecord<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_id: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ride_id: Option<i64>,
}

impl<'a> UploadRequest<'a> {
    pub fn from_batch(batch: &'a UploadBatch, device_id: Option<&'a str>, ride_id: Option<i64>) -> Self {
        let detections = batch
            .events()
            .iter()
            .map(|event| WireRecord {
                timestamp: event.position.timestamp,
                latitude: event.position.latitude,
                longitude: event.position.longitude,
                altitude: event.position.altitude,
                speed: event.speed,
                detections: &event.detections,
            })
            .collect();
        Self {
            detections,
            device_id,
            ride_id,
        }
    }
}

/// Body returned by the remote store on success.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliveryReceipt {
    pub ride_id: i64,
    pub count: usize,
}

/// Remote sink for upload batches. Implementations must bound every call
/// by a timeout.
pub trait DeliveryClient: Send {
    fn deliver(&self, batch: &UploadBatch, ride_id: Option<i64>) -> Result<DeliveryReceipt, DeliveryError>;
}

/// JSON-over-HTTP delivery to the `/upload` endpoint.
pub struct HttpDelivery {
    client: reqwest::blocking::Client,
    endpoint: String,
    device_id: Option<String>,
    timeout: Duration,
}

impl HttpDelivery {
    pub fn new(
        endpoint: impl Into<String>,
        timeout: Duration,
        device_id: Option<String>,
    ) -> Result<Self, DeliveryError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()
            .map_err(|e| DeliveryError::Connection(e.to_string()))?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
            device_id,
            timeout,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn classify(&self, err: reqwest::Error) -> DeliveryError {
        if err.is_timeout() {
            DeliveryError::Timeout(self.timeout)
        } else {
            DeliveryError::Connection(err.to_string())
        }
    }
}

impl DeliveryClient for HttpDelivery {
    fn deliver(&self, batch: &UploadBatch, ride_id: Option<i64>) -> Result<DeliveryReceipt, DeliveryError> {
        let request = UploadRequest::from_batch(batch, self.device_id.as_deref(), ride_id);
        let response = self
            .client
            .post(&self.endpoint)
            .json(&request)
            .send()
            .map_err(|e| self.classify(e))?;
        let status = response.status();
        if !status.is_success() {
            return Err(DeliveryError::Status(status.as_u16()));
        }
        response
            .json::<DeliveryReceipt>()
            .map_err(|e| DeliveryError::Response(e.to_string()))
    }
}

/// Used when no endpoint is configured: every batch goes to backup.
pub struct OfflineDelivery;

impl DeliveryClient for OfflineDelivery {
    fn deliver(&self, _batch: &UploadBatch, _ride_id: Option<i64>) -> Result<DeliveryReceipt, DeliveryError> {
        Err(DeliveryError::Unconfigured)
    }
}
