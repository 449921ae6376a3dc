//! Response envelope shared by every endpoint.

use serde::Serialize;

const ACK_OK: u8 = 0;
const ACK_ERROR: u8 = 1;

/// `{ack, data?, message?}`: `ack` is 0 on success and 1 on failure.
#[derive(Debug, Serialize)]
pub struct Envelope<T> {
    pub ack: u8,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl<T> Envelope<T> {
    /// Successful response carrying data.
    pub fn ok(data: T) -> Self {
        Self {
            ack: ACK_OK,
            data: Some(data),
            message: None,
        }
    }

    /// Attaches a human-readable message.
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

impl Envelope<()> {
    /// Successful response with only a message.
    pub fn message(message: impl Into<String>) -> Self {
        Self {
            ack: ACK_OK,
            data: None,
            message: Some(message.into()),
        }
    }

    /// Failed response.
    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            ack: ACK_ERROR,
            data: None,
            message: Some(message.into()),
        }
    }
}
