use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub mod event;
pub mod pubsub;

pub use event::EventChannel;
pub use pubsub::RedisChannel;

/// A message on the progress channel. Every message names the client
/// connection it is meant for.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ChannelMessage {
    /// Human-readable status text, including failure traces.
    Message { message: String, socketid: String },
    /// A result payload, already encoded as a string.
    WebResult { web_result: String, socketid: String },
}

impl ChannelMessage {
    pub fn message(socketid: &str, message: impl Into<String>) -> Self {
        ChannelMessage::Message {
            message: message.into(),
            socketid: socketid.to_string(),
        }
    }

    pub fn web_result(socketid: &str, web_result: impl Into<String>) -> Self {
        ChannelMessage::WebResult {
            web_result: web_result.into(),
            socketid: socketid.to_string(),
        }
    }

    pub fn socketid(&self) -> &str {
        match self {
            ChannelMessage::Message { socketid, .. } | ChannelMessage::WebResult { socketid, .. } => socketid,
        }
    }

    pub fn text(&self) -> Option<&str> {
        match self {
            ChannelMessage::Message { message, .. } => Some(message),
            ChannelMessage::WebResult { .. } => None,
        }
    }

    pub fn result(&self) -> Option<&str> {
        match self {
            ChannelMessage::WebResult { web_result, .. } => Some(web_result),
            ChannelMessage::Message { .. } => None,
        }
    }
}

/// Publish side of the pub/sub transport. One handle is shared by every job
/// in the process.
#[async_trait]
pub trait ProgressChannel: Send + Sync {
    async fn publish(&self, message: &ChannelMessage) -> Result<()>;
}

/// A channel bound to one client connection for the duration of a job.
pub struct Progress<'a> {
    channel: &'a dyn ProgressChannel,
    socketid: &'a str,
}

impl<'a> Progress<'a> {
    pub fn new(channel: &'a dyn ProgressChannel, socketid: &'a str) -> Self {
        Self { channel, socketid }
    }

    pub async fn message(&self, text: impl Into<String>) -> Result<()> {
        self.channel
            .publish(&ChannelMessage::message(self.socketid, text))
            .await
    }

    /// Publishes `payload` JSON-encoded into the `web_result` string.
    pub async fn json_result<T: Serialize + Sync + ?Sized>(&self, payload: &T) -> Result<()> {
        let encoded = serde_json::to_string(payload)?;
        self.channel
            .publish(&ChannelMessage::web_result(self.socketid, encoded))
            .await
    }

    /// Publishes `value` verbatim as the `web_result` string.
    pub async fn raw_result(&self, value: impl Into<String>) -> Result<()> {
        self.channel
            .publish(&ChannelMessage::web_result(self.socketid, value))
            .await
    }
}
