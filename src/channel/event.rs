use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::broadcast;
use tracing::debug;

use super::{ChannelMessage, ProgressChannel};

/// In-process channel over a tokio broadcast. Publishing with no
/// subscribers drops the message, like pub/sub does.
#[derive(Clone)]
pub struct EventChannel {
    sender: broadcast::Sender<ChannelMessage>,
}

impl EventChannel {
    pub fn new(capacity: usize) -> (Self, broadcast::Receiver<ChannelMessage>) {
        let (sender, receiver) = broadcast::channel(capacity);
        (Self { sender }, receiver)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ChannelMessage> {
        self.sender.subscribe()
    }
}

#[async_trait]
impl ProgressChannel for EventChannel {
    async fn publish(&self, message: &ChannelMessage) -> Result<()> {
        if self.sender.send(message.clone()).is_err() {
            debug!(socketid = message.socketid(), "No subscribers, message dropped");
        }
        Ok(())
    }
}
