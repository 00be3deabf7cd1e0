//! Point-to-point tile transport between ranks

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::trace;

use crate::error::{TesseraError, TesseraResult};
use crate::tensor::storage::TileData;

/// Message carried by one send/receive pair.
///
/// A sender whose prerequisites failed still delivers `Aborted` so that the
/// matching receive never hangs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TransferMessage {
    Data(TileData),
    Aborted(String),
}

impl TransferMessage {
    pub fn encode(&self) -> TesseraResult<Vec<u8>> {
        bincode::serialize(self).map_err(|e| TesseraError::TransferFailure(e.to_string()))
    }

    pub fn decode(bytes: &[u8]) -> TesseraResult<Self> {
        bincode::deserialize(bytes).map_err(|e| TesseraError::TransferFailure(e.to_string()))
    }
}

/// Tag-matched byte transport. A payload sent under `(src, dst, tag)` is
/// delivered to the receive posted under the same key, in send order.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, src: usize, dst: usize, tag: u64, payload: Vec<u8>) -> TesseraResult<()>;

    async fn receive(&self, src: usize, dst: usize, tag: u64) -> TesseraResult<Vec<u8>>;

    fn name(&self) -> &'static str {
        "transport"
    }
}

type ChannelKey = (usize, usize, u64);

struct Channel {
    sender: UnboundedSender<Vec<u8>>,
    receiver: Arc<tokio::sync::Mutex<UnboundedReceiver<Vec<u8>>>>,
}

/// Transport for ranks hosted by one process, one unbounded channel per key
pub struct InProcessTransport {
    world_size: usize,
    channels: Mutex<HashMap<ChannelKey, Channel>>,
}

impl InProcessTransport {
    pub fn new(world_size: usize) -> Self {
        Self {
            world_size,
            channels: Mutex::new(HashMap::new()),
        }
    }

    pub fn world_size(&self) -> usize {
        self.world_size
    }

    fn check_ranks(&self, src: usize, dst: usize) -> TesseraResult<()> {
        for rank in [src, dst] {
            if rank >= self.world_size {
                return Err(TesseraError::TransferFailure(format!(
                    "rank {} outside world of size {}",
                    rank, self.world_size
                )));
            }
        }
        Ok(())
    }

    fn sender(&self, key: ChannelKey) -> UnboundedSender<Vec<u8>> {
        let mut channels = self.channels.lock();
        channels.entry(key).or_insert_with(Self::channel).sender.clone()
    }

    fn receiver(&self, key: ChannelKey) -> Arc<tokio::sync::Mutex<UnboundedReceiver<Vec<u8>>>> {
        let mut channels = self.channels.lock();
        channels.entry(key).or_insert_with(Self::channel).receiver.clone()
    }

    fn channel() -> Channel {
        let (sender, receiver) = mpsc::unbounded_channel();
        Channel {
            sender,
            receiver: Arc::new(tokio::sync::Mutex::new(receiver)),
        }
    }
}

#[async_trait]
impl Transport for InProcessTransport {
    async fn send(&self, src: usize, dst: usize, tag: u64, payload: Vec<u8>) -> TesseraResult<()> {
        self.check_ranks(src, dst)?;
        trace!(src, dst, tag, bytes = payload.len(), "send");
        self.sender((src, dst, tag))
            .send(payload)
            .map_err(|_| TesseraError::TransferFailure(format!("channel {}->{} tag {} closed", src, dst, tag)))
    }

    async fn receive(&self, src: usize, dst: usize, tag: u64) -> TesseraResult<Vec<u8>> {
        self.check_ranks(src, dst)?;
        let receiver = self.receiver((src, dst, tag));
        let mut receiver = receiver.lock().await;
        let payload = receiver.recv().await.ok_or_else(|| {
            TesseraError::TransferFailure(format!("channel {}->{} tag {} closed", src, dst, tag))
        })?;
        trace!(src, dst, tag, bytes = payload.len(), "receive");
        Ok(payload)
    }

    fn name(&self) -> &'static str {
        "in-process"
    }
}
