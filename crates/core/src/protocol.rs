//! Wire protocol between the Broker and Worker Client over the local socket
//! (§6). Framing is length-prefixed `serde_json`: a 4-byte big-endian length
//! prefix followed by that many bytes of JSON. Kept in `strandflow-core` so
//! the broker and worker binaries share one definition instead of drifting.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::error::ProtocolError;
use crate::model::Job;

/// A worker's fetch criteria, sent once per idle cycle (§4.4 "Assumption on
/// client protocol"). `pool_size` plus `queue`/priority band form the
/// worker-config key the broker buckets waiting clients by.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WorkerRequest {
    pub worker_name: String,
    pub queue: String,
    pub min_priority: i32,
    pub max_priority: i32,
    pub pool_size: u32,
}

impl WorkerRequest {
    /// The bucket key `waiting_clients`/`prefetched_jobs` are keyed by
    /// (§4.4 State).
    pub fn worker_config_key(&self) -> String {
        format!("{}|{}|{}|{}", self.queue, self.min_priority, self.max_priority, self.pool_size)
    }
}

/// Broker → client message: either a locked job, or an instruction to shut
/// down cleanly (e.g. the broker is draining for a deploy).
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum BrokerMessage {
    Job(Job),
    Shutdown,
}

pub const MAX_FRAME_BYTES: u32 = 16 * 1024 * 1024;

/// Writes one length-prefixed JSON frame, bounded by `deadline` (§4.4 write
/// deadline / §5 cancellation).
pub async fn write_frame<W, T>(writer: &mut W, value: &T, deadline: std::time::Duration) -> Result<(), ProtocolError>
where
    W: AsyncWriteExt + Unpin,
    T: Serialize,
{
    let body = serde_json::to_vec(value)?;
    let len = body.len() as u32;

    tokio::time::timeout(deadline, async {
        writer.write_all(&len.to_be_bytes()).await?;
        writer.write_all(&body).await?;
        writer.flush().await?;
        Ok::<_, std::io::Error>(())
    })
    .await
    .map_err(|_| ProtocolError::WriteTimeout(deadline))??;

    Ok(())
}

/// Reads one length-prefixed JSON frame. Returns `Ok(None)` on clean EOF
/// before any bytes of a new frame arrive; a partial frame followed by EOF
/// is a framing error.
pub async fn read_frame<R, T>(reader: &mut R) -> Result<Option<T>, ProtocolError>
where
    R: AsyncReadExt + Unpin,
    T: for<'de> Deserialize<'de>,
{
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(ProtocolError::Io(e)),
    }

    let len = u32::from_be_bytes(len_buf);
    if len > MAX_FRAME_BYTES {
        return Err(ProtocolError::Framing(format!("frame of {len} bytes exceeds max {MAX_FRAME_BYTES}")));
    }

    let mut body = vec![0u8; len as usize];
    reader
        .read_exact(&mut body)
        .await
        .map_err(|e| match e.kind() {
            std::io::ErrorKind::UnexpectedEof => ProtocolError::Framing("truncated frame body".to_string()),
            _ => ProtocolError::Io(e),
        })?;

    let value = serde_json::from_slice(&body)?;
    Ok(Some(value))
}

/// Scalar values allowed in `worker_config` when transmitted as a loose map
/// rather than the typed `WorkerRequest` (kept for parity with the
/// generic `map<string, scalar>` framing called out in §6).
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ConfigScalar {
    Str(String),
    Int(i64),
    Bool(bool),
}

pub type WorkerConfigMap = HashMap<String, ConfigScalar>;
