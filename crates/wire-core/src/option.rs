//! The handshake record (`Option`) exchanged once at the start of every
//! connection, before any framed message.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

use crate::error::WireError;

/// Fixed 32-bit sentinel identifying this protocol. Both peers must agree on
/// this literal; a connection whose handshake carries a different value is
/// rejected by the server before any further frame is read.
pub const DEFAULT_MAGIC_NUMBER: u32 = 0x3f5c_2952;

/// Default registered codec identifier, used when a caller supplies no
/// `Option` or leaves `codec_type` empty.
pub const DEFAULT_CODEC_TYPE: &str = "postcard";

/// The handshake record. Serialized once, at the very start of a connection,
/// as a single line of JSON — a self-delimiting text encoding independent of
/// whichever codec `codec_type` ends up selecting for the rest of the
/// connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RpcOption {
    pub magic_number: u32,
    pub codec_type: String,
    /// Client-side connect timeout. Zero means unbounded. Serialized as
    /// milliseconds on the wire.
    #[serde(with = "duration_millis")]
    pub connect_timeout: Duration,
    /// Server-side per-request processing cap. Zero means unbounded.
    /// Serialized as milliseconds on the wire.
    #[serde(with = "duration_millis")]
    pub handle_timeout: Duration,
}

impl Default for RpcOption {
    fn default() -> Self {
        RpcOption {
            magic_number: DEFAULT_MAGIC_NUMBER,
            codec_type: DEFAULT_CODEC_TYPE.to_string(),
            connect_timeout: Duration::ZERO,
            handle_timeout: Duration::ZERO,
        }
    }
}

impl RpcOption {
    /// Normalize a caller-supplied handshake record the way the dialer does:
    /// force the magic number to the one this implementation speaks, and
    /// fall back to the default codec if none was named.
    pub fn normalized(mut self) -> Self {
        self.magic_number = DEFAULT_MAGIC_NUMBER;
        if self.codec_type.is_empty() {
            self.codec_type = DEFAULT_CODEC_TYPE.to_string();
        }
        self
    }

    /// Write this handshake record as a single newline-terminated JSON line.
    pub async fn write_to<W: tokio::io::AsyncWrite + Unpin>(
        &self,
        writer: &mut W,
    ) -> Result<(), WireError> {
        let mut line =
            serde_json::to_vec(self).map_err(|e| WireError::handshake(e.to_string()))?;
        line.push(b'\n');
        writer.write_all(&line).await?;
        writer.flush().await?;
        Ok(())
    }

    /// Read a single newline-terminated JSON line and decode it as a
    /// handshake record.
    pub async fn read_from<R: tokio::io::AsyncRead + Unpin>(
        reader: &mut BufReader<R>,
    ) -> Result<Self, WireError> {
        let mut line = String::new();
        let n = reader
            .read_line(&mut line)
            .await
            .map_err(|e| WireError::transport(e.to_string()))?;
        if n == 0 {
            return Err(WireError::transport("connection closed before handshake"));
        }
        serde_json::from_str(line.trim_end()).map_err(|e| WireError::handshake(e.to_string()))
    }
}

mod duration_millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        (d.as_millis() as u64).serialize(s)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let millis = u64::deserialize(d)?;
        Ok(Duration::from_millis(millis))
    }
}
