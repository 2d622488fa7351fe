//! Wire types, framing codec, and error taxonomy shared by the RPC client
//! and server halves of the runtime.
//!
//! See the crate README for an overview of what lives here versus in
//! `wire-client` and `wire-server`.

mod codec;
mod error;
mod header;
mod option;

pub use codec::{Codec, CodecKind, FrameReader, FrameWriter, lookup_codec};
pub use error::WireError;
pub use header::Header;
pub use option::{DEFAULT_CODEC_TYPE, DEFAULT_MAGIC_NUMBER, RpcOption};
