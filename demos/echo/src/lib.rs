//! Shared request/reply types for the echo demo's client and server bins.

use serde::{Deserialize, Serialize};

pub const ADDR: &str = "127.0.0.1:9010";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SumArgs {
    pub a: i32,
    pub b: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SumReply(pub i32);
