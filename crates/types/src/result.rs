//! Execution results and events produced by sub-transactions.

use serde::{Deserialize, Serialize};

/// Result code of a successful execution.
pub const CODE_OK: u32 = 0;

/// One key/value attribute of an [`Event`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventAttribute {
    pub key: String,
    pub value: String,
    /// Whether the attribute should be indexed by event consumers.
    pub index: bool,
}

/// A typed event emitted during execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub kind: String,
    pub attributes: Vec<EventAttribute>,
}

impl Event {
    /// Create an event with no attributes.
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            attributes: Vec::new(),
        }
    }

    /// Append an indexed attribute.
    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.push(EventAttribute {
            key: key.into(),
            value: value.into(),
            index: true,
        });
        self
    }
}

/// Outcome of executing one transaction through the deterministic pipeline.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecTxResult {
    /// Zero on success.
    pub code: u32,
    pub data: Vec<u8>,
    pub log: String,
    pub info: String,
    pub gas_wanted: i64,
    pub gas_used: i64,
    pub events: Vec<Event>,
    pub codespace: String,
}

impl ExecTxResult {
    /// Successful result carrying `data`.
    pub fn ok(data: Vec<u8>) -> Self {
        Self {
            data,
            ..Default::default()
        }
    }

    /// Failed result with the given code and log.
    pub fn failed(code: u32, log: impl Into<String>) -> Self {
        debug_assert_ne!(code, CODE_OK);
        Self {
            code,
            log: log.into(),
            ..Default::default()
        }
    }

    /// Whether the execution succeeded.
    pub fn is_ok(&self) -> bool {
        self.code == CODE_OK
    }
}
