//! Contract entry points reachable outside the deterministic pipeline.

use std::fmt;

/// Why a contract is being invoked out of band.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EntryPoint {
    /// A previously scheduled timeout fired.
    Timed,

    /// A message arrived from a peer.
    P2pMessage,

    /// Another chain instance called this one during an atomic transaction.
    CrossChain,

    /// A contract re-entered itself through a named entry point.
    Named(String),
}

impl EntryPoint {
    /// Dispatch name handed to the contract engine.
    pub fn name(&self) -> &str {
        match self {
            EntryPoint::Timed => "eventual",
            EntryPoint::P2pMessage => "p2pmsg",
            EntryPoint::CrossChain => "crosschain",
            EntryPoint::Named(name) => name,
        }
    }
}

impl fmt::Display for EntryPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One entry-point invocation on a contract.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    /// Entry point to dispatch.
    pub entry_point: EntryPoint,

    /// Contract receiving the call.
    pub contract: String,

    /// Account or contract on whose behalf the call is made.
    pub caller: String,

    /// Opaque payload for the entry point.
    pub payload: Vec<u8>,

    /// Contracts the execution may touch.
    pub dependencies: Vec<String>,

    /// Background invocations are not tied to a user transaction.
    pub background: bool,
}

impl Invocation {
    /// Background invocation of `entry_point` on `contract`.
    pub fn background(
        entry_point: EntryPoint,
        contract: impl Into<String>,
        caller: impl Into<String>,
        payload: Vec<u8>,
    ) -> Self {
        Self {
            entry_point,
            contract: contract.into(),
            caller: caller.into(),
            payload,
            dependencies: Vec::new(),
            background: true,
        }
    }
}
