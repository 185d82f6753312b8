//! Shared vocabulary for polychain.
//!
//! Everything here is consumed by more than one layer:
//!
//! - [`EntryPoint`] / [`Invocation`]: how out-of-band work reaches a contract
//! - [`InvocationError`]: what a contract invocation reports back, including
//!   the shutdown sentinel that background paths treat as benign
//! - [`TimeoutKey`]: identity of a scheduled timeout
//! - [`ReplayInfoSource`]: where precomputed cross-chain replay data lives

mod error;
mod invocation;
mod request;
mod traits;

pub use error::InvocationError;
pub use invocation::{EntryPoint, Invocation};
pub use request::{RequestId, TimeoutKey};
pub use traits::ReplayInfoSource;
