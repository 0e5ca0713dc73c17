//! Polling core for Transmission clients: keeps eventually consistent
//! mirrors of any number of remote daemons using plain request/response RPC.

pub mod config;
pub mod entry;
pub mod listeners;
pub mod manager;
pub mod model;
pub mod remote;
pub mod rpc;
pub mod session;
pub mod timers;
pub mod watch;

pub use config::{ConfigStore, PollIntervals, RpcConfig};
pub use entry::{AfterFetch, LoopKind, LoopState, ServerEntry};
pub use manager::{PollerError, PollingManager};
pub use remote::{ClientFactory, HttpClientFactory, RemoteClient};
pub use rpc::{RpcResult, TransmissionClient, TransmissionError};
