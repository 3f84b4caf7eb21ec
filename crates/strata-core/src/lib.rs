pub mod config;
pub mod error;
pub mod event;
pub mod traits;
pub mod transport;
pub mod types;

pub use config::AppConfig;
pub use error::{Result, StrataError};
pub use event::{DedupHandler, EventBus};
pub use traits::{handler_fn, Agent, EventHandler, GraphBackend, Transport};
pub use transport::{BroadcastTransport, InProcessTransport};
pub use types::*;
