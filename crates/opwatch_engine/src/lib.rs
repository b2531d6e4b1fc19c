//! Opwatch engine: channels, monitor tasks and the monitor registry.
mod channel;
mod monitor;
mod observer;
mod registry;
mod settings;
mod source;
mod types;

pub use channel::{ChannelMetrics, PullChannel, PushChannel, PushEvent};
pub use monitor::{MonitorError, MonitorHandle};
pub use observer::{NullObserver, ProgressObserver};
pub use registry::MonitorRegistry;
pub use settings::{EndpointTemplates, MonitorSettings};
pub use source::{build_endpoint, ReqwestStatusSource, StatusSource};
pub use types::{ActiveOperation, CancelReply, FailureKind, FrameStream, RawFrame, TransportError};
