//! Evaluation stream: wire events, the aggregator that folds them, and
//! session/reconnect bookkeeping.

pub mod aggregator;
pub mod events;
pub mod session;

pub use aggregator::{Effect, StreamAggregator};
pub use events::{EvaluationEvent, Notification, OutboundPayload};
pub use session::{ConnectionState, ReconnectWatch, SessionId};
