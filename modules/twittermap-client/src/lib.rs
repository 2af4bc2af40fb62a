pub mod cache;
pub mod channel;
pub mod coordinator;
pub mod correlation;
pub mod error;
pub mod frame;
mod live_count;
pub mod model;
pub mod reconciler;
pub mod session;
pub mod state;
#[cfg(any(test, feature = "test-support"))]
pub mod testing;

pub use cache::{Partition, ResultCache, ScopeSignature};
pub use channel::{Channel, ChannelState, MemoryChannel};
pub use coordinator::{BatchCoordinator, Dispatch};
pub use correlation::{BatchShape, CorrelationKey};
pub use error::{ClientError, Result};
pub use frame::{BatchPayload, InboundFrame};
pub use model::{GeoAggregate, HashtagCount, ReportedError, ResultModel, TimeBucket};
pub use reconciler::{Outcome, ResponseReconciler};
pub use session::Session;
