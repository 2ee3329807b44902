pub mod driver;
pub mod engine;
pub mod error;
pub mod lcore;
pub mod metrics;
pub mod port;
pub mod queue;
pub mod rtp;
pub mod rx_session;
pub mod scheduler;
pub mod shaper;
pub mod stats;
pub mod tx_session;

pub use driver::{NicDriver, UdpNicDriver};
pub use engine::{Engine, EngineParams, RxSessionHandle, SessionConfig, TxSessionHandle};
pub use error::{EngineError, Result};
pub use lcore::LcoreRegistry;
pub use port::{Port, PortState};
pub use queue::QueueAllocator;
pub use rtp::{PixelGroup, Rfc4175Payload, RowSegment, RtpHeader};
pub use rx_session::{DeliveredItem, DeliveryMode, RxSession};
pub use scheduler::{PollUnit, Scheduler, SchedulerSet};
pub use shaper::{PacingMode, RateLimiter};
pub use stats::{SessionCounters, SessionSnapshot, StatReporter, StatSnapshot};
pub use tx_session::TxSession;
