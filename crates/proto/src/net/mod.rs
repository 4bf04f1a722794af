pub mod clock;
mod connection;
pub mod datagram;
mod driver;
mod error;
mod hostcache;
pub mod loopback;
mod manager;
mod schedule;
mod stats;
pub mod vcr;

pub use clock::{Clock, ManualClock, SystemClock};
pub use connection::{Connection, ConnectionId, ConnectionPool};
pub use datagram::DatagramDriver;
pub use driver::{Driver, DriverContext, LocalServerInfo, Received, SendStatus};
pub use error::NetError;
pub use hostcache::{HOST_CACHE_SIZE, HostCache, HostCacheEntry};
pub use loopback::{LOCAL_ADDRESS, LoopbackDriver};
pub use manager::NetManager;
pub use schedule::{PollProcedure, Schedule};
pub use stats::{DatagramStats, NetStats};
pub use vcr::{VcrError, VcrOp, VcrPlayback, VcrRecorder};
