// ccrf-link: Transport and multiplexing engine for the Cloud Chaser board.
//
// Layering, bottom up: `rendezvous` pairs requests with replies per command
// code; `registry` declares the command catalogue's routing; `link` runs the
// reader/writer/dispatcher workers over the serial transport; `ccrf` is the
// public façade; `proxy` shares one link across processes over a local
// socket; `device` resolves device specs; `stats` counts traffic.

mod ccrf;
pub mod device;
mod error;
mod link;
mod proxy;
mod registry;
mod rendezvous;
pub mod stats;

pub use ccrf::{Ccrf, RecvFilter, Subscription, TrxnIter};
pub use device::{DeviceInfo, DeviceSpec, enumerate};
pub use error::{Error, Result};
pub use link::{DEFAULT_BAUD, LinkConfig, REOPEN_DELAY};
pub use stats::{Stats, StatsSnapshot};
