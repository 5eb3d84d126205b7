// ccrf-io: Host-side toolkit for the Cloud Chaser sub-GHz RF board.
//
// Umbrella crate re-exporting the public surface of the workspace
// libraries so that consumers (and the integration suites under
// tests/integration/) can depend on a single crate.

pub use ccrf_link::{Ccrf, DeviceSpec, Error, LinkConfig, RecvFilter, Subscription};
pub use ccrf_proto::{cobs, frame, wire};
