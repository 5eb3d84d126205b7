// ccrf-proto: Wire protocol for the Cloud Chaser serial link.
//
// Three layers, bottom up:
//   - `cobs`:  consistent-overhead byte stuffing (zero-free frames)
//   - `frame`: tag-byte framing (3-bit protocol marker + 5-bit command code)
//   - `wire`:  the command catalogue — per-command body layouts and codecs
//
// `proxy` defines the schema of the local-socket protocol spoken between a
// daemon owning the serial link and its clients.

pub mod cobs;
pub mod frame;
pub mod proxy;
pub mod wire;

pub use frame::FrameError;
pub use wire::{Reply, WireError};
