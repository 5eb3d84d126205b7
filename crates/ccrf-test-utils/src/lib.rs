// ccrf-test-utils: A scripted mock Cloud Chaser device.
//
// Speaks the real wire protocol (COBS frames, catalogue bodies) over an
// in-memory duplex stream, so the link engine under test runs unmodified.
// Behavior is configurable per test; frames can also be injected directly
// to exercise the unsolicited paths.

mod mock_device;

pub use mock_device::{MockConfig, MockDevice, sample_status};
