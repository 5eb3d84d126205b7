// Seed scenario: status round trip through a mock device.

use ccrf_io::{Ccrf, LinkConfig};
use ccrf_io::wire::PHY_CHAN_COUNT;
use ccrf_test_utils::{MockConfig, MockDevice, sample_status};

#[tokio::test]
async fn status_round_trip() {
    let (_mock, host) = MockDevice::with_config(MockConfig::default());
    let ccrf = Ccrf::attach(host, LinkConfig::default());

    let status = ccrf.status().await.expect("status");
    let expected = sample_status();

    assert_eq!(status.version, 0x0102_0304);
    assert_eq!(status.serial, 0xDEAD_BEEF_CAFE_0001);
    assert_eq!(status.addr, 0x4BC9);
    assert_eq!(status.cell, 0x01);
    assert_eq!(status.chan.len(), PHY_CHAN_COUNT);
    assert_eq!(status, expected);

    // The formatted one-liner carries the identity fields and renders the
    // build date as civil time, not a raw epoch integer.
    let line = Ccrf::format_status(&status);
    assert!(line.contains("DEADBEEFCAFE0001:01:4BC9"));
    assert!(line.contains(".2023-11-14.22:13 "), "line: {line}");

    ccrf.close().await;
}
