// Seed scenario: a datagram sent by one node arrives at its loopback peer.

use ccrf_io::{Ccrf, LinkConfig, RecvFilter};
use ccrf_test_utils::{MockConfig, MockDevice};
use std::time::Duration;

#[tokio::test]
async fn send_reaches_peer_recv() {
    let mut cfg_b = MockConfig::default();
    cfg_b.status.addr = 0x0002;
    let ((_mock_a, host_a), (_mock_b, host_b)) = MockDevice::pair(MockConfig::default(), cfg_b);

    let a = Ccrf::attach(host_a, LinkConfig::default());
    let b = Ccrf::attach(host_b, LinkConfig::default());

    let mut sub = b.recv();

    a.send(0x0002, 101, 1, b"hi", false, false)
        .await
        .expect("send");

    let filter = RecvFilter {
        port: Some(101),
        typ: Some(1),
        ..RecvFilter::default()
    };
    let got = sub
        .next_matching(&filter, Some(Duration::from_secs(1)))
        .await
        .expect("datagram within 1s");

    assert_eq!(got.addr, 0x4BC9);
    assert_eq!(got.dest, 0x0002);
    assert_eq!(got.port, 101);
    assert_eq!(got.typ, 1);
    assert_eq!(got.data, b"hi");

    a.close().await;
    b.close().await;
}
