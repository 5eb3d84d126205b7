// Seed scenario: one unsolicited frame reaches every proxy client exactly
// once, and façade calls behave identically over the proxy.

use ccrf_io::{Ccrf, LinkConfig, RecvFilter};
use ccrf_io::wire::Datagram;
use ccrf_test_utils::{MockConfig, MockDevice};
use std::time::Duration;

#[tokio::test]
async fn fanout_delivers_once_per_client() {
    let dir = tempfile::tempdir().unwrap();
    let socket = dir.path().join("ccrf.sock").to_str().unwrap().to_owned();

    let (mock, host) = MockDevice::with_config(MockConfig::default());
    let server = Ccrf::attach(host, LinkConfig::default());
    server.serve(&socket).await.expect("serve");

    let client_a = Ccrf::open(&format!("unix://{socket}")).await.expect("client a");
    let client_b = Ccrf::open(&format!("unix://{socket}")).await.expect("client b");

    let mut sub_a = client_a.recv();
    let mut sub_b = client_b.recv();
    tokio::time::sleep(Duration::from_millis(50)).await;

    let d = Datagram {
        addr: 0x0002,
        dest: 0x4BC9,
        port: 101,
        typ: 1,
        seqn: 1,
        rssi: -44,
        lqi: 21,
        data: b"broadcast".to_vec(),
    };
    mock.inject_recv(&d);

    for (name, sub) in [("a", &mut sub_a), ("b", &mut sub_b)] {
        let got = sub
            .next_matching(&RecvFilter::default(), Some(Duration::from_secs(1)))
            .await
            .unwrap_or_else(|| panic!("client {name} missed the datagram"));
        assert_eq!(got, d, "client {name} record differs");
        assert!(
            sub.next_timeout(Some(Duration::from_millis(100)))
                .await
                .is_none(),
            "client {name} received a duplicate"
        );
    }

    // Transparency: the same call yields the same result on both paths.
    let direct = server.status().await.expect("direct status");
    let remote = client_a.status().await.expect("remote status");
    assert_eq!(direct, remote);

    client_a.close().await;
    client_b.close().await;
    server.close().await;
}
