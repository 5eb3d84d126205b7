// Seed scenario: a frame full of zeros and long runs, fed one byte at a
// time, reassembles into exactly one dispatched frame.

use ccrf_io::{Ccrf, LinkConfig, frame, wire};
use std::time::Duration;
use tokio::io::AsyncWriteExt;

#[tokio::test]
async fn byte_by_byte_feed_yields_one_frame() {
    let (host, mut device) = tokio::io::duplex(1 << 16);
    let ccrf = Ccrf::attach(host, LinkConfig::default());
    let mut sub = ccrf.recv();

    // 1200-byte payload alternating zeros and long non-zero runs.
    let payload: Vec<u8> = b"\x00\x00\x01".repeat(400);
    let datagram = wire::Datagram {
        addr: 0x0002,
        dest: 0x4BC9,
        port: 7,
        typ: 2,
        seqn: 1,
        rssi: -50,
        lqi: 10,
        data: payload.clone(),
    };
    let bytes = frame::encode(wire::code::RECV, &wire::encode_datagram(&datagram)).unwrap();

    for byte in &bytes {
        device.write_all(std::slice::from_ref(byte)).await.unwrap();
    }

    let got = sub
        .next_timeout(Some(Duration::from_secs(2)))
        .await
        .expect("one reassembled frame");
    assert_eq!(got.data, payload);

    // Exactly one: no torn or duplicate frames follow.
    assert!(
        sub.next_timeout(Some(Duration::from_millis(100)))
            .await
            .is_none()
    );

    ccrf.close().await;
}
