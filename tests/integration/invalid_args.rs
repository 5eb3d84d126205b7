// Seed scenario: argument validation fails fast, before any byte reaches
// the wire.

use ccrf_io::{Ccrf, Error, LinkConfig};
use std::time::Duration;
use tokio::io::AsyncReadExt;

#[tokio::test]
async fn invalid_port_writes_nothing() {
    let (host, mut device) = tokio::io::duplex(1024);
    let ccrf = Ccrf::attach(host, LinkConfig::default());

    let err = ccrf.send(1, 2048, 0, b"", false, false).await.unwrap_err();
    assert!(matches!(err, Error::InvalidArgument(_)));

    // Nothing may have been written to the transport.
    let mut buf = [0u8; 16];
    let read = tokio::time::timeout(Duration::from_millis(200), device.read(&mut buf)).await;
    assert!(read.is_err(), "unexpected bytes on the wire: {read:?}");

    ccrf.close().await;
}

#[tokio::test]
async fn invalid_type_rejected() {
    let (host, _device) = tokio::io::duplex(1024);
    let ccrf = Ccrf::attach(host, LinkConfig::default());
    assert!(matches!(
        ccrf.send(1, 0, 0x10, b"", false, false).await,
        Err(Error::InvalidArgument(_))
    ));
    ccrf.close().await;
}

#[tokio::test]
async fn trxn_requires_nonzero_wait() {
    let (host, _device) = tokio::io::duplex(1024);
    let ccrf = Ccrf::attach(host, LinkConfig::default());
    assert!(matches!(
        ccrf.trxn(1, 1, 0, 0, b"").await,
        Err(Error::InvalidArgument(_))
    ));
    ccrf.close().await;
}

#[tokio::test]
async fn trxn_type_uses_strict_four_bit_mask() {
    // Type 0x10 passes the 10-bit port mask but not the 4-bit type mask.
    let (host, _device) = tokio::io::duplex(1024);
    let ccrf = Ccrf::attach(host, LinkConfig::default());
    assert!(matches!(
        ccrf.trxn(1, 1, 0x10, 100, b"").await,
        Err(Error::InvalidArgument(_))
    ));
    ccrf.close().await;
}

#[tokio::test]
async fn oversized_payload_rejected() {
    let (host, _device) = tokio::io::duplex(1024);
    let ccrf = Ccrf::attach(host, LinkConfig::default());
    let big = vec![0u8; 0xFFFB];
    assert!(matches!(
        ccrf.send(1, 0, 0, &big, false, false).await,
        Err(Error::InvalidArgument(_))
    ));
    ccrf.close().await;
}
