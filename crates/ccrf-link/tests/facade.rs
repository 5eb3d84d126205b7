// Façade behavior against a scripted mock device.

use ccrf_link::{Ccrf, Error, LinkConfig, RecvFilter};
use ccrf_proto::wire::{self, Datagram, Event, PeerAction, PeerInfo, TrxnReply};
use ccrf_test_utils::{MockConfig, MockDevice};
use std::time::Duration;

fn attach(cfg: MockConfig) -> (MockDevice, Ccrf) {
    let (mock, host) = MockDevice::with_config(cfg);
    (mock, Ccrf::attach(host, LinkConfig::default()))
}

#[tokio::test]
async fn status_fields_decode() {
    let (_mock, ccrf) = attach(MockConfig::default());
    let status = ccrf.status().await.unwrap();
    assert_eq!(status.version, 0x0102_0304);
    assert_eq!(status.serial, 0xDEAD_BEEF_CAFE_0001);
    assert_eq!(status.addr, 0x4BC9);
    assert_eq!(status.cell, 0x01);
    assert_eq!(status.chan.len(), wire::PHY_CHAN_COUNT);
    ccrf.close().await;
}

#[tokio::test]
async fn addr_and_cell_come_from_cache() {
    let (_mock, ccrf) = attach(MockConfig::default());
    assert_eq!(ccrf.addr().await.unwrap(), 0x4BC9);
    assert_eq!(ccrf.cell().await.unwrap(), 0x01);
    ccrf.close().await;
}

#[tokio::test]
async fn addr_set_applies_and_invalidates_cache() {
    let (mock, ccrf) = attach(MockConfig::default());
    assert_eq!(ccrf.addr().await.unwrap(), 0x4BC9);

    let result = ccrf.addr_set(0x4BC9, 0x1234).await.unwrap();
    assert_eq!(result, 0x1234);
    assert_eq!(mock.addr(), 0x1234);

    // Cache was invalidated: the next addr() sees the device's new state.
    assert_eq!(ccrf.addr().await.unwrap(), 0x1234);
    ccrf.close().await;
}

#[tokio::test]
async fn cell_set_round_trip() {
    let (mock, ccrf) = attach(MockConfig::default());
    let result = ccrf.cell_set(0x4BC9, 0x01, 0x02).await.unwrap();
    assert_eq!(result, 0x02);
    assert_eq!(mock.cell(), 0x02);
    assert_eq!(ccrf.cell().await.unwrap(), 0x02);
    ccrf.close().await;
}

#[tokio::test]
async fn mesg_returns_acked_count() {
    let (_mock, ccrf) = attach(MockConfig {
        acked: 3,
        ..MockConfig::default()
    });
    assert_eq!(ccrf.mesg(0x0002, 101, 1, b"hi").await.unwrap(), 3);
    ccrf.close().await;
}

#[tokio::test]
async fn plain_send_returns_immediately() {
    let (_mock, ccrf) = attach(MockConfig::default());
    assert_eq!(
        ccrf.send(0x0002, 101, 1, b"hi", false, false).await.unwrap(),
        None
    );
    ccrf.close().await;
}

#[tokio::test]
async fn trxn_yields_scripted_replies() {
    let replies = vec![
        TrxnReply {
            addr: 1,
            port: 1,
            typ: 0,
            data: b"a".to_vec(),
        },
        TrxnReply {
            addr: 2,
            port: 1,
            typ: 0,
            data: b"b".to_vec(),
        },
    ];
    let (_mock, ccrf) = attach(MockConfig {
        trxn_replies: replies.clone(),
        ..MockConfig::default()
    });

    let got = ccrf
        .trxn(0, 1, 0, 100, b"")
        .await
        .unwrap()
        .collect()
        .await
        .unwrap();
    assert_eq!(got, replies);
    ccrf.close().await;
}

#[tokio::test]
async fn concurrent_pings_each_get_their_reply() {
    let (_mock, ccrf) = attach(MockConfig::default());

    let mut tasks = Vec::new();
    for addr in 1u16..=8 {
        let ccrf = ccrf.clone();
        tasks.push(tokio::spawn(async move {
            let result = ccrf.ping(addr, 100, 0, 0, false).await?;
            Ok::<_, Error>((addr, result.addr))
        }));
    }
    for task in tasks {
        let (sent, got) = task.await.unwrap().unwrap();
        assert_eq!(sent, got, "reply paired with the wrong request");
    }
    ccrf.close().await;
}

#[tokio::test]
async fn peers_decode() {
    let mut cfg = MockConfig::default();
    cfg.peers.peers.push(PeerInfo {
        addr: 0x0002,
        rssi: -55,
        lqi: 30,
        last: 12,
        version: 0x0102_0304,
        date: 0,
        time: 0,
    });
    let (_mock, ccrf) = attach(cfg);

    let table = ccrf.peers().await.unwrap();
    assert_eq!(table.addr, 0x4BC9);
    assert_eq!(table.peers.len(), 1);
    assert_eq!(table.peers[0].addr, 0x0002);
    ccrf.close().await;
}

#[tokio::test]
async fn fota_reports_sent() {
    let (_mock, ccrf) = attach(MockConfig::default());
    assert_eq!(ccrf.fota(0x0002).await.unwrap(), 1);
    ccrf.close().await;
}

#[tokio::test]
async fn update_checks_section_sum() {
    let (_mock, ccrf) = attach(MockConfig::default());

    let bad = wire::FlashSections {
        header: 1,
        user: 0,
        code: 0,
        text: 0,
        data: 0,
        total: 5,
    };
    assert!(matches!(
        ccrf.update(bad, &[0; 5]).await,
        Err(Error::InvalidArgument(_))
    ));

    let good = wire::FlashSections {
        header: 0,
        user: 0,
        code: 0,
        text: 0,
        data: 5,
        total: 5,
    };
    assert_eq!(ccrf.update(good, &[0; 5]).await.unwrap(), 0);
    ccrf.close().await;
}

#[tokio::test]
async fn recv_subscription_filters() {
    let (mock, ccrf) = attach(MockConfig::default());
    let mut sub = ccrf.recv();

    let make = |port: u16, typ: u8, data: &[u8]| Datagram {
        addr: 0x0002,
        dest: 0x4BC9,
        port,
        typ,
        seqn: 0,
        rssi: -40,
        lqi: 20,
        data: data.to_vec(),
    };
    mock.inject_recv(&make(5, 0, b"skip"));
    mock.inject_recv(&make(101, 1, b"take"));

    let filter = RecvFilter {
        port: Some(101),
        typ: Some(1),
        ..RecvFilter::default()
    };
    let got = sub
        .next_matching(&filter, Some(Duration::from_secs(1)))
        .await
        .expect("matching datagram");
    assert_eq!(got.data, b"take");
    ccrf.close().await;
}

#[tokio::test]
async fn events_arrive_in_order() {
    let (mock, ccrf) = attach(MockConfig::default());
    let mut sub = ccrf.evnt();

    for (addr, action) in [(1u16, PeerAction::Set), (2, PeerAction::Exp), (3, PeerAction::Out)] {
        mock.inject_event(&Event::Peer { addr, action });
    }
    for expected in [1u16, 2, 3] {
        match sub.next_timeout(Some(Duration::from_secs(1))).await {
            Some(Event::Peer { addr, .. }) => assert_eq!(addr, expected),
            other => panic!("unexpected event: {other:?}"),
        }
    }
    ccrf.close().await;
}

#[tokio::test]
async fn uart_loops_back() {
    let (_mock, ccrf) = attach(MockConfig::default());
    let mut sub = ccrf.uart_recv();
    ccrf.uart(b"at+test").await.unwrap();
    assert_eq!(
        sub.next_timeout(Some(Duration::from_secs(1))).await,
        Some(b"at+test".to_vec())
    );
    ccrf.close().await;
}

#[tokio::test]
async fn invalid_arguments_fail_fast() {
    let (_mock, ccrf) = attach(MockConfig::default());

    assert!(matches!(
        ccrf.send(1, 2048, 0, b"", false, false).await,
        Err(Error::InvalidArgument(_))
    ));
    assert!(matches!(
        ccrf.send(1, 0, 16, b"", false, false).await,
        Err(Error::InvalidArgument(_))
    ));
    assert!(matches!(
        ccrf.trxn(1, 0, 0, 0, b"").await,
        Err(Error::InvalidArgument(_))
    ));
    ccrf.close().await;
}

#[tokio::test]
async fn operations_fail_after_close() {
    let (_mock, ccrf) = attach(MockConfig::default());
    ccrf.close().await;
    ccrf.close().await;
    assert!(matches!(ccrf.rainbow().await, Err(Error::Closed)));
}

#[tokio::test]
async fn request_timeout_is_honored() {
    // Attach to a dead transport: the request can never be answered.
    let (host, _device) = tokio::io::duplex(1024);
    let ccrf = Ccrf::attach(
        host,
        LinkConfig {
            request_timeout: Some(Duration::from_millis(100)),
            ..LinkConfig::default()
        },
    );
    assert!(matches!(ccrf.status().await, Err(Error::Timeout)));
    ccrf.close().await;
}
