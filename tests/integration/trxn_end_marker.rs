// Seed scenario: the empty-address transaction reply terminates the batch
// and is not yielded to the caller.

use ccrf_io::{Ccrf, LinkConfig};
use ccrf_io::wire::TrxnReply;
use ccrf_test_utils::{MockConfig, MockDevice};

#[tokio::test]
async fn terminator_ends_the_iterator() {
    let cfg = MockConfig {
        trxn_replies: vec![
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
        ],
        ..MockConfig::default()
    };
    let (_mock, host) = MockDevice::with_config(cfg);
    let ccrf = Ccrf::attach(host, LinkConfig::default());

    let mut iter = ccrf.trxn(0, 1, 0, 100, b"").await.expect("trxn");

    let first = iter.next().await.unwrap().expect("first reply");
    assert_eq!((first.addr, first.data.as_slice()), (1, b"a".as_slice()));
    let second = iter.next().await.unwrap().expect("second reply");
    assert_eq!((second.addr, second.data.as_slice()), (2, b"b".as_slice()));

    // The (addr == 0) reply must terminate, not surface.
    assert!(iter.next().await.unwrap().is_none());
    assert!(iter.next().await.unwrap().is_none());

    ccrf.close().await;
}

#[tokio::test]
async fn empty_batch_yields_nothing() {
    let (_mock, host) = MockDevice::with_config(MockConfig::default());
    let ccrf = Ccrf::attach(host, LinkConfig::default());

    let replies = ccrf
        .trxn(0, 1, 0, 100, b"")
        .await
        .expect("trxn")
        .collect()
        .await
        .expect("collect");
    assert!(replies.is_empty());

    ccrf.close().await;
}
