//! The mock device implementation.

use ccrf_proto::wire::{
    self, ChanInfo, Datagram, Event, PHY_CHAN_COUNT, PeerTable, PingResult, StatSet, Status,
    TrxnReply, code,
};
use ccrf_proto::frame;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, AtomicU16, Ordering};
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
use tokio::sync::mpsc;
use tracing::debug;

/// A plausible status snapshot for tests to assert against.
pub fn sample_status() -> Status {
    Status {
        version: 0x0102_0304,
        date: 1_700_000_000,
        serial: 0xDEAD_BEEF_CAFE_0001,
        uptime: 60_000,
        addr: 0x4BC9,
        cell: 0x01,
        rdid: 2,
        phy_su: 4096,
        mac_su_rx: 2048,
        heap_free: 30_000,
        heap_usage: 12_000,
        phy_stat: StatSet::default(),
        mac_stat: StatSet::default(),
        net_stat: StatSet::default(),
        chan: (0..PHY_CHAN_COUNT)
            .map(|i| ChanInfo {
                id: i as u8,
                freq: 902_000_000 + i as u32 * 500_000,
                hop_id: i as u16,
                rssi: -50,
                rssi_prev: -51,
            })
            .collect(),
    }
}

/// Scripted behavior of one mock device.
#[derive(Debug, Clone)]
pub struct MockConfig {
    pub status: Status,
    /// ACKed-packet count reported by `send_done`.
    pub acked: u16,
    /// TX count reported by a waited `mac_send`.
    pub mac_tx_count: u32,
    /// Replies emitted for each transaction request (terminator appended
    /// automatically).
    pub trxn_replies: Vec<TrxnReply>,
    /// Peer records returned by `peer`.
    pub peers: PeerTable,
    /// Status value for `flash` replies.
    pub flash_status: i32,
}

impl Default for MockConfig {
    fn default() -> Self {
        let status = sample_status();
        MockConfig {
            peers: PeerTable {
                addr: status.addr,
                time: 1000,
                peers: Vec::new(),
            },
            status,
            acked: 1,
            mac_tx_count: 1,
            trxn_replies: Vec::new(),
            flash_status: 0,
        }
    }
}

/// Handle on a running mock device.
pub struct MockDevice {
    inject_tx: mpsc::UnboundedSender<(u8, Vec<u8>)>,
    addr: Arc<AtomicU16>,
    cell: Arc<AtomicU8>,
    _task: tokio::task::JoinHandle<()>,
}

impl MockDevice {
    /// Start a mock with default behavior. Returns the handle and the
    /// host-side transport to attach a link engine to.
    pub fn start() -> (MockDevice, DuplexStream) {
        MockDevice::with_config(MockConfig::default())
    }

    /// Start a mock with explicit behavior.
    pub fn with_config(cfg: MockConfig) -> (MockDevice, DuplexStream) {
        MockDevice::spawn(cfg, None, None)
    }

    /// Start two mocks wired back to back: a datagram sent through one is
    /// delivered as a reception by the other.
    pub fn pair(
        cfg_a: MockConfig,
        cfg_b: MockConfig,
    ) -> ((MockDevice, DuplexStream), (MockDevice, DuplexStream)) {
        let (a_tx, a_rx) = mpsc::unbounded_channel();
        let (b_tx, b_rx) = mpsc::unbounded_channel();
        let a = MockDevice::spawn(cfg_a, Some(b_tx), Some(a_rx));
        let b = MockDevice::spawn(cfg_b, Some(a_tx), Some(b_rx));
        (a, b)
    }

    fn spawn(
        cfg: MockConfig,
        peer_tx: Option<mpsc::UnboundedSender<Datagram>>,
        peer_rx: Option<mpsc::UnboundedReceiver<Datagram>>,
    ) -> (MockDevice, DuplexStream) {
        let (host, device) = tokio::io::duplex(1 << 16);
        let (inject_tx, inject_rx) = mpsc::unbounded_channel();
        let addr = Arc::new(AtomicU16::new(cfg.status.addr));
        let cell = Arc::new(AtomicU8::new(cfg.status.cell));
        let task = tokio::spawn(device_task(
            device,
            cfg,
            Arc::clone(&addr),
            Arc::clone(&cell),
            inject_rx,
            peer_tx,
            peer_rx,
        ));
        (
            MockDevice {
                inject_tx,
                addr,
                cell,
                _task: task,
            },
            host,
        )
    }

    /// Current device address (mutated by config commands).
    pub fn addr(&self) -> u16 {
        self.addr.load(Ordering::SeqCst)
    }

    /// Current cell id (mutated by config commands).
    pub fn cell(&self) -> u8 {
        self.cell.load(Ordering::SeqCst)
    }

    /// Emit an arbitrary frame toward the host.
    pub fn inject(&self, code: u8, body: Vec<u8>) {
        let _ = self.inject_tx.send((code, body));
    }

    /// Emit an unsolicited datagram reception.
    pub fn inject_recv(&self, d: &Datagram) {
        self.inject(code::RECV, wire::encode_datagram(d));
    }

    /// Emit an unsolicited link event.
    pub fn inject_event(&self, e: &Event) {
        self.inject(code::EVNT, wire::encode_event(e));
    }
}

#[allow(clippy::too_many_lines)]
async fn device_task(
    mut io: DuplexStream,
    cfg: MockConfig,
    addr: Arc<AtomicU16>,
    cell: Arc<AtomicU8>,
    mut inject_rx: mpsc::UnboundedReceiver<(u8, Vec<u8>)>,
    peer_tx: Option<mpsc::UnboundedSender<Datagram>>,
    mut peer_rx: Option<mpsc::UnboundedReceiver<Datagram>>,
) {
    let mut buf = vec![0u8; 1024];
    let mut pending: Vec<u8> = Vec::new();
    let mut seqn: u8 = 0;

    loop {
        tokio::select! {
            inject = inject_rx.recv() => {
                let Some((c, body)) = inject else { break };
                if emit(&mut io, c, &body).await.is_err() {
                    break;
                }
            }
            delivery = recv_from_peer(&mut peer_rx) => {
                let Some(d) = delivery else { break };
                if emit(&mut io, code::RECV, &wire::encode_datagram(&d)).await.is_err() {
                    break;
                }
            }
            read = io.read(&mut buf) => {
                let n = match read {
                    Ok(0) | Err(_) => break,
                    Ok(n) => n,
                };
                pending.extend_from_slice(&buf[..n]);
                while let Some(idx) = pending.iter().position(|&b| b == 0) {
                    let raw: Vec<u8> = pending.drain(..=idx).collect();
                    let raw = &raw[..raw.len() - 1];
                    if raw.is_empty() {
                        continue;
                    }
                    let Ok((c, body)) = frame::decode(raw) else {
                        debug!("mock: dropping malformed frame");
                        continue;
                    };
                    if handle(
                        &mut io, &cfg, &addr, &cell, &peer_tx, &mut seqn, c, &body,
                    )
                    .await
                    .is_err()
                    {
                        return;
                    }
                }
            }
        }
    }
}

async fn recv_from_peer(
    peer_rx: &mut Option<mpsc::UnboundedReceiver<Datagram>>,
) -> Option<Datagram> {
    match peer_rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

async fn emit(io: &mut DuplexStream, code: u8, body: &[u8]) -> std::io::Result<()> {
    let bytes = frame::encode(code, body)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e.to_string()))?;
    io.write_all(&bytes).await
}

#[allow(clippy::too_many_arguments)]
async fn handle(
    io: &mut DuplexStream,
    cfg: &MockConfig,
    addr: &AtomicU16,
    cell: &AtomicU8,
    peer_tx: &Option<mpsc::UnboundedSender<Datagram>>,
    seqn: &mut u8,
    code_in: u8,
    body: &[u8],
) -> std::io::Result<()> {
    match code_in {
        code::STATUS => {
            let mut status = cfg.status.clone();
            status.addr = addr.load(Ordering::SeqCst);
            status.cell = cell.load(Ordering::SeqCst);
            emit(io, code::STATUS, &wire::encode_status(&status)).await
        }
        code::ECHO => {
            let text = body.strip_suffix(&[0]).unwrap_or(body);
            emit(io, code::ECHO, text).await
        }
        code::SEND => {
            if body.len() < 6 {
                return Ok(());
            }
            let dest = u16::from_le_bytes([body[0], body[1]]);
            let port = u16::from_le_bytes([body[2], body[3]]);
            let typ = body[4];
            let flags = body[5];
            if let Some(tx) = peer_tx {
                *seqn = seqn.wrapping_add(1);
                let _ = tx.send(Datagram {
                    addr: addr.load(Ordering::SeqCst),
                    dest,
                    port,
                    typ,
                    seqn: *seqn,
                    rssi: -42,
                    lqi: 15,
                    data: body[6..].to_vec(),
                });
            }
            if flags & wire::SEND_FLAG_RSLT != 0 {
                emit(io, code::SEND_DONE, &wire::encode_send_done(cfg.acked)).await
            } else {
                Ok(())
            }
        }
        code::TRXN => {
            for reply in &cfg.trxn_replies {
                emit(io, code::TRXN, &wire::encode_trxn_reply(Some(reply))).await?;
            }
            emit(io, code::TRXN, &wire::encode_trxn_reply(None)).await
        }
        code::MAC_SEND => {
            let wait = body.len() > 1 && body[1] & wire::MAC_SEND_WAIT != 0;
            if wait {
                emit(
                    io,
                    code::MAC_SEND,
                    &wire::encode_mac_send_done(0, cfg.mac_tx_count),
                )
                .await
            } else {
                Ok(())
            }
        }
        code::PEER => {
            let mut table = cfg.peers.clone();
            table.addr = addr.load(Ordering::SeqCst);
            emit(io, code::PEER, &wire::encode_peer_table(&table)).await
        }
        code::PING => {
            let target = if body.len() >= 2 {
                u16::from_le_bytes([body[0], body[1]])
            } else {
                0
            };
            let result = PingResult {
                addr: target,
                tx_count: 1,
                rtt_usec: 1_000,
                locl: wire::LinkMeta { rssi: -48, lqi: 9 },
                peer: wire::LinkMeta { rssi: -52, lqi: 11 },
            };
            emit(io, code::PING, &wire::encode_ping_result(&result)).await
        }
        code::CONFIG => {
            if body.len() < 8 {
                return emit(io, code::CONFIG_RSP, &wire::encode_config_result(0)).await;
            }
            let id = u32::from_le_bytes([body[0], body[1], body[2], body[3]]);
            let value = match id {
                wire::CONFIG_ID_ADDR => {
                    let orig = u16::from_le_bytes([body[4], body[5]]);
                    let new = u16::from_le_bytes([body[6], body[7]]);
                    if orig == addr.load(Ordering::SeqCst) {
                        addr.store(new, Ordering::SeqCst);
                        u32::from(new)
                    } else {
                        0
                    }
                }
                wire::CONFIG_ID_CELL => {
                    let orig = body[6];
                    let new = body[7];
                    if orig == cell.load(Ordering::SeqCst) {
                        cell.store(new, Ordering::SeqCst);
                        u32::from(new)
                    } else {
                        0
                    }
                }
                _ => 0,
            };
            emit(io, code::CONFIG_RSP, &wire::encode_config_result(value)).await
        }
        code::FLASH => {
            emit(io, code::FLASH, &wire::encode_flash_status(cfg.flash_status)).await
        }
        code::FOTA => emit(io, code::FOTA, &wire::encode_fota_status(1)).await,
        code::UART => emit(io, code::UART, body).await,
        // Fire-and-forget controls: nothing to answer.
        code::REBOOT | code::LED | code::RAINBOW | code::RESP => Ok(()),
        other => {
            debug!(code = other, "mock: unhandled command");
            Ok(())
        }
    }
}
