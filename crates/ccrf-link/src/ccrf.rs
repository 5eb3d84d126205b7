//! High-level device façade.
//!
//! `Ccrf` wraps either a directly attached link engine or a proxy-client
//! connection to a daemon owning the link; every operation behaves the same
//! against both. Unsolicited traffic lands in per-kind subscription queues
//! created here, so subscriptions survive a link reopen.

use crate::device::{self, DeviceSpec};
use crate::error::{Error, Result};
use crate::link::{Handlers, Link, LinkConfig, REOPEN_DELAY, Transaction};
use crate::proxy::{ProxyClient, ProxyServer};
use crate::stats::{Stats, StatsSnapshot};
use ccrf_proto::proxy::{Call, ReturnValue};
use ccrf_proto::wire::{
    self, Datagram, Event, FlashSections, MacDatagram, PeerTable, PingResult, Reply, Status,
    TrxnReply, code,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock, broadcast};
use tracing::{debug, info, warn};

/// Probe budget when resolving a `<cell>:<addr>` device spec.
const PROBE_TIMEOUT: Duration = Duration::from_secs(2);

enum Backend {
    /// The engine talking to the tty (or an attached transport). Swapped on
    /// reopen, hence the lock.
    Direct {
        link: RwLock<Link>,
        /// Path and baud for reopen; `None` for attached transports.
        tty: Option<String>,
    },
    /// Everything forwarded to a daemon over its local socket.
    Remote(ProxyClient),
}

struct CcrfInner {
    cfg: LinkConfig,
    handlers: Handlers,
    stats: Stats,
    backend: Backend,
    status_cache: Mutex<Option<Status>>,
    server: Mutex<Option<ProxyServer>>,
}

/// Handle on one Cloud Chaser device. Cheap to clone; all clones share the
/// same link and subscription queues.
#[derive(Clone)]
pub struct Ccrf {
    inner: Arc<CcrfInner>,
}

impl Ccrf {
    // -----------------------------------------------------------------------
    // Construction
    // -----------------------------------------------------------------------

    /// Open a device by spec string (see [`DeviceSpec`] for the grammar).
    pub async fn open(spec: &str) -> Result<Ccrf> {
        Ccrf::open_with_config(spec, LinkConfig::default()).await
    }

    /// Open with explicit engine tunables.
    pub async fn open_with_config(spec: &str, cfg: LinkConfig) -> Result<Ccrf> {
        let spec: DeviceSpec = spec.parse()?;
        Ccrf::open_spec(&spec, cfg).await
    }

    /// Open a parsed device spec.
    pub async fn open_spec(spec: &DeviceSpec, cfg: LinkConfig) -> Result<Ccrf> {
        match spec {
            DeviceSpec::Unix { socket, tty: None } => Ccrf::open_remote(socket, cfg).await,
            DeviceSpec::Unix {
                socket,
                tty: Some(tty_spec),
            } => {
                let inner_spec: DeviceSpec = tty_spec.parse()?;
                let ccrf = Box::pin(Ccrf::open_spec(&inner_spec, cfg)).await?;
                ccrf.serve(socket).await?;
                Ok(ccrf)
            }
            DeviceSpec::CellAddr { cell, addr } => Ccrf::probe(*cell, *addr, cfg).await,
            other => {
                let path = device::resolve_static(other)?
                    .ok_or_else(|| Error::DeviceNotMatched(other.to_string()))?;
                Ccrf::open_path(&path, cfg).await
            }
        }
    }

    async fn open_path(path: &str, cfg: LinkConfig) -> Result<Ccrf> {
        let handlers = Handlers::new(cfg.subscription_capacity);
        let stats = Stats::new();
        let link = Link::open_tty(path, cfg.clone(), handlers.clone(), stats.clone()).await?;
        Ok(Ccrf {
            inner: Arc::new(CcrfInner {
                cfg,
                handlers,
                stats,
                backend: Backend::Direct {
                    link: RwLock::new(link),
                    tty: Some(path.to_owned()),
                },
                status_cache: Mutex::new(None),
                server: Mutex::new(None),
            }),
        })
    }

    async fn open_remote(socket: &str, cfg: LinkConfig) -> Result<Ccrf> {
        let handlers = Handlers::new(cfg.subscription_capacity);
        let stats = Stats::new();
        let client = ProxyClient::connect(socket, handlers.clone(), stats.clone()).await?;
        Ok(Ccrf {
            inner: Arc::new(CcrfInner {
                cfg,
                handlers,
                stats,
                backend: Backend::Remote(client),
                status_cache: Mutex::new(None),
                server: Mutex::new(None),
            }),
        })
    }

    /// Probe enumerated candidates for one whose status matches.
    async fn probe(cell: Option<u8>, addr: u16, cfg: LinkConfig) -> Result<Ccrf> {
        let spec = DeviceSpec::CellAddr { cell, addr };
        for candidate in device::enumerate()? {
            let ccrf = match Ccrf::open_path(&candidate.path, cfg.clone()).await {
                Ok(ccrf) => ccrf,
                Err(e) => {
                    debug!(path = %candidate.path, error = %e, "probe open failed");
                    continue;
                }
            };
            match tokio::time::timeout(PROBE_TIMEOUT, ccrf.status()).await {
                Ok(Ok(status))
                    if status.addr == addr && cell.is_none_or(|c| c == status.cell) =>
                {
                    info!(path = %candidate.path, addr = format_args!("0x{addr:04X}"), "device matched");
                    return Ok(ccrf);
                }
                Ok(Ok(_)) | Ok(Err(_)) | Err(_) => {
                    debug!(path = %candidate.path, "probe mismatch");
                    ccrf.close().await;
                }
            }
        }
        Err(Error::DeviceNotMatched(spec.to_string()))
    }

    /// Run the engine over an arbitrary byte transport (tests, emulation).
    pub fn attach<T>(transport: T, cfg: LinkConfig) -> Ccrf
    where
        T: tokio::io::AsyncRead + tokio::io::AsyncWrite + Send + 'static,
    {
        let handlers = Handlers::new(cfg.subscription_capacity);
        let stats = Stats::new();
        let link = Link::attach(transport, cfg.clone(), handlers.clone(), stats.clone());
        Ccrf {
            inner: Arc::new(CcrfInner {
                cfg,
                handlers,
                stats,
                backend: Backend::Direct {
                    link: RwLock::new(link),
                    tty: None,
                },
                status_cache: Mutex::new(None),
                server: Mutex::new(None),
            }),
        }
    }

    /// Start serving this device to proxy clients on a local socket.
    pub async fn serve(&self, socket: &str) -> Result<()> {
        let server = ProxyServer::bind(socket, self.clone()).await?;
        *self.inner.server.lock().await = Some(server);
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    /// Close the link (and the proxy server, when serving). Idempotent.
    pub async fn close(&self) {
        if let Some(server) = self.inner.server.lock().await.take() {
            server.close().await;
        }
        match &self.inner.backend {
            Backend::Direct { link, .. } => link.read().await.close().await,
            Backend::Remote(client) => client.close().await,
        }
        *self.inner.status_cache.lock().await = None;
    }

    /// Close, wait for the device to re-enumerate, open the same tty again.
    pub async fn reopen(&self) -> Result<()> {
        let Backend::Direct { link, tty } = &self.inner.backend else {
            return Err(Error::NotDirect("reopen"));
        };
        let Some(path) = tty.clone() else {
            return Err(Error::NotDirect("reopen of an attached transport"));
        };
        link.read().await.close().await;
        *self.inner.status_cache.lock().await = None;
        tokio::time::sleep(REOPEN_DELAY).await;
        let fresh = Link::open_tty(
            &path,
            self.inner.cfg.clone(),
            self.inner.handlers.clone(),
            self.inner.stats.clone(),
        )
        .await?;
        *link.write().await = fresh;
        Ok(())
    }

    /// Reboot the local device, then reopen (or just close).
    pub async fn reset(&self, reopen: bool) -> Result<()> {
        self.reboot(wire::NET_ADDR_INVL).await?;
        if reopen {
            self.reopen().await
        } else {
            self.close().await;
            Ok(())
        }
    }

    async fn link(&self) -> Result<Link> {
        match &self.inner.backend {
            Backend::Direct { link, .. } => Ok(link.read().await.clone()),
            Backend::Remote(_) => Err(Error::NotDirect("raw link access")),
        }
    }

    async fn call_remote(&self, call: Call) -> Result<ReturnValue> {
        match &self.inner.backend {
            Backend::Remote(client) => client.call(call).await,
            Backend::Direct { .. } => Err(Error::NotDirect("proxy call")),
        }
    }

    fn is_remote(&self) -> bool {
        matches!(self.inner.backend, Backend::Remote(_))
    }

    // -----------------------------------------------------------------------
    // Status and addressing
    // -----------------------------------------------------------------------

    /// Fetch the device status (and refresh the addr/cell cache).
    pub async fn status(&self) -> Result<Status> {
        let status = if self.is_remote() {
            match self.call_remote(Call::Status).await? {
                ReturnValue::Status(status) => status,
                _ => return Err(Error::UnexpectedReply("status")),
            }
        } else {
            let reply = self
                .link()
                .await?
                .request(code::STATUS, Vec::new())
                .await?;
            match reply {
                Reply::Status(status) => status,
                _ => return Err(Error::UnexpectedReply("status")),
            }
        };
        *self.inner.status_cache.lock().await = Some(status.clone());
        Ok(status)
    }

    /// The device network address, served from cache when warm.
    pub async fn addr(&self) -> Result<u16> {
        if let Some(status) = self.inner.status_cache.lock().await.as_ref() {
            return Ok(status.addr);
        }
        Ok(self.status().await?.addr)
    }

    /// The device cell id, served from cache when warm.
    pub async fn cell(&self) -> Result<u8> {
        if let Some(status) = self.inner.status_cache.lock().await.as_ref() {
            return Ok(status.cell);
        }
        Ok(self.status().await?.cell)
    }

    /// Change the device address. Returns the resulting value (0 on error).
    pub async fn addr_set(&self, orig: u16, addr: u16) -> Result<u32> {
        let value = if self.is_remote() {
            match self.call_remote(Call::AddrSet { orig, addr }).await? {
                ReturnValue::Config(v) => v,
                _ => return Err(Error::UnexpectedReply("config")),
            }
        } else {
            self.config(wire::encode_config_addr(orig, addr)).await?
        };
        *self.inner.status_cache.lock().await = None;
        Ok(value)
    }

    /// Change the cell of the node at `addr`. Returns the resulting value.
    pub async fn cell_set(&self, addr: u16, orig: u8, cell: u8) -> Result<u32> {
        let value = if self.is_remote() {
            match self.call_remote(Call::CellSet { addr, orig, cell }).await? {
                ReturnValue::Config(v) => v,
                _ => return Err(Error::UnexpectedReply("config")),
            }
        } else {
            self.config(wire::encode_config_cell(addr, orig, cell)).await?
        };
        *self.inner.status_cache.lock().await = None;
        Ok(value)
    }

    async fn config(&self, body: Vec<u8>) -> Result<u32> {
        let reply = self
            .link()
            .await?
            .request(code::CONFIG_RSP, body)
            .await?;
        match reply {
            Reply::ConfigVal(v) => Ok(v),
            _ => Err(Error::UnexpectedReply("config")),
        }
    }

    // -----------------------------------------------------------------------
    // Datagrams, messages, transactions
    // -----------------------------------------------------------------------

    /// Send a datagram. `mesg` requests a MAC-level ACK; `wait` blocks for
    /// the TX result and returns the ACKed packet count.
    pub async fn send(
        &self,
        addr: u16,
        port: u16,
        typ: u8,
        data: &[u8],
        mesg: bool,
        wait: bool,
    ) -> Result<Option<u16>> {
        check_path(port, typ)?;
        check_size(data)?;
        if self.is_remote() {
            let ret = self
                .call_remote(Call::Send {
                    addr,
                    port,
                    typ,
                    data: data.to_vec(),
                    mesg,
                    wait,
                })
                .await?;
            return match ret {
                ReturnValue::Acked(count) => Ok(count),
                _ => Err(Error::UnexpectedReply("send")),
            };
        }
        let link = self.link().await?;
        let mesg_flag = if mesg { wire::SEND_FLAG_MESG } else { 0 };
        if wait {
            let body = wire::encode_send(addr, port, typ, mesg_flag | wire::SEND_FLAG_RSLT, data);
            match link.request(code::SEND_DONE, body).await? {
                Reply::SendDone(acked) => Ok(Some(acked)),
                _ => Err(Error::UnexpectedReply("send_done")),
            }
        } else {
            link.write_frame(code::SEND, wire::encode_send(addr, port, typ, mesg_flag, data))
                .await?;
            Ok(None)
        }
    }

    /// Send an ACKed message and return the ACKed packet count.
    pub async fn mesg(&self, addr: u16, port: u16, typ: u8, data: &[u8]) -> Result<u16> {
        let acked = self.send(addr, port, typ, data, true, true).await?;
        acked.ok_or(Error::UnexpectedReply("send_done"))
    }

    /// Complete a transaction from the receiving side (one ACKed reply).
    pub async fn resp(&self, addr: u16, port: u16, typ: u8, data: &[u8]) -> Result<()> {
        check_path(port, typ)?;
        check_size(data)?;
        if self.is_remote() {
            self.call_remote(Call::Resp {
                addr,
                port,
                typ,
                data: data.to_vec(),
            })
            .await?;
            return Ok(());
        }
        self.link()
            .await?
            .write_frame(
                code::RESP,
                wire::encode_send(addr, port, typ, wire::SEND_FLAG_MESG, data),
            )
            .await
    }

    /// Transact with a peer (or broadcast): one ACKed request, then an
    /// iterator of replies ending at the firmware's end-of-batch marker.
    pub async fn trxn(
        &self,
        addr: u16,
        port: u16,
        typ: u8,
        wait_ms: u32,
        data: &[u8],
    ) -> Result<TrxnIter> {
        check_path(port, typ)?;
        check_size(data)?;
        if wait_ms == 0 {
            return Err(Error::InvalidArgument("trxn wait must be nonzero".to_owned()));
        }
        if self.is_remote() {
            let ret = self
                .call_remote(Call::Trxn {
                    addr,
                    port,
                    typ,
                    wait_ms,
                    data: data.to_vec(),
                })
                .await?;
            return match ret {
                ReturnValue::Trxn(replies) => Ok(TrxnIter {
                    inner: TrxnIterInner::Collected(replies.into_iter()),
                }),
                _ => Err(Error::UnexpectedReply("trxn")),
            };
        }
        let trxn = self
            .link()
            .await?
            .transact(
                code::TRXN,
                wire::encode_trxn(addr, port, typ, wait_ms, data),
            )
            .await?;
        Ok(TrxnIter {
            inner: TrxnIterInner::Direct(trxn),
        })
    }

    /// Send a MAC-layer datagram (`MAC_DGRM` / `MAC_MESG` / `MAC_STRM`).
    /// With `wait`, blocks for TX completion and returns the TX count.
    pub async fn send_mac(
        &self,
        typ: u8,
        dest: u16,
        data: &[u8],
        addr: u16,
        wait: bool,
    ) -> Result<Option<u32>> {
        check_size(data)?;
        if self.is_remote() {
            let ret = self
                .call_remote(Call::SendMac {
                    typ,
                    dest,
                    addr,
                    data: data.to_vec(),
                    wait,
                })
                .await?;
            return match ret {
                ReturnValue::TxCount(count) => Ok(count),
                _ => Err(Error::UnexpectedReply("mac_send")),
            };
        }
        let link = self.link().await?;
        if wait {
            let body = wire::encode_mac_send(typ, wire::MAC_SEND_WAIT, addr, dest, data);
            match link.request(code::MAC_SEND, body).await? {
                Reply::MacSendDone(count) => Ok(Some(count)),
                _ => Err(Error::UnexpectedReply("mac_send")),
            }
        } else {
            link.write_frame(code::MAC_SEND, wire::encode_mac_send(typ, 0, addr, dest, data))
                .await?;
            Ok(None)
        }
    }

    // -----------------------------------------------------------------------
    // Queries and controls
    // -----------------------------------------------------------------------

    /// Fetch the peer table.
    pub async fn peers(&self) -> Result<PeerTable> {
        if self.is_remote() {
            return match self.call_remote(Call::Peers).await? {
                ReturnValue::Peers(table) => Ok(table),
                _ => Err(Error::UnexpectedReply("peer")),
            };
        }
        let reply = self
            .link()
            .await?
            .request(code::PEER, Vec::new())
            .await?;
        match reply {
            Reply::Peers(table) => Ok(table),
            _ => Err(Error::UnexpectedReply("peer")),
        }
    }

    /// Ping a peer.
    pub async fn ping(
        &self,
        addr: u16,
        timeout_ms: u32,
        size: u16,
        size_reply: u16,
        stream: bool,
    ) -> Result<PingResult> {
        if self.is_remote() {
            let ret = self
                .call_remote(Call::Ping {
                    addr,
                    timeout_ms,
                    size,
                    size_reply,
                    stream,
                })
                .await?;
            return match ret {
                ReturnValue::Ping(result) => Ok(result),
                _ => Err(Error::UnexpectedReply("ping")),
            };
        }
        let body = wire::encode_ping(addr, timeout_ms, size, size_reply, stream);
        match self.link().await?.request(code::PING, body).await? {
            Reply::Ping(result) => Ok(result),
            _ => Err(Error::UnexpectedReply("ping")),
        }
    }

    /// Ask the device to echo `data` (reply arrives via the passive handler).
    pub async fn echo(&self, data: &[u8]) -> Result<()> {
        if self.is_remote() {
            self.call_remote(Call::Echo {
                data: data.to_vec(),
            })
            .await?;
            return Ok(());
        }
        self.link()
            .await?
            .write_frame(code::ECHO, wire::encode_echo(data))
            .await
    }

    /// Flash the onboard LEDs in a rainbow pattern.
    pub async fn rainbow(&self) -> Result<()> {
        if self.is_remote() {
            self.call_remote(Call::Rainbow).await?;
            return Ok(());
        }
        self.link()
            .await?
            .write_frame(code::RAINBOW, wire::encode_rainbow(wire::NET_ADDR_INVL))
            .await
    }

    /// Set LED colors on the node at `addr` (`mask` selects LEDs).
    pub async fn led(&self, addr: u16, mask: u8, colors: &[(u8, u8, u8)]) -> Result<()> {
        if self.is_remote() {
            self.call_remote(Call::Led {
                addr,
                mask,
                colors: colors.to_vec(),
            })
            .await?;
            return Ok(());
        }
        self.link()
            .await?
            .write_frame(code::LED, wire::encode_led(addr, mask, colors))
            .await
    }

    /// Write raw bytes to the device's auxiliary UART.
    pub async fn uart(&self, data: &[u8]) -> Result<()> {
        if self.is_remote() {
            self.call_remote(Call::Uart {
                data: data.to_vec(),
            })
            .await?;
            return Ok(());
        }
        self.link().await?.write_frame(code::UART, data.to_vec()).await
    }

    /// Flash a firmware image. Returns the device's status code.
    pub async fn update(&self, sections: FlashSections, image: &[u8]) -> Result<i32> {
        if u64::from(sections.total) != sections.sum() {
            return Err(Error::InvalidArgument(
                "flash size total does not match section sizes".to_owned(),
            ));
        }
        if self.is_remote() {
            let ret = self
                .call_remote(Call::Update {
                    sections,
                    image: image.to_vec(),
                })
                .await?;
            return match ret {
                ReturnValue::FlashStat(status) => Ok(status),
                _ => Err(Error::UnexpectedReply("flash")),
            };
        }
        let body = wire::encode_flash(&sections, image);
        match self.link().await?.request(code::FLASH, body).await? {
            Reply::FlashStat(status) => Ok(status),
            _ => Err(Error::UnexpectedReply("flash")),
        }
    }

    /// Push the staged firmware image to a peer over the air.
    pub async fn fota(&self, addr: u16) -> Result<u8> {
        if self.is_remote() {
            return match self.call_remote(Call::Fota { addr }).await? {
                ReturnValue::FotaStat(sent) => Ok(sent),
                _ => Err(Error::UnexpectedReply("fota")),
            };
        }
        let body = wire::encode_fota(addr);
        match self.link().await?.request(code::FOTA, body).await? {
            Reply::FotaStat(sent) => Ok(sent),
            _ => Err(Error::UnexpectedReply("fota")),
        }
    }

    /// Reboot a node (`NET_ADDR_INVL` for the local device). No reply.
    pub async fn reboot(&self, addr: u16) -> Result<()> {
        if self.is_remote() {
            self.call_remote(Call::Reboot { addr }).await?;
            return Ok(());
        }
        self.link()
            .await?
            .write_frame(code::REBOOT, wire::encode_reboot(addr))
            .await
    }

    /// Inject a bare resync sequence into the output stream.
    pub async fn flush(&self) -> Result<()> {
        if self.is_remote() {
            self.call_remote(Call::Flush).await?;
            return Ok(());
        }
        self.link().await?.write_raw(vec![0, 0]).await
    }

    // -----------------------------------------------------------------------
    // Subscriptions
    // -----------------------------------------------------------------------

    /// Subscribe to datagram receptions.
    pub fn recv(&self) -> Subscription<Datagram> {
        Subscription::new("recv", self.inner.handlers.recv.subscribe())
    }

    /// Subscribe to MAC-layer receptions.
    pub fn recv_mac(&self) -> Subscription<MacDatagram> {
        Subscription::new("mac_recv", self.inner.handlers.mac.subscribe())
    }

    /// Subscribe to link events.
    pub fn evnt(&self) -> Subscription<Event> {
        Subscription::new("evnt", self.inner.handlers.evnt.subscribe())
    }

    /// Subscribe to auxiliary UART output.
    pub fn uart_recv(&self) -> Subscription<Vec<u8>> {
        Subscription::new("uart", self.inner.handlers.uart.subscribe())
    }

    pub(crate) fn handlers(&self) -> &Handlers {
        &self.inner.handlers
    }

    /// Link traffic counters.
    pub fn stats(&self) -> &Stats {
        &self.inner.stats
    }

    /// Snapshot and reset the traffic counters.
    pub fn stats_take(&self) -> StatsSnapshot {
        self.inner.stats.take()
    }

    /// Render a build-date epoch as `YYYY-MM-DD.HH:MM` (UTC).
    pub fn format_date(epoch: u32) -> String {
        let days = i64::from(epoch / 86_400);
        let secs = epoch % 86_400;
        // Civil-from-days, Gregorian calendar.
        let z = days + 719_468;
        let era = z / 146_097;
        let doe = z - era * 146_097;
        let yoe = (doe - doe / 1460 + doe / 36_524 - doe / 146_096) / 365;
        let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
        let mp = (5 * doy + 2) / 153;
        let day = doy - (153 * mp + 2) / 5 + 1;
        let month = if mp < 10 { mp + 3 } else { mp - 9 };
        let year = yoe + era * 400 + i64::from(month <= 2);
        format!(
            "{:04}-{:02}-{:02}.{:02}:{:02}",
            year,
            month,
            day,
            secs / 3600,
            (secs % 3600) / 60
        )
    }

    /// One-line status summary.
    pub fn format_status(status: &Status) -> String {
        format!(
            "Cloud Chaser {:08x}.{} {:016X}:{:02X}:{:04X} up={}s rx={}/{}/{} tx={}/{}/{}",
            status.version,
            Ccrf::format_date(status.date),
            status.serial,
            status.cell,
            status.addr,
            status.uptime / 1000,
            status.net_stat.recv.count,
            status.net_stat.recv.size,
            status.net_stat.recv.error,
            status.net_stat.send.count,
            status.net_stat.send.size,
            status.net_stat.send.error,
        )
    }
}

// ---------------------------------------------------------------------------
// Argument validation
// ---------------------------------------------------------------------------

fn check_path(port: u16, typ: u8) -> Result<()> {
    if port & wire::NET_PORT_MASK != port {
        return Err(Error::InvalidArgument(format!(
            "port {port} uses restricted bits"
        )));
    }
    if typ & wire::NET_TYPE_MASK != typ {
        return Err(Error::InvalidArgument(format!(
            "type {typ} uses restricted bits"
        )));
    }
    Ok(())
}

fn check_size(data: &[u8]) -> Result<()> {
    if data.len() > wire::NET_SEND_MAX {
        return Err(Error::InvalidArgument(format!(
            "payload of {} bytes exceeds the send limit",
            data.len()
        )));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Subscription
// ---------------------------------------------------------------------------

/// Receiver over one subscription queue. A lagging receiver loses the
/// oldest items (overwrite policy) and keeps going.
pub struct Subscription<T> {
    name: &'static str,
    rx: broadcast::Receiver<T>,
}

impl<T: Clone> Subscription<T> {
    fn new(name: &'static str, rx: broadcast::Receiver<T>) -> Subscription<T> {
        Subscription { name, rx }
    }

    /// Next item; `None` once the link is gone.
    pub async fn next(&mut self) -> Option<T> {
        loop {
            match self.rx.recv().await {
                Ok(item) => return Some(item),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(queue = self.name, dropped = n, "subscription lagged");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Next item within `timeout` (`None` timeout waits forever).
    pub async fn next_timeout(&mut self, timeout: Option<Duration>) -> Option<T> {
        match timeout {
            None => self.next().await,
            Some(dur) => tokio::time::timeout(dur, self.next()).await.ok().flatten(),
        }
    }
}

impl Subscription<Datagram> {
    /// Next datagram passing `filter`, within `timeout` overall.
    pub async fn next_matching(
        &mut self,
        filter: &RecvFilter,
        timeout: Option<Duration>,
    ) -> Option<Datagram> {
        let deadline = timeout.map(|d| tokio::time::Instant::now() + d);
        loop {
            let remaining = match deadline {
                None => None,
                Some(at) => Some(at.saturating_duration_since(tokio::time::Instant::now())),
            };
            if remaining.as_ref().is_some_and(|d| d.is_zero()) {
                return None;
            }
            match self.next_timeout(remaining).await {
                Some(d) if filter.matches(&d) => return Some(d),
                Some(_) => continue,
                None => return None,
            }
        }
    }
}

/// Predicates applied to received datagrams.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecvFilter {
    pub addr: Option<u16>,
    pub dest: Option<u16>,
    pub port: Option<u16>,
    pub typ: Option<u8>,
}

impl RecvFilter {
    pub fn matches(&self, d: &Datagram) -> bool {
        self.addr.is_none_or(|v| v == d.addr)
            && self.dest.is_none_or(|v| v == d.dest)
            && self.port.is_none_or(|v| v == d.port)
            && self.typ.is_none_or(|v| v == d.typ)
    }
}

// ---------------------------------------------------------------------------
// Transaction iterator
// ---------------------------------------------------------------------------

enum TrxnIterInner {
    Direct(Transaction),
    /// Remote transactions arrive fully collected by the server.
    Collected(std::vec::IntoIter<TrxnReply>),
}

/// Lazy sequence of transaction replies.
pub struct TrxnIter {
    inner: TrxnIterInner,
}

impl TrxnIter {
    /// Next reply, or `None` at the end of the batch.
    pub async fn next(&mut self) -> Result<Option<TrxnReply>> {
        match &mut self.inner {
            TrxnIterInner::Direct(trxn) => trxn.next().await,
            TrxnIterInner::Collected(iter) => Ok(iter.next()),
        }
    }

    /// Drain the remaining replies into a vector.
    pub async fn collect(self) -> Result<Vec<TrxnReply>> {
        match self.inner {
            TrxnIterInner::Direct(trxn) => trxn.collect().await,
            TrxnIterInner::Collected(iter) => Ok(iter.collect()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn path_validation() {
        assert!(check_path(101, 1).is_ok());
        assert!(check_path(0x3FF, 0xF).is_ok());
        assert!(check_path(0x400, 0).is_err());
        assert!(check_path(2048, 0).is_err());
        assert!(check_path(0, 0x10).is_err());
    }

    #[test]
    fn filter_matching() {
        let d = Datagram {
            addr: 1,
            dest: 2,
            port: 3,
            typ: 4,
            seqn: 0,
            rssi: 0,
            lqi: 0,
            data: vec![],
        };
        assert!(RecvFilter::default().matches(&d));
        assert!(
            RecvFilter {
                port: Some(3),
                typ: Some(4),
                ..RecvFilter::default()
            }
            .matches(&d)
        );
        assert!(
            !RecvFilter {
                port: Some(9),
                ..RecvFilter::default()
            }
            .matches(&d)
        );
    }

    #[test]
    fn format_status_shape() {
        let status = Status {
            version: 0xABCD_0123,
            date: 1_700_000_000,
            serial: 0x0123_4567_89AB_CDEF,
            uptime: 5000,
            addr: 0x4BC9,
            cell: 1,
            rdid: 0,
            phy_su: 0,
            mac_su_rx: 0,
            heap_free: 0,
            heap_usage: 0,
            phy_stat: Default::default(),
            mac_stat: Default::default(),
            net_stat: Default::default(),
            chan: vec![],
        };
        let line = Ccrf::format_status(&status);
        assert!(line.starts_with("Cloud Chaser abcd0123.2023-11-14.22:13 "));
        assert!(line.contains(":01:4BC9"));
        assert!(line.contains("up=5s"));
    }

    #[test]
    fn format_date_renders_civil_time() {
        assert_eq!(Ccrf::format_date(0), "1970-01-01.00:00");
        assert_eq!(Ccrf::format_date(1_700_000_000), "2023-11-14.22:13");
        // Leap day.
        assert_eq!(Ccrf::format_date(1_709_164_800), "2024-02-29.00:00");
    }
}
