//! Proxy daemon: share one serial link between several processes.
//!
//! The server owns a direct [`Ccrf`] and listens on a unix stream socket.
//! Requests are length-delimited JSON records ([`ccrf_proto::proxy`]);
//! unsolicited decoded frames are broadcast to every connected client, so a
//! client's subscription queues behave exactly like a direct link's.
//! Server-side failures travel back as structured records and are re-raised
//! on the client; a dead socket surfaces as a clean error, never an exit.

use crate::ccrf::Ccrf;
use crate::error::{Error, Result};
use crate::link::Handlers;
use crate::stats::Stats;
use bytes::Bytes;
use ccrf_proto::proxy::{Call, ClientFrame, RemoteError, ReturnValue, ServerFrame};
use ccrf_proto::wire::Reply;
use futures_util::{SinkExt, StreamExt};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tokio::net::unix::OwnedWriteHalf;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{Mutex, broadcast, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_util::codec::{FramedRead, FramedWrite, LengthDelimitedCodec};
use tracing::{debug, info, warn};

/// Ring capacity of the per-server event fan-out.
const EVENT_FANOUT_CAPACITY: usize = 256;

// ---------------------------------------------------------------------------
// Server
// ---------------------------------------------------------------------------

/// A running proxy server. Owned by the serving [`Ccrf`]; closing it stops
/// the accept loop, drops every client, and unlinks the socket path.
pub(crate) struct ProxyServer {
    path: String,
    shutdown_tx: watch::Sender<bool>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl ProxyServer {
    /// Bind the socket (unlinking any stale file first) and start serving.
    pub async fn bind(path: &str, ccrf: Ccrf) -> Result<ProxyServer> {
        let _ = std::fs::remove_file(path);
        let listener = UnixListener::bind(path)?;
        info!(path, "proxy server listening");

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (event_tx, _) = broadcast::channel::<Bytes>(EVENT_FANOUT_CAPACITY);

        // Pump every unsolicited decoded frame into the client fan-out,
        // serialized once.
        tokio::spawn(event_pump(
            ccrf.handlers().raw.subscribe(),
            event_tx.clone(),
            shutdown_rx.clone(),
        ));

        let task = tokio::spawn(accept_loop(listener, ccrf, event_tx, shutdown_rx));

        Ok(ProxyServer {
            path: path.to_owned(),
            shutdown_tx,
            task: Mutex::new(Some(task)),
        })
    }

    /// Stop serving and unlink the socket path.
    pub async fn close(self) {
        let _ = self.shutdown_tx.send(true);
        if let Some(task) = self.task.lock().await.take() {
            let _ = task.await;
        }
        let _ = std::fs::remove_file(&self.path);
        debug!(path = %self.path, "proxy server closed");
    }
}

async fn accept_loop(
    listener: UnixListener,
    ccrf: Ccrf,
    event_tx: broadcast::Sender<Bytes>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            biased;
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    break;
                }
            }
            accept = listener.accept() => match accept {
                Ok((stream, _)) => {
                    debug!("proxy client connected");
                    tokio::spawn(serve_client(
                        stream,
                        ccrf.clone(),
                        event_tx.subscribe(),
                        shutdown_rx.clone(),
                    ));
                }
                Err(e) => {
                    warn!(error = %e, "proxy accept failed");
                    break;
                }
            }
        }
    }
}

async fn event_pump(
    mut raw: broadcast::Receiver<(u8, Reply)>,
    event_tx: broadcast::Sender<Bytes>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            biased;
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    break;
                }
            }
            item = raw.recv() => match item {
                Ok((code, reply)) => {
                    match serde_json::to_vec(&ServerFrame::Event { code, reply }) {
                        Ok(bytes) => {
                            let _ = event_tx.send(Bytes::from(bytes));
                        }
                        Err(e) => warn!(error = %e, "event serialize failed"),
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(dropped = n, "event pump lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    }
}

/// Drive one client: requests are executed in arrival order; events are
/// interleaved between them. A write failure removes just this client.
async fn serve_client(
    stream: UnixStream,
    ccrf: Ccrf,
    mut event_rx: broadcast::Receiver<Bytes>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let (rd, wr) = stream.into_split();
    let mut requests = FramedRead::new(rd, LengthDelimitedCodec::new());
    let mut replies = FramedWrite::new(wr, LengthDelimitedCodec::new());

    loop {
        tokio::select! {
            biased;
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    break;
                }
            }
            event = event_rx.recv() => match event {
                Ok(bytes) => {
                    if replies.send(bytes).await.is_err() {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(dropped = n, "client event stream lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
            frame = requests.next() => {
                let bytes = match frame {
                    None => break,
                    Some(Err(e)) => {
                        warn!(error = %e, "proxy read failed");
                        break;
                    }
                    Some(Ok(bytes)) => bytes,
                };
                let request = match serde_json::from_slice::<ClientFrame>(&bytes) {
                    Ok(request) => request,
                    Err(e) => {
                        // Unknown or malformed record: refuse and drop the client.
                        warn!(error = %e, "bad proxy request, disconnecting client");
                        break;
                    }
                };
                let ClientFrame::Request { id, call } = request;
                let response = match execute(&ccrf, call).await {
                    Ok(value) => ServerFrame::Response {
                        id,
                        ok: Some(value),
                        err: None,
                    },
                    Err(e) => ServerFrame::Response {
                        id,
                        ok: None,
                        err: Some(e.to_remote()),
                    },
                };
                let bytes = match serde_json::to_vec(&response) {
                    Ok(bytes) => bytes,
                    Err(e) => {
                        warn!(error = %e, "response serialize failed");
                        break;
                    }
                };
                if replies.send(Bytes::from(bytes)).await.is_err() {
                    break;
                }
            }
        }
    }
    debug!("proxy client disconnected");
}

/// Execute one client call against the local façade. Multi-reply commands
/// are exhausted here; the client receives the collected batch.
async fn execute(ccrf: &Ccrf, call: Call) -> Result<ReturnValue> {
    match call {
        Call::Status => Ok(ReturnValue::Status(ccrf.status().await?)),
        Call::Send {
            addr,
            port,
            typ,
            data,
            mesg,
            wait,
        } => Ok(ReturnValue::Acked(
            ccrf.send(addr, port, typ, &data, mesg, wait).await?,
        )),
        Call::Resp {
            addr,
            port,
            typ,
            data,
        } => {
            ccrf.resp(addr, port, typ, &data).await?;
            Ok(ReturnValue::Unit)
        }
        Call::Trxn {
            addr,
            port,
            typ,
            wait_ms,
            data,
        } => {
            let replies = ccrf.trxn(addr, port, typ, wait_ms, &data).await?;
            Ok(ReturnValue::Trxn(replies.collect().await?))
        }
        Call::SendMac {
            typ,
            dest,
            addr,
            data,
            wait,
        } => Ok(ReturnValue::TxCount(
            ccrf.send_mac(typ, dest, &data, addr, wait).await?,
        )),
        Call::Peers => Ok(ReturnValue::Peers(ccrf.peers().await?)),
        Call::Ping {
            addr,
            timeout_ms,
            size,
            size_reply,
            stream,
        } => Ok(ReturnValue::Ping(
            ccrf.ping(addr, timeout_ms, size, size_reply, stream).await?,
        )),
        Call::Echo { data } => {
            ccrf.echo(&data).await?;
            Ok(ReturnValue::Unit)
        }
        Call::Rainbow => {
            ccrf.rainbow().await?;
            Ok(ReturnValue::Unit)
        }
        Call::Led { addr, mask, colors } => {
            ccrf.led(addr, mask, &colors).await?;
            Ok(ReturnValue::Unit)
        }
        Call::AddrSet { orig, addr } => {
            Ok(ReturnValue::Config(ccrf.addr_set(orig, addr).await?))
        }
        Call::CellSet { addr, orig, cell } => {
            Ok(ReturnValue::Config(ccrf.cell_set(addr, orig, cell).await?))
        }
        Call::Update { sections, image } => {
            Ok(ReturnValue::FlashStat(ccrf.update(sections, &image).await?))
        }
        Call::Fota { addr } => Ok(ReturnValue::FotaStat(ccrf.fota(addr).await?)),
        Call::Reboot { addr } => {
            ccrf.reboot(addr).await?;
            Ok(ReturnValue::Unit)
        }
        Call::Uart { data } => {
            ccrf.uart(&data).await?;
            Ok(ReturnValue::Unit)
        }
        Call::Flush => {
            ccrf.flush().await?;
            Ok(ReturnValue::Unit)
        }
    }
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

type CallReply = std::result::Result<ReturnValue, RemoteError>;

/// Connection to a proxy server. The background reader demultiplexes
/// request completions (pending map) from broadcast events (fed straight
/// into the local subscription queues).
pub(crate) struct ProxyClient {
    write: Mutex<FramedWrite<OwnedWriteHalf, LengthDelimitedCodec>>,
    pending: Arc<std::sync::Mutex<HashMap<u64, oneshot::Sender<CallReply>>>>,
    next_id: AtomicU64,
    open: Arc<AtomicBool>,
    reader: Mutex<Option<JoinHandle<()>>>,
}

impl ProxyClient {
    pub async fn connect(socket: &str, handlers: Handlers, stats: Stats) -> Result<ProxyClient> {
        let stream = UnixStream::connect(socket).await?;
        info!(socket, "proxy client connected");
        let (rd, wr) = stream.into_split();
        let pending: Arc<std::sync::Mutex<HashMap<u64, oneshot::Sender<CallReply>>>> =
            Arc::new(std::sync::Mutex::new(HashMap::new()));
        let open = Arc::new(AtomicBool::new(true));

        let reader = tokio::spawn(client_reader(
            FramedRead::new(rd, LengthDelimitedCodec::new()),
            Arc::clone(&pending),
            handlers,
            stats,
            Arc::clone(&open),
        ));

        Ok(ProxyClient {
            write: Mutex::new(FramedWrite::new(wr, LengthDelimitedCodec::new())),
            pending,
            next_id: AtomicU64::new(1),
            open,
            reader: Mutex::new(Some(reader)),
        })
    }

    /// Send one call and await its completion.
    pub async fn call(&self, call: Call) -> Result<ReturnValue> {
        if !self.open.load(Ordering::Acquire) {
            return Err(Error::RemoteClosed);
        }
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.pending.lock().unwrap().insert(id, tx);

        let bytes = serde_json::to_vec(&ClientFrame::Request { id, call })?;
        {
            let mut write = self.write.lock().await;
            if write.send(Bytes::from(bytes)).await.is_err() {
                self.pending.lock().unwrap().remove(&id);
                return Err(Error::RemoteClosed);
            }
        }

        match rx.await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(remote)) => Err(remote.into()),
            // Reader exited with the request outstanding: socket is gone.
            Err(_) => Err(Error::RemoteClosed),
        }
    }

    pub async fn close(&self) {
        self.open.store(false, Ordering::Release);
        {
            let mut write = self.write.lock().await;
            let _ = write.close().await;
        }
        if let Some(reader) = self.reader.lock().await.take() {
            reader.abort();
            let _ = reader.await;
        }
        self.pending.lock().unwrap().clear();
    }
}

async fn client_reader(
    mut frames: FramedRead<tokio::net::unix::OwnedReadHalf, LengthDelimitedCodec>,
    pending: Arc<std::sync::Mutex<HashMap<u64, oneshot::Sender<CallReply>>>>,
    handlers: Handlers,
    stats: Stats,
    open: Arc<AtomicBool>,
) {
    while let Some(frame) = frames.next().await {
        let bytes = match frame {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(error = %e, "proxy client read failed");
                break;
            }
        };
        match serde_json::from_slice::<ServerFrame>(&bytes) {
            Ok(ServerFrame::Response { id, ok, err }) => {
                let Some(tx) = pending.lock().unwrap().remove(&id) else {
                    warn!(id, "response for unknown request");
                    continue;
                };
                let reply = match (ok, err) {
                    (_, Some(remote)) => Err(remote),
                    (Some(value), None) => Ok(value),
                    (None, None) => Err(RemoteError {
                        kind: "protocol".to_owned(),
                        message: "response carried neither value nor error".to_owned(),
                        trace: Vec::new(),
                    }),
                };
                let _ = tx.send(reply);
            }
            Ok(ServerFrame::Event { code, reply }) => {
                handlers.dispatch(&stats, code, reply);
            }
            Err(e) => {
                warn!(error = %e, "bad frame from proxy server, disconnecting");
                break;
            }
        }
    }
    open.store(false, Ordering::Release);
    // Fail anything still outstanding.
    pending.lock().unwrap().clear();
    debug!("proxy client reader exited");
}
