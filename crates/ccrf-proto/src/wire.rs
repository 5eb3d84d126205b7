//! The Cloud Chaser command catalogue.
//!
//! Codepoints, body layouts, and semantics are fixed by the firmware; every
//! multi-byte field is little-endian. Each response body decodes into a
//! tagged [`Reply`] record; request bodies are built by the `encode_*`
//! functions. The device-side encoders exist for the mock device and keep
//! the codec symmetric.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

// ---------------------------------------------------------------------------
// Command codes
// ---------------------------------------------------------------------------

/// Firmware command/response codepoints (5-bit space).
pub mod code {
    pub const ECHO: u8 = 0;
    pub const STATUS: u8 = 1;
    pub const MAC_SEND: u8 = 2;
    pub const MAC_RECV: u8 = 3;
    pub const SEND: u8 = 4;
    pub const SEND_DONE: u8 = 5;
    pub const RECV: u8 = 6;
    pub const TRXN: u8 = 7;
    pub const RESP: u8 = 8;
    pub const EVNT: u8 = 9;
    pub const PEER: u8 = 10;
    pub const REBOOT: u8 = 17;
    pub const FLASH: u8 = 21;
    pub const PING: u8 = 22;
    pub const FOTA: u8 = 23;
    pub const UART: u8 = 26;
    pub const LED: u8 = 27;
    pub const RAINBOW: u8 = 29;
    pub const CONFIG: u8 = 30;
    pub const CONFIG_RSP: u8 = 31;
}

// ---------------------------------------------------------------------------
// Network constants
// ---------------------------------------------------------------------------

/// Broadcast address.
pub const NET_ADDR_BCST: u16 = 0;
/// Invalid / "local node" marker address.
pub const NET_ADDR_INVL: u16 = 0xFFFF;
/// Valid port bits (10).
pub const NET_PORT_MASK: u16 = 0x3FF;
/// Valid type bits (4).
pub const NET_TYPE_MASK: u8 = 0xF;
/// Base payload size carried without fragmentation.
pub const NET_BASE_SIZE: usize = 113;
/// Largest single send accepted by the firmware.
pub const NET_SEND_MAX: usize = 0xFFFA;
/// Number of PHY channel records in a status reply.
pub const PHY_CHAN_COUNT: usize = 25;

/// `send` flag bit: request an ACK (message semantics).
pub const SEND_FLAG_MESG: u8 = 0b01;
/// `send` flag bit: firmware reports the TX result via `send_done`.
pub const SEND_FLAG_RSLT: u8 = 0b10;
/// `mac_send` flag: wait for TX completion.
pub const MAC_SEND_WAIT: u8 = 1;

/// MAC send flavours.
pub const MAC_DGRM: u8 = 0;
pub const MAC_MESG: u8 = 1;
pub const MAC_TRXN: u8 = 2;
pub const MAC_STRM: u8 = 3;

/// Config item: network address.
pub const CONFIG_ID_ADDR: u32 = 0xADD1;
/// Config item: cell id.
pub const CONFIG_ID_CELL: u32 = 0xCE11;

/// Magic guarding the reboot command.
pub const REBOOT_MAGIC: u32 = 0xD1E0_0D1E;

// ---------------------------------------------------------------------------
// Decode error + cursor
// ---------------------------------------------------------------------------

/// Body-layout decode failures. Logged and dropped by the link reader;
/// never fatal to the link.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum WireError {
    #[error("truncated body: need {need} more bytes, have {have}")]
    Truncated { need: usize, have: usize },
    #[error("unknown response code 0x{0:02X}")]
    UnknownCode(u8),
    #[error("unknown peer event action {0}")]
    BadPeerAction(u8),
}

/// Little-endian read cursor over a response body.
struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Cursor { buf, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], WireError> {
        let have = self.buf.len() - self.pos;
        if have < n {
            return Err(WireError::Truncated { need: n, have });
        }
        let out = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    fn rest(&mut self) -> &'a [u8] {
        let out = &self.buf[self.pos..];
        self.pos = self.buf.len();
        out
    }

    fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn u8(&mut self) -> Result<u8, WireError> {
        Ok(self.take(1)?[0])
    }

    fn i8(&mut self) -> Result<i8, WireError> {
        Ok(self.take(1)?[0] as i8)
    }

    fn u16(&mut self) -> Result<u16, WireError> {
        Ok(u16::from_le_bytes(self.take(2)?.try_into().unwrap()))
    }

    fn u32(&mut self) -> Result<u32, WireError> {
        Ok(u32::from_le_bytes(self.take(4)?.try_into().unwrap()))
    }

    fn i32(&mut self) -> Result<i32, WireError> {
        Ok(i32::from_le_bytes(self.take(4)?.try_into().unwrap()))
    }

    fn u64(&mut self) -> Result<u64, WireError> {
        Ok(u64::from_le_bytes(self.take(8)?.try_into().unwrap()))
    }
}

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

/// One direction's packet counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatCounts {
    pub count: u32,
    pub size: u32,
    pub error: u32,
}

/// Receive/send counter pair for one stack layer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatSet {
    pub recv: StatCounts,
    pub send: StatCounts,
}

/// Per-channel PHY state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChanInfo {
    /// Record index (not carried on the wire).
    pub id: u8,
    pub freq: u32,
    pub hop_id: u16,
    pub rssi: i8,
    pub rssi_prev: i8,
}

/// Device status snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Status {
    pub version: u32,
    /// Build date, seconds since the epoch.
    pub date: u32,
    pub serial: u64,
    /// Milliseconds since boot.
    pub uptime: u32,
    pub addr: u16,
    pub cell: u8,
    pub rdid: u8,
    pub phy_su: u32,
    pub mac_su_rx: u32,
    pub heap_free: u32,
    pub heap_usage: u32,
    pub phy_stat: StatSet,
    pub mac_stat: StatSet,
    pub net_stat: StatSet,
    pub chan: Vec<ChanInfo>,
}

/// An unsolicited network-layer reception.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Datagram {
    pub addr: u16,
    pub dest: u16,
    pub port: u16,
    pub typ: u8,
    pub seqn: u8,
    pub rssi: i8,
    pub lqi: u8,
    pub data: Vec<u8>,
}

/// An unsolicited MAC-layer reception.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MacDatagram {
    pub addr: u16,
    pub peer: u16,
    pub dest: u16,
    pub size: u16,
    pub seqn: u8,
    pub rssi: i8,
    pub lqi: u8,
    pub data: Vec<u8>,
}

/// One reply within a transaction batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrxnReply {
    pub addr: u16,
    pub port: u16,
    pub typ: u8,
    pub data: Vec<u8>,
}

/// A peer-table entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerInfo {
    pub addr: u16,
    pub rssi: i8,
    pub lqi: u8,
    /// Seconds since the peer was last heard.
    pub last: u32,
    pub version: u32,
    pub date: u32,
    pub time: u32,
}

/// The device's peer table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerTable {
    pub addr: u16,
    /// Device time base for the `last` fields.
    pub time: u32,
    pub peers: Vec<PeerInfo>,
}

/// Signal quality observed at one end of a ping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkMeta {
    pub rssi: i8,
    pub lqi: u8,
}

/// Result of a ping exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PingResult {
    pub addr: u16,
    pub tx_count: u16,
    pub rtt_usec: u32,
    pub locl: LinkMeta,
    pub peer: LinkMeta,
}

/// Actions carried by a peer event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PeerAction {
    None = 0,
    Set = 1,
    Exp = 2,
    Out = 3,
    Upd = 4,
}

impl fmt::Display for PeerAction {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            PeerAction::None => write!(f, "NONE"),
            PeerAction::Set => write!(f, "SET"),
            PeerAction::Exp => write!(f, "EXP"),
            PeerAction::Out => write!(f, "OUT"),
            PeerAction::Upd => write!(f, "UPD"),
        }
    }
}

impl TryFrom<u8> for PeerAction {
    type Error = WireError;

    fn try_from(v: u8) -> Result<Self, WireError> {
        match v {
            0 => Ok(PeerAction::None),
            1 => Ok(PeerAction::Set),
            2 => Ok(PeerAction::Exp),
            3 => Ok(PeerAction::Out),
            4 => Ok(PeerAction::Upd),
            other => Err(WireError::BadPeerAction(other)),
        }
    }
}

/// A link event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Event {
    /// Peer table change (event id 0).
    Peer { addr: u16, action: PeerAction },
    /// Any other event id, body passed through raw.
    Other { id: u8, data: Vec<u8> },
}

/// Firmware image section sizes for a flash update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlashSections {
    pub header: u32,
    pub user: u32,
    pub code: u32,
    pub text: u32,
    pub data: u32,
    pub total: u32,
}

impl FlashSections {
    /// Sum of the individual sections; must equal `total`.
    pub fn sum(&self) -> u64 {
        u64::from(self.header)
            + u64::from(self.user)
            + u64::from(self.code)
            + u64::from(self.text)
            + u64::from(self.data)
    }
}

// ---------------------------------------------------------------------------
// Reply — every decodable response body, tagged by kind
// ---------------------------------------------------------------------------

/// A decoded response body. Produced by [`decode_reply`] keyed on the
/// response code; `Trxn(None)` is the end-of-batch terminator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "body", rename_all = "snake_case")]
pub enum Reply {
    Echo(String),
    Status(Status),
    MacSendDone(u32),
    MacRecv(MacDatagram),
    SendDone(u16),
    Recv(Datagram),
    Trxn(Option<TrxnReply>),
    Evnt(Event),
    Peers(PeerTable),
    Ping(PingResult),
    FlashStat(i32),
    FotaStat(u8),
    Uart(Vec<u8>),
    ConfigVal(u32),
}

/// Decode the body of a response frame according to its codepoint.
pub fn decode_reply(rsp: u8, body: &[u8]) -> Result<Reply, WireError> {
    match rsp {
        code::ECHO => Ok(Reply::Echo(decode_echo(body))),
        code::STATUS => Ok(Reply::Status(decode_status(body)?)),
        code::MAC_SEND => Ok(Reply::MacSendDone(decode_mac_send_done(body)?)),
        code::MAC_RECV => Ok(Reply::MacRecv(decode_mac_datagram(body)?)),
        code::SEND_DONE => Ok(Reply::SendDone(decode_send_done(body)?)),
        code::RECV => Ok(Reply::Recv(decode_datagram(body)?)),
        code::TRXN => Ok(Reply::Trxn(decode_trxn_reply(body)?)),
        code::EVNT => Ok(Reply::Evnt(decode_event(body)?)),
        code::PEER => Ok(Reply::Peers(decode_peer_table(body)?)),
        code::PING => Ok(Reply::Ping(decode_ping_result(body)?)),
        code::FLASH => Ok(Reply::FlashStat(decode_flash_status(body)?)),
        code::FOTA => Ok(Reply::FotaStat(decode_fota_status(body)?)),
        code::UART => Ok(Reply::Uart(body.to_vec())),
        code::CONFIG_RSP => Ok(Reply::ConfigVal(decode_config_result(body)?)),
        other => Err(WireError::UnknownCode(other)),
    }
}

// ---------------------------------------------------------------------------
// Request encoders (host -> device)
// ---------------------------------------------------------------------------

/// `echo` request: payload plus a terminating NUL.
pub fn encode_echo(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len() + 1);
    out.extend_from_slice(data);
    out.push(0);
    out
}

/// `send` / `resp` request body (flagged form).
pub fn encode_send(addr: u16, port: u16, typ: u8, flags: u8, data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(6 + data.len());
    out.extend_from_slice(&addr.to_le_bytes());
    out.extend_from_slice(&(port & NET_PORT_MASK).to_le_bytes());
    out.push(typ & NET_TYPE_MASK);
    out.push(flags);
    out.extend_from_slice(data);
    out
}

/// `trxn` request body (wait form).
pub fn encode_trxn(addr: u16, port: u16, typ: u8, wait_ms: u32, data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(9 + data.len());
    out.extend_from_slice(&addr.to_le_bytes());
    out.extend_from_slice(&(port & NET_PORT_MASK).to_le_bytes());
    out.push(typ & NET_TYPE_MASK);
    out.extend_from_slice(&wait_ms.to_le_bytes());
    out.extend_from_slice(data);
    out
}

/// `mac_send` request body.
pub fn encode_mac_send(typ: u8, flags: u8, addr: u16, dest: u16, data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(8 + data.len());
    out.push(typ);
    out.push(flags);
    out.extend_from_slice(&addr.to_le_bytes());
    out.extend_from_slice(&dest.to_le_bytes());
    out.extend_from_slice(&(data.len() as u16).to_le_bytes());
    out.extend_from_slice(data);
    out
}

/// Generic `config` request with a u32 parameter.
pub fn encode_config_u32(id: u32, param: u32, data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(8 + data.len());
    out.extend_from_slice(&id.to_le_bytes());
    out.extend_from_slice(&param.to_le_bytes());
    out.extend_from_slice(data);
    out
}

/// Generic `config` request with a raw 4-byte parameter.
pub fn encode_config_raw(id: u32, param: [u8; 4], data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(8 + data.len());
    out.extend_from_slice(&id.to_le_bytes());
    out.extend_from_slice(&param);
    out.extend_from_slice(data);
    out
}

/// Address-change config: `orig` guards against racing another writer.
pub fn encode_config_addr(orig: u16, addr: u16) -> Vec<u8> {
    let mut param = [0u8; 4];
    param[..2].copy_from_slice(&orig.to_le_bytes());
    param[2..].copy_from_slice(&addr.to_le_bytes());
    encode_config_raw(CONFIG_ID_ADDR, param, &[])
}

/// Cell-change config for the node at `addr`.
pub fn encode_config_cell(addr: u16, orig: u8, cell: u8) -> Vec<u8> {
    let mut param = [0u8; 4];
    param[..2].copy_from_slice(&addr.to_le_bytes());
    param[2] = orig;
    param[3] = cell;
    encode_config_raw(CONFIG_ID_CELL, param, &[])
}

/// `ping` request body.
pub fn encode_ping(addr: u16, timeout_ms: u32, size: u16, size_reply: u16, stream: bool) -> Vec<u8> {
    let mut out = Vec::with_capacity(11);
    out.extend_from_slice(&addr.to_le_bytes());
    out.extend_from_slice(&timeout_ms.to_le_bytes());
    out.extend_from_slice(&size.to_le_bytes());
    out.extend_from_slice(&size_reply.to_le_bytes());
    out.push(u8::from(stream));
    out
}

/// `reboot` request body.
pub fn encode_reboot(addr: u16) -> Vec<u8> {
    let mut out = Vec::with_capacity(6);
    out.extend_from_slice(&addr.to_le_bytes());
    out.extend_from_slice(&REBOOT_MAGIC.to_le_bytes());
    out
}

/// `fota` request body.
pub fn encode_fota(addr: u16) -> Vec<u8> {
    addr.to_le_bytes().to_vec()
}

/// `flash` request body: section sizes followed by the image.
pub fn encode_flash(sections: &FlashSections, image: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(24 + image.len());
    for size in [
        sections.header,
        sections.user,
        sections.code,
        sections.text,
        sections.data,
        sections.total,
    ] {
        out.extend_from_slice(&size.to_le_bytes());
    }
    out.extend_from_slice(image);
    out
}

/// `led` request body. Colors go out in G-R-B order.
pub fn encode_led(addr: u16, mask: u8, colors: &[(u8, u8, u8)]) -> Vec<u8> {
    let mut out = Vec::with_capacity(3 + colors.len() * 3);
    out.extend_from_slice(&addr.to_le_bytes());
    out.push(mask);
    for &(r, g, b) in colors {
        out.push(g);
        out.push(r);
        out.push(b);
    }
    out
}

/// `rainbow` request body.
pub fn encode_rainbow(addr: u16) -> Vec<u8> {
    addr.to_le_bytes().to_vec()
}

// ---------------------------------------------------------------------------
// Response decoders (device -> host)
// ---------------------------------------------------------------------------

fn decode_echo(body: &[u8]) -> String {
    String::from_utf8_lossy(body).into_owned()
}

fn decode_stat_set(c: &mut Cursor) -> Result<StatSet, WireError> {
    let mut half = |c: &mut Cursor| -> Result<StatCounts, WireError> {
        Ok(StatCounts {
            count: c.u32()?,
            size: c.u32()?,
            error: c.u32()?,
        })
    };
    Ok(StatSet {
        recv: half(c)?,
        send: half(c)?,
    })
}

/// Decode a `status` reply body.
pub fn decode_status(body: &[u8]) -> Result<Status, WireError> {
    let mut c = Cursor::new(body);
    let version = c.u32()?;
    let date = c.u32()?;
    let serial = c.u64()?;
    let uptime = c.u32()?;
    let addr = c.u16()?;
    let cell = c.u8()?;
    let rdid = c.u8()?;
    let phy_su = c.u32()?;
    let mac_su_rx = c.u32()?;
    let heap_free = c.u32()?;
    let heap_usage = c.u32()?;
    let phy_stat = decode_stat_set(&mut c)?;
    let mac_stat = decode_stat_set(&mut c)?;
    let net_stat = decode_stat_set(&mut c)?;
    let mut chan = Vec::with_capacity(PHY_CHAN_COUNT);
    for id in 0..PHY_CHAN_COUNT {
        let freq = c.u32()?;
        let hop_id = c.u16()?;
        let rssi = c.i8()?;
        let rssi_prev = c.i8()?;
        chan.push(ChanInfo {
            id: id as u8,
            freq,
            hop_id,
            rssi,
            rssi_prev,
        });
    }
    Ok(Status {
        version,
        date,
        serial,
        uptime,
        addr,
        cell,
        rdid,
        phy_su,
        mac_su_rx,
        heap_free,
        heap_usage,
        phy_stat,
        mac_stat,
        net_stat,
        chan,
    })
}

/// Decode a `send_done` reply: the ACKed packet count.
pub fn decode_send_done(body: &[u8]) -> Result<u16, WireError> {
    Cursor::new(body).u16()
}

/// Decode one `trxn` reply. `None` is the empty-address end-of-batch marker.
pub fn decode_trxn_reply(body: &[u8]) -> Result<Option<TrxnReply>, WireError> {
    let mut c = Cursor::new(body);
    let addr = c.u16()?;
    let port = c.u16()?;
    let typ = c.u8()?;
    if addr == 0 {
        return Ok(None);
    }
    Ok(Some(TrxnReply {
        addr,
        port,
        typ,
        data: c.rest().to_vec(),
    }))
}

/// Decode an unsolicited `recv` body.
pub fn decode_datagram(body: &[u8]) -> Result<Datagram, WireError> {
    let mut c = Cursor::new(body);
    Ok(Datagram {
        addr: c.u16()?,
        dest: c.u16()?,
        port: c.u16()?,
        typ: c.u8()?,
        seqn: c.u8()?,
        rssi: c.i8()?,
        lqi: c.u8()?,
        data: c.rest().to_vec(),
    })
}

/// Decode an unsolicited `mac_recv` body.
pub fn decode_mac_datagram(body: &[u8]) -> Result<MacDatagram, WireError> {
    let mut c = Cursor::new(body);
    Ok(MacDatagram {
        addr: c.u16()?,
        peer: c.u16()?,
        dest: c.u16()?,
        size: c.u16()?,
        seqn: c.u8()?,
        rssi: c.i8()?,
        lqi: c.u8()?,
        data: c.rest().to_vec(),
    })
}

/// Decode a `peer` reply. Trailing bytes shorter than a whole record are
/// ignored.
pub fn decode_peer_table(body: &[u8]) -> Result<PeerTable, WireError> {
    let mut c = Cursor::new(body);
    let addr = c.u16()?;
    let time = c.u32()?;
    let mut peers = Vec::new();
    while c.remaining() >= 20 {
        peers.push(PeerInfo {
            addr: c.u16()?,
            rssi: c.i8()?,
            lqi: c.u8()?,
            last: c.u32()?,
            version: c.u32()?,
            date: c.u32()?,
            time: c.u32()?,
        });
    }
    Ok(PeerTable { addr, time, peers })
}

/// Decode a `ping` reply.
pub fn decode_ping_result(body: &[u8]) -> Result<PingResult, WireError> {
    let mut c = Cursor::new(body);
    Ok(PingResult {
        addr: c.u16()?,
        tx_count: c.u16()?,
        rtt_usec: c.u32()?,
        locl: LinkMeta {
            rssi: c.i8()?,
            lqi: c.u8()?,
        },
        peer: LinkMeta {
            rssi: c.i8()?,
            lqi: c.u8()?,
        },
    })
}

/// Decode an `evnt` body.
pub fn decode_event(body: &[u8]) -> Result<Event, WireError> {
    let mut c = Cursor::new(body);
    let id = c.u8()?;
    if id == 0 {
        let addr = c.u16()?;
        let action = PeerAction::try_from(c.u8()?)?;
        return Ok(Event::Peer { addr, action });
    }
    Ok(Event::Other {
        id,
        data: c.rest().to_vec(),
    })
}

/// Decode a `config` reply value (0 signals an error on the device).
pub fn decode_config_result(body: &[u8]) -> Result<u32, WireError> {
    Cursor::new(body).u32()
}

/// Decode a `flash` status reply.
pub fn decode_flash_status(body: &[u8]) -> Result<i32, WireError> {
    Cursor::new(body).i32()
}

/// Decode a `fota` status reply (sent flag).
pub fn decode_fota_status(body: &[u8]) -> Result<u8, WireError> {
    Cursor::new(body).u8()
}

/// Decode a `mac_send` wait reply: the TX count (leading address skipped).
pub fn decode_mac_send_done(body: &[u8]) -> Result<u32, WireError> {
    let mut c = Cursor::new(body);
    let _addr = c.u16()?;
    c.u32()
}

// ---------------------------------------------------------------------------
// Device-side encoders (used by the mock device; keep codecs symmetric)
// ---------------------------------------------------------------------------

/// Encode a `status` reply body.
pub fn encode_status(status: &Status) -> Vec<u8> {
    let mut out = Vec::with_capacity(40 + 72 + PHY_CHAN_COUNT * 8);
    out.extend_from_slice(&status.version.to_le_bytes());
    out.extend_from_slice(&status.date.to_le_bytes());
    out.extend_from_slice(&status.serial.to_le_bytes());
    out.extend_from_slice(&status.uptime.to_le_bytes());
    out.extend_from_slice(&status.addr.to_le_bytes());
    out.push(status.cell);
    out.push(status.rdid);
    out.extend_from_slice(&status.phy_su.to_le_bytes());
    out.extend_from_slice(&status.mac_su_rx.to_le_bytes());
    out.extend_from_slice(&status.heap_free.to_le_bytes());
    out.extend_from_slice(&status.heap_usage.to_le_bytes());
    for set in [&status.phy_stat, &status.mac_stat, &status.net_stat] {
        for half in [&set.recv, &set.send] {
            out.extend_from_slice(&half.count.to_le_bytes());
            out.extend_from_slice(&half.size.to_le_bytes());
            out.extend_from_slice(&half.error.to_le_bytes());
        }
    }
    for ch in &status.chan {
        out.extend_from_slice(&ch.freq.to_le_bytes());
        out.extend_from_slice(&ch.hop_id.to_le_bytes());
        out.push(ch.rssi as u8);
        out.push(ch.rssi_prev as u8);
    }
    out
}

/// Encode an unsolicited `recv` body.
pub fn encode_datagram(d: &Datagram) -> Vec<u8> {
    let mut out = Vec::with_capacity(10 + d.data.len());
    out.extend_from_slice(&d.addr.to_le_bytes());
    out.extend_from_slice(&d.dest.to_le_bytes());
    out.extend_from_slice(&d.port.to_le_bytes());
    out.push(d.typ);
    out.push(d.seqn);
    out.push(d.rssi as u8);
    out.push(d.lqi);
    out.extend_from_slice(&d.data);
    out
}

/// Encode an unsolicited `mac_recv` body.
pub fn encode_mac_datagram(d: &MacDatagram) -> Vec<u8> {
    let mut out = Vec::with_capacity(11 + d.data.len());
    out.extend_from_slice(&d.addr.to_le_bytes());
    out.extend_from_slice(&d.peer.to_le_bytes());
    out.extend_from_slice(&d.dest.to_le_bytes());
    out.extend_from_slice(&d.size.to_le_bytes());
    out.push(d.seqn);
    out.push(d.rssi as u8);
    out.push(d.lqi);
    out.extend_from_slice(&d.data);
    out
}

/// Encode one `trxn` reply body; `None` encodes the end-of-batch marker.
pub fn encode_trxn_reply(reply: Option<&TrxnReply>) -> Vec<u8> {
    match reply {
        Some(r) => {
            let mut out = Vec::with_capacity(5 + r.data.len());
            out.extend_from_slice(&r.addr.to_le_bytes());
            out.extend_from_slice(&r.port.to_le_bytes());
            out.push(r.typ);
            out.extend_from_slice(&r.data);
            out
        }
        None => vec![0, 0, 0, 0, 0],
    }
}

/// Encode a `send_done` reply body.
pub fn encode_send_done(acked: u16) -> Vec<u8> {
    acked.to_le_bytes().to_vec()
}

/// Encode a `peer` reply body.
pub fn encode_peer_table(table: &PeerTable) -> Vec<u8> {
    let mut out = Vec::with_capacity(6 + table.peers.len() * 20);
    out.extend_from_slice(&table.addr.to_le_bytes());
    out.extend_from_slice(&table.time.to_le_bytes());
    for p in &table.peers {
        out.extend_from_slice(&p.addr.to_le_bytes());
        out.push(p.rssi as u8);
        out.push(p.lqi);
        out.extend_from_slice(&p.last.to_le_bytes());
        out.extend_from_slice(&p.version.to_le_bytes());
        out.extend_from_slice(&p.date.to_le_bytes());
        out.extend_from_slice(&p.time.to_le_bytes());
    }
    out
}

/// Encode a `ping` reply body.
pub fn encode_ping_result(r: &PingResult) -> Vec<u8> {
    let mut out = Vec::with_capacity(12);
    out.extend_from_slice(&r.addr.to_le_bytes());
    out.extend_from_slice(&r.tx_count.to_le_bytes());
    out.extend_from_slice(&r.rtt_usec.to_le_bytes());
    out.push(r.locl.rssi as u8);
    out.push(r.locl.lqi);
    out.push(r.peer.rssi as u8);
    out.push(r.peer.lqi);
    out
}

/// Encode an `evnt` body.
pub fn encode_event(e: &Event) -> Vec<u8> {
    match e {
        Event::Peer { addr, action } => {
            let mut out = Vec::with_capacity(4);
            out.push(0);
            out.extend_from_slice(&addr.to_le_bytes());
            out.push(*action as u8);
            out
        }
        Event::Other { id, data } => {
            let mut out = Vec::with_capacity(1 + data.len());
            out.push(*id);
            out.extend_from_slice(data);
            out
        }
    }
}

/// Encode a `config` reply body.
pub fn encode_config_result(value: u32) -> Vec<u8> {
    value.to_le_bytes().to_vec()
}

/// Encode a `flash` status reply body.
pub fn encode_flash_status(status: i32) -> Vec<u8> {
    status.to_le_bytes().to_vec()
}

/// Encode a `fota` status reply body.
pub fn encode_fota_status(sent: u8) -> Vec<u8> {
    vec![sent]
}

/// Encode a `mac_send` wait reply body.
pub fn encode_mac_send_done(addr: u16, count: u32) -> Vec<u8> {
    let mut out = Vec::with_capacity(6);
    out.extend_from_slice(&addr.to_le_bytes());
    out.extend_from_slice(&count.to_le_bytes());
    out
}
