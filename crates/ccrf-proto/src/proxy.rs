//! Local-socket protocol between a link-owning daemon and its clients.
//!
//! Each message is one JSON record inside a length-delimited frame. All
//! records are kind-tagged; unknown tags fail deserialization, which the
//! daemon treats as a protocol error (no dynamic code, no pickle-style
//! payloads cross the socket).

use crate::wire::{FlashSections, PeerTable, PingResult, Reply, Status, TrxnReply};
use serde::{Deserialize, Serialize};

/// A façade operation requested by a client, with typed arguments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Call {
    Status,
    Send {
        addr: u16,
        port: u16,
        typ: u8,
        data: Vec<u8>,
        mesg: bool,
        wait: bool,
    },
    Resp {
        addr: u16,
        port: u16,
        typ: u8,
        data: Vec<u8>,
    },
    Trxn {
        addr: u16,
        port: u16,
        typ: u8,
        wait_ms: u32,
        data: Vec<u8>,
    },
    SendMac {
        typ: u8,
        dest: u16,
        addr: u16,
        data: Vec<u8>,
        wait: bool,
    },
    Peers,
    Ping {
        addr: u16,
        timeout_ms: u32,
        size: u16,
        size_reply: u16,
        stream: bool,
    },
    Echo {
        data: Vec<u8>,
    },
    Rainbow,
    Led {
        addr: u16,
        mask: u8,
        colors: Vec<(u8, u8, u8)>,
    },
    AddrSet {
        orig: u16,
        addr: u16,
    },
    CellSet {
        addr: u16,
        orig: u8,
        cell: u8,
    },
    Update {
        sections: FlashSections,
        image: Vec<u8>,
    },
    Fota {
        addr: u16,
    },
    Reboot {
        addr: u16,
    },
    Uart {
        data: Vec<u8>,
    },
    Flush,
}

/// The typed result of a completed [`Call`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "body", rename_all = "snake_case")]
pub enum ReturnValue {
    Unit,
    Acked(Option<u16>),
    TxCount(Option<u32>),
    Status(Status),
    Peers(PeerTable),
    Ping(PingResult),
    Trxn(Vec<TrxnReply>),
    Config(u32),
    FlashStat(i32),
    FotaStat(u8),
}

/// A server-side failure, re-raised on the client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteError {
    /// Error kind name, e.g. `invalid_argument`.
    pub kind: String,
    pub message: String,
    /// Server-side context lines (error source chain).
    pub trace: Vec<String>,
}

/// Client -> server messages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ClientFrame {
    Request { id: u64, call: Call },
}

/// Server -> client messages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ServerFrame {
    /// Completion of the request with the matching `id`.
    Response {
        id: u64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        ok: Option<ReturnValue>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        err: Option<RemoteError>,
    },
    /// An unsolicited decoded frame, broadcast to every client.
    Event { code: u8, reply: Reply },
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::{Datagram, Reply};

    #[test]
    fn call_round_trip() {
        let call = Call::Send {
            addr: 2,
            port: 101,
            typ: 1,
            data: b"hi".to_vec(),
            mesg: false,
            wait: true,
        };
        let json = serde_json::to_string(&call).unwrap();
        assert_eq!(serde_json::from_str::<Call>(&json).unwrap(), call);
    }

    #[test]
    fn unknown_op_refused() {
        let json = r#"{"op":"exec_shell","cmd":"rm -rf /"}"#;
        assert!(serde_json::from_str::<Call>(json).is_err());
    }

    #[test]
    fn response_envelope_round_trip() {
        let frame = ServerFrame::Response {
            id: 3,
            ok: Some(ReturnValue::Acked(Some(1))),
            err: None,
        };
        let json = serde_json::to_string(&frame).unwrap();
        assert_eq!(serde_json::from_str::<ServerFrame>(&json).unwrap(), frame);
    }

    #[test]
    fn event_envelope_round_trip() {
        let frame = ServerFrame::Event {
            code: 6,
            reply: Reply::Recv(Datagram {
                addr: 1,
                dest: 2,
                port: 3,
                typ: 4,
                seqn: 5,
                rssi: -6,
                lqi: 7,
                data: vec![8],
            }),
        };
        let json = serde_json::to_string(&frame).unwrap();
        assert_eq!(serde_json::from_str::<ServerFrame>(&json).unwrap(), frame);
    }

    #[test]
    fn remote_error_carries_trace() {
        let err = RemoteError {
            kind: "link_io".to_owned(),
            message: "write failed".to_owned(),
            trace: vec!["caused by: broken pipe".to_owned()],
        };
        let frame = ServerFrame::Response {
            id: 9,
            ok: None,
            err: Some(err.clone()),
        };
        let json = serde_json::to_string(&frame).unwrap();
        match serde_json::from_str::<ServerFrame>(&json).unwrap() {
            ServerFrame::Response { err: Some(e), .. } => assert_eq!(e, err),
            other => panic!("unexpected frame: {other:?}"),
        }
    }
}
