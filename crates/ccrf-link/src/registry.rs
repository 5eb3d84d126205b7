//! The typed command registry.
//!
//! Declarative table of every command the firmware speaks: request code,
//! response code, multi-reply flag, and how decoded responses are routed —
//! either into a per-command rendezvous (request/reply commands) or onto the
//! dispatcher queue toward a passive handler (unsolicited traffic).

use crate::rendezvous::Rendezvous;
use ccrf_proto::wire::code;
use std::collections::HashMap;
use std::sync::Arc;

/// Destination of an unsolicited decoded reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum HandlerKind {
    /// Echoed text; logged.
    Echo,
    /// Network-layer receptions -> datagram subscription queue.
    Recv,
    /// MAC-layer receptions -> MAC subscription queue.
    MacRecv,
    /// Link events -> event subscription queue.
    Evnt,
    /// UART passthrough -> uart subscription queue.
    Uart,
}

/// How a response code is routed.
pub(crate) enum Route {
    /// Request/reply: deliver to the waiting caller.
    Sync(Arc<Rendezvous>),
    /// Unsolicited: run the passive handler from the dispatcher.
    Handle(HandlerKind),
}

/// One command descriptor. `code` absent means the entry is purely a
/// receiver; `response` absent means fire-and-forget (the entry then never
/// appears in the response table).
pub(crate) struct Command {
    pub name: &'static str,
    pub code: Option<u8>,
    pub response: Option<u8>,
    pub multi: bool,
    pub route: Option<Route>,
}

/// The full catalogue, indexed by response code for the reader's dispatch.
pub(crate) struct Registry {
    commands: Vec<Command>,
    by_response: HashMap<u8, usize>,
}

impl Registry {
    /// Build the Cloud Chaser catalogue.
    pub fn build() -> Registry {
        let mut reg = Registry {
            commands: Vec::new(),
            by_response: HashMap::new(),
        };

        // Fire-and-forget requests.
        reg.add("echo", Some(code::ECHO), None, false, None);
        reg.add("send", Some(code::SEND), None, false, None);
        reg.add("resp", Some(code::RESP), None, false, None);
        reg.add("mac_send", Some(code::MAC_SEND), None, false, None);
        reg.add("reboot", Some(code::REBOOT), None, false, None);
        reg.add("led", Some(code::LED), None, false, None);
        reg.add("rainbow", Some(code::RAINBOW), None, false, None);

        // Request/reply commands.
        reg.add_sync("status", Some(code::STATUS), code::STATUS, false);
        reg.add_sync("send_wait", Some(code::SEND), code::SEND_DONE, false);
        reg.add_sync("trxn", Some(code::TRXN), code::TRXN, true);
        reg.add_sync("mac_send_wait", Some(code::MAC_SEND), code::MAC_SEND, false);
        reg.add_sync("peer", Some(code::PEER), code::PEER, false);
        reg.add_sync("ping", Some(code::PING), code::PING, false);
        reg.add_sync("config", Some(code::CONFIG), code::CONFIG_RSP, false);
        reg.add_sync("update", Some(code::FLASH), code::FLASH, false);
        reg.add_sync("fota", Some(code::FOTA), code::FOTA, false);

        // Pure receivers: no writer exposed, handled from the dispatcher.
        reg.add_handler("echo_reply", code::ECHO, HandlerKind::Echo);
        reg.add_handler("recv", code::RECV, HandlerKind::Recv);
        reg.add_handler("mac_recv", code::MAC_RECV, HandlerKind::MacRecv);
        reg.add_handler("evnt", code::EVNT, HandlerKind::Evnt);
        reg.add_handler("uart", code::UART, HandlerKind::Uart);

        reg
    }

    fn add(
        &mut self,
        name: &'static str,
        code: Option<u8>,
        response: Option<u8>,
        multi: bool,
        route: Option<Route>,
    ) {
        debug_assert!(
            self.commands.iter().all(|c| c.name != name),
            "duplicate command name {name}"
        );
        let idx = self.commands.len();
        if let Some(rsp) = response {
            let prev = self.by_response.insert(rsp, idx);
            debug_assert!(prev.is_none(), "duplicate response code {rsp}");
        }
        self.commands.push(Command {
            name,
            code,
            response,
            multi,
            route,
        });
    }

    fn add_sync(&mut self, name: &'static str, code: Option<u8>, response: u8, multi: bool) {
        let rendezvous = Rendezvous::new(name);
        self.add(
            name,
            code,
            Some(response),
            multi,
            Some(Route::Sync(rendezvous)),
        );
    }

    fn add_handler(&mut self, name: &'static str, response: u8, kind: HandlerKind) {
        self.add(name, None, Some(response), false, Some(Route::Handle(kind)));
    }

    /// Look up the entry handling `response`.
    pub fn lookup(&self, response: u8) -> Option<&Command> {
        self.by_response.get(&response).map(|&i| &self.commands[i])
    }

    /// The rendezvous serving `response`, if the entry is request/reply.
    pub fn rendezvous(&self, response: u8) -> Option<Arc<Rendezvous>> {
        match self.lookup(response)?.route {
            Some(Route::Sync(ref rv)) => Some(Arc::clone(rv)),
            _ => None,
        }
    }

    /// Request code, multi flag, and rendezvous of a request/reply entry.
    pub fn sync_command(&self, response: u8) -> Option<(u8, bool, Arc<Rendezvous>)> {
        let cmd = self.lookup(response)?;
        debug_assert_eq!(cmd.response, Some(response));
        let code = cmd.code?;
        match &cmd.route {
            Some(Route::Sync(rv)) => Some((code, cmd.multi, Arc::clone(rv))),
            _ => None,
        }
    }

    /// Entry by symbolic name (descriptor introspection).
    pub fn by_name(&self, name: &str) -> Option<&Command> {
        self.commands.iter().find(|c| c.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn response_codes_route_correctly() {
        let reg = Registry::build();

        // Request/reply entries own a rendezvous.
        for rsp in [
            code::STATUS,
            code::SEND_DONE,
            code::TRXN,
            code::PEER,
            code::PING,
            code::CONFIG_RSP,
            code::FLASH,
            code::FOTA,
        ] {
            assert!(reg.rendezvous(rsp).is_some(), "code {rsp} should be sync");
        }

        // Unsolicited entries route to handlers.
        for rsp in [code::ECHO, code::RECV, code::MAC_RECV, code::EVNT, code::UART] {
            let cmd = reg.lookup(rsp).unwrap();
            assert!(
                matches!(cmd.route, Some(Route::Handle(_))),
                "code {rsp} should be a passive handler"
            );
            assert!(reg.rendezvous(rsp).is_none());
        }

        // Unknown codes have no entry.
        assert!(reg.lookup(11).is_none());
        assert!(reg.lookup(28).is_none());
    }

    #[test]
    fn receivers_expose_no_writer() {
        let reg = Registry::build();
        for name in ["recv", "mac_recv", "evnt", "uart", "echo_reply"] {
            let cmd = reg.by_name(name).unwrap();
            assert!(cmd.code.is_none(), "{name} must not expose a writer");
            assert!(cmd.response.is_some());
        }
    }

    #[test]
    fn fire_and_forget_has_no_response() {
        let reg = Registry::build();
        for name in ["send", "resp", "reboot", "led", "rainbow"] {
            let cmd = reg.by_name(name).unwrap();
            assert!(cmd.code.is_some());
            assert!(cmd.response.is_none(), "{name} is fire-and-forget");
        }
    }

    #[test]
    fn trxn_is_the_only_multi() {
        let reg = Registry::build();
        assert!(reg.by_name("trxn").unwrap().multi);
        let multis = reg
            .commands
            .iter()
            .filter(|c| c.multi)
            .map(|c| c.name)
            .collect::<Vec<_>>();
        assert_eq!(multis, vec!["trxn"]);
    }
}
