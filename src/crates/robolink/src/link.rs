use std::cell::RefCell;
use std::fmt;
use std::net::SocketAddr;

use tracing::debug;

use crate::config::LinkConfig;
use crate::error::{LinkError, LinkResult};
use crate::item::{Item, ItemHandle};
use crate::transport::Transport;

/// One connection to an engine.
///
/// Requests are strictly sequential: each call writes a command, reads its
/// reply, and only then returns. The transport sits in a `RefCell`, so a
/// `Link` can move to another thread but cannot be shared between threads.
/// Workers that need independent progress open their own link.
pub struct Link {
    transport: RefCell<Transport>,
    config: LinkConfig,
    peer: SocketAddr,
}

impl Link {
    /// Connect and complete the handshake.
    pub fn connect(config: LinkConfig) -> LinkResult<Self> {
        let transport = Transport::connect(&config)?;
        let peer = transport.peer();
        Ok(Self {
            transport: RefCell::new(transport),
            config,
            peer,
        })
    }

    /// Connect to the default local endpoint.
    pub fn connect_default() -> LinkResult<Self> {
        Self::connect(LinkConfig::default())
    }

    pub fn config(&self) -> &LinkConfig {
        &self.config
    }

    /// Address of the engine this link talks to.
    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Whether the connection is still usable. A link that hit an I/O error,
    /// a timeout or a protocol violation never becomes usable again.
    pub fn is_connected(&self) -> bool {
        self.transport
            .try_borrow()
            .map(|transport| transport.is_alive())
            .unwrap_or(true)
    }

    /// Close the connection. Later calls fail with
    /// [`LinkError::ConnectionClosed`].
    pub fn disconnect(&self) {
        if let Ok(mut transport) = self.transport.try_borrow_mut() {
            transport.close();
        }
    }

    /// Rebuild a proxy from a handle obtained earlier on this link.
    pub fn wrap(&self, handle: ItemHandle) -> Item<'_> {
        Item::new(self, handle)
    }

    /// Ask the engine process to exit, then close the link.
    pub fn quit(self) -> LinkResult<()> {
        let result = self.exchange("QUIT", 0, |t| t.recv_status());
        self.disconnect();
        result
    }

    /// Run one request/response exchange.
    ///
    /// Sends the command line, then lets `body` stage arguments and read the
    /// reply. Failures that leave the stream out of sync tear the link down.
    pub(crate) fn exchange<T>(
        &self,
        command: &'static str,
        item: u64,
        body: impl FnOnce(&mut Transport) -> LinkResult<T>,
    ) -> LinkResult<T> {
        let mut transport = self.transport.try_borrow_mut().map_err(|_| {
            LinkError::protocol(format!("{command} issued while another request is in flight"))
        })?;
        debug!(command, item, "request");
        transport.begin()?;
        transport.send_line(command)?;
        let result = body(&mut transport);
        if let Err(err) = &result {
            if err.is_connection_fatal() && transport.is_alive() {
                transport.abort(&err.to_string());
            }
        }
        result
    }
}

impl fmt::Debug for Link {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Link")
            .field("peer", &self.peer)
            .field("connected", &self.is_connected())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::io::BufReader;
    use std::net::TcpListener;
    use std::thread;
    use std::time::Duration;

    use super::*;
    use crate::transport::READY;
    use crate::wire;

    /// Accept one client, answer the handshake, then wait for it to hang up.
    fn ready_engine() -> (LinkConfig, thread::JoinHandle<()>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            let mut writer = stream.try_clone().unwrap();
            let mut reader = BufReader::new(stream);
            wire::read_line(&mut reader).unwrap();
            wire::read_line(&mut reader).unwrap();
            wire::write_line(&mut writer, READY).unwrap();
            while wire::read_line(&mut reader).is_ok() {}
        });
        let config = LinkConfig::default()
            .with_addr(addr)
            .with_timeout(Duration::from_secs(2));
        (config, handle)
    }

    #[test]
    fn nested_requests_are_refused() {
        let (config, engine) = ready_engine();
        let link = Link::connect(config).unwrap();
        let outer = link.exchange("Outer", 0, |_| {
            let inner = link.exchange("Inner", 0, |_| Ok(()));
            assert!(matches!(inner, Err(LinkError::ProtocolViolation(_))));
            Ok(())
        });
        assert!(outer.is_ok());
        assert!(link.is_connected());
        drop(link);
        engine.join().unwrap();
    }

    #[test]
    fn disconnected_link_refuses_requests() {
        let (config, engine) = ready_engine();
        let link = Link::connect(config).unwrap();
        assert!(format!("{link:?}").contains("connected: true"));
        link.disconnect();
        assert!(!link.is_connected());
        assert!(matches!(
            link.exchange("G_Name", 0, |t| t.recv_line()),
            Err(LinkError::ConnectionClosed)
        ));
        engine.join().unwrap();
    }
}
