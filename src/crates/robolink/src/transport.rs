use std::io::{self, BufReader, ErrorKind, Write};
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::time::Duration;

use tracing::{debug, info, trace, warn};

use crate::config::LinkConfig;
use crate::error::{LinkError, LinkResult};
use crate::math::Matrix;
use crate::status;
use crate::wire;

/// Line the engine answers the handshake with.
pub const READY: &str = "READY";

/// The single TCP stream behind a link.
///
/// Outgoing bytes collect in `pending` and go out in one write right before
/// the first read of a response. Once any read or write fails at the I/O or
/// framing level the transport is dead and refuses further traffic.
pub(crate) struct Transport {
    reader: BufReader<TcpStream>,
    writer: TcpStream,
    pending: Vec<u8>,
    dead: bool,
    timeout: Duration,
    peer: SocketAddr,
}

fn as_socket_timeout(timeout: Duration) -> Option<Duration> {
    (!timeout.is_zero()).then_some(timeout)
}

impl Transport {
    /// Open the stream and run the `CMD_START` handshake.
    pub(crate) fn connect(config: &LinkConfig) -> LinkResult<Self> {
        let peer = config.socket_addr()?;
        let connect_err = |source| LinkError::Connect {
            addr: peer.to_string(),
            source,
        };
        let stream = match as_socket_timeout(config.connect_timeout) {
            Some(limit) => TcpStream::connect_timeout(&peer, limit),
            None => TcpStream::connect(peer),
        }
        .map_err(connect_err)?;
        stream.set_nodelay(true).map_err(connect_err)?;
        stream
            .set_read_timeout(as_socket_timeout(config.timeout))
            .map_err(connect_err)?;
        stream
            .set_write_timeout(as_socket_timeout(config.timeout))
            .map_err(connect_err)?;
        let writer = stream.try_clone().map_err(connect_err)?;

        let mut transport = Self {
            reader: BufReader::new(stream),
            writer,
            pending: Vec::new(),
            dead: false,
            timeout: config.timeout,
            peer,
        };
        transport.handshake(config.safe_mode, !config.auto_render)?;
        info!(peer = %peer, "connected to engine");
        Ok(transport)
    }

    fn handshake(&mut self, safe_mode: bool, auto_update: bool) -> LinkResult<()> {
        self.send_line("CMD_START")?;
        self.send_line(&format!("{} {}", i32::from(safe_mode), i32::from(auto_update)))?;
        let reply = self.recv_line()?;
        if reply != READY {
            self.abort("handshake rejected");
            return Err(LinkError::HandshakeRejected(reply));
        }
        debug!(peer = %self.peer, "handshake complete");
        Ok(())
    }

    pub(crate) fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub(crate) fn is_alive(&self) -> bool {
        !self.dead
    }

    /// Start a new request: drop any bytes a previous, aborted request left.
    pub(crate) fn begin(&mut self) -> LinkResult<()> {
        self.ensure_alive()?;
        self.pending.clear();
        Ok(())
    }

    /// Tear the connection down on purpose.
    pub(crate) fn close(&mut self) {
        if !self.dead {
            self.dead = true;
            let _ = self.writer.shutdown(Shutdown::Both);
            info!(peer = %self.peer, "disconnected from engine");
        }
    }

    fn ensure_alive(&self) -> LinkResult<()> {
        if self.dead {
            Err(LinkError::ConnectionClosed)
        } else {
            Ok(())
        }
    }

    pub(crate) fn abort(&mut self, reason: &str) {
        if !self.dead {
            warn!(peer = %self.peer, reason, "tearing down engine connection");
            self.dead = true;
            self.pending.clear();
            let _ = self.writer.shutdown(Shutdown::Both);
        }
    }

    fn classify(&self, err: LinkError) -> LinkError {
        match err {
            LinkError::Io(io) if matches!(io.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {
                LinkError::Timeout(self.timeout)
            }
            other => other,
        }
    }

    fn fail(&mut self, err: LinkError) -> LinkError {
        let err = self.classify(err);
        if err.is_connection_fatal() {
            self.abort(&err.to_string());
        }
        err
    }

    fn stage(&mut self, encode: impl FnOnce(&mut Vec<u8>) -> io::Result<()>) -> LinkResult<()> {
        self.ensure_alive()?;
        encode(&mut self.pending).map_err(|err| {
            if err.kind() == ErrorKind::InvalidInput {
                LinkError::invalid_argument(err.to_string())
            } else {
                LinkError::Io(err)
            }
        })
    }

    /// Write everything staged so far.
    pub(crate) fn flush(&mut self) -> LinkResult<()> {
        self.ensure_alive()?;
        if self.pending.is_empty() {
            return Ok(());
        }
        trace!(bytes = self.pending.len(), "flushing request");
        let bytes = std::mem::take(&mut self.pending);
        let written = self.writer.write_all(&bytes).and_then(|_| self.writer.flush());
        written.map_err(|err| self.fail(LinkError::Io(err)))
    }

    fn recv<T>(
        &mut self,
        decode: impl FnOnce(&mut BufReader<TcpStream>) -> LinkResult<T>,
    ) -> LinkResult<T> {
        self.flush()?;
        let result = decode(&mut self.reader);
        result.map_err(|err| self.fail(err))
    }

    pub(crate) fn send_line(&mut self, text: &str) -> LinkResult<()> {
        self.stage(|buf| wire::write_line(buf, text))
    }

    pub(crate) fn send_int(&mut self, value: i32) -> LinkResult<()> {
        self.stage(|buf| wire::write_i32(buf, value))
    }

    pub(crate) fn send_handle(&mut self, raw: u64) -> LinkResult<()> {
        self.stage(|buf| wire::write_handle(buf, raw))
    }

    pub(crate) fn send_array(&mut self, values: &[f64]) -> LinkResult<()> {
        self.stage(|buf| wire::write_array(buf, values))
    }

    pub(crate) fn send_matrix(&mut self, matrix: &Matrix) -> LinkResult<()> {
        self.stage(|buf| wire::write_matrix(buf, matrix))
    }

    pub(crate) fn send_pose(&mut self, pose: &Matrix) -> LinkResult<()> {
        pose.ensure_homogeneous()?;
        self.stage(|buf| wire::write_pose(buf, pose))
    }

    pub(crate) fn recv_line(&mut self) -> LinkResult<String> {
        self.recv(wire::read_line)
    }

    pub(crate) fn recv_int(&mut self) -> LinkResult<i32> {
        self.recv(wire::read_i32)
    }

    pub(crate) fn recv_count(&mut self, what: &str) -> LinkResult<usize> {
        self.recv(|r| wire::read_count(r, what))
    }

    pub(crate) fn recv_array(&mut self) -> LinkResult<Vec<f64>> {
        self.recv(wire::read_array)
    }

    pub(crate) fn recv_matrix(&mut self) -> LinkResult<Matrix> {
        self.recv(wire::read_matrix)
    }

    pub(crate) fn recv_pose(&mut self) -> LinkResult<Matrix> {
        self.recv(wire::read_pose)
    }

    pub(crate) fn recv_item(&mut self) -> LinkResult<(u64, i32)> {
        self.recv(wire::read_item)
    }

    /// Read the status code that closes every response.
    pub(crate) fn recv_status(&mut self) -> LinkResult<()> {
        let result = self.recv(status::read_status);
        if let Err(LinkError::RemoteSoftFailure(message)) = &result {
            warn!(peer = %self.peer, message = %message, "engine reported a soft failure");
        }
        result
    }

    /// Run `f` with the read timeout temporarily replaced by `timeout`.
    pub(crate) fn with_read_timeout<T>(
        &mut self,
        timeout: Duration,
        f: impl FnOnce(&mut Self) -> LinkResult<T>,
    ) -> LinkResult<T> {
        self.flush()?;
        let previous = self.timeout;
        if let Err(err) = self.reader.get_ref().set_read_timeout(as_socket_timeout(timeout)) {
            return Err(self.fail(LinkError::Io(err)));
        }
        self.timeout = timeout;
        let result = f(self);
        self.timeout = previous;
        if self.is_alive() {
            if let Err(err) = self.reader.get_ref().set_read_timeout(as_socket_timeout(previous)) {
                return Err(self.fail(LinkError::Io(err)));
            }
        }
        result
    }
}

impl Drop for Transport {
    fn drop(&mut self) {
        self.close();
    }
}
