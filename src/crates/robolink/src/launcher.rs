use std::io::{BufRead, BufReader, Read};
use std::net::SocketAddr;
use std::process::{Child, Command, Stdio};
use std::sync::{mpsc, Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::config::{EngineConfig, LinkConfig};
use crate::error::{LinkError, LinkResult};
use crate::link::Link;

const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// Origin stream for captured log lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogStream {
    Stdout,
    Stderr,
}

/// Single captured log line with its source.
#[derive(Debug, Clone)]
pub struct LogLine {
    pub stream: LogStream,
    pub line: String,
}

/// A running engine process that announced its listen address.
pub struct EngineProcess {
    child: Child,
    address: SocketAddr,
    link_config: LinkConfig,
    log_buffer: Arc<Mutex<Vec<LogLine>>>,
    log_readers: Vec<thread::JoinHandle<()>>,
    stopped: bool,
}

impl EngineProcess {
    /// Spawn the engine and wait until it prints `listening on ADDR`.
    pub fn spawn(config: EngineConfig) -> LinkResult<Self> {
        let mut cmd = Command::new(&config.binary_path);
        let mut args = config.extra_args.clone();
        if let Some(path) = &config.station_path {
            args.push("--station".to_string());
            args.push(path.display().to_string());
        }
        let has_bind_arg = args
            .iter()
            .any(|arg| arg == "--bind-addr" || arg.starts_with("--bind-addr="));
        if !has_bind_arg {
            args.push("--bind-addr".to_string());
            args.push("127.0.0.1:0".to_string());
        }
        cmd.args(args);

        if let Some(dir) = &config.working_directory {
            cmd.current_dir(dir);
        }
        cmd.envs(&config.env);
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());

        let mut child = cmd
            .spawn()
            .map_err(|err| LinkError::engine_start(format!("{}: {err}", config.binary_path.display())))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| LinkError::engine_start("failed to capture stdout"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| LinkError::engine_start("failed to capture stderr"))?;

        let log_buffer = Arc::new(Mutex::new(Vec::new()));
        let (address_tx, address_rx) = mpsc::channel();
        let log_readers = vec![
            capture_stream(stdout, LogStream::Stdout, log_buffer.clone(), Some(address_tx)),
            capture_stream(stderr, LogStream::Stderr, log_buffer.clone(), None),
        ];
        let address = match await_address(&mut child, &address_rx, config.startup_timeout) {
            Ok(address) => address,
            Err(err) => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(err);
            }
        };
        info!(%address, pid = child.id(), "engine started");

        Ok(Self {
            child,
            address,
            link_config: config.link,
            log_buffer,
            log_readers,
            stopped: false,
        })
    }

    /// Address the engine announced.
    pub fn address(&self) -> SocketAddr {
        self.address
    }

    /// Open a new link to the engine using the configured link flags.
    pub fn connect(&mut self) -> LinkResult<Link> {
        self.ensure_running()?;
        Link::connect(self.link_config.clone().with_addr(self.address))
    }

    /// Fail with [`LinkError::EngineExited`] if the process already ended.
    pub fn ensure_running(&mut self) -> LinkResult<()> {
        match self.child.try_wait()? {
            Some(status) => Err(LinkError::EngineExited(status)),
            None => Ok(()),
        }
    }

    /// Every line captured so far, across both streams.
    pub fn logs(&self) -> Vec<LogLine> {
        self.log_buffer
            .lock()
            .map(|buffer| buffer.clone())
            .unwrap_or_default()
    }

    /// Captured lines containing `needle`.
    pub fn logs_matching(&self, needle: &str) -> Vec<LogLine> {
        self.logs()
            .into_iter()
            .filter(|line| line.line.contains(needle))
            .collect()
    }

    /// Ask the engine to quit and wait for it, killing it after a grace period.
    pub fn shutdown(mut self) -> LinkResult<()> {
        self.request_shutdown()
    }

    fn request_shutdown(&mut self) -> LinkResult<()> {
        if self.stopped {
            return Ok(());
        }
        self.stopped = true;

        let quit_config = self
            .link_config
            .clone()
            .with_addr(self.address)
            .with_connect_timeout(SHUTDOWN_GRACE)
            .with_timeout(SHUTDOWN_GRACE);
        match Link::connect(quit_config).and_then(Link::quit) {
            Ok(()) => debug!(address = %self.address, "engine acknowledged quit"),
            Err(err) => debug!(address = %self.address, error = %err, "quit request failed"),
        }

        let start = Instant::now();
        while start.elapsed() < SHUTDOWN_GRACE {
            if let Some(status) = self.child.try_wait()? {
                info!(%status, "engine exited");
                self.join_log_readers();
                return Ok(());
            }
            thread::sleep(Duration::from_millis(10));
        }

        warn!(address = %self.address, "engine ignored quit, killing it");
        let _ = self.child.kill();
        let _ = self.child.wait();
        self.join_log_readers();
        Ok(())
    }

    /// The pipes close with the process, so the readers end on their own.
    fn join_log_readers(&mut self) {
        for reader in self.log_readers.drain(..) {
            let _ = reader.join();
        }
    }
}

impl Drop for EngineProcess {
    fn drop(&mut self) {
        let _ = self.request_shutdown();
    }
}

/// Copy every line of `reader` into `buffer`. The first `listening on ADDR`
/// line is also reported through `address_tx`.
fn capture_stream<R: Read + Send + 'static>(
    reader: R,
    stream: LogStream,
    buffer: Arc<Mutex<Vec<LogLine>>>,
    mut address_tx: Option<mpsc::Sender<SocketAddr>>,
) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        for line in BufReader::new(reader).lines().map_while(Result::ok) {
            let address = parse_listen_line(&line);
            if let Ok(mut guard) = buffer.lock() {
                guard.push(LogLine { stream, line });
            }
            if let Some(address) = address {
                if let Some(tx) = address_tx.take() {
                    let _ = tx.send(address);
                }
            }
        }
    })
}

fn await_address(
    child: &mut Child,
    address_rx: &mpsc::Receiver<SocketAddr>,
    timeout: Duration,
) -> LinkResult<SocketAddr> {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if let Some(status) = child.try_wait()? {
            return Err(LinkError::EngineExited(status));
        }
        match address_rx.recv_timeout(Duration::from_millis(50)) {
            Ok(address) => return Ok(address),
            Err(mpsc::RecvTimeoutError::Timeout) => {}
            // stdout closed without an address
            Err(mpsc::RecvTimeoutError::Disconnected) => {
                return Err(LinkError::EngineExited(child.wait()?));
            }
        }
    }
    Err(LinkError::StartupTimeout(timeout))
}

/// The fake engine prints `listening on ADDR` on stdout once bound.
pub(crate) fn parse_listen_line(line: &str) -> Option<SocketAddr> {
    line.trim().strip_prefix("listening on ")?.trim().parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn listen_line_parsing() {
        assert_eq!(
            parse_listen_line("listening on 127.0.0.1:4321"),
            Some("127.0.0.1:4321".parse().unwrap())
        );
        assert_eq!(
            parse_listen_line("listening on [::1]:20500\n"),
            Some("[::1]:20500".parse().unwrap())
        );
        assert_eq!(parse_listen_line("INFO client listening on 127.0.0.1:1"), None);
        assert_eq!(parse_listen_line("listening on nowhere"), None);
        assert_eq!(parse_listen_line("starting up"), None);
    }

    #[test]
    fn missing_binary_fails_to_start() {
        let config = EngineConfig::new("/nonexistent/robolink-engine")
            .with_startup_timeout(Duration::from_millis(200));
        assert!(matches!(
            EngineProcess::spawn(config),
            Err(LinkError::EngineStart(_))
        ));
    }
}
