use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use native_tls::{HandshakeError, TlsConnector, TlsStream};
use sha1::{Digest, Sha1};
use std::io::{self, ErrorKind, Read, Write};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info, instrument, trace, warn};
use url::Url;

use crate::core::config::ServiceConfig;
use crate::core::errors::{preview, TradeError, PREVIEW_LEN};
use crate::core::stop::StopFlag;

pub const OPCODE_CONTINUATION: u8 = 0x0;
pub const OPCODE_TEXT: u8 = 0x1;
pub const OPCODE_BINARY: u8 = 0x2;
pub const OPCODE_CLOSE: u8 = 0x8;
pub const OPCODE_PING: u8 = 0x9;
pub const OPCODE_PONG: u8 = 0xA;

/// Outbound frames only use the 7- and 16-bit length forms.
pub const MAX_SEND_PAYLOAD: usize = 0xFFFF;
/// Inbound frames declaring more than this are drained and rejected.
pub const MAX_RECV_PAYLOAD: usize = 2 * 1024 * 1024;

const MAX_HANDSHAKE_RESPONSE: usize = 65_536;
const DRAIN_CHUNK: usize = 8 * 1024;

/// Blocking WebSocket configuration
#[derive(Debug, Clone)]
pub struct WsConfig {
    pub connect_timeout: Duration,
    /// Socket read timeout; one poll of the session loop
    pub read_timeout: Duration,
    /// Abort a frame or handshake when no byte arrives for this long
    pub stall_timeout: Duration,
    pub ping_interval: Duration,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub max_payload: usize,
    /// Time `WsClient::stop` waits before shutting the socket down underneath the worker
    pub shutdown_grace: Duration,
    pub stop_poll_slice: Duration,
}

impl Default for WsConfig {
    fn default() -> Self {
        Self::from(&ServiceConfig::default())
    }
}

impl From<&ServiceConfig> for WsConfig {
    fn from(config: &ServiceConfig) -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            read_timeout: config.ws_read_timeout,
            stall_timeout: config.ws_stall_timeout,
            ping_interval: config.ws_ping_interval,
            initial_backoff: config.reconnect_initial_backoff,
            max_backoff: config.reconnect_max_backoff,
            max_payload: MAX_RECV_PAYLOAD,
            shutdown_grace: config.shutdown_grace,
            stop_poll_slice: config.stop_poll_slice,
        }
    }
}

/// Client masking keys from a linear-congruential sequence.
#[derive(Debug, Clone)]
pub struct MaskGen {
    state: u32,
}

impl MaskGen {
    pub const fn new(seed: u32) -> Self {
        Self { state: seed }
    }

    pub fn next_mask(&mut self) -> [u8; 4] {
        let mut mask = [0u8; 4];
        for byte in &mut mask {
            self.state = self
                .state
                .wrapping_mul(1_664_525)
                .wrapping_add(1_013_904_223);
            *byte = (self.state & 0xFF) as u8;
        }
        mask
    }
}

/// Encode one final, masked client frame.
pub fn encode_frame(opcode: u8, payload: &[u8], mask: [u8; 4]) -> Result<Vec<u8>, TradeError> {
    let len = payload.len();
    if len > MAX_SEND_PAYLOAD {
        return Err(TradeError::ProtocolError(format!(
            "frame payload of {} bytes exceeds {}",
            len, MAX_SEND_PAYLOAD
        )));
    }

    let mut out = Vec::with_capacity(len + 8);
    out.push(0x80 | (opcode & 0x0F));
    if len < 126 {
        out.push(0x80 | len as u8);
    } else {
        out.push(0x80 | 126);
        out.extend_from_slice(&(len as u16).to_be_bytes());
    }
    out.extend_from_slice(&mask);
    out.extend(payload.iter().enumerate().map(|(i, b)| b ^ mask[i % 4]));
    Ok(out)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub fin: bool,
    pub opcode: u8,
    pub payload: Vec<u8>,
}

fn is_timeout(e: &io::Error) -> bool {
    matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut)
}

/// Fill `buf`, riding out socket read timeouts until no byte has arrived for
/// `stall` or the stop flag is raised.
fn read_full<R: Read>(
    reader: &mut R,
    buf: &mut [u8],
    stall: Duration,
    stop: &StopFlag,
) -> Result<(), TradeError> {
    let mut filled = 0;
    let mut last_progress = Instant::now();
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => return Err(TradeError::TransportError("connection closed".to_string())),
            Ok(n) => {
                filled += n;
                last_progress = Instant::now();
            }
            Err(e) if e.kind() == ErrorKind::Interrupted => {}
            Err(e) if is_timeout(&e) => {
                if stop.is_stopped() {
                    return Err(TradeError::Cancelled);
                }
                if last_progress.elapsed() >= stall {
                    return Err(TradeError::Timeout("websocket read stalled".to_string()));
                }
            }
            Err(e) => return Err(TradeError::TransportError(format!("read failed: {}", e))),
        }
    }
    Ok(())
}

fn drain<R: Read>(reader: &mut R, mut remaining: u64, stall: Duration, stop: &StopFlag) -> Result<(), TradeError> {
    let mut scratch = [0u8; DRAIN_CHUNK];
    while remaining > 0 {
        let n = remaining.min(DRAIN_CHUNK as u64) as usize;
        read_full(reader, &mut scratch[..n], stall, stop)?;
        remaining -= n as u64;
    }
    Ok(())
}

/// Read one frame.
///
/// Returns `Ok(None)` when the first byte does not arrive within the socket's
/// read timeout. Once a frame has started, the rest of it must arrive within
/// `stall` of the previous byte. A declared length above `max_payload` is
/// consumed from the stream and then reported as an error.
pub fn read_frame<R: Read>(
    reader: &mut R,
    max_payload: usize,
    stall: Duration,
    stop: &StopFlag,
) -> Result<Option<Frame>, TradeError> {
    let mut head = [0u8; 2];
    loop {
        match reader.read(&mut head[..1]) {
            Ok(0) => return Err(TradeError::TransportError("connection closed".to_string())),
            Ok(_) => break,
            Err(e) if e.kind() == ErrorKind::Interrupted => {}
            Err(e) if is_timeout(&e) => return Ok(None),
            Err(e) => return Err(TradeError::TransportError(format!("read failed: {}", e))),
        }
    }
    read_full(reader, &mut head[1..], stall, stop)?;

    let fin = head[0] & 0x80 != 0;
    let opcode = head[0] & 0x0F;
    let masked = head[1] & 0x80 != 0;
    let len = match head[1] & 0x7F {
        126 => {
            let mut ext = [0u8; 2];
            read_full(reader, &mut ext, stall, stop)?;
            u64::from(u16::from_be_bytes(ext))
        }
        127 => {
            let mut ext = [0u8; 8];
            read_full(reader, &mut ext, stall, stop)?;
            u64::from_be_bytes(ext)
        }
        n => u64::from(n),
    };

    let mask = if masked {
        let mut key = [0u8; 4];
        read_full(reader, &mut key, stall, stop)?;
        Some(key)
    } else {
        None
    };

    if len > max_payload as u64 {
        drain(reader, len, stall, stop)?;
        return Err(TradeError::ProtocolError(format!(
            "frame payload of {} bytes exceeds limit of {}",
            len, max_payload
        )));
    }

    let mut payload = vec![0u8; len as usize];
    read_full(reader, &mut payload, stall, stop)?;
    if let Some(key) = mask {
        for (i, b) in payload.iter_mut().enumerate() {
            *b ^= key[i % 4];
        }
    }
    Ok(Some(Frame { fin, opcode, payload }))
}

pub fn generate_key() -> String {
    let nonce: [u8; 16] = rand::random();
    STANDARD.encode(nonce)
}

const WS_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// `Sec-WebSocket-Accept` value a server must answer `key` with.
pub fn accept_key(key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(key.as_bytes());
    hasher.update(WS_GUID.as_bytes());
    STANDARD.encode(hasher.finalize())
}

/// Value of the first header called `name`, ignoring case.
fn header_value<'a>(response: &'a str, name: &str) -> Option<&'a str> {
    response.lines().skip(1).find_map(|line| {
        let (key, value) = line.split_once(':')?;
        key.trim().eq_ignore_ascii_case(name).then(|| value.trim())
    })
}

pub fn handshake_request(host: &str, path: &str, key: &str) -> String {
    format!(
        "GET {} HTTP/1.1\r\nHost: {}\r\nUpgrade: websocket\r\nConnection: Upgrade\r\nSec-WebSocket-Key: {}\r\nSec-WebSocket-Version: 13\r\n\r\n",
        path, host, key
    )
}

/// Send the upgrade request, then require a `101` status line carrying the
/// `Sec-WebSocket-Accept` that matches our key.
///
/// The response is read one byte at a time so that no frame bytes following
/// the header block are consumed.
pub fn client_handshake<S: Read + Write>(
    stream: &mut S,
    host: &str,
    path: &str,
    stall: Duration,
    stop: &StopFlag,
) -> Result<(), TradeError> {
    let key = generate_key();
    let request = handshake_request(host, path, &key);
    stream
        .write_all(request.as_bytes())
        .and_then(|()| stream.flush())
        .map_err(|e| TradeError::TransportError(format!("handshake write failed: {}", e)))?;

    let mut response = Vec::with_capacity(512);
    let mut byte = [0u8; 1];
    while !response.ends_with(b"\r\n\r\n") {
        if response.len() >= MAX_HANDSHAKE_RESPONSE {
            return Err(TradeError::ProtocolError("handshake response too large".to_string()));
        }
        read_full(stream, &mut byte, stall, stop)?;
        response.push(byte[0]);
    }

    let text = String::from_utf8_lossy(&response);
    let status_line = text.lines().next().unwrap_or_default();
    if status_line.split_whitespace().nth(1) != Some("101") {
        return Err(TradeError::TransportError(format!(
            "handshake rejected: {}",
            preview(status_line, PREVIEW_LEN)
        )));
    }
    match header_value(&text, "Sec-WebSocket-Accept") {
        Some(accept) if accept == accept_key(&key) => Ok(()),
        Some(accept) => Err(TradeError::ProtocolError(format!(
            "handshake accept mismatch: {}",
            preview(accept, PREVIEW_LEN)
        ))),
        None => Err(TradeError::ProtocolError(
            "handshake response without Sec-WebSocket-Accept".to_string(),
        )),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WsEvent {
    Text(String),
    Binary(Vec<u8>),
    /// Nothing arrived this poll, or a control frame was handled internally
    Idle,
    Closed,
}

/// Anything a handler can push text frames into.
pub trait WsSink {
    fn send_text(&mut self, text: &str) -> Result<(), TradeError>;
}

/// An upgraded connection over any byte stream.
pub struct WsConnection<S> {
    stream: S,
    masks: MaskGen,
    config: WsConfig,
    last_ping: Option<Instant>,
}

impl<S> std::fmt::Debug for WsConnection<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WsConnection")
            .field("last_ping", &self.last_ping)
            .finish_non_exhaustive()
    }
}

impl<S: Read + Write> WsConnection<S> {
    /// Wrap a stream that has already been upgraded.
    pub fn new(stream: S, config: WsConfig) -> Self {
        Self::with_mask_seed(stream, config, rand::random())
    }

    pub fn with_mask_seed(stream: S, config: WsConfig, seed: u32) -> Self {
        Self {
            stream,
            masks: MaskGen::new(seed),
            config,
            last_ping: None,
        }
    }

    #[instrument(skip_all, fields(host = %host, path = %path))]
    pub fn handshake(mut stream: S, host: &str, path: &str, config: WsConfig, stop: &StopFlag) -> Result<Self, TradeError> {
        client_handshake(&mut stream, host, path, config.stall_timeout, stop)?;
        debug!("websocket upgrade accepted");
        Ok(Self::new(stream, config))
    }

    pub fn send_frame(&mut self, opcode: u8, payload: &[u8]) -> Result<(), TradeError> {
        let frame = encode_frame(opcode, payload, self.masks.next_mask())?;
        self.stream
            .write_all(&frame)
            .and_then(|()| self.stream.flush())
            .map_err(|e| TradeError::TransportError(format!("write failed: {}", e)))
    }

    pub fn ping(&mut self) -> Result<(), TradeError> {
        self.send_frame(OPCODE_PING, &[])?;
        self.last_ping = Some(Instant::now());
        Ok(())
    }

    /// Send a ping if none has gone out within the configured interval.
    pub fn ping_if_due(&mut self) -> Result<bool, TradeError> {
        let due = self
            .last_ping
            .map_or(true, |at| at.elapsed() >= self.config.ping_interval);
        if due {
            self.ping()?;
        }
        Ok(due)
    }

    /// Read at most one frame. Pings are answered here with a pong echoing
    /// the payload.
    pub fn recv(&mut self, stop: &StopFlag) -> Result<WsEvent, TradeError> {
        let Some(frame) = read_frame(
            &mut self.stream,
            self.config.max_payload,
            self.config.stall_timeout,
            stop,
        )?
        else {
            return Ok(WsEvent::Idle);
        };

        match frame.opcode {
            OPCODE_TEXT => String::from_utf8(frame.payload)
                .map(WsEvent::Text)
                .map_err(|e| TradeError::ProtocolError(format!("text frame is not UTF-8: {}", e))),
            OPCODE_BINARY => Ok(WsEvent::Binary(frame.payload)),
            OPCODE_CLOSE => Ok(WsEvent::Closed),
            OPCODE_PING => {
                trace!(len = frame.payload.len(), "ping received");
                self.send_frame(OPCODE_PONG, &frame.payload)?;
                Ok(WsEvent::Idle)
            }
            OPCODE_PONG | OPCODE_CONTINUATION => Ok(WsEvent::Idle),
            other => Err(TradeError::ProtocolError(format!("unexpected opcode 0x{:x}", other))),
        }
    }

    /// Best-effort close frame.
    pub fn close(&mut self) {
        if let Err(e) = self.send_frame(OPCODE_CLOSE, &[]) {
            trace!(error = %e, "close frame not sent");
        }
    }

    pub fn get_ref(&self) -> &S {
        &self.stream
    }

    pub fn into_inner(self) -> S {
        self.stream
    }
}

impl<S: Read + Write> WsSink for WsConnection<S> {
    fn send_text(&mut self, text: &str) -> Result<(), TradeError> {
        self.send_frame(OPCODE_TEXT, text.as_bytes())
    }
}

/// Host, port and request path taken from a `ws://` or `wss://` URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WsEndpoint {
    pub host: String,
    pub port: u16,
    pub path: String,
    pub tls: bool,
}

impl WsEndpoint {
    pub fn parse(raw: &str) -> Result<Self, TradeError> {
        let url = Url::parse(raw).map_err(|e| TradeError::Other(format!("invalid websocket url {}: {}", raw, e)))?;
        let tls = match url.scheme() {
            "wss" => true,
            "ws" => false,
            other => {
                return Err(TradeError::Other(format!("unsupported websocket scheme: {}", other)));
            }
        };
        let host = url
            .host_str()
            .ok_or_else(|| TradeError::Other(format!("websocket url has no host: {}", raw)))?
            .to_string();
        let port = url.port_or_known_default().unwrap_or(if tls { 443 } else { 80 });
        let mut path = url.path().to_string();
        if path.is_empty() {
            path.push('/');
        }
        if let Some(query) = url.query() {
            path.push('?');
            path.push_str(query);
        }
        Ok(Self { host, port, path, tls })
    }

    /// `Host` header value; the port is omitted when it is the scheme default.
    pub fn host_header(&self) -> String {
        let default_port = if self.tls { 443 } else { 80 };
        if self.port == default_port {
            self.host.clone()
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

pub enum MaybeTlsStream {
    Plain(TcpStream),
    Tls(Box<TlsStream<TcpStream>>),
}

impl Read for MaybeTlsStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Self::Plain(s) => s.read(buf),
            Self::Tls(s) => s.read(buf),
        }
    }
}

impl Write for MaybeTlsStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Self::Plain(s) => s.write(buf),
            Self::Tls(s) => s.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Self::Plain(s) => s.flush(),
            Self::Tls(s) => s.flush(),
        }
    }
}

/// A clone of the raw socket, used to unblock a worker stuck in a read.
#[derive(Debug)]
pub struct ShutdownHandle(TcpStream);

impl ShutdownHandle {
    pub fn shutdown(&self) {
        if let Err(e) = self.0.shutdown(Shutdown::Both) {
            trace!(error = %e, "socket shutdown");
        }
    }
}

fn tls_connect(
    host: &str,
    tcp: TcpStream,
    stall: Duration,
    stop: &StopFlag,
) -> Result<TlsStream<TcpStream>, TradeError> {
    let connector =
        TlsConnector::new().map_err(|e| TradeError::TransportError(format!("TLS setup failed: {}", e)))?;
    let started = Instant::now();
    let mut attempt = connector.connect(host, tcp);
    loop {
        match attempt {
            Ok(stream) => return Ok(stream),
            Err(HandshakeError::Failure(e)) => {
                return Err(TradeError::TransportError(format!("TLS handshake failed: {}", e)));
            }
            Err(HandshakeError::WouldBlock(mid)) => {
                if stop.is_stopped() {
                    return Err(TradeError::Cancelled);
                }
                if started.elapsed() >= stall {
                    return Err(TradeError::Timeout("TLS handshake".to_string()));
                }
                attempt = mid.handshake();
            }
        }
    }
}

/// Open TCP (plus TLS for `wss`), then upgrade.
#[instrument(skip(config, stop))]
pub fn connect(
    url: &str,
    config: &WsConfig,
    stop: &StopFlag,
) -> Result<(WsConnection<MaybeTlsStream>, ShutdownHandle), TradeError> {
    let endpoint = WsEndpoint::parse(url)?;
    let addr = (endpoint.host.as_str(), endpoint.port)
        .to_socket_addrs()
        .map_err(|e| TradeError::TransportError(format!("resolve {} failed: {}", endpoint.host, e)))?
        .next()
        .ok_or_else(|| TradeError::TransportError(format!("no address for {}", endpoint.host)))?;

    let tcp = TcpStream::connect_timeout(&addr, config.connect_timeout)
        .map_err(|e| TradeError::TransportError(format!("connect {} failed: {}", addr, e)))?;
    let read_timeout = config.read_timeout.max(Duration::from_millis(1));
    let write_timeout = config.stall_timeout.max(Duration::from_millis(1));
    tcp.set_read_timeout(Some(read_timeout))
        .and_then(|()| tcp.set_write_timeout(Some(write_timeout)))
        .and_then(|()| tcp.set_nodelay(true))
        .map_err(|e| TradeError::TransportError(format!("socket setup failed: {}", e)))?;
    let shutdown = tcp
        .try_clone()
        .map(ShutdownHandle)
        .map_err(|e| TradeError::TransportError(format!("socket clone failed: {}", e)))?;

    let stream = if endpoint.tls {
        MaybeTlsStream::Tls(Box::new(tls_connect(&endpoint.host, tcp, config.stall_timeout, stop)?))
    } else {
        MaybeTlsStream::Plain(tcp)
    };
    let conn = WsConnection::handshake(stream, &endpoint.host_header(), &endpoint.path, config.clone(), stop)?;
    Ok((conn, shutdown))
}

/// Exponential reconnect delay with a cap.
#[derive(Debug, Clone)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    current: Duration,
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max,
            current: initial,
        }
    }

    /// The delay to wait now; the following one doubles up to the cap.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = self.current.saturating_mul(2).min(self.max);
        delay
    }

    pub fn current(&self) -> Duration {
        self.current
    }

    pub fn reset(&mut self) {
        self.current = self.initial;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WsState {
    #[default]
    Disconnected,
    Handshaking,
    Connected,
    Reconnecting,
}

/// Shared view of the session's current state.
#[derive(Debug, Clone, Default)]
pub struct StateCell(Arc<Mutex<WsState>>);

impl StateCell {
    fn guard(&self) -> MutexGuard<'_, WsState> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn get(&self) -> WsState {
        *self.guard()
    }

    pub fn set(&self, state: WsState) {
        *self.guard() = state;
    }
}

/// Venue logic plugged into the session loop. All calls happen on the
/// session thread.
pub trait WsHandler: Send + 'static {
    /// Called after every successful upgrade, typically to subscribe.
    fn on_connected(&mut self, sink: &mut dyn WsSink) -> Result<(), TradeError>;

    /// Called once per loop turn before reading.
    fn on_tick(&mut self, _sink: &mut dyn WsSink) -> Result<(), TradeError> {
        Ok(())
    }

    fn on_text(&mut self, text: &str);

    /// Returning `true` ends the current connection and reconnects.
    fn should_reconnect(&mut self) -> bool {
        false
    }
}

fn serve<S: Read + Write, H: WsHandler>(
    conn: &mut WsConnection<S>,
    handler: &mut H,
    stop: &StopFlag,
) -> Result<(), TradeError> {
    handler.on_connected(conn)?;
    loop {
        if stop.is_stopped() {
            return Ok(());
        }
        if handler.should_reconnect() {
            info!("websocket reconnect requested");
            return Ok(());
        }
        handler.on_tick(conn)?;
        conn.ping_if_due()?;
        match conn.recv(stop)? {
            WsEvent::Text(text) => handler.on_text(&text),
            WsEvent::Binary(_) | WsEvent::Idle => {}
            WsEvent::Closed => {
                debug!("websocket closed by peer");
                return Ok(());
            }
        }
    }
}

/// Connect, serve, back off, repeat until `stop` is raised.
///
/// `connect` returns an upgraded connection. Backoff starts at
/// `initial_backoff`, doubles up to `max_backoff` and resets once a
/// connection is established.
pub fn run_session<S, C, H>(mut connect: C, handler: &mut H, config: &WsConfig, stop: &StopFlag, state: &StateCell)
where
    S: Read + Write,
    C: FnMut() -> Result<WsConnection<S>, TradeError>,
    H: WsHandler,
{
    let mut backoff = Backoff::new(config.initial_backoff, config.max_backoff);
    let mut failures: u32 = 0;

    while !stop.is_stopped() {
        state.set(WsState::Handshaking);
        match connect() {
            Ok(mut conn) => {
                backoff.reset();
                failures = 0;
                state.set(WsState::Connected);
                info!("websocket connected");
                if let Err(e) = serve(&mut conn, handler, stop) {
                    if !stop.is_stopped() {
                        warn!(error = %e, "websocket session dropped");
                    }
                }
                conn.close();
            }
            Err(e) => {
                failures += 1;
                if failures == 1 {
                    warn!(error = %e, "websocket connect failed");
                } else {
                    debug!(error = %e, failures, "websocket connect failed again");
                }
            }
        }

        if stop.is_stopped() {
            break;
        }
        state.set(WsState::Reconnecting);
        let delay = backoff.next_delay();
        debug!(delay_ms = delay.as_millis() as u64, "websocket reconnecting");
        if stop.sleep(delay, config.stop_poll_slice) {
            break;
        }
    }
    state.set(WsState::Disconnected);
}

/// A session loop on its own thread.
pub struct WsClient {
    stop: StopFlag,
    state: StateCell,
    socket: Arc<Mutex<Option<ShutdownHandle>>>,
    handle: Option<JoinHandle<()>>,
    grace: Duration,
}

impl WsClient {
    pub fn spawn<H: WsHandler>(url: String, config: WsConfig, mut handler: H) -> Result<Self, TradeError> {
        WsEndpoint::parse(&url)?;
        let stop = StopFlag::new();
        let state = StateCell::default();
        let socket: Arc<Mutex<Option<ShutdownHandle>>> = Arc::default();
        let grace = config.shutdown_grace;

        let worker_stop = stop.clone();
        let worker_state = state.clone();
        let worker_socket = Arc::clone(&socket);
        let handle = thread::Builder::new()
            .name("ws-session".to_string())
            .spawn(move || {
                let dial = || -> Result<WsConnection<MaybeTlsStream>, TradeError> {
                    let (conn, shutdown) = connect(&url, &config, &worker_stop)?;
                    *worker_socket.lock().unwrap_or_else(PoisonError::into_inner) = Some(shutdown);
                    Ok(conn)
                };
                run_session(dial, &mut handler, &config, &worker_stop, &worker_state);
            })
            .map_err(|e| TradeError::Other(format!("failed to spawn websocket worker: {}", e)))?;

        Ok(Self {
            stop,
            state,
            socket,
            handle: Some(handle),
            grace,
        })
    }

    pub fn state(&self) -> WsState {
        self.state.get()
    }

    pub fn is_running(&self) -> bool {
        self.handle.is_some()
    }

    /// Raise the stop flag, give the worker `shutdown_grace` to notice, then
    /// shut the socket down underneath it and join.
    pub fn stop(&mut self) {
        self.stop.stop();
        let Some(handle) = self.handle.take() else {
            return;
        };
        let deadline = Instant::now() + self.grace;
        while !handle.is_finished() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }
        if !handle.is_finished() {
            warn!("websocket worker still busy after grace period, forcing socket shutdown");
            if let Some(socket) = self.socket.lock().unwrap_or_else(PoisonError::into_inner).as_ref() {
                socket.shutdown();
            }
        }
        if handle.join().is_err() {
            warn!("websocket worker panicked");
        }
    }
}

impl Drop for WsClient {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn unmasked(opcode: u8, payload: &[u8]) -> Vec<u8> {
        let mut out = vec![0x80 | opcode];
        if payload.len() < 126 {
            out.push(payload.len() as u8);
        } else if payload.len() <= 0xFFFF {
            out.push(126);
            out.extend_from_slice(&(payload.len() as u16).to_be_bytes());
        } else {
            out.push(127);
            out.extend_from_slice(&(payload.len() as u64).to_be_bytes());
        }
        out.extend_from_slice(payload);
        out
    }

    #[test]
    fn test_mask_sequence_is_lcg() {
        let mut masks = MaskGen::new(0);
        let mut x: u32 = 0;
        let mut expected = [0u8; 4];
        for b in &mut expected {
            x = x.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
            *b = (x & 0xFF) as u8;
        }
        assert_eq!(masks.next_mask(), expected);
        assert_ne!(masks.next_mask(), expected);
    }

    #[test]
    fn test_encode_header_forms() {
        let small = encode_frame(OPCODE_TEXT, b"hi", [0; 4]).unwrap();
        assert_eq!(&small[..2], &[0x81, 0x82]);

        let medium = encode_frame(OPCODE_BINARY, &[7u8; 300], [1, 2, 3, 4]).unwrap();
        assert_eq!(&medium[..4], &[0x82, 0xFE, 0x01, 0x2C]);
        assert_eq!(medium.len(), 4 + 4 + 300);

        assert!(encode_frame(OPCODE_TEXT, &vec![0u8; 65_536], [0; 4]).is_err());
    }

    #[test]
    fn test_read_accepts_64_bit_length_under_limit() {
        let payload = vec![0x5A; 70_000];
        let bytes = unmasked(OPCODE_BINARY, &payload);
        let mut cursor = Cursor::new(bytes);
        let frame = read_frame(&mut cursor, MAX_RECV_PAYLOAD, Duration::from_secs(1), &StopFlag::new())
            .unwrap()
            .unwrap();
        assert_eq!(frame.payload, payload);
    }

    #[test]
    fn test_oversized_frame_is_drained() {
        let mut bytes = unmasked(OPCODE_TEXT, &[b'x'; 40]);
        bytes.extend(unmasked(OPCODE_TEXT, b"next"));
        let mut cursor = Cursor::new(bytes);
        let stop = StopFlag::new();

        assert!(read_frame(&mut cursor, 16, Duration::from_secs(1), &stop).is_err());
        let next = read_frame(&mut cursor, 16, Duration::from_secs(1), &stop).unwrap().unwrap();
        assert_eq!(next.payload, b"next");
    }

    #[test]
    fn test_endpoint_parsing() {
        let ep = WsEndpoint::parse("wss://api.hyperliquid.xyz/ws").unwrap();
        assert_eq!(ep.host, "api.hyperliquid.xyz");
        assert_eq!(ep.port, 443);
        assert_eq!(ep.path, "/ws");
        assert!(ep.tls);
        assert_eq!(ep.host_header(), "api.hyperliquid.xyz");

        let local = WsEndpoint::parse("ws://127.0.0.1:9001").unwrap();
        assert_eq!(local.path, "/");
        assert_eq!(local.host_header(), "127.0.0.1:9001");

        assert!(WsEndpoint::parse("https://example.com").is_err());
    }

    #[test]
    fn test_backoff_doubles_and_resets() {
        let mut backoff = Backoff::new(Duration::from_secs(1), Duration::from_secs(30));
        let delays: Vec<u64> = (0..7).map(|_| backoff.next_delay().as_secs()).collect();
        assert_eq!(delays, vec![1, 2, 4, 8, 16, 30, 30]);
        backoff.reset();
        assert_eq!(backoff.next_delay(), Duration::from_secs(1));
    }

    #[test]
    fn test_handshake_request_shape() {
        let req = handshake_request("api.hyperliquid.xyz", "/ws", "abc");
        assert!(req.starts_with("GET /ws HTTP/1.1\r\n"));
        assert!(req.contains("Upgrade: websocket\r\n"));
        assert!(req.contains("Sec-WebSocket-Version: 13\r\n"));
        assert!(req.ends_with("\r\n\r\n"));
        assert_eq!(STANDARD.decode(generate_key()).unwrap().len(), 16);
    }

    #[test]
    fn test_accept_key_known_answer() {
        assert_eq!(accept_key("dGhlIHNhbXBsZSBub25jZQ=="), "s3pPLMBiTxaQ9kYGzzhZRbK+xOo=");
        let response = "HTTP/1.1 101 Switching Protocols\r\nsec-websocket-accept:  abc= \r\n\r\n";
        assert_eq!(header_value(response, "Sec-WebSocket-Accept"), Some("abc="));
        assert_eq!(header_value(response, "Upgrade"), None);
    }
}
