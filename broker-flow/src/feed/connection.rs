/// TCP connection to the feed server
///
/// Owns the socket, performs the handshake, sends commands and implements the reconnect
/// policy. Reads are bounded so a tick never waits longer than the configured timeout.
use std::io;

use async_trait::async_trait;
use derive_more::Display;
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt},
    net::TcpStream,
    time::timeout,
};
use tracing::{debug, info, warn};

use super::dispatch::{BROKER_BALANCE, FIELD_SEPARATOR, LAST, QUOTE, truncate};
use crate::{config::FeedConfig, error::ConnectionError};

/// Terminator appended to every outbound command
pub const LINE_TERMINATOR: &str = "\r\n";

/// Verb prefixing every subscription request
pub const REQUEST_VERB: &str = "on";

/// Opens the byte stream to the feed server.
#[async_trait]
pub trait Connector: Send + Sync {
    type Stream: AsyncRead + AsyncWrite + Unpin + Send + 'static;

    async fn open(&self, addr: &str) -> io::Result<Self::Stream>;
}

/// Plain TCP [`Connector`]
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpConnector;

#[async_trait]
impl Connector for TcpConnector {
    type Stream = TcpStream;

    async fn open(&self, addr: &str) -> io::Result<Self::Stream> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        Ok(stream)
    }
}

/// Connection status updates
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Connected,
    Disconnected,
    Reconnecting,
}

/// Build the broker balance subscription: `on␁BRKSLD␁{asset}␁{period}`
pub fn broker_balance_command(asset: &str, period: u32) -> String {
    format!("{REQUEST_VERB}{FIELD_SEPARATOR}{BROKER_BALANCE}{FIELD_SEPARATOR}{asset}{FIELD_SEPARATOR}{period}")
}

/// Build the last price subscription: `on␁SQT␁{asset}␁LAST`
pub fn last_price_command(asset: &str) -> String {
    format!("{REQUEST_VERB}{FIELD_SEPARATOR}{QUOTE}{FIELD_SEPARATOR}{asset}{FIELD_SEPARATOR}{LAST}")
}

/// Connection to the feed server
pub struct Connection<C: Connector> {
    connector: C,
    config: FeedConfig,
    stream: Option<C::Stream>,
    read_buf: Vec<u8>,
}

impl<C: Connector> std::fmt::Debug for Connection<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("addr", &self.config.addr())
            .field("connected", &self.stream.is_some())
            .finish()
    }
}

impl<C: Connector> Connection<C> {
    pub fn new(connector: C, config: FeedConfig) -> Self {
        let read_buf = vec![0; config.read_buffer_size.max(1)];
        Self {
            connector,
            config,
            stream: None,
            read_buf,
        }
    }

    pub fn config(&self) -> &FeedConfig {
        &self.config
    }

    pub fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    /// Open the socket and perform the handshake, returning the handshake reply.
    pub async fn connect(&mut self) -> Result<String, ConnectionError> {
        self.close();
        let addr = self.config.addr();

        let mut stream = self
            .connector
            .open(&addr)
            .await
            .map_err(|source| ConnectionError::Connect {
                addr: addr.clone(),
                source,
            })?;

        let handshake = format!("{}{LINE_TERMINATOR}", self.config.handshake_command);
        stream.write_all(handshake.as_bytes()).await?;
        stream.flush().await?;

        let read = timeout(self.config.handshake_timeout, stream.read(&mut self.read_buf))
            .await
            .map_err(|_| ConnectionError::HandshakeTimeout {
                addr: addr.clone(),
                timeout: self.config.handshake_timeout,
            })??;
        if read == 0 {
            return Err(ConnectionError::Closed);
        }

        let reply = String::from_utf8_lossy(&self.read_buf[..read]).into_owned();
        info!(%addr, reply = truncate(reply.trim_end(), 100), "connected to feed server");

        self.stream = Some(stream);
        Ok(reply)
    }

    /// Send `command` terminated by CRLF.
    ///
    /// When `expect_reply` is set, one read of at most `reply_timeout` follows; an empty
    /// reply means the server sent nothing in time.
    pub async fn send_command(
        &mut self,
        command: &str,
        expect_reply: bool,
    ) -> Result<Vec<u8>, ConnectionError> {
        let stream = self.stream.as_mut().ok_or(ConnectionError::NotConnected)?;

        let mut bytes = Vec::with_capacity(command.len() + LINE_TERMINATOR.len());
        bytes.extend_from_slice(command.as_bytes());
        bytes.extend_from_slice(LINE_TERMINATOR.as_bytes());

        debug!(command = %command.replace(FIELD_SEPARATOR, "|"), "sending command");
        stream.write_all(&bytes).await?;
        stream.flush().await?;

        if !expect_reply {
            return Ok(Vec::new());
        }

        let read = timeout(self.config.reply_timeout, stream.read(&mut self.read_buf)).await;
        match read {
            Ok(Ok(read)) => Ok(self.read_buf[..read].to_vec()),
            Ok(Err(error)) => Err(error.into()),
            Err(_) => {
                debug!(timeout = ?self.config.reply_timeout, "no reply to command");
                Ok(Vec::new())
            }
        }
    }

    /// Subscribe to broker snapshots of `asset`, returning the reply bytes.
    pub async fn request_broker_balance(
        &mut self,
        asset: &str,
        period: u32,
    ) -> Result<Vec<u8>, ConnectionError> {
        self.send_command(&broker_balance_command(asset, period), true)
            .await
    }

    /// Subscribe to last price quotes of `asset`, returning the reply bytes.
    pub async fn request_last_price(&mut self, asset: &str) -> Result<Vec<u8>, ConnectionError> {
        self.send_command(&last_price_command(asset), true).await
    }

    /// One read bounded by `read_timeout`.
    ///
    /// Returns an empty buffer when nothing arrived in time or the read yielded zero bytes.
    /// Only transport errors are reported.
    pub async fn read(&mut self) -> Result<Vec<u8>, ConnectionError> {
        let stream = self.stream.as_mut().ok_or(ConnectionError::NotConnected)?;

        let read = timeout(self.config.read_timeout, stream.read(&mut self.read_buf)).await;
        match read {
            Ok(Ok(read)) => Ok(self.read_buf[..read].to_vec()),
            Ok(Err(error)) => Err(error.into()),
            Err(_) => Ok(Vec::new()),
        }
    }

    /// Close the socket, wait `reconnect_delay`, then connect again.
    pub async fn reconnect(&mut self) -> Result<String, ConnectionError> {
        self.close();
        warn!(
            addr = %self.config.addr(),
            delay = ?self.config.reconnect_delay,
            "reconnecting to feed server"
        );
        tokio::time::sleep(self.config.reconnect_delay).await;
        self.connect().await
    }

    /// Drop the socket, if any
    pub fn close(&mut self) {
        if self.stream.take().is_some() {
            debug!(addr = %self.config.addr(), "connection closed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{
        collections::VecDeque,
        sync::{Arc, Mutex},
        time::Duration,
    };
    use tokio_test::io::{Builder, Mock};

    /// Hands out scripted mock streams in order and counts connection attempts.
    #[derive(Clone)]
    struct MockConnector {
        streams: Arc<Mutex<VecDeque<Mock>>>,
        opened: Arc<Mutex<usize>>,
    }

    impl MockConnector {
        fn new(streams: Vec<Mock>) -> Self {
            Self {
                streams: Arc::new(Mutex::new(streams.into())),
                opened: Arc::default(),
            }
        }

        fn opened(&self) -> usize {
            *self.opened.lock().unwrap()
        }
    }

    #[async_trait]
    impl Connector for MockConnector {
        type Stream = Mock;

        async fn open(&self, _addr: &str) -> io::Result<Mock> {
            *self.opened.lock().unwrap() += 1;
            self.streams
                .lock()
                .unwrap()
                .pop_front()
                .ok_or_else(|| io::Error::from(io::ErrorKind::ConnectionRefused))
        }
    }

    fn test_config() -> FeedConfig {
        FeedConfig::default()
            .with_read_timeout(Duration::from_millis(20))
            .with_reply_timeout(Duration::from_millis(20))
            .with_handshake_timeout(Duration::from_millis(50))
            .with_reconnect_delay(Duration::ZERO)
    }

    #[test]
    fn test_request_commands() {
        assert_eq!(broker_balance_command("WINJ25", 0), "on\x01BRKSLD\x01WINJ25\x010");
        assert_eq!(last_price_command("WINJ25"), "on\x01SQT\x01WINJ25\x01LAST");
    }

    #[tokio::test]
    async fn test_connect_performs_handshake() {
        let mock = Builder::new()
            .write(b"OPENFAST\r\n")
            .read(b"OPENFAST OK\r\n")
            .build();
        let connector = MockConnector::new(vec![mock]);
        let mut connection = Connection::new(connector.clone(), test_config());

        let reply = connection.connect().await.unwrap();
        assert_eq!(reply, "OPENFAST OK\r\n");
        assert!(connection.is_connected());
        assert_eq!(connector.opened(), 1);
    }

    #[tokio::test]
    async fn test_connect_refused() {
        let mut connection = Connection::new(MockConnector::new(vec![]), test_config());

        let error = connection.connect().await.unwrap_err();
        assert!(matches!(error, ConnectionError::Connect { .. }));
        assert!(!connection.is_connected());
    }

    #[tokio::test]
    async fn test_request_broker_balance_reads_reply() {
        let mock = Builder::new()
            .write(b"OPENFAST\r\n")
            .read(b"OK\r\n")
            .write(b"on\x01BRKSLD\x01WINJ25\x010\r\n")
            .read(b"SQT\x01WINJ25\x01LAST\x01128000\n")
            .build();
        let mut connection = Connection::new(MockConnector::new(vec![mock]), test_config());
        connection.connect().await.unwrap();

        let reply = connection.request_broker_balance("WINJ25", 0).await.unwrap();
        assert_eq!(reply, b"SQT\x01WINJ25\x01LAST\x01128000\n".to_vec());
    }

    #[tokio::test]
    async fn test_send_command_without_connection() {
        let mut connection = Connection::new(MockConnector::new(vec![]), test_config());
        let error = connection.request_last_price("WINJ25").await.unwrap_err();
        assert!(matches!(error, ConnectionError::NotConnected));
    }

    #[tokio::test]
    async fn test_read_error_and_reconnect() {
        let first = Builder::new()
            .write(b"OPENFAST\r\n")
            .read(b"OK\r\n")
            .read(b"BRKSLD\x01partial")
            .read_error(io::Error::from(io::ErrorKind::ConnectionReset))
            .build();
        let second = Builder::new().write(b"OPENFAST\r\n").read(b"OK\r\n").build();
        let connector = MockConnector::new(vec![first, second]);
        let mut connection = Connection::new(connector.clone(), test_config());
        connection.connect().await.unwrap();

        assert_eq!(connection.read().await.unwrap(), b"BRKSLD\x01partial".to_vec());
        assert!(matches!(connection.read().await, Err(ConnectionError::Io(_))));

        connection.reconnect().await.unwrap();
        assert!(connection.is_connected());
        assert_eq!(connector.opened(), 2);
    }

    #[tokio::test]
    async fn test_zero_byte_read_is_empty() {
        // Script ends after the handshake, every further read yields zero bytes
        let mock = Builder::new().write(b"OPENFAST\r\n").read(b"OK\r\n").build();
        let mut connection = Connection::new(MockConnector::new(vec![mock]), test_config());
        connection.connect().await.unwrap();

        assert!(connection.read().await.unwrap().is_empty());
        assert!(connection.read().await.unwrap().is_empty());
        assert!(connection.is_connected());
    }
}
