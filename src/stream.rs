use std::io::{self, Read, Write};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::os::unix::net::UnixStream;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::opts::{Opts, SslMode};
use crate::protocol::compress::CompressedStream;

/// Blocking byte stream under the packet layer: TCP, TLS-upgraded TCP, or
/// a local Unix socket.
pub enum Stream {
    Tcp(TcpStream),
    #[cfg(feature = "tls")]
    Tls(Box<native_tls::TlsStream<TcpStream>>),
    Unix(UnixStream),
}

impl Stream {
    /// Open the socket described by `opts`, honoring the connect timeout
    /// and TCP_NODELAY.
    pub fn connect(opts: &Opts) -> Result<Self> {
        if let Some(path) = &opts.socket {
            let stream = UnixStream::connect(path)
                .map_err(|e| Error::Connection(format!("cannot open socket '{path}': {e}")))?;
            stream.set_read_timeout(opts.socket_timeout)?;
            return Ok(Self::Unix(stream));
        }

        if opts.host.is_empty() {
            return Err(Error::BadConfig("missing host in connection options".into()));
        }

        let addrs = (opts.host.as_str(), opts.port)
            .to_socket_addrs()
            .map_err(|e| Error::Connection(format!("cannot resolve '{}': {e}", opts.host)))?;

        let mut last_error = None;
        for addr in addrs {
            match TcpStream::connect_timeout(&addr, opts.connect_timeout) {
                Ok(stream) => {
                    stream.set_nodelay(opts.tcp_nodelay)?;
                    stream.set_read_timeout(opts.socket_timeout)?;
                    return Ok(Self::Tcp(stream));
                }
                Err(e) => last_error = Some(e),
            }
        }

        Err(Error::Connection(format!(
            "cannot connect to {}:{}: {}",
            opts.host,
            opts.port,
            last_error
                .map(|e| e.to_string())
                .unwrap_or_else(|| "no addresses resolved".to_string())
        )))
    }

    /// STARTTLS-style upgrade, performed after the SSL-request packet.
    #[cfg(feature = "tls")]
    pub fn upgrade_to_tls(self, host: &str, ssl_mode: SslMode) -> Result<Self> {
        let tcp = match self {
            Self::Tcp(stream) => stream,
            Self::Tls(_) => return Err(Error::Tls("connection already uses TLS".into())),
            Self::Unix(_) => {
                return Err(Error::Tls("TLS is not supported over Unix sockets".into()));
            }
        };

        let mut builder = native_tls::TlsConnector::builder();
        match ssl_mode {
            SslMode::Disable | SslMode::VerifyFull => {}
            SslMode::Trust => {
                builder
                    .danger_accept_invalid_certs(true)
                    .danger_accept_invalid_hostnames(true);
            }
            SslMode::VerifyCa => {
                builder.danger_accept_invalid_hostnames(true);
            }
        }
        let connector = builder
            .build()
            .map_err(|e| Error::Tls(e.to_string()))?;

        let tls = connector
            .connect(host, tcp)
            .map_err(|e| Error::Tls(e.to_string()))?;
        Ok(Self::Tls(Box::new(tls)))
    }

    #[cfg(not(feature = "tls"))]
    pub fn upgrade_to_tls(self, _host: &str, _ssl_mode: SslMode) -> Result<Self> {
        Err(Error::Tls(
            "TLS requested but the tls feature is not enabled".into(),
        ))
    }

    pub fn set_read_timeout(&self, timeout: Option<Duration>) -> io::Result<()> {
        match self {
            Self::Tcp(stream) => stream.set_read_timeout(timeout),
            #[cfg(feature = "tls")]
            Self::Tls(stream) => stream.get_ref().set_read_timeout(timeout),
            Self::Unix(stream) => stream.set_read_timeout(timeout),
        }
    }

    /// Clone the socket handle so a blocked read can be torn down from
    /// another thread.
    pub fn abort_handle(&self) -> io::Result<AbortHandle> {
        match self {
            Self::Tcp(stream) => Ok(AbortHandle::Tcp(stream.try_clone()?)),
            #[cfg(feature = "tls")]
            Self::Tls(stream) => Ok(AbortHandle::Tcp(stream.get_ref().try_clone()?)),
            Self::Unix(stream) => Ok(AbortHandle::Unix(stream.try_clone()?)),
        }
    }
}

impl Read for Stream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Self::Tcp(stream) => stream.read(buf),
            #[cfg(feature = "tls")]
            Self::Tls(stream) => stream.read(buf),
            Self::Unix(stream) => stream.read(buf),
        }
    }
}

impl Write for Stream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Self::Tcp(stream) => stream.write(buf),
            #[cfg(feature = "tls")]
            Self::Tls(stream) => stream.write(buf),
            Self::Unix(stream) => stream.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Self::Tcp(stream) => stream.flush(),
            #[cfg(feature = "tls")]
            Self::Tls(stream) => stream.flush(),
            Self::Unix(stream) => stream.flush(),
        }
    }
}

/// Cloned socket handle used by abort: shutting it down unblocks any
/// in-flight read on the owning session. Idempotent.
pub enum AbortHandle {
    Tcp(TcpStream),
    Unix(UnixStream),
}

impl AbortHandle {
    pub fn abort(&self) {
        let _ = match self {
            Self::Tcp(stream) => stream.shutdown(Shutdown::Both),
            Self::Unix(stream) => stream.shutdown(Shutdown::Both),
        };
    }
}

/// The stream as the framer sees it, with the optional compression layer
/// spliced in after authentication.
pub enum Transport {
    Plain(Stream),
    Compressed(Box<CompressedStream<Stream>>),
}

impl Transport {
    pub fn enable_compression(self) -> Self {
        match self {
            Self::Plain(stream) => Self::Compressed(Box::new(CompressedStream::new(stream))),
            compressed => compressed,
        }
    }

    /// Reset the compression-layer sequence for a new command cycle.
    pub fn reset_compress_seq(&mut self) {
        if let Self::Compressed(stream) = self {
            stream.reset_seq();
        }
    }

    fn stream(&self) -> &Stream {
        match self {
            Self::Plain(stream) => stream,
            Self::Compressed(stream) => stream.get_ref(),
        }
    }

    pub fn set_read_timeout(&self, timeout: Option<Duration>) -> io::Result<()> {
        self.stream().set_read_timeout(timeout)
    }

    pub fn abort_handle(&self) -> io::Result<AbortHandle> {
        self.stream().abort_handle()
    }
}

impl Read for Transport {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Self::Plain(stream) => stream.read(buf),
            Self::Compressed(stream) => stream.read(buf),
        }
    }
}

impl Write for Transport {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Self::Plain(stream) => stream.write(buf),
            Self::Compressed(stream) => stream.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Self::Plain(stream) => stream.flush(),
            Self::Compressed(stream) => stream.flush(),
        }
    }
}
