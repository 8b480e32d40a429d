//! Framed transport for protocol values over the front-end connection.
//!
//! Each message is a 4-byte big-endian length followed by that many bytes of
//! JSON encoding one [`Value`]. The same framing is used in both directions;
//! nothing above this layer sees bytes, only values.

use std::{
    fmt,
    io::{self, Read, Write},
    net::TcpStream,
};

use crate::value::Value;

/// Upper bound on a single frame, to fail loudly on a corrupt length prefix.
const MAX_FRAME_BYTES: usize = 64 * 1024 * 1024;

/// Error type for the message channel, separating transport loss from
/// encoding problems so the dispatcher can exit cleanly on peer close.
#[derive(Debug)]
pub enum WireError {
    /// The peer closed the connection at a frame boundary.
    Closed,
    Io(io::Error),
    Codec(serde_json::Error),
    /// A frame length exceeded [`MAX_FRAME_BYTES`].
    Oversized(usize),
}

impl fmt::Display for WireError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Closed => write!(f, "connection closed by peer"),
            Self::Io(error) => write!(f, "i/o error on channel: {error}"),
            Self::Codec(error) => write!(f, "malformed frame: {error}"),
            Self::Oversized(len) => write!(f, "frame of {len} bytes exceeds limit"),
        }
    }
}

impl std::error::Error for WireError {}

impl From<io::Error> for WireError {
    fn from(error: io::Error) -> Self {
        Self::Io(error)
    }
}

impl From<serde_json::Error> for WireError {
    fn from(error: serde_json::Error) -> Self {
        Self::Codec(error)
    }
}

/// Point-to-point message channel over a stream connection.
#[derive(Debug)]
pub struct Channel {
    stream: TcpStream,
}

impl Channel {
    pub fn new(stream: TcpStream) -> Self {
        Self { stream }
    }

    /// Sends one value as one frame.
    pub fn send(&mut self, value: &Value) -> Result<(), WireError> {
        let body = serde_json::to_vec(value)?;
        if body.len() > MAX_FRAME_BYTES {
            return Err(WireError::Oversized(body.len()));
        }
        let len = u32::try_from(body.len()).map_err(|_| WireError::Oversized(body.len()))?;
        self.stream.write_all(&len.to_be_bytes())?;
        self.stream.write_all(&body)?;
        Ok(())
    }

    /// Receives one value, blocking until a full frame arrives.
    ///
    /// Returns [`WireError::Closed`] when the peer shuts the connection down
    /// cleanly between frames.
    pub fn recv(&mut self) -> Result<Value, WireError> {
        let mut header = [0u8; 4];
        if let Err(error) = self.stream.read_exact(&mut header) {
            return Err(if error.kind() == io::ErrorKind::UnexpectedEof {
                WireError::Closed
            } else {
                WireError::Io(error)
            });
        }
        let len = u32::from_be_bytes(header) as usize;
        if len > MAX_FRAME_BYTES {
            return Err(WireError::Oversized(len));
        }
        let mut body = vec![0u8; len];
        self.stream.read_exact(&mut body)?;
        Ok(serde_json::from_slice(&body)?)
    }

    /// Reports whether at least one byte is waiting, without blocking.
    ///
    /// A connection closed by the peer also reads as "readable": the next
    /// `recv` will observe the close and report it properly.
    pub fn is_readable(&self) -> Result<bool, WireError> {
        self.stream.set_nonblocking(true)?;
        let mut probe = [0u8; 1];
        let peeked = self.stream.peek(&mut probe);
        self.stream.set_nonblocking(false)?;
        match peeked {
            Ok(_) => Ok(true),
            Err(error) if error.kind() == io::ErrorKind::WouldBlock => Ok(false),
            Err(error) => Err(WireError::Io(error)),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::net::{TcpListener, TcpStream};

    use pretty_assertions::assert_eq;

    use super::{Channel, WireError};
    use crate::value::Value;

    fn loopback_pair() -> (Channel, Channel) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).unwrap();
        let (server, _) = listener.accept().unwrap();
        (Channel::new(client), Channel::new(server))
    }

    #[test]
    fn values_cross_the_channel_in_order() {
        let (mut a, mut b) = loopback_pair();
        a.send(&Value::Str("first".into())).unwrap();
        a.send(&Value::List(vec![Value::Int(1), Value::None])).unwrap();
        assert_eq!(b.recv().unwrap(), Value::Str("first".into()));
        assert_eq!(b.recv().unwrap(), Value::List(vec![Value::Int(1), Value::None]));
    }

    #[test]
    fn readable_reflects_pending_data() {
        let (mut a, b) = loopback_pair();
        assert!(!b.is_readable().unwrap());
        a.send(&Value::Bool(true)).unwrap();
        // Loopback delivery is fast but not instantaneous.
        for _ in 0..100 {
            if b.is_readable().unwrap() {
                return;
            }
            std::thread::sleep(std::time::Duration::from_millis(5));
        }
        panic!("sent frame never became readable");
    }

    #[test]
    fn peer_close_is_reported_as_closed() {
        let (a, mut b) = loopback_pair();
        drop(a);
        match b.recv() {
            Err(WireError::Closed) => {}
            other => panic!("expected Closed, got {other:?}"),
        }
    }
}
