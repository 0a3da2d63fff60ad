//! Message framing over a byte stream.
//!
//! Each message is a length prefix followed by a JSON-encoded body. The
//! enum discriminant inside the body plays the role of the message tag.
//! Reads block until a full message is available; that backpressure is the
//! stepping mechanism, not an inefficiency to engineer away.

use crate::error::{ProtocolError, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::io::{ErrorKind, Read, Write};

/// Sanity bound on a single message. Input snapshots and config structs are
/// tiny; anything near this size is a corrupted length prefix.
const MAX_MESSAGE_LEN: u32 = 1 << 24;

/// One endpoint of the control channel.
///
/// Generic over the byte stream so tests can run over a socketpair and the
/// injected runtime over whatever same-host transport set it up.
#[derive(Debug)]
pub struct ControlChannel<S> {
    stream: S,
}

impl<S: Read + Write> ControlChannel<S> {
    /// Wrap an already-connected stream.
    pub fn new(stream: S) -> Self {
        Self { stream }
    }

    /// Consume the endpoint, returning the underlying stream.
    pub fn into_inner(self) -> S {
        self.stream
    }

    /// Send one message, blocking until it is fully written.
    pub fn send<M: Serialize>(&mut self, message: &M) -> Result<()> {
        let body = serde_json::to_vec(message)?;
        let len = u32::try_from(body.len()).map_err(|_| ProtocolError::Oversized(u32::MAX))?;
        if len > MAX_MESSAGE_LEN {
            return Err(ProtocolError::Oversized(len));
        }

        self.stream.write_all(&len.to_le_bytes())?;
        self.stream.write_all(&body)?;
        self.stream.flush()?;
        tracing::trace!(len, "message sent");
        Ok(())
    }

    /// Receive one message, blocking until it arrives.
    ///
    /// A peer that closed the channel surfaces as
    /// [`ProtocolError::ChannelClosed`].
    pub fn recv<M: DeserializeOwned>(&mut self) -> Result<M> {
        let mut len_bytes = [0u8; 4];
        self.read_exact_or_closed(&mut len_bytes)?;
        let len = u32::from_le_bytes(len_bytes);
        if len > MAX_MESSAGE_LEN {
            return Err(ProtocolError::Oversized(len));
        }

        let mut body = vec![0u8; len as usize];
        self.read_exact_or_closed(&mut body)?;
        tracing::trace!(len, "message received");
        Ok(serde_json::from_slice(&body)?)
    }

    fn read_exact_or_closed(&mut self, buf: &mut [u8]) -> Result<()> {
        self.stream.read_exact(buf).map_err(|err| {
            if err.kind() == ErrorKind::UnexpectedEof {
                ProtocolError::ChannelClosed
            } else {
                ProtocolError::Io(err)
            }
        })
    }
}

#[cfg(unix)]
impl ControlChannel<std::os::unix::net::UnixStream> {
    /// A connected pair of endpoints over an anonymous socketpair.
    ///
    /// This is how the injected runtime and the controller talk on the
    /// same host, and how tests stand up a controller peer.
    pub fn pair() -> Result<(Self, Self)> {
        let (a, b) = std::os::unix::net::UnixStream::pair()?;
        Ok((Self::new(a), Self::new(b)))
    }

    /// Connect to a controller listening on a filesystem socket.
    pub fn connect<P: AsRef<std::path::Path>>(path: P) -> Result<Self> {
        let stream = std::os::unix::net::UnixStream::connect(path)?;
        Ok(Self::new(stream))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::{ControllerMessage, ProgramMessage};
    use lockstep_core::SharedConfig;
    use std::time::Duration;

    #[test]
    fn test_send_recv_in_order() {
        let (mut program, mut controller) = ControlChannel::pair().unwrap();

        program
            .send(&ProgramMessage::Alert("texture load failed".into()))
            .unwrap();
        program
            .send(&ProgramMessage::FrameCountTime {
                frame: 7,
                ticks: Duration::from_millis(116),
            })
            .unwrap();
        program.send(&ProgramMessage::StartFrameBoundary).unwrap();

        assert_eq!(
            controller.recv::<ProgramMessage>().unwrap(),
            ProgramMessage::Alert("texture load failed".into())
        );
        assert_eq!(
            controller.recv::<ProgramMessage>().unwrap(),
            ProgramMessage::FrameCountTime {
                frame: 7,
                ticks: Duration::from_millis(116),
            }
        );
        assert_eq!(
            controller.recv::<ProgramMessage>().unwrap(),
            ProgramMessage::StartFrameBoundary
        );
    }

    #[test]
    fn test_config_replicates_verbatim() {
        let (mut program, mut controller) = ControlChannel::pair().unwrap();

        let config = SharedConfig {
            fast_forward: true,
            framerate: 30,
            initial_frame: 500,
            ..SharedConfig::default()
        };
        controller
            .send(&ControllerMessage::Config(config.clone()))
            .unwrap();

        match program.recv::<ControllerMessage>().unwrap() {
            ControllerMessage::Config(received) => assert_eq!(received, config),
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn test_closed_peer_is_channel_closed() {
        let (mut program, controller) = ControlChannel::pair().unwrap();
        drop(controller);

        match program.recv::<ControllerMessage>() {
            Err(ProtocolError::ChannelClosed) => {}
            other => panic!("expected ChannelClosed, got {other:?}"),
        }
    }

    #[test]
    fn test_oversized_length_prefix_rejected() {
        let (mut program, controller) = ControlChannel::pair().unwrap();

        let mut raw = controller.into_inner();
        raw.write_all(&u32::MAX.to_le_bytes()).unwrap();

        match program.recv::<ControllerMessage>() {
            Err(ProtocolError::Oversized(len)) => assert_eq!(len, u32::MAX),
            other => panic!("expected Oversized, got {other:?}"),
        }
    }
}
