//! Message transport over a pair of byte streams.
//!
//! The pod reads bencode messages from its input (stdin in production) and
//! writes each response as one complete value to its output (stdout),
//! flushing after every message.

use crate::config::TransportConfig;
use sqlpod_protocol::{Decoder, Dict, Encoder, ProtocolError, Response, Value};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Reads decoded messages from `R` and writes encoded responses to `W`.
pub struct MessageTransport<R, W> {
    reader: R,
    writer: W,
    decoder: Decoder,
    read_buf: Vec<u8>,
}

impl<R, W> MessageTransport<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    /// Creates a transport with default settings.
    pub fn new(reader: R, writer: W) -> Self {
        Self::with_config(reader, writer, &TransportConfig::default())
    }

    pub fn with_config(reader: R, writer: W, config: &TransportConfig) -> Self {
        Self {
            reader,
            writer,
            decoder: Decoder::with_max_message_size(config.max_message_bytes),
            read_buf: vec![0u8; config.read_buffer_size.max(1)],
        }
    }

    /// Reads until one complete message is decoded.
    ///
    /// Bytes past the message stay buffered for the next call. When the
    /// input closes first, returns [`ProtocolError::UnexpectedEof`]. After a
    /// decoding error the next call resumes at the next byte that can start a
    /// message; an oversized message discards everything buffered.
    pub async fn receive(&mut self) -> Result<Dict, ProtocolError> {
        loop {
            match self.decoder.decode_message() {
                Ok(Some(msg)) => return Ok(msg),
                Ok(None) => {}
                // The offending value was consumed; later messages are intact.
                Err(e @ ProtocolError::NotADict { .. }) => return Err(e),
                Err(e @ ProtocolError::MessageTooLarge { .. }) => {
                    tracing::debug!(
                        "Discarding {} buffered bytes of oversized message",
                        self.decoder.buffered()
                    );
                    self.decoder.clear();
                    return Err(e);
                }
                Err(e) => {
                    let dropped = self.decoder.resync();
                    tracing::debug!("Skipped {} bytes after decode error", dropped);
                    return Err(e);
                }
            }

            let n = self.reader.read(&mut self.read_buf).await?;
            if n == 0 {
                return Err(self.decoder.end_of_input());
            }
            tracing::trace!("Received {} bytes", n);
            self.decoder.extend(&self.read_buf[..n]);
        }
    }

    /// Writes one value and flushes.
    pub async fn send(&mut self, value: &Value) -> Result<(), ProtocolError> {
        let bytes = Encoder::encode(value);
        self.write_all(&bytes).await
    }

    /// Writes one response envelope and flushes.
    pub async fn send_response(&mut self, response: &Response) -> Result<(), ProtocolError> {
        let bytes = Encoder::encode_response(response);
        self.write_all(&bytes).await
    }

    async fn write_all(&mut self, bytes: &[u8]) -> Result<(), ProtocolError> {
        self.writer.write_all(bytes).await?;
        self.writer.flush().await?;
        tracing::trace!("Sent {} bytes", bytes.len());
        Ok(())
    }

    /// Returns the number of received bytes not yet decoded.
    pub fn buffered(&self) -> usize {
        self.decoder.buffered()
    }

    /// Drops any received bytes not yet decoded.
    pub fn discard_buffered(&mut self) {
        self.decoder.clear();
    }

    /// Consumes the transport, returning the underlying streams.
    pub fn into_inner(self) -> (R, W) {
        (self.reader, self.writer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::io::Builder;

    fn config(read_buffer_size: usize) -> TransportConfig {
        TransportConfig {
            read_buffer_size,
            ..TransportConfig::default()
        }
    }

    #[tokio::test]
    async fn test_receive_single_message() {
        let mut transport = MessageTransport::new(&b"d2:op8:describee"[..], Vec::new());
        let msg = transport.receive().await.unwrap();
        assert_eq!(msg.get(&b"op"[..]).and_then(Value::as_str), Some("describe"));

        let err = transport.receive().await.unwrap_err();
        assert!(err.is_end_of_stream());
    }

    #[tokio::test]
    async fn test_receive_across_partial_reads() {
        let reader = Builder::new()
            .read(b"d2:op")
            .read(b"6:invo")
            .read(b"kee")
            .build();
        let mut transport = MessageTransport::new(reader, Vec::new());

        let msg = transport.receive().await.unwrap();
        assert_eq!(msg.get(&b"op"[..]).and_then(Value::as_str), Some("invoke"));
    }

    #[tokio::test]
    async fn test_receive_keeps_trailing_bytes() {
        let input = b"d2:op8:describeed2:op8:shutdowne";
        let mut transport = MessageTransport::with_config(&input[..], Vec::new(), &config(4096));

        let first = transport.receive().await.unwrap();
        assert_eq!(first.get(&b"op"[..]).and_then(Value::as_str), Some("describe"));
        assert_eq!(transport.buffered(), 16);

        let second = transport.receive().await.unwrap();
        assert_eq!(second.get(&b"op"[..]).and_then(Value::as_str), Some("shutdown"));
    }

    #[tokio::test]
    async fn test_receive_with_tiny_reads() {
        let input = b"d2:id1:12:op6:invokee";
        let mut transport = MessageTransport::with_config(&input[..], Vec::new(), &config(1));
        let msg = transport.receive().await.unwrap();
        assert_eq!(msg.get(&b"id"[..]).and_then(Value::as_str), Some("1"));
    }

    #[tokio::test]
    async fn test_eof_mid_message_reports_buffered_bytes() {
        let mut transport = MessageTransport::new(&b"d2:op6:inv"[..], Vec::new());
        match transport.receive().await {
            Err(ProtocolError::UnexpectedEof { buffered }) => assert_eq!(buffered, 10),
            other => panic!("expected end of stream, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_malformed_input_is_discarded() {
        let mut transport = MessageTransport::new(&b"x123"[..], Vec::new());
        let err = transport.receive().await.unwrap_err();
        assert!(!err.is_end_of_stream());
        assert_eq!(transport.buffered(), 0);
    }

    #[tokio::test]
    async fn test_malformed_input_keeps_following_message() {
        let mut transport = MessageTransport::new(&b"x123d2:op8:describee"[..], Vec::new());
        assert!(matches!(
            transport.receive().await,
            Err(ProtocolError::UnexpectedByte { byte: b'x', offset: 0 })
        ));
        let msg = transport.receive().await.unwrap();
        assert_eq!(msg.get(&b"op"[..]).and_then(Value::as_str), Some("describe"));
        assert!(transport.receive().await.unwrap_err().is_end_of_stream());
    }

    #[tokio::test]
    async fn test_oversized_message_is_discarded() {
        let config = TransportConfig {
            max_message_bytes: 8,
            ..TransportConfig::default()
        };
        let input = b"d2:op100:";
        let mut transport = MessageTransport::with_config(&input[..], Vec::new(), &config);
        assert!(matches!(
            transport.receive().await,
            Err(ProtocolError::MessageTooLarge { .. })
        ));
        assert_eq!(transport.buffered(), 0);
    }

    #[tokio::test]
    async fn test_non_dict_message_keeps_following_input() {
        let mut transport = MessageTransport::new(&b"i42ed2:op8:describee"[..], Vec::new());
        assert!(matches!(
            transport.receive().await,
            Err(ProtocolError::NotADict { found: "integer" })
        ));
        let msg = transport.receive().await.unwrap();
        assert_eq!(msg.get(&b"op"[..]).and_then(Value::as_str), Some("describe"));
    }

    #[tokio::test]
    async fn test_send_writes_one_value() {
        let mut transport = MessageTransport::new(&b""[..], Vec::new());
        transport
            .send_response(&Response::value("1", "x"))
            .await
            .unwrap();
        transport.send(&Value::Integer(7)).await.unwrap();

        let (_, written) = transport.into_inner();
        assert_eq!(
            written,
            b"d2:id1:16:statusl4:donee5:value1:xei7e".to_vec()
        );
    }

    #[tokio::test]
    async fn test_send_to_mock_writer() {
        let writer = Builder::new().write(b"i1e").build();
        let mut transport = MessageTransport::new(&b""[..], writer);
        transport.send(&Value::Integer(1)).await.unwrap();
    }

    #[tokio::test]
    async fn test_read_error_is_io() {
        let reader = Builder::new()
            .read_error(std::io::Error::new(std::io::ErrorKind::Other, "boom"))
            .build();
        let mut transport = MessageTransport::new(reader, Vec::new());
        assert!(matches!(
            transport.receive().await,
            Err(ProtocolError::Io(_))
        ));
    }
}
