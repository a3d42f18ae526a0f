use std::{
    io,
    pin::Pin,
    task::{Context, Poll},
};

use crate::transport::{ClosedStream, SessionError, WriteError};

/// A stream that can be used to send bytes. See [`iroh::endpoint::SendStream`].
#[derive(Debug)]
pub struct SendStream {
    inner: iroh::endpoint::SendStream,
}

impl SendStream {
    pub(crate) fn new(stream: iroh::endpoint::SendStream) -> Self {
        Self { inner: stream }
    }

    /// Set the stream's priority, relative to other streams on the same connection.
    /// See [`iroh::endpoint::SendStream::set_priority`].
    pub fn set_priority(&mut self, order: i32) -> Result<(), ClosedStream> {
        self.inner.set_priority(order).map_err(Into::into)
    }

    /// Write some data to the stream, returning the amount written. See
    /// [`iroh::endpoint::SendStream::write`].
    pub async fn write(&mut self, buf: &[u8]) -> Result<usize, WriteError> {
        self.inner.write(buf).await.map_err(Into::into)
    }

    /// Write the entire buffer to the stream. See [`iroh::endpoint::SendStream::write_all`].
    pub async fn write_all(&mut self, buf: &[u8]) -> Result<(), WriteError> {
        self.inner.write_all(buf).await.map_err(Into::into)
    }

    /// Shut down the send side of the stream, signalling end-of-payload.
    /// See [`iroh::endpoint::SendStream::finish`].
    pub fn finish(&mut self) -> Result<(), ClosedStream> {
        self.inner.finish().map_err(Into::into)
    }

    /// Abruptly reset the stream with an error code. See [`iroh::endpoint::SendStream::reset`].
    /// This is a u32 with WebTransport since it shares the error space with HTTP/3.
    pub fn reset(&mut self, code: u32) -> Result<(), ClosedStream> {
        let code = web_transport_proto::error_to_http3(code);
        let code = iroh::endpoint::VarInt::try_from(code).unwrap();
        self.inner.reset(code).map_err(Into::into)
    }

    /// Wait until the peer stops reading, returning the STOP_SENDING error code if any.
    /// See [`iroh::endpoint::SendStream::stopped`].
    pub async fn stopped(&mut self) -> Result<Option<u32>, SessionError> {
        match self.inner.stopped().await {
            Ok(None) => Ok(None),
            Ok(Some(code)) => Ok(Some(
                web_transport_proto::error_from_http3(code.into_inner()).unwrap(),
            )),
            Err(iroh::endpoint::StoppedError::ConnectionLost(e)) => Err(e.into()),
            Err(iroh::endpoint::StoppedError::ZeroRttRejected) => {
                unreachable!("0-RTT not supported")
            }
        }
    }
}

impl tokio::io::AsyncWrite for SendStream {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.inner).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_shutdown(cx)
    }
}

impl web_transport_trait::SendStream for SendStream {
    type Error = WriteError;

    async fn write(&mut self, buf: &[u8]) -> Result<usize, Self::Error> {
        self.write(buf).await
    }

    fn set_priority(&mut self, order: i32) {
        self.set_priority(order).ok();
    }

    fn reset(&mut self, code: u32) {
        self.reset(code).ok();
    }

    async fn finish(&mut self) -> Result<(), Self::Error> {
        self.finish().ok();
        Ok(())
    }
}
