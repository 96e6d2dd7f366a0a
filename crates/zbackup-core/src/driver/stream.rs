//! Handles coupling a send process to a receive process.
//!
//! The caller owns both halves: copy reader to writer until EOF, shut the
//! writer down, then await both wait handles. Declaring success before the
//! receiver has exited would hide a short receive.

use std::future::Future;
use std::pin::Pin;

use tokio::io::{AsyncRead, AsyncWrite};

use crate::error::Result;

/// Completion of one side of a stream; resolves once the underlying
/// process has exited and its status has been checked.
pub type WaitHandle = Pin<Box<dyn Future<Output = Result<()>> + Send>>;

/// The producing half of a replication stream.
pub struct SendStream {
    reader: Box<dyn AsyncRead + Send + Unpin>,
    wait: WaitHandle,
}

impl SendStream {
    pub fn new(
        reader: impl AsyncRead + Send + Unpin + 'static,
        wait: impl Future<Output = Result<()>> + Send + 'static,
    ) -> Self {
        Self {
            reader: Box::new(reader),
            wait: Box::pin(wait),
        }
    }

    pub fn into_parts(self) -> (Box<dyn AsyncRead + Send + Unpin>, WaitHandle) {
        (self.reader, self.wait)
    }
}

/// The consuming half of a replication stream.
pub struct ReceiveStream {
    writer: Box<dyn AsyncWrite + Send + Unpin>,
    wait: WaitHandle,
}

impl ReceiveStream {
    pub fn new(
        writer: impl AsyncWrite + Send + Unpin + 'static,
        wait: impl Future<Output = Result<()>> + Send + 'static,
    ) -> Self {
        Self {
            writer: Box::new(writer),
            wait: Box::pin(wait),
        }
    }

    pub fn into_parts(self) -> (Box<dyn AsyncWrite + Send + Unpin>, WaitHandle) {
        (self.writer, self.wait)
    }
}
