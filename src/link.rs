//! Link: one byte framer paired with one decoder
//!
//! Every role (master, slave, trace) owns exactly one link. The link encodes
//! outgoing messages for its frame mode and decodes incoming chunks.

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::task::JoinHandle;
use tracing::debug;

use crate::config::{FrameMode, FramerConfig};
use crate::decoder::{Decoder, ModbusDecoder};
use crate::device::{NoopNotifier, Notifier};
use crate::error::{ModbusError, ModbusResult};
use crate::frame::{to_ascii, to_rtu};
use crate::framer::{ByteFramer, FramerStats, StopHandle};
use crate::logging::log_packet;
use crate::message::Message;

/// Encode a message for the given frame mode
pub fn encode(mode: FrameMode, msg: &Message) -> Vec<u8> {
    match mode {
        FrameMode::Ascii => to_ascii(msg),
        FrameMode::Rtu => to_rtu(msg),
    }
}

pub struct ModbusLink<T> {
    framer: ByteFramer<T>,
    decoder: ModbusDecoder,
    notifier: Arc<dyn Notifier>,
}

impl<T> ModbusLink<T>
where
    T: AsyncRead + AsyncWrite + Send + 'static,
{
    pub fn new(stream: T, mode: FrameMode, config: FramerConfig) -> Self {
        Self {
            framer: ByteFramer::new(stream, config),
            decoder: ModbusDecoder::new(mode),
            notifier: Arc::new(NoopNotifier),
        }
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn mode(&self) -> FrameMode {
        self.decoder.mode()
    }

    pub fn notifier(&self) -> &dyn Notifier {
        self.notifier.as_ref()
    }

    /// Start reading and signal that the link is up.
    pub fn start(&mut self) -> ModbusResult<()> {
        self.framer.start()?;
        self.notifier.enabled();
        Ok(())
    }

    pub async fn stop(&mut self) -> ModbusResult<()> {
        self.framer.stop().await
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.framer.stop_handle()
    }

    pub fn stats(&self) -> FramerStats {
        self.framer.stats()
    }

    /// Discard unread input and any partial frame
    pub async fn flush(&mut self) -> ModbusResult<()> {
        self.framer.flush().await?;
        self.decoder.reset();
        Ok(())
    }

    /// Flush, encode and transmit one message.
    ///
    /// Nothing received before the call is decoded afterwards.
    pub async fn send_message(&mut self, msg: &Message) -> ModbusResult<()> {
        self.flush().await?;
        let frame = encode(self.mode(), msg);
        log_packet("TX", self.mode(), &frame);
        self.framer.send(&frame).await?;
        self.notifier.activity();
        Ok(())
    }

    /// Wait for the next chunk and decode it.
    ///
    /// `Ok(None)` means no bytes arrived within `timeout`; a chunk that holds
    /// nothing parseable yields an empty list.
    pub async fn await_messages(
        &mut self,
        timeout: Option<Duration>,
    ) -> ModbusResult<Option<Vec<Message>>> {
        match self.framer.receive(timeout).await? {
            Some(chunk) => {
                log_packet("RX", self.mode(), &chunk);
                if !chunk.is_empty() {
                    self.notifier.activity();
                }
                let messages = self.decoder.decode(&chunk);
                debug!("Decoded {} message(s) from {} bytes", messages.len(), chunk.len());
                Ok(Some(messages))
            }
            None => Ok(None),
        }
    }
}

#[cfg(feature = "serial")]
impl ModbusLink<tokio_serial::SerialStream> {
    /// Open a serial port and wrap it in a link (not yet started).
    pub fn open(
        config: &crate::config::SerialConfig,
        line: &dyn crate::device::LineControl,
    ) -> ModbusResult<Self> {
        let stream = crate::transport::open_serial(config, line)?;
        Ok(Self::new(stream, config.frame_mode, config.framer.clone()))
    }
}

/// Handle to a role running on its own task
pub struct RoleHandle<R> {
    stop: StopHandle,
    join: JoinHandle<ModbusResult<R>>,
}

impl<R> RoleHandle<R> {
    pub(crate) fn new(stop: StopHandle, join: JoinHandle<ModbusResult<R>>) -> Self {
        Self { stop, join }
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    pub fn stop(&self) {
        self.stop.stop();
    }

    /// Wait for the role to finish
    pub async fn join(self) -> ModbusResult<R> {
        self.join
            .await
            .map_err(|e| ModbusError::io(format!("Role task failed: {}", e)))?
    }

    /// Stop the role and wait for it to finish
    pub async fn shutdown(self) -> ModbusResult<R> {
        self.stop();
        self.join().await
    }
}
