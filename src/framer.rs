//! Timeout-driven byte framer
//!
//! Serial Modbus has no length prefix on the wire; frame boundaries are
//! silences on the line. The framer turns a raw byte stream into chunks: one
//! chunk is everything received from the first byte until the line stays quiet
//! for the inter-byte timeout (or the read buffer fills).
//!
//! A dedicated reader task owns the read half and pushes chunks into a bounded
//! queue. The consumer pops chunks with [`ByteFramer::receive`] and writes
//! through [`ByteFramer::send`]. [`ByteFramer::flush`] is a round trip to the
//! reader: it drops the partial chunk, drains whatever the transport already
//! holds, and acknowledges before the consumer transmits.
//!
//! ```text
//!   serial rx ──► reader task ──► mpsc queue ──► receive()
//!   serial tx ◄──────────────────────────────── send()
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info};

use crate::config::{FramerConfig, OverflowPolicy};
use crate::error::{ModbusError, ModbusResult};

/// One group of bytes received within a single inter-byte-timeout window
#[derive(Debug)]
struct Chunk {
    generation: u64,
    bytes: Bytes,
}

/// Cloneable handle that stops a framer (and the role that owns it).
#[derive(Debug, Clone)]
pub struct StopHandle {
    shutdown: broadcast::Sender<()>,
}

impl StopHandle {
    /// Cancel the in-flight read and wake any blocked receiver.
    pub fn stop(&self) {
        // No receiver means the reader has already exited
        let _ = self.shutdown.send(());
    }
}

/// Framer statistics snapshot
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FramerStats {
    pub chunks_received: u64,
    pub bytes_received: u64,
    pub bytes_sent: u64,
    pub chunks_discarded: u64,
}

#[derive(Debug, Default)]
struct StatsCounters {
    chunks_received: AtomicU64,
    bytes_received: AtomicU64,
    bytes_sent: AtomicU64,
    chunks_discarded: AtomicU64,
}

impl StatsCounters {
    fn snapshot(&self) -> FramerStats {
        FramerStats {
            chunks_received: self.chunks_received.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            chunks_discarded: self.chunks_discarded.load(Ordering::Relaxed),
        }
    }
}

/// Flush request, acknowledged once unread input is gone
type FlushAck = oneshot::Sender<()>;

/// State moved into the reader task on start
struct ReaderParts<T> {
    reader: ReadHalf<T>,
    queue: mpsc::Sender<Chunk>,
    shutdown: broadcast::Receiver<()>,
    flushes: mpsc::Receiver<FlushAck>,
}

/// Groups a duplex byte stream into timeout-delimited chunks.
pub struct ByteFramer<T> {
    config: FramerConfig,
    writer: WriteHalf<T>,
    queue: mpsc::Receiver<Chunk>,
    parts: Option<ReaderParts<T>>,
    shutdown: broadcast::Sender<()>,
    flushes: mpsc::Sender<FlushAck>,
    generation: Arc<AtomicU64>,
    fault: Arc<Mutex<Option<ModbusError>>>,
    stats: Arc<StatsCounters>,
    task: Option<JoinHandle<ModbusResult<()>>>,
}

impl<T> ByteFramer<T>
where
    T: AsyncRead + AsyncWrite + Send + 'static,
{
    /// Wrap a byte stream. Nothing is read until [`start`](Self::start).
    pub fn new(stream: T, config: FramerConfig) -> Self {
        let (reader, writer) = tokio::io::split(stream);
        let (queue_tx, queue_rx) = mpsc::channel(config.queue_capacity.max(1));
        let (shutdown, shutdown_rx) = broadcast::channel(1);
        let (flushes, flushes_rx) = mpsc::channel(1);

        Self {
            config,
            writer,
            queue: queue_rx,
            parts: Some(ReaderParts {
                reader,
                queue: queue_tx,
                shutdown: shutdown_rx,
                flushes: flushes_rx,
            }),
            shutdown,
            flushes,
            generation: Arc::new(AtomicU64::new(0)),
            fault: Arc::new(Mutex::new(None)),
            stats: Arc::new(StatsCounters::default()),
            task: None,
        }
    }

    pub fn config(&self) -> &FramerConfig {
        &self.config
    }

    /// Spawn the reader task. Must be called from within a tokio runtime.
    pub fn start(&mut self) -> ModbusResult<()> {
        let parts = self
            .parts
            .take()
            .ok_or_else(|| ModbusError::configuration("Framer already started"))?;

        let reader = ChunkReader {
            config: self.config.clone(),
            generation: Arc::clone(&self.generation),
            stats: Arc::clone(&self.stats),
            fault: Arc::clone(&self.fault),
        };

        info!(
            "Starting byte framer: inter-byte timeout {:?}, queue capacity {}",
            self.config.inter_byte_timeout, self.config.queue_capacity
        );
        self.task = Some(tokio::spawn(reader.run(parts)));
        Ok(())
    }

    /// Stop the reader and wait for it to exit.
    ///
    /// Returns the transport fault that ended the reader, if any.
    pub async fn stop(&mut self) -> ModbusResult<()> {
        let _ = self.shutdown.send(());
        // A never-started framer still owns the queue sender
        self.parts = None;

        match self.task.take() {
            Some(task) => {
                let result = task
                    .await
                    .map_err(|e| ModbusError::io(format!("Framer reader task failed: {}", e)))?;
                info!("Byte framer stopped");
                result
            }
            None => Ok(()),
        }
    }

    pub fn stop_handle(&self) -> StopHandle {
        StopHandle {
            shutdown: self.shutdown.clone(),
        }
    }

    /// Write all bytes to the stream.
    pub async fn send(&mut self, data: &[u8]) -> ModbusResult<()> {
        self.writer.write_all(data).await?;
        self.writer.flush().await?;
        self.stats
            .bytes_sent
            .fetch_add(data.len() as u64, Ordering::Relaxed);
        Ok(())
    }

    /// Wait for the next chunk.
    ///
    /// `None` waits indefinitely. Returns `Ok(None)` when the timeout elapses,
    /// `Err(Stopped)` once the framer is stopped, or the transport fault that
    /// ended the reader after every queued chunk has been consumed.
    pub async fn receive(&mut self, timeout: Option<Duration>) -> ModbusResult<Option<Bytes>> {
        let deadline = timeout.map(|t| Instant::now() + t);
        loop {
            let next = match deadline {
                Some(deadline) => {
                    match tokio::time::timeout_at(deadline, self.queue.recv()).await {
                        Ok(next) => next,
                        Err(_) => return Ok(None),
                    }
                }
                None => self.queue.recv().await,
            };

            match next {
                Some(chunk) if chunk.generation != self.generation.load(Ordering::Acquire) => {
                    self.discard(&chunk);
                }
                Some(chunk) => return Ok(Some(chunk.bytes)),
                None => return Err(self.closed_reason()),
            }
        }
    }

    /// Discard every queued chunk, the chunk being read, and any bytes the
    /// transport holds that have not been read yet.
    ///
    /// Returns once the reader has acknowledged, so nothing received before
    /// the call can be delivered afterwards.
    pub async fn flush(&mut self) -> ModbusResult<()> {
        while let Ok(chunk) = self.queue.try_recv() {
            self.discard(&chunk);
        }

        if let Some(parts) = self.parts.as_mut() {
            // Not started: drain the transport directly
            let mut buf = vec![0u8; self.config.read_buffer_size.max(1)];
            let drained = drain_ready(&mut parts.reader, &mut buf).await?;
            if drained > 0 {
                debug!("Drained {} unread bytes", drained);
                self.stats.chunks_discarded.fetch_add(1, Ordering::Relaxed);
            }
            self.generation.fetch_add(1, Ordering::AcqRel);
            return Ok(());
        }

        let (ack, acked) = oneshot::channel();
        if self.flushes.send(ack).await.is_err() || acked.await.is_err() {
            // Reader gone; its fault or Stopped surfaces on the next receive
            debug!("Flush skipped, reader not running");
        }
        Ok(())
    }

    pub fn stats(&self) -> FramerStats {
        self.stats.snapshot()
    }

    fn discard(&self, chunk: &Chunk) {
        debug!("Discarding {} flushed bytes", chunk.bytes.len());
        self.stats.chunks_discarded.fetch_add(1, Ordering::Relaxed);
    }

    fn closed_reason(&self) -> ModbusError {
        self.fault
            .lock()
            .ok()
            .and_then(|slot| slot.clone())
            .unwrap_or(ModbusError::Stopped)
    }
}

/// Reader-side state shared with the framer
struct ChunkReader {
    config: FramerConfig,
    generation: Arc<AtomicU64>,
    stats: Arc<StatsCounters>,
    fault: Arc<Mutex<Option<ModbusError>>>,
}

impl ChunkReader {
    async fn run<T: AsyncRead>(self, parts: ReaderParts<T>) -> ModbusResult<()> {
        let ReaderParts {
            mut reader,
            queue,
            mut shutdown,
            mut flushes,
        } = parts;

        let result = self
            .read_loop(&mut reader, &queue, &mut shutdown, &mut flushes)
            .await;
        if let Err(e) = &result {
            error!("Byte framer reader stopped on fault: {}", e);
            // Recorded before the queue sender drops so receivers see it
            if let Ok(mut slot) = self.fault.lock() {
                *slot = Some(e.clone());
            }
        }
        result
    }

    async fn read_loop<R: AsyncRead + Unpin>(
        &self,
        reader: &mut R,
        queue: &mpsc::Sender<Chunk>,
        shutdown: &mut broadcast::Receiver<()>,
        flushes: &mut mpsc::Receiver<FlushAck>,
    ) -> ModbusResult<()> {
        let mut buf = vec![0u8; self.config.read_buffer_size.max(1)];

        loop {
            // A flush abandons the partial chunk along with the read
            let (chunk, fault) = tokio::select! {
                biased;
                _ = shutdown.recv() => return Ok(()),
                Some(ack) = flushes.recv() => {
                    self.flush(reader, &mut buf, ack).await?;
                    continue;
                }
                read = self.read_chunk(reader, &mut buf) => read,
            };

            if let Some(chunk) = chunk {
                self.stats.chunks_received.fetch_add(1, Ordering::Relaxed);
                self.stats
                    .bytes_received
                    .fetch_add(chunk.bytes.len() as u64, Ordering::Relaxed);
                debug!("Received chunk of {} bytes", chunk.bytes.len());

                match self.config.overflow {
                    OverflowPolicy::Block => {
                        tokio::select! {
                            biased;
                            _ = shutdown.recv() => return Ok(()),
                            Some(ack) = flushes.recv() => {
                                // The parked chunk is stale too
                                self.stats.chunks_discarded.fetch_add(1, Ordering::Relaxed);
                                self.flush(reader, &mut buf, ack).await?;
                            }
                            sent = queue.send(chunk) => {
                                if sent.is_err() {
                                    // Framer dropped
                                    return Ok(());
                                }
                            }
                        }
                    }
                    OverflowPolicy::Fault => match queue.try_send(chunk) {
                        Ok(()) => {}
                        Err(mpsc::error::TrySendError::Full(_)) => {
                            return Err(ModbusError::QueueFull {
                                capacity: self.config.queue_capacity,
                            });
                        }
                        Err(mpsc::error::TrySendError::Closed(_)) => return Ok(()),
                    },
                }
            }

            if let Some(fault) = fault {
                return Err(fault);
            }
        }
    }

    /// Drop every immediately readable byte, advance the generation so queued
    /// chunks go stale, then acknowledge.
    async fn flush<R: AsyncRead + Unpin>(
        &self,
        reader: &mut R,
        buf: &mut [u8],
        ack: FlushAck,
    ) -> ModbusResult<()> {
        let drained = drain_ready(reader, buf).await?;
        if drained > 0 {
            debug!("Flush drained {} unread bytes", drained);
            self.stats.chunks_discarded.fetch_add(1, Ordering::Relaxed);
        }
        self.generation.fetch_add(1, Ordering::AcqRel);
        let _ = ack.send(());
        Ok(())
    }

    /// Read one chunk: wait for a first byte, then keep reading until the
    /// line is quiet for the inter-byte timeout or the buffer is full.
    ///
    /// A fault that interrupts a chunk is returned alongside the partial chunk.
    async fn read_chunk<R: AsyncRead + Unpin>(
        &self,
        reader: &mut R,
        buf: &mut [u8],
    ) -> (Option<Chunk>, Option<ModbusError>) {
        let first = match self.config.initial_timeout {
            Some(initial) => match tokio::time::timeout(initial, reader.read(buf)).await {
                Ok(read) => read,
                Err(_) => return (None, None),
            },
            None => reader.read(buf).await,
        };

        let mut filled = match first {
            Ok(0) => return (None, Some(end_of_stream())),
            Ok(n) => n,
            Err(e) => return (None, Some(e.into())),
        };
        let generation = self.generation.load(Ordering::Acquire);

        let mut fault = None;
        while filled < buf.len() {
            match tokio::time::timeout(self.config.inter_byte_timeout, reader.read(&mut buf[filled..]))
                .await
            {
                Err(_) => break,
                Ok(Ok(0)) => {
                    fault = Some(end_of_stream());
                    break;
                }
                Ok(Ok(n)) => filled += n,
                Ok(Err(e)) => {
                    fault = Some(e.into());
                    break;
                }
            }
        }

        let chunk = Chunk {
            generation,
            bytes: Bytes::copy_from_slice(&buf[..filled]),
        };
        (Some(chunk), fault)
    }
}

/// Read until the transport has nothing buffered. Returns the bytes dropped.
async fn drain_ready<R: AsyncRead + Unpin>(reader: &mut R, buf: &mut [u8]) -> ModbusResult<usize> {
    let mut drained = 0;
    loop {
        // A zero timeout still polls the read once
        match tokio::time::timeout(Duration::ZERO, reader.read(buf)).await {
            Err(_) => return Ok(drained),
            Ok(Ok(0)) => return Err(end_of_stream()),
            Ok(Ok(n)) => drained += n,
            Ok(Err(e)) => return Err(e.into()),
        }
    }
}

fn end_of_stream() -> ModbusError {
    ModbusError::io("Serial stream closed")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::DuplexStream;
    use tokio::time::sleep;
    use tokio_test::{assert_err, assert_ok};

    fn framer(config: FramerConfig) -> (ByteFramer<DuplexStream>, DuplexStream) {
        let (device, line) = tokio::io::duplex(1024);
        let mut framer = ByteFramer::new(line, config);
        assert_ok!(framer.start());
        (framer, device)
    }

    #[tokio::test(start_paused = true)]
    async fn test_bytes_within_window_form_one_chunk() {
        let (mut framer, mut device) = framer(FramerConfig::default());

        device.write_all(&[1, 2, 3]).await.unwrap();
        sleep(Duration::from_millis(20)).await;
        device.write_all(&[4, 5]).await.unwrap();

        let chunk = framer.receive(Some(Duration::from_secs(1))).await.unwrap();
        assert_eq!(chunk.as_deref(), Some(&[1u8, 2, 3, 4, 5][..]));

        sleep(Duration::from_millis(500)).await;
        device.write_all(&[6]).await.unwrap();
        let chunk = framer.receive(Some(Duration::from_secs(1))).await.unwrap();
        assert_eq!(chunk.as_deref(), Some(&[6u8][..]));

        let stats = framer.stats();
        assert_eq!(stats.chunks_received, 2);
        assert_eq!(stats.bytes_received, 6);
    }

    #[tokio::test(start_paused = true)]
    async fn test_receive_times_out() {
        let (mut framer, _device) = framer(FramerConfig::default());
        let chunk = framer.receive(Some(Duration::from_millis(250))).await;
        assert_eq!(chunk, Ok(None));
    }

    #[tokio::test(start_paused = true)]
    async fn test_read_buffer_bounds_chunk_size() {
        let config = FramerConfig::default().with_read_buffer_size(4);
        let (mut framer, mut device) = framer(config);

        device.write_all(&[1, 2, 3, 4, 5, 6]).await.unwrap();
        let first = framer.receive(Some(Duration::from_secs(1))).await.unwrap();
        let second = framer.receive(Some(Duration::from_secs(1))).await.unwrap();
        assert_eq!(first.as_deref(), Some(&[1u8, 2, 3, 4][..]));
        assert_eq!(second.as_deref(), Some(&[5u8, 6][..]));
    }

    #[tokio::test(start_paused = true)]
    async fn test_flush_discards_queued_chunks() {
        let (mut framer, mut device) = framer(FramerConfig::default());

        device.write_all(b"stale").await.unwrap();
        sleep(Duration::from_millis(300)).await;
        assert_ok!(framer.flush().await);

        assert_eq!(framer.receive(Some(Duration::from_millis(50))).await, Ok(None));
        assert_eq!(framer.stats().chunks_discarded, 1);

        device.write_all(b"fresh").await.unwrap();
        let chunk = framer.receive(Some(Duration::from_secs(1))).await.unwrap();
        assert_eq!(chunk.as_deref(), Some(&b"fresh"[..]));
    }

    #[tokio::test(start_paused = true)]
    async fn test_flush_discards_chunk_in_flight() {
        let (mut framer, mut device) = framer(FramerConfig::default());

        device.write_all(&[0xAA]).await.unwrap();
        // Reader is now inside the inter-byte window
        sleep(Duration::from_millis(10)).await;
        assert_ok!(framer.flush().await);

        assert_eq!(framer.receive(Some(Duration::from_millis(500))).await, Ok(None));
    }

    #[tokio::test(start_paused = true)]
    async fn test_flush_drops_unread_input() {
        let (mut framer, mut device) = framer(FramerConfig::default());

        // Still buffered in the stream when the flush runs
        device.write_all(b"stale reply").await.unwrap();
        assert_ok!(framer.flush().await);

        assert_eq!(framer.receive(Some(Duration::from_millis(500))).await, Ok(None));
        assert_eq!(framer.stats().chunks_discarded, 1);

        device.write_all(b"fresh").await.unwrap();
        let chunk = framer.receive(Some(Duration::from_secs(1))).await.unwrap();
        assert_eq!(chunk.as_deref(), Some(&b"fresh"[..]));
    }

    #[tokio::test(start_paused = true)]
    async fn test_flush_before_start_drains_stream() {
        let (mut device, line) = tokio::io::duplex(1024);
        let mut framer = ByteFramer::new(line, FramerConfig::default());

        device.write_all(&[1, 2, 3]).await.unwrap();
        assert_ok!(framer.flush().await);
        assert_ok!(framer.start());

        assert_eq!(framer.receive(Some(Duration::from_millis(500))).await, Ok(None));
        assert_ok!(framer.stop().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_block_policy_resumes_after_receive() {
        let config = FramerConfig::default().with_queue_capacity(1);
        let (mut framer, mut device) = framer(config);

        device.write_all(&[1]).await.unwrap();
        sleep(Duration::from_millis(300)).await;
        device.write_all(&[2]).await.unwrap();
        sleep(Duration::from_millis(300)).await;
        // Reader is parked on the full queue; this waits in the stream
        device.write_all(&[3]).await.unwrap();
        sleep(Duration::from_millis(300)).await;
        assert_eq!(framer.stats().chunks_received, 2);

        for expected in 1u8..=3 {
            let chunk = framer.receive(Some(Duration::from_secs(1))).await.unwrap();
            assert_eq!(chunk.as_deref(), Some(&[expected][..]));
        }
        assert_eq!(framer.stats().chunks_received, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_cancels_reader_blocked_on_full_queue() {
        let config = FramerConfig::default().with_queue_capacity(1);
        let (mut framer, mut device) = framer(config);

        device.write_all(&[1]).await.unwrap();
        sleep(Duration::from_millis(300)).await;
        device.write_all(&[2]).await.unwrap();
        sleep(Duration::from_millis(300)).await;

        let start = Instant::now();
        assert_ok!(framer.stop().await);
        assert!(start.elapsed() < Duration::from_millis(10));
    }

    #[tokio::test(start_paused = true)]
    async fn test_flush_drops_chunk_blocked_on_full_queue() {
        let config = FramerConfig::default().with_queue_capacity(1);
        let (mut framer, mut device) = framer(config);

        device.write_all(&[1]).await.unwrap();
        sleep(Duration::from_millis(300)).await;
        device.write_all(&[2]).await.unwrap();
        sleep(Duration::from_millis(300)).await;

        assert_ok!(framer.flush().await);
        assert_eq!(framer.receive(Some(Duration::from_millis(500))).await, Ok(None));
        assert_eq!(framer.stats().chunks_discarded, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_handle_wakes_receiver() {
        let (mut framer, _device) = framer(FramerConfig::default());
        let handle = framer.stop_handle();

        tokio::spawn(async move {
            sleep(Duration::from_millis(10)).await;
            handle.stop();
        });

        assert_eq!(framer.receive(None).await, Err(ModbusError::Stopped));
        assert_ok!(framer.stop().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_end_of_stream_is_a_fault() {
        let (mut framer, mut device) = framer(FramerConfig::default());

        device.write_all(&[7, 7]).await.unwrap();
        drop(device);

        let chunk = framer.receive(Some(Duration::from_secs(1))).await.unwrap();
        assert_eq!(chunk.as_deref(), Some(&[7u8, 7][..]));

        let err = assert_err!(framer.receive(Some(Duration::from_secs(1))).await);
        assert!(matches!(err, ModbusError::Io { .. }));
        assert_err!(framer.stop().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fault_policy_reports_queue_full() {
        let config = FramerConfig::default()
            .with_queue_capacity(1)
            .with_overflow(OverflowPolicy::Fault);
        let (mut framer, mut device) = framer(config);

        device.write_all(&[1]).await.unwrap();
        sleep(Duration::from_millis(300)).await;
        device.write_all(&[2]).await.unwrap();
        sleep(Duration::from_millis(300)).await;

        let chunk = framer.receive(Some(Duration::from_secs(1))).await.unwrap();
        assert_eq!(chunk.as_deref(), Some(&[1u8][..]));
        assert_eq!(
            framer.receive(Some(Duration::from_secs(1))).await,
            Err(ModbusError::QueueFull { capacity: 1 })
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_writes_to_stream() {
        let (mut framer, mut device) = framer(FramerConfig::default());

        assert_ok!(framer.send(&[0x01, 0x03, 0x00]).await);
        let mut buf = [0u8; 3];
        device.read_exact(&mut buf).await.unwrap();
        assert_eq!(buf, [0x01, 0x03, 0x00]);
        assert_eq!(framer.stats().bytes_sent, 3);
    }

    #[tokio::test]
    async fn test_start_twice_fails() {
        let (mut framer, _device) = framer(FramerConfig::default());
        assert_err!(framer.start());
        assert_ok!(framer.stop().await);
    }
}
