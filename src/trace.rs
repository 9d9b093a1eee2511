//! Passive bus trace
//!
//! Forwards every decoded message to a callback, in decode order and without
//! filtering. Requests, responses and exceptions from any address all pass.

use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{error, info};

use crate::error::{ModbusError, ModbusResult};
use crate::framer::StopHandle;
use crate::link::{ModbusLink, RoleHandle};
use crate::message::Message;

/// Callback invoked for every traced message
pub type TraceCallback = Box<dyn FnMut(&Message) + Send>;

pub struct ModbusTrace<T> {
    link: ModbusLink<T>,
    callback: TraceCallback,
    forwarded: usize,
}

impl<T> ModbusTrace<T>
where
    T: AsyncRead + AsyncWrite + Send + 'static,
{
    pub fn new<F>(link: ModbusLink<T>, callback: F) -> Self
    where
        F: FnMut(&Message) + Send + 'static,
    {
        Self {
            link,
            callback: Box::new(callback),
            forwarded: 0,
        }
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.link.stop_handle()
    }

    /// Messages forwarded so far
    pub fn forwarded(&self) -> usize {
        self.forwarded
    }

    /// Trace until stopped. Returns the number of messages forwarded.
    pub async fn run(&mut self) -> ModbusResult<usize> {
        self.trace(None).await
    }

    /// Trace until no bytes arrive for `idle`, or until stopped.
    ///
    /// Returns the number of messages forwarded.
    pub async fn run_until_idle(&mut self, idle: Duration) -> ModbusResult<usize> {
        self.trace(Some(idle)).await
    }

    async fn trace(&mut self, idle: Option<Duration>) -> ModbusResult<usize> {
        self.link.start()?;
        info!("Modbus trace started ({})", self.link.mode());

        let result = self.forward(idle).await;
        let stopped = self.link.stop().await;
        match result {
            Ok(()) | Err(ModbusError::Stopped) => {
                info!("Modbus trace ended, {} message(s) forwarded", self.forwarded);
                stopped.map(|_| self.forwarded)
            }
            Err(e) => {
                error!("Modbus trace failed: {}", e);
                Err(e)
            }
        }
    }

    async fn forward(&mut self, idle: Option<Duration>) -> ModbusResult<()> {
        loop {
            let Some(messages) = self.link.await_messages(idle).await? else {
                return Ok(());
            };
            for msg in &messages {
                (self.callback)(msg);
                self.forwarded += 1;
            }
        }
    }

    /// Run the trace on its own task
    pub fn spawn(mut self) -> RoleHandle<usize> {
        let stop = self.stop_handle();
        let join = tokio::spawn(async move { self.run().await });
        RoleHandle::new(stop, join)
    }
}
