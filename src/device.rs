//! Device hooks
//!
//! The stack never drives LEDs or RS-485 transceivers itself. Boards plug in
//! through two small traits:
//!
//! - [`Notifier`] receives link activity and failure indications
//! - [`LineControl`] switches the port type and bus termination before the
//!   port opens

use tracing::debug;

use crate::config::SerialMode;
use crate::error::ModbusResult;

/// Sink for link status indications.
///
/// All methods default to doing nothing.
pub trait Notifier: Send + Sync {
    /// The link is healthy again (clears a previous exception indication)
    fn enabled(&self) {}

    /// A frame was sent or a correlated response arrived
    fn activity(&self) {}

    /// A request went unanswered
    fn exception(&self) {}
}

/// Notifier that ignores every indication
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopNotifier;

impl Notifier for NoopNotifier {}

/// Serial line electrical control.
pub trait LineControl: Send + Sync {
    fn set_port_type(&self, mode: SerialMode) -> ModbusResult<()>;

    fn set_termination(&self, enabled: bool) -> ModbusResult<()>;
}

/// Line control for ports without switchable hardware
#[derive(Debug, Clone, Copy, Default)]
pub struct NoLineControl;

impl LineControl for NoLineControl {
    fn set_port_type(&self, mode: SerialMode) -> ModbusResult<()> {
        debug!("Port type {:?} requested, no line control available", mode);
        Ok(())
    }

    fn set_termination(&self, enabled: bool) -> ModbusResult<()> {
        debug!("Termination {} requested, no line control available", enabled);
        Ok(())
    }
}

/// Apply line settings in the order the transceivers expect: termination
/// off, port type, then the requested termination.
pub fn apply_line_settings(
    control: &dyn LineControl,
    mode: SerialMode,
    termination: bool,
) -> ModbusResult<()> {
    control.set_termination(false)?;
    control.set_port_type(mode)?;
    control.set_termination(termination)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingControl {
        calls: Mutex<Vec<String>>,
    }

    impl LineControl for RecordingControl {
        fn set_port_type(&self, mode: SerialMode) -> ModbusResult<()> {
            self.calls.lock().unwrap().push(format!("type:{:?}", mode));
            Ok(())
        }

        fn set_termination(&self, enabled: bool) -> ModbusResult<()> {
            self.calls.lock().unwrap().push(format!("term:{}", enabled));
            Ok(())
        }
    }

    #[test]
    fn test_line_settings_order() {
        let control = RecordingControl::default();
        apply_line_settings(&control, SerialMode::Rs485HalfDuplex, true).unwrap();
        assert_eq!(
            *control.calls.lock().unwrap(),
            vec!["term:false", "type:Rs485HalfDuplex", "term:true"]
        );
    }

    #[test]
    fn test_noop_hooks() {
        let notifier = NoopNotifier;
        notifier.enabled();
        notifier.activity();
        notifier.exception();
        assert!(apply_line_settings(&NoLineControl, SerialMode::Rs232, false).is_ok());
    }
}
