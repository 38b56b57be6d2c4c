use std::sync::Arc;
use std::time::Duration;

use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::error::{ControllerError, ProviderError};

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum Direction {
    Output,
    Input,
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum EdgeDetect {
    Rising,
    Falling,
}

/// Provider-issued handle for one claimed line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LineHandle(pub u64);

/// Provider-issued interrupt source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct IrqId(pub u64);

/// What a callback did with an edge. Providers only count `Handled` edges
/// as delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IrqReturn {
    Handled,
    NotHandled,
}

pub type EdgeCallback = Arc<dyn Fn() -> IrqReturn + Send + Sync>;

pub trait GpioLineProvider: Send + Sync {
    fn acquire(&self, pin: u32) -> Result<LineHandle, ProviderError>;
    fn configure(
        &self,
        handle: LineHandle,
        direction: Direction,
        debounce: Option<Duration>,
    ) -> Result<(), ProviderError>;
    fn set_level(&self, handle: LineHandle, level: bool) -> Result<(), ProviderError>;
    fn read_level(&self, handle: LineHandle) -> Result<bool, ProviderError>;
    fn release(&self, handle: LineHandle) -> Result<(), ProviderError>;
}

/// Interrupt side of a platform.
///
/// Implementations must never run a registered callback concurrently with
/// itself, and `unregister` must not return while an invocation of the
/// callback is still running.
pub trait InterruptProvider: Send + Sync {
    fn map_to_interrupt(&self, handle: LineHandle) -> Result<IrqId, ProviderError>;
    fn register(
        &self,
        irq: IrqId,
        edge: EdgeDetect,
        callback: EdgeCallback,
    ) -> Result<(), ProviderError>;
    fn unregister(&self, irq: IrqId) -> Result<(), ProviderError>;
}

/// Exclusive ownership of one hardware pin.
///
/// The direction is fixed at acquisition. Dropping the line releases it.
pub struct GpioLine {
    pin: u32,
    direction: Direction,
    level: bool,
    debounce: Option<Duration>,
    handle: Option<LineHandle>,
    provider: Arc<dyn GpioLineProvider>,
}

impl GpioLine {
    pub fn acquire(
        provider: Arc<dyn GpioLineProvider>,
        pin: u32,
        direction: Direction,
    ) -> Result<Self, ControllerError> {
        let handle = provider
            .acquire(pin)
            .map_err(|source| ControllerError::LineUnavailable { pin, source })?;
        debug!("acquired line {pin} as {direction:?}");

        Ok(Self {
            pin,
            direction,
            level: false,
            debounce: None,
            handle: Some(handle),
            provider,
        })
    }

    pub fn configure_output(&mut self, initial_level: bool) -> Result<(), ControllerError> {
        self.expect_direction(Direction::Output, "configure as output")?;
        let handle = self.live_handle()?;
        let pin = self.pin;

        self.provider
            .configure(handle, Direction::Output, None)
            .and_then(|_| self.provider.set_level(handle, initial_level))
            .map_err(|source| ControllerError::ConfigurationFailed { pin, source })?;
        self.level = initial_level;

        Ok(())
    }

    pub fn configure_input(&mut self, debounce: Duration) -> Result<(), ControllerError> {
        self.expect_direction(Direction::Input, "configure as input")?;
        let handle = self.live_handle()?;
        let pin = self.pin;

        self.provider
            .configure(handle, Direction::Input, Some(debounce))
            .map_err(|source| ControllerError::ConfigurationFailed { pin, source })?;
        self.debounce = Some(debounce);

        Ok(())
    }

    pub fn set_level(&mut self, level: bool) -> Result<bool, ControllerError> {
        self.expect_direction(Direction::Output, "set level")?;
        let handle = self.live_handle()?;
        let pin = self.pin;

        self.provider
            .set_level(handle, level)
            .map_err(|source| ControllerError::Gpio { pin, source })?;
        self.level = level;

        Ok(level)
    }

    /// Physical level of an input line. Diagnostic only.
    pub fn read_level(&self) -> Result<bool, ControllerError> {
        self.expect_direction(Direction::Input, "read level")?;
        let handle = self.live_handle()?;

        self.provider
            .read_level(handle)
            .map_err(|source| ControllerError::Gpio {
                pin: self.pin,
                source,
            })
    }

    /// Releases the line. Calling it again is a no-op.
    pub fn release(&mut self) -> Result<(), ControllerError> {
        match self.handle.take() {
            Some(handle) => {
                debug!("releasing line {}", self.pin);
                self.provider
                    .release(handle)
                    .map_err(|source| ControllerError::Gpio {
                        pin: self.pin,
                        source,
                    })
            }
            None => Ok(()),
        }
    }

    pub fn pin(&self) -> u32 {
        self.pin
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// Last level driven on an output line.
    pub fn level(&self) -> bool {
        self.level
    }

    pub fn debounce(&self) -> Option<Duration> {
        self.debounce
    }

    pub fn handle(&self) -> Option<LineHandle> {
        self.handle
    }

    pub fn is_released(&self) -> bool {
        self.handle.is_none()
    }

    fn expect_direction(&self, wanted: Direction, op: &str) -> Result<(), ControllerError> {
        if self.direction != wanted {
            return Err(ControllerError::InvalidState(format!(
                "cannot {op} on {:?} line {}",
                self.direction, self.pin
            )));
        }
        Ok(())
    }

    fn live_handle(&self) -> Result<LineHandle, ControllerError> {
        self.handle.ok_or_else(|| {
            ControllerError::InvalidState(format!("line {} already released", self.pin))
        })
    }
}

impl Drop for GpioLine {
    fn drop(&mut self) {
        if let Err(e) = self.release() {
            warn!("release on drop failed: {e}");
        }
    }
}
