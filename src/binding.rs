use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use log::{debug, warn};

use crate::error::ControllerError;
use crate::gpio::{Direction, EdgeCallback, EdgeDetect, GpioLine, InterruptProvider, IrqId, IrqReturn};

/// Work done for one accepted edge. Runs in interrupt context: must not block.
pub trait EdgeHandler: Send + Sync {
    fn on_edge(&self);
}

/// A failed `bind`, handing the line back so the caller can release it.
pub struct BindFailure {
    pub error: ControllerError,
    pub line: GpioLine,
}

/// An input line with a rising-edge handler registered on its interrupt.
///
/// Dropping the binding unregisters the handler, then releases the line.
pub struct InterruptBinding {
    irq: Option<IrqId>,
    unbind_failed: bool,
    presses: Arc<AtomicU64>,
    interrupts: Arc<dyn InterruptProvider>,
    line: GpioLine,
}

impl InterruptBinding {
    pub const TRIGGER: EdgeDetect = EdgeDetect::Rising;

    pub fn bind<H>(
        line: GpioLine,
        handler: H,
        interrupts: Arc<dyn InterruptProvider>,
    ) -> Result<Self, BindFailure>
    where
        H: EdgeHandler + 'static,
    {
        let pin = line.pin();
        if line.direction() != Direction::Input {
            return Err(BindFailure {
                error: ControllerError::InvalidState(format!(
                    "line {pin} must be an input to bind an interrupt"
                )),
                line,
            });
        }
        let Some(handle) = line.handle() else {
            return Err(BindFailure {
                error: ControllerError::InvalidState(format!("line {pin} already released")),
                line,
            });
        };

        let irq = match interrupts.map_to_interrupt(handle) {
            Ok(irq) => irq,
            Err(source) => {
                return Err(BindFailure {
                    error: ControllerError::BindingFailed { pin, source },
                    line,
                });
            }
        };

        let presses = Arc::new(AtomicU64::new(0));
        let counter = presses.clone();
        // the counter moves even when the effect fails: the edge was observed
        let callback: EdgeCallback = Arc::new(move || {
            handler.on_edge();
            counter.fetch_add(1, Ordering::Relaxed);
            IrqReturn::Handled
        });

        if let Err(source) = interrupts.register(irq, Self::TRIGGER, callback) {
            return Err(BindFailure {
                error: ControllerError::BindingFailed { pin, source },
                line,
            });
        }
        debug!("bound line {pin} to irq {}", irq.0);

        Ok(Self {
            irq: Some(irq),
            unbind_failed: false,
            presses,
            interrupts,
            line,
        })
    }

    /// Unregisters the handler. Calling it again is a no-op.
    pub fn unbind(&mut self) -> Result<(), ControllerError> {
        match self.irq.take() {
            Some(irq) => {
                debug!("unbinding line {} from irq {}", self.line.pin(), irq.0);
                let result = self.interrupts.unregister(irq).map_err(|source| {
                    ControllerError::BindingFailed {
                        pin: self.line.pin(),
                        source,
                    }
                });
                self.unbind_failed |= result.is_err();
                result
            }
            None => Ok(()),
        }
    }

    /// Unbinds, then releases the line even if unbinding failed.
    pub fn release(&mut self) -> Result<(), ControllerError> {
        let unbound = self.unbind();
        self.warn_if_live();
        let released = self.line.release();
        unbound.and(released)
    }

    /// Accepted edges so far. Wraps on overflow.
    pub fn presses(&self) -> u64 {
        self.presses.load(Ordering::Relaxed)
    }

    pub fn pin(&self) -> u32 {
        self.line.pin()
    }

    pub fn line(&self) -> &GpioLine {
        &self.line
    }

    pub fn is_bound(&self) -> bool {
        self.irq.is_some()
    }

    /// Set once `unregister` has failed: the provider may still deliver
    /// edges for this line.
    pub fn interrupt_may_be_live(&self) -> bool {
        self.unbind_failed
    }

    fn warn_if_live(&self) {
        if self.unbind_failed && !self.line.is_released() {
            warn!(
                "releasing line {} while its interrupt may still be registered",
                self.line.pin()
            );
        }
    }
}

impl Drop for InterruptBinding {
    fn drop(&mut self) {
        if let Err(e) = self.unbind() {
            warn!("unbind on drop failed: {e}");
        }
        self.warn_if_live();
    }
}
