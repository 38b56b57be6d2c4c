use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;
use rustc_hash::{FxHashMap, FxHashSet};

use crate::error::ProviderError;
use crate::gpio::{
    Direction, EdgeCallback, EdgeDetect, GpioLineProvider, InterruptProvider, IrqId, IrqReturn,
    LineHandle,
};

/// One observable provider operation, in call order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockOp {
    Acquire(u32),
    Configure(u32, Direction),
    Write(u32, bool),
    Register(u32),
    Unregister(u32),
    Handled(u32),
    Release(u32),
}

/// In-memory line and interrupt provider.
///
/// Edges are injected with [`MockGpioBackend::pulse`] on a virtual millisecond
/// clock, so debounce behaves deterministically in tests.
#[derive(Default)]
pub struct MockGpioBackend {
    state: Mutex<MockState>,
    journal: Mutex<Vec<MockOp>>,
    write_delay_ms: AtomicU64,
    in_flight: AtomicUsize,
}

#[derive(Default)]
struct MockState {
    next_handle: u64,
    invalid_pins: FxHashSet<u32>,
    rejected_configs: FxHashSet<u32>,
    rejected_irqs: FxHashSet<u32>,
    failing_writes: FxHashSet<u32>,
    failing_releases: FxHashSet<u32>,
    failing_unregisters: FxHashSet<u32>,
    owned: FxHashMap<u32, LineHandle>,
    lines: FxHashMap<LineHandle, MockLine>,
    irqs: FxHashMap<IrqId, MockIrq>,
}

struct MockLine {
    pin: u32,
    direction: Option<Direction>,
    level: bool,
    debounce_ms: u64,
    last_edge_ms: Option<u64>,
}

struct MockIrq {
    pin: u32,
    edge: EdgeDetect,
    callback: Option<EdgeCallback>,
    flight: Arc<Mutex<()>>,
}

impl MockGpioBackend {
    /// Makes `acquire` reject the pin as invalid.
    pub fn invalidate_pin(&self, pin: u32) {
        self.state.lock().invalid_pins.insert(pin);
    }

    pub fn reject_configuration(&self, pin: u32) {
        self.state.lock().rejected_configs.insert(pin);
    }

    pub fn reject_interrupt(&self, pin: u32) {
        self.state.lock().rejected_irqs.insert(pin);
    }

    pub fn fail_writes(&self, pin: u32) {
        self.state.lock().failing_writes.insert(pin);
    }

    /// Makes `release` fail for the pin, leaving it owned.
    pub fn fail_release(&self, pin: u32) {
        self.state.lock().failing_releases.insert(pin);
    }

    /// Makes `unregister` fail for the pin's interrupt, leaving the handler
    /// registered.
    pub fn fail_unregister(&self, pin: u32) {
        self.state.lock().failing_unregisters.insert(pin);
    }

    /// Stalls every level write, keeping handlers in flight for a while.
    pub fn set_write_delay(&self, delay: Duration) {
        self.write_delay_ms
            .store(delay.as_millis() as u64, Ordering::Relaxed);
    }

    /// Simulates a button press on an input pin at virtual time `at_ms`:
    /// a rising edge, then back low. Returns whether a handler ran and
    /// reported the edge as handled.
    pub fn pulse(&self, pin: u32, at_ms: u64) -> bool {
        let (irq, flight) = {
            let mut guard = self.state.lock();
            let state = &mut *guard;
            let Some(&handle) = state.owned.get(&pin) else {
                return false;
            };
            let Some(line) = state.lines.get_mut(&handle) else {
                return false;
            };
            if line.direction != Some(Direction::Input) || line.level {
                return false;
            }

            line.level = true;
            let accepted = line
                .last_edge_ms
                .is_none_or(|last| at_ms.saturating_sub(last) >= line.debounce_ms);
            if !accepted {
                line.level = false;
                return false;
            }
            line.last_edge_ms = Some(at_ms);

            let irq = IrqId(handle.0);
            match state.irqs.get(&irq) {
                Some(entry) if entry.edge == EdgeDetect::Rising => {
                    (irq, entry.flight.clone())
                }
                _ => {
                    line.level = false;
                    return false;
                }
            }
        };

        let handled = {
            let _guard = flight.lock();
            let callback = self
                .state
                .lock()
                .irqs
                .get(&irq)
                .and_then(|entry| entry.callback.clone());
            match callback {
                Some(callback) => {
                    self.in_flight.fetch_add(1, Ordering::SeqCst);
                    let handled = callback() == IrqReturn::Handled;
                    if handled {
                        self.journal.lock().push(MockOp::Handled(pin));
                    }
                    self.in_flight.fetch_sub(1, Ordering::SeqCst);
                    handled
                }
                None => false,
            }
        };

        let mut state = self.state.lock();
        if let Some(handle) = state.owned.get(&pin).copied()
            && let Some(line) = state.lines.get_mut(&handle)
        {
            line.level = false;
        }
        handled
    }

    /// Number of handler invocations currently running.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Level of an owned, configured line.
    pub fn level(&self, pin: u32) -> Option<bool> {
        let state = self.state.lock();
        let handle = state.owned.get(&pin)?;
        state.lines.get(handle).map(|line| line.level)
    }

    pub fn is_owned(&self, pin: u32) -> bool {
        self.state.lock().owned.contains_key(&pin)
    }

    pub fn owned_pins(&self) -> Vec<u32> {
        let mut pins: Vec<u32> = self.state.lock().owned.keys().copied().collect();
        pins.sort_unstable();
        pins
    }

    pub fn registered_irqs(&self) -> usize {
        self.state
            .lock()
            .irqs
            .values()
            .filter(|irq| irq.callback.is_some())
            .count()
    }

    pub fn journal(&self) -> Vec<MockOp> {
        self.journal.lock().clone()
    }

    fn log(&self, op: MockOp) {
        self.journal.lock().push(op);
    }
}

impl GpioLineProvider for MockGpioBackend {
    fn acquire(&self, pin: u32) -> Result<LineHandle, ProviderError> {
        let mut state = self.state.lock();
        if state.invalid_pins.contains(&pin) {
            return Err(ProviderError::InvalidPin(pin));
        }
        if state.owned.contains_key(&pin) {
            return Err(ProviderError::Busy(pin));
        }

        state.next_handle += 1;
        let handle = LineHandle(state.next_handle);
        state.owned.insert(pin, handle);
        state.lines.insert(
            handle,
            MockLine {
                pin,
                direction: None,
                level: false,
                debounce_ms: 0,
                last_edge_ms: None,
            },
        );
        drop(state);

        self.log(MockOp::Acquire(pin));
        Ok(handle)
    }

    fn configure(
        &self,
        handle: LineHandle,
        direction: Direction,
        debounce: Option<Duration>,
    ) -> Result<(), ProviderError> {
        let mut state = self.state.lock();
        let rejected = state
            .lines
            .get(&handle)
            .map(|line| state.rejected_configs.contains(&line.pin))
            .ok_or(ProviderError::UnknownHandle(handle.0))?;
        let line = state
            .lines
            .get_mut(&handle)
            .ok_or(ProviderError::UnknownHandle(handle.0))?;
        if rejected {
            return Err(ProviderError::Rejected(format!(
                "pin {} cannot be configured as {direction:?}",
                line.pin
            )));
        }

        line.direction = Some(direction);
        line.debounce_ms = debounce.map(|d| d.as_millis() as u64).unwrap_or(0);
        let pin = line.pin;
        drop(state);

        self.log(MockOp::Configure(pin, direction));
        Ok(())
    }

    fn set_level(&self, handle: LineHandle, level: bool) -> Result<(), ProviderError> {
        let delay = self.write_delay_ms.load(Ordering::Relaxed);
        if delay > 0 {
            thread::sleep(Duration::from_millis(delay));
        }

        let mut state = self.state.lock();
        let failing = state
            .lines
            .get(&handle)
            .map(|line| state.failing_writes.contains(&line.pin))
            .ok_or(ProviderError::UnknownHandle(handle.0))?;
        let line = state
            .lines
            .get_mut(&handle)
            .ok_or(ProviderError::UnknownHandle(handle.0))?;
        if line.direction != Some(Direction::Output) {
            return Err(ProviderError::Rejected(format!(
                "pin {} is not an output",
                line.pin
            )));
        }
        if failing {
            return Err(ProviderError::Backend(format!("write to pin {} failed", line.pin)));
        }

        line.level = level;
        let pin = line.pin;
        // journal under the state lock so its order matches the level order
        self.log(MockOp::Write(pin, level));
        Ok(())
    }

    fn read_level(&self, handle: LineHandle) -> Result<bool, ProviderError> {
        let state = self.state.lock();
        let line = state
            .lines
            .get(&handle)
            .ok_or(ProviderError::UnknownHandle(handle.0))?;
        if line.direction.is_none() {
            return Err(ProviderError::Rejected(format!(
                "pin {} is not configured",
                line.pin
            )));
        }
        Ok(line.level)
    }

    fn release(&self, handle: LineHandle) -> Result<(), ProviderError> {
        let mut state = self.state.lock();
        let pin = state
            .lines
            .get(&handle)
            .map(|line| line.pin)
            .ok_or(ProviderError::UnknownHandle(handle.0))?;
        if state.failing_releases.contains(&pin) {
            return Err(ProviderError::Backend(format!("release of pin {pin} failed")));
        }

        state.lines.remove(&handle);
        state.owned.remove(&pin);
        state.irqs.remove(&IrqId(handle.0));
        drop(state);

        self.log(MockOp::Release(pin));
        Ok(())
    }
}

impl InterruptProvider for MockGpioBackend {
    fn map_to_interrupt(&self, handle: LineHandle) -> Result<IrqId, ProviderError> {
        let mut state = self.state.lock();
        let line = state
            .lines
            .get(&handle)
            .ok_or(ProviderError::UnknownHandle(handle.0))?;
        let pin = line.pin;
        if line.direction != Some(Direction::Input) {
            return Err(ProviderError::Rejected(format!(
                "pin {pin} is not a configured input"
            )));
        }
        if state.rejected_irqs.contains(&pin) {
            return Err(ProviderError::Rejected(format!(
                "pin {pin} has no interrupt source"
            )));
        }

        let irq = IrqId(handle.0);
        state.irqs.entry(irq).or_insert_with(|| MockIrq {
            pin,
            edge: EdgeDetect::Rising,
            callback: None,
            flight: Arc::new(Mutex::new(())),
        });
        Ok(irq)
    }

    fn register(
        &self,
        irq: IrqId,
        edge: EdgeDetect,
        callback: EdgeCallback,
    ) -> Result<(), ProviderError> {
        let mut state = self.state.lock();
        let entry = state
            .irqs
            .get_mut(&irq)
            .ok_or(ProviderError::UnknownIrq(irq.0))?;
        if entry.callback.is_some() {
            return Err(ProviderError::Rejected(format!(
                "irq {} already has a handler",
                irq.0
            )));
        }

        entry.edge = edge;
        entry.callback = Some(callback);
        let pin = entry.pin;
        drop(state);

        self.log(MockOp::Register(pin));
        Ok(())
    }

    fn unregister(&self, irq: IrqId) -> Result<(), ProviderError> {
        let flight = {
            let state = self.state.lock();
            let Some(entry) = state.irqs.get(&irq) else {
                return Ok(());
            };
            if state.failing_unregisters.contains(&entry.pin) {
                return Err(ProviderError::Backend(format!(
                    "unregister of pin {} failed",
                    entry.pin
                )));
            }
            entry.flight.clone()
        };

        // waits for an in-flight handler to return
        let _guard = flight.lock();
        let removed = self.state.lock().irqs.remove(&irq);
        if let Some(entry) = removed
            && entry.callback.is_some()
        {
            self.log(MockOp::Unregister(entry.pin));
        }
        Ok(())
    }
}
