use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, info, warn};
use serde::Serialize;

use crate::binding::{BindFailure, InterruptBinding};
use crate::config::ControllerConfig;
use crate::controller::{Button, ButtonLedController, OutputBank, PressCount, PressHandler};
use crate::error::ControllerError;
use crate::gpio::{Direction, GpioLine, GpioLineProvider, InterruptProvider};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum LifecycleState {
    Uninitialized,
    LinesAcquiring,
    LinesReady,
    BindingsRegistering,
    Running,
    Unwinding,
    Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Stage {
    Validate,
    Acquire,
    Configure,
    Bind,
    Unbind,
    SafeLevel,
    Release,
}

/// One failed acquisition, binding or teardown step.
#[derive(Debug, Clone, Serialize)]
pub struct FailureRecord {
    pub stage: Stage,
    pub pin: Option<u32>,
    pub kind: &'static str,
    pub message: String,
}

impl fmt::Display for FailureRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.pin {
            Some(pin) => write!(f, "{:?} line {pin}: {} ({})", self.stage, self.kind, self.message),
            None => write!(f, "{:?}: {} ({})", self.stage, self.kind, self.message),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ShutdownReport {
    pub presses: Vec<PressCount>,
    pub failures: Vec<FailureRecord>,
}

impl ShutdownReport {
    pub fn presses_of(&self, name: &str) -> Option<u64> {
        self.presses.iter().find(|p| p.name == name).map(|p| p.presses)
    }
}

/// Drives a `ButtonLedController` from configuration to `Running` and back.
///
/// Startup is all-or-nothing: any failure releases everything acquired so far,
/// in reverse order, and leaves the lifecycle `Stopped`. Teardown is best
/// effort and never fails; every failure it meets is logged and recorded.
pub struct ControllerLifecycle {
    config: Arc<ControllerConfig>,
    lines: Arc<dyn GpioLineProvider>,
    interrupts: Arc<dyn InterruptProvider>,
    state: LifecycleState,
    controller: Option<ButtonLedController>,
    failures: Vec<FailureRecord>,
}

impl ControllerLifecycle {
    pub fn new(
        config: Arc<ControllerConfig>,
        lines: Arc<dyn GpioLineProvider>,
        interrupts: Arc<dyn InterruptProvider>,
    ) -> Self {
        Self {
            config,
            lines,
            interrupts,
            state: LifecycleState::Uninitialized,
            controller: None,
            failures: Vec::new(),
        }
    }

    /// Uses one backend for both lines and interrupts.
    pub fn with_backend<B>(config: Arc<ControllerConfig>, backend: Arc<B>) -> Self
    where
        B: GpioLineProvider + InterruptProvider + 'static,
    {
        Self::new(config, backend.clone(), backend)
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    pub fn controller(&self) -> Option<&ButtonLedController> {
        self.controller.as_ref()
    }

    pub fn failures(&self) -> &[FailureRecord] {
        &self.failures
    }

    pub fn start(&mut self) -> Result<(), ControllerError> {
        match self.state {
            LifecycleState::Uninitialized => {}
            LifecycleState::Stopped => return Err(ControllerError::AlreadyStopped),
            other => {
                return Err(ControllerError::InvalidState(format!(
                    "cannot start from {other:?}"
                )));
            }
        }

        if let Err(e) = self.config.validate() {
            self.record(Stage::Validate, &e);
            self.transition(LifecycleState::Stopped);
            return Err(e);
        }

        self.transition(LifecycleState::LinesAcquiring);
        let mut outputs = OutputBank::default();
        let mut inputs = Vec::with_capacity(self.config.buttons.len());
        if let Err(e) = self.acquire_lines(&mut outputs, &mut inputs) {
            self.unwind(&mut [], inputs, &outputs);
            return Err(e);
        }
        self.transition(LifecycleState::LinesReady);

        self.transition(LifecycleState::BindingsRegistering);
        let buttons = match self.register_bindings(&outputs, inputs) {
            Ok(buttons) => buttons,
            Err(abort) => {
                let BindAbort {
                    error,
                    mut registered,
                    pending,
                } = abort;
                self.unwind(&mut registered, pending, &outputs);
                return Err(error);
            }
        };

        info!(
            "controller running: {} outputs, {} buttons",
            outputs.len(),
            buttons.len()
        );
        self.controller = Some(ButtonLedController::new(outputs, buttons));
        self.transition(LifecycleState::Running);

        Ok(())
    }

    /// Unbinds every button, drives outputs low, releases all lines and
    /// reports the final press counts.
    pub fn shutdown(&mut self) -> Result<ShutdownReport, ControllerError> {
        match self.state {
            LifecycleState::Stopped => return Err(ControllerError::AlreadyStopped),
            LifecycleState::Running | LifecycleState::Uninitialized => {}
            other => {
                return Err(ControllerError::InvalidState(format!(
                    "cannot shut down from {other:?}"
                )));
            }
        }

        let presses = match self.controller.take() {
            Some(controller) => {
                let (outputs, mut buttons) = controller.into_parts();
                self.unwind(&mut buttons, Vec::new(), &outputs);
                buttons.iter().map(Button::press_count).collect()
            }
            None => {
                self.transition(LifecycleState::Stopped);
                Vec::new()
            }
        };

        for count in &presses {
            info!("{} (line {}): {} presses", count.name, count.pin, count.presses);
        }

        Ok(ShutdownReport {
            presses,
            failures: self.failures.clone(),
        })
    }

    fn acquire_lines(
        &mut self,
        outputs: &mut OutputBank,
        inputs: &mut Vec<GpioLine>,
    ) -> Result<(), ControllerError> {
        let config = self.config.clone();

        for output in &config.outputs {
            let mut line = GpioLine::acquire(self.lines.clone(), output.pin, Direction::Output)
                .inspect_err(|e| self.record(Stage::Acquire, e))?;
            if let Err(e) = line.configure_output(output.initial_level) {
                self.record(Stage::Configure, &e);
                self.release_line(&mut line);
                return Err(e);
            }
            outputs.push(line);
        }

        for button in &config.buttons {
            let mut line = GpioLine::acquire(self.lines.clone(), button.pin, Direction::Input)
                .inspect_err(|e| self.record(Stage::Acquire, e))?;
            if let Err(e) = line.configure_input(Duration::from_millis(button.debounce_ms)) {
                self.record(Stage::Configure, &e);
                self.release_line(&mut line);
                return Err(e);
            }
            match line.read_level() {
                Ok(level) => debug!("{} (line {}) idle level {level}", button.name, button.pin),
                Err(e) => debug!("{} (line {}) idle level unknown: {e}", button.name, button.pin),
            }
            inputs.push(line);
        }

        Ok(())
    }

    fn register_bindings(
        &mut self,
        outputs: &OutputBank,
        inputs: Vec<GpioLine>,
    ) -> Result<Vec<Button>, BindAbort> {
        let config = self.config.clone();
        let mut registered = Vec::with_capacity(inputs.len());
        let mut pending = inputs.into_iter();

        for button in &config.buttons {
            let Some(line) = pending.next() else {
                break;
            };

            let bound = match PressHandler::new(button, outputs) {
                Ok(handler) => InterruptBinding::bind(line, handler, self.interrupts.clone()),
                Err(error) => Err(BindFailure { error, line }),
            };

            match bound {
                Ok(binding) => registered.push(Button::new(button.name.clone(), binding)),
                Err(BindFailure { error, line }) => {
                    self.record(Stage::Bind, &error);
                    let mut rest = vec![line];
                    rest.extend(pending);
                    return Err(BindAbort {
                        error,
                        registered,
                        pending: rest,
                    });
                }
            }
        }

        Ok(registered)
    }

    /// Tears down in reverse acquisition order: bindings, then inputs, then
    /// outputs (driven low first). Keeps going past individual failures.
    fn unwind(&mut self, buttons: &mut [Button], pending: Vec<GpioLine>, outputs: &OutputBank) {
        self.transition(LifecycleState::Unwinding);

        for button in buttons.iter_mut().rev() {
            if let Err(e) = button.binding_mut().unbind() {
                self.record(Stage::Unbind, &e);
            }
        }

        // pending inputs were acquired after every bound one
        for mut line in pending.into_iter().rev() {
            self.release_line(&mut line);
        }
        for button in buttons.iter_mut().rev() {
            if let Err(e) = button.binding_mut().release() {
                self.record(Stage::Release, &e);
            }
        }

        for output in outputs.lines().iter().rev() {
            let mut line = output.lock();
            if !line.is_released()
                && let Err(e) = line.set_level(false)
            {
                self.record(Stage::SafeLevel, &e);
            }
            self.release_line(&mut line);
        }

        self.transition(LifecycleState::Stopped);
    }

    fn release_line(&mut self, line: &mut GpioLine) {
        if let Err(e) = line.release() {
            self.record(Stage::Release, &e);
        }
    }

    fn record(&mut self, stage: Stage, e: &ControllerError) {
        let record = FailureRecord {
            stage,
            pin: e.pin(),
            kind: e.kind(),
            message: e.to_string(),
        };
        error!("{record}");
        self.failures.push(record);
    }

    fn transition(&mut self, next: LifecycleState) {
        debug!("lifecycle {:?} -> {next:?}", self.state);
        self.state = next;
    }
}

impl Drop for ControllerLifecycle {
    fn drop(&mut self) {
        if self.state == LifecycleState::Running {
            match self.shutdown() {
                Ok(report) => {
                    for failure in &report.failures {
                        warn!("teardown on drop: {failure}");
                    }
                }
                Err(e) => warn!("shutdown on drop failed: {e}"),
            }
        }
    }
}

struct BindAbort {
    error: ControllerError,
    registered: Vec<Button>,
    pending: Vec<GpioLine>,
}
