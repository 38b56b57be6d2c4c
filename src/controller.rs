use std::sync::Arc;

use log::warn;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde::Serialize;

use crate::binding::{EdgeHandler, InterruptBinding};
use crate::config::{ButtonConfig, EffectPolicy};
use crate::error::ControllerError;
use crate::gpio::GpioLine;

/// An output line shared by every handler that drives it.
pub type SharedOutput = Arc<Mutex<GpioLine>>;

impl EffectPolicy {
    pub fn next_level(self, current: bool) -> bool {
        match self {
            EffectPolicy::Set(level) => level,
            EffectPolicy::Toggle => !current,
        }
    }
}

/// Output lines in declaration order, addressable by pin.
#[derive(Default)]
pub struct OutputBank {
    lines: Vec<SharedOutput>,
    by_pin: FxHashMap<u32, usize>,
}

impl OutputBank {
    pub fn push(&mut self, line: GpioLine) {
        self.by_pin.insert(line.pin(), self.lines.len());
        self.lines.push(Arc::new(Mutex::new(line)));
    }

    pub fn get(&self, pin: u32) -> Option<&SharedOutput> {
        self.by_pin.get(&pin).map(|&idx| &self.lines[idx])
    }

    pub fn lines(&self) -> &[SharedOutput] {
        &self.lines
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }
}

/// Handler for one button: applies its policy to the outputs it drives.
///
/// Holds only those outputs, each behind its own lock, so concurrent presses
/// on buttons sharing an output serialize on that output alone.
pub struct PressHandler {
    button: String,
    policy: EffectPolicy,
    targets: Vec<SharedOutput>,
}

impl PressHandler {
    pub fn new(button: &ButtonConfig, outputs: &OutputBank) -> Result<Self, ControllerError> {
        let targets = button
            .outputs
            .iter()
            .map(|pin| {
                outputs.get(*pin).cloned().ok_or_else(|| {
                    ControllerError::Config(format!(
                        "button {} drives unknown output pin {pin}",
                        button.name
                    ))
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            button: button.name.clone(),
            policy: button.effect,
            targets,
        })
    }
}

impl EdgeHandler for PressHandler {
    fn on_edge(&self) {
        for target in &self.targets {
            let mut line = target.lock();
            let next = self.policy.next_level(line.level());
            if let Err(e) = line.set_level(next) {
                warn!("{}: output write failed: {e}", self.button);
            }
        }
    }
}

pub struct Button {
    name: String,
    binding: InterruptBinding,
}

impl Button {
    pub fn new(name: String, binding: InterruptBinding) -> Self {
        Self { name, binding }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn binding(&self) -> &InterruptBinding {
        &self.binding
    }

    pub fn binding_mut(&mut self) -> &mut InterruptBinding {
        &mut self.binding
    }

    pub fn press_count(&self) -> PressCount {
        PressCount {
            name: self.name.clone(),
            pin: self.binding.pin(),
            presses: self.binding.presses(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PressCount {
    pub name: String,
    pub pin: u32,
    pub presses: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutputLevel {
    pub pin: u32,
    pub level: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct ControllerSnapshot {
    pub outputs: Vec<OutputLevel>,
    pub presses: Vec<PressCount>,
}

/// The running topology: bound buttons and the outputs they drive.
pub struct ButtonLedController {
    outputs: OutputBank,
    buttons: Vec<Button>,
}

impl ButtonLedController {
    pub fn new(outputs: OutputBank, buttons: Vec<Button>) -> Self {
        Self { outputs, buttons }
    }

    pub fn output_level(&self, pin: u32) -> Option<bool> {
        self.outputs.get(pin).map(|line| line.lock().level())
    }

    pub fn press_count(&self, name: &str) -> Option<u64> {
        self.buttons
            .iter()
            .find(|b| b.name == name)
            .map(|b| b.binding.presses())
    }

    pub fn press_counts(&self) -> Vec<PressCount> {
        self.buttons.iter().map(Button::press_count).collect()
    }

    pub fn snapshot(&self) -> ControllerSnapshot {
        let outputs = self
            .outputs
            .lines()
            .iter()
            .map(|line| {
                let line = line.lock();
                OutputLevel {
                    pin: line.pin(),
                    level: line.level(),
                }
            })
            .collect();

        ControllerSnapshot {
            outputs,
            presses: self.press_counts(),
        }
    }

    pub fn buttons(&self) -> &[Button] {
        &self.buttons
    }

    pub fn outputs(&self) -> &OutputBank {
        &self.outputs
    }

    pub fn into_parts(self) -> (OutputBank, Vec<Button>) {
        (self.outputs, self.buttons)
    }
}
