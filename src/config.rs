use std::{fs, path::Path};

use rustc_hash::FxHashSet;
use serde::{Deserialize, Serialize};

use crate::error::ControllerError;

const DEFAULT_CHIP: &str = "/dev/gpiochip0";
const DEFAULT_DEBOUNCE_MS: u64 = 200;

/// What a button press does to each output it drives.
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum EffectPolicy {
    /// Force the output to a constant level.
    Set(bool),
    /// Flip the stored output level.
    Toggle,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct OutputConfig {
    pub name: String,
    pub pin: u32,
    #[serde(default)]
    pub initial_level: bool,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ButtonConfig {
    pub name: String,
    pub pin: u32,
    pub outputs: Vec<u32>,
    pub effect: EffectPolicy,
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ControllerConfig {
    #[serde(default = "default_chip")]
    pub chip: String,
    pub outputs: Vec<OutputConfig>,
    pub buttons: Vec<ButtonConfig>,
}

fn default_chip() -> String {
    DEFAULT_CHIP.to_string()
}

fn default_debounce_ms() -> u64 {
    DEFAULT_DEBOUNCE_MS
}

impl ControllerConfig {
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ControllerError> {
        let contents = fs::read_to_string(&path)
            .map_err(|e| ControllerError::Config(format!("Failed to read config: {e}")))?;
        let config: Self = serde_json::from_str(&contents)
            .map_err(|e| ControllerError::Config(format!("Invalid config json: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ControllerError> {
        if self.outputs.is_empty() {
            return Err(ControllerError::Config("at least one output is required".into()));
        }
        if self.buttons.is_empty() {
            return Err(ControllerError::Config("at least one button is required".into()));
        }

        let mut pins = FxHashSet::default();
        let all_pins = self
            .outputs
            .iter()
            .map(|o| (o.name.as_str(), o.pin))
            .chain(self.buttons.iter().map(|b| (b.name.as_str(), b.pin)));
        for (name, pin) in all_pins {
            if !pins.insert(pin) {
                return Err(ControllerError::Config(format!(
                    "pin {pin} of {name} is declared more than once"
                )));
            }
        }

        let output_pins: FxHashSet<u32> = self.outputs.iter().map(|o| o.pin).collect();
        for button in &self.buttons {
            if button.outputs.is_empty() {
                return Err(ControllerError::Config(format!(
                    "button {} drives no output",
                    button.name
                )));
            }
            let mut seen = FxHashSet::default();
            for pin in &button.outputs {
                if !output_pins.contains(pin) {
                    return Err(ControllerError::Config(format!(
                        "button {} drives undeclared output pin {pin}",
                        button.name
                    )));
                }
                if !seen.insert(*pin) {
                    return Err(ControllerError::Config(format!(
                        "button {} lists output pin {pin} twice",
                        button.name
                    )));
                }
            }
        }

        Ok(())
    }
}
