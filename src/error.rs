use thiserror::Error;

/// Failure reported by a line or interrupt provider.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("pin {0} is not a valid line")]
    InvalidPin(u32),
    #[error("pin {0} is already owned")]
    Busy(u32),
    #[error("unknown line handle {0}")]
    UnknownHandle(u64),
    #[error("unknown interrupt source {0}")]
    UnknownIrq(u64),
    #[error("request rejected: {0}")]
    Rejected(String),
    #[error("backend failure: {0}")]
    Backend(String),
}

#[derive(Debug, Error)]
pub enum ControllerError {
    #[error("Line {pin} unavailable: {source}")]
    LineUnavailable { pin: u32, source: ProviderError },
    #[error("Line {pin} configuration failed: {source}")]
    ConfigurationFailed { pin: u32, source: ProviderError },
    #[error("Interrupt binding for line {pin} failed: {source}")]
    BindingFailed { pin: u32, source: ProviderError },
    #[error("Controller already stopped")]
    AlreadyStopped,
    #[error("Invalid state: {0}")]
    InvalidState(String),
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("GPIO error on line {pin}: {source}")]
    Gpio { pin: u32, source: ProviderError },
}

impl ControllerError {
    pub fn kind(&self) -> &'static str {
        match self {
            ControllerError::LineUnavailable { .. } => "LineUnavailable",
            ControllerError::ConfigurationFailed { .. } => "ConfigurationFailed",
            ControllerError::BindingFailed { .. } => "BindingFailed",
            ControllerError::AlreadyStopped => "AlreadyStopped",
            ControllerError::InvalidState(_) => "InvalidState",
            ControllerError::Config(_) => "Config",
            ControllerError::Gpio { .. } => "Gpio",
        }
    }

    /// The line the error is about, if any.
    pub fn pin(&self) -> Option<u32> {
        match self {
            ControllerError::LineUnavailable { pin, .. }
            | ControllerError::ConfigurationFailed { pin, .. }
            | ControllerError::BindingFailed { pin, .. }
            | ControllerError::Gpio { pin, .. } => Some(*pin),
            _ => None,
        }
    }
}
