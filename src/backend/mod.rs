use std::fmt;
use std::sync::Arc;

use crate::config::ControllerConfig;
use crate::error::ControllerError;
use crate::lifecycle::ControllerLifecycle;

#[cfg(feature = "hardware-gpio")]
pub mod libgpiod;
pub mod mock;

#[cfg(feature = "hardware-gpio")]
pub use libgpiod::LibgpiodBackend;
pub use mock::{MockGpioBackend, MockOp};

/// Provider the binary drives, fixed at build time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    Libgpiod,
    Mock,
}

impl BackendKind {
    /// `hardware-gpio` wins over `mock-gpio`. `None` when neither is enabled.
    pub fn selected() -> Option<Self> {
        if cfg!(feature = "hardware-gpio") {
            Some(BackendKind::Libgpiod)
        } else if cfg!(feature = "mock-gpio") {
            Some(BackendKind::Mock)
        } else {
            None
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendKind::Libgpiod => f.write_str("libgpiod"),
            BackendKind::Mock => f.write_str("mock"),
        }
    }
}

/// Builds an unstarted lifecycle on the selected backend.
///
/// Refuses to run when no backend was compiled in, rather than falling back
/// to the mock.
pub fn open_lifecycle(
    config: Arc<ControllerConfig>,
) -> Result<(BackendKind, ControllerLifecycle), ControllerError> {
    let kind = BackendKind::selected().ok_or_else(|| {
        ControllerError::Config(
            "no GPIO backend compiled in; build with the hardware-gpio feature or opt into mock-gpio"
                .to_string(),
        )
    })?;

    let lifecycle = match kind {
        BackendKind::Libgpiod => open_libgpiod(config)?,
        BackendKind::Mock => {
            ControllerLifecycle::with_backend(config, Arc::new(MockGpioBackend::default()))
        }
    };
    Ok((kind, lifecycle))
}

#[cfg(feature = "hardware-gpio")]
fn open_libgpiod(config: Arc<ControllerConfig>) -> Result<ControllerLifecycle, ControllerError> {
    let backend = LibgpiodBackend::new(&config.chip)
        .map_err(|e| ControllerError::Config(format!("cannot open {}: {e}", config.chip)))?;
    Ok(ControllerLifecycle::with_backend(config, Arc::new(backend)))
}

#[cfg(not(feature = "hardware-gpio"))]
fn open_libgpiod(_config: Arc<ControllerConfig>) -> Result<ControllerLifecycle, ControllerError> {
    Err(ControllerError::Config(
        "libgpiod backend not compiled in".to_string(),
    ))
}
