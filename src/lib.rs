pub mod backend;
pub mod binding;
pub mod config;
pub mod controller;
pub mod error;
pub mod gpio;
pub mod lifecycle;

pub use binding::{BindFailure, EdgeHandler, InterruptBinding};
pub use config::{ButtonConfig, ControllerConfig, EffectPolicy, OutputConfig};
pub use controller::{
    Button, ButtonLedController, ControllerSnapshot, OutputBank, OutputLevel, PressCount,
    PressHandler, SharedOutput,
};
pub use error::{ControllerError, ProviderError};
pub use gpio::{
    Direction, EdgeCallback, EdgeDetect, GpioLine, GpioLineProvider, InterruptProvider, IrqId,
    IrqReturn, LineHandle,
};
pub use lifecycle::{ControllerLifecycle, FailureRecord, LifecycleState, ShutdownReport, Stage};

#[cfg(feature = "hardware-gpio")]
pub use backend::LibgpiodBackend;
pub use backend::{BackendKind, MockGpioBackend, MockOp, open_lifecycle};
