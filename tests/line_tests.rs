use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use irqled::{
    BindFailure, ControllerError, Direction, EdgeHandler, GpioLine, GpioLineProvider,
    InterruptBinding, InterruptProvider, IrqReturn, MockGpioBackend, MockOp, ProviderError,
};

struct CountingHandler(Arc<AtomicUsize>);

impl EdgeHandler for CountingHandler {
    fn on_edge(&self) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }
}

fn providers(backend: &Arc<MockGpioBackend>) -> (Arc<dyn GpioLineProvider>, Arc<dyn InterruptProvider>) {
    (backend.clone(), backend.clone())
}

fn input_line(lines: &Arc<dyn GpioLineProvider>, pin: u32) -> GpioLine {
    let mut line = GpioLine::acquire(lines.clone(), pin, Direction::Input).expect("acquire input");
    line.configure_input(Duration::from_millis(200))
        .expect("configure input");
    line
}

#[test]
fn release_is_idempotent() {
    let backend = Arc::new(MockGpioBackend::default());
    let (lines, _) = providers(&backend);
    let mut line = GpioLine::acquire(lines, 4, Direction::Output).expect("acquire");
    line.configure_output(true).expect("configure");
    assert_eq!(backend.level(4), Some(true));

    line.release().expect("first release");
    line.release().expect("second release is a no-op");
    assert!(line.is_released());

    let releases = backend
        .journal()
        .into_iter()
        .filter(|op| *op == MockOp::Release(4))
        .count();
    assert_eq!(releases, 1);
}

#[test]
fn unconfigured_line_can_be_released() {
    let backend = Arc::new(MockGpioBackend::default());
    let (lines, _) = providers(&backend);
    let mut line = GpioLine::acquire(lines, 4, Direction::Input).expect("acquire");

    line.release().expect("release");
    assert!(!backend.is_owned(4));
}

#[test]
fn owned_pin_is_unavailable() {
    let backend = Arc::new(MockGpioBackend::default());
    let (lines, _) = providers(&backend);
    let _held = GpioLine::acquire(lines.clone(), 4, Direction::Output).expect("acquire");

    let err = GpioLine::acquire(lines, 4, Direction::Input)
        .err()
        .expect("second acquire fails");
    assert!(matches!(
        err,
        ControllerError::LineUnavailable {
            pin: 4,
            source: ProviderError::Busy(4)
        }
    ));
}

#[test]
fn direction_is_enforced() {
    let backend = Arc::new(MockGpioBackend::default());
    let (lines, _) = providers(&backend);
    let mut input = input_line(&lines, 4);
    let mut output = GpioLine::acquire(lines, 5, Direction::Output).expect("acquire");
    output.configure_output(false).expect("configure");

    assert!(matches!(input.set_level(true), Err(ControllerError::InvalidState(_))));
    assert!(matches!(input.configure_output(true), Err(ControllerError::InvalidState(_))));
    assert!(matches!(output.read_level(), Err(ControllerError::InvalidState(_))));
    assert!(matches!(
        output.configure_input(Duration::ZERO),
        Err(ControllerError::InvalidState(_))
    ));

    assert!(output.set_level(true).expect("set level"));
    assert!(output.level());
    assert!(!input.read_level().expect("read level"));
    assert_eq!(input.debounce(), Some(Duration::from_millis(200)));
}

#[test]
fn released_line_rejects_writes() {
    let backend = Arc::new(MockGpioBackend::default());
    let (lines, _) = providers(&backend);
    let mut line = GpioLine::acquire(lines, 4, Direction::Output).expect("acquire");
    line.configure_output(false).expect("configure");
    line.release().expect("release");

    assert!(matches!(line.set_level(true), Err(ControllerError::InvalidState(_))));
}

#[test]
fn dropping_line_releases_it() {
    let backend = Arc::new(MockGpioBackend::default());
    let (lines, _) = providers(&backend);
    {
        let _line = input_line(&lines, 4);
        assert!(backend.is_owned(4));
    }
    assert!(!backend.is_owned(4));
}

#[test]
fn bound_handler_runs_per_accepted_edge() {
    let backend = Arc::new(MockGpioBackend::default());
    let (lines, interrupts) = providers(&backend);
    let calls = Arc::new(AtomicUsize::new(0));

    let binding = InterruptBinding::bind(
        input_line(&lines, 4),
        CountingHandler(calls.clone()),
        interrupts,
    )
    .map_err(|failure| failure.error)
    .expect("bind");
    assert!(binding.is_bound());

    assert!(backend.pulse(4, 0));
    assert!(!backend.pulse(4, 150));
    assert!(backend.pulse(4, 400));

    assert_eq!(calls.load(Ordering::Relaxed), 2);
    assert_eq!(binding.presses(), 2);
}

#[test]
fn unbind_is_idempotent_and_stops_delivery() {
    let backend = Arc::new(MockGpioBackend::default());
    let (lines, interrupts) = providers(&backend);
    let calls = Arc::new(AtomicUsize::new(0));
    let mut binding = InterruptBinding::bind(
        input_line(&lines, 4),
        CountingHandler(calls.clone()),
        interrupts,
    )
    .map_err(|failure| failure.error)
    .expect("bind");

    binding.unbind().expect("first unbind");
    binding.unbind().expect("second unbind is a no-op");
    assert!(!binding.is_bound());
    assert!(!backend.pulse(4, 0));
    assert_eq!(binding.presses(), 0);
    assert_eq!(backend.registered_irqs(), 0);

    binding.release().expect("release");
    assert!(binding.line().is_released());
    assert!(!backend.is_owned(4));
}

#[test]
fn binding_an_output_hands_the_line_back() {
    let backend = Arc::new(MockGpioBackend::default());
    let (lines, interrupts) = providers(&backend);
    let mut output = GpioLine::acquire(lines, 4, Direction::Output).expect("acquire");
    output.configure_output(false).expect("configure");

    let Err(BindFailure { error, mut line }) =
        InterruptBinding::bind(output, CountingHandler(Arc::default()), interrupts)
    else {
        panic!("binding an output must fail");
    };
    assert!(matches!(error, ControllerError::InvalidState(_)));
    assert!(backend.is_owned(4));

    line.release().expect("release");
    assert!(!backend.is_owned(4));
}

#[test]
fn refused_interrupt_is_binding_failure() {
    let backend = Arc::new(MockGpioBackend::default());
    backend.reject_interrupt(4);
    let (lines, interrupts) = providers(&backend);

    let Err(BindFailure { error, line }) = InterruptBinding::bind(
        input_line(&lines, 4),
        CountingHandler(Arc::default()),
        interrupts,
    ) else {
        panic!("binding must fail");
    };
    assert!(matches!(error, ControllerError::BindingFailed { pin: 4, .. }));
    assert_eq!(error.kind(), "BindingFailed");
    assert_eq!(line.pin(), 4);

    drop(line);
    assert!(!backend.is_owned(4));
}

#[test]
fn dropping_binding_unregisters_before_release() {
    let backend = Arc::new(MockGpioBackend::default());
    let (lines, interrupts) = providers(&backend);
    let binding = InterruptBinding::bind(
        input_line(&lines, 4),
        CountingHandler(Arc::default()),
        interrupts,
    )
    .map_err(|failure| failure.error)
    .expect("bind");

    drop(binding);

    let journal = backend.journal();
    let unregistered = journal
        .iter()
        .position(|op| *op == MockOp::Unregister(4))
        .expect("unregistered");
    let released = journal
        .iter()
        .position(|op| *op == MockOp::Release(4))
        .expect("released");
    assert!(unregistered < released);
}

#[test]
fn unhandled_edge_is_not_delivered() {
    let backend = Arc::new(MockGpioBackend::default());
    let (lines, interrupts) = providers(&backend);
    let line = input_line(&lines, 4);
    let irq = interrupts
        .map_to_interrupt(line.handle().expect("live handle"))
        .expect("irq");
    interrupts
        .register(irq, InterruptBinding::TRIGGER, Arc::new(|| IrqReturn::NotHandled))
        .expect("register");

    assert!(!backend.pulse(4, 0));
    assert!(!backend.journal().contains(&MockOp::Handled(4)));
    assert_eq!(backend.in_flight(), 0);

    interrupts.unregister(irq).expect("unregister");
    assert_eq!(backend.registered_irqs(), 0);
}

#[test]
fn failed_unbind_still_releases_line() {
    let backend = Arc::new(MockGpioBackend::default());
    backend.fail_unregister(4);
    let (lines, interrupts) = providers(&backend);
    let mut binding = InterruptBinding::bind(
        input_line(&lines, 4),
        CountingHandler(Arc::default()),
        interrupts,
    )
    .map_err(|failure| failure.error)
    .expect("bind");
    assert!(!binding.interrupt_may_be_live());

    let err = binding.unbind().expect_err("unregister fails");
    assert!(matches!(err, ControllerError::BindingFailed { pin: 4, .. }));
    assert!(binding.interrupt_may_be_live());

    binding.release().expect("release after failed unbind");
    assert!(binding.line().is_released());
    assert!(!backend.is_owned(4));
}
