use irqled::BackendKind;

#[test]
fn selection_follows_enabled_features() {
    let expected = if cfg!(feature = "hardware-gpio") {
        Some(BackendKind::Libgpiod)
    } else if cfg!(feature = "mock-gpio") {
        Some(BackendKind::Mock)
    } else {
        None
    };
    assert_eq!(BackendKind::selected(), expected);
}

#[test]
fn hardware_backend_is_the_default() {
    let manifest = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/Cargo.toml"));
    assert!(manifest.contains(r#"default = ["hardware-gpio"]"#));
    assert!(manifest.contains("mock-gpio = []"));
}

#[test]
fn backend_names() {
    assert_eq!(BackendKind::Libgpiod.to_string(), "libgpiod");
    assert_eq!(BackendKind::Mock.to_string(), "mock");
}

#[cfg(not(any(feature = "hardware-gpio", feature = "mock-gpio")))]
#[test]
fn build_without_backend_refuses_to_run() {
    use std::sync::Arc;

    use irqled::{ControllerConfig, ControllerError, open_lifecycle};

    let config: ControllerConfig = serde_json::from_str(
        r#"
        {
            "outputs": [ { "name": "LED1", "pin": 17 } ],
            "buttons": [ { "name": "button1", "pin": 5, "outputs": [17], "effect": "toggle" } ]
        }
        "#,
    )
    .expect("valid config json");

    let err = open_lifecycle(Arc::new(config)).err().expect("no backend");
    assert!(matches!(err, ControllerError::Config(_)));
}

#[cfg(all(feature = "mock-gpio", not(feature = "hardware-gpio")))]
#[test]
fn mock_backend_is_opt_in() {
    use std::sync::Arc;

    use irqled::{ControllerConfig, LifecycleState, open_lifecycle};

    let config: ControllerConfig = serde_json::from_str(
        r#"
        {
            "outputs": [ { "name": "LED1", "pin": 17 } ],
            "buttons": [ { "name": "button1", "pin": 5, "outputs": [17], "effect": "toggle" } ]
        }
        "#,
    )
    .expect("valid config json");

    let (kind, lifecycle) = open_lifecycle(Arc::new(config)).expect("mock lifecycle");
    assert_eq!(kind, BackendKind::Mock);
    assert_eq!(lifecycle.state(), LifecycleState::Uninitialized);
}
