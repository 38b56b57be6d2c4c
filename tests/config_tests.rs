use irqled::{ControllerConfig, ControllerError, EffectPolicy};

fn parse(json: &str) -> ControllerConfig {
    serde_json::from_str(json).expect("valid config json")
}

fn minimal() -> ControllerConfig {
    parse(
        r#"
        {
            "outputs": [ { "name": "LED1", "pin": 17 } ],
            "buttons": [ { "name": "button1", "pin": 5, "outputs": [17], "effect": "toggle" } ]
        }
        "#,
    )
}

#[test]
fn defaults_are_applied() {
    let config = minimal();
    assert_eq!(config.chip, "/dev/gpiochip0");
    assert!(!config.outputs[0].initial_level);
    assert_eq!(config.buttons[0].debounce_ms, 200);
    assert_eq!(config.buttons[0].effect, EffectPolicy::Toggle);
    config.validate().expect("minimal config is valid");
}

#[test]
fn set_effect_carries_its_level() {
    let config = parse(
        r#"
        {
            "outputs": [ { "name": "LED1", "pin": 17, "initial_level": true } ],
            "buttons": [
                { "name": "on", "pin": 5, "outputs": [17], "effect": { "set": true } },
                { "name": "off", "pin": 6, "outputs": [17], "effect": { "set": false }, "debounce_ms": 300 }
            ]
        }
        "#,
    );
    assert_eq!(config.buttons[0].effect, EffectPolicy::Set(true));
    assert_eq!(config.buttons[1].effect, EffectPolicy::Set(false));
    assert_eq!(config.buttons[1].debounce_ms, 300);
    assert!(config.outputs[0].initial_level);
}

#[test]
fn effect_policies_compute_next_level() {
    assert!(EffectPolicy::Set(true).next_level(true));
    assert!(EffectPolicy::Set(true).next_level(false));
    assert!(!EffectPolicy::Set(false).next_level(true));
    assert!(EffectPolicy::Toggle.next_level(false));
    assert!(!EffectPolicy::Toggle.next_level(true));
}

#[test]
fn duplicate_pins_are_rejected() {
    let mut config = minimal();
    config.buttons[0].pin = 17;
    assert!(matches!(config.validate(), Err(ControllerError::Config(_))));
}

#[test]
fn undeclared_output_is_rejected() {
    let mut config = minimal();
    config.buttons[0].outputs = vec![99];
    assert!(matches!(config.validate(), Err(ControllerError::Config(_))));

    config.buttons[0].outputs = vec![];
    assert!(matches!(config.validate(), Err(ControllerError::Config(_))));

    config.buttons[0].outputs = vec![17, 17];
    assert!(matches!(config.validate(), Err(ControllerError::Config(_))));
}

#[test]
fn empty_topology_is_rejected() {
    let mut config = minimal();
    config.buttons.clear();
    assert!(matches!(config.validate(), Err(ControllerError::Config(_))));

    let mut config = minimal();
    config.outputs.clear();
    assert!(matches!(config.validate(), Err(ControllerError::Config(_))));
}

#[test]
fn example_config_loads() {
    let path = concat!(env!("CARGO_MANIFEST_DIR"), "/config.example.json");
    let config = ControllerConfig::load_from_file(path).expect("example config loads");
    assert_eq!(config.outputs.len(), 2);
    assert_eq!(config.buttons.len(), 4);
}

#[test]
fn missing_file_is_config_error() {
    let err = ControllerConfig::load_from_file("/nonexistent/irqled.json").expect_err("fails");
    assert!(matches!(err, ControllerError::Config(_)));
}
