//! Integration tests for npk-common library.

use npk_common::{FailureClass, LogFormat, LoggingConfig, Reading, parse_config};
use serde::Deserialize;

#[test]
fn test_reading_payload_workflow() {
    let reading = Reading::new(95, 65, 82, vec![95, 65, 82]);

    let bytes = reading.encode_payload(false).expect("encode failed");
    let decoded: serde_json::Value = serde_json::from_slice(&bytes).expect("decode failed");

    assert_eq!(
        decoded,
        serde_json::json!({ "nitrogen": 95, "phosphorus": 65, "potassium": 82 })
    );
}

#[test]
fn test_reading_serde_roundtrip_keeps_raw_registers() {
    let reading = Reading::new(10, 11, 12, vec![10, 11, 12])
        .with_timestamp(42)
        .with_extra("ph", 6.5);

    let json = serde_json::to_string(&reading).unwrap();
    let back: Reading = serde_json::from_str(&json).unwrap();

    assert_eq!(back, reading);
}

#[test]
fn test_logging_config_in_larger_document() {
    #[derive(Deserialize)]
    struct Doc {
        logging: LoggingConfig,
    }

    let doc: Doc = parse_config(
        r#"{
            // comments are allowed in JSON5
            logging: { level: "warn", format: "json" },
        }"#,
    )
    .unwrap();

    assert_eq!(doc.logging.level, "warn");
    assert_eq!(doc.logging.format, LogFormat::Json);
}

#[test]
fn test_failure_class_variants() {
    assert_ne!(FailureClass::Transient, FailureClass::Fault);
    assert_eq!(FailureClass::Transient.as_str(), "transient");
}
