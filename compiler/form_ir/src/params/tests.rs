#![allow(clippy::unwrap_used)]

use pretty_assertions::assert_eq;

use super::IrParams;
use crate::error::IrError;

#[test]
fn defaults() {
    let params = IrParams::default();
    assert_eq!(params.table_rtol, 1e-6);
    assert_eq!(params.table_atol, 1e-9);
    assert_eq!(params.max_registers, 64);
    assert_eq!(params.score_threshold, 3);
    assert_eq!(params.expensive_multiplier, 20);
}

#[test]
fn overrides_apply_in_order() {
    let params = IrParams::default()
        .with_overrides([
            ("table_atol", "1e-12"),
            ("max_registers", " 8 "),
            ("max_registers", "16"),
        ])
        .unwrap();
    assert_eq!(params.table_atol, 1e-12);
    assert_eq!(params.max_registers, 16);
    assert_eq!(params.table_rtol, 1e-6);
}

#[test]
fn unknown_key_is_rejected() {
    let err = IrParams::default()
        .with_overrides([("optimize", "true")])
        .unwrap_err();
    assert!(matches!(err, IrError::InvalidParameter { ref key, .. } if key == "optimize"));
}

#[test]
fn bad_values_are_rejected() {
    for (key, value) in [
        ("table_rtol", "-1.0"),
        ("table_atol", "inf"),
        ("table_atol", "tiny"),
        ("max_registers", "-3"),
        ("score_threshold", "2.5"),
    ] {
        let result = IrParams::default().with_overrides([(key, value)]);
        assert!(result.is_err(), "{key} = {value} accepted");
    }
}
