//! Unit tests for action input values and the rewrite merge laws.

use serde_json::json;

use agent_bridge::protocol::value::{
    input_map_from_json, input_map_to_json, merge_inputs, InputMap, InputValue,
};
use agent_bridge::AppError;

fn map(pairs: &[(&str, InputValue)]) -> InputMap {
    pairs
        .iter()
        .map(|(k, v)| ((*k).to_owned(), v.clone()))
        .collect()
}

#[test]
fn merge_of_two_absent_maps_is_absent() {
    assert_eq!(merge_inputs(None, None), None);
}

#[test]
fn merge_of_absent_base_copies_update() {
    let update = map(&[("a", "1".into())]);
    assert_eq!(merge_inputs(None, Some(&update)), Some(update));
}

#[test]
fn merge_of_absent_update_keeps_base() {
    let base = map(&[("a", "1".into())]);
    assert_eq!(merge_inputs(Some(&base), None), Some(base));
}

#[test]
fn merge_overwrites_base_keys_with_update() {
    let base = map(&[("a", "old".into()), ("b", true.into())]);
    let update = map(&[("a", "new".into()), ("c", 3_i64.into())]);

    let merged = merge_inputs(Some(&base), Some(&update)).unwrap();
    assert_eq!(merged.len(), 3);
    assert_eq!(merged["a"].as_str(), Some("new"));
    assert_eq!(merged["b"].as_bool(), Some(true));
    assert_eq!(merged["c"].as_i64(), Some(3));
}

#[test]
fn merge_does_not_mutate_inputs() {
    let base = map(&[("a", "old".into())]);
    let update = map(&[("a", "new".into())]);
    let _ = merge_inputs(Some(&base), Some(&update));
    assert_eq!(base["a"].as_str(), Some("old"));
}

#[test]
fn json_object_converts_to_typed_values() {
    let input = input_map_from_json(json!({
        "s": "text",
        "n": 1.5,
        "b": false,
        "z": null,
        "arr": [1, "two"],
        "obj": {"k": "v"}
    }))
    .unwrap();

    assert_eq!(input["s"].as_str(), Some("text"));
    assert_eq!(input["n"].as_f64(), Some(1.5));
    assert_eq!(input["b"].as_bool(), Some(false));
    assert_eq!(input["z"], InputValue::Null);
    assert!(matches!(input["arr"], InputValue::Array(ref items) if items.len() == 2));
    assert_eq!(
        input["obj"].as_object().and_then(|o| o.get("k")).and_then(InputValue::as_str),
        Some("v")
    );
}

#[test]
fn null_input_is_an_empty_map() {
    assert!(input_map_from_json(serde_json::Value::Null).unwrap().is_empty());
}

#[test]
fn non_object_input_is_rejected() {
    let err = input_map_from_json(json!("string")).unwrap_err();
    assert!(matches!(err, AppError::Decode(ref msg) if msg.contains("must be an object")));
}

#[test]
fn typed_map_converts_back_to_same_json() {
    let original = json!({"command": "ls", "flags": ["-l", "-a"], "depth": 2});
    let typed = input_map_from_json(original.clone()).unwrap();
    assert_eq!(serde_json::Value::Object(input_map_to_json(typed)), original);
}

#[test]
fn input_value_serializes_as_plain_json() {
    let value = InputValue::from("x");
    assert_eq!(serde_json::to_value(&value).unwrap(), json!("x"));
}
