//! Property-based test generators using proptest.

use proptest::prelude::*;
use serde_json::{json, Value};
use vitalsync_protocol::{FieldPath, Patch, UpdateMode};

/// Strategy for update modes.
pub fn update_mode_strategy() -> impl Strategy<Value = UpdateMode> {
    prop_oneof![
        Just(UpdateMode::Full),
        Just(UpdateMode::Delta),
        Just(UpdateMode::Hybrid),
    ]
}

/// Strategy for dotted field paths one to three segments deep.
pub fn field_path_strategy() -> impl Strategy<Value = FieldPath> {
    prop::collection::vec("[a-z][a-zA-Z]{0,7}", 1..4)
        .prop_map(|segments| FieldPath::new(segments.join(".")))
}

/// Strategy for JSON leaves as the store writes them.
pub fn leaf_value_strategy() -> impl Strategy<Value = Value> {
    prop_oneof![
        (-1000i64..1000).prop_map(|n| json!(n)),
        (-1000.0f64..1000.0).prop_map(|x| json!((x * 10.0).round() / 10.0)),
        "[a-z]{1,8}".prop_map(Value::String),
        any::<bool>().prop_map(Value::Bool),
    ]
}

/// Strategy for patches over a handful of entities.
///
/// Every path has two segments, so no path is a prefix of another.
pub fn patch_strategy(collection: &'static str) -> impl Strategy<Value = Patch> {
    prop::collection::vec(
        ("E00[1-4]", "[a-z]{1,6}", "[a-z]{1,6}", leaf_value_strategy()),
        0..16,
    )
    .prop_map(move |entries| {
        let mut patch = Patch::new();
        for (entity, group, field, value) in entries {
            patch.insert(collection, entity, format!("{group}.{field}"), value);
        }
        patch
    })
}

/// Strategy for a run of mode switches.
pub fn mode_sequence_strategy(max_len: usize) -> impl Strategy<Value = Vec<UpdateMode>> {
    prop::collection::vec(update_mode_strategy(), 1..max_len.max(2))
}

#[cfg(test)]
mod tests {
    use super::*;

    proptest! {
        #[test]
        fn generated_paths_parse(path in field_path_strategy()) {
            let depth = path.segments().count();
            prop_assert!((1..=3).contains(&depth));
            prop_assert!(path.is_valid());
        }

        #[test]
        fn generated_patches_stay_in_collection(patch in patch_strategy("patients")) {
            for (collection, _, _, _) in patch.iter() {
                prop_assert_eq!(collection, "patients");
            }
        }
    }
}
