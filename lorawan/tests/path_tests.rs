use proptest::prelude::*;

use lorawan_ns::{
    device::{EndDevice, EndDeviceIdentifiers},
    mask,
    path::{FieldPath, PathSet},
    state::SetDeviceState,
};

fn segment() -> impl Strategy<Value = String> {
    "[a-z][a-z_]{0,7}"
}

fn path() -> impl Strategy<Value = Vec<String>> {
    prop::collection::vec(segment(), 1..5)
}

proptest! {
    #[test]
    fn added_path_covers_descendants(base in path(), tail in path()) {
        let mut set = PathSet::new();
        set.add_fields([base.join(".")]);
        let child = FieldPath::parse(&format!("{}.{}", base.join("."), tail.join(".")));
        prop_assert!(set.has_field(&FieldPath::parse(&base.join("."))));
        prop_assert!(set.has_field(&child));
        prop_assert_eq!(
            child.strip_prefix(&FieldPath::parse(&base.join("."))),
            Some(FieldPath::parse(&tail.join(".")))
        );
    }

    #[test]
    fn added_path_does_not_cover_ancestors(base in path(), tail in path()) {
        let child = format!("{}.{}", base.join("."), tail.join("."));
        let set = PathSet::from_strs(&[child.as_str()]);
        prop_assert!(!set.has_field(&FieldPath::parse(&base.join("."))));
    }

    #[test]
    fn add_fields_is_idempotent(paths in prop::collection::vec(path(), 0..8)) {
        let paths: Vec<String> = paths.iter().map(|p| p.join(".")).collect();
        let mut once = PathSet::new();
        once.add_fields(paths.iter().map(String::as_str));
        let mut twice = once.clone();
        twice.add_fields(paths.iter().map(String::as_str));
        prop_assert_eq!(once, twice);
    }

    #[test]
    fn sibling_prefix_is_not_covered(base in segment(), suffix in "[a-z]{1,4}") {
        let set = PathSet::from_strs(&[base.as_str()]);
        let sibling = format!("{}{}", base, suffix);
        prop_assert!(!set.has_field(&FieldPath::parse(&sibling)));
    }
}

#[test]
fn test_set_device_state_sees_engine_paths() {
    let dev = EndDevice::new(EndDeviceIdentifiers::new("app", "dev"));
    let mut st = SetDeviceState::new(dev, PathSet::from_strs(&["session.keys"]));
    st.add_set_fields(["mac_state"]);
    assert!(st.has_set_field("mac_state.current_parameters.rx1_delay"));
    assert!(st.has_set_field("session.keys.app_s_key.key"));
    assert!(!st.has_set_field("session"));
    assert_eq!(st.set_fields().len(), 2);
}

#[test]
fn test_filtered_keeps_selected_fields() {
    let mut dev = EndDevice::new(EndDeviceIdentifiers::new("app", "dev"));
    dev.frequency_plan_id = "EU_863_870".into();
    dev.downlink_margin = 4;
    let out = mask::filtered(&dev, &PathSet::from_strs(&["ids.device_id", "downlink_margin"])).unwrap();
    assert_eq!(out.ids.device_id, "dev");
    assert_eq!(out.ids.application_ids.application_id, "");
    assert_eq!(out.downlink_margin, 4);
    assert_eq!(out.frequency_plan_id, "");
}
