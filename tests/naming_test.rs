//! Integration tests for image naming
//!
//! Versioned-unique names produced at publish time must map back to the
//! stable name the distribution stage maintains.

use chrono::{TimeZone, Utc};
use proptest::prelude::*;

use imgrelay::core::naming::{
    relay_key, stable_name_for, versioned_name, NamingStrategy, TimestampSuffix,
};

/// Test: the name published by one build strips to the configured stable name
#[test]
fn test_publish_and_distribute_agree() {
    let at = Utc.with_ymd_and_hms(2025, 11, 15, 22, 2, 48).unwrap();
    let published = versioned_name("talos-scaleway", "v1.11.5", at);

    assert_eq!(published, "talos-scaleway-v1.11.5-20251115220248");
    assert_eq!(
        TimestampSuffix.stable_name(&published),
        "talos-scaleway-v1.11.5"
    );
    assert_eq!(relay_key(&published), format!("{published}.qcow2"));
}

/// Test: builds of the same version share a stable name but not a relay key
#[test]
fn test_rebuilds_share_stable_name() {
    let first_at = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
    let second_at = Utc.with_ymd_and_hms(2025, 1, 2, 0, 0, 0).unwrap();
    let first = versioned_name("talos", "v1.11.5", first_at);
    let second = versioned_name("talos", "v1.11.5", second_at);

    assert_eq!(
        TimestampSuffix.stable_name(&first),
        TimestampSuffix.stable_name(&second)
    );
    assert_ne!(relay_key(&first), relay_key(&second));
}

/// Test: version-like suffixes are not mistaken for timestamps
#[test]
fn test_non_timestamp_suffixes() {
    for name in ["talos-v1.11.5", "talos-v1.11.5-rc1", "talos-2025", "talos-123456789012345"] {
        assert_eq!(TimestampSuffix.stable_name(name), name);
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    /// A stable name never carries a timestamp suffix
    #[test]
    fn prop_stable_names_have_no_suffix(
        prefix in "[a-z]{1,10}",
        version in "v[0-9]\\.[0-9]{1,2}\\.[0-9]{1,2}",
        secs in 0i64..4_000_000_000,
    ) {
        let at = Utc.timestamp_opt(secs, 0).unwrap();
        let stable = TimestampSuffix.stable_name(&versioned_name(&prefix, &version, at));
        prop_assert_eq!(&stable, &stable_name_for(&prefix, &version));
        prop_assert_eq!(TimestampSuffix.stable_name(&stable), stable);
    }
}
