#![allow(clippy::unwrap_used, clippy::expect_used, missing_docs)]

mod integration {
    mod ipc_roundtrip_tests;
    mod markup_scenario_tests;
    mod persistence_lifecycle_tests;
}
