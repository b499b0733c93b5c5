mod common;

use std::sync::Arc;

use sno_core::testing::TransportAction;

use common::{config, orchestrator, recorder, TWO_NODES};

#[tokio::test]
async fn actor_config_lists_a_cache_once_for_both_reference_kinds() {
    let scratch = tempfile::tempdir().unwrap();
    let recorder = Arc::new(recorder());
    let orch = orchestrator(config(TWO_NODES, scratch.path()), &recorder, scratch.path());

    let actor = orch
        .generated_configs()
        .iter()
        .find(|g| g.service == "a1")
        .unwrap();
    let parsed: serde_yaml::Value = serde_yaml::from_str(&actor.contents).unwrap();
    let caches = parsed["caches"].as_mapping().unwrap();
    assert_eq!(caches.len(), 1);
    assert_eq!(parsed["caches"]["cache1"]["addr"], "10.0.0.2");
    assert_eq!(parsed["databases"].as_mapping().unwrap().len(), 1);
}

#[tokio::test]
async fn generated_configs_are_staged_and_uploaded_before_launch() {
    let scratch = tempfile::tempdir().unwrap();
    let recorder = Arc::new(recorder());
    let mut orch = orchestrator(config(TWO_NODES, scratch.path()), &recorder, scratch.path());

    orch.start().await.unwrap();
    let staging = scratch.path().join("staging");
    for file in ["registry.yaml", "front.yaml", "a1.yaml"] {
        let staged = std::fs::read_to_string(staging.join(file)).unwrap();
        let generated = orch
            .generated_configs()
            .iter()
            .find(|g| g.file_name == file)
            .unwrap();
        assert_eq!(staged, generated.contents);
    }

    let upload = recorder
        .position(TransportAction::Push, "staging/front.yaml")
        .unwrap();
    let launch = recorder
        .position(TransportAction::Exec, "FrontApp front.yaml")
        .unwrap();
    assert!(upload < launch);

    orch.teardown().await;
}

#[tokio::test]
async fn same_topology_synthesizes_identical_documents() {
    let scratch = tempfile::tempdir().unwrap();
    let recorder = Arc::new(recorder());
    let first = orchestrator(config(TWO_NODES, scratch.path()), &recorder, scratch.path());
    let second = orchestrator(config(TWO_NODES, scratch.path()), &recorder, scratch.path());
    assert_eq!(first.generated_configs(), second.generated_configs());
}
