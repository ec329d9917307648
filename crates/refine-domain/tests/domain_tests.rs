use chrono::{TimeZone, Utc};
use refine_domain::{Actor, Batch, BatchFlag, Flow, FlowKey, NodeKind, Pipeline, RecoveryPour};
use serde_json::json;
use uuid::Uuid;

#[test]
fn test_batch_document_keeps_flags_and_pours() {
    // El documento completo debe sobrevivir a JSON sin perder pours ni flags
    let actor = Actor::new("u-7", "luis");
    let ts = Utc.with_ymd_and_hms(2024, 3, 4, 9, 0, 0).unwrap();
    let mut batch = Batch::new("AU-2024-17", Pipeline::Gold, FlowKey::new(Uuid::new_v4(), 2), "deadbeef", "receiving", &actor, ts);
    batch.metrics.recovery_pours.push(RecoveryPour { weight_g: 1200.5,
                                                     timestamp: ts,
                                                     pour_number: 1 });
    batch.flags.insert(BatchFlag::LossBeyondTolerance);
    batch.flags.insert(BatchFlag::ExpectedOutputAssumed);

    let doc = serde_json::to_value(&batch).unwrap();
    assert_eq!(doc["flags"], json!(["expected_output_assumed", "loss_beyond_tolerance"]));
    assert_eq!(doc["status"], json!("created"));
    assert_eq!(doc["pipeline"], json!("gold"));

    let back: Batch = serde_json::from_value(doc).unwrap();
    assert_eq!(back, batch);
}

#[test]
fn test_flow_authored_json_defaults_optional_fields() {
    // Un Flow escrito a mano (editor/CLI) puede omitir layout, entrada y hash
    let flow: Flow = serde_json::from_value(json!({
        "flow_id": "6f1c8f4e-8a59-4c43-9d7e-1d0b1b1f2a10",
        "version": 1,
        "name": "Silver line",
        "pipeline": "silver",
        "status": "draft",
        "nodes": [
            {"id": "recv", "kind": "station", "template_id": "tpl-recv"},
            {"id": "qc", "kind": "check", "template_id": "tpl-qc"}
        ],
        "edges": [{"source_node_id": "recv", "target_node_id": "qc"}],
        "created_by": "admin",
        "created_at": "2024-01-01T00:00:00Z"
    })).unwrap();
    assert_eq!(flow.pipeline, Pipeline::Silver);
    assert_eq!(flow.node("qc").map(|n| n.kind), Some(NodeKind::Check));
    assert!(flow.entry_node_id.is_none());
    assert!(flow.definition_hash.is_none());
    assert!(flow.nodes.iter().all(|n| n.layout_hint.is_none()));
}
