mod common;
use common::{sample_session, setup_store};

use ophys_sync::field::Field;
use ophys_sync::normalize::ENTRY_TIME_FIELD;
use ophys_sync::readers::{
    ReadError, get_dff_traces, get_eventlocked_traces, get_manifest, get_metrics,
    get_stimulus_presentations, get_stimulus_response,
};
use ophys_sync::records::ManifestRecord;
use ophys_sync::session::{EventLockedTraces, SessionData};
use ophys_sync::store::Filter;
use ophys_sync::table::Table;
use ophys_sync::writers::{
    TraceWriteMode, write_dff_traces, write_eventlocked_traces, write_manifest_entry,
    write_metrics, write_stimulus_presentations, write_stimulus_response,
};
use serde_json::json;

const OEID: i64 = 880961028;

#[test]
fn manifest_entry_is_upserted_by_session() {
    let (_store, mut client) = setup_store();
    let row = common::sessions_table(&[(880374622, OEID, "CAM2P.4", Some("OPHYS_1_images_A"))])
        .row(0)
        .unwrap();
    let mut entry = ManifestRecord::from_row(&row).unwrap();

    let first = write_manifest_entry(&mut client, &entry).unwrap();
    assert_eq!(first.inserted, 1);

    entry.metadata.insert("stage_name".into(), Field::from("OPHYS_4_images_B"));
    let second = write_manifest_entry(&mut client, &entry).unwrap();
    assert_eq!(second.updated, 1);

    let manifest = get_manifest(&mut client, None).unwrap();
    assert_eq!(manifest.len(), 1);
    assert_eq!(manifest.column_names().next(), Some("ophys_session_id"));
    assert_eq!(
        manifest.column("stage_name").unwrap(),
        &[Field::Text("OPHYS_4_images_B".into())]
    );
    assert!(manifest.has_column(ENTRY_TIME_FIELD));
}

#[test]
fn dff_traces_without_force_are_insert_only() {
    let (_store, mut client) = setup_store();
    let session = sample_session(OEID, 3, 2);

    let first = write_dff_traces(&mut client, &session, false).unwrap();
    assert_eq!((first.inserted, first.skipped), (3, 0));

    let mut changed = session.clone();
    changed
        .dff_traces
        .set_column("dff", vec![Field::from(vec![9.0]); 3])
        .unwrap();
    let second = write_dff_traces(&mut client, &changed, false).unwrap();
    assert_eq!((second.inserted, second.updated, second.skipped), (0, 0, 3));

    let stored = get_dff_traces(&mut client, None).unwrap();
    assert_eq!(stored.len(), 3);
    assert_eq!(
        stored.row(0).unwrap()["dff"],
        Field::Seq(vec![Field::F64(0.0), Field::F64(0.5), Field::Null])
    );

    let forced = write_dff_traces(&mut client, &changed, true).unwrap();
    assert_eq!((forced.deleted, forced.inserted), (3, 3));
    let stored = get_dff_traces(&mut client, None).unwrap();
    assert_eq!(stored.len(), 3);
    assert_eq!(stored.row(2).unwrap()["dff"], Field::Seq(vec![Field::F64(9.0)]));
}

#[test]
fn stimulus_response_joins_image_names_and_skips_stored_experiments() {
    let (_store, mut client) = setup_store();
    let session = sample_session(OEID, 2, 3);

    let report = write_stimulus_response(&mut client, &session, false).unwrap();
    assert_eq!(report.inserted, 6);

    let doc = client
        .ophys("stimulus_response")
        .find_one(
            &Filter::new()
                .eq("cell_specimen_id", 1001_i64)
                .eq("stimulus_presentations_id", 2_i64),
        )
        .unwrap()
        .unwrap()
        .body;
    assert_eq!(doc["image_name"], json!("im062"));
    assert_eq!(doc["ophys_experiment_id"], json!(OEID));
    assert!(!doc.contains_key("dff_trace"));
    assert!(!doc.contains_key("dff_trace_timestamps"));

    let skipped = write_stimulus_response(&mut client, &session, false).unwrap();
    assert_eq!((skipped.inserted, skipped.skipped), (0, 6));

    let forced = write_stimulus_response(&mut client, &session, true).unwrap();
    assert_eq!((forced.deleted, forced.inserted), (6, 6));

    let table = get_stimulus_response(&mut client, None).unwrap();
    assert_eq!(
        table.column_names().collect::<Vec<_>>(),
        vec![
            "stimulus_presentations_id",
            "cell_specimen_id",
            "mean_response",
            "baseline_response",
            "p_value"
        ]
    );
    assert_eq!(table.len(), 6);
}

#[test]
fn reader_filter_selects_one_experiment() {
    let (_store, mut client) = setup_store();
    write_stimulus_response(&mut client, &sample_session(5, 2, 2), false).unwrap();
    write_stimulus_response(&mut client, &sample_session(6, 3, 2), false).unwrap();

    let filter = Filter::new().eq("ophys_experiment_id", 5_i64);
    let table = get_stimulus_response(&mut client, Some(&filter)).unwrap();
    assert_eq!(table.len(), 4);

    let everything = get_stimulus_response(&mut client, Some(&Filter::new())).unwrap();
    assert_eq!(everything.len(), 10);

    let missing = Filter::new().eq("ophys_experiment_id", 7_i64);
    let none = get_stimulus_response(&mut client, Some(&missing)).unwrap();
    assert!(none.is_empty());
    assert_eq!(none.column_names().count(), 5);
}

#[test]
fn reader_fails_on_missing_column() {
    let (_store, mut client) = setup_store();
    let doc = json!({"ophys_experiment_id": 5, "cell_specimen_id": 1})
        .as_object()
        .cloned()
        .unwrap();
    client.ophys("stimulus_response_traces").insert_one(&doc).unwrap();

    let err = get_eventlocked_traces(&mut client, None).unwrap_err();
    assert!(matches!(
        err.downcast_ref::<ReadError>(),
        Some(ReadError::MissingColumn { column, .. }) if column == "stimulus_presentations_id"
    ));
}

#[test]
fn bulk_replace_rerun_keeps_n_documents() {
    let (_store, mut client) = setup_store();
    let session = sample_session(OEID, 3, 4);
    let n = 12;

    for _ in 0..2 {
        let report =
            write_eventlocked_traces(&mut client, &session, TraceWriteMode::BulkReplace).unwrap();
        assert_eq!(report.inserted, n);
    }
    let traces = get_eventlocked_traces(&mut client, None).unwrap();
    assert_eq!(traces.len(), n);

    let first = traces.row(0).unwrap();
    assert_eq!(first["t_0"], Field::F64(-0.5));
    assert_eq!(first["t_f"], Field::F64(1.0));
    assert_eq!(first["cell_specimen_id"], Field::I64(1000));
    assert_eq!(
        traces.row(1).unwrap()["dff"],
        Field::Seq(vec![
            Field::F64(4.0),
            Field::F64(5.0),
            Field::F64(6.0),
            Field::F64(7.0)
        ])
    );
}

#[test]
fn bulk_append_rerun_duplicates_and_upsert_does_not() {
    let (_store, mut client) = setup_store();
    let session = sample_session(OEID, 2, 2);

    write_eventlocked_traces(&mut client, &session, TraceWriteMode::BulkAppend).unwrap();
    write_eventlocked_traces(&mut client, &session, TraceWriteMode::BulkAppend).unwrap();
    assert_eq!(get_eventlocked_traces(&mut client, None).unwrap().len(), 8);

    let replaced =
        write_eventlocked_traces(&mut client, &session, TraceWriteMode::BulkReplace).unwrap();
    assert_eq!(replaced.deleted, 8);

    let upserted = write_eventlocked_traces(&mut client, &session, TraceWriteMode::Upsert).unwrap();
    assert_eq!((upserted.inserted, upserted.updated), (0, 4));
    assert_eq!(get_eventlocked_traces(&mut client, None).unwrap().len(), 4);
}

#[test]
fn stimulus_presentations_round_trip_as_one_document() {
    let (_store, mut client) = setup_store();
    let session = sample_session(OEID, 1, 5);

    let report = write_stimulus_presentations(&mut client, &session, false).unwrap();
    assert_eq!(report.inserted, 1);
    let doc = client
        .ophys("stimulus_presentations")
        .find_one(&Filter::new())
        .unwrap()
        .unwrap()
        .body;
    assert!(!doc.contains_key("licks"));
    assert!(!doc.contains_key("rewards"));
    assert_eq!(doc["image_name"].as_array().unwrap().len(), 5);

    let merged = write_stimulus_presentations(&mut client, &session, false).unwrap();
    assert_eq!(merged.updated, 1);
    let forced = write_stimulus_presentations(&mut client, &session, true).unwrap();
    assert_eq!((forced.deleted, forced.inserted), (1, 1));

    let table = get_stimulus_presentations(&mut client, None).unwrap();
    assert_eq!(table.len(), 5);
    assert_eq!(table.column_names().count(), 20);
    assert_eq!(
        table.column("image_name").unwrap()[4],
        Field::Text("im064".into())
    );
}

#[test]
fn metrics_rename_experiment_and_force_replaces() {
    let (_store, mut client) = setup_store();
    let metrics = Table::from_json_str(
        r#"{"experiment_id": [5, 5, 6],
            "cell_specimen_id": [1, 2, 1],
            "mean_response": [0.1, 0.2, 0.3]}"#,
    )
    .unwrap();

    let first = write_metrics(&mut client, &metrics, false).unwrap();
    assert_eq!(first.inserted, 3);
    let again = write_metrics(&mut client, &metrics, false).unwrap();
    assert_eq!(again.updated, 3);

    let only_five = metrics.filter_rows(|r| r["experiment_id"].as_i64() == Some(5));
    let forced = write_metrics(&mut client, &only_five, true).unwrap();
    assert_eq!((forced.deleted, forced.inserted), (2, 2));

    let five = Filter::new().eq("ophys_experiment_id", 5.0);
    let table = get_metrics(&mut client, Some(&five)).unwrap();
    assert_eq!(table.len(), 2);
    assert_eq!(
        table.column_names().take(2).collect::<Vec<_>>(),
        vec!["ophys_experiment_id", "cell_specimen_id"]
    );
    assert!(!table.has_column("experiment_id"));
    assert_eq!(table.column("ophys_experiment_id").unwrap()[0], Field::I64(5));
    assert_eq!(get_metrics(&mut client, None).unwrap().len(), 3);
}

#[test]
fn writer_rejects_malformed_table_before_deleting() {
    let (_store, mut client) = setup_store();
    let session = sample_session(OEID, 2, 1);
    write_dff_traces(&mut client, &session, true).unwrap();

    let mut broken = session.clone();
    broken.dff_traces.drop_columns(&["cell_roi_id"]);
    assert!(write_dff_traces(&mut client, &broken, true).is_err());
    assert_eq!(get_dff_traces(&mut client, None).unwrap().len(), 2);
}

/// Session source that hands out its cube as-is, without checking its shape.
struct UncheckedCube(EventLockedTraces);

impl SessionData for UncheckedCube {
    fn ophys_experiment_id(&self) -> i64 {
        OEID
    }
    fn dff_traces(&self) -> anyhow::Result<Table> {
        Ok(Table::new())
    }
    fn stimulus_response(&self) -> anyhow::Result<Table> {
        Ok(Table::new())
    }
    fn stimulus_presentations(&self) -> anyhow::Result<Table> {
        Ok(Table::new())
    }
    fn extended_stimulus_presentations(&self) -> anyhow::Result<Table> {
        Ok(Table::new())
    }
    fn eventlocked_traces(&self) -> anyhow::Result<EventLockedTraces> {
        Ok(self.0.clone())
    }
}

#[test]
fn ragged_cube_from_any_source_is_an_error() {
    let (_store, mut client) = setup_store();
    let ragged = UncheckedCube(EventLockedTraces {
        cell_specimen_ids: vec![1, 2],
        stimulus_presentations_ids: vec![0],
        eventlocked_timestamps: vec![0.0, 0.5],
        data: vec![0.1, 0.2, 0.3],
    });

    for mode in [TraceWriteMode::Upsert, TraceWriteMode::BulkReplace] {
        let err = write_eventlocked_traces(&mut client, &ragged, mode).unwrap_err();
        assert!(format!("{err:#}").contains("expected 4"));
    }
    assert_eq!(get_eventlocked_traces(&mut client, None).unwrap().len(), 0);
}
