#![allow(dead_code)]

use std::collections::HashMap;
use std::path::PathBuf;

use diesel::QueryableByName;
use diesel::prelude::*;
use diesel::sql_types::{Integer, Text};
use ophys_sync::field::Field;
use ophys_sync::session::{EventLockedTraces, SessionData, SessionLoader, SessionTables};
use ophys_sync::store::DocumentClient;
use ophys_sync::table::Table;
use tempfile::TempDir;

#[derive(QueryableByName)]
struct JournalMode {
    #[diesel(sql_type = Text)]
    journal_mode: String,
}
#[derive(QueryableByName)]
struct ForeignKeys {
    #[diesel(sql_type = Integer)]
    foreign_keys: i32,
}
#[derive(QueryableByName)]
struct BusyTimeout {
    #[diesel(sql_type = Integer, column_name = "timeout")]
    busy_timeout: i32,
}

pub struct TestStore {
    pub dir: TempDir,  // keep alive for the life of the test
    pub path: String, // <tmpdir>/store.db
}

pub fn setup_store() -> (TestStore, DocumentClient) {
    let dir = TempDir::new().expect("tempdir");
    let mut p = PathBuf::from(dir.path());
    p.push("store.db");
    let path = p.to_string_lossy().to_string();

    let client = DocumentClient::connect("test", &path).expect("connect");
    (TestStore { dir, path }, client)
}

pub fn assert_sqlite_pragmas(conn: &mut SqliteConnection) {
    use diesel::sql_query;

    let jm: JournalMode = sql_query("PRAGMA journal_mode;").get_result(conn).unwrap();
    assert_eq!(jm.journal_mode.to_lowercase(), "wal");

    let fk: ForeignKeys = sql_query("PRAGMA foreign_keys;").get_result(conn).unwrap();
    assert_eq!(fk.foreign_keys, 1);

    let bt: BusyTimeout = sql_query("PRAGMA busy_timeout;").get_result(conn).unwrap();
    assert_eq!(bt.busy_timeout, 5000);
}

fn ints(values: impl IntoIterator<Item = i64>) -> Vec<Field> {
    values.into_iter().map(Field::I64).collect()
}

/// A small but complete session: `cells` cells, `presentations` presentations,
/// 4 event-locked samples per trace.
pub fn sample_session(
    ophys_experiment_id: i64,
    cells: usize,
    presentations: usize,
) -> SessionTables {
    let cell_ids: Vec<i64> = (0..cells as i64).map(|c| 1_000 + c).collect();
    let roi_ids: Vec<i64> = (0..cells as i64).map(|c| ophys_experiment_id * 10 + c).collect();
    let pres_ids: Vec<i64> = (0..presentations as i64).collect();

    let dff_traces = Table::new()
        .with_column("cell_specimen_id", ints(cell_ids.clone()))
        .unwrap()
        .with_column("cell_roi_id", ints(roi_ids))
        .unwrap()
        .with_column(
            "dff",
            (0..cells).map(|c| Field::from(vec![c as f64, 0.5, f64::NAN])).collect(),
        )
        .unwrap();

    let mut sr_cells = Vec::new();
    let mut sr_pres = Vec::new();
    let mut sr_mean = Vec::new();
    let mut sr_p = Vec::new();
    let mut sr_trace = Vec::new();
    for &cell in &cell_ids {
        for &pres in &pres_ids {
            sr_cells.push(Field::I64(cell));
            sr_pres.push(Field::I32(pres as i32));
            sr_mean.push(Field::F32(0.25 * pres as f32));
            sr_p.push(Field::F64(if pres % 2 == 0 { 0.01 } else { 0.5 }));
            sr_trace.push(Field::from(vec![0.0, 1.0]));
        }
    }
    let n = sr_cells.len();
    let stimulus_response = Table::new()
        .with_column("cell_specimen_id", sr_cells)
        .unwrap()
        .with_column("stimulus_presentations_id", sr_pres)
        .unwrap()
        .with_column("mean_response", sr_mean)
        .unwrap()
        .with_column("baseline_response", vec![Field::F64(0.0); n])
        .unwrap()
        .with_column("p_value", sr_p)
        .unwrap()
        .with_column("dff_trace", sr_trace.clone())
        .unwrap()
        .with_column("dff_trace_timestamps", sr_trace)
        .unwrap();

    let image_names: Vec<Field> = pres_ids
        .iter()
        .map(|p| Field::Text(format!("im{:03}", 60 + p)))
        .collect();
    let stimulus_presentations = Table::new()
        .with_column("stimulus_presentations_id", ints(pres_ids.clone()))
        .unwrap()
        .with_column("image_name", image_names.clone())
        .unwrap();

    let mut extended = Table::new();
    for (i, column) in ophys_sync::readers::STIMULUS_PRESENTATIONS_COLUMNS.iter().enumerate() {
        let cells = match *column {
            "stimulus_presentations_id" => ints(pres_ids.clone()),
            "image_name" => image_names.clone(),
            "omitted" => vec![Field::Bool(false); presentations],
            _ => pres_ids.iter().map(|p| Field::F64(*p as f64 + i as f64)).collect(),
        };
        extended.set_column(*column, cells).unwrap();
    }
    extended
        .set_column("licks", vec![Field::Seq(vec![Field::F64(1.5)]); presentations])
        .unwrap();
    extended
        .set_column("rewards", vec![Field::Seq(vec![]); presentations])
        .unwrap();

    let samples = 4;
    let eventlocked = EventLockedTraces {
        cell_specimen_ids: cell_ids.clone(),
        stimulus_presentations_ids: pres_ids.clone(),
        eventlocked_timestamps: vec![-0.5, 0.0, 0.5, 1.0],
        data: (0..cells * presentations * samples).map(|i| i as f64).collect(),
    };

    SessionTables {
        ophys_experiment_id,
        dff_traces,
        stimulus_response,
        stimulus_presentations,
        extended_stimulus_presentations: extended,
        eventlocked_traces: Some(eventlocked),
    }
}

/// Loader over in-memory sessions; unknown session ids fail to load.
#[derive(Default)]
pub struct MemoryLoader {
    pub sessions: HashMap<i64, SessionTables>,
}

impl SessionLoader for MemoryLoader {
    fn load(&self, ophys_session_id: i64) -> anyhow::Result<Box<dyn SessionData>> {
        let session = self
            .sessions
            .get(&ophys_session_id)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("no cached session {ophys_session_id}"))?;
        Ok(Box::new(session))
    }
}

/// Sessions table with the columns the default session filter reads.
pub fn sessions_table(rows: &[(i64, i64, &str, Option<&str>)]) -> Table {
    let mut table = Table::new();
    for (session, experiment, equipment, stage) in rows {
        table.push_row(
            [
                ("ophys_session_id".to_string(), Field::I64(*session)),
                ("ophys_experiment_id".to_string(), Field::I64(*experiment)),
                ("equipment_name".to_string(), Field::from(*equipment)),
                ("stage_name".to_string(), Field::from(stage.map(str::to_string))),
            ]
            .into_iter()
            .collect(),
        );
    }
    table
}
