use std::time::Duration;

use tabletdb_core::{
    ColumnType, ComparisonOp, Database, DatabaseConfig, FlushMode, PartitionConfig, Predicate,
    ReadMode, Result, Schema, SessionConfig, Value,
};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    if let Err(err) = run() {
        error!(error = %err, "demo failed");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let db = Database::new(DatabaseConfig {
        default_operation_timeout: Some(Duration::from_secs(5)),
    });

    let schema = Schema::builder()
        .add_key_column("id", ColumnType::String)
        .add_column("name", ColumnType::String)
        .add_column("visits", ColumnType::Int64)
        .build()?;
    let partitions = PartitionConfig {
        range_split_points: vec![vec![Value::from("5")]],
        num_hash_buckets: 4,
        ..Default::default()
    };
    let table = db.create_table("people", schema, &partitions)?;

    let session = db.new_session(SessionConfig {
        flush_mode: FlushMode::ManualFlush,
        ..Default::default()
    })?;
    for i in 1..=10 {
        let mut insert = table.new_insert();
        insert
            .row_mut()
            .set("id", i.to_string())?
            .set("name", format!("user-{}", i))?
            .set("visits", i64::from(i) * 3)?;
        session.apply(insert)?;
    }
    let failed = session.flush().iter().filter(|r| r.is_error()).count();
    info!(rows = 10, failed, "loaded table");

    let snapshot = table.new_scanner().read_mode(ReadMode::Snapshot).build()?;

    let mut update = table.new_update();
    update.row_mut().set("id", "3")?.set("name", "renamed")?;
    session.apply(update)?;
    let mut delete = table.new_delete();
    delete.row_mut().set("id", "5")?;
    session.apply(delete)?;
    session.close()?;

    let mut lower = table.new_row();
    lower.set("id", "3")?;
    let mut upper = table.new_row();
    upper.set("id", "7")?;
    let mut range = table
        .new_scanner()
        .lower_bound(lower)
        .exclusive_upper_bound(upper)
        .projected_columns(["id", "name"])
        .build()?;
    while range.has_more_rows() {
        for row in range.next_batch()? {
            info!(%row, "range [3, 7)");
        }
    }

    let busy = table
        .new_scanner()
        .add_predicate(Predicate::comparison("visits", ComparisonOp::GreaterEqual, 24i64))
        .build()?;
    for row in busy {
        let row = row?;
        info!(%row, "visits >= 24");
    }

    let before = snapshot.collect::<Result<Vec<_>>>()?.len();
    info!(rows = before, "rows visible in the earlier snapshot");

    let removed = table.compact_history();
    let stats = table.stats();
    info!(
        removed,
        live_rows = stats.live_rows,
        stored_versions = stats.stored_versions,
        last_seq_num = stats.last_seq_num,
        "compacted history"
    );
    Ok(())
}
