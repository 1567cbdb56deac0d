use anyhow::{Context, Result, bail};
use rusqlite::types::ValueRef;
use rusqlite::{Connection, Statement, params};
use serde_json::{Map, Number, Value};

pub const DEFAULT_CHUNK_SIZE: usize = 500;

/// Reads `table` in windows of `chunk_size` rows (rowid order) and hands every
/// non-empty window to `on_chunk`. A window shorter than `chunk_size` ends the
/// scan, so an empty trailing window never reaches the callback.
///
/// Returns how many windows were handed to the callback. Read and callback
/// errors abort the scan.
pub fn scan_in_chunks<F>(
    conn: &Connection,
    table: &str,
    chunk_size: usize,
    mut on_chunk: F,
) -> Result<usize>
where
    F: FnMut(Vec<Value>) -> Result<()>,
{
    if chunk_size == 0 {
        bail!("Chunk size for table {table} must be greater than zero");
    }

    let sql = format!("SELECT * FROM {table} ORDER BY rowid LIMIT ?1 OFFSET ?2");
    let mut statement = conn
        .prepare(&sql)
        .with_context(|| format!("Failed to prepare chunked scan of {table}"))?;

    let mut offset = 0_usize;
    let mut chunks = 0_usize;

    loop {
        let rows = read_chunk(&mut statement, chunk_size, offset)
            .with_context(|| format!("Failed to read {table} at offset {offset}"))?;
        let fetched = rows.len();

        if fetched > 0 {
            on_chunk(rows)?;
            chunks += 1;
        }

        if fetched < chunk_size {
            break;
        }

        offset += chunk_size;
    }

    Ok(chunks)
}

fn read_chunk(
    statement: &mut Statement<'_>,
    limit: usize,
    offset: usize,
) -> rusqlite::Result<Vec<Value>> {
    let columns = statement
        .column_names()
        .into_iter()
        .map(ToOwned::to_owned)
        .collect::<Vec<_>>();

    statement
        .query_map(params![limit as i64, offset as i64], |row| {
            let mut object = Map::with_capacity(columns.len());
            for (index, column) in columns.iter().enumerate() {
                object.insert(column.clone(), json_from_sql(row.get_ref(index)?));
            }
            Ok(Value::Object(object))
        })?
        .collect()
}

fn json_from_sql(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(number) => Value::from(number),
        ValueRef::Real(number) => Number::from_f64(number)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        ValueRef::Text(bytes) => Value::String(String::from_utf8_lossy(bytes).into_owned()),
        ValueRef::Blob(bytes) => Value::from(bytes.to_vec()),
    }
}
