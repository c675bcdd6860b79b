use std::collections::HashMap;
use std::path::Path;

use parking_lot::Mutex;
use qw_core::PatternRecord;
use rusqlite::{Connection, params};

use crate::backend::SnapshotBackend;
use crate::error::Result;
use crate::schema;

/// Snapshot stored in SQLite, one row per pattern plus its ordered sources.
pub struct SqliteBackend {
    conn: Mutex<Connection>,
    label: String,
}

impl SqliteBackend {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        schema::initialize(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            label: path.display().to_string(),
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        schema::initialize(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            label: ":memory:".to_string(),
        })
    }
}

impl SnapshotBackend for SqliteBackend {
    fn load(&self) -> Result<Vec<PatternRecord>> {
        let conn = self.conn.lock();

        let mut sources: HashMap<String, Vec<String>> = HashMap::new();
        {
            let mut stmt = conn.prepare(
                "SELECT pattern_id, source_id FROM pattern_sources
                 ORDER BY pattern_id, position",
            )?;
            let rows = stmt.query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })?;
            for row in rows {
                let (pattern_id, source_id) = row?;
                sources.entry(pattern_id).or_default().push(source_id);
            }
        }

        let mut stmt = conn.prepare(
            "SELECT id, w, x, y, z, frequency, amplitude, phase, depth, created_at, updated_at
             FROM patterns ORDER BY rowid",
        )?;
        let records = stmt
            .query_map([], |row| {
                Ok(PatternRecord {
                    id: row.get(0)?,
                    w: row.get(1)?,
                    x: row.get(2)?,
                    y: row.get(3)?,
                    z: row.get(4)?,
                    frequency: row.get(5)?,
                    amplitude: row.get(6)?,
                    phase: row.get(7)?,
                    depth: row.get(8)?,
                    sources: Vec::new(),
                    created_at: row.get(9)?,
                    updated_at: row.get(10)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(records
            .into_iter()
            .map(|mut rec| {
                rec.sources = sources.remove(&rec.id).unwrap_or_default();
                rec
            })
            .collect())
    }

    fn save(&self, records: &[PatternRecord]) -> Result<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;

        tx.execute_batch("DELETE FROM pattern_sources; DELETE FROM patterns;")?;
        {
            let mut insert_pattern = tx.prepare(
                "INSERT INTO patterns
                 (id, w, x, y, z, frequency, amplitude, phase, depth, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            )?;
            let mut insert_source = tx.prepare(
                "INSERT INTO pattern_sources (pattern_id, position, source_id) VALUES (?1, ?2, ?3)",
            )?;
            for rec in records {
                insert_pattern.execute(params![
                    rec.id,
                    rec.w,
                    rec.x,
                    rec.y,
                    rec.z,
                    rec.frequency,
                    rec.amplitude,
                    rec.phase,
                    rec.depth,
                    rec.created_at,
                    rec.updated_at,
                ])?;
                for (position, source) in rec.sources.iter().enumerate() {
                    insert_source.execute(params![rec.id, position as i64, source])?;
                }
            }
        }
        tx.commit()?;
        Ok(())
    }

    fn describe(&self) -> String {
        format!("sqlite:{}", self.label)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use qw_core::{WaveCodec, WavePattern, fuse};
    use rand::rngs::SmallRng;
    use rand::{Rng, SeedableRng};
    use tempfile::TempDir;

    fn rng() -> SmallRng {
        SmallRng::seed_from_u64(42)
    }

    fn make_pattern(rng: &mut SmallRng, source: &str) -> WavePattern {
        let values: Vec<f64> = (0..32).map(|_| rng.random_range(-1.0..1.0)).collect();
        WavePattern::from_components(WaveCodec::encode_slice(&values).unwrap(), source, 1_000)
    }

    fn make_records() -> Vec<PatternRecord> {
        let mut rng = rng();
        let a = make_pattern(&mut rng, "doc-a");
        let b = make_pattern(&mut rng, "doc-b");
        let fused = fuse(&a, &b, 2_000).unwrap();
        let c = make_pattern(&mut rng, "doc-c");
        vec![
            PatternRecord::from_pattern(&fused),
            PatternRecord::from_pattern(&c),
        ]
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let backend = SqliteBackend::open_in_memory().unwrap();
        let records = make_records();
        backend.save(&records).unwrap();

        let loaded = backend.load().unwrap();
        assert_eq!(loaded, records);
        assert_eq!(loaded[0].sources, vec!["doc-a", "doc-b"]);
        assert_eq!(loaded[0].depth, 1);
    }

    #[test]
    fn test_quaternion_precision_roundtrip() {
        let backend = SqliteBackend::open_in_memory().unwrap();
        let records = make_records();
        backend.save(&records).unwrap();
        let loaded = backend.load().unwrap();
        for (a, b) in records.iter().zip(&loaded) {
            assert_eq!([a.w, a.x, a.y, a.z], [b.w, b.x, b.y, b.z]);
            assert_eq!(a.phase, b.phase);
        }
    }

    #[test]
    fn test_save_overwrites_previous() {
        let backend = SqliteBackend::open_in_memory().unwrap();
        backend.save(&make_records()).unwrap();
        backend.save(&make_records()[1..]).unwrap();
        assert_eq!(backend.load().unwrap().len(), 1);
    }

    #[test]
    fn test_load_empty_db() {
        let backend = SqliteBackend::open_in_memory().unwrap();
        assert!(backend.load().unwrap().is_empty());
    }

    #[test]
    fn test_failed_save_keeps_previous_snapshot() {
        let backend = SqliteBackend::open_in_memory().unwrap();
        let records = make_records();
        backend.save(&records).unwrap();

        let mut dup = records.clone();
        dup.push(records[0].clone());
        assert!(backend.save(&dup).is_err());
        assert_eq!(backend.load().unwrap(), records);
    }

    #[test]
    fn test_newer_schema_is_refused() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("future.db");
        {
            let conn = Connection::open(&path).unwrap();
            schema::initialize(&conn).unwrap();
            conn.execute(
                "UPDATE metadata SET value = ?1 WHERE key = 'schema_version'",
                [(schema::SCHEMA_VERSION + 1).to_string()],
            )
            .unwrap();
        }
        assert!(matches!(
            SqliteBackend::open(&path),
            Err(crate::error::StoreError::Persistence(_))
        ));
    }

    #[test]
    fn test_file_persists_across_open() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("p.db");
        let records = make_records();
        SqliteBackend::open(&path).unwrap().save(&records).unwrap();

        let reopened = SqliteBackend::open(&path).unwrap();
        assert_eq!(reopened.load().unwrap(), records);
        assert!(reopened.describe().ends_with("p.db"));
    }
}
