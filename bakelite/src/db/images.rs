//! Image and layer-index persistence.

use super::{Database, db_err};
use crate::store::{ImageRecord, LayerRecord};
use bakelite_shared::errors::{BakeliteError, BakeliteResult};
use chrono::Utc;
use rusqlite::OptionalExtension;

/// Database access for image records and the layer cache-key index.
#[derive(Clone)]
pub struct ImageRecords {
    db: Database,
}

impl ImageRecords {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Save or replace an image record. Rebuilding under the same reference
    /// replaces the previous record; its blobs stay in the store.
    pub fn save(&self, record: &ImageRecord) -> BakeliteResult<()> {
        let json = serde_json::to_string(record)
            .map_err(|e| BakeliteError::Internal(format!("serializing image record: {e}")))?;
        let conn = self.db.conn();
        db_err!(conn.execute(
            "INSERT INTO images (id, reference, created_at, record_json)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(reference) DO UPDATE SET
                 id = excluded.id,
                 created_at = excluded.created_at,
                 record_json = excluded.record_json",
            rusqlite::params![
                record.id,
                record.reference,
                record.created_at.to_rfc3339(),
                json
            ],
        ))?;
        Ok(())
    }

    pub fn get(&self, reference: &str) -> BakeliteResult<Option<ImageRecord>> {
        let conn = self.db.conn();
        let json: Option<String> = db_err!(
            conn.query_row(
                "SELECT record_json FROM images WHERE reference = ?1",
                [reference],
                |row| row.get(0),
            )
            .optional()
        )?;
        json.map(|j| {
            serde_json::from_str(&j)
                .map_err(|e| BakeliteError::Database(format!("decoding image record: {e}")))
        })
        .transpose()
    }

    pub fn list(&self) -> BakeliteResult<Vec<ImageRecord>> {
        let conn = self.db.conn();
        let mut stmt = db_err!(
            conn.prepare("SELECT record_json FROM images ORDER BY created_at DESC")
        )?;
        let rows = db_err!(stmt.query_map([], |row| row.get::<_, String>(0)))?;

        let mut records = Vec::new();
        for row in rows {
            let json = db_err!(row)?;
            records.push(
                serde_json::from_str(&json)
                    .map_err(|e| BakeliteError::Database(format!("decoding image record: {e}")))?,
            );
        }
        Ok(records)
    }

    pub fn remove(&self, reference: &str) -> BakeliteResult<()> {
        let conn = self.db.conn();
        let changed = db_err!(conn.execute("DELETE FROM images WHERE reference = ?1", [reference]))?;
        if changed == 0 {
            return Err(BakeliteError::NotFound(reference.to_string()));
        }
        Ok(())
    }

    pub fn record_layer(&self, layer: &LayerRecord) -> BakeliteResult<()> {
        let conn = self.db.conn();
        db_err!(conn.execute(
            "INSERT OR REPLACE INTO layers (cache_key, digest, size, stage, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            rusqlite::params![
                layer.cache_key,
                layer.digest,
                layer.size as i64,
                layer.stage,
                Utc::now().to_rfc3339()
            ],
        ))?;
        Ok(())
    }

    pub fn lookup_layer(&self, cache_key: &str) -> BakeliteResult<Option<LayerRecord>> {
        let conn = self.db.conn();
        db_err!(
            conn.query_row(
                "SELECT digest, size, stage FROM layers WHERE cache_key = ?1",
                [cache_key],
                |row| {
                    Ok(LayerRecord {
                        cache_key: cache_key.to_string(),
                        digest: row.get(0)?,
                        size: row.get::<_, i64>(1)? as u64,
                        stage: row.get(2)?,
                    })
                },
            )
            .optional()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn records() -> (TempDir, ImageRecords) {
        let temp = TempDir::new().unwrap();
        let db = Database::open(&temp.path().join("test.db")).unwrap();
        (temp, ImageRecords::new(db))
    }

    fn sample(reference: &str) -> ImageRecord {
        ImageRecord {
            id: "01hq3k5v8w".into(),
            reference: reference.into(),
            created_at: Utc::now(),
            base: Some("docker.io/library/python:3.12-slim".into()),
            layers: vec![LayerRecord {
                digest: "d".repeat(64),
                cache_key: "k".repeat(64),
                size: 128,
                stage: "dependencies".into(),
            }],
            config_digest: "c".repeat(64),
            storage_paths: vec!["/app/uploads".into(), "/app/chroma_db".into()],
        }
    }

    #[test]
    fn save_get_roundtrip() {
        let (_temp, records) = records();
        records.save(&sample("ragserver")).unwrap();

        let loaded = records.get("ragserver").unwrap().unwrap();
        assert_eq!(loaded.layers.len(), 1);
        assert_eq!(loaded.storage_paths.len(), 2);
        assert!(records.get("missing").unwrap().is_none());
    }

    #[test]
    fn save_replaces_same_reference() {
        let (_temp, records) = records();
        records.save(&sample("ragserver")).unwrap();
        let mut second = sample("ragserver");
        second.id = "01hq3k5v8x".into();
        records.save(&second).unwrap();

        let all = records.list().unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].id, "01hq3k5v8x");
    }

    #[test]
    fn layer_index_roundtrip() {
        let (_temp, records) = records();
        let layer = LayerRecord {
            digest: "d".repeat(64),
            cache_key: "key".into(),
            size: 42,
            stage: "workspace".into(),
        };
        records.record_layer(&layer).unwrap();

        let hit = records.lookup_layer("key").unwrap().unwrap();
        assert_eq!(hit.digest, layer.digest);
        assert_eq!(hit.size, 42);
        assert!(records.lookup_layer("other").unwrap().is_none());
    }
}
