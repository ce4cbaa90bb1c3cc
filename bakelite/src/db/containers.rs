//! Container persistence (config + state as JSON blobs).

use super::{Database, db_err};
use crate::container::config::ContainerConfig;
use crate::runtime::types::{ContainerId, ContainerState};
use bakelite_shared::errors::{BakeliteError, BakeliteResult};
use rusqlite::OptionalExtension;

#[derive(Clone)]
pub struct ContainerStore {
    db: Database,
}

impl ContainerStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    fn encode<T: serde::Serialize>(value: &T) -> BakeliteResult<String> {
        serde_json::to_string(value)
            .map_err(|e| BakeliteError::Internal(format!("serializing container row: {e}")))
    }

    fn decode_row(config_json: &str, state_json: &str) -> BakeliteResult<(ContainerConfig, ContainerState)> {
        let config = serde_json::from_str(config_json)
            .map_err(|e| BakeliteError::Database(format!("decoding container config: {e}")))?;
        let state = serde_json::from_str(state_json)
            .map_err(|e| BakeliteError::Database(format!("decoding container state: {e}")))?;
        Ok((config, state))
    }

    /// Insert a new container row. Fails if the id or name already exists.
    pub fn save(&self, config: &ContainerConfig, state: &ContainerState) -> BakeliteResult<()> {
        let conn = self.db.conn();
        conn.execute(
            "INSERT INTO containers (id, name, image, status, config_json, state_json)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            rusqlite::params![
                config.id.as_str(),
                config.name,
                config.image,
                state.status.to_string(),
                Self::encode(config)?,
                Self::encode(state)?,
            ],
        )
        .map_err(|e| match e {
            rusqlite::Error::SqliteFailure(err, _)
                if err.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                BakeliteError::InvalidState(format!(
                    "container id or name already in use: {}",
                    config.id
                ))
            }
            other => BakeliteError::Database(other.to_string()),
        })?;
        Ok(())
    }

    /// Replace the mutable state of an existing container.
    pub fn update_state(&self, id: &ContainerId, state: &ContainerState) -> BakeliteResult<()> {
        let conn = self.db.conn();
        let changed = db_err!(conn.execute(
            "UPDATE containers SET status = ?2, state_json = ?3 WHERE id = ?1",
            rusqlite::params![id.as_str(), state.status.to_string(), Self::encode(state)?],
        ))?;
        if changed == 0 {
            return Err(BakeliteError::NotFound(id.to_string()));
        }
        Ok(())
    }

    pub fn get(&self, id: &ContainerId) -> BakeliteResult<Option<(ContainerConfig, ContainerState)>> {
        let conn = self.db.conn();
        let row: Option<(String, String)> = db_err!(
            conn.query_row(
                "SELECT config_json, state_json FROM containers WHERE id = ?1",
                [id.as_str()],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()
        )?;
        row.map(|(c, s)| Self::decode_row(&c, &s)).transpose()
    }

    /// Resolve a user-supplied identifier: exact id, unique id prefix, or
    /// exact name.
    pub fn resolve(&self, needle: &str) -> BakeliteResult<Option<ContainerId>> {
        let conn = self.db.conn();
        let mut stmt = db_err!(conn.prepare(
            "SELECT id FROM containers WHERE id = ?1 OR name = ?1 OR id LIKE ?2"
        ))?;
        let pattern = format!("{}%", needle.replace(['%', '_'], ""));
        let rows = db_err!(stmt.query_map(rusqlite::params![needle, pattern], |row| {
            row.get::<_, String>(0)
        }))?;

        let mut ids: Vec<String> = Vec::new();
        for row in rows {
            let id = db_err!(row)?;
            if !ids.contains(&id) {
                ids.push(id);
            }
        }
        match ids.len() {
            0 => Ok(None),
            1 => Ok(Some(ContainerId::from_string(ids.remove(0)))),
            _ => Err(BakeliteError::InvalidState(format!(
                "ambiguous container identifier: {needle}"
            ))),
        }
    }

    pub fn list(&self) -> BakeliteResult<Vec<(ContainerConfig, ContainerState)>> {
        let conn = self.db.conn();
        let mut stmt = db_err!(conn.prepare(
            "SELECT config_json, state_json FROM containers ORDER BY id DESC"
        ))?;
        let rows = db_err!(stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        }))?;

        let mut out = Vec::new();
        for row in rows {
            let (c, s) = db_err!(row)?;
            out.push(Self::decode_row(&c, &s)?);
        }
        Ok(out)
    }

    pub fn remove(&self, id: &ContainerId) -> BakeliteResult<()> {
        let conn = self.db.conn();
        let changed = db_err!(conn.execute(
            "DELETE FROM containers WHERE id = ?1",
            [id.as_str()]
        ))?;
        if changed == 0 {
            return Err(BakeliteError::NotFound(id.to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use tempfile::TempDir;

    fn store() -> (TempDir, ContainerStore) {
        let temp = TempDir::new().unwrap();
        let db = Database::open(&temp.path().join("test.db")).unwrap();
        (temp, ContainerStore::new(db))
    }

    fn sample(name: Option<&str>) -> (ContainerConfig, ContainerState) {
        let id = ContainerId::new();
        let config = ContainerConfig {
            id: id.clone(),
            name: name.map(str::to_string),
            image: "ragserver".into(),
            created_at: Utc::now(),
            env: vec!["PYTHONUNBUFFERED=1".into()],
            workdir: "/app".into(),
            command: vec!["uvicorn".into(), "app.main:app".into()],
            declared_port: 8000,
            storage_paths: vec!["/app/uploads".into()],
            container_home: std::path::PathBuf::from("/tmp/containers").join(id.as_str()),
        };
        (config, ContainerState::new())
    }

    #[test]
    fn save_get_update_roundtrip() {
        let (_temp, store) = store();
        let (config, state) = sample(Some("web"));
        store.save(&config, &state).unwrap();

        let (loaded, loaded_state) = store.get(&config.id).unwrap().unwrap();
        assert_eq!(loaded.declared_port, 8000);
        assert_eq!(loaded_state.status, crate::runtime::types::ContainerStatus::Created);

        let mut state = loaded_state;
        state.mark_exited(1);
        store.update_state(&config.id, &state).unwrap();
        let (_, reloaded) = store.get(&config.id).unwrap().unwrap();
        assert_eq!(reloaded.exit_code, Some(1));
    }

    #[test]
    fn duplicate_name_is_rejected() {
        let (_temp, store) = store();
        let (a, state_a) = sample(Some("web"));
        let (b, state_b) = sample(Some("web"));
        store.save(&a, &state_a).unwrap();
        assert!(store.save(&b, &state_b).is_err());
    }

    #[test]
    fn resolve_by_name_and_prefix() {
        let (_temp, store) = store();
        let (config, state) = sample(Some("web"));
        store.save(&config, &state).unwrap();

        assert_eq!(
            store.resolve("web").unwrap().unwrap().as_str(),
            config.id.as_str()
        );
        let prefix = &config.id.as_str()[..10];
        assert_eq!(
            store.resolve(prefix).unwrap().unwrap().as_str(),
            config.id.as_str()
        );
        assert!(store.resolve("nope").unwrap().is_none());
    }
}
