//! Zone persistence.
//!
//! Zones are owned by a user and read fresh on every analysed frame, so edits
//! made while a session runs take effect on the next step.

use anyhow::{anyhow, Context, Result};
use rand::RngCore;
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use std::sync::{Mutex, MutexGuard};

use crate::error::{AnalysisError, AnalysisResult};
use crate::geometry::NormalizedPoint;

/// A named polygon in normalized (0..=1000) coordinates.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Zone {
    pub id: String,
    pub name: String,
    #[serde(alias = "coordinates")]
    pub points: Vec<NormalizedPoint>,
}

/// A zone as submitted for creation, before validation and id assignment.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct ZoneDraft {
    #[serde(default)]
    pub name: String,
    #[serde(default, alias = "coordinates")]
    pub points: Vec<NormalizedPoint>,
}

impl ZoneDraft {
    pub fn new(name: impl Into<String>, points: Vec<NormalizedPoint>) -> Self {
        Self {
            name: name.into(),
            points,
        }
    }

    /// Check the draft and assign a fresh id.
    ///
    /// Polygons with one or two points are accepted; they simply never contain
    /// anything.
    pub fn into_zone(self) -> AnalysisResult<Zone> {
        let name = self.name.trim();
        if name.is_empty() {
            return Err(AnalysisError::ZoneValidation("name is required".into()));
        }
        if self.points.is_empty() {
            return Err(AnalysisError::ZoneValidation(
                "at least one point is required".into(),
            ));
        }
        if let Some(index) = self
            .points
            .iter()
            .position(|p| !p.x.is_finite() || !p.y.is_finite())
        {
            return Err(AnalysisError::ZoneValidation(format!(
                "point {} has a non-finite coordinate",
                index
            )));
        }
        Ok(Zone {
            id: new_zone_id(),
            name: name.to_string(),
            points: self.points,
        })
    }
}

fn new_zone_id() -> String {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

pub trait ZoneStore: Send + Sync {
    /// Zones for `user`, in creation order.
    fn list_zones(&self, user: &str) -> AnalysisResult<Vec<Zone>>;

    fn create_zone(&self, user: &str, draft: ZoneDraft) -> AnalysisResult<Zone>;

    fn delete_zone(&self, user: &str, zone_id: &str) -> AnalysisResult<()>;
}

pub struct SqliteZoneStore {
    conn: Mutex<Connection>,
}

impl SqliteZoneStore {
    pub fn open(db_path: &str) -> Result<Self> {
        let conn = Connection::open(db_path)
            .with_context(|| format!("open zone database {}", db_path))?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.ensure_schema()?;
        Ok(store)
    }

    fn ensure_schema(&self) -> Result<()> {
        self.lock()?.execute_batch(
            r#"
            PRAGMA journal_mode=WAL;

            CREATE TABLE IF NOT EXISTS zones (
              id TEXT PRIMARY KEY,
              user_id TEXT NOT NULL,
              name TEXT NOT NULL,
              points_json TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_zones_user ON zones(user_id);
            "#,
        )?;
        Ok(())
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow!("zone database lock poisoned"))
    }

    fn query_zones(&self, user: &str) -> Result<Vec<Zone>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT id, name, points_json FROM zones WHERE user_id = ?1 ORDER BY rowid ASC",
        )?;
        let mut rows = stmt.query(params![user])?;
        let mut zones = Vec::new();
        while let Some(row) = rows.next()? {
            let id: String = row.get(0)?;
            let points_json: String = row.get(2)?;
            let points = serde_json::from_str(&points_json)
                .with_context(|| format!("corrupt points for zone {}", id))?;
            zones.push(Zone {
                id,
                name: row.get(1)?,
                points,
            });
        }
        Ok(zones)
    }

    fn insert_zone(&self, user: &str, zone: &Zone) -> Result<()> {
        let points_json = serde_json::to_string(&zone.points)?;
        self.lock()?.execute(
            "INSERT INTO zones(id, user_id, name, points_json) VALUES (?1, ?2, ?3, ?4)",
            params![zone.id, user, zone.name, points_json],
        )?;
        Ok(())
    }

    fn remove_zone(&self, user: &str, zone_id: &str) -> Result<usize> {
        let removed = self.lock()?.execute(
            "DELETE FROM zones WHERE id = ?1 AND user_id = ?2",
            params![zone_id, user],
        )?;
        Ok(removed)
    }
}

impl ZoneStore for SqliteZoneStore {
    fn list_zones(&self, user: &str) -> AnalysisResult<Vec<Zone>> {
        self.query_zones(user)
            .map_err(|e| AnalysisError::storage("list zones", e))
    }

    fn create_zone(&self, user: &str, draft: ZoneDraft) -> AnalysisResult<Zone> {
        let zone = draft.into_zone()?;
        self.insert_zone(user, &zone)
            .map_err(|e| AnalysisError::storage("create zone", e))?;
        log::info!("user {} created zone {} ({})", user, zone.id, zone.name);
        Ok(zone)
    }

    fn delete_zone(&self, user: &str, zone_id: &str) -> AnalysisResult<()> {
        let removed = self
            .remove_zone(user, zone_id)
            .map_err(|e| AnalysisError::storage("delete zone", e))?;
        if removed == 0 {
            return Err(AnalysisError::ZoneNotFound {
                zone_id: zone_id.to_string(),
            });
        }
        log::info!("user {} deleted zone {}", user, zone_id);
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct InMemoryZoneStore {
    zones: Mutex<Vec<(String, Zone)>>,
}

impl InMemoryZoneStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self, op: &'static str) -> AnalysisResult<MutexGuard<'_, Vec<(String, Zone)>>> {
        self.zones
            .lock()
            .map_err(|_| AnalysisError::storage(op, anyhow!("zone list lock poisoned")))
    }
}

impl ZoneStore for InMemoryZoneStore {
    fn list_zones(&self, user: &str) -> AnalysisResult<Vec<Zone>> {
        Ok(self
            .lock("list zones")?
            .iter()
            .filter(|(owner, _)| owner == user)
            .map(|(_, zone)| zone.clone())
            .collect())
    }

    fn create_zone(&self, user: &str, draft: ZoneDraft) -> AnalysisResult<Zone> {
        let zone = draft.into_zone()?;
        self.lock("create zone")?
            .push((user.to_string(), zone.clone()));
        Ok(zone)
    }

    fn delete_zone(&self, user: &str, zone_id: &str) -> AnalysisResult<()> {
        let mut zones = self.lock("delete zone")?;
        let before = zones.len();
        zones.retain(|(owner, zone)| !(owner == user && zone.id == zone_id));
        if zones.len() == before {
            return Err(AnalysisError::ZoneNotFound {
                zone_id: zone_id.to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn square() -> Vec<NormalizedPoint> {
        vec![
            NormalizedPoint::new(0.0, 0.0),
            NormalizedPoint::new(500.0, 0.0),
            NormalizedPoint::new(500.0, 500.0),
            NormalizedPoint::new(0.0, 500.0),
        ]
    }

    fn exercise(store: &dyn ZoneStore) {
        let a = store
            .create_zone("alice", ZoneDraft::new("door", square()))
            .expect("create door");
        let b = store
            .create_zone("alice", ZoneDraft::new("  till ", square()))
            .expect("create till");
        store
            .create_zone("bob", ZoneDraft::new("bob's", square()))
            .expect("create other user");

        assert_ne!(a.id, b.id);
        assert_eq!(a.id.len(), 32);
        assert_eq!(b.name, "till");

        let listed = store.list_zones("alice").expect("list");
        assert_eq!(listed, vec![a.clone(), b.clone()]);

        let err = store.delete_zone("bob", &a.id).expect_err("wrong owner");
        assert_eq!(err.status_code(), 404);

        store.delete_zone("alice", &a.id).expect("delete");
        assert_eq!(store.list_zones("alice").expect("list"), vec![b]);
        assert!(matches!(
            store.delete_zone("alice", &a.id),
            Err(AnalysisError::ZoneNotFound { .. })
        ));
    }

    #[test]
    fn in_memory_store_scopes_zones_by_user() {
        exercise(&InMemoryZoneStore::new());
    }

    #[test]
    fn sqlite_store_scopes_zones_by_user() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("zones.db");
        let store = SqliteZoneStore::open(path.to_str().expect("utf-8 path")).expect("open");
        exercise(&store);
    }

    #[test]
    fn sqlite_store_survives_reopen() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("zones.db");
        let path = path.to_str().expect("utf-8 path");
        let zone = SqliteZoneStore::open(path)
            .expect("open")
            .create_zone("alice", ZoneDraft::new("door", square()))
            .expect("create");
        let reopened = SqliteZoneStore::open(path).expect("reopen");
        assert_eq!(reopened.list_zones("alice").expect("list"), vec![zone]);
    }

    #[test]
    fn drafts_are_validated() {
        let missing_name = ZoneDraft::new("   ", square()).into_zone();
        assert!(matches!(missing_name, Err(AnalysisError::ZoneValidation(_))));

        let no_points = ZoneDraft::new("door", Vec::new()).into_zone();
        assert!(matches!(no_points, Err(AnalysisError::ZoneValidation(_))));

        let nan = ZoneDraft::new("door", vec![NormalizedPoint::new(f64::NAN, 1.0)]).into_zone();
        assert!(matches!(nan, Err(AnalysisError::ZoneValidation(_))));

        let line = ZoneDraft::new("line", square()[..2].to_vec()).into_zone();
        assert!(line.is_ok());
    }

    #[test]
    fn draft_accepts_coordinates_key() {
        let draft: ZoneDraft = serde_json::from_str(
            r#"{"name":"door","coordinates":[{"x":1,"y":2},{"x":3,"y":4},{"x":5,"y":0}]}"#,
        )
        .expect("parse");
        assert_eq!(draft.points.len(), 3);
        assert_eq!(draft.points[0], NormalizedPoint::new(1.0, 2.0));
    }
}
