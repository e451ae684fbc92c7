use anyhow::{anyhow, Context, Result};
use chrono::{Local, TimeZone};
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;
use std::collections::BTreeMap;

use crate::lot::{Identity, SpotLabel};
use crate::pipeline::{EventSink, FrameReport, LotEvent};
use crate::Timestamp;

const EVENT_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Plates seeded by `lotwatch_admin init --demo`: `(plate, allowed)`.
pub const DEMO_PERMISSIONS: [(&str, bool); 5] = [
    ("EL 6666S", true),
    ("EL 2222S", true),
    ("EL 4444S", false),
    ("EL 5555S", true),
    ("EL 1111S", true),
];

/// Permission and occupancy store used by the lot pipeline.
pub trait PermissionStore {
    /// Unknown plates are not allowed.
    fn is_allowed(&mut self, plate: &str) -> Result<bool>;

    fn log_event(&mut self, kind: &str, description: &str, at: Timestamp) -> Result<()>;

    fn set_spot_occupant(&mut self, label: SpotLabel, plate: Option<&str>) -> Result<()>;
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct PermissionRecord {
    pub plate: String,
    pub allowed: bool,
    pub image_path: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct SpotOccupancy {
    pub label: String,
    pub plate: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct EventRecord {
    pub id: i64,
    pub kind: String,
    pub description: String,
    pub timestamp: String,
}

/// Local wall-clock rendering of a timestamp, second precision.
pub fn format_timestamp(at: Timestamp) -> String {
    let secs = at.as_secs_f64();
    let whole = secs.floor() as i64;
    let nanos = ((secs - secs.floor()) * 1e9) as u32;
    match Local.timestamp_opt(whole, nanos).earliest() {
        Some(dt) => dt.format(EVENT_TIME_FORMAT).to_string(),
        None => format!("{secs:.3}"),
    }
}

// -------------------- SQLite --------------------

pub struct SqlitePermissionStore {
    conn: Connection,
}

impl SqlitePermissionStore {
    pub fn open(db_path: &str) -> Result<Self> {
        let conn = Connection::open(db_path)
            .with_context(|| format!("failed to open database {}", db_path))?;
        let mut store = Self { conn };
        store.ensure_schema()?;
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self> {
        let mut store = Self {
            conn: Connection::open_in_memory()?,
        };
        store.ensure_schema()?;
        Ok(store)
    }

    pub fn ensure_schema(&mut self) -> Result<()> {
        self.conn.execute_batch(
            r#"
            PRAGMA foreign_keys = ON;

            CREATE TABLE IF NOT EXISTS car_permission (
              car_id INTEGER PRIMARY KEY AUTOINCREMENT,
              registration_number TEXT UNIQUE NOT NULL,
              allowance BOOLEAN NOT NULL CHECK (allowance IN (0, 1)),
              image_path TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS parking_status (
              parking_spot TEXT PRIMARY KEY,
              registration_number TEXT UNIQUE,
              FOREIGN KEY (registration_number) REFERENCES car_permission (registration_number)
            );

            CREATE TABLE IF NOT EXISTS events (
              event_id INTEGER PRIMARY KEY AUTOINCREMENT,
              event_type TEXT NOT NULL,
              description TEXT NOT NULL,
              timestamp TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_events_type ON events(event_type);
            "#,
        )?;
        Ok(())
    }

    /// Clear every occupant, e.g. left over from a previous run.
    pub fn reset_occupancy(&mut self) -> Result<usize> {
        let cleared = self.conn.execute(
            "UPDATE parking_status SET registration_number = NULL WHERE registration_number IS NOT NULL",
            [],
        )?;
        Ok(cleared)
    }

    /// Insert an empty row for each spot that has none yet.
    pub fn ensure_spots(&mut self, labels: impl IntoIterator<Item = SpotLabel>) -> Result<()> {
        let tx = self.conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT OR IGNORE INTO parking_status (parking_spot, registration_number) VALUES (?1, NULL)",
            )?;
            for label in labels {
                stmt.execute(params![label.to_string()])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    /// Insert or update a plate's permission.
    pub fn grant(&mut self, plate: &str, allowed: bool, image_path: &str) -> Result<()> {
        let plate = plate.trim();
        if plate.is_empty() {
            return Err(anyhow!("registration number must not be empty"));
        }
        self.conn.execute(
            "INSERT INTO car_permission (registration_number, allowance, image_path) VALUES (?1, ?2, ?3)
             ON CONFLICT(registration_number) DO UPDATE SET
               allowance = excluded.allowance,
               image_path = excluded.image_path",
            params![plate, allowed, image_path],
        )?;
        Ok(())
    }

    /// Mark a plate as not allowed. The row stays so occupancy history keeps
    /// its reference. Returns false if the plate was never registered.
    pub fn revoke(&mut self, plate: &str) -> Result<bool> {
        let changed = self.conn.execute(
            "UPDATE car_permission SET allowance = 0 WHERE registration_number = ?1",
            params![plate.trim()],
        )?;
        Ok(changed > 0)
    }

    pub fn permissions(&self) -> Result<Vec<PermissionRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT registration_number, allowance, image_path FROM car_permission ORDER BY registration_number",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(PermissionRecord {
                plate: row.get(0)?,
                allowed: row.get(1)?,
                image_path: row.get(2)?,
            })
        })?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    /// Plate to cropped-plate image path.
    pub fn plate_images(&self) -> Result<BTreeMap<String, String>> {
        Ok(self
            .permissions()?
            .into_iter()
            .map(|p| (p.plate, p.image_path))
            .collect())
    }

    pub fn spot_statuses(&self) -> Result<Vec<SpotOccupancy>> {
        let mut stmt = self.conn.prepare(
            "SELECT parking_spot, registration_number FROM parking_status ORDER BY parking_spot",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(SpotOccupancy {
                label: row.get(0)?,
                plate: row.get(1)?,
            })
        })?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    /// Most recent events first.
    pub fn recent_events(&self, limit: usize) -> Result<Vec<EventRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT event_id, event_type, description, timestamp FROM events
             ORDER BY event_id DESC LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![limit as i64], |row| {
            Ok(EventRecord {
                id: row.get(0)?,
                kind: row.get(1)?,
                description: row.get(2)?,
                timestamp: row.get(3)?,
            })
        })?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    fn is_registered(&self, plate: &str) -> Result<bool> {
        let found: Option<i64> = self
            .conn
            .query_row(
                "SELECT car_id FROM car_permission WHERE registration_number = ?1",
                params![plate],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }
}

impl PermissionStore for SqlitePermissionStore {
    fn is_allowed(&mut self, plate: &str) -> Result<bool> {
        let allowance: Option<bool> = self
            .conn
            .query_row(
                "SELECT allowance FROM car_permission WHERE registration_number = ?1",
                params![plate],
                |row| row.get(0),
            )
            .optional()?;
        Ok(allowance.unwrap_or(false))
    }

    fn log_event(&mut self, kind: &str, description: &str, at: Timestamp) -> Result<()> {
        self.conn.execute(
            "INSERT INTO events (event_type, description, timestamp) VALUES (?1, ?2, ?3)",
            params![kind, description, format_timestamp(at)],
        )?;
        Ok(())
    }

    fn set_spot_occupant(&mut self, label: SpotLabel, plate: Option<&str>) -> Result<()> {
        // parking_status references car_permission; unregistered plates are stored as NULL.
        let plate = match plate {
            Some(p) if !self.is_registered(p)? => {
                log::warn!("plate {} is not registered; spot {} stored without plate", p, label);
                None
            }
            other => other,
        };
        self.conn.execute(
            "INSERT INTO parking_status (parking_spot, registration_number) VALUES (?1, ?2)
             ON CONFLICT(parking_spot) DO UPDATE SET registration_number = excluded.registration_number",
            params![label.to_string(), plate],
        )?;
        Ok(())
    }
}

// -------------------- In-memory --------------------

#[derive(Debug, Default)]
pub struct InMemoryPermissionStore {
    permissions: BTreeMap<String, bool>,
    occupants: BTreeMap<SpotLabel, Option<String>>,
    events: Vec<EventRecord>,
}

impl InMemoryPermissionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_permission(mut self, plate: &str, allowed: bool) -> Self {
        self.permissions.insert(plate.to_string(), allowed);
        self
    }

    pub fn occupant(&self, label: SpotLabel) -> Option<&str> {
        self.occupants.get(&label).and_then(|p| p.as_deref())
    }

    pub fn events(&self) -> &[EventRecord] {
        &self.events
    }
}

impl PermissionStore for InMemoryPermissionStore {
    fn is_allowed(&mut self, plate: &str) -> Result<bool> {
        Ok(self.permissions.get(plate).copied().unwrap_or(false))
    }

    fn log_event(&mut self, kind: &str, description: &str, at: Timestamp) -> Result<()> {
        self.events.push(EventRecord {
            id: self.events.len() as i64 + 1,
            kind: kind.to_string(),
            description: description.to_string(),
            timestamp: format_timestamp(at),
        });
        Ok(())
    }

    fn set_spot_occupant(&mut self, label: SpotLabel, plate: Option<&str>) -> Result<()> {
        let plate = plate.filter(|p| self.permissions.contains_key(*p));
        self.occupants.insert(label, plate.map(str::to_string));
        Ok(())
    }
}

// -------------------- Sink --------------------

/// Writes lot events through a `PermissionStore`.
pub struct StoreSink<S: PermissionStore> {
    store: S,
}

impl<S: PermissionStore> StoreSink<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut S {
        &mut self.store
    }

    pub fn into_inner(self) -> S {
        self.store
    }

    fn persist(&mut self, event: &LotEvent, at: Timestamp) -> Result<()> {
        match event {
            LotEvent::SpotOccupied { label, identity } => {
                let plate = identity.plate();
                self.store.set_spot_occupant(*label, plate)?;
                self.store.log_event(
                    event.kind(),
                    &format!("spot {} occupied by {}", label, identity),
                    at,
                )?;
                let allowed = match plate {
                    Some(plate) => self.store.is_allowed(plate)?,
                    None => false,
                };
                if !allowed {
                    log::warn!("unauthorized vehicle {} in spot {}", identity, label);
                    self.store.log_event(
                        "unauthorized_vehicle",
                        &unauthorized_description(*label, identity),
                        at,
                    )?;
                }
            }
            LotEvent::SpotFreed { label, identity } => {
                self.store.set_spot_occupant(*label, None)?;
                self.store.log_event(
                    event.kind(),
                    &format!("spot {} freed by {}", label, identity),
                    at,
                )?;
            }
            LotEvent::GateOpened(kind) | LotEvent::GateClosed(kind) => {
                self.store.log_event(event.kind(), kind.as_str(), at)?;
            }
            LotEvent::CollisionFlagged(c) => {
                self.store.log_event(
                    event.kind(),
                    &format!("possible collision at ({}, {})", c.x, c.y),
                    at,
                )?;
            }
        }
        Ok(())
    }
}

fn unauthorized_description(label: SpotLabel, identity: &Identity) -> String {
    match identity {
        Identity::Plate(plate) => format!("{} parked in spot {} without permission", plate, label),
        Identity::Unknown => format!("unidentified vehicle parked in spot {}", label),
    }
}

impl<S: PermissionStore> EventSink for StoreSink<S> {
    /// Every event is attempted; the last failure is returned.
    fn apply(&mut self, report: &FrameReport) -> Result<()> {
        let mut failed = 0usize;
        let mut last_err = None;
        for event in &report.events {
            if let Err(e) = self.persist(event, report.snapshot.at) {
                log::warn!("failed to persist {}: {:#}", event.kind(), e);
                failed += 1;
                last_err = Some(e);
            }
        }
        match last_err {
            Some(e) => Err(e.context(format!(
                "{} of {} events not persisted",
                failed,
                report.events.len()
            ))),
            None => Ok(()),
        }
    }
}
