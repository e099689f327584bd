//! Durable state for a stateless renderer.
//!
//! The only memory that survives between invocations is a reserved sub-tree of the
//! composite's status. `StatusStore` hides where that lives so the activation watchdog
//! can be exercised against `MemoryStatusStore` without building documents.

use std::collections::BTreeMap;

use serde_json::Value as Json;

use crate::fieldpath::{as_integer, shape_of, PavedMut};
use crate::PathError;

/// Status sub-tree holding the activation workaround bookkeeping.
pub const WORKAROUND_STATUS_PATH: &str = "status.wa1419";

pub const KEY_REQ_COUNTER: &str = "reqCounter";
pub const KEY_READY_AT: &str = "readyAt";
pub const KEY_START_APPLICATION: &str = "startApplication";

/// Flat key/value view over persisted status.
pub trait StatusStore {
    fn get(&self, key: &str) -> Result<Option<Json>, PathError>;
    fn put(&mut self, key: &str, value: Json) -> Result<(), PathError>;
}

/// Store backed by a field path inside the composite document.
pub struct CompositeStatusStore<'a> {
    composite: &'a mut Json,
    base: String,
}

impl<'a> CompositeStatusStore<'a> {
    pub fn new(composite: &'a mut Json) -> Self {
        Self::at(composite, WORKAROUND_STATUS_PATH)
    }

    pub fn at(composite: &'a mut Json, base: &str) -> Self {
        Self { composite, base: base.to_string() }
    }

    fn path(&self, key: &str) -> String {
        format!("{}.{}", self.base, key)
    }
}

impl StatusStore for CompositeStatusStore<'_> {
    fn get(&self, key: &str) -> Result<Option<Json>, PathError> {
        let paved = crate::Paved::new(&*self.composite);
        match paved.get(&self.path(key)) {
            Ok(Json::Null) => Ok(None),
            Ok(v) => Ok(Some(v.clone())),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn put(&mut self, key: &str, value: Json) -> Result<(), PathError> {
        let path = self.path(key);
        PavedMut::new(&mut *self.composite).set(&path, value)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MemoryStatusStore {
    entries: BTreeMap<String, Json>,
}

impl MemoryStatusStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StatusStore for MemoryStatusStore {
    fn get(&self, key: &str) -> Result<Option<Json>, PathError> {
        Ok(self.entries.get(key).filter(|v| !v.is_null()).cloned())
    }

    fn put(&mut self, key: &str, value: Json) -> Result<(), PathError> {
        self.entries.insert(key.to_string(), value);
        Ok(())
    }
}

/// Typed snapshot of the workaround bookkeeping.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Checkpoint {
    pub req_counter: i64,
    /// Epoch millis of the first observed readiness; 0 until then.
    pub ready_at: i64,
    pub start_application: bool,
}

impl Checkpoint {
    pub fn load(store: &dyn StatusStore) -> Result<Self, PathError> {
        let int = |key: &str| -> Result<i64, PathError> {
            match store.get(key)? {
                None => Ok(0),
                Some(v) => match as_integer(&v) {
                    Some(n) if n >= 0 => Ok(n),
                    Some(_) => Err(PathError::WrongType {
                        path: key.to_string(),
                        expected: "non-negative integer",
                        found: "negative integer",
                    }),
                    None => Err(PathError::WrongType { path: key.to_string(), expected: "integer", found: shape_of(&v) }),
                },
            }
        };
        let start_application = match store.get(KEY_START_APPLICATION)? {
            None => false,
            Some(Json::Bool(b)) => b,
            Some(v) => {
                return Err(PathError::WrongType {
                    path: KEY_START_APPLICATION.to_string(),
                    expected: "bool",
                    found: shape_of(&v),
                })
            }
        };
        Ok(Self { req_counter: int(KEY_REQ_COUNTER)?, ready_at: int(KEY_READY_AT)?, start_application })
    }

    /// Persist all fields. `ready_at` is never written back as zero over a recorded value.
    pub fn save(&self, store: &mut dyn StatusStore) -> Result<(), PathError> {
        store.put(KEY_REQ_COUNTER, Json::from(self.req_counter))?;
        if self.ready_at > 0 {
            store.put(KEY_READY_AT, Json::from(self.ready_at))?;
        }
        store.put(KEY_START_APPLICATION, Json::Bool(self.start_application))
    }
}

/// Wall clock in epoch milliseconds.
pub trait Clock {
    fn now_millis(&self) -> i64;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> i64 {
        chrono::Utc::now().timestamp_millis()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedClock(pub i64);

impl Clock for FixedClock {
    fn now_millis(&self) -> i64 {
        self.0
    }
}
