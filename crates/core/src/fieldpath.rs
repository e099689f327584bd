//! Dotted field paths over loosely-typed documents.
//!
//! `FieldPath` parses `spec.resourceConfig.environmentProperties[0].propertyGroup` style
//! paths; `Paved` wraps a `serde_json::Value` and offers typed reads and writes along them.
//! A missing field yields `PathError::NotFound`, which callers map to a default; every
//! other failure is structural and must abort the caller.

use std::fmt;

use serde_json::{Map, Value as Json};
use smallvec::SmallVec;

use crate::PathError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Field(String),
    Index(usize),
}

/// Parsed field path. Most paths we touch are well under eight segments deep.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldPath {
    segments: SmallVec<[Segment; 8]>,
}

impl FieldPath {
    pub fn parse(path: &str) -> Result<Self, PathError> {
        let invalid = |reason: &str| PathError::InvalidPath { path: path.to_string(), reason: reason.to_string() };
        if path.is_empty() {
            return Err(invalid("empty path"));
        }
        let mut segments: SmallVec<[Segment; 8]> = SmallVec::new();
        let mut rest = path;
        let mut expect_field = true;
        while !rest.is_empty() {
            if let Some(after) = rest.strip_prefix('[') {
                let end = after.find(']').ok_or_else(|| invalid("unclosed '['"))?;
                let inner = &after[..end];
                if inner.is_empty() {
                    return Err(invalid("empty brackets"));
                }
                match inner.parse::<usize>() {
                    Ok(i) => segments.push(Segment::Index(i)),
                    Err(_) => segments.push(Segment::Field(inner.to_string())),
                }
                rest = &after[end + 1..];
                expect_field = false;
            } else if let Some(after) = rest.strip_prefix('.') {
                if expect_field {
                    return Err(invalid("empty segment"));
                }
                rest = after;
                expect_field = true;
                if rest.is_empty() {
                    return Err(invalid("trailing '.'"));
                }
            } else {
                if !expect_field {
                    return Err(invalid("expected '.' or '[' after ']'"));
                }
                let end = rest.find(|c: char| c == '.' || c == '[').unwrap_or(rest.len());
                segments.push(Segment::Field(rest[..end].to_string()));
                rest = &rest[end..];
                expect_field = false;
            }
        }
        Ok(Self { segments })
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        render_prefix(&self.segments, f)
    }
}

fn render_prefix(segments: &[Segment], f: &mut impl fmt::Write) -> fmt::Result {
    for (i, seg) in segments.iter().enumerate() {
        match seg {
            Segment::Field(name) if name.contains(['.', '[', ']']) => write!(f, "[{}]", name)?,
            Segment::Field(name) if i == 0 => write!(f, "{}", name)?,
            Segment::Field(name) => write!(f, ".{}", name)?,
            Segment::Index(idx) => write!(f, "[{}]", idx)?,
        }
    }
    Ok(())
}

fn prefix_string(segments: &[Segment]) -> String {
    if segments.is_empty() {
        return "<root>".to_string();
    }
    let mut s = String::new();
    let _ = render_prefix(segments, &mut s);
    s
}

/// Short name of a JSON value's shape, used in type mismatch errors.
pub fn shape_of(v: &Json) -> &'static str {
    match v {
        Json::Null => "null",
        Json::Bool(_) => "bool",
        Json::Number(_) => "number",
        Json::String(_) => "string",
        Json::Array(_) => "array",
        Json::Object(_) => "object",
    }
}

/// Integral view of a JSON number. Struct-encoded documents carry every number as a double.
pub fn as_integer(v: &Json) -> Option<i64> {
    if let Some(i) = v.as_i64() {
        return Some(i);
    }
    let f = v.as_f64()?;
    if f.fract() == 0.0 && f >= i64::MIN as f64 && f < i64::MAX as f64 {
        Some(f as i64)
    } else {
        None
    }
}

/// Read-only paved view over a document.
#[derive(Debug, Clone, Copy)]
pub struct Paved<'a> {
    root: &'a Json,
}

impl<'a> Paved<'a> {
    pub fn new(root: &'a Json) -> Self {
        Self { root }
    }

    /// Raw lookup. `null` leaves are returned as found; `null` intermediates are not-found.
    pub fn get(&self, path: &str) -> Result<&'a Json, PathError> {
        let fp = FieldPath::parse(path)?;
        lookup(self.root, &fp, path)
    }

    fn get_present(&self, path: &str) -> Result<Option<&'a Json>, PathError> {
        match self.get(path) {
            Ok(Json::Null) => Ok(None),
            Ok(v) => Ok(Some(v)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn typed<T>(
        &self,
        path: &str,
        expected: &'static str,
        conv: impl FnOnce(&'a Json) -> Option<T>,
    ) -> Result<Option<T>, PathError> {
        match self.get_present(path)? {
            None => Ok(None),
            Some(v) => conv(v).map(Some).ok_or_else(|| PathError::WrongType {
                path: path.to_string(),
                expected,
                found: shape_of(v),
            }),
        }
    }

    pub fn opt_string(&self, path: &str) -> Result<Option<&'a str>, PathError> {
        self.typed(path, "string", |v| v.as_str())
    }

    pub fn opt_bool(&self, path: &str) -> Result<Option<bool>, PathError> {
        self.typed(path, "bool", |v| v.as_bool())
    }

    pub fn opt_integer(&self, path: &str) -> Result<Option<i64>, PathError> {
        self.typed(path, "integer", as_integer)
    }

    pub fn opt_array(&self, path: &str) -> Result<Option<&'a Vec<Json>>, PathError> {
        self.typed(path, "array", |v| v.as_array())
    }

    pub fn opt_object(&self, path: &str) -> Result<Option<&'a Map<String, Json>>, PathError> {
        self.typed(path, "object", |v| v.as_object())
    }

    pub fn string_or(&self, path: &str, default: &str) -> Result<String, PathError> {
        Ok(self.opt_string(path)?.unwrap_or(default).to_string())
    }

    pub fn bool_or(&self, path: &str, default: bool) -> Result<bool, PathError> {
        Ok(self.opt_bool(path)?.unwrap_or(default))
    }

    pub fn integer_or(&self, path: &str, default: i64) -> Result<i64, PathError> {
        Ok(self.opt_integer(path)?.unwrap_or(default))
    }

    /// Array read where absence means empty; a present non-array is still an error.
    pub fn array_or_empty(&self, path: &str) -> Result<&'a [Json], PathError> {
        Ok(self.opt_array(path)?.map(|v| v.as_slice()).unwrap_or(&[]))
    }
}

fn lookup<'a>(root: &'a Json, fp: &FieldPath, raw: &str) -> Result<&'a Json, PathError> {
    let segs = fp.segments();
    let mut cur = root;
    for (i, seg) in segs.iter().enumerate() {
        if cur.is_null() {
            return Err(PathError::NotFound { path: raw.to_string() });
        }
        cur = match seg {
            Segment::Field(name) => match cur {
                Json::Object(map) => map.get(name).ok_or_else(|| PathError::NotFound { path: raw.to_string() })?,
                _ => return Err(PathError::NotAnObject { path: prefix_string(&segs[..i]) }),
            },
            Segment::Index(idx) => match cur {
                Json::Array(arr) => arr.get(*idx).ok_or_else(|| PathError::NotFound { path: raw.to_string() })?,
                _ => return Err(PathError::NotAnArray { path: prefix_string(&segs[..i]) }),
            },
        };
    }
    Ok(cur)
}

/// Mutable paved view. Writes create intermediate objects and arrays.
#[derive(Debug)]
pub struct PavedMut<'a> {
    root: &'a mut Json,
}

impl<'a> PavedMut<'a> {
    pub fn new(root: &'a mut Json) -> Self {
        Self { root }
    }

    pub fn set(&mut self, path: &str, value: Json) -> Result<(), PathError> {
        let fp = FieldPath::parse(path)?;
        let segs = fp.segments();
        let mut cur: &mut Json = self.root;
        for (i, seg) in segs.iter().enumerate() {
            let last = i + 1 == segs.len();
            match seg {
                Segment::Field(name) => {
                    if cur.is_null() {
                        *cur = Json::Object(Map::new());
                    }
                    let map = match cur {
                        Json::Object(map) => map,
                        _ => return Err(PathError::NotAnObject { path: prefix_string(&segs[..i]) }),
                    };
                    if last {
                        map.insert(name.clone(), value);
                        return Ok(());
                    }
                    cur = map.entry(name.clone()).or_insert(Json::Null);
                }
                Segment::Index(idx) => {
                    if cur.is_null() {
                        *cur = Json::Array(Vec::new());
                    }
                    let arr = match cur {
                        Json::Array(arr) => arr,
                        _ => return Err(PathError::NotAnArray { path: prefix_string(&segs[..i]) }),
                    };
                    if arr.len() <= *idx {
                        arr.resize(*idx + 1, Json::Null);
                    }
                    if last {
                        arr[*idx] = value;
                        return Ok(());
                    }
                    cur = &mut arr[*idx];
                }
            }
        }
        Ok(())
    }

    /// Remove the field at `path` if present. Only field segments may be deleted.
    pub fn delete(&mut self, path: &str) -> Result<(), PathError> {
        let fp = FieldPath::parse(path)?;
        let segs = fp.segments();
        let (leaf, parent) = match segs.split_last() {
            Some((Segment::Field(name), parent)) => (name, parent),
            _ => {
                return Err(PathError::InvalidPath { path: path.to_string(), reason: "last segment must be a field".into() })
            }
        };
        let mut cur: &mut Json = self.root;
        for (i, seg) in parent.iter().enumerate() {
            let next = match (seg, cur) {
                (_, Json::Null) => return Ok(()),
                (Segment::Field(name), Json::Object(map)) => map.get_mut(name),
                (Segment::Index(idx), Json::Array(arr)) => arr.get_mut(*idx),
                (Segment::Field(_), _) => return Err(PathError::NotAnObject { path: prefix_string(&segs[..i]) }),
                (Segment::Index(_), _) => return Err(PathError::NotAnArray { path: prefix_string(&segs[..i]) }),
            };
            match next {
                Some(v) => cur = v,
                None => return Ok(()),
            }
        }
        if let Json::Object(map) = cur {
            map.remove(leaf);
        }
        Ok(())
    }
}
