//! Normalized header shared by every format adapter.
//!
//! Adapters decode their own on-disk layout into a [`Header`] and encode a
//! [`Header`] back on create.  Numeric fields live in a key → value map;
//! a key that was never set reads as 0.

use serde::Serialize;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HeaderKey {
    NbFibers,
    NbScalarsPerPoint,
    NbPropertiesPerTract,
    DataOffset,
    Version,
    NbPoints,
}

/// Volume metadata carried by TRK headers.  Never used to transform points.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct VolumeGeometry {
    pub dim:        [i16; 3],
    pub voxel_size: [f32; 3],
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Header {
    fields:       BTreeMap<HeaderKey, i64>,
    pub geometry: Option<VolumeGeometry>,
}

impl Header {
    pub fn new() -> Self {
        Self::default()
    }

    /// Header for a destination that will receive `nb_fibers` streamlines.
    pub fn with_fibers(nb_fibers: u64) -> Self {
        let mut h = Self::new();
        h.set(HeaderKey::NbFibers, nb_fibers as i64);
        h
    }

    pub fn get(&self, key: HeaderKey) -> i64 {
        self.fields.get(&key).copied().unwrap_or(0)
    }

    pub fn set(&mut self, key: HeaderKey, value: i64) {
        self.fields.insert(key, value);
    }

    pub fn nb_fibers(&self) -> u64 {
        self.get(HeaderKey::NbFibers).max(0) as u64
    }

    pub fn set_nb_fibers(&mut self, n: u64) {
        self.set(HeaderKey::NbFibers, n as i64);
    }

    pub fn iter(&self) -> impl Iterator<Item = (HeaderKey, i64)> + '_ {
        self.fields.iter().map(|(k, v)| (*k, *v))
    }
}
