// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use std::collections::BTreeMap;

use log::debug;

use crate::Error;
use crate::Result;

/// Key of the built-in scheme without content protection.
pub const CP_NONE: u32 = 0;

/// A content protection scheme, as far as the VEBOX is concerned.
pub trait CpStrategy: Send {
    fn name(&self) -> &str;

    /// Whether protected content flows through the engine. Influences node selection.
    fn is_enabled(&self) -> bool;
}

/// No content protection.
#[derive(Debug, Default)]
pub struct NullCp;

impl CpStrategy for NullCp {
    fn name(&self) -> &str {
        "none"
    }

    fn is_enabled(&self) -> bool {
        false
    }
}

pub type CpFactory = Box<dyn Fn() -> Box<dyn CpStrategy> + Send + Sync>;

/// Content protection schemes known to the driver, by key.
///
/// Built once at startup and passed to whoever opens a device.
pub struct CpRegistry {
    factories: BTreeMap<u32, CpFactory>,
}

impl CpRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        CpRegistry {
            factories: BTreeMap::new(),
        }
    }

    /// A registry holding [`NullCp`] at [`CP_NONE`].
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.factories.insert(
            CP_NONE,
            Box::new(|| -> Box<dyn CpStrategy> { Box::new(NullCp) }),
        );
        registry
    }

    /// Registers `factory` under `key`. Fails if the key is taken, unless `force` is set, in which
    /// case the previous factory is replaced.
    pub fn register(&mut self, key: u32, factory: CpFactory, force: bool) -> Result<()> {
        if !force && self.factories.contains_key(&key) {
            return Err(Error::CpAlreadyRegistered(key));
        }
        if self.factories.insert(key, factory).is_some() {
            debug!("replaced content protection scheme {}", key);
        }
        Ok(())
    }

    pub fn contains(&self, key: u32) -> bool {
        self.factories.contains_key(&key)
    }

    pub fn keys(&self) -> impl Iterator<Item = u32> + '_ {
        self.factories.keys().copied()
    }

    /// Instantiates the scheme registered under `key`.
    pub fn create(&self, key: u32) -> Option<Box<dyn CpStrategy>> {
        self.factories.get(&key).map(|factory| factory())
    }
}

impl Default for CpRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}
