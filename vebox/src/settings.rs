// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use std::fs;
use std::path::Path;
use std::time::Duration;

use gfx_resources::PAGE_SIZE;
use serde::Deserialize;
use serde::Serialize;

use crate::Error;
use crate::Result;

pub const DEFAULT_NUM_INSTANCES: u32 = 16;
pub const DEFAULT_SYNC_SIZE: u32 = 128;
pub const DEFAULT_INSTANCE_ALIGNMENT: u32 = 64;

pub const MIN_SYNC_SIZE: u32 = 128;
pub const MAX_SYNC_SIZE: u32 = 4096;

/// Sizing and tuning of the VEBOX state heap.
///
/// Every sub-state size is a byte count that contributes to the size of one heap instance. A
/// size of zero means the platform has no such sub-state.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default, rename_all = "kebab-case")]
pub struct VeboxSettings {
    pub num_instances: u32,
    pub sync_size: u32,
    pub instance_alignment: u32,
    pub dndi_state_size: u32,
    pub iecp_state_size: u32,
    pub gamut_state_size: u32,
    pub vertex_table_size: u32,
    pub capture_pipe_state_size: u32,
    pub gamma_correction_state_size: u32,
    pub hdr_state_size: u32,
    /// Sleep-and-refresh cycles an assignment makes before reporting exhaustion.
    pub assign_poll_count: u32,
    pub assign_poll_interval_us: u64,
    /// Consecutive exhausted assignments treated as a GPU hang.
    pub hang_threshold: u32,
}

impl Default for VeboxSettings {
    fn default() -> Self {
        let page = PAGE_SIZE as u32;
        VeboxSettings {
            num_instances: DEFAULT_NUM_INSTANCES,
            sync_size: DEFAULT_SYNC_SIZE,
            instance_alignment: DEFAULT_INSTANCE_ALIGNMENT,
            dndi_state_size: page,
            iecp_state_size: page,
            gamut_state_size: page,
            vertex_table_size: page,
            capture_pipe_state_size: page,
            gamma_correction_state_size: page,
            hdr_state_size: page,
            assign_poll_count: 50,
            assign_poll_interval_us: 1000,
            hang_threshold: 3,
        }
    }
}

impl VeboxSettings {
    /// Loads settings from a JSON file. Fields missing from the file keep their default.
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents =
            fs::read_to_string(path).map_err(|e| Error::ReadSettings(path.to_path_buf(), e))?;
        Self::from_json_str(&contents)
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        let settings: VeboxSettings = serde_json::from_str(json).map_err(Error::ParseSettings)?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        if self.num_instances == 0 {
            return Err(Error::InvalidSettings(
                "num-instances must be at least 1".to_string(),
            ));
        }
        if !(MIN_SYNC_SIZE..=MAX_SYNC_SIZE).contains(&self.sync_size) {
            return Err(Error::InvalidSettings(format!(
                "sync-size {} is outside {}..={}",
                self.sync_size, MIN_SYNC_SIZE, MAX_SYNC_SIZE
            )));
        }
        if !self.instance_alignment.is_power_of_two() {
            return Err(Error::InvalidSettings(format!(
                "instance-alignment {} is not a power of two",
                self.instance_alignment
            )));
        }
        if self.hang_threshold == 0 {
            return Err(Error::InvalidSettings(
                "hang-threshold must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn assign_policy(&self) -> AssignPolicy {
        AssignPolicy {
            poll_count: self.assign_poll_count,
            poll_interval: Duration::from_micros(self.assign_poll_interval_us),
        }
    }
}

/// How long an assignment may wait for the GPU to retire an instance.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct AssignPolicy {
    pub poll_count: u32,
    pub poll_interval: Duration,
}

impl AssignPolicy {
    /// Refresh once and give up, never sleeping.
    pub const fn no_wait() -> Self {
        AssignPolicy {
            poll_count: 0,
            poll_interval: Duration::ZERO,
        }
    }
}
