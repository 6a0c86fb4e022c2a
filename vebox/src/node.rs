// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use os_interface::GpuNode;

/// Routing constraints of a workload, gathered before choosing the node it runs on.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct GpuNodeLimit {
    /// The VEBOX output is consumed by the scaler/format converter.
    pub sfc_in_use: bool,
    pub cp_enabled: bool,
}

/// Node selection shared by platforms without routing constraints: always the standard VEBOX.
pub fn select_default_node(_limit: &GpuNodeLimit) -> GpuNode {
    GpuNode::Vebox
}
