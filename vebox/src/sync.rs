// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

/// Returns `true` once the GPU-completed tag `completed` has reached `tag`.
///
/// Tags are `u32` counters that wrap, so the comparison is done on the signed distance between
/// the two: a tag issued up to 2^31 submissions before `completed` counts as reached.
pub fn tag_reached(completed: u32, tag: u32) -> bool {
    completed.wrapping_sub(tag) as i32 >= 0
}
