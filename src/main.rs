// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

mod args;
mod sim;

use anyhow::Context;
use anyhow::Result;
use log::info;

use crate::args::Args;

fn main() -> Result<()> {
    let args: Args = argh::from_env();
    let level = if args.debug {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Info
    };
    env_logger::Builder::from_default_env()
        .filter(None, level)
        .init();

    info!("{}", args);
    let stats = sim::run(&args).context("simulation failed")?;
    if args.json {
        println!("{}", serde_json::to_string(&stats)?);
    } else {
        println!("{}", stats);
    }
    Ok(())
}
