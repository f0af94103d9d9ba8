//! Main of the filesystem tool suite.
//!
//! The binary dispatches on the name it was invoked under, so a single
//! executable serves every command when hard-linked appropriately.

mod dumpfs;
mod mkfs;
mod util;

use crate::util::error;
use std::env;

fn main() {
    env_logger::init();

    let mut args = env::args_os();
    let bin = args
        .next()
        .and_then(|s| s.into_string().ok())
        .map(|s| {
            s.rsplit('/')
                .next()
                .map(str::to_owned)
                .unwrap_or(s)
        })
        .unwrap_or_else(|| {
            error("lfsutils", "missing binary name");
        });
    match bin.as_str() {
        bin @ ("mkfs" | "mkfs.lfs") => {
            let fs_name = bin.find('.').map(|i| &bin[(i + 1)..]).unwrap_or("lfs");
            mkfs::main(fs_name, args);
        }
        "dumpfs" => dumpfs::main(args),
        _ => error("lfsutils", "invalid binary name"),
    }
}
