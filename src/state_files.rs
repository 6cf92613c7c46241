//! Timestamped snapshots saved next to the input image.
//!
//! A snapshot of `circuits/adder.gif` is written as
//! `circuits/<stamp>.adder.png`, where `<stamp>` is nanoseconds since the Unix
//! epoch. The newest snapshot is the one with the largest stamp.

use bevy::log::debug;
use std::ffi::{OsStr, OsString};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

/// Nanoseconds since the Unix epoch, or 0 if the clock is before it.
pub fn current_stamp() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_nanos())
        .unwrap_or_default()
}

fn input_stem(input: &Path) -> &OsStr {
    input.file_stem().unwrap_or(OsStr::new("state"))
}

fn input_dir(input: &Path) -> &Path {
    match input.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    }
}

/// Snapshot path for `input` taken at `stamp`.
pub fn state_file_path(input: &Path, stamp: u128) -> PathBuf {
    let mut file_name = OsString::from(format!("{stamp}."));
    file_name.push(input_stem(input));
    file_name.push(".png");
    input_dir(input).join(file_name)
}

/// Stamp of `file_name` if it is a snapshot of an input with `stem`.
fn parse_stamp(file_name: &str, stem: &str) -> Option<u128> {
    let (stamp, rest) = file_name.split_once('.')?;
    let rest_stem = rest.strip_suffix(".png")?;
    if rest_stem != stem {
        return None;
    }
    stamp.parse().ok()
}

/// Newest snapshot of `input`, if any exists.
pub fn find_latest_state(input: &Path) -> Option<PathBuf> {
    let dir = input_dir(input);
    let stem = input_stem(input).to_str()?;

    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(err) => {
            debug!("Cannot list {}: {}", dir.display(), err);
            return None;
        }
    };

    entries
        .filter_map(Result::ok)
        .filter_map(|entry| {
            let name = entry.file_name();
            let stamp = parse_stamp(name.to_str()?, stem)?;
            Some((stamp, entry.path()))
        })
        .max_by_key(|(stamp, _)| *stamp)
        .map(|(_, path)| path)
}
