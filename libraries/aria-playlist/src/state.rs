//! On-disk playlist state
//!
//! A line-oriented text file (`playlist-state` in the data directory)
//! holding the active/playing indices and, per playlist, its export
//! filename, position, and resume state. The format is append-friendly:
//! unknown keys are skipped, missing keys fall back to defaults, so older
//! and newer builds can read each other's files.
//!
//! ```text
//! active 0
//! playing 1
//! playlist 0
//! filename /home/user/mix.aplist
//! position 3
//! resume-state 1
//! resume-time 45000
//! ```

use std::fs;

use tracing::debug;

use crate::error::{PlaylistError, Result};
use crate::manager::Core;
use crate::types::UpdateLevel;

const STATE_FILE: &str = "playlist-state";

const RESUME_STOP: i32 = 0;
const RESUME_PLAY: i32 = 1;
const RESUME_PAUSE: i32 = 2;

fn parse_int(value: &str) -> Option<i32> {
    value.trim().parse().ok()
}

pub(crate) fn save(core: &Core) -> Result<()> {
    // capture the playback clock before taking the lock
    let (paused, time) = match core.backends() {
        Some(backends) => (backends.playback.is_paused(), backends.playback.time_ms()),
        None => (false, 0),
    };

    let state = core.lock();
    let Some(dir) = state.data_dir.clone() else {
        return Err(PlaylistError::NotInitialized);
    };

    let mut out = String::new();
    let active = state
        .active
        .map(|stamp| state.registry.index_of(stamp))
        .unwrap_or(-1);
    let playing = state
        .playing
        .map(|stamp| state.registry.index_of(stamp))
        .unwrap_or(-1);
    out.push_str(&format!("active {active}\n"));
    out.push_str(&format!("playing {playing}\n"));

    for stamp in state.registry.stamps() {
        let Some(data) = state.registry.data(stamp) else {
            continue;
        };

        out.push_str(&format!("playlist {}\n", state.registry.index_of(stamp)));
        if let Some(filename) = &data.filename {
            out.push_str(&format!("filename {filename}\n"));
        }
        out.push_str(&format!("position {}\n", data.position()));

        // resume state is stored per playlist for historical reasons
        let is_playing = state.playing == Some(stamp);
        let resume_state = if is_playing && paused {
            RESUME_PAUSE
        } else {
            RESUME_PLAY
        };
        out.push_str(&format!("resume-state {resume_state}\n"));
        let resume_time = if is_playing { time } else { data.resume_time };
        out.push_str(&format!("resume-time {resume_time}\n"));
    }

    fs::write(dir.join(STATE_FILE), out)?;
    debug!("saved playlist state");
    Ok(())
}

pub(crate) fn load(core: &Core) -> Result<()> {
    let mut state = core.lock();
    let Some(dir) = state.data_dir.clone() else {
        return Err(PlaylistError::NotInitialized);
    };

    let contents = match fs::read_to_string(dir.join(STATE_FILE)) {
        Ok(contents) => contents,
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
            debug!("no prior playlist state");
            return Ok(());
        }
        Err(error) => return Err(error.into()),
    };

    // display index of the playlist block being read
    let mut current: Option<u32> = None;
    let mut current_index = -1;

    for line in contents.lines() {
        let Some((key, value)) = line.split_once(' ') else {
            continue;
        };

        match key {
            "active" => {
                if let Some(index) = parse_int(value) {
                    if index >= 0 {
                        if let Some(stamp) = state.registry.stamp_at(index as usize) {
                            state.active = Some(stamp);
                        }
                    }
                }
            }
            "playing" => {
                state.resume_playlist = parse_int(value).unwrap_or(-1);
            }
            "playlist" => {
                current_index = parse_int(value).unwrap_or(-1);
                current = if current_index >= 0 {
                    state.registry.stamp_at(current_index as usize)
                } else {
                    None
                };
            }
            "filename" => {
                if let Some(data) = current.and_then(|stamp| state.registry.data_mut(stamp)) {
                    data.filename = Some(value.to_string());
                }
            }
            "position" => {
                let position = parse_int(value).unwrap_or(-1);
                if let Some(data) = current.and_then(|stamp| state.registry.data_mut(stamp)) {
                    if let Some(key) = data.entry_key_at(position) {
                        data.set_position(Some(key), true);
                    }
                }
            }
            "resume-state" => {
                let resume_state = parse_int(value).unwrap_or(RESUME_PLAY);
                if current_index == state.resume_playlist {
                    if resume_state == RESUME_STOP {
                        state.resume_playlist = -1;
                    }
                    if resume_state == RESUME_PAUSE {
                        state.resume_paused = true;
                    }
                }
            }
            "resume-time" => {
                if let Some(data) = current.and_then(|stamp| state.registry.data_mut(stamp)) {
                    data.resume_time = parse_int(value).unwrap_or(0);
                }
            }
            // unknown keys from other builds are fine
            _ => {}
        }
    }

    // seed focus and selection from the restored positions, and drop the
    // update noise queued while restoring
    for stamp in state.registry.stamps() {
        if let Some(data) = state.registry.data_mut(stamp) {
            let mut focus = data.position();
            if focus < 0 && data.n_entries() > 0 {
                focus = 0;
            }
            if focus >= 0 {
                data.set_focus(focus);
                data.select_entry(focus, true);
            }
            data.cancel_updates();
        }
    }

    core.bus.cancel();
    state.update_level = UpdateLevel::None;
    state.update_delayed = false;

    debug!("loaded playlist state");
    Ok(())
}
