//! Playback coordination integration tests

mod common;

use std::time::Duration;

use aria_playlist::{AddItem, GetMode, HookEvent, Playlist, Tuple};
use common::{PlaybackCall, TestCore};

fn playback_events(events: &[HookEvent]) -> Vec<HookEvent> {
    events
        .iter()
        .filter(|e| {
            matches!(
                e,
                HookEvent::PlaylistSetPlaying
                    | HookEvent::PlaylistPosition { .. }
                    | HookEvent::PlaybackBegin
                    | HookEvent::PlaybackStop
            )
        })
        .cloned()
        .collect()
}

#[test]
fn start_playback_fires_hooks_in_order() {
    let core = TestCore::new();
    let playlist = Playlist::active_playlist();
    core.insert_files(playlist, &["a.mp3", "b.mp3"]);
    core.events.take();

    playlist.start_playback(false);

    assert_eq!(Playlist::playing_playlist().stamp(), playlist.stamp());
    assert_eq!(playlist.get_position(), 0);
    assert_eq!(
        playback_events(&core.events.take()),
        vec![
            HookEvent::PlaylistSetPlaying,
            HookEvent::PlaylistPosition { playlist },
            HookEvent::PlaybackBegin,
        ]
    );
    assert!(matches!(
        core.playback.last_play(),
        Some(PlaybackCall::Play {
            seek_ms: 0,
            paused: false,
            ..
        })
    ));
}

#[test]
fn next_song_advances_and_stops_at_the_end() {
    let core = TestCore::new();
    let playlist = Playlist::active_playlist();
    core.insert_files(playlist, &["a.mp3", "b.mp3"]);
    playlist.start_playback(false);
    core.events.take();

    assert!(playlist.next_song(false));
    assert_eq!(playlist.get_position(), 1);
    assert_eq!(
        playback_events(&core.events.take()),
        vec![
            HookEvent::PlaylistPosition { playlist },
            HookEvent::PlaybackBegin,
        ]
    );

    // end of the playlist without repeat: no move, no hooks
    assert!(!playlist.next_song(false));
    assert_eq!(playlist.get_position(), 1);
    assert!(playback_events(&core.events.take()).is_empty());

    // with repeat the position wraps
    assert!(playlist.next_song(true));
    assert_eq!(playlist.get_position(), 0);
}

#[test]
fn prev_song_steps_back_until_the_first_row() {
    let core = TestCore::new();
    let playlist = Playlist::active_playlist();
    core.insert_files(playlist, &["a.mp3", "b.mp3"]);
    playlist.set_position(1);

    assert!(playlist.prev_song());
    assert_eq!(playlist.get_position(), 0);
    assert!(!playlist.prev_song());
}

#[test]
fn queued_entries_preempt_linear_order() {
    let core = TestCore::new();
    let playlist = Playlist::active_playlist();
    core.insert_files(playlist, &["a.mp3", "b.mp3", "c.mp3"]);
    playlist.start_playback(false);

    playlist.queue_insert(-1, 2);
    assert_eq!(playlist.n_queued(), 1);

    assert!(playlist.next_song(false));
    assert_eq!(playlist.get_position(), 2);
    assert_eq!(playlist.n_queued(), 0);
}

#[test]
fn start_playback_on_the_playing_playlist_just_toggles_pause() {
    let core = TestCore::new();
    let playlist = Playlist::active_playlist();
    core.insert_files(playlist, &["a.mp3"]);
    playlist.start_playback(false);
    core.events.take();
    core.playback.take_calls();

    playlist.start_playback(true);

    // no new playback session, only a pause toggle, and no hooks
    assert_eq!(
        core.playback.take_calls(),
        vec![PlaybackCall::SetPaused(true)]
    );
    assert!(playback_events(&core.events.take()).is_empty());
}

#[test]
fn stop_clears_the_playing_playlist() {
    let core = TestCore::new();
    let playlist = Playlist::active_playlist();
    core.insert_files(playlist, &["a.mp3"]);
    playlist.start_playback(false);
    core.events.take();

    aria_playlist::stop();

    assert!(Playlist::playing_playlist().is_null());
    let events = playback_events(&core.events.take());
    assert_eq!(
        events,
        vec![HookEvent::PlaylistSetPlaying, HookEvent::PlaybackStop]
    );
    assert!(core.playback.take_calls().contains(&PlaybackCall::Stop));
}

#[test]
fn removing_the_playing_entry_redirects_playback() {
    let core = TestCore::new();
    let playlist = Playlist::active_playlist();
    core.insert_files(playlist, &["a.mp3", "b.mp3"]);
    playlist.start_playback(false);
    core.events.take();

    // the playing entry disappears: its position is gone, playback stops
    playlist.remove_entries(0, 1);

    assert!(Playlist::playing_playlist().is_null());
    assert_eq!(playlist.get_position(), -1);
    let events = playback_events(&core.events.take());
    assert!(events.contains(&HookEvent::PlaybackStop));
    assert!(events.contains(&HookEvent::PlaylistSetPlaying));

    // removing entries of a non-playing playlist fires nothing
    core.insert_files(playlist, &["c.mp3"]);
    core.events.take();
    playlist.remove_entries(0, 1);
    assert!(playback_events(&core.events.take()).is_empty());
}

#[test]
fn set_position_restarts_playback_of_the_playing_playlist() {
    let core = TestCore::new();
    let playlist = Playlist::active_playlist();
    core.insert_files(playlist, &["a.mp3", "b.mp3"]);
    playlist.start_playback(false);
    let first_serial = core.playback.last_serial();
    core.events.take();

    playlist.set_position(1);

    assert_eq!(playlist.get_position(), 1);
    assert!(core.playback.last_serial() > first_serial);
    assert_eq!(
        playback_events(&core.events.take()),
        vec![
            HookEvent::PlaylistPosition { playlist },
            HookEvent::PlaybackBegin,
        ]
    );
}

#[test]
fn playback_entry_read_serves_the_current_entry() {
    let core = TestCore::new();
    let playlist = Playlist::active_playlist();
    core.insert_files(playlist, &["a.mp3", "b.mp3"]);
    playlist.start_playback(false);
    let serial = core.playback.last_serial();

    // the playback thread opens the entry: tags, decoder, art in one read
    let info = aria_playlist::playback_entry_read(serial);

    assert_eq!(info.filename.as_deref(), Some("/music/a.mp3"));
    assert_eq!(info.decoder.as_deref(), Some("mock-decoder"));
    assert_eq!(info.file.as_deref(), Some("open:/music/a.mp3"));
    assert!(info.error.is_none());

    // the scan's tuple was published without a second read
    let (tuple, _) = playlist.entry_tuple(0, GetMode::NoWait);
    assert_eq!(tuple.unwrap().title.as_deref(), Some("a"));
    assert_eq!(core.reader.scanned_files(), vec!["/music/a.mp3"]);
    assert_eq!(*core.art.cached.lock().unwrap(), vec!["/music/a.mp3"]);
    assert!(core
        .playback
        .take_calls()
        .contains(&PlaybackCall::SetInfo(0)));
}

#[test]
fn playback_entry_read_rejects_a_stale_serial() {
    let core = TestCore::new();
    let playlist = Playlist::active_playlist();
    core.insert_files(playlist, &["a.mp3", "b.mp3"]);
    playlist.start_playback(false);
    let old_serial = core.playback.last_serial();

    // the user skips ahead before the playback thread gets to read
    playlist.next_song(false);

    let info = aria_playlist::playback_entry_read(old_serial);
    assert!(info.filename.is_none());

    // the fresh serial still works
    let info = aria_playlist::playback_entry_read(core.playback.last_serial());
    assert_eq!(info.filename.as_deref(), Some("/music/b.mp3"));
}

#[test]
fn playback_set_tuple_updates_stream_metadata() {
    let core = TestCore::new();
    let playlist = Playlist::active_playlist();
    core.insert_files(playlist, &["radio.mp3"]);
    playlist.start_playback(false);
    let serial = core.playback.last_serial();
    let _ = aria_playlist::playback_entry_read(serial);

    let stream_tuple = Tuple {
        title: Some("Live Song".to_string()),
        artist: Some("Live Artist".to_string()),
        ..Tuple::default()
    };
    aria_playlist::playback_entry_set_tuple(serial, stream_tuple);

    let (tuple, _) = playlist.entry_tuple(0, GetMode::NoWait);
    assert_eq!(tuple.unwrap().title.as_deref(), Some("Live Song"));

    // a stale serial changes nothing
    let stale = Tuple {
        title: Some("Too Late".to_string()),
        ..Tuple::default()
    };
    aria_playlist::playback_entry_set_tuple(serial + 1, stale);
    let (tuple, _) = playlist.entry_tuple(0, GetMode::NoWait);
    assert_eq!(tuple.unwrap().title.as_deref(), Some("Live Song"));
}

#[test]
fn cuesheet_entries_ignore_stream_metadata() {
    let core = TestCore::new();
    let playlist = Playlist::active_playlist();

    let segment = Tuple {
        title: Some("Movement I".to_string()),
        start_time_ms: Some(60_000),
        length_ms: 120_000,
        ..Tuple::default()
    };
    playlist.insert_flat_items(0, vec![AddItem::with_tuple("/music/suite.flac", segment)]);
    playlist.start_playback(false);
    let serial = core.playback.last_serial();

    let stream_tuple = Tuple {
        title: Some("Stream Title".to_string()),
        ..Tuple::default()
    };
    aria_playlist::playback_entry_set_tuple(serial, stream_tuple);

    let (tuple, _) = playlist.entry_tuple(0, GetMode::NoWait);
    assert_eq!(tuple.unwrap().title.as_deref(), Some("Movement I"));
}

#[test]
fn switching_tracks_requeues_an_unread_playback_scan() {
    let core = TestCore::new();
    let playlist = Playlist::active_playlist();
    core.insert_files(playlist, &["a.mp3", "b.mp3"]);
    playlist.start_playback(false);

    // the playback thread never touched a.mp3's scan; switching tracks must
    // hand it back to the ordinary scanner
    playlist.next_song(false);

    assert!(common::wait_until(Duration::from_secs(5), || {
        core.reader
            .scanned_files()
            .contains(&"/music/a.mp3".to_string())
    }));
}

#[test]
fn playing_playlist_selection_follows_activation_not_playback() {
    let core = TestCore::new();
    let first = Playlist::active_playlist();
    core.insert_files(first, &["a.mp3"]);
    let second = Playlist::insert_playlist(-1);
    core.insert_files(second, &["b.mp3"]);

    first.start_playback(false);
    second.activate();

    assert_eq!(Playlist::playing_playlist().stamp(), first.stamp());
    assert_eq!(Playlist::active_playlist().stamp(), second.stamp());

    // starting playback elsewhere moves the playing playlist only
    core.events.take();
    second.start_playback(false);
    assert_eq!(Playlist::playing_playlist().stamp(), second.stamp());
    let events = playback_events(&core.events.take());
    assert_eq!(events[0], HookEvent::PlaylistSetPlaying);
}
