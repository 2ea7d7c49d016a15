use proptest::prelude::*;
use tickreel_core::{Gate, Mixer, MixerEvent, OpenGate};

const TRACKS: usize = 6;

#[test]
fn fresh_mixer_plays_everything() {
    let mixer = Mixer::new(TRACKS);
    for track in 0..TRACKS {
        assert!(mixer.should_play(track, 0));
        assert!(mixer.is_track_audible(track));
    }
    assert!(OpenGate.should_play(99, 99));
}

#[test]
fn solo_silences_every_other_track() {
    let mixer = Mixer::new(3);
    assert!(mixer.toggle_solo(1));
    assert!(mixer.any_solo());
    assert!(!mixer.should_play(0, 0));
    assert!(mixer.should_play(1, 0));
    assert!(!mixer.should_play(2, 0));

    assert!(!mixer.toggle_solo(1));
    assert!(!mixer.any_solo());
    assert!((0..3).all(|track| mixer.should_play(track, 0)));
}

#[test]
fn mute_wins_over_solo_on_the_same_track() {
    let mixer = Mixer::new(2);
    mixer.set_soloed(0, true);
    mixer.set_muted(0, true);
    assert!(!mixer.should_play(0, 0));
    assert!(!mixer.should_play(1, 0));
}

#[test]
fn column_controls_compose_with_track_controls() {
    let mixer = Mixer::new(2);
    mixer.set_column_muted(0, 1, true);
    assert!(mixer.should_play(0, 0));
    assert!(!mixer.should_play(0, 1));

    mixer.set_column_soloed(1, 2, true);
    assert!(mixer.should_play(1, 2));
    assert!(!mixer.should_play(1, 0));
    assert!(!mixer.should_play(0, 0));
}

#[test]
fn toggling_notifies_state_of_all_tracks() {
    let mixer = Mixer::new(3);
    let updates = mixer.subscribe();

    mixer.toggle_solo(2);
    let events: Vec<MixerEvent> = updates.try_iter().collect();

    assert_eq!(events.len(), 9);
    for track in 0..3 {
        assert!(events.contains(&MixerEvent::TrackSoloed {
            track,
            soloed: track == 2
        }));
        assert!(events.contains(&MixerEvent::TrackAudible {
            track,
            audible: track == 2
        }));
        assert!(events.contains(&MixerEvent::TrackMuted {
            track,
            muted: false
        }));
    }
}

#[test]
fn column_solo_keeps_its_track_audible_in_the_broadcast() {
    let mixer = Mixer::new(2);
    let updates = mixer.subscribe();

    mixer.set_column_soloed(0, 1, true);
    let events: Vec<MixerEvent> = updates.try_iter().collect();

    assert!(mixer.should_play(0, 1));
    assert!(mixer.is_track_audible(0));
    assert!(!mixer.is_track_audible(1));
    assert!(events.contains(&MixerEvent::TrackAudible {
        track: 0,
        audible: true
    }));
    assert!(events.contains(&MixerEvent::TrackAudible {
        track: 1,
        audible: false
    }));

    // the only soloed column muted: nothing on the track can play
    mixer.set_column_muted(0, 1, true);
    assert!(!mixer.should_play(0, 1));
    assert!(!mixer.is_track_audible(0));
}

#[test]
fn dropped_subscribers_are_pruned() {
    let mixer = Mixer::new(1);
    let kept = mixer.subscribe();
    drop(mixer.subscribe());

    mixer.toggle_mute(0);
    mixer.toggle_mute(0);
    assert_eq!(kept.try_iter().count(), 6);
}

fn apply(mixer: &Mixer, muted: &[bool], soloed: &[bool]) {
    for (track, flag) in muted.iter().enumerate() {
        mixer.set_muted(track, *flag);
    }
    for (track, flag) in soloed.iter().enumerate() {
        mixer.set_soloed(track, *flag);
    }
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 128,
        .. ProptestConfig::default()
    })]

    #[test]
    fn gate_follows_mute_and_solo_laws(
        muted in prop::collection::vec(any::<bool>(), TRACKS),
        soloed in prop::collection::vec(any::<bool>(), TRACKS),
        column in 0usize..4,
    ) {
        let mixer = Mixer::new(TRACKS);
        apply(&mixer, &muted, &soloed);
        let any_solo = soloed.iter().any(|flag| *flag);

        for track in 0..TRACKS {
            let expected = !muted[track] && (!any_solo || soloed[track]);
            prop_assert_eq!(mixer.should_play(track, column), expected);
            prop_assert_eq!(mixer.is_track_audible(track), expected);
        }
    }

    #[test]
    fn toggling_twice_restores_the_gate(
        muted in prop::collection::vec(any::<bool>(), TRACKS),
        soloed in prop::collection::vec(any::<bool>(), TRACKS),
        target in 0usize..TRACKS,
    ) {
        let mixer = Mixer::new(TRACKS);
        apply(&mixer, &muted, &soloed);
        let before: Vec<bool> = (0..TRACKS).map(|track| mixer.should_play(track, 0)).collect();

        mixer.toggle_solo(target);
        mixer.toggle_solo(target);
        mixer.toggle_mute(target);
        mixer.toggle_mute(target);

        let after: Vec<bool> = (0..TRACKS).map(|track| mixer.should_play(track, 0)).collect();
        prop_assert_eq!(before, after);
    }
}
