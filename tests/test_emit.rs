//! Tests for `numpadd::emit` - synthetic event sequence builders.

use evdev::{EventType, InputEvent, InputEventKind, Key, MiscType, Synchronization};

use numpadd::emit::{
    compose_sequence, numlock_tap_events, press_events, release_events, tap_sequence,
};

mod common;
use common::{key_events, values_for};

fn is_syn(event: &InputEvent) -> bool {
    matches!(
        event.kind(),
        InputEventKind::Synchronization(Synchronization::SYN_REPORT)
    )
}

fn is_scan(event: &InputEvent) -> bool {
    matches!(event.kind(), InputEventKind::Misc(MiscType::MSC_SCAN))
}

#[test]
fn test_press_and_release_bursts() {
    let press = press_events(Key::KEY_KP7);
    assert_eq!(key_events(&press), vec![(Key::KEY_KP7, 1)]);
    assert!(is_syn(&press[1]));

    let release = release_events(Key::KEY_KP7);
    assert_eq!(key_events(&release), vec![(Key::KEY_KP7, 0)]);
    assert!(is_syn(&release[1]));
}

#[test]
fn test_numlock_tap_is_paired_and_scan_marked() {
    let events = numlock_tap_events();
    assert_eq!(
        key_events(&events),
        vec![(Key::KEY_NUMLOCK, 1), (Key::KEY_NUMLOCK, 0)]
    );
    let scans: Vec<i32> = events
        .iter()
        .filter(|e| is_scan(e))
        .map(InputEvent::value)
        .collect();
    assert_eq!(scans, vec![70053, 70053]);
    // every key event is followed by a sync marker
    assert!(is_syn(&events[2]));
    assert!(is_syn(&events[5]));
}

#[test]
fn test_tap_sequence_pairs_every_binding() {
    let events = tap_sequence(&[Key::KEY_CALC, Key::KEY_KPEQUAL]);
    assert_eq!(
        key_events(&events),
        vec![
            (Key::KEY_CALC, 1),
            (Key::KEY_CALC, 0),
            (Key::KEY_KPEQUAL, 1),
            (Key::KEY_KPEQUAL, 0),
        ]
    );
}

#[test]
fn test_compose_sequence_for_percent() {
    // '%' is U+0025: chord down, 2, 5, chord up
    let events = compose_sequence("%");
    assert_eq!(
        key_events(&events),
        vec![
            (Key::KEY_LEFTCTRL, 1),
            (Key::KEY_LEFTSHIFT, 1),
            (Key::KEY_U, 1),
            (Key::KEY_2, 1),
            (Key::KEY_2, 0),
            (Key::KEY_5, 1),
            (Key::KEY_5, 0),
            (Key::KEY_LEFTCTRL, 0),
            (Key::KEY_LEFTSHIFT, 0),
            (Key::KEY_U, 0),
        ]
    );
}

#[test]
fn test_compose_sequence_sub_events_are_synced() {
    let events = compose_sequence("%");
    // scan + key + syn triplets throughout
    assert_eq!(events.len() % 3, 0);
    for triplet in events.chunks(3) {
        assert!(is_scan(&triplet[0]));
        assert_eq!(triplet[1].event_type(), EventType::KEY);
        assert!(is_syn(&triplet[2]));
    }
}

#[test]
fn test_compose_sequence_covers_every_character() {
    // '%' then '=': two full chord-bracketed bursts
    let events = compose_sequence("%=");
    assert_eq!(values_for(&events, Key::KEY_U), vec![1, 0, 1, 0]);
    // '=' is U+003D: digits 3, D
    assert_eq!(values_for(&events, Key::KEY_3), vec![1, 0]);
    assert_eq!(values_for(&events, Key::KEY_D), vec![1, 0]);
}

#[test]
fn test_compose_sequence_hex_letters() {
    // U+00DF 'ß' uses hex digits D and F
    let events = compose_sequence("ß");
    assert_eq!(values_for(&events, Key::KEY_D), vec![1, 0]);
    assert_eq!(values_for(&events, Key::KEY_F), vec![1, 0]);
}

#[test]
fn test_every_key_down_has_matching_up() {
    for text in ["%", "=", "%=", "ß", "€"] {
        let events = compose_sequence(text);
        let mut down = std::collections::HashMap::new();
        for (key, value) in key_events(&events) {
            let counter = down.entry(key).or_insert(0i32);
            if value == 1 {
                *counter += 1;
            } else {
                *counter -= 1;
            }
        }
        assert!(
            down.values().all(|&c| c == 0),
            "unbalanced events for {text:?}"
        );
    }
}
