use std::collections::BTreeMap;

use tracing::debug;

use crate::{
    model::{Composition, Event},
    time::Tick,
};

/// Sparse tick-indexed view over a flattened event list. Events sharing a
/// tick keep the order they were supplied in.
///
/// A windowed timeline keeps the window as its bounds, so playback covers
/// the whole window even when its edges hold no events.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Timeline {
    events: BTreeMap<Tick, Vec<Event>>,
    span: Option<(Tick, Tick)>,
}

impl Timeline {
    #[must_use]
    pub fn from_events(events: impl IntoIterator<Item = Event>) -> Self {
        let mut by_tick: BTreeMap<Tick, Vec<Event>> = BTreeMap::new();
        for event in events {
            by_tick.entry(event.tick).or_default().push(event);
        }
        Self {
            events: by_tick,
            span: None,
        }
    }

    #[must_use]
    pub fn from_composition(composition: &impl Composition) -> Self {
        let timeline = Self::from_events(composition.render_to_events(0, None));
        debug!(
            ticks = timeline.events.len(),
            events = timeline.event_count(),
            "timeline built"
        );
        timeline
    }

    /// Timeline restricted to the inclusive window `[start_tick, end_tick]`.
    /// Its bounds are the window itself, not the ticks that carry events.
    #[must_use]
    pub fn window(composition: &impl Composition, start_tick: Tick, end_tick: Tick) -> Self {
        let end_tick = end_tick.max(start_tick);
        let mut timeline =
            Self::from_events(composition.render_to_events(start_tick, Some(end_tick)));
        timeline.span = Some((start_tick, end_tick));
        timeline
    }

    /// True when no events are stored, even if a window is set.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    #[must_use]
    pub fn min_tick(&self) -> Option<Tick> {
        self.bounds().map(|(min, _)| min)
    }

    #[must_use]
    pub fn max_tick(&self) -> Option<Tick> {
        self.bounds().map(|(_, max)| max)
    }

    /// Ticks a pass covers: the window when one is set, otherwise the first
    /// and last tick holding events.
    #[must_use]
    pub fn bounds(&self) -> Option<(Tick, Tick)> {
        self.span.or_else(|| {
            Some((
                *self.events.keys().next()?,
                *self.events.keys().next_back()?,
            ))
        })
    }

    #[must_use]
    pub fn events_at(&self, tick: Tick) -> &[Event] {
        self.events.get(&tick).map_or(&[], Vec::as_slice)
    }

    #[must_use]
    pub fn event_count(&self) -> usize {
        self.events.values().map(Vec::len).sum()
    }

    pub fn iter(&self) -> impl Iterator<Item = (Tick, &[Event])> {
        self.events
            .iter()
            .map(|(tick, events)| (*tick, events.as_slice()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Instrument, NoteData};

    fn note_on(tick: Tick, pitch: u8) -> Event {
        Event::note(tick, NoteData::on(pitch, 100, 0, 0), Instrument::new(0, "keys"))
    }

    #[test]
    fn groups_events_by_tick_in_authoring_order() {
        let timeline = Timeline::from_events([note_on(4, 60), note_on(0, 62), note_on(4, 55)]);

        assert_eq!(timeline.bounds(), Some((0, 4)));
        let at_four: Vec<u8> = timeline
            .events_at(4)
            .iter()
            .filter_map(|event| event.note.map(|note| note.pitch))
            .collect();
        assert_eq!(at_four, vec![60, 55]);
        assert!(timeline.events_at(2).is_empty());
        assert_eq!(timeline.event_count(), 3);
    }

    #[test]
    fn every_event_sits_under_its_own_tick() {
        let timeline = Timeline::from_events([note_on(9, 60), note_on(3, 61), note_on(9, 62)]);
        for (tick, events) in timeline.iter() {
            assert!(events.iter().all(|event| event.tick == tick));
        }
    }

    #[test]
    fn window_keeps_its_edges_when_events_are_sparse() {
        let song = {
            let mut song = crate::model::Song::new("sparse", crate::time::Timing::new(120, 4, 6));
            song.events = vec![note_on(6, 60), note_on(13, 62)];
            song
        };

        let line = Timeline::window(&song, 6, 11);
        assert_eq!(line.bounds(), Some((6, 11)));
        assert_eq!(line.event_count(), 1);

        let silent = Timeline::window(&song, 18, 23);
        assert!(silent.is_empty());
        assert_eq!(silent.bounds(), Some((18, 23)));
    }

    #[test]
    fn empty_timeline_has_no_bounds() {
        let timeline = Timeline::default();
        assert!(timeline.is_empty());
        assert_eq!(timeline.bounds(), None);
    }
}
