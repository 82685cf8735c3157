//! Turns arbitrarily shaped feed payloads into canonical [`Event`]s.
//!
//! The source schema is not ours: keys get renamed, nested differently, or
//! dropped between releases of the site. Nothing in here panics or returns an
//! error. A payload with nothing event-like in it simply yields no events.

pub mod extract;
pub mod fields;

use serde_json::Value;
use tracing::debug;

use crate::normalizer::extract::path;
use crate::types::{Event, LifecycleStatus};

/// Normalize a single event out of `payload`.
///
/// The event object is, in order: the payload itself when it carries an
/// id-like key, `payload.events[0]`, or `payload.data.events[0]`.
pub fn normalize_event(payload: &Value) -> Option<Event> {
    let event = resolve_event_object(payload).and_then(build_event);
    if event.is_none() {
        debug!("[NORMALIZER] no event-like object in payload");
    }
    event
}

/// Normalize every element of the first events array found in `payload`:
/// the payload itself when it is a list, `payload.events`, or
/// `payload.data.events`. Elements that do not normalize are dropped; the
/// rest keep their source order.
pub fn normalize_events_list(payload: &Value) -> Vec<Event> {
    let list = payload
        .as_array()
        .or_else(|| path(payload, &["events"]).and_then(Value::as_array))
        .or_else(|| path(payload, &["data", "events"]).and_then(Value::as_array));

    let Some(list) = list else {
        return Vec::new();
    };

    let events: Vec<Event> = list
        .iter()
        .filter_map(|item| resolve_event_object(item).and_then(build_event))
        .collect();

    let dropped = list.len() - events.len();
    if dropped > 0 {
        debug!(dropped, kept = events.len(), "[NORMALIZER] dropped list elements without an event");
    }
    events
}

fn resolve_event_object(payload: &Value) -> Option<&Value> {
    if fields::has_id(payload) {
        return Some(payload);
    }
    [&["events"][..], &["data", "events"][..]]
        .iter()
        .filter_map(|p| path(payload, p))
        .filter_map(|events| events.get(0))
        .find(|candidate| fields::has_id(candidate))
}

fn build_event(obj: &Value) -> Option<Event> {
    let match_id = fields::match_id(obj)?;
    let status = fields::status(obj);
    Some(Event {
        match_id,
        players: fields::players(obj),
        league: fields::league(obj),
        tour: fields::tour(obj),
        status,
        score_sets: fields::score_sets(obj),
        score_points_current_set: fields::score_points_current_set(obj),
        current_set_index: fields::current_set_index(obj),
        odds: fields::odds(obj),
        last_update_ts: fields::last_update_ts(obj),
        lifecycle_status: LifecycleStatus::default(),
        last_seen: None,
    })
}
