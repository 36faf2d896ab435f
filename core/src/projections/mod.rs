//! Projection folds (`§4.5`): pure reducers over an event stream.
//!
//! Every fold here is a plain function from `&[Event]` to a result struct.
//! None of them touch a storage port; callers fetch the event snapshot via
//! [`crate::ports::LedgerStorage::list_campaign_events`] first, sort it
//! (folds assume ascending `replay_ordinal`, matching the verifier's
//! convention of sorting defensively), and fold it locally.

pub mod conditions;
pub mod hp;
pub mod initiative;

use thiserror::Error;

/// Errors raised when an event's payload does not match the shape its
/// `event_type` requires.
#[derive(Debug, Error)]
pub enum ProjectionError {
    /// The payload could not be deserialized into the expected shape.
    #[error("event {event_id:?} (type {event_type:?}) has a malformed payload: {source}")]
    MalformedPayload {
        /// The offending event's id.
        event_id: Option<i64>,
        /// The offending event's type tag.
        event_type: String,
        /// The underlying deserialization failure.
        #[source]
        source: serde_json::Error,
    },
}
