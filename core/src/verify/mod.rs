//! Hash-chain verifier (`§4.4`).
//!
//! Independent of the append coordinator: given every event for a campaign,
//! confirms dense ordinals from zero, a genesis-rooted chain, and that each
//! `payload_hash` matches the canonical bytes of its own payload. Used both
//! as a standalone audit tool and by the importer's finalization phase.

#[cfg(test)]
mod tests;

use thiserror::Error;

use crate::hashing::{self, PayloadHash, GENESIS_HASH};
use crate::ledger::Event;
use crate::metrics::MetricsSink;

/// A single broken link found while verifying a campaign's chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainMismatch {
    /// The event at which verification failed.
    pub event_id: Option<i64>,
    /// Its ordinal, for operator-facing messages.
    pub replay_ordinal: i64,
    /// What went wrong.
    pub kind: MismatchKind,
}

/// The kind of defect found at one event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MismatchKind {
    /// `replay_ordinal` values are not dense starting from zero.
    OrdinalGap {
        /// The ordinal actually found.
        found: i64,
        /// The ordinal that should have appeared.
        expected: i64,
    },
    /// The first event's `prev_event_hash` was not [`GENESIS_HASH`].
    MissingGenesis,
    /// `prev_event_hash` does not equal the previous event's `payload_hash`.
    BrokenLink {
        /// The hash this event actually recorded as its predecessor's.
        recorded: PayloadHash,
        /// The previous event's actual `payload_hash`.
        expected: PayloadHash,
    },
    /// The recomputed hash of `payload` does not match the stored
    /// `payload_hash`.
    PayloadHashMismatch {
        /// The hash stored on the event.
        recorded: PayloadHash,
        /// The hash recomputed from the event's current payload bytes.
        recomputed: PayloadHash,
    },
}

/// Errors that stop verification outright, as opposed to
/// [`ChainMismatch`]es which are collected and reported together.
#[derive(Debug, Error)]
pub enum VerifyError {
    /// A payload could not be canonicalized to recompute its hash.
    #[error("failed to canonicalize payload for event {event_id:?}: {source}")]
    Canonical {
        /// The offending event's id.
        event_id: Option<i64>,
        /// The underlying canonicalization failure.
        #[source]
        source: crate::canonical::CanonicalError,
    },
}

/// Successful verification report for one campaign's chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifyReport {
    /// The campaign verified.
    pub campaign_id: i64,
    /// How many events were checked.
    pub event_count: usize,
    /// The final event's `payload_hash`, i.e. the current chain head.
    pub head_hash: PayloadHash,
}

/// Verify the hash chain for `events`, which must all belong to the same
/// campaign.
///
/// `events` need not be pre-sorted; this function sorts by `replay_ordinal`
/// defensively before checking density and chain links, per `§4.4`.
///
/// # Errors
///
/// Returns [`VerifyError`] if a payload cannot be canonicalized.
///
/// Returns `Ok(Err(mismatches))` — note the report is wrapped in an inner
/// `Result` via [`VerifyOutcome`] — when the chain is internally consistent
/// enough to walk but contains one or more defects.
pub fn verify(campaign_id: i64, events: &[Event]) -> Result<VerifyOutcome, VerifyError> {
    let mut sorted: Vec<&Event> = events.iter().collect();
    sorted.sort_by_key(|event| event.replay_ordinal);

    let mut prev_hash = GENESIS_HASH;

    for (index, event) in sorted.iter().enumerate() {
        #[expect(
            clippy::cast_possible_wrap,
            reason = "campaigns cannot realistically hold i64::MAX events"
        )]
        let expected_ordinal = index as i64;
        if event.replay_ordinal != expected_ordinal {
            return Ok(fail_fast(
                campaign_id,
                event,
                MismatchKind::OrdinalGap {
                    found: event.replay_ordinal,
                    expected: expected_ordinal,
                },
            ));
        }

        if index == 0 && event.prev_event_hash != GENESIS_HASH {
            return Ok(fail_fast(campaign_id, event, MismatchKind::MissingGenesis));
        } else if event.prev_event_hash != prev_hash {
            return Ok(fail_fast(
                campaign_id,
                event,
                MismatchKind::BrokenLink {
                    recorded: event.prev_event_hash,
                    expected: prev_hash,
                },
            ));
        }

        let recomputed =
            hashing::payload_hash(&event.payload).map_err(|source| VerifyError::Canonical {
                event_id: event.event_id,
                source,
            })?;
        if recomputed != event.payload_hash {
            return Ok(fail_fast(
                campaign_id,
                event,
                MismatchKind::PayloadHashMismatch {
                    recorded: event.payload_hash,
                    recomputed,
                },
            ));
        }

        prev_hash = event.payload_hash;
    }

    Ok(VerifyOutcome::Consistent(VerifyReport {
        campaign_id,
        event_count: sorted.len(),
        head_hash: prev_hash,
    }))
}

/// Build the single mismatch the verifier stops at, logging it before
/// returning. The verifier fails fast: it neither keeps scanning for
/// further defects nor attempts repair.
fn fail_fast(campaign_id: i64, event: &Event, kind: MismatchKind) -> VerifyOutcome {
    let mismatch = ChainMismatch {
        event_id: event.event_id,
        replay_ordinal: event.replay_ordinal,
        kind,
    };
    tracing::error!(
        campaign_id,
        replay_ordinal = mismatch.replay_ordinal,
        event_id = ?mismatch.event_id,
        kind = ?mismatch.kind,
        "event.chain_mismatch"
    );
    VerifyOutcome::Mismatched(vec![mismatch])
}

/// Verify `events` and also record `events.hash_mismatch` for every defect
/// found.
///
/// # Errors
///
/// See [`verify`].
pub async fn verify_and_record(
    campaign_id: i64,
    events: &[Event],
    metrics: &dyn MetricsSink,
) -> Result<VerifyOutcome, VerifyError> {
    let outcome = verify(campaign_id, events)?;
    if let VerifyOutcome::Mismatched(mismatches) = &outcome {
        for _ in mismatches {
            metrics.incr_events_hash_mismatch().await;
        }
    }
    Ok(outcome)
}

/// Whether a campaign's chain passed verification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerifyOutcome {
    /// No defects found.
    Consistent(VerifyReport),
    /// One or more defects found; the chain cannot be trusted for replay.
    Mismatched(Vec<ChainMismatch>),
}
