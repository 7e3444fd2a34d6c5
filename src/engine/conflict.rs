use crate::limits::*;
use crate::model::*;

use super::EngineError;

pub(crate) fn validate_span(span: &Span) -> Result<(), EngineError> {
    if span.start < MIN_VALID_TIMESTAMP_MS || span.end > MAX_VALID_TIMESTAMP_MS {
        return Err(EngineError::LimitExceeded("timestamp out of range"));
    }
    if span.duration_ms() > MAX_BOOKING_DURATION_MS {
        return Err(EngineError::LimitExceeded("booking too long"));
    }
    Ok(())
}

/// First non-rejected booking on the item whose span overlaps `span`.
pub fn find_conflict(st: &ItemState, span: &Span) -> Option<BookingId> {
    st.overlapping(span)
        .find(|b| b.status.blocks_slot())
        .map(|b| b.id)
}

pub fn has_conflict(st: &ItemState, span: &Span) -> bool {
    find_conflict(st, span).is_some()
}

pub(crate) fn check_no_conflict(st: &ItemState, span: &Span) -> Result<(), EngineError> {
    match find_conflict(st, span) {
        Some(id) => Err(EngineError::Conflict(id)),
        None => Ok(()),
    }
}
