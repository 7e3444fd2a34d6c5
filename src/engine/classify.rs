use crate::limits::MAX_PAGE_SIZE;
use crate::model::*;

use super::EngineError;

/// Does a booking fall into `bucket` at instant `now`?
///
/// CURRENT/PAST/FUTURE use half-open boundaries (`start <= now < end` is
/// current, `end <= now` is past, `start > now` is future) so the three
/// partition every booking at any instant.
pub fn matches(bucket: Bucket, span: &Span, status: BookingStatus, now: Ms) -> bool {
    match bucket {
        Bucket::All => true,
        Bucket::Waiting => status == BookingStatus::Waiting,
        Bucket::Rejected => status == BookingStatus::Rejected,
        Bucket::Current => span.contains_instant(now),
        Bucket::Past => span.end <= now,
        Bucket::Future => span.start > now,
    }
}

/// Filter, order (start desc, id desc) and page a subject's bookings.
pub fn classify(
    mut bookings: Vec<BookingView>,
    bucket: Bucket,
    now: Ms,
    page: Page,
) -> Vec<BookingView> {
    bookings.retain(|b| matches(bucket, &b.span(), b.status, now));
    bookings.sort_by(|a, b| b.start.cmp(&a.start).then(b.id.cmp(&a.id)));
    page.apply(bookings)
}

pub fn parse_bucket(state: Option<&str>) -> Result<Bucket, EngineError> {
    match state {
        None => Ok(Bucket::All),
        Some(s) => s
            .parse()
            .map_err(|_| EngineError::UnsupportedState("UNSUPPORTED_STATUS".into())),
    }
}

/// `from` is a zero-based page index; `size` must be positive.
pub fn parse_page(from: Option<i64>, size: Option<i64>) -> Result<Page, EngineError> {
    let from = from.unwrap_or(0);
    let size = size.unwrap_or(Page::DEFAULT_SIZE as i64);
    if from < 0 {
        return Err(EngineError::InvalidPage("from must be >= 0"));
    }
    if size <= 0 {
        return Err(EngineError::InvalidPage("size must be > 0"));
    }
    if size as usize > MAX_PAGE_SIZE {
        return Err(EngineError::LimitExceeded("page size too large"));
    }
    Ok(Page {
        from: from as usize,
        size: size as usize,
    })
}
