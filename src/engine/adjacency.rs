use std::collections::HashMap;

use crate::model::*;

/// Last and next approved booking relative to `now`.
///
/// `approved` must be in ascending start order. `last` is the booking with
/// the greatest start strictly before `now` (an in-progress booking counts);
/// `next` is the first one starting strictly after `now`, where the scan stops.
pub fn adjacent<'a>(approved: impl IntoIterator<Item = &'a Booking>, now: Ms) -> Adjacent {
    let mut out = Adjacent::default();
    for booking in approved {
        if booking.span.start < now {
            out.last = Some(BookingBrief::from(booking));
        } else if booking.span.start > now {
            out.next = Some(BookingBrief::from(booking));
            break;
        }
    }
    out
}

/// Batch form for the owner dashboard: one bulk list of approved bookings,
/// grouped by item id and resolved per item against the same `now`.
pub fn resolve_many(items: Vec<Item>, mut approved: Vec<Booking>, now: Ms) -> Vec<ItemView> {
    approved.sort_by_key(|b| (b.item_id, b.span.start));
    let mut by_item: HashMap<ItemId, Vec<Booking>> = HashMap::new();
    for booking in approved {
        by_item.entry(booking.item_id).or_default().push(booking);
    }
    items
        .into_iter()
        .map(|item| {
            let adjacent = by_item
                .get(&item.id)
                .map(|bookings| adjacent(bookings, now))
                .unwrap_or_default();
            ItemView { item, adjacent }
        })
        .collect()
}
