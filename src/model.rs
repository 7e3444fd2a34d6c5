use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Unix milliseconds, the only time type.
pub type Ms = i64;

pub type UserId = i64;
pub type ItemId = i64;
pub type RequestId = i64;
pub type BookingId = i64;

/// Half-open interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: Ms,
    pub end: Ms,
}

impl Span {
    pub fn new(start: Ms, end: Ms) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }

    pub fn duration_ms(&self) -> Ms {
        self.end - self.start
    }

    /// Back-to-back spans (`a.end == b.start`) do not overlap.
    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }

    pub fn contains_instant(&self, t: Ms) -> bool {
        self.start <= t && t < self.end
    }
}

// ── Booking status ───────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BookingStatus {
    Waiting,
    Approved,
    Rejected,
}

impl BookingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BookingStatus::Waiting => "WAITING",
            BookingStatus::Approved => "APPROVED",
            BookingStatus::Rejected => "REJECTED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, BookingStatus::Waiting)
    }

    /// Rejected bookings never hold their slot.
    pub fn blocks_slot(&self) -> bool {
        !matches!(self, BookingStatus::Rejected)
    }
}

impl fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Listing buckets ──────────────────────────────────────────────

/// Temporal/status filter applied to booking listings.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum Bucket {
    #[default]
    All,
    Current,
    Past,
    Future,
    Waiting,
    Rejected,
}

impl Bucket {
    pub const VARIANTS: [Bucket; 6] = [
        Bucket::All,
        Bucket::Current,
        Bucket::Past,
        Bucket::Future,
        Bucket::Waiting,
        Bucket::Rejected,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Bucket::All => "ALL",
            Bucket::Current => "CURRENT",
            Bucket::Past => "PAST",
            Bucket::Future => "FUTURE",
            Bucket::Waiting => "WAITING",
            Bucket::Rejected => "REJECTED",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownBucket(pub String);

impl FromStr for Bucket {
    type Err = UnknownBucket;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Bucket::VARIANTS
            .into_iter()
            .find(|b| b.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| UnknownBucket(s.to_string()))
    }
}

/// Which side of a booking a listing subject is matched against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Booker,
    Owner,
}

/// Zero-based page index and page size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub from: usize,
    pub size: usize,
}

impl Page {
    pub const DEFAULT_SIZE: usize = 10;

    pub fn offset(&self) -> usize {
        self.from.saturating_mul(self.size)
    }

    /// Slice `items` down to this page.
    pub fn apply<T>(&self, items: Vec<T>) -> Vec<T> {
        items.into_iter().skip(self.offset()).take(self.size).collect()
    }
}

impl Default for Page {
    fn default() -> Self {
        Self {
            from: 0,
            size: Self::DEFAULT_SIZE,
        }
    }
}

// ── Entities ─────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub id: UserId,
    pub name: String,
    pub email: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Item {
    pub id: ItemId,
    pub owner_id: UserId,
    pub name: String,
    pub description: String,
    pub available: bool,
    pub request_id: Option<RequestId>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemRequest {
    pub id: RequestId,
    pub requester_id: UserId,
    pub description: String,
    pub created: Ms,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Booking {
    pub id: BookingId,
    pub item_id: ItemId,
    pub booker_id: UserId,
    pub span: Span,
    pub status: BookingStatus,
}

/// An item row together with every booking ever made against it.
#[derive(Debug, Clone)]
pub struct ItemState {
    pub item: Item,
    /// Sorted by `span.start`.
    pub bookings: Vec<Booking>,
}

impl ItemState {
    pub fn new(item: Item) -> Self {
        Self {
            item,
            bookings: Vec::new(),
        }
    }

    /// Insert booking maintaining sort order by span.start.
    pub fn insert_booking(&mut self, booking: Booking) {
        let pos = self
            .bookings
            .binary_search_by_key(&booking.span.start, |b| b.span.start)
            .unwrap_or_else(|e| e);
        self.bookings.insert(pos, booking);
    }

    pub fn booking(&self, id: BookingId) -> Option<&Booking> {
        self.bookings.iter().find(|b| b.id == id)
    }

    pub fn booking_mut(&mut self, id: BookingId) -> Option<&mut Booking> {
        self.bookings.iter_mut().find(|b| b.id == id)
    }

    /// Return only bookings whose span overlaps the query window.
    /// Uses binary search to skip bookings starting at or after `query.end`.
    pub fn overlapping(&self, query: &Span) -> impl Iterator<Item = &Booking> {
        let right_bound = self.bookings.partition_point(|b| b.span.start < query.end);
        self.bookings[..right_bound]
            .iter()
            .filter(move |b| b.span.end > query.start)
    }

    /// Approved bookings in ascending start order.
    pub fn approved(&self) -> impl Iterator<Item = &Booking> {
        self.bookings
            .iter()
            .filter(|b| b.status == BookingStatus::Approved)
    }
}

/// WAL record payloads. Flat, no nesting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    UserRegistered {
        id: UserId,
        name: String,
        email: String,
    },
    UserUpdated {
        id: UserId,
        name: String,
        email: String,
    },
    ItemListed {
        id: ItemId,
        owner_id: UserId,
        name: String,
        description: String,
        available: bool,
        request_id: Option<RequestId>,
    },
    ItemUpdated {
        id: ItemId,
        name: String,
        description: String,
        available: bool,
    },
    RequestOpened {
        id: RequestId,
        requester_id: UserId,
        description: String,
        created: Ms,
    },
    BookingRequested {
        id: BookingId,
        item_id: ItemId,
        booker_id: UserId,
        span: Span,
    },
    BookingDecided {
        id: BookingId,
        item_id: ItemId,
        status: BookingStatus,
    },
}

// ── Query result types ───────────────────────────────────────────

/// A booking joined with the item data listings need.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookingView {
    pub id: BookingId,
    pub item_id: ItemId,
    pub item_name: String,
    pub owner_id: UserId,
    pub booker_id: UserId,
    pub start: Ms,
    pub end: Ms,
    pub status: BookingStatus,
}

impl BookingView {
    pub fn new(booking: &Booking, item: &Item) -> Self {
        Self {
            id: booking.id,
            item_id: item.id,
            item_name: item.name.clone(),
            owner_id: item.owner_id,
            booker_id: booking.booker_id,
            start: booking.span.start,
            end: booking.span.end,
            status: booking.status,
        }
    }

    pub fn span(&self) -> Span {
        Span::new(self.start, self.end)
    }
}

/// Compact booking summary attached to an item view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookingBrief {
    pub id: BookingId,
    pub booker_id: UserId,
    pub start: Ms,
    pub end: Ms,
}

impl From<&Booking> for BookingBrief {
    fn from(b: &Booking) -> Self {
        Self {
            id: b.id,
            booker_id: b.booker_id,
            start: b.span.start,
            end: b.span.end,
        }
    }
}

/// Most recent started and nearest upcoming approved booking of an item.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Adjacent {
    pub last: Option<BookingBrief>,
    pub next: Option<BookingBrief>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemView {
    pub item: Item,
    pub adjacent: Adjacent,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestView {
    pub request: ItemRequest,
    pub items: Vec<Item>,
}
