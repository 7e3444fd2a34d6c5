use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::sync::RwLock;

use crate::model::*;

pub type SharedItemState = Arc<RwLock<ItemState>>;

/// Monotonic id sequence for one table. Ids start at 1.
#[derive(Debug, Default)]
pub struct Sequence(AtomicI64);

impl Sequence {
    pub fn next(&self) -> i64 {
        self.0.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Make sure future ids are allocated above `id` (WAL replay).
    pub fn observe(&self, id: i64) {
        self.0.fetch_max(id, Ordering::SeqCst);
    }

    pub fn current(&self) -> i64 {
        self.0.load(Ordering::SeqCst)
    }
}

/// In-memory tables and secondary indexes.
#[derive(Default)]
pub struct InMemoryStore {
    users: DashMap<UserId, User>,
    /// Lowercased email → user id.
    emails: DashMap<String, UserId>,
    items: DashMap<ItemId, SharedItemState>,
    items_by_owner: DashMap<UserId, Vec<ItemId>>,
    items_by_request: DashMap<RequestId, Vec<ItemId>>,
    requests: DashMap<RequestId, ItemRequest>,
    requests_by_requester: DashMap<UserId, Vec<RequestId>>,
    /// Reverse lookup: booking id → item id.
    booking_to_item: DashMap<BookingId, ItemId>,
    bookings_by_booker: DashMap<UserId, Vec<BookingId>>,

    pub user_ids: Sequence,
    pub item_ids: Sequence,
    pub request_ids: Sequence,
    pub booking_ids: Sequence,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    // ── Users ────────────────────────────────────────────────

    pub fn user_count(&self) -> usize {
        self.users.len()
    }

    pub fn get_user(&self, id: UserId) -> Option<User> {
        self.users.get(&id).map(|e| e.value().clone())
    }

    pub fn users(&self) -> Vec<User> {
        let mut out: Vec<User> = self.users.iter().map(|e| e.value().clone()).collect();
        out.sort_by_key(|u| u.id);
        out
    }

    /// Users ordered by id.
    pub fn users_page(&self, page: Page) -> Vec<User> {
        page.apply(self.users())
    }

    /// Claim `email` for `id`. Returns false if someone already holds it.
    pub fn reserve_email(&self, email: &str, id: UserId) -> bool {
        match self.emails.entry(email.to_lowercase()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(id);
                true
            }
        }
    }

    pub fn release_email(&self, email: &str) {
        self.emails.remove(&email.to_lowercase());
    }

    // ── Items ────────────────────────────────────────────────

    pub fn item_count(&self) -> usize {
        self.items.len()
    }

    pub fn get_item(&self, id: ItemId) -> Option<SharedItemState> {
        self.items.get(&id).map(|e| e.value().clone())
    }

    /// Owner's item ids in ascending order.
    pub fn items_of_owner(&self, owner: UserId) -> Vec<ItemId> {
        sorted(self.items_by_owner.get(&owner).map(|e| e.value().clone()))
    }

    pub fn items_for_request(&self, request: RequestId) -> Vec<ItemId> {
        sorted(self.items_by_request.get(&request).map(|e| e.value().clone()))
    }

    pub fn item_ids(&self) -> Vec<ItemId> {
        let mut ids: Vec<ItemId> = self.items.iter().map(|e| *e.key()).collect();
        ids.sort_unstable();
        ids
    }

    // ── Requests ─────────────────────────────────────────────

    pub fn get_request(&self, id: RequestId) -> Option<ItemRequest> {
        self.requests.get(&id).map(|e| e.value().clone())
    }

    pub fn requests_of(&self, requester: UserId) -> Vec<ItemRequest> {
        sorted(self.requests_by_requester.get(&requester).map(|e| e.value().clone()))
            .into_iter()
            .filter_map(|id| self.get_request(id))
            .collect()
    }

    /// Everyone's requests except `requester`'s, newest first.
    pub fn requests_not_of(&self, requester: UserId) -> Vec<ItemRequest> {
        let mut out: Vec<ItemRequest> = self
            .requests
            .iter()
            .filter(|e| e.value().requester_id != requester)
            .map(|e| e.value().clone())
            .collect();
        out.sort_by(|a, b| b.created.cmp(&a.created).then(b.id.cmp(&a.id)));
        out
    }

    pub fn requests(&self) -> Vec<ItemRequest> {
        let mut out: Vec<ItemRequest> = self.requests.iter().map(|e| e.value().clone()).collect();
        out.sort_by_key(|r| r.id);
        out
    }

    // ── Bookings index ───────────────────────────────────────

    pub fn item_of_booking(&self, id: BookingId) -> Option<ItemId> {
        self.booking_to_item.get(&id).map(|e| *e.value())
    }

    /// Item ids (ascending, deduplicated) on which `booker` holds bookings.
    pub fn items_booked_by(&self, booker: UserId) -> Vec<ItemId> {
        let booking_ids = self
            .bookings_by_booker
            .get(&booker)
            .map(|e| e.value().clone())
            .unwrap_or_default();
        let mut items: Vec<ItemId> = booking_ids
            .iter()
            .filter_map(|id| self.item_of_booking(*id))
            .collect();
        items.sort_unstable();
        items.dedup();
        items
    }

    // ── Event application ────────────────────────────────────

    /// Apply a table-level event (everything that is not scoped to an
    /// existing item's lock).
    pub fn apply_event(&self, event: &Event) {
        match event {
            Event::UserRegistered { id, name, email } => {
                self.user_ids.observe(*id);
                self.emails.insert(email.to_lowercase(), *id);
                self.users.insert(
                    *id,
                    User {
                        id: *id,
                        name: name.clone(),
                        email: email.clone(),
                    },
                );
            }
            Event::UserUpdated { id, name, email } => {
                if let Some(mut user) = self.users.get_mut(id) {
                    if user.email.to_lowercase() != email.to_lowercase() {
                        self.emails.remove(&user.email.to_lowercase());
                    }
                    user.name = name.clone();
                    user.email = email.clone();
                    drop(user);
                    self.emails.insert(email.to_lowercase(), *id);
                }
            }
            Event::RequestOpened {
                id,
                requester_id,
                description,
                created,
            } => {
                self.request_ids.observe(*id);
                self.requests.insert(
                    *id,
                    ItemRequest {
                        id: *id,
                        requester_id: *requester_id,
                        description: description.clone(),
                        created: *created,
                    },
                );
                self.requests_by_requester.entry(*requester_id).or_default().push(*id);
            }
            Event::ItemListed {
                id,
                owner_id,
                name,
                description,
                available,
                request_id,
            } => {
                self.item_ids.observe(*id);
                let item = Item {
                    id: *id,
                    owner_id: *owner_id,
                    name: name.clone(),
                    description: description.clone(),
                    available: *available,
                    request_id: *request_id,
                };
                self.items.insert(*id, Arc::new(RwLock::new(ItemState::new(item))));
                self.items_by_owner.entry(*owner_id).or_default().push(*id);
                if let Some(rid) = request_id {
                    self.items_by_request.entry(*rid).or_default().push(*id);
                }
            }
            Event::ItemUpdated { .. } | Event::BookingRequested { .. } | Event::BookingDecided { .. } => {}
        }
    }

    /// Apply an item-scoped event (no locking; caller holds the item's write lock).
    pub fn apply_to_item(&self, st: &mut ItemState, event: &Event) {
        match event {
            Event::ItemUpdated {
                name,
                description,
                available,
                ..
            } => {
                st.item.name = name.clone();
                st.item.description = description.clone();
                st.item.available = *available;
            }
            Event::BookingRequested {
                id,
                item_id,
                booker_id,
                span,
            } => {
                self.booking_ids.observe(*id);
                st.insert_booking(Booking {
                    id: *id,
                    item_id: *item_id,
                    booker_id: *booker_id,
                    span: *span,
                    status: BookingStatus::Waiting,
                });
                self.booking_to_item.insert(*id, *item_id);
                self.bookings_by_booker.entry(*booker_id).or_default().push(*id);
            }
            Event::BookingDecided { id, status, .. } => {
                if let Some(b) = st.booking_mut(*id) {
                    b.status = *status;
                }
            }
            Event::UserRegistered { .. }
            | Event::UserUpdated { .. }
            | Event::RequestOpened { .. }
            | Event::ItemListed { .. } => {}
        }
    }
}

fn sorted(ids: Option<Vec<i64>>) -> Vec<i64> {
    let mut ids = ids.unwrap_or_default();
    ids.sort_unstable();
    ids
}

/// Item id an item-scoped event belongs to.
pub(super) fn event_item_id(event: &Event) -> Option<ItemId> {
    match event {
        Event::ItemUpdated { id, .. } => Some(*id),
        Event::BookingRequested { item_id, .. } | Event::BookingDecided { item_id, .. } => {
            Some(*item_id)
        }
        Event::UserRegistered { .. }
        | Event::UserUpdated { .. }
        | Event::RequestOpened { .. }
        | Event::ItemListed { .. } => None,
    }
}
