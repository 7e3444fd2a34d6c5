use crate::model::*;

use super::adjacency::{adjacent, resolve_many};
use super::aggregate::aggregate;
use super::classify::classify;
use super::{Engine, EngineError, Entity};

impl Engine {
    pub fn get_user(&self, id: UserId) -> Result<User, EngineError> {
        self.require_user(id)
    }

    /// All users of the tenant, ordered by id and paged.
    pub fn list_users(&self, page: Page) -> Vec<User> {
        self.store.users_page(page)
    }

    pub async fn get_item(&self, id: ItemId) -> Result<Item, EngineError> {
        let st = self.require_item(id)?;
        let guard = st.read().await;
        Ok(guard.item.clone())
    }

    /// A booking is visible to its booker and to the item owner only.
    pub async fn get_booking(
        &self,
        id: BookingId,
        caller: UserId,
    ) -> Result<BookingView, EngineError> {
        let st = self.resolve_booking(id)?;
        let guard = st.read().await;
        let booking = guard
            .booking(id)
            .ok_or(EngineError::NotFound(Entity::Booking, id))?;
        if caller != booking.booker_id && caller != guard.item.owner_id {
            tracing::warn!("user {caller} may not see booking {id}");
            return Err(EngineError::NotVisible(id));
        }
        Ok(BookingView::new(booking, &guard.item))
    }

    /// Bookings where `subject` is the booker (`Role::Booker`) or the item
    /// owner (`Role::Owner`), filtered by `bucket` and paged.
    pub async fn list_bookings(
        &self,
        subject: UserId,
        role: Role,
        bucket: Bucket,
        page: Page,
    ) -> Result<Vec<BookingView>, EngineError> {
        self.require_user(subject)?;
        let now = self.now();

        let item_ids = match role {
            Role::Booker => self.store.items_booked_by(subject),
            Role::Owner => self.store.items_of_owner(subject),
        };
        let mut views = Vec::new();
        for item_id in item_ids {
            let Some(st) = self.store.get_item(item_id) else {
                continue;
            };
            let guard = st.read().await;
            views.extend(
                guard
                    .bookings
                    .iter()
                    .filter(|b| role == Role::Owner || b.booker_id == subject)
                    .map(|b| BookingView::new(b, &guard.item)),
            );
        }
        Ok(classify(views, bucket, now, page))
    }

    /// Item detail. Only the owner sees the last/next approved bookings.
    pub async fn item_view(&self, item_id: ItemId, viewer: UserId) -> Result<ItemView, EngineError> {
        let st = self.require_item(item_id)?;
        let now = self.now();
        let guard = st.read().await;
        let adjacent = if viewer == guard.item.owner_id {
            adjacent(guard.approved(), now)
        } else {
            Adjacent::default()
        };
        Ok(ItemView {
            item: guard.item.clone(),
            adjacent,
        })
    }

    /// Inventory dashboard: the owner's items by id, each with its adjacent
    /// approved bookings resolved against one `now`.
    pub async fn owner_items(&self, owner: UserId, page: Page) -> Result<Vec<ItemView>, EngineError> {
        self.require_user(owner)?;
        let now = self.now();

        let mut items = Vec::new();
        let mut approved = Vec::new();
        for item_id in page.apply(self.store.items_of_owner(owner)) {
            let Some(st) = self.store.get_item(item_id) else {
                continue;
            };
            let guard = st.read().await;
            items.push(guard.item.clone());
            approved.extend(guard.approved().cloned());
        }
        Ok(resolve_many(items, approved, now))
    }

    async fn items_answering(&self, requests: &[ItemRequest]) -> Vec<Item> {
        let mut items = Vec::new();
        for request in requests {
            for item_id in self.store.items_for_request(request.id) {
                if let Some(st) = self.store.get_item(item_id) {
                    items.push(st.read().await.item.clone());
                }
            }
        }
        items
    }

    /// The caller's own requests, by id, with the items offered for each.
    pub async fn my_requests(&self, caller: UserId) -> Result<Vec<RequestView>, EngineError> {
        self.require_user(caller)?;
        let requests = self.store.requests_of(caller);
        let items = self.items_answering(&requests).await;
        Ok(aggregate(requests, items))
    }

    /// Everyone else's requests, newest first.
    pub async fn other_requests(
        &self,
        caller: UserId,
        page: Page,
    ) -> Result<Vec<RequestView>, EngineError> {
        self.require_user(caller)?;
        let requests = page.apply(self.store.requests_not_of(caller));
        let items = self.items_answering(&requests).await;
        Ok(aggregate(requests, items))
    }

    pub async fn request_view(
        &self,
        id: RequestId,
        caller: UserId,
    ) -> Result<RequestView, EngineError> {
        self.require_user(caller)?;
        let request = self.require_request(id)?;
        let requests = vec![request];
        let items = self.items_answering(&requests).await;
        aggregate(requests, items)
            .pop()
            .ok_or(EngineError::NotFound(Entity::Request, id))
    }
}
