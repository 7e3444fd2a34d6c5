use tokio::sync::oneshot;

use crate::limits::*;
use crate::model::*;
use crate::observability;

use super::conflict::{check_no_conflict, validate_span};
use super::workflow::{Decision, transition};
use super::{Engine, EngineError, Entity, WalCommand};

fn check_text(
    value: &str,
    max: usize,
    blank: &'static str,
    too_long: &'static str,
) -> Result<(), EngineError> {
    if value.trim().is_empty() {
        return Err(EngineError::InvalidField(blank));
    }
    if value.len() > max {
        return Err(EngineError::LimitExceeded(too_long));
    }
    Ok(())
}

fn check_name(name: &str) -> Result<(), EngineError> {
    check_text(name, MAX_NAME_LEN, "name must not be blank", "name too long")
}

fn check_description(description: &str) -> Result<(), EngineError> {
    check_text(
        description,
        MAX_DESCRIPTION_LEN,
        "description must not be blank",
        "description too long",
    )
}

fn check_email(email: &str) -> Result<(), EngineError> {
    check_text(email, MAX_EMAIL_LEN, "email must not be blank", "email too long")?;
    match email.split_once('@') {
        Some((local, domain)) if !local.is_empty() && !domain.is_empty() => Ok(()),
        _ => Err(EngineError::InvalidField("email must look like local@domain")),
    }
}

impl Engine {
    // ── Users, items, requests ───────────────────────────────

    pub async fn register_user(&self, name: String, email: String) -> Result<User, EngineError> {
        check_name(&name)?;
        check_email(&email)?;
        if self.store.user_count() >= MAX_USERS_PER_TENANT {
            return Err(EngineError::LimitExceeded("too many users"));
        }

        let _gate = self.mutation_gate().await;
        let id = self.store.user_ids.next();
        if !self.store.reserve_email(&email, id) {
            tracing::warn!("email {email} already registered");
            return Err(EngineError::DuplicateEmail(email));
        }

        let event = Event::UserRegistered {
            id,
            name: name.clone(),
            email: email.clone(),
        };
        if let Err(e) = self.persist(&event).await {
            self.store.release_email(&email);
            return Err(e);
        }
        tracing::debug!("registered user {id}");
        Ok(User { id, name, email })
    }

    /// Partial profile update, self only. A new email must be unique; the old
    /// one is released once the change is durable.
    pub async fn update_user(
        &self,
        id: UserId,
        actor: UserId,
        name: Option<String>,
        email: Option<String>,
    ) -> Result<User, EngineError> {
        if let Some(n) = &name {
            check_name(n)?;
        }
        if let Some(e) = &email {
            check_email(e)?;
        }

        let _gate = self.mutation_gate().await;
        let current = self.require_user(id)?;
        if actor != id {
            tracing::warn!("user {actor} tried to edit user {id}");
            return Err(EngineError::NotSelf { user: id, actor });
        }

        let name = name.unwrap_or(current.name);
        let email = email.unwrap_or_else(|| current.email.clone());
        let email_changed = email.to_lowercase() != current.email.to_lowercase();
        if email_changed && !self.store.reserve_email(&email, id) {
            tracing::warn!("email {email} already registered");
            return Err(EngineError::DuplicateEmail(email));
        }

        let event = Event::UserUpdated {
            id,
            name: name.clone(),
            email: email.clone(),
        };
        if let Err(e) = self.persist(&event).await {
            if email_changed {
                self.store.release_email(&email);
            }
            return Err(e);
        }
        Ok(User { id, name, email })
    }

    /// List a new item owned by `owner`, optionally in answer to a request.
    pub async fn list_item(
        &self,
        owner: UserId,
        name: String,
        description: String,
        available: bool,
        request_id: Option<RequestId>,
    ) -> Result<Item, EngineError> {
        self.require_user(owner)?;
        check_name(&name)?;
        check_description(&description)?;
        if !available {
            return Err(EngineError::InvalidField("a new item must be available"));
        }
        if let Some(rid) = request_id {
            self.require_request(rid)?;
        }
        if self.store.item_count() >= MAX_ITEMS_PER_TENANT {
            return Err(EngineError::LimitExceeded("too many items"));
        }

        let _gate = self.mutation_gate().await;
        let id = self.store.item_ids.next();
        let item = Item {
            id,
            owner_id: owner,
            name,
            description,
            available,
            request_id,
        };
        self.persist(&Event::ItemListed {
            id,
            owner_id: owner,
            name: item.name.clone(),
            description: item.description.clone(),
            available,
            request_id,
        })
        .await?;
        Ok(item)
    }

    /// Owner-only partial update. `None` keeps the current value.
    pub async fn update_item(
        &self,
        id: ItemId,
        actor: UserId,
        name: Option<String>,
        description: Option<String>,
        available: Option<bool>,
    ) -> Result<Item, EngineError> {
        if let Some(n) = &name {
            check_name(n)?;
        }
        if let Some(d) = &description {
            check_description(d)?;
        }

        let _gate = self.mutation_gate().await;
        let st = self.require_item(id)?;
        let mut guard = st.write().await;
        if guard.item.owner_id != actor {
            tracing::warn!("user {actor} tried to update item {id}");
            return Err(EngineError::NotOwner { item: id, actor });
        }

        let event = Event::ItemUpdated {
            id,
            name: name.unwrap_or_else(|| guard.item.name.clone()),
            description: description.unwrap_or_else(|| guard.item.description.clone()),
            available: available.unwrap_or(guard.item.available),
        };
        self.persist_to_item(&mut guard, &event).await?;
        Ok(guard.item.clone())
    }

    pub async fn open_request(
        &self,
        requester: UserId,
        description: String,
    ) -> Result<ItemRequest, EngineError> {
        self.require_user(requester)?;
        check_description(&description)?;

        let _gate = self.mutation_gate().await;
        let request = ItemRequest {
            id: self.store.request_ids.next(),
            requester_id: requester,
            description,
            created: self.now(),
        };
        self.persist(&Event::RequestOpened {
            id: request.id,
            requester_id: requester,
            description: request.description.clone(),
            created: request.created,
        })
        .await?;
        Ok(request)
    }

    // ── Bookings ─────────────────────────────────────────────

    /// Request `[start, end)` on an item. The new booking starts WAITING.
    ///
    /// The whole check-and-insert runs under the item's write lock, so two
    /// overlapping requests for the same item serialize and the second one
    /// sees the first.
    pub async fn create_booking(
        &self,
        item_id: ItemId,
        booker_id: UserId,
        start: Ms,
        end: Ms,
    ) -> Result<BookingView, EngineError> {
        let st = self.require_item(item_id)?;
        self.require_user(booker_id)?;
        let now = self.now();

        let _gate = self.mutation_gate().await;
        let mut guard = st.write().await;

        if !guard.item.available {
            tracing::warn!("booking refused: item {item_id} unavailable");
            return Err(EngineError::ItemUnavailable(item_id));
        }
        if start >= end {
            return Err(EngineError::InvalidSpan { start, end });
        }
        if start < now {
            return Err(EngineError::StartInPast { start, now });
        }
        let span = Span::new(start, end);
        validate_span(&span)?;
        if guard.item.owner_id == booker_id {
            tracing::warn!("owner {booker_id} tried to book own item {item_id}");
            return Err(EngineError::SelfBooking(item_id));
        }
        if guard.bookings.len() >= MAX_BOOKINGS_PER_ITEM {
            return Err(EngineError::LimitExceeded("too many bookings on item"));
        }
        if let Err(e) = check_no_conflict(&guard, &span) {
            metrics::counter!(observability::BOOKING_CONFLICTS_TOTAL).increment(1);
            tracing::warn!("booking on item {item_id} refused: {e}");
            return Err(e);
        }

        let id = self.store.booking_ids.next();
        let event = Event::BookingRequested {
            id,
            item_id,
            booker_id,
            span,
        };
        self.persist_to_item(&mut guard, &event).await?;
        metrics::counter!(observability::BOOKINGS_CREATED_TOTAL).increment(1);

        let booking = guard
            .booking(id)
            .ok_or(EngineError::NotFound(Entity::Booking, id))?;
        Ok(BookingView::new(booking, &guard.item))
    }

    /// Owner's decision on a WAITING booking.
    pub async fn decide_booking(
        &self,
        id: BookingId,
        actor: UserId,
        decision: Decision,
    ) -> Result<BookingView, EngineError> {
        let st = self.resolve_booking(id)?;

        let _gate = self.mutation_gate().await;
        let mut guard = st.write().await;
        let booking = guard
            .booking(id)
            .ok_or(EngineError::NotFound(Entity::Booking, id))?;
        let status = transition(booking, &guard.item, actor, decision).inspect_err(|e| {
            tracing::warn!("decision on booking {id} by {actor} refused: {e}");
        })?;

        let event = Event::BookingDecided {
            id,
            item_id: guard.item.id,
            status,
        };
        self.persist_to_item(&mut guard, &event).await?;
        metrics::counter!(observability::BOOKING_DECISIONS_TOTAL, "status" => status.as_str())
            .increment(1);

        let booking = guard
            .booking(id)
            .ok_or(EngineError::NotFound(Entity::Booking, id))?;
        Ok(BookingView::new(booking, &guard.item))
    }

    pub async fn approve_booking(
        &self,
        id: BookingId,
        actor: UserId,
    ) -> Result<BookingView, EngineError> {
        self.decide_booking(id, actor, Decision::Approve).await
    }

    pub async fn reject_booking(
        &self,
        id: BookingId,
        actor: UserId,
    ) -> Result<BookingView, EngineError> {
        self.decide_booking(id, actor, Decision::Reject).await
    }

    // ── WAL maintenance ──────────────────────────────────────

    /// Rewrite the WAL with the minimal event set that rebuilds current state.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let _exclusive = self.gate.write().await;

        let mut events: Vec<Event> = self
            .store
            .users()
            .into_iter()
            .map(|u| Event::UserRegistered {
                id: u.id,
                name: u.name,
                email: u.email,
            })
            .collect();
        events.extend(self.store.requests().into_iter().map(|r| Event::RequestOpened {
            id: r.id,
            requester_id: r.requester_id,
            description: r.description,
            created: r.created,
        }));

        for item_id in self.store.item_ids() {
            let Some(st) = self.store.get_item(item_id) else {
                continue;
            };
            let guard = st.read().await;
            let item = &guard.item;
            events.push(Event::ItemListed {
                id: item.id,
                owner_id: item.owner_id,
                name: item.name.clone(),
                description: item.description.clone(),
                available: item.available,
                request_id: item.request_id,
            });
            for b in &guard.bookings {
                events.push(Event::BookingRequested {
                    id: b.id,
                    item_id: b.item_id,
                    booker_id: b.booker_id,
                    span: b.span,
                });
                if b.status != BookingStatus::Waiting {
                    events.push(Event::BookingDecided {
                        id: b.id,
                        item_id: b.item_id,
                        status: b.status,
                    });
                }
            }
        }

        let count = events.len();
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))?;
        metrics::counter!(observability::WAL_COMPACTIONS_TOTAL).increment(1);
        tracing::debug!("WAL compacted to {count} events");
        Ok(())
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}
