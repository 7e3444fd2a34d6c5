use super::*;
use crate::clock::ManualClock;
use crate::limits::*;

const NOW: Ms = 1_800_000_000_000;
const H: Ms = 3_600_000; // 1 hour in ms
const DAY: Ms = 24 * H;

fn test_wal_path(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join("rentd_test_engine");
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join(name);
    let _ = std::fs::remove_file(&path);
    path
}

fn engine_at(name: &str, now: Ms) -> (Engine, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new(now));
    let engine = Engine::new(test_wal_path(name), clock.clone()).unwrap();
    (engine, clock)
}

/// Owner (with one listed item) and a second user who will book it.
async fn owner_item_booker(engine: &Engine) -> (UserId, ItemId, UserId) {
    let owner = engine
        .register_user("Olga".into(), "olga@example.com".into())
        .await
        .unwrap();
    let booker = engine
        .register_user("Boris".into(), "boris@example.com".into())
        .await
        .unwrap();
    let item = engine
        .list_item(owner.id, "drill".into(), "cordless drill".into(), true, None)
        .await
        .unwrap();
    (owner.id, item.id, booker.id)
}

fn ids(views: &[BookingView]) -> Vec<BookingId> {
    views.iter().map(|v| v.id).collect()
}

fn all() -> Page {
    Page { from: 0, size: 100 }
}

// ── Users, items, requests ───────────────────────────────

#[tokio::test]
async fn register_and_lookup_user() {
    let (engine, _) = engine_at("register_user.wal", NOW);
    let user = engine
        .register_user("Ann".into(), "ann@example.com".into())
        .await
        .unwrap();
    assert_eq!(user.id, 1);
    assert_eq!(engine.get_user(1).unwrap(), user);
    assert!(matches!(
        engine.get_user(2),
        Err(EngineError::NotFound(Entity::User, 2))
    ));
}

#[tokio::test]
async fn duplicate_email_rejected_case_insensitively() {
    let (engine, _) = engine_at("duplicate_email.wal", NOW);
    engine
        .register_user("Ann".into(), "ann@example.com".into())
        .await
        .unwrap();
    let err = engine
        .register_user("Other Ann".into(), "ANN@example.com".into())
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::DuplicateEmail(_)));
    assert_eq!(err.kind(), ErrorKind::Duplicate);
    assert_eq!(engine.store.user_count(), 1);
}

#[tokio::test]
async fn user_fields_validated() {
    let (engine, _) = engine_at("user_validation.wal", NOW);
    let blank = engine.register_user("  ".into(), "a@b.c".into()).await;
    assert!(matches!(blank, Err(EngineError::InvalidField(_))));
    let bad_email = engine.register_user("Ann".into(), "not-an-email".into()).await;
    assert!(matches!(bad_email, Err(EngineError::InvalidField(_))));
    let long = engine
        .register_user("x".repeat(MAX_NAME_LEN + 1), "a@b.c".into())
        .await;
    assert!(matches!(long, Err(EngineError::LimitExceeded(_))));
}

#[tokio::test]
async fn user_edits_own_profile_only() {
    let (engine, _) = engine_at("update_user.wal", NOW);
    let ann = engine
        .register_user("Ann".into(), "ann@example.com".into())
        .await
        .unwrap();
    let bob = engine
        .register_user("Bob".into(), "bob@example.com".into())
        .await
        .unwrap();

    let err = engine
        .update_user(ann.id, bob.id, Some("Mallory".into()), None)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::NotSelf { .. }));
    assert_eq!(err.kind(), ErrorKind::Rights);

    // Absent fields keep their value.
    let renamed = engine
        .update_user(ann.id, ann.id, Some("Anna".into()), None)
        .await
        .unwrap();
    assert_eq!(renamed.name, "Anna");
    assert_eq!(renamed.email, "ann@example.com");
    assert_eq!(engine.get_user(ann.id).unwrap(), renamed);
}

#[tokio::test]
async fn changed_email_moves_the_reservation() {
    let (engine, _) = engine_at("update_user_email.wal", NOW);
    let ann = engine
        .register_user("Ann".into(), "ann@example.com".into())
        .await
        .unwrap();
    let bob = engine
        .register_user("Bob".into(), "bob@example.com".into())
        .await
        .unwrap();

    let taken = engine
        .update_user(ann.id, ann.id, None, Some("BOB@example.com".into()))
        .await
        .unwrap_err();
    assert!(matches!(taken, EngineError::DuplicateEmail(_)));
    assert_eq!(engine.get_user(ann.id).unwrap().email, "ann@example.com");

    // Case-only change of one's own address is not a clash.
    engine
        .update_user(bob.id, bob.id, None, Some("Bob@Example.com".into()))
        .await
        .unwrap();

    engine
        .update_user(ann.id, ann.id, None, Some("anna@example.com".into()))
        .await
        .unwrap();
    // The old address is free for a newcomer.
    let newcomer = engine
        .register_user("Other Ann".into(), "ann@example.com".into())
        .await
        .unwrap();
    assert_eq!(newcomer.id, 3);
    let again = engine
        .register_user("Copy".into(), "ANNA@example.com".into())
        .await;
    assert!(matches!(again, Err(EngineError::DuplicateEmail(_))));

    let bad = engine
        .update_user(ann.id, ann.id, None, Some("nope".into()))
        .await;
    assert!(matches!(bad, Err(EngineError::InvalidField(_))));
    let missing = engine.update_user(99, 99, Some("Ghost".into()), None).await;
    assert!(matches!(missing, Err(EngineError::NotFound(Entity::User, 99))));
}

#[tokio::test]
async fn users_listed_by_id() {
    let (engine, _) = engine_at("list_users.wal", NOW);
    for name in ["Ann", "Bob", "Cid"] {
        engine
            .register_user(name.into(), format!("{}@example.com", name.to_lowercase()))
            .await
            .unwrap();
    }
    let names: Vec<String> = engine.list_users(all()).into_iter().map(|u| u.name).collect();
    assert_eq!(names, ["Ann", "Bob", "Cid"]);
    let second_page = engine.list_users(Page { from: 1, size: 2 });
    assert_eq!(second_page.len(), 1);
    assert_eq!(second_page[0].name, "Cid");
}

#[tokio::test]
async fn user_update_survives_replay_and_compaction() {
    let path = test_wal_path("update_user_replay.wal");
    let clock = Arc::new(ManualClock::new(NOW));
    let id = {
        let engine = Engine::new(path.clone(), clock.clone()).unwrap();
        let ann = engine
            .register_user("Ann".into(), "ann@example.com".into())
            .await
            .unwrap();
        engine
            .update_user(ann.id, ann.id, Some("Anna".into()), Some("anna@example.com".into()))
            .await
            .unwrap();
        ann.id
    };

    let engine = Engine::new(path.clone(), clock.clone()).unwrap();
    let user = engine.get_user(id).unwrap();
    assert_eq!((user.name.as_str(), user.email.as_str()), ("Anna", "anna@example.com"));
    engine.compact_wal().await.unwrap();
    drop(engine);

    let engine = Engine::new(path, clock).unwrap();
    assert_eq!(engine.get_user(id).unwrap().email, "anna@example.com");
    let reuse = engine
        .register_user("Ann".into(), "ann@example.com".into())
        .await;
    assert!(reuse.is_ok());
}

#[tokio::test]
async fn new_item_must_be_available_and_owner_must_exist() {
    let (engine, _) = engine_at("item_listing.wal", NOW);
    let owner = engine
        .register_user("Olga".into(), "olga@example.com".into())
        .await
        .unwrap();
    let hidden = engine
        .list_item(owner.id, "saw".into(), "hand saw".into(), false, None)
        .await;
    assert!(matches!(hidden, Err(EngineError::InvalidField(_))));

    let ghost = engine
        .list_item(99, "saw".into(), "hand saw".into(), true, None)
        .await;
    assert!(matches!(ghost, Err(EngineError::NotFound(Entity::User, 99))));

    let unknown_request = engine
        .list_item(owner.id, "saw".into(), "hand saw".into(), true, Some(5))
        .await;
    assert!(matches!(
        unknown_request,
        Err(EngineError::NotFound(Entity::Request, 5))
    ));
}

#[tokio::test]
async fn only_owner_updates_item() {
    let (engine, _) = engine_at("item_update.wal", NOW);
    let (owner, item, other) = owner_item_booker(&engine).await;

    let err = engine
        .update_item(item, other, Some("mine now".into()), None, None)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::NotOwner { .. }));
    assert_eq!(err.kind(), ErrorKind::Rights);

    let updated = engine
        .update_item(item, owner, None, Some("brushless drill".into()), Some(false))
        .await
        .unwrap();
    assert_eq!(updated.name, "drill");
    assert_eq!(updated.description, "brushless drill");
    assert!(!updated.available);
    assert_eq!(engine.get_item(item).await.unwrap(), updated);
}

#[tokio::test]
async fn requests_grouped_with_answering_items() {
    let (engine, clock) = engine_at("requests.wal", NOW);
    let asker = engine
        .register_user("Ann".into(), "ann@example.com".into())
        .await
        .unwrap();
    let lender = engine
        .register_user("Lev".into(), "lev@example.com".into())
        .await
        .unwrap();

    let first = engine
        .open_request(asker.id, "need a ladder".into())
        .await
        .unwrap();
    clock.advance(H);
    let second = engine
        .open_request(asker.id, "need a tent".into())
        .await
        .unwrap();
    clock.advance(H);
    let lenders_own = engine
        .open_request(lender.id, "need a kayak".into())
        .await
        .unwrap();
    assert_eq!(first.created, NOW);
    assert_eq!(second.created, NOW + H);

    let ladder = engine
        .list_item(lender.id, "ladder".into(), "3m".into(), true, Some(first.id))
        .await
        .unwrap();
    let step = engine
        .list_item(lender.id, "step".into(), "1m".into(), true, Some(first.id))
        .await
        .unwrap();

    let mine = engine.my_requests(asker.id).await.unwrap();
    assert_eq!(mine.len(), 2);
    assert_eq!(mine[0].request.id, first.id);
    assert_eq!(
        mine[0].items.iter().map(|i| i.id).collect::<Vec<_>>(),
        vec![ladder.id, step.id]
    );
    assert!(mine[1].items.is_empty());

    // Newest first, never the caller's own.
    let others = engine.other_requests(lender.id, Page::default()).await.unwrap();
    assert_eq!(
        others.iter().map(|v| v.request.id).collect::<Vec<_>>(),
        vec![second.id, first.id]
    );
    let others_page = engine
        .other_requests(lender.id, Page { from: 1, size: 1 })
        .await
        .unwrap();
    assert_eq!(others_page[0].request.id, first.id);
    let for_asker = engine.other_requests(asker.id, Page::default()).await.unwrap();
    assert_eq!(for_asker.len(), 1);
    assert_eq!(for_asker[0].request.id, lenders_own.id);

    let single = engine.request_view(first.id, lender.id).await.unwrap();
    assert_eq!(single.items.len(), 2);
    assert!(matches!(
        engine.request_view(42, lender.id).await,
        Err(EngineError::NotFound(Entity::Request, 42))
    ));
}

// ── Booking creation ─────────────────────────────────────

#[tokio::test]
async fn booking_starts_waiting() {
    let (engine, _) = engine_at("booking_waiting.wal", NOW);
    let (owner, item, booker) = owner_item_booker(&engine).await;

    let view = engine
        .create_booking(item, booker, NOW + DAY, NOW + 2 * DAY)
        .await
        .unwrap();
    assert_eq!(view.status, BookingStatus::Waiting);
    assert_eq!(view.item_name, "drill");
    assert_eq!(view.owner_id, owner);
    assert_eq!(view.booker_id, booker);
    assert_eq!((view.start, view.end), (NOW + DAY, NOW + 2 * DAY));
}

#[tokio::test]
async fn overlapping_waiting_booking_conflicts_with_its_id() {
    let (engine, _) = engine_at("booking_conflict.wal", NOW);
    let (_, item, booker) = owner_item_booker(&engine).await;
    let other = engine
        .register_user("Vera".into(), "vera@example.com".into())
        .await
        .unwrap();

    let existing = engine
        .create_booking(item, booker, NOW + 2 * DAY, NOW + 4 * DAY)
        .await
        .unwrap();
    let err = engine
        .create_booking(item, other.id, NOW + DAY, NOW + 3 * DAY)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Conflict(id) if id == existing.id));
    assert_eq!(err.kind(), ErrorKind::NotFound);
    assert!(err.to_string().contains(&existing.id.to_string()));
}

#[tokio::test]
async fn back_to_back_bookings_allowed() {
    let (engine, _) = engine_at("booking_touching.wal", NOW);
    let (_, item, booker) = owner_item_booker(&engine).await;

    engine
        .create_booking(item, booker, NOW + DAY, NOW + 2 * DAY)
        .await
        .unwrap();
    engine
        .create_booking(item, booker, NOW + 2 * DAY, NOW + 3 * DAY)
        .await
        .unwrap();
    engine
        .create_booking(item, booker, NOW, NOW + DAY)
        .await
        .unwrap();
}

#[tokio::test]
async fn rejected_booking_frees_its_slot() {
    let (engine, _) = engine_at("booking_rejected_slot.wal", NOW);
    let (owner, item, booker) = owner_item_booker(&engine).await;

    let first = engine
        .create_booking(item, booker, NOW + DAY, NOW + 2 * DAY)
        .await
        .unwrap();
    engine.reject_booking(first.id, owner).await.unwrap();
    let second = engine
        .create_booking(item, booker, NOW + DAY, NOW + 2 * DAY)
        .await
        .unwrap();
    assert_ne!(first.id, second.id);
}

#[tokio::test]
async fn approved_booking_still_blocks() {
    let (engine, _) = engine_at("booking_approved_blocks.wal", NOW);
    let (owner, item, booker) = owner_item_booker(&engine).await;

    let first = engine
        .create_booking(item, booker, NOW + DAY, NOW + 2 * DAY)
        .await
        .unwrap();
    engine.approve_booking(first.id, owner).await.unwrap();
    let err = engine
        .create_booking(item, booker, NOW + DAY + H, NOW + DAY + 2 * H)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Conflict(id) if id == first.id));
}

#[tokio::test]
async fn owner_cannot_book_own_item() {
    let (engine, _) = engine_at("booking_self.wal", NOW);
    let (owner, item, _) = owner_item_booker(&engine).await;

    let err = engine
        .create_booking(item, owner, NOW + DAY, NOW + 2 * DAY)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::SelfBooking(i) if i == item));
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[tokio::test]
async fn creation_validation() {
    let (engine, _) = engine_at("booking_validation.wal", NOW);
    let (owner, item, booker) = owner_item_booker(&engine).await;

    let inverted = engine
        .create_booking(item, booker, NOW + 2 * DAY, NOW + DAY)
        .await;
    assert!(matches!(inverted, Err(EngineError::InvalidSpan { .. })));
    let empty = engine
        .create_booking(item, booker, NOW + DAY, NOW + DAY)
        .await;
    assert!(matches!(empty, Err(EngineError::InvalidSpan { .. })));
    let past = engine
        .create_booking(item, booker, NOW - 1, NOW + DAY)
        .await;
    assert!(matches!(past, Err(EngineError::StartInPast { .. })));
    let too_long = engine
        .create_booking(item, booker, NOW, NOW + MAX_BOOKING_DURATION_MS + 1)
        .await;
    assert!(matches!(too_long, Err(EngineError::LimitExceeded(_))));

    let missing_item = engine.create_booking(77, booker, NOW, NOW + DAY).await;
    assert!(matches!(missing_item, Err(EngineError::NotFound(Entity::Item, 77))));
    let missing_booker = engine.create_booking(item, 88, NOW, NOW + DAY).await;
    assert!(matches!(missing_booker, Err(EngineError::NotFound(Entity::User, 88))));

    engine
        .update_item(item, owner, None, None, Some(false))
        .await
        .unwrap();
    let unavailable = engine
        .create_booking(item, booker, NOW + DAY, NOW + 2 * DAY)
        .await
        .unwrap_err();
    assert!(matches!(unavailable, EngineError::ItemUnavailable(_)));
    assert_eq!(unavailable.kind(), ErrorKind::Validation);
}

#[tokio::test]
async fn unavailable_item_keeps_existing_bookings() {
    let (engine, _) = engine_at("booking_unavailable_keeps.wal", NOW);
    let (owner, item, booker) = owner_item_booker(&engine).await;
    let booking = engine
        .create_booking(item, booker, NOW + DAY, NOW + 2 * DAY)
        .await
        .unwrap();
    engine
        .update_item(item, owner, None, None, Some(false))
        .await
        .unwrap();
    let approved = engine.approve_booking(booking.id, owner).await.unwrap();
    assert_eq!(approved.status, BookingStatus::Approved);
}

#[tokio::test]
async fn concurrent_overlapping_creates_admit_one() {
    let (engine, _) = engine_at("booking_race.wal", NOW);
    let engine = Arc::new(engine);
    let (_, item, _) = owner_item_booker(&engine).await;

    let mut bookers = Vec::new();
    for i in 0..8 {
        let user = engine
            .register_user(format!("booker {i}"), format!("b{i}@example.com"))
            .await
            .unwrap();
        bookers.push(user.id);
    }

    let mut handles = Vec::new();
    for booker in bookers {
        let engine = engine.clone();
        handles.push(tokio::spawn(async move {
            engine
                .create_booking(item, booker, NOW + DAY, NOW + 2 * DAY)
                .await
        }));
    }

    let mut ok = 0;
    let mut conflicts = 0;
    for h in handles {
        match h.await.unwrap() {
            Ok(_) => ok += 1,
            Err(EngineError::Conflict(_)) => conflicts += 1,
            Err(e) => panic!("unexpected error: {e}"),
        }
    }
    assert_eq!(ok, 1);
    assert_eq!(conflicts, 7);
}

#[tokio::test]
async fn live_bookings_never_overlap() {
    let (engine, _) = engine_at("booking_non_overlap.wal", NOW);
    let (owner, item, booker) = owner_item_booker(&engine).await;

    // Deterministic pseudo-random spans, some colliding.
    let mut seed: i64 = 17;
    for _ in 0..200 {
        seed = (seed * 1_103_515_245 + 12_345) % 2_147_483_648;
        let start = NOW + (seed % 100) * H;
        let len = 1 + (seed / 100) % 10;
        if let Ok(view) = engine.create_booking(item, booker, start, start + len * H).await
            && seed % 3 == 0
        {
            engine.reject_booking(view.id, owner).await.unwrap();
        }
    }

    let st = engine.store.get_item(item).unwrap();
    let guard = st.read().await;
    let live: Vec<&Booking> = guard
        .bookings
        .iter()
        .filter(|b| b.status.blocks_slot())
        .collect();
    assert!(!live.is_empty());
    for (i, a) in live.iter().enumerate() {
        for b in &live[i + 1..] {
            assert!(!a.span.overlaps(&b.span), "{} overlaps {}", a.id, b.id);
        }
    }
}

// ── Workflow ─────────────────────────────────────────────

#[tokio::test]
async fn non_owner_cannot_approve() {
    let (engine, _) = engine_at("workflow_rights.wal", NOW);
    let (_, item, booker) = owner_item_booker(&engine).await;
    let booking = engine
        .create_booking(item, booker, NOW + DAY, NOW + 2 * DAY)
        .await
        .unwrap();

    let err = engine.approve_booking(booking.id, booker).await.unwrap_err();
    assert!(matches!(err, EngineError::NotOwner { .. }));
    assert_eq!(err.kind(), ErrorKind::Rights);

    let after = engine.get_booking(booking.id, booker).await.unwrap();
    assert_eq!(after.status, BookingStatus::Waiting);
}

#[tokio::test]
async fn decided_booking_is_final() {
    let (engine, _) = engine_at("workflow_final.wal", NOW);
    let (owner, item, booker) = owner_item_booker(&engine).await;

    let a = engine
        .create_booking(item, booker, NOW + DAY, NOW + 2 * DAY)
        .await
        .unwrap();
    let b = engine
        .create_booking(item, booker, NOW + 3 * DAY, NOW + 4 * DAY)
        .await
        .unwrap();
    assert_eq!(
        engine.approve_booking(a.id, owner).await.unwrap().status,
        BookingStatus::Approved
    );
    assert_eq!(
        engine.reject_booking(b.id, owner).await.unwrap().status,
        BookingStatus::Rejected
    );

    for id in [a.id, b.id] {
        for decision in [Decision::Approve, Decision::Reject] {
            let err = engine.decide_booking(id, owner, decision).await.unwrap_err();
            assert!(matches!(err, EngineError::NotWaiting { .. }));
            assert_eq!(err.kind(), ErrorKind::Validation);
        }
    }
}

#[tokio::test]
async fn deciding_unknown_booking() {
    let (engine, _) = engine_at("workflow_unknown.wal", NOW);
    let (owner, _, _) = owner_item_booker(&engine).await;
    assert!(matches!(
        engine.approve_booking(404, owner).await,
        Err(EngineError::NotFound(Entity::Booking, 404))
    ));
}

// ── Visibility ───────────────────────────────────────────

#[tokio::test]
async fn booking_visible_to_booker_and_owner_only() {
    let (engine, _) = engine_at("visibility.wal", NOW);
    let (owner, item, booker) = owner_item_booker(&engine).await;
    let stranger = engine
        .register_user("Sam".into(), "sam@example.com".into())
        .await
        .unwrap();
    let booking = engine
        .create_booking(item, booker, NOW + DAY, NOW + 2 * DAY)
        .await
        .unwrap();

    assert_eq!(engine.get_booking(booking.id, booker).await.unwrap(), booking);
    assert_eq!(engine.get_booking(booking.id, owner).await.unwrap(), booking);
    let err = engine.get_booking(booking.id, stranger.id).await.unwrap_err();
    assert!(matches!(err, EngineError::NotVisible(_)));
    assert_eq!(err.kind(), ErrorKind::NotFound);
    assert!(matches!(
        engine.get_booking(999, owner).await,
        Err(EngineError::NotFound(Entity::Booking, 999))
    ));
}

// ── Classification ───────────────────────────────────────

#[tokio::test]
async fn future_bucket_skips_finished_booking() {
    let (engine, clock) = engine_at("classify_future.wal", NOW - 3 * DAY);
    let (_, item, booker) = owner_item_booker(&engine).await;

    let finished = engine
        .create_booking(item, booker, NOW - 2 * DAY, NOW - DAY)
        .await
        .unwrap();
    let tomorrow = engine
        .create_booking(item, booker, NOW + DAY, NOW + 2 * DAY)
        .await
        .unwrap();
    clock.set(NOW);

    let future = engine
        .list_bookings(booker, Role::Booker, Bucket::Future, Page::default())
        .await
        .unwrap();
    assert_eq!(ids(&future), vec![tomorrow.id]);
    let past = engine
        .list_bookings(booker, Role::Booker, Bucket::Past, Page::default())
        .await
        .unwrap();
    assert_eq!(ids(&past), vec![finished.id]);
}

#[tokio::test]
async fn role_selects_booker_or_owner_side() {
    let (engine, _) = engine_at("classify_role.wal", NOW);
    let (owner, item, booker) = owner_item_booker(&engine).await;
    let second_booker = engine
        .register_user("Vera".into(), "vera@example.com".into())
        .await
        .unwrap();
    let own = engine
        .create_booking(item, booker, NOW + DAY, NOW + 2 * DAY)
        .await
        .unwrap();
    let others = engine
        .create_booking(item, second_booker.id, NOW + 3 * DAY, NOW + 4 * DAY)
        .await
        .unwrap();

    let as_booker = engine
        .list_bookings(booker, Role::Booker, Bucket::All, all())
        .await
        .unwrap();
    assert_eq!(ids(&as_booker), vec![own.id]);

    let as_owner = engine
        .list_bookings(owner, Role::Owner, Bucket::All, all())
        .await
        .unwrap();
    assert_eq!(ids(&as_owner), vec![others.id, own.id]);

    assert!(
        engine
            .list_bookings(owner, Role::Booker, Bucket::All, all())
            .await
            .unwrap()
            .is_empty()
    );
}

#[tokio::test]
async fn status_buckets_follow_decisions() {
    let (engine, _) = engine_at("classify_status.wal", NOW);
    let (owner, item, booker) = owner_item_booker(&engine).await;
    let a = engine
        .create_booking(item, booker, NOW + DAY, NOW + 2 * DAY)
        .await
        .unwrap();
    let b = engine
        .create_booking(item, booker, NOW + 2 * DAY, NOW + 3 * DAY)
        .await
        .unwrap();
    engine.reject_booking(a.id, owner).await.unwrap();

    let waiting = engine
        .list_bookings(owner, Role::Owner, Bucket::Waiting, all())
        .await
        .unwrap();
    assert_eq!(ids(&waiting), vec![b.id]);
    let rejected = engine
        .list_bookings(booker, Role::Booker, Bucket::Rejected, all())
        .await
        .unwrap();
    assert_eq!(ids(&rejected), vec![a.id]);
}

#[tokio::test]
async fn current_past_future_partition_all() {
    let (engine, clock) = engine_at("classify_partition.wal", NOW);
    let (_, item, booker) = owner_item_booker(&engine).await;
    for i in 0..6 {
        engine
            .create_booking(item, booker, NOW + i * DAY, NOW + i * DAY + DAY)
            .await
            .unwrap();
    }

    for now in [NOW, NOW + DAY, NOW + 2 * DAY + H, NOW + 6 * DAY, NOW + 9 * DAY] {
        clock.set(now);
        let mut union = Vec::new();
        for bucket in [Bucket::Current, Bucket::Past, Bucket::Future] {
            union.extend(ids(
                &engine
                    .list_bookings(booker, Role::Booker, bucket, all())
                    .await
                    .unwrap(),
            ));
        }
        let total = union.len();
        union.sort_unstable();
        union.dedup();
        assert_eq!(union.len(), total, "buckets overlap at {now}");
        let mut everything = ids(
            &engine
                .list_bookings(booker, Role::Booker, Bucket::All, all())
                .await
                .unwrap(),
        );
        everything.sort_unstable();
        assert_eq!(union, everything, "buckets miss bookings at {now}");
    }
}

#[tokio::test]
async fn listing_pages_by_index() {
    let (engine, _) = engine_at("classify_pages.wal", NOW);
    let (_, item, booker) = owner_item_booker(&engine).await;
    let mut created = Vec::new();
    for i in 0..5 {
        let v = engine
            .create_booking(item, booker, NOW + i * DAY, NOW + i * DAY + H)
            .await
            .unwrap();
        created.push(v.id);
    }
    created.reverse(); // start descending

    let page1 = engine
        .list_bookings(booker, Role::Booker, Bucket::All, Page { from: 1, size: 2 })
        .await
        .unwrap();
    assert_eq!(ids(&page1), created[2..4].to_vec());
    let page2 = engine
        .list_bookings(booker, Role::Booker, Bucket::All, Page { from: 2, size: 2 })
        .await
        .unwrap();
    assert_eq!(ids(&page2), created[4..].to_vec());
}

#[tokio::test]
async fn listing_unknown_subject_fails() {
    let (engine, _) = engine_at("classify_unknown_subject.wal", NOW);
    assert!(matches!(
        engine
            .list_bookings(5, Role::Booker, Bucket::All, Page::default())
            .await,
        Err(EngineError::NotFound(Entity::User, 5))
    ));
}

// ── Adjacency ────────────────────────────────────────────

#[tokio::test]
async fn item_view_shows_neighbours_to_owner_only() {
    let (engine, clock) = engine_at("adjacency_view.wal", NOW - 3 * DAY);
    let (owner, item, booker) = owner_item_booker(&engine).await;

    let before = engine
        .create_booking(item, booker, NOW - 2 * DAY, NOW - DAY)
        .await
        .unwrap();
    let after = engine
        .create_booking(item, booker, NOW + DAY, NOW + 3 * DAY)
        .await
        .unwrap();
    let pending = engine
        .create_booking(item, booker, NOW + 4 * DAY, NOW + 5 * DAY)
        .await
        .unwrap();
    engine.approve_booking(before.id, owner).await.unwrap();
    engine.approve_booking(after.id, owner).await.unwrap();
    clock.set(NOW);

    let view = engine.item_view(item, owner).await.unwrap();
    assert_eq!(view.adjacent.last.as_ref().map(|b| b.id), Some(before.id));
    assert_eq!(view.adjacent.next.as_ref().map(|b| b.id), Some(after.id));
    assert_ne!(view.adjacent.next.as_ref().map(|b| b.id), Some(pending.id));

    let stranger_view = engine.item_view(item, booker).await.unwrap();
    assert_eq!(stranger_view.adjacent, Adjacent::default());
    assert_eq!(stranger_view.item, view.item);

    assert!(matches!(
        engine.item_view(31, owner).await,
        Err(EngineError::NotFound(Entity::Item, 31))
    ));
}

#[tokio::test]
async fn owner_dashboard_resolves_each_item() {
    let (engine, clock) = engine_at("adjacency_dashboard.wal", NOW - 3 * DAY);
    let (owner, drill, booker) = owner_item_booker(&engine).await;
    let saw = engine
        .list_item(owner, "saw".into(), "circular saw".into(), true, None)
        .await
        .unwrap();
    let idle = engine
        .list_item(owner, "sander".into(), "orbital".into(), true, None)
        .await
        .unwrap();

    let d1 = engine
        .create_booking(drill, booker, NOW - 2 * DAY, NOW - DAY)
        .await
        .unwrap();
    let s1 = engine
        .create_booking(saw.id, booker, NOW + DAY, NOW + 2 * DAY)
        .await
        .unwrap();
    for id in [d1.id, s1.id] {
        engine.approve_booking(id, owner).await.unwrap();
    }
    clock.set(NOW);

    let views = engine.owner_items(owner, Page::default()).await.unwrap();
    assert_eq!(
        views.iter().map(|v| v.item.id).collect::<Vec<_>>(),
        vec![drill, saw.id, idle.id]
    );
    assert_eq!(views[0].adjacent.last.as_ref().map(|b| b.id), Some(d1.id));
    assert!(views[0].adjacent.next.is_none());
    assert!(views[1].adjacent.last.is_none());
    assert_eq!(views[1].adjacent.next.as_ref().map(|b| b.id), Some(s1.id));
    assert_eq!(views[2].adjacent, Adjacent::default());

    let second_page = engine
        .owner_items(owner, Page { from: 1, size: 2 })
        .await
        .unwrap();
    assert_eq!(second_page.len(), 1);
    assert_eq!(second_page[0].item.id, idle.id);
}

// ── Durability ───────────────────────────────────────────

#[tokio::test]
async fn wal_replay_restores_state_and_sequences() {
    let path = test_wal_path("replay.wal");
    let clock = Arc::new(ManualClock::new(NOW));
    let (owner, item, booker, booking, request) = {
        let engine = Engine::new(path.clone(), clock.clone()).unwrap();
        let (owner, item, booker) = owner_item_booker(&engine).await;
        let request = engine.open_request(booker, "need a saw".into()).await.unwrap();
        let booking = engine
            .create_booking(item, booker, NOW + DAY, NOW + 2 * DAY)
            .await
            .unwrap();
        engine.approve_booking(booking.id, owner).await.unwrap();
        engine
            .update_item(item, owner, Some("hammer drill".into()), None, None)
            .await
            .unwrap();
        (owner, item, booker, booking.id, request)
    };

    let engine = Engine::new(path, clock.clone()).unwrap();
    assert_eq!(engine.get_user(owner).unwrap().name, "Olga");
    assert_eq!(engine.get_item(item).await.unwrap().name, "hammer drill");
    let restored = engine.get_booking(booking, booker).await.unwrap();
    assert_eq!(restored.status, BookingStatus::Approved);
    assert_eq!(engine.my_requests(booker).await.unwrap()[0].request, request);

    // Sequences continue after the replayed ids.
    let next_booking = engine
        .create_booking(item, booker, NOW + 3 * DAY, NOW + 4 * DAY)
        .await
        .unwrap();
    assert_eq!(next_booking.id, booking + 1);
    let next_user = engine
        .register_user("Nia".into(), "nia@example.com".into())
        .await
        .unwrap();
    assert_eq!(next_user.id, booker + 1);

    // Replayed email index still enforces uniqueness.
    assert!(matches!(
        engine
            .register_user("Olga again".into(), "olga@example.com".into())
            .await,
        Err(EngineError::DuplicateEmail(_))
    ));
}

#[tokio::test]
async fn compaction_preserves_state() {
    let path = test_wal_path("compaction.wal");
    let clock = Arc::new(ManualClock::new(NOW));
    let (item, booker, waiting, rejected) = {
        let engine = Engine::new(path.clone(), clock.clone()).unwrap();
        let (owner, item, booker) = owner_item_booker(&engine).await;
        let waiting = engine
            .create_booking(item, booker, NOW + DAY, NOW + 2 * DAY)
            .await
            .unwrap();
        let rejected = engine
            .create_booking(item, booker, NOW + 3 * DAY, NOW + 4 * DAY)
            .await
            .unwrap();
        engine.reject_booking(rejected.id, owner).await.unwrap();
        for i in 0..5 {
            engine
                .update_item(item, owner, Some(format!("drill v{i}")), None, None)
                .await
                .unwrap();
        }
        assert_eq!(engine.wal_appends_since_compact().await, 11);

        let before = std::fs::metadata(&path).unwrap().len();
        engine.compact_wal().await.unwrap();
        let after = std::fs::metadata(&path).unwrap().len();
        assert!(after < before, "compacted WAL should be smaller: {after} < {before}");
        assert_eq!(engine.wal_appends_since_compact().await, 0);
        (item, booker, waiting.id, rejected.id)
    };

    let engine = Engine::new(path, clock).unwrap();
    assert_eq!(engine.get_item(item).await.unwrap().name, "drill v4");
    assert_eq!(
        engine.get_booking(waiting, booker).await.unwrap().status,
        BookingStatus::Waiting
    );
    assert_eq!(
        engine.get_booking(rejected, booker).await.unwrap().status,
        BookingStatus::Rejected
    );
}
