use crate::model::{BookingId, BookingStatus, ItemId, Ms, UserId};

/// Entity families addressed by id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Entity {
    User,
    Item,
    Request,
    Booking,
}

impl Entity {
    fn as_str(&self) -> &'static str {
        match self {
            Entity::User => "user",
            Entity::Item => "item",
            Entity::Request => "request",
            Entity::Booking => "booking",
        }
    }
}

/// Coarse error class, one per boundary status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed input, bad range, unsupported bucket, unavailable item.
    Validation,
    /// Missing entity, no visibility, or a blocking booking.
    NotFound,
    /// Caller is not the owner.
    Rights,
    /// Uniqueness violation.
    Duplicate,
    Internal,
}

impl ErrorKind {
    /// SQLSTATE reported to wire clients.
    pub fn sqlstate(&self) -> &'static str {
        match self {
            ErrorKind::Validation => "22023",
            ErrorKind::NotFound => "P0002",
            ErrorKind::Rights => "42501",
            ErrorKind::Duplicate => "23505",
            ErrorKind::Internal => "58030",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            ErrorKind::Validation => "validation",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Rights => "rights",
            ErrorKind::Duplicate => "duplicate",
            ErrorKind::Internal => "internal",
        }
    }
}

#[derive(Debug)]
pub enum EngineError {
    NotFound(Entity, i64),
    /// Caller is neither the booker nor the item owner.
    NotVisible(BookingId),
    /// Owners cannot book their own items.
    SelfBooking(ItemId),
    Conflict(BookingId),
    ItemUnavailable(ItemId),
    InvalidSpan { start: Ms, end: Ms },
    StartInPast { start: Ms, now: Ms },
    NotWaiting { id: BookingId, status: BookingStatus },
    NotOwner { item: ItemId, actor: UserId },
    /// Users may only edit their own profile.
    NotSelf { user: UserId, actor: UserId },
    UnsupportedState(String),
    InvalidPage(&'static str),
    InvalidField(&'static str),
    DuplicateEmail(String),
    MissingCaller,
    LimitExceeded(&'static str),
    WalError(String),
}

impl EngineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::NotFound(..)
            | EngineError::NotVisible(_)
            | EngineError::SelfBooking(_)
            | EngineError::Conflict(_) => ErrorKind::NotFound,
            EngineError::ItemUnavailable(_)
            | EngineError::InvalidSpan { .. }
            | EngineError::StartInPast { .. }
            | EngineError::NotWaiting { .. }
            | EngineError::UnsupportedState(_)
            | EngineError::InvalidPage(_)
            | EngineError::InvalidField(_)
            | EngineError::MissingCaller
            | EngineError::LimitExceeded(_) => ErrorKind::Validation,
            EngineError::NotOwner { .. } | EngineError::NotSelf { .. } => ErrorKind::Rights,
            EngineError::DuplicateEmail(_) => ErrorKind::Duplicate,
            EngineError::WalError(_) => ErrorKind::Internal,
        }
    }
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::NotFound(entity, id) => write!(f, "{} not found: {id}", entity.as_str()),
            EngineError::NotVisible(id) => {
                write!(f, "booking {id} is visible only to its booker or the item owner")
            }
            EngineError::SelfBooking(item) => write!(f, "owner cannot book own item {item}"),
            EngineError::Conflict(id) => write!(f, "overlaps existing booking: {id}"),
            EngineError::ItemUnavailable(item) => write!(f, "item {item} is not available"),
            EngineError::InvalidSpan { start, end } => {
                write!(f, "booking start {start} must be before end {end}")
            }
            EngineError::StartInPast { start, now } => {
                write!(f, "booking start {start} is in the past (now {now})")
            }
            EngineError::NotWaiting { id, status } => {
                write!(f, "booking {id} is already {status}; only WAITING bookings can be decided")
            }
            EngineError::NotOwner { item, actor } => {
                write!(f, "user {actor} is not the owner of item {item}")
            }
            EngineError::NotSelf { user, actor } => {
                write!(f, "user {actor} may not edit user {user}")
            }
            EngineError::UnsupportedState(state) => write!(f, "Unknown state: {state}"),
            EngineError::InvalidPage(msg) => write!(f, "invalid page: {msg}"),
            EngineError::InvalidField(msg) => write!(f, "invalid field: {msg}"),
            EngineError::DuplicateEmail(email) => write!(f, "email already registered: {email}"),
            EngineError::MissingCaller => write!(f, "caller identity required"),
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::WalError(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}
