use crate::model::*;

use super::EngineError;

/// Owner's verdict on a waiting booking.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Approve,
    Reject,
}

impl Decision {
    pub fn from_approved(approved: bool) -> Self {
        if approved {
            Decision::Approve
        } else {
            Decision::Reject
        }
    }

    pub fn target(self) -> BookingStatus {
        match self {
            Decision::Approve => BookingStatus::Approved,
            Decision::Reject => BookingStatus::Rejected,
        }
    }
}

/// WAITING → APPROVED | REJECTED, driven only by the item owner.
/// Ownership is checked before status.
pub fn transition(
    booking: &Booking,
    item: &Item,
    actor: UserId,
    decision: Decision,
) -> Result<BookingStatus, EngineError> {
    if actor != item.owner_id {
        return Err(EngineError::NotOwner {
            item: item.id,
            actor,
        });
    }
    match booking.status {
        BookingStatus::Waiting => Ok(decision.target()),
        status @ (BookingStatus::Approved | BookingStatus::Rejected) => {
            Err(EngineError::NotWaiting {
                id: booking.id,
                status,
            })
        }
    }
}
