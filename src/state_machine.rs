//! Status transition tables for every stateful entity.
//!
//! Services consult these before touching the store; the guarded updates
//! they issue afterwards only protect against concurrent writers.

use std::fmt::Display;

use crate::errors::ServiceError;
use crate::models::{
    ApiKeyStatus, BookingStatus, CargoStatus, MatchStatus, PaymentStatus, RouteStatus,
    VerificationStatus,
};

pub trait StatusMachine: Copy + PartialEq + Display + 'static {
    /// Entity name used in transition errors.
    const ENTITY: &'static str;

    fn allowed_targets(self) -> &'static [Self];

    fn can_transition_to(self, to: Self) -> bool {
        self.allowed_targets().contains(&to)
    }

    fn is_terminal(self) -> bool {
        self.allowed_targets().is_empty()
    }
}

/// Rejects any transition missing from the entity's table, including
/// same-state "transitions".
pub fn ensure_transition<S: StatusMachine>(from: S, to: S) -> Result<(), ServiceError> {
    if from.can_transition_to(to) {
        Ok(())
    } else {
        Err(ServiceError::InvalidTransition {
            entity: S::ENTITY,
            from: from.to_string(),
            to: to.to_string(),
        })
    }
}

impl StatusMachine for BookingStatus {
    const ENTITY: &'static str = "booking";

    fn allowed_targets(self) -> &'static [Self] {
        use BookingStatus::*;
        match self {
            Pending => &[Approved, Rejected],
            Approved => &[InProgress, Cancelled],
            InProgress => &[Completed, Cancelled],
            Completed | Rejected | Cancelled => &[],
        }
    }
}

impl StatusMachine for RouteStatus {
    const ENTITY: &'static str = "route";

    fn allowed_targets(self) -> &'static [Self] {
        use RouteStatus::*;
        match self {
            Active => &[InProgress, Cancelled],
            InProgress => &[Completed, Cancelled],
            Completed | Cancelled => &[],
        }
    }
}

impl StatusMachine for CargoStatus {
    const ENTITY: &'static str = "cargo listing";

    // booked/in_transit fall back to active when their booking is rejected
    // or cancelled.
    fn allowed_targets(self) -> &'static [Self] {
        use CargoStatus::*;
        match self {
            Active => &[Booked, Cancelled],
            Booked => &[InTransit, Active],
            InTransit => &[Delivered, Active],
            Delivered | Cancelled => &[],
        }
    }
}

impl StatusMachine for MatchStatus {
    const ENTITY: &'static str = "route match";

    fn allowed_targets(self) -> &'static [Self] {
        use MatchStatus::*;
        match self {
            Pending => &[Accepted, Rejected, Expired],
            // the booking created from the match fell through
            Accepted => &[Rejected],
            Rejected | Expired => &[],
        }
    }
}

impl StatusMachine for PaymentStatus {
    const ENTITY: &'static str = "payment";

    fn allowed_targets(self) -> &'static [Self] {
        use PaymentStatus::*;
        match self {
            Pending => &[Processing, Completed, Failed],
            Processing => &[Completed, Failed],
            Completed => &[Refunded],
            Failed | Refunded => &[],
        }
    }
}

impl StatusMachine for VerificationStatus {
    const ENTITY: &'static str = "verification";

    fn allowed_targets(self) -> &'static [Self] {
        use VerificationStatus::*;
        match self {
            Pending => &[Approved, Rejected],
            Approved | Rejected => &[],
        }
    }
}

impl StatusMachine for ApiKeyStatus {
    const ENTITY: &'static str = "api key";

    fn allowed_targets(self) -> &'static [Self] {
        use ApiKeyStatus::*;
        match self {
            Active => &[Inactive, Revoked],
            Inactive => &[Active, Revoked],
            Revoked => &[],
        }
    }
}

/// Walks a chronological status trail through the machine.
///
/// The trail must start at `initial`, every step must be an allowed edge,
/// and it must end at `current`.
pub fn replay_trail<S: StatusMachine>(
    initial: S,
    trail: &[S],
    current: S,
) -> Result<(), ServiceError> {
    let (first, rest) = trail.split_first().ok_or_else(|| {
        ServiceError::InvalidOperation(format!("{} has an empty status trail", S::ENTITY))
    })?;

    if *first != initial {
        return Err(ServiceError::InvalidOperation(format!(
            "{} trail starts at '{}' instead of '{}'",
            S::ENTITY,
            first,
            initial
        )));
    }

    let mut state = *first;
    for next in rest {
        ensure_transition(state, *next)?;
        state = *next;
    }

    if state != current {
        return Err(ServiceError::InvalidOperation(format!(
            "{} trail ends at '{}' but status is '{}'",
            S::ENTITY,
            state,
            current
        )));
    }

    Ok(())
}
