//! # Repair Ticket State Machine (pure half)
//!
//! Transition rules for repair tickets. The database half (persisting a
//! transition, consuming parts, compensating on cancellation) lives in
//! `dukan-db::ledger::repairs`; everything here is a pure table lookup.
//!
//! ## Transition Table
//! ```text
//!   received ──► diagnosing ──┬──► awaiting_parts ──► ready ──► delivered
//!                             └──► in_repair ───────► ready
//!
//!   any non-terminal state ──► cancelled
//! ```
//!
//! `delivered` and `cancelled` are terminal: no edge leaves them.

use crate::error::{CoreError, CoreResult};
use crate::types::RepairStatus;

/// All states a newly opened ticket starts from.
pub const INITIAL_STATUS: RepairStatus = RepairStatus::Received;

/// Returns true when no further transition may leave `status`.
#[inline]
pub fn is_terminal(status: RepairStatus) -> bool {
    matches!(status, RepairStatus::Delivered | RepairStatus::Cancelled)
}

/// Returns true when parts may be consumed while the ticket is in `status`.
#[inline]
pub fn allows_part_consumption(status: RepairStatus) -> bool {
    matches!(
        status,
        RepairStatus::Diagnosing | RepairStatus::AwaitingParts | RepairStatus::InRepair
    )
}

/// Checks the transition table.
pub fn can_transition(from: RepairStatus, to: RepairStatus) -> bool {
    use RepairStatus::*;

    // Cancellation is allowed out of every non-terminal state.
    if to == Cancelled {
        return !is_terminal(from);
    }

    matches!(
        (from, to),
        (Received, Diagnosing)
            | (Diagnosing, AwaitingParts)
            | (Diagnosing, InRepair)
            | (AwaitingParts, Ready)
            | (InRepair, Ready)
            | (Ready, Delivered)
    )
}

/// Validates a requested transition, failing with `InvalidTransition` for
/// any edge not in the table.
pub fn check_transition(from: RepairStatus, to: RepairStatus) -> CoreResult<()> {
    if can_transition(from, to) {
        Ok(())
    } else {
        Err(CoreError::invalid_transition(
            "repair_ticket",
            from.as_str(),
            to.as_str(),
        ))
    }
}
