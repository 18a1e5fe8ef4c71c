//! Settlement planner (greedy debt netting).
//!
//! Repeatedly matches the largest remaining creditor with the largest
//! remaining debtor and emits one transfer for the smaller of the two
//! magnitudes. Each round settles at least one side, so `n` unsettled
//! participants never need more than `n - 1` transfers.
//!
//! Ties on equal magnitude are broken by ascending participant id, which
//! makes the output a pure function of the input set.

use crate::ledger::BALANCE_TOLERANCE;
use crate::model::participant::ParticipantId;
use crate::model::settlement::SettlementProposal;
use std::cmp::Ordering;
use std::collections::BinaryHeap;

#[derive(Debug, Clone, Copy)]
struct Position {
    remaining: f64,
    participant: ParticipantId,
}

impl PartialEq for Position {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Position {}

impl PartialOrd for Position {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Position {
    // Max-heap on magnitude; the smaller id wins a tie.
    fn cmp(&self, other: &Self) -> Ordering {
        self.remaining
            .total_cmp(&other.remaining)
            .then_with(|| other.participant.cmp(&self.participant))
    }
}

/// Computes the transfer list that zeroes every net position.
///
/// `nets` holds `(participant, net)` pairs as produced by the balance
/// calculator. Participants within `BALANCE_TOLERANCE` of zero are treated
/// as settled and never appear in the output.
pub fn plan_settlements(nets: &[(ParticipantId, f64)]) -> Vec<SettlementProposal> {
    let mut creditors = BinaryHeap::new();
    let mut debtors = BinaryHeap::new();
    for &(participant, net) in nets {
        if net > BALANCE_TOLERANCE {
            creditors.push(Position {
                remaining: net,
                participant,
            });
        } else if net < -BALANCE_TOLERANCE {
            debtors.push(Position {
                remaining: -net,
                participant,
            });
        }
    }

    let mut proposals = Vec::new();
    while let (Some(mut creditor), Some(mut debtor)) = (creditors.pop(), debtors.pop()) {
        let amount = creditor.remaining.min(debtor.remaining);
        proposals.push(SettlementProposal {
            from: debtor.participant,
            to: creditor.participant,
            amount,
        });

        creditor.remaining -= amount;
        debtor.remaining -= amount;
        if creditor.remaining > BALANCE_TOLERANCE {
            creditors.push(creditor);
        }
        if debtor.remaining > BALANCE_TOLERANCE {
            debtors.push(debtor);
        }
    }

    proposals
}

/// Applies proposals to a net mapping: `from` gains, `to` loses.
///
/// Returns the residual positions in input order.
pub fn apply_proposals(
    nets: &[(ParticipantId, f64)],
    proposals: &[SettlementProposal],
) -> Vec<(ParticipantId, f64)> {
    let mut residual = nets.to_vec();
    for proposal in proposals {
        for (participant, net) in residual.iter_mut() {
            if *participant == proposal.from {
                *net += proposal.amount;
            } else if *participant == proposal.to {
                *net -= proposal.amount;
            }
        }
    }
    residual
}
