//! Stack-proposal negotiation (component C5, spec §4.5): picks which
//! messaging-association protocol the Querier and Responder will use.

use crate::error::{GistError, ObjectValueSubcode};
use crate::wire::{MaProtocol, StackConfigurationData, StackProposal};
use std::time::Duration;

/// MA-protocol support this instance offers, in preference order. The
/// first entry the peer also supports wins (spec §4.5 invariant: Confirm
/// must not downgrade below what Response selected).
#[derive(Debug, Clone)]
pub struct LocalCapabilities {
    pub supported: Vec<MaProtocol>,
    pub ma_hold_time: Duration,
}

impl Default for LocalCapabilities {
    fn default() -> Self {
        Self {
            supported: vec![MaProtocol::Tls, MaProtocol::Tcp],
            ma_hold_time: Duration::from_secs(30),
        }
    }
}

impl LocalCapabilities {
    pub fn propose(&self) -> StackProposal {
        StackProposal {
            profiles: self.supported.iter().map(|p| vec![*p]).collect(),
        }
    }

    /// Responder-side selection: first protocol in the Querier's proposal
    /// (in the Querier's own order) that this instance also supports wins
    /// (spec §4.5: the Responder honours the Querier's ordering, not its
    /// own preference order).
    pub fn select(&self, proposal: &StackProposal) -> crate::Result<MaProtocol> {
        for profile in &proposal.profiles {
            if let Some(protocol) = profile.iter().find(|p| self.supported.contains(p)) {
                return Ok(*protocol);
            }
        }
        Err(GistError::ObjectValueError {
            subcode: ObjectValueSubcode::SpScpMismatch,
            offset: 0,
        })
    }

    pub fn configuration(&self) -> StackConfigurationData {
        StackConfigurationData {
            ma_hold_time: self.ma_hold_time,
            options: self.supported.clone(),
        }
    }
}

/// Querier-side check that a Confirm's chosen protocol matches what the
/// Response already selected (spec §4.5 invariant: no downgrade between
/// Response and Confirm).
pub fn confirm_matches_response(selected: MaProtocol, confirmed: MaProtocol) -> crate::Result<()> {
    if selected == confirmed {
        Ok(())
    } else {
        Err(GistError::ObjectValueError {
            subcode: ObjectValueSubcode::SpScpMismatch,
            offset: 0,
        })
    }
}
