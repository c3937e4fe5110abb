//! Administrator capability.
//!
//! Exactly one admin identity exists at a time. Admin-only setters across the
//! core take an [`AdminGrant`], which can only be obtained from
//! [`Authority::authorize`], so an unchecked path to them does not exist.

use tracing::info;

use super::errors::{StakingError, StakingResult};
use super::events::{EventSink, ProtocolEvent};
use super::types::Identity;

#[derive(Debug, Clone)]
pub struct Authority {
    admin: Identity,
}

/// Proof that the caller is the current admin. Borrowed from the
/// [`Authority`] that issued it, so it cannot outlive an admin transfer.
#[derive(Debug)]
pub struct AdminGrant<'a> {
    admin: &'a Identity,
}

impl AdminGrant<'_> {
    pub fn admin(&self) -> &Identity {
        self.admin
    }
}

impl Authority {
    pub fn new(admin: Identity) -> Self {
        Self { admin }
    }

    pub fn admin(&self) -> &Identity {
        &self.admin
    }

    pub fn authorize(&self, caller: &Identity) -> StakingResult<AdminGrant<'_>> {
        if *caller != self.admin {
            return Err(StakingError::Unauthorized { caller: *caller });
        }
        Ok(AdminGrant { admin: &self.admin })
    }

    /// Hand the capability to a new identity. Only the current admin may do so.
    pub fn transfer(
        &mut self,
        caller: &Identity,
        new_admin: Identity,
        sink: &mut impl EventSink,
    ) -> StakingResult<()> {
        self.authorize(caller)?;
        let from = self.admin;
        self.admin = new_admin;
        info!(%from, to = %new_admin, "admin transferred");
        sink.emit(ProtocolEvent::AdminTransferred {
            from,
            to: new_admin,
        });
        Ok(())
    }
}
