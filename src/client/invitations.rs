//! Redeeming a study group invitation code.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::api::group_view_path;
use crate::client::backend::{ClientError, EngagementBackend};
use crate::logging::item_id;
use crate::model::RedeemFailure;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Redeemed {
    Joined {
        study_group_id: String,
        redirect: String,
    },
    /// The actor was already a member. No use of the code was consumed.
    AlreadyMember {
        study_group_id: String,
        redirect: String,
    },
}

impl Redeemed {
    pub fn study_group_id(&self) -> &str {
        match self {
            Redeemed::Joined { study_group_id, .. }
            | Redeemed::AlreadyMember { study_group_id, .. } => study_group_id,
        }
    }

    /// Where the caller should navigate next.
    pub fn redirect(&self) -> &str {
        match self {
            Redeemed::Joined { redirect, .. } | Redeemed::AlreadyMember { redirect, .. } => {
                redirect
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RedeemError {
    /// Blank input, rejected before any request.
    EmptyCode,
    /// A redemption is already in flight.
    Busy,
    Rejected(RedeemFailure),
    Request(ClientError),
}

impl RedeemError {
    pub fn user_message(&self) -> String {
        match self {
            RedeemError::EmptyCode => "Please enter an invitation code".to_string(),
            RedeemError::Busy => "Already joining, please wait".to_string(),
            RedeemError::Rejected(reason) => reason.message().to_string(),
            RedeemError::Request(e) => e.user_message(),
        }
    }
}

impl std::fmt::Display for RedeemError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.user_message())
    }
}

impl std::error::Error for RedeemError {}

/// Held while a redemption is in flight; cleared on drop, including when
/// the redeem future is cancelled.
struct BusyFlag<'a>(&'a AtomicBool);

impl<'a> BusyFlag<'a> {
    fn claim(flag: &'a AtomicBool) -> Option<Self> {
        if flag.swap(true, Ordering::AcqRel) {
            None
        } else {
            Some(BusyFlag(flag))
        }
    }
}

impl Drop for BusyFlag<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Join-by-code form state: one redemption at a time.
pub struct InvitationRedeemer {
    backend: Arc<dyn EngagementBackend>,
    busy: AtomicBool,
}

impl InvitationRedeemer {
    pub fn new(backend: Arc<dyn EngagementBackend>) -> Self {
        Self {
            backend,
            busy: AtomicBool::new(false),
        }
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    pub async fn redeem(&self, code: &str) -> Result<Redeemed, RedeemError> {
        let code = code.trim();
        if code.is_empty() {
            return Err(RedeemError::EmptyCode);
        }
        let Some(_busy) = BusyFlag::claim(&self.busy) else {
            return Err(RedeemError::Busy);
        };
        let result = self.backend.redeem_invitation(code).await;

        match result {
            Ok(resp) => {
                let redirect = group_view_path(&resp.study_group_id);
                crate::ulog!(
                    "invitations: joined {} (already member: {})",
                    item_id(&resp.study_group_id),
                    resp.already_member
                );
                Ok(if resp.already_member {
                    Redeemed::AlreadyMember {
                        study_group_id: resp.study_group_id,
                        redirect,
                    }
                } else {
                    Redeemed::Joined {
                        study_group_id: resp.study_group_id,
                        redirect,
                    }
                })
            }
            Err(ClientError::Invitation(reason)) => Err(RedeemError::Rejected(reason)),
            Err(e) => Err(RedeemError::Request(e)),
        }
    }
}
