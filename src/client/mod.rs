//! Client side of the engagement protocol.
//!
//! An [`EngagementView`] keeps one target's counters and edge flags
//! consistent across optimistic local changes, authoritative responses and
//! realtime change notifications. It talks to the outside world only through
//! an [`EngagementBackend`] and a [`ChangeSource`], both passed in
//! explicitly: [`HttpBackend`]/[`WsChangeSource`] over the network, or
//! [`LocalBackend`]/[`LocalChangeSource`] in-process.

pub mod backend;
pub mod delivery;
pub mod engagement;
pub mod http;
pub mod invitations;
pub mod local;
pub mod subscription;
pub mod view;

pub use backend::{ChangeSource, ClientError, EngagementBackend};
pub use delivery::{Deliverer, DeliveryEnvironment, DeliverySource, DeliveryStatus};
pub use engagement::{Action, EngagementConfig, EngagementView, MutationOutcome};
pub use http::{ClientConfig, HttpBackend, WsChangeSource};
pub use invitations::{InvitationRedeemer, RedeemError, Redeemed};
pub use local::{LocalBackend, LocalChangeSource};
pub use subscription::{Subscription, SubscriptionHandle, SubscriptionSet};
pub use view::EngagementSnapshot;
