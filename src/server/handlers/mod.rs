//! Route handler modules for the UniShare REST API.

pub mod comments;
pub mod downloads;
pub mod groups;
pub mod health;
pub mod invitations;
pub mod likes;
pub mod notifications;
pub mod profiles;
pub mod realtime;
pub mod resources;
