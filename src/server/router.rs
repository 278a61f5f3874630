//! Axum router construction.

use axum::extract::DefaultBodyLimit;
use axum::routing::{delete, get, post, put};
use axum::Router;

use crate::server::config::MAX_UPLOAD_SIZE;
use crate::server::handlers;
use crate::server::state::SharedState;

/// Build the complete Axum router with all API routes.
pub fn build_router(state: SharedState) -> Router {
    Router::new()
        // Health
        .route("/api/health", get(handlers::health::health_handler))
        // Profiles and follows
        .route(
            "/api/profile",
            put(handlers::profiles::update_profile_handler),
        )
        .route(
            "/api/users/:user_id",
            get(handlers::profiles::get_profile_handler),
        )
        .route(
            "/api/users/:user_id/follow",
            post(handlers::profiles::follow_handler),
        )
        // Resources
        .route(
            "/api/resources",
            post(handlers::resources::create_resource_handler),
        )
        .route(
            "/api/resources/:id",
            get(handlers::resources::get_resource_handler),
        )
        .route(
            "/api/resources/:id/edit",
            post(handlers::resources::edit_resource_handler),
        )
        .route(
            "/api/resources/:id/delete",
            delete(handlers::resources::delete_resource_handler),
        )
        .route(
            "/api/resources/:id/file",
            post(handlers::resources::upload_file_handler)
                .layer(DefaultBodyLimit::max(MAX_UPLOAD_SIZE as usize + 4096)),
        )
        .route(
            "/api/resources/:id/download",
            get(handlers::downloads::download_handler),
        )
        // Likes and comments
        .route(
            "/api/resources/:id/like",
            get(handlers::likes::like_status_handler).post(handlers::likes::like_handler),
        )
        .route(
            "/api/resources/:id/comments",
            get(handlers::comments::list_comments_handler)
                .post(handlers::comments::post_comment_handler)
                .delete(handlers::comments::delete_comment_handler),
        )
        // Study groups
        .route(
            "/api/study-groups",
            post(handlers::groups::create_group_handler),
        )
        .route(
            "/api/study-groups/list",
            get(handlers::groups::list_groups_handler),
        )
        .route(
            "/api/study-groups/invitations",
            get(handlers::invitations::list_invitations_handler)
                .post(handlers::invitations::create_invitation_handler),
        )
        .route(
            "/api/study-groups/invitations/use",
            post(handlers::invitations::redeem_invitation_handler),
        )
        .route(
            "/api/study-groups/invitations/:invitation_id",
            delete(handlers::invitations::revoke_invitation_handler),
        )
        .route(
            "/api/study-groups/:id",
            get(handlers::groups::get_group_handler),
        )
        .route(
            "/api/study-groups/:id/join",
            post(handlers::groups::join_group_handler),
        )
        .route(
            "/api/study-groups/:id/leave",
            post(handlers::groups::leave_group_handler),
        )
        .route(
            "/api/study-groups/:id/members/:user_id",
            axum::routing::patch(handlers::groups::update_member_handler)
                .delete(handlers::groups::remove_member_handler),
        )
        .route(
            "/api/study-groups/:id/delete",
            delete(handlers::groups::delete_group_handler),
        )
        // Notifications
        .route(
            "/api/notifications",
            get(handlers::notifications::list_notifications_handler),
        )
        .route(
            "/api/notifications/count",
            get(handlers::notifications::count_notifications_handler),
        )
        .route(
            "/api/notifications/read-all",
            post(handlers::notifications::mark_all_read_handler),
        )
        .route(
            "/api/notifications/:id/read",
            post(handlers::notifications::mark_read_handler),
        )
        // Realtime
        .route("/api/realtime", get(handlers::realtime::realtime_handler))
        .with_state(state)
}
