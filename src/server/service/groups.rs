//! Study groups, membership and invitations.

use crate::api::{
    group_view_path, CreateGroupRequest, CreateInvitationRequest, GroupList, GroupStatus,
    MembershipResponse, RedeemResponse,
};
use crate::logging::{item_id, user_id};
use crate::model::{tables, ChangeEvent, ChangeKind, Invitation, MemberRole, RedeemFailure};
use crate::server::service::{
    clean_optional, new_id, new_invitation_code, publish, ServiceError,
};
use crate::server::state::AppState;
use crate::storage::{NotificationRow, Redemption, StorageError, StudyGroupRow};
use crate::validation::{
    check_length, require_non_empty, COURSE_CODE_MAX_CHARS, GROUP_DESCRIPTION_MAX_CHARS,
    GROUP_NAME_MAX_CHARS,
};

const MAX_CODE_ATTEMPTS: usize = 5;

fn group_row(state: &AppState, group_id: &str) -> Result<StudyGroupRow, ServiceError> {
    state
        .storage
        .get_group(group_id)?
        .ok_or_else(|| ServiceError::NotFound("Study group not found".to_string()))
}

fn role_of(state: &AppState, group_id: &str, actor: &str) -> Result<Option<MemberRole>, ServiceError> {
    Ok(state.storage.get_member(group_id, actor)?.map(|m| m.role))
}

fn require_admin(state: &AppState, group: &StudyGroupRow, actor: &str) -> Result<(), ServiceError> {
    if group.creator_id == actor || role_of(state, &group.id, actor)? == Some(MemberRole::Admin) {
        Ok(())
    } else {
        Err(ServiceError::Forbidden(
            "Only group admins can do that".to_string(),
        ))
    }
}

fn publish_membership(state: &AppState, group_id: &str, member: &str, kind: ChangeKind) {
    publish(
        state,
        ChangeEvent::new(tables::STUDY_GROUP_MEMBERS, kind)
            .key("study_group_id", group_id)
            .key("user_id", member),
    );
    publish(
        state,
        ChangeEvent::new(tables::STUDY_GROUPS, ChangeKind::Update).key("id", group_id),
    );
}

fn notify_join(state: &AppState, group: &StudyGroupRow, member: &str, now: u64) {
    if group.creator_id == member {
        return;
    }
    let who = state
        .storage
        .get_user(member)
        .ok()
        .flatten()
        .map(|u| u.username)
        .unwrap_or_else(|| "someone".to_string());
    let row = NotificationRow {
        id: 0,
        user_id: group.creator_id.clone(),
        actor_id: Some(member.to_string()),
        notification_type: "group_join".to_string(),
        title: "New Group Member".to_string(),
        message: format!("@{who} joined {}", group.name),
        link: Some(group_view_path(&group.id)),
        is_read: false,
        created_at: now,
    };
    match state.storage.insert_notification(&row) {
        Ok(_) => publish(
            state,
            ChangeEvent::new(tables::NOTIFICATIONS, ChangeKind::Insert)
                .key("user_id", &group.creator_id),
        ),
        Err(e) => crate::ulog!("groups: join notification failed: {}", e),
    }
}

// ---------------------------------------------------------------------------
// Groups
// ---------------------------------------------------------------------------

pub fn create_group(
    state: &AppState,
    actor: &str,
    req: CreateGroupRequest,
    now: u64,
) -> Result<GroupStatus, ServiceError> {
    let name = req.name.trim().to_string();
    let description = clean_optional(req.description);
    let course_code = clean_optional(req.course_code);
    require_non_empty("name", "Name", &name)?;
    check_length("name", "Name", &name, GROUP_NAME_MAX_CHARS)?;
    if let Some(d) = description.as_deref() {
        check_length("description", "Description", d, GROUP_DESCRIPTION_MAX_CHARS)?;
        state.filter.check("description", "Description", d)?;
    }
    if let Some(c) = course_code.as_deref() {
        check_length("course_code", "Course code", c, COURSE_CODE_MAX_CHARS)?;
    }
    state.filter.check("name", "Name", &name)?;

    let row = StudyGroupRow {
        id: new_id(),
        name,
        description,
        course_code,
        creator_id: actor.to_string(),
        is_private: req.is_private,
        university_id: state.storage.get_user(actor)?.and_then(|u| u.university_id),
        member_count: 1,
        created_at: now,
    };
    state.storage.insert_group_with_creator(&row)?;
    publish(
        state,
        ChangeEvent::new(tables::STUDY_GROUPS, ChangeKind::Insert).key("id", &row.id),
    );
    crate::ulog!("groups: {} created {}", user_id(actor), item_id(&row.id));
    Ok(GroupStatus::for_actor(&row, Some(MemberRole::Admin)))
}

pub fn group_status(state: &AppState, actor: &str, group_id: &str) -> Result<GroupStatus, ServiceError> {
    let row = group_row(state, group_id)?;
    let role = role_of(state, group_id, actor)?;
    Ok(GroupStatus::for_actor(&row, role))
}

/// Public groups of the actor's university (paged, searchable) plus every
/// group the actor belongs to.
pub fn list_groups(
    state: &AppState,
    actor: &str,
    search: Option<&str>,
    limit: u32,
    offset: u32,
) -> Result<GroupList, ServiceError> {
    let university = state.storage.get_user(actor)?.and_then(|u| u.university_id);
    let public = state
        .storage
        .list_public_groups(university.as_deref(), search, limit, offset)?;
    let total_count = state
        .storage
        .count_public_groups(university.as_deref(), search)?;
    let mine = state.storage.list_groups_for_user(actor)?;

    let mut study_groups = Vec::with_capacity(public.len());
    for row in &public {
        study_groups.push(GroupStatus::for_actor(row, role_of(state, &row.id, actor)?));
    }
    let mut my_study_groups = Vec::with_capacity(mine.len());
    for row in &mine {
        my_study_groups.push(GroupStatus::for_actor(row, role_of(state, &row.id, actor)?));
    }
    Ok(GroupList {
        study_groups,
        my_study_groups,
        total_count,
    })
}

/// Join a public group. Joining twice succeeds without changes; private
/// groups need an invitation.
pub fn join_group(
    state: &AppState,
    actor: &str,
    group_id: &str,
    now: u64,
) -> Result<MembershipResponse, ServiceError> {
    let group = group_row(state, group_id)?;
    if role_of(state, group_id, actor)?.is_some() {
        return Ok(MembershipResponse {
            success: true,
            message: "Already a member of this group".to_string(),
            member_count: group.member_count,
        });
    }
    if group.is_private {
        return Err(ServiceError::Forbidden(
            "This study group is private. You need an invitation to join.".to_string(),
        ));
    }
    if state
        .storage
        .add_member(group_id, actor, MemberRole::Member, now)?
    {
        publish_membership(state, group_id, actor, ChangeKind::Insert);
        notify_join(state, &group, actor, now);
        crate::ulog!("groups: {} joined {}", user_id(actor), item_id(group_id));
    }
    Ok(MembershipResponse {
        success: true,
        message: format!("You joined {}", group.name),
        member_count: group_row(state, group_id)?.member_count,
    })
}

pub fn leave_group(
    state: &AppState,
    actor: &str,
    group_id: &str,
) -> Result<MembershipResponse, ServiceError> {
    let group = group_row(state, group_id)?;
    if group.creator_id == actor {
        return Err(ServiceError::BadRequest(
            "The group creator cannot leave the group".to_string(),
        ));
    }
    let message = if state.storage.remove_member(group_id, actor)? {
        publish_membership(state, group_id, actor, ChangeKind::Delete);
        crate::ulog!("groups: {} left {}", user_id(actor), item_id(group_id));
        format!("You left {}", group.name)
    } else {
        "Not a member of this group".to_string()
    };
    Ok(MembershipResponse {
        success: true,
        message,
        member_count: group_row(state, group_id)?.member_count,
    })
}

pub fn update_member_role(
    state: &AppState,
    actor: &str,
    group_id: &str,
    member: &str,
    role: MemberRole,
) -> Result<(), ServiceError> {
    let group = group_row(state, group_id)?;
    require_admin(state, &group, actor)?;
    if member == group.creator_id && role != MemberRole::Admin {
        return Err(ServiceError::BadRequest(
            "The group creator cannot be demoted".to_string(),
        ));
    }
    if !state.storage.update_member_role(group_id, member, role)? {
        return Err(ServiceError::NotFound("Member not found".to_string()));
    }
    publish(
        state,
        ChangeEvent::new(tables::STUDY_GROUP_MEMBERS, ChangeKind::Update)
            .key("study_group_id", group_id)
            .key("user_id", member),
    );
    crate::ulog!(
        "groups: {} set {} to {} in {}",
        user_id(actor),
        user_id(member),
        role.as_str(),
        item_id(group_id)
    );
    Ok(())
}

pub fn remove_member(
    state: &AppState,
    actor: &str,
    group_id: &str,
    member: &str,
) -> Result<MembershipResponse, ServiceError> {
    let group = group_row(state, group_id)?;
    require_admin(state, &group, actor)?;
    if member == group.creator_id {
        return Err(ServiceError::BadRequest(
            "The group creator cannot be removed".to_string(),
        ));
    }
    if !state.storage.remove_member(group_id, member)? {
        return Err(ServiceError::NotFound("Member not found".to_string()));
    }
    publish_membership(state, group_id, member, ChangeKind::Delete);
    Ok(MembershipResponse {
        success: true,
        message: "Member removed".to_string(),
        member_count: group_row(state, group_id)?.member_count,
    })
}

pub fn delete_group(state: &AppState, actor: &str, group_id: &str) -> Result<(), ServiceError> {
    let group = group_row(state, group_id)?;
    if group.creator_id != actor {
        return Err(ServiceError::Forbidden(
            "Only the group creator can delete the group".to_string(),
        ));
    }
    state.storage.delete_group(group_id)?;
    publish(
        state,
        ChangeEvent::new(tables::STUDY_GROUPS, ChangeKind::Delete).key("id", group_id),
    );
    crate::ulog!("groups: {} deleted {}", user_id(actor), item_id(group_id));
    Ok(())
}

// ---------------------------------------------------------------------------
// Invitations
// ---------------------------------------------------------------------------

pub fn create_invitation(
    state: &AppState,
    actor: &str,
    req: CreateInvitationRequest,
    now: u64,
) -> Result<Invitation, ServiceError> {
    let group = group_row(state, &req.study_group_id)?;
    require_admin(state, &group, actor)?;
    if req.max_uses == Some(0) {
        return Err(ServiceError::BadRequest(
            "Maximum uses must be at least 1".to_string(),
        ));
    }
    if req.expires_in_hours == Some(0) {
        return Err(ServiceError::BadRequest(
            "Expiry must be at least 1 hour".to_string(),
        ));
    }

    let expires_at = req
        .expires_in_hours
        .map(|hours| now.saturating_add(hours.saturating_mul(3600)));
    for _ in 0..MAX_CODE_ATTEMPTS {
        let invitation = Invitation {
            id: new_id(),
            study_group_id: group.id.clone(),
            code: new_invitation_code(),
            created_by: actor.to_string(),
            expires_at,
            max_uses: req.max_uses,
            current_uses: 0,
            created_at: now,
        };
        match state.storage.insert_invitation(&invitation) {
            Ok(()) => {
                publish(
                    state,
                    ChangeEvent::new(tables::STUDY_GROUP_INVITATIONS, ChangeKind::Insert)
                        .key("study_group_id", &group.id),
                );
                crate::ulog!(
                    "invitations: {} created a code for {}",
                    user_id(actor),
                    item_id(&group.id)
                );
                return Ok(invitation);
            }
            Err(StorageError::AlreadyExists(_)) => continue,
            Err(e) => return Err(e.into()),
        }
    }
    Err(ServiceError::BadRequest(
        "Could not allocate a unique invitation code".to_string(),
    ))
}

pub fn list_invitations(
    state: &AppState,
    actor: &str,
    group_id: &str,
) -> Result<Vec<Invitation>, ServiceError> {
    let group = group_row(state, group_id)?;
    require_admin(state, &group, actor)?;
    Ok(state.storage.list_invitations(group_id)?)
}

pub fn revoke_invitation(state: &AppState, actor: &str, invitation_id: &str) -> Result<(), ServiceError> {
    let invitation = state
        .storage
        .get_invitation(invitation_id)?
        .ok_or_else(|| ServiceError::NotFound("Invitation not found".to_string()))?;
    let group = group_row(state, &invitation.study_group_id)?;
    require_admin(state, &group, actor)?;
    state.storage.delete_invitation(invitation_id)?;
    publish(
        state,
        ChangeEvent::new(tables::STUDY_GROUP_INVITATIONS, ChangeKind::Delete)
            .key("study_group_id", &group.id),
    );
    Ok(())
}

/// Redeem an invitation code. Expiry, the use ceiling and the membership
/// insert are one storage transaction.
pub fn redeem_invitation(
    state: &AppState,
    actor: &str,
    code: &str,
    now: u64,
) -> Result<RedeemResponse, ServiceError> {
    let code = code.trim();
    if code.is_empty() {
        return Err(ServiceError::Invitation(RedeemFailure::NotFound));
    }
    match state.storage.redeem_invitation(code, actor, now)? {
        Redemption::Joined { study_group_id } => {
            publish_membership(state, &study_group_id, actor, ChangeKind::Insert);
            publish(
                state,
                ChangeEvent::new(tables::STUDY_GROUP_INVITATIONS, ChangeKind::Update)
                    .key("study_group_id", &study_group_id),
            );
            let group = group_row(state, &study_group_id)?;
            notify_join(state, &group, actor, now);
            crate::ulog!(
                "invitations: {} joined {} by code",
                user_id(actor),
                item_id(&study_group_id)
            );
            Ok(RedeemResponse {
                message: format!("You have joined {}", group.name),
                study_group_id,
                already_member: false,
            })
        }
        Redemption::AlreadyMember { study_group_id } => Ok(RedeemResponse {
            study_group_id,
            message: "You are already a member of this group".to_string(),
            already_member: true,
        }),
        Redemption::Rejected(reason) => {
            crate::ulog!(
                "invitations: {} rejected: {}",
                user_id(actor),
                reason.reason()
            );
            Err(ServiceError::Invitation(reason))
        }
    }
}
