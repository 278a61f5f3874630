//! Resource creation, editing, file upload and download.

use crate::api::{CreateResourceRequest, EditResourceRequest, ResourceView, UploadResponse};
use crate::logging::{item_id, user_id};
use crate::model::{tables, ChangeEvent, ChangeKind};
use crate::server::service::social::visible_resource;
use crate::server::service::{clean_optional, new_id, publish, ServiceError};
use crate::server::state::AppState;
use crate::storage::{content_type_to_ext, ResourceRow, ResourceUpdate};
use crate::validation::validate_resource_fields;

pub const LINK_RESOURCE_TYPE: &str = "link";
pub const NO_DOWNLOADABLE_CONTENT: &str = "No downloadable content available";

/// Thumbnail regeneration request, fired after the state lock is released.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThumbnailJob {
    pub webhook_url: String,
    pub resource_id: String,
    pub resource_type: String,
    pub external_link: Option<String>,
}

/// File bytes ready to be served.
#[derive(Debug, Clone)]
pub struct Download {
    pub data: Vec<u8>,
    pub content_type: String,
    pub file_name: String,
    pub download_count: u64,
}

fn owned_resource(
    state: &AppState,
    actor: &str,
    resource_id: &str,
    verb: &str,
) -> Result<ResourceRow, ServiceError> {
    let row = state
        .storage
        .get_resource(resource_id)?
        .ok_or_else(|| ServiceError::NotFound("Resource not found".to_string()))?;
    if row.author_id != actor {
        return Err(ServiceError::Forbidden(format!(
            "You are not authorized to {verb} this resource"
        )));
    }
    Ok(row)
}

pub fn view(state: &AppState, actor: &str, row: &ResourceRow) -> Result<ResourceView, ServiceError> {
    Ok(ResourceView::from_row(
        row,
        state.storage.count_likes(&row.id)?,
        state.storage.has_liked(&row.id, actor)?,
    ))
}

pub fn create_resource(
    state: &AppState,
    actor: &str,
    req: CreateResourceRequest,
    now: u64,
) -> Result<(ResourceView, Option<ThumbnailJob>), ServiceError> {
    let title = req.title.trim().to_string();
    let description = clean_optional(req.description);
    let course_code = clean_optional(req.course_code);
    let external_link = clean_optional(req.external_link);
    validate_resource_fields(
        &state.filter,
        &title,
        description.as_deref(),
        course_code.as_deref(),
        external_link.as_deref(),
    )?;
    let resource_type = req.resource_type.trim().to_lowercase();
    if resource_type.is_empty() {
        return Err(ServiceError::BadRequest("Resource type is required".to_string()));
    }

    let university_id = state.storage.get_user(actor)?.and_then(|u| u.university_id);
    let row = ResourceRow {
        id: new_id(),
        author_id: actor.to_string(),
        title,
        description,
        resource_type,
        course_code,
        external_link,
        file_name: None,
        file_content_type: None,
        is_public: req.is_public,
        university_id,
        thumbnail_url: None,
        comment_count: 0,
        download_count: 0,
        created_at: now,
        updated_at: now,
    };
    state.storage.insert_resource(&row)?;
    publish(
        state,
        ChangeEvent::new(tables::RESOURCES, ChangeKind::Insert)
            .key("id", &row.id)
            .key("author_id", actor),
    );
    crate::ulog!("resources: {} created {}", user_id(actor), item_id(&row.id));

    let job = state.thumbnail_url.as_ref().map(|url| ThumbnailJob {
        webhook_url: url.clone(),
        resource_id: row.id.clone(),
        resource_type: row.resource_type.clone(),
        external_link: row.external_link.clone(),
    });
    Ok((view(state, actor, &row)?, job))
}

pub fn get_resource(
    state: &AppState,
    actor: &str,
    resource_id: &str,
) -> Result<ResourceView, ServiceError> {
    let row = visible_resource(state, actor, resource_id)?;
    view(state, actor, &row)
}

/// Owner-only edit. Returns whether a thumbnail regeneration was triggered:
/// when the type changed, or the link changed on a link resource.
pub fn edit_resource(
    state: &AppState,
    actor: &str,
    resource_id: &str,
    req: EditResourceRequest,
    now: u64,
) -> Result<Option<ThumbnailJob>, ServiceError> {
    let existing = owned_resource(state, actor, resource_id, "edit")?;

    let update = ResourceUpdate {
        title: req.title.trim().to_string(),
        description: clean_optional(req.description),
        resource_type: req.resource_type.trim().to_lowercase(),
        course_code: clean_optional(req.course_code),
        external_link: clean_optional(req.external_link),
    };
    validate_resource_fields(
        &state.filter,
        &update.title,
        update.description.as_deref(),
        update.course_code.as_deref(),
        update.external_link.as_deref(),
    )?;
    if update.resource_type.is_empty() {
        return Err(ServiceError::BadRequest("Resource type is required".to_string()));
    }

    state.storage.update_resource(resource_id, &update, now)?;
    publish(
        state,
        ChangeEvent::new(tables::RESOURCES, ChangeKind::Update).key("id", resource_id),
    );
    crate::ulog!("resources: {} edited {}", user_id(actor), item_id(resource_id));

    let needs_thumbnail = update.resource_type != existing.resource_type
        || (update.resource_type == LINK_RESOURCE_TYPE
            && update.external_link != existing.external_link);
    if !needs_thumbnail {
        return Ok(None);
    }
    Ok(state.thumbnail_url.as_ref().map(|url| ThumbnailJob {
        webhook_url: url.clone(),
        resource_id: resource_id.to_string(),
        resource_type: update.resource_type.clone(),
        external_link: update.external_link.clone(),
    }))
}

pub fn delete_resource(state: &AppState, actor: &str, resource_id: &str) -> Result<(), ServiceError> {
    owned_resource(state, actor, resource_id, "delete")?;
    state.storage.delete_resource(resource_id)?;
    publish(
        state,
        ChangeEvent::new(tables::RESOURCES, ChangeKind::Delete).key("id", resource_id),
    );
    crate::ulog!("resources: {} deleted {}", user_id(actor), item_id(resource_id));
    Ok(())
}

pub fn upload_file(
    state: &AppState,
    actor: &str,
    resource_id: &str,
    content_type: &str,
    original_name: Option<&str>,
    data: &[u8],
) -> Result<UploadResponse, ServiceError> {
    owned_resource(state, actor, resource_id, "upload files to")?;
    if data.is_empty() {
        return Err(ServiceError::BadRequest("no file provided".to_string()));
    }

    let mut ext = content_type_to_ext(content_type).to_string();
    if ext == "bin" {
        if let Some(guessed) = original_name
            .and_then(|n| std::path::Path::new(n).extension())
            .and_then(|e| e.to_str())
            .filter(|e| e.chars().all(|c| c.is_ascii_alphanumeric()) && e.len() <= 8)
        {
            ext = guessed.to_ascii_lowercase();
        }
    }
    let file_name = state
        .storage
        .store_resource_file(resource_id, &ext, content_type, data)?;
    publish(
        state,
        ChangeEvent::new(tables::RESOURCES, ChangeKind::Update).key("id", resource_id),
    );
    crate::ulog!(
        "resources: {} uploaded {} bytes to {}",
        user_id(actor),
        data.len(),
        item_id(resource_id)
    );
    Ok(UploadResponse {
        file_name,
        content_type: content_type.to_string(),
        size_bytes: data.len() as u64,
    })
}

/// Read the file of a resource and count the download.
pub fn download(state: &AppState, actor: &str, resource_id: &str) -> Result<Download, ServiceError> {
    let row = visible_resource(state, actor, resource_id)?;
    let Some(file_name) = row.file_name.clone() else {
        return Err(ServiceError::NotFound(NO_DOWNLOADABLE_CONTENT.to_string()));
    };
    let data = state
        .storage
        .read_resource_file(&file_name)?
        .ok_or_else(|| ServiceError::NotFound(NO_DOWNLOADABLE_CONTENT.to_string()))?;
    let download_count = state.storage.record_download(resource_id)?;
    publish(
        state,
        ChangeEvent::new(tables::RESOURCES, ChangeKind::Update).key("id", resource_id),
    );

    let content_type = row.file_content_type.clone().unwrap_or_else(|| {
        mime_guess::from_path(&file_name)
            .first_or_octet_stream()
            .to_string()
    });
    Ok(Download {
        data,
        content_type,
        file_name,
        download_count,
    })
}

/// Post the regeneration request to the thumbnail webhook. Blocking; run it
/// off the async executor.
pub fn fire_thumbnail_webhook(job: &ThumbnailJob) -> Result<(), String> {
    let body = serde_json::json!({
        "resourceId": job.resource_id,
        "resourceType": job.resource_type,
        "externalLink": job.external_link,
    });
    let agent = ureq::AgentBuilder::new()
        .timeout(std::time::Duration::from_secs(
            crate::server::config::THUMBNAIL_TIMEOUT_SECS,
        ))
        .build();
    agent
        .post(&job.webhook_url)
        .set("Content-Type", "application/json")
        .send_string(&body.to_string())
        .map_err(|e| format!("thumbnail webhook failed: {e}"))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::service::test_support::{add_user, state};

    fn create(state: &AppState, actor: &str, resource_type: &str, link: Option<&str>) -> ResourceView {
        let req = CreateResourceRequest {
            title: "Lecture 4".to_string(),
            description: Some("Graphs".to_string()),
            resource_type: resource_type.to_string(),
            course_code: Some("CS201".to_string()),
            external_link: link.map(str::to_string),
            is_public: true,
        };
        create_resource(state, actor, req, 10).unwrap().0
    }

    fn edit_req(resource_type: &str, link: Option<&str>) -> EditResourceRequest {
        EditResourceRequest {
            title: "Lecture 4".to_string(),
            description: None,
            resource_type: resource_type.to_string(),
            course_code: None,
            external_link: link.map(str::to_string),
        }
    }

    #[test]
    fn edit_is_owner_only_and_enforces_limits() {
        let (state, _dir) = state();
        add_user(&state, "alice");
        let view = create(&state, "alice", "notes", None);
        assert_eq!(view.like_count, 0);

        assert!(matches!(
            edit_resource(&state, "bob", &view.id, edit_req("notes", None), 11),
            Err(ServiceError::Forbidden(_))
        ));
        let mut long = edit_req("notes", None);
        long.title = "x".repeat(26);
        match edit_resource(&state, "alice", &view.id, long, 11) {
            Err(ServiceError::Validation(e)) => {
                assert_eq!(e.message, "Title must be 25 characters or less")
            }
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[test]
    fn thumbnail_regenerates_on_type_or_link_change() {
        let (mut state, _dir) = state();
        state.thumbnail_url = Some("http://127.0.0.1:9/thumbs".to_string());
        add_user(&state, "alice");
        let view = create(&state, "alice", "link", Some("https://a.example"));

        let same = edit_resource(&state, "alice", &view.id, edit_req("link", Some("https://a.example")), 11);
        assert_eq!(same.unwrap(), None);
        let job = edit_resource(&state, "alice", &view.id, edit_req("link", Some("https://b.example")), 12)
            .unwrap()
            .unwrap();
        assert_eq!(job.external_link.as_deref(), Some("https://b.example"));
        assert!(edit_resource(&state, "alice", &view.id, edit_req("notes", None), 13)
            .unwrap()
            .is_some());
    }

    #[test]
    fn download_requires_a_file_and_counts() {
        let (state, _dir) = state();
        add_user(&state, "alice");
        let view = create(&state, "alice", "notes", None);

        match download(&state, "bob", &view.id) {
            Err(ServiceError::NotFound(msg)) => assert_eq!(msg, NO_DOWNLOADABLE_CONTENT),
            other => panic!("expected not found, got {other:?}"),
        }

        upload_file(&state, "alice", &view.id, "application/octet-stream", Some("notes.TEX"), b"\\section{}")
            .unwrap();
        let first = download(&state, "bob", &view.id).unwrap();
        assert!(first.file_name.ends_with(".tex"));
        assert_eq!(first.download_count, 1);
        assert_eq!(download(&state, "bob", &view.id).unwrap().download_count, 2);

        delete_resource(&state, "alice", &view.id).unwrap();
        assert!(matches!(
            get_resource(&state, "alice", &view.id),
            Err(ServiceError::NotFound(_))
        ));
    }
}
