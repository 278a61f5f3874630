//! Getting a resource's content to the user.
//!
//! External links open in a fresh browsing context; files go through a
//! strictly sequential fallback chain: fetch-and-save, then an anchor
//! download against the serving endpoint, then a new tab. Inside the
//! embedded mobile shell both kinds navigate in place instead. Every step
//! is reflected in a [`DeliveryStatus`] watch channel.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

use crate::api::ResourceView;
use crate::client::backend::{ClientError, EngagementBackend};
use crate::logging::item_id;

/// How long a success indicator stays up before returning to idle.
pub const SUCCESS_INDICATOR_TTL: Duration = Duration::from_secs(3);

pub const NO_CONTENT_MESSAGE: &str = "No downloadable content available";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliverySource {
    ExternalLink(String),
    File {
        resource_id: String,
        file_name: String,
    },
    Nothing,
}

impl DeliverySource {
    /// An external link wins over an uploaded file.
    pub fn for_resource(resource: &ResourceView) -> Self {
        if let Some(link) = resource.external_link.as_deref().filter(|l| !l.trim().is_empty()) {
            return DeliverySource::ExternalLink(link.to_string());
        }
        if resource.has_file {
            let title = resource.title.trim();
            let file_name = if title.is_empty() { "download" } else { title };
            return DeliverySource::File {
                resource_id: resource.id.clone(),
                file_name: file_name.to_string(),
            };
        }
        DeliverySource::Nothing
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryStage {
    InPlace,
    NewContext,
    BlobSave,
    Anchor,
    NewTab,
}

impl DeliveryStage {
    pub fn as_str(self) -> &'static str {
        match self {
            DeliveryStage::InPlace => "in_place",
            DeliveryStage::NewContext => "new_context",
            DeliveryStage::BlobSave => "blob_save",
            DeliveryStage::Anchor => "anchor",
            DeliveryStage::NewTab => "new_tab",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryStatus {
    Idle,
    Downloading { stage: DeliveryStage },
    Succeeded { stage: DeliveryStage },
    Failed { message: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryError {
    NoContent,
    /// The environment refused to open a new browsing context.
    Blocked,
    Failed(String),
    Fetch(ClientError),
    /// Every mechanism in the chain failed; carries the last error.
    Exhausted(Box<DeliveryError>),
}

impl std::fmt::Display for DeliveryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeliveryError::NoContent => f.write_str(NO_CONTENT_MESSAGE),
            DeliveryError::Blocked => f.write_str("Pop-up blocked"),
            DeliveryError::Failed(msg) => write!(f, "{msg}"),
            DeliveryError::Fetch(e) => write!(f, "{e}"),
            DeliveryError::Exhausted(last) => write!(f, "Download failed: {last}"),
        }
    }
}

impl std::error::Error for DeliveryError {}

impl From<ClientError> for DeliveryError {
    fn from(e: ClientError) -> Self {
        DeliveryError::Fetch(e)
    }
}

/// The host the content is delivered into.
pub trait DeliveryEnvironment: Send + Sync {
    /// Running inside the embedded mobile shell.
    fn is_embedded_shell(&self) -> bool;
    fn navigate_in_place(&self, url: &str) -> Result<(), DeliveryError>;
    /// Open `url` in a new browsing context with no back-reference to the
    /// opener. `Err(Blocked)` when the host refuses.
    fn open_new_context(&self, url: &str) -> Result<(), DeliveryError>;
    /// Save already fetched bytes through a local object URL.
    fn save_blob(&self, file_name: &str, data: &[u8]) -> Result<(), DeliveryError>;
    fn anchor_download(&self, url: &str, file_name: &str) -> Result<(), DeliveryError>;
    fn open_new_tab(&self, url: &str) -> Result<(), DeliveryError>;
}

pub struct Deliverer {
    backend: Arc<dyn EngagementBackend>,
    env: Arc<dyn DeliveryEnvironment>,
    status: Arc<watch::Sender<DeliveryStatus>>,
    generation: Arc<AtomicU64>,
    indicator_ttl: Duration,
}

impl Deliverer {
    pub fn new(backend: Arc<dyn EngagementBackend>, env: Arc<dyn DeliveryEnvironment>) -> Self {
        Self::with_indicator_ttl(backend, env, SUCCESS_INDICATOR_TTL)
    }

    pub fn with_indicator_ttl(
        backend: Arc<dyn EngagementBackend>,
        env: Arc<dyn DeliveryEnvironment>,
        indicator_ttl: Duration,
    ) -> Self {
        let (status, _) = watch::channel(DeliveryStatus::Idle);
        Self {
            backend,
            env,
            status: Arc::new(status),
            generation: Arc::new(AtomicU64::new(0)),
            indicator_ttl,
        }
    }

    pub fn status(&self) -> watch::Receiver<DeliveryStatus> {
        self.status.subscribe()
    }

    pub fn current_status(&self) -> DeliveryStatus {
        self.status.borrow().clone()
    }

    fn set(&self, status: DeliveryStatus) {
        self.status.send_replace(status);
    }

    /// Deliver `source`, returning the mechanism that succeeded.
    pub async fn deliver(&self, source: &DeliverySource) -> Result<DeliveryStage, DeliveryError> {
        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        let result = match source {
            DeliverySource::Nothing => Err(DeliveryError::NoContent),
            DeliverySource::ExternalLink(url) => self.deliver_link(url),
            DeliverySource::File {
                resource_id,
                file_name,
            } => self.deliver_file(resource_id, file_name).await,
        };

        match &result {
            Ok(stage) => {
                self.set(DeliveryStatus::Succeeded { stage: *stage });
                self.schedule_reset(generation);
            }
            Err(e) => {
                crate::ulog!("delivery: failed: {}", e);
                self.set(DeliveryStatus::Failed {
                    message: e.to_string(),
                });
            }
        }
        result
    }

    fn deliver_link(&self, url: &str) -> Result<DeliveryStage, DeliveryError> {
        if self.env.is_embedded_shell() {
            self.set(DeliveryStatus::Downloading {
                stage: DeliveryStage::InPlace,
            });
            self.env.navigate_in_place(url)?;
            return Ok(DeliveryStage::InPlace);
        }

        self.set(DeliveryStatus::Downloading {
            stage: DeliveryStage::NewContext,
        });
        match self.env.open_new_context(url) {
            Ok(()) => Ok(DeliveryStage::NewContext),
            Err(e) => {
                crate::ulog!("delivery: new context refused ({}), navigating in place", e);
                self.set(DeliveryStatus::Downloading {
                    stage: DeliveryStage::InPlace,
                });
                self.env.navigate_in_place(url)?;
                Ok(DeliveryStage::InPlace)
            }
        }
    }

    async fn deliver_file(
        &self,
        resource_id: &str,
        file_name: &str,
    ) -> Result<DeliveryStage, DeliveryError> {
        let url = self.backend.download_url(resource_id);
        if self.env.is_embedded_shell() {
            self.set(DeliveryStatus::Downloading {
                stage: DeliveryStage::InPlace,
            });
            self.env.navigate_in_place(&url)?;
            return Ok(DeliveryStage::InPlace);
        }

        self.set(DeliveryStatus::Downloading {
            stage: DeliveryStage::BlobSave,
        });
        let saved = match self.backend.fetch_download(resource_id).await {
            Ok(data) => self.env.save_blob(file_name, &data),
            Err(e) => Err(e.into()),
        };
        let err = match saved {
            Ok(()) => return Ok(DeliveryStage::BlobSave),
            Err(e) => e,
        };
        crate::ulog!(
            "delivery: blob save of {} failed ({}), trying anchor",
            item_id(resource_id),
            err
        );

        self.set(DeliveryStatus::Downloading {
            stage: DeliveryStage::Anchor,
        });
        let err = match self.env.anchor_download(&url, file_name) {
            Ok(()) => return Ok(DeliveryStage::Anchor),
            Err(e) => e,
        };
        crate::ulog!(
            "delivery: anchor download of {} failed ({}), opening tab",
            item_id(resource_id),
            err
        );

        self.set(DeliveryStatus::Downloading {
            stage: DeliveryStage::NewTab,
        });
        match self.env.open_new_tab(&url) {
            Ok(()) => Ok(DeliveryStage::NewTab),
            Err(e) => Err(DeliveryError::Exhausted(Box::new(e))),
        }
    }

    /// Return to idle after the TTL unless another delivery started since.
    fn schedule_reset(&self, generation: u64) {
        let status = self.status.clone();
        let current = self.generation.clone();
        let ttl = self.indicator_ttl;
        tokio::spawn(async move {
            tokio::time::sleep(ttl).await;
            if current.load(Ordering::Acquire) == generation {
                status.send_replace(DeliveryStatus::Idle);
            }
        });
    }
}
