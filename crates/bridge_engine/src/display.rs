//! The context header shown at the top of the host panel.
//!
//! Displaying an entity is a two-step background exchange: first its fields
//! are fetched, then (if it has one) its thumbnail is downloaded. Only the
//! most recent request of each kind is honoured; answers carrying an older
//! uid are ignored.

use std::sync::Arc;

use serde_json::{Value, json};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::context::{EntityRef, entity_url};
use crate::error::BridgeError;
use crate::hooks::{ContextFieldsDisplay, error_html};
use crate::panel::{HostPanel, Thumbnail};
use crate::worker::{DataRetriever, WorkKind, WorkerEvent};

/// Entity types with a bundled default thumbnail.
const DEFAULT_THUMB_TYPES: &[&str] = &["Asset", "Project", "Shot", "Task"];

/// Field holding the thumbnail URL.
pub const IMAGE_FIELD: &str = "image";

/// Panel-relative path of the default thumbnail for `entity_type`.
#[must_use]
pub fn default_thumbnail(entity_type: &str) -> String {
    let kind = if entity_type == "Site" || DEFAULT_THUMB_TYPES.contains(&entity_type) {
        entity_type
    } else {
        "Entity"
    };
    format!("../images/default_{kind}_thumb_dark.png")
}

pub struct ContextDisplay {
    hook: Arc<dyn ContextFieldsDisplay>,
    retriever: Option<DataRetriever>,
    site_url: String,
    find_uid: Option<Uuid>,
    thumb_uid: Option<Uuid>,
    current: Option<EntityRef>,
}

impl std::fmt::Debug for ContextDisplay {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContextDisplay")
            .field("site_url", &self.site_url)
            .field("find_uid", &self.find_uid)
            .field("thumb_uid", &self.thumb_uid)
            .field("current", &self.current)
            .finish_non_exhaustive()
    }
}

impl ContextDisplay {
    #[must_use]
    pub fn new(
        hook: Arc<dyn ContextFieldsDisplay>,
        retriever: Option<DataRetriever>,
        site_url: impl Into<String>,
    ) -> Self {
        Self {
            hook,
            retriever,
            site_url: site_url.into(),
            find_uid: None,
            thumb_uid: None,
            current: None,
        }
    }

    pub fn set_hook(&mut self, hook: Arc<dyn ContextFieldsDisplay>) {
        self.hook = hook;
    }

    /// Replace the retriever. The previous one, if any, is returned so the
    /// caller can stop it.
    pub fn set_retriever(&mut self, retriever: DataRetriever) -> Option<DataRetriever> {
        self.find_uid = None;
        self.thumb_uid = None;
        self.retriever.replace(retriever)
    }

    /// The entity currently displayed (or being fetched).
    #[must_use]
    pub fn current(&self) -> Option<&EntityRef> {
        self.current.as_ref()
    }

    /// Forget outstanding requests.
    pub fn clear(&mut self) {
        self.find_uid = None;
        self.thumb_uid = None;
        if let Some(retriever) = &self.retriever {
            retriever.clear();
        }
    }

    /// Start displaying `entity`, or the site when there is none.
    ///
    /// # Errors
    ///
    /// Returns a [`BridgeError`] if a panel call fails.
    pub async fn request(
        &mut self,
        panel: &HostPanel,
        entity: Option<&EntityRef>,
    ) -> Result<(), BridgeError> {
        self.current = entity.cloned();
        let Some(entity) = entity else {
            let html = self.hook.get_context_html(None, &self.site_url);
            panel.send_context_display(&html).await?;
            return panel
                .send_context_thumbnail(&Thumbnail {
                    thumb_path: default_thumbnail("Site").into(),
                    url: self.site_url.clone(),
                })
                .await;
        };

        match &self.retriever {
            Some(retriever) => {
                let mut fields = self.hook.get_entity_fields(&entity.entity_type);
                fields.push(IMAGE_FIELD.to_string());
                let uid = retriever.execute_find_one(&entity.entity_type, entity.id, fields);
                debug!(uid = %uid, entity = %entity, "requested context fields");
                self.find_uid = Some(uid);
                Ok(())
            }
            None => {
                let value = json!({
                    "type": entity.entity_type,
                    "id": entity.id,
                    "name": entity.name,
                });
                let html = self.hook.get_context_html(Some(&value), &self.site_url);
                panel.send_context_display(&html).await?;
                self.send_default_thumbnail(panel, entity).await
            }
        }
    }

    /// Apply a worker result. Returns `false` if it was stale.
    ///
    /// # Errors
    ///
    /// Returns a [`BridgeError`] if a panel call fails.
    pub async fn on_worker_event(
        &mut self,
        panel: &HostPanel,
        event: WorkerEvent,
    ) -> Result<bool, BridgeError> {
        match event {
            WorkerEvent::Completed {
                uid,
                kind: WorkKind::FindOne,
                data,
            } if self.find_uid == Some(uid) => {
                self.find_uid = None;
                self.on_fields(panel, data).await?;
                Ok(true)
            }
            WorkerEvent::Completed {
                uid,
                kind: WorkKind::Thumbnail,
                data,
            } if self.thumb_uid == Some(uid) => {
                self.thumb_uid = None;
                let (Some(path), Some(entity)) = (data.as_str(), self.current.as_ref()) else {
                    return Ok(true);
                };
                panel
                    .send_context_thumbnail(&Thumbnail {
                        thumb_path: path.into(),
                        url: entity_url(&self.site_url, entity),
                    })
                    .await?;
                Ok(true)
            }
            WorkerEvent::Failed {
                uid,
                kind: WorkKind::FindOne,
                message,
            } if self.find_uid == Some(uid) => {
                self.find_uid = None;
                warn!(error = %message, "failed to query context fields");
                panel
                    .send_context_display(&error_html(&format!(
                        "Failed to query context information: {message}"
                    )))
                    .await?;
                Ok(true)
            }
            WorkerEvent::Failed {
                uid,
                kind: WorkKind::Thumbnail,
                message,
            } if self.thumb_uid == Some(uid) => {
                self.thumb_uid = None;
                warn!(error = %message, "failed to download context thumbnail");
                Ok(true)
            }
            other => {
                debug!(uid = %other.uid(), "ignoring stale worker result");
                Ok(false)
            }
        }
    }

    async fn on_fields(&mut self, panel: &HostPanel, data: Value) -> Result<(), BridgeError> {
        let Some(entity) = self.current.clone() else {
            return Ok(());
        };
        let image = data[IMAGE_FIELD].as_str().filter(|s| !s.is_empty());
        match (image, &self.retriever) {
            (Some(url), Some(retriever)) => {
                let uid = retriever.request_thumbnail(url, &entity.entity_type, entity.id);
                self.thumb_uid = Some(uid);
            }
            _ => self.send_default_thumbnail(panel, &entity).await?,
        }
        let html = self.hook.get_context_html(Some(&data), &self.site_url);
        panel.send_context_display(&html).await
    }

    async fn send_default_thumbnail(
        &self,
        panel: &HostPanel,
        entity: &EntityRef,
    ) -> Result<(), BridgeError> {
        panel
            .send_context_thumbnail(&Thumbnail {
                thumb_path: default_thumbnail(&entity.entity_type).into(),
                url: entity_url(&self.site_url, entity),
            })
            .await
    }

    /// Shut the background retriever down.
    pub async fn stop(&mut self) {
        if let Some(retriever) = self.retriever.take() {
            retriever.stop().await;
        }
    }
}
