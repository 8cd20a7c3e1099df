use crate::{
    dispatch::{MissingDefault, RemovalOutcome, TagOutcome},
    error::AppError,
    media::{self, MediaKind},
    state::AppState,
    web::pages::{render_display_page, render_select_page},
};
use axum::{
    body::Body,
    extract::{Form, Path, State},
    http::{header, Response, StatusCode},
    response::{Html, IntoResponse},
    Json,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tokio::fs::File;
use tokio_util::io::ReaderStream;
use tracing::{debug, info, warn};

const SOURCE: &str = "http";

/// Tag presence event pushed by a remote reader
#[derive(Debug, Default, Deserialize)]
pub struct TagEvent {
    #[serde(default)]
    pub tag_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventStatus {
    Reset,
    NoDefault,
    UnknownTag,
    Ok,
}

#[derive(Debug, PartialEq, Eq, Serialize)]
pub struct EventResponse {
    pub status: EventStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tag_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub selected: Option<String>,
}

impl EventResponse {
    fn status(status: EventStatus) -> Self {
        Self {
            status,
            tag_id: None,
            default: None,
            selected: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TagStatus {
    NoTag,
    UnknownTag,
    Active,
}

#[derive(Debug, PartialEq, Eq, Serialize)]
pub struct CurrentTagResponse {
    pub tag_id: Option<String>,
    pub media: Option<String>,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<MediaKind>,
    pub status: TagStatus,
}

#[derive(Debug, PartialEq, Eq, Serialize)]
pub struct CurrentImageResponse {
    pub filename: Option<String>,
    #[serde(rename = "type")]
    pub kind: Option<MediaKind>,
}

#[derive(Debug, PartialEq, Eq, Serialize)]
pub struct ReloadResponse {
    pub status: &'static str,
    pub map: BTreeMap<String, String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct SelectForm {
    pub media: Option<String>,
}

pub async fn root_handler() -> &'static str {
    "RFID Media Display"
}

/// `POST /rfid_event`
pub async fn rfid_event(
    State(state): State<AppState>,
    Json(event): Json<TagEvent>,
) -> Result<Json<EventResponse>, AppError> {
    let tag_id = event.tag_id.filter(|id| !id.trim().is_empty());
    debug!(tag_id = ?tag_id, "Received RFID event");

    let Some(tag_id) = tag_id else {
        let response = match state.dispatcher.tag_removed(SOURCE, MissingDefault::KeepSelection).await {
            RemovalOutcome::Reset { default, .. } => EventResponse {
                default: Some(default),
                ..EventResponse::status(EventStatus::Reset)
            },
            RemovalOutcome::NoDefault | RemovalOutcome::Cleared { .. } => EventResponse::status(EventStatus::NoDefault),
        };
        return Ok(Json(response));
    };

    let response = match state.dispatcher.tag_present(&tag_id, SOURCE).await? {
        TagOutcome::Unknown { tag_id } => EventResponse {
            tag_id: Some(tag_id),
            ..EventResponse::status(EventStatus::UnknownTag)
        },
        TagOutcome::Selected { tag_id, filename } => EventResponse {
            tag_id: Some(tag_id),
            selected: Some(filename),
            ..EventResponse::status(EventStatus::Ok)
        },
    };
    Ok(Json(response))
}

/// `POST /reload_rfid_map`
pub async fn reload_rfid_map(State(state): State<AppState>) -> Json<ReloadResponse> {
    let map = state.tag_map.reload().await;
    info!(entries = map.len(), "Tag map reloaded on request");
    Json(ReloadResponse {
        status: "reloaded",
        map: map.to_document(),
    })
}

/// `GET /current_tag`
pub async fn current_tag(State(state): State<AppState>) -> Json<CurrentTagResponse> {
    let tag_id = state.selection.get_active_tag().await;
    let map = state.tag_map.snapshot().await;

    let (media, status) = match &tag_id {
        None => (map.default_filename().map(str::to_owned), TagStatus::NoTag),
        Some(id) => match map.lookup(id) {
            Some(filename) => (Some(filename.to_owned()), TagStatus::Active),
            None => (None, TagStatus::UnknownTag),
        },
    };
    let kind = media
        .as_deref()
        .and_then(|filename| MediaKind::classify(filename).known());

    Json(CurrentTagResponse {
        tag_id,
        media,
        kind,
        status,
    })
}

/// `GET /current_image`
pub async fn current_image(State(state): State<AppState>) -> Json<CurrentImageResponse> {
    let response = match state.selection.get_selection().await {
        Some(filename) => CurrentImageResponse {
            kind: MediaKind::classify(&filename).known(),
            filename: Some(state.config.media_url(&filename)),
        },
        None => CurrentImageResponse {
            filename: None,
            kind: None,
        },
    };
    Json(response)
}

/// `GET /select`
pub async fn select_page(State(state): State<AppState>) -> Html<String> {
    render_selection(&state).await
}

/// `POST /select`: manual override bypassing the tag map
pub async fn select_media(State(state): State<AppState>, Form(form): Form<SelectForm>) -> Html<String> {
    match form.media.as_deref().map(str::trim).filter(|media| !media.is_empty()) {
        Some(media) => {
            state.selection.set_selection(Some(media.to_string())).await;
            info!(filename = %media, "Media selected manually");
        }
        None => debug!("Ignoring empty manual selection"),
    }
    render_selection(&state).await
}

async fn render_selection(state: &AppState) -> Html<String> {
    let files = media::list_media_files(&state.config.media.directory)
        .await
        .unwrap_or_else(|e| {
            warn!(
                media_dir = %state.config.media.directory.display(),
                "Failed to list media directory: {}", e
            );
            Vec::new()
        });
    let selected = state.selection.get_selection().await;
    Html(render_select_page(&files, selected.as_deref(), &state.config))
}

/// `GET /display`
pub async fn display_page() -> Html<String> {
    Html(render_display_page())
}

/// Streams a file from the media directory
pub async fn serve_media(
    State(state): State<AppState>,
    Path(filename): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let path = media::resolve_media_path(&state.config.media.directory, &filename)
        .ok_or(AppError::NotFound)?;

    let file = File::open(&path).await.map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => AppError::NotFound,
        _ => AppError::Io(e),
    })?;
    let metadata = file.metadata().await?;
    if !metadata.is_file() {
        return Err(AppError::NotFound);
    }

    let stream = ReaderStream::with_capacity(file, 64 * 1024);
    let response = Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, MediaKind::mime_type(&filename))
        .header(header::CONTENT_LENGTH, metadata.len())
        .header(header::CACHE_CONTROL, "no-cache")
        .body(Body::from_stream(stream))?;

    Ok(response)
}
