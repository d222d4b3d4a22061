use std::future::Future;

use axum::{
    body::Body,
    extract::{
        multipart::{Field, MultipartError},
        Multipart, Path, State,
    },
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use drop_store::{ByteStream, ChunkSubmission, ContentObject, DropError, DropResult, ObjectId};
use futures::TryStreamExt;
use serde::Serialize;
use serde_json::json;
use tokio::sync::mpsc;

use crate::{DropAxumError, DropAxumState};

type Channel = mpsc::Receiver<Result<Bytes, std::io::Error>>;

fn channel_stream(rx: Channel) -> ByteStream {
    Box::pin(futures::stream::unfold(rx, |mut rx| async move {
        rx.recv().await.map(|item| (item, rx))
    }))
}

fn found(location: String) -> Response {
    (StatusCode::FOUND, [(header::LOCATION, location)]).into_response()
}

fn multipart_error(err: MultipartError, limit: u64) -> DropAxumError {
    if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
        return DropError::SizeLimitExceeded { limit }.into();
    }
    DropError::invalid(err.body_text()).into()
}

/// Dropzone form fields that precede the file part
#[derive(Default)]
struct ChunkFields {
    token: Option<String>,
    index: Option<u32>,
    total: Option<u32>,
    chunk_size: Option<u64>,
}

impl ChunkFields {
    /// `None` when the form carries no session token (plain single-file form post)
    fn into_submission(self, filename: &str) -> DropResult<Option<ChunkSubmission>> {
        let Some(token) = self.token.filter(|t| !t.is_empty()) else {
            return Ok(None);
        };
        let index = self
            .index
            .ok_or_else(|| DropError::invalid("Missing dzchunkindex"))?;
        let total = self
            .total
            .ok_or_else(|| DropError::invalid("Missing dztotalchunkcount"))?;

        Ok(Some(ChunkSubmission::new(
            token,
            index.saturating_add(1),
            total,
            self.chunk_size.unwrap_or(0),
            filename,
        )))
    }
}

fn parse_field<T: std::str::FromStr>(name: &str, value: &str) -> DropResult<T> {
    value
        .trim()
        .parse()
        .map_err(|_| DropError::invalid(format!("{} must be a number", name)))
}

/// Feed a multipart file field into an upload running alongside it
async fn pump_field<F, Fut>(mut field: Field<'_>, upload: F) -> DropResult<ContentObject>
where
    F: FnOnce(ByteStream) -> Fut,
    Fut: Future<Output = DropResult<ContentObject>>,
{
    let (tx, rx) = mpsc::channel(8);
    let feed = async move {
        loop {
            let item = match field.chunk().await {
                Ok(Some(bytes)) => Ok(bytes),
                Ok(None) => break,
                Err(e) => Err(std::io::Error::other(e)),
            };
            let failed = item.is_err();
            if tx.send(item).await.is_err() || failed {
                break;
            }
        }
    };

    let (result, ()) = tokio::join!(upload(channel_stream(rx)), feed);
    result
}

/// `PUT /{filename}`, or any deeper path whose last component names the file
pub async fn put_file(
    State(state): State<DropAxumState>,
    Path(segments): Path<Vec<(String, String)>>,
    body: Body,
) -> Result<Response, DropAxumError> {
    let filename = segments
        .last()
        .map(|(_, value)| value.as_str())
        .unwrap_or_default();
    let stream: ByteStream = Box::pin(body.into_data_stream().map_err(std::io::Error::other));
    let object = state.service.put(filename, stream).await?;

    let link = format!("{}\n", state.link(&object.path()));
    Ok((StatusCode::CREATED, link).into_response())
}

/// `POST /` with dropzone chunk fields followed by the `file` part
pub async fn upload(
    State(state): State<DropAxumState>,
    mut multipart: Multipart,
) -> Result<Response, DropAxumError> {
    let limit = state.service.config().max_bytes_per_file;
    let on_error = |e| multipart_error(e, limit);
    let mut fields = ChunkFields::default();

    while let Some(field) = multipart.next_field().await.map_err(on_error)? {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "file" => {
                let filename = field
                    .file_name()
                    .map(str::to_string)
                    .ok_or_else(|| DropError::invalid("No filename provided."))?;

                let object = match fields.into_submission(&filename)? {
                    Some(submission) => {
                        tracing::debug!(
                            token = %submission.token,
                            index = submission.index,
                            total = submission.total,
                            "received chunk"
                        );
                        pump_field(field, |body| state.service.upload_chunk(submission, body)).await?
                    }
                    None => pump_field(field, |body| state.service.put(&filename, body)).await?,
                };

                return Ok((StatusCode::CREATED, Json(json!({ "id": object.path() }))).into_response());
            }
            "dzuuid" => fields.token = Some(field.text().await.map_err(on_error)?),
            "dzchunkindex" => {
                let text = field.text().await.map_err(on_error)?;
                fields.index = Some(parse_field(&name, &text)?);
            }
            "dztotalchunkcount" => {
                let text = field.text().await.map_err(on_error)?;
                fields.total = Some(parse_field(&name, &text)?);
            }
            "dzchunksize" => {
                let text = field.text().await.map_err(on_error)?;
                fields.chunk_size = Some(parse_field(&name, &text)?);
            }
            _ => tracing::debug!(field = %name, "ignoring form field"),
        }
    }

    Err(DropError::invalid("Missing file field").into())
}

/// `GET /{id}`
pub async fn redirect_to_object(
    State(state): State<DropAxumState>,
    Path(id): Path<String>,
) -> Result<Response, DropAxumError> {
    let object = state.service.load(&ObjectId::from(id)).await?;
    Ok(found(format!("/{}", object.path())))
}

/// `GET /{id}/{name}`: decompressed payload
pub async fn download(
    State(state): State<DropAxumState>,
    Path((id, name)): Path<(String, String)>,
) -> Result<Response, DropAxumError> {
    let id = ObjectId::from(id);
    let object = state.service.load(&id).await?;
    if object.name != name {
        return Ok(found(format!("/{}", object.path())));
    }

    let opened = state.service.open(&id, true).await?;
    Ok((
        [(header::CONTENT_TYPE, opened.object.content_type.clone())],
        Body::from_stream(opened.body),
    )
        .into_response())
}

/// `GET /1/{id}/{name}`: payload exactly as stored
pub async fn download_raw(
    State(state): State<DropAxumState>,
    Path((id, name)): Path<(String, String)>,
) -> Result<Response, DropAxumError> {
    let id = ObjectId::from(id);
    let object = state.service.load(&id).await?;
    if object.name != name {
        return Ok(found(format!("/1/{}", object.path())));
    }

    let opened = state.service.open(&id, false).await?;
    Ok((
        [
            (header::CONTENT_ENCODING, "gzip".to_string()),
            (header::CONTENT_TYPE, opened.object.content_type.clone()),
        ],
        Body::from_stream(opened.body),
    )
        .into_response())
}

#[derive(Serialize)]
struct ObjectInfo {
    #[serde(flatten)]
    object: ContentObject,
    link: String,
    time_to_deletion_secs: u64,
    expires_at: DateTime<Utc>,
}

/// `GET /info/{id}`
pub async fn info(
    State(state): State<DropAxumState>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, DropAxumError> {
    let object = state.service.load(&ObjectId::from(id)).await?;
    let minutes_per_gigabyte = state.service.config().minutes_per_gigabyte;

    let info = ObjectInfo {
        link: state.link(&object.path()),
        time_to_deletion_secs: object.time_to_deletion(minutes_per_gigabyte).as_secs(),
        expires_at: object.expires_at(minutes_per_gigabyte),
        object,
    };
    Ok(Json(serde_json::to_value(info).map_err(DropError::from)?))
}

/// `DELETE /{id}` and `GET /delete/{id}`
pub async fn delete_object(
    State(state): State<DropAxumState>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, DropAxumError> {
    state.service.delete(&ObjectId::from(id.as_str())).await?;
    Ok(Json(json!({ "message": format!("Removed {}.", id) })))
}

/// `GET /exists/{id}/{name}`
pub async fn exists(
    State(state): State<DropAxumState>,
    Path((id, name)): Path<(String, String)>,
) -> Result<Json<serde_json::Value>, DropAxumError> {
    let found = state
        .service
        .exists(&ObjectId::from(id.as_str()), &name)
        .await?;
    Ok(Json(json!({
        "exists": if found { "yes" } else { "no" },
        "id": id,
        "name": name,
    })))
}

pub async fn health() -> &'static str {
    "ok"
}
