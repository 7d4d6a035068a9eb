//! Multipart file uploads.
//!
//! One [`Uploader`] exists per container. It is built lazily, the first time a
//! route declares a file parameter, from the process-wide upload settings
//! (destination, filter, limits). Every route with files gets its own
//! [`FilesParser`] stage: the shared uploader plus that route's field list.
//!
//! Text parts of a multipart body land in [`Request::form`](crate::Request::form),
//! file parts in [`Request::files`](crate::Request::files). With a destination
//! directory configured, files are written there under a random name; otherwise
//! they are kept in memory.

use std::convert::Infallible;
use std::path::PathBuf;
use std::sync::Arc;

use bytes::Bytes;
use indexmap::IndexMap;
use serde::Deserialize;
use tracing::{debug, trace, warn};

use crate::error::ServiceError;
use crate::metadata::FileDescriptor;
use crate::middleware::{BoxFuture, Exchange, Flow, Middleware};
use crate::request::Request;

/// Size and count limits applied to every multipart body.
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct FileLimits {
    /// Max field name length.
    pub field_name_size: Option<usize>,
    /// Max size of one text field value, in bytes.
    pub field_size: Option<usize>,
    /// Max number of text fields.
    pub fields: Option<usize>,
    /// Max size of one file, in bytes.
    pub file_size: Option<usize>,
    /// Max number of files.
    pub files: Option<usize>,
    /// Max number of parts (fields + files).
    pub parts: Option<usize>,
}

/// What a [`FileFilter`] gets to see before a file is read.
#[derive(Clone, Debug)]
pub struct FileInfo {
    pub field_name: String,
    pub file_name: String,
    pub content_type: Option<String>,
}

/// Decides whether a file is kept (`Ok(true)`), silently skipped (`Ok(false)`),
/// or the whole request rejected (`Err`).
pub type FileFilter = Arc<dyn Fn(&Request, &FileInfo) -> Result<bool, ServiceError> + Send + Sync>;

/// One received file.
#[derive(Clone, Debug)]
pub struct UploadedFile {
    pub field_name: String,
    pub file_name: String,
    pub content_type: Option<String>,
    pub size: usize,
    /// Contents, when no destination directory is configured.
    pub data: Option<Bytes>,
    /// Location on disk, when a destination directory is configured.
    pub path: Option<PathBuf>,
}

/// Per-field configuration for one route.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct FieldSpec {
    pub name: String,
    /// `None` means any number of files.
    pub max_count: Option<usize>,
}

impl From<&FileDescriptor> for FieldSpec {
    fn from(file: &FileDescriptor) -> Self {
        Self { name: file.name.clone(), max_count: file.single.then_some(1) }
    }
}

/// The shared multipart decoder.
pub struct Uploader {
    dest: Option<PathBuf>,
    filter: Option<FileFilter>,
    limits: FileLimits,
}

impl Uploader {
    pub fn new(dest: Option<PathBuf>, filter: Option<FileFilter>, limits: FileLimits) -> Self {
        Self { dest, filter, limits }
    }

    pub fn dest(&self) -> Option<&PathBuf> { self.dest.as_ref() }
    pub fn limits(&self) -> &FileLimits { &self.limits }

    /// A stage accepting files only on `fields`.
    pub fn fields(self: &Arc<Self>, fields: Vec<FieldSpec>) -> FilesParser {
        FilesParser { uploader: Arc::clone(self), fields }
    }

    async fn store(&self, info: FileInfo, data: Bytes) -> Result<UploadedFile, ServiceError> {
        let size = data.len();
        let (data, path) = match &self.dest {
            Some(dir) => {
                let path = dir.join(uuid::Uuid::new_v4().simple().to_string());
                tokio::fs::write(&path, &data)
                    .await
                    .map_err(|e| ServiceError::Internal(format!("storing upload in {}: {e}", dir.display())))?;
                (None, Some(path))
            }
            None => (Some(data), None),
        };
        Ok(UploadedFile {
            field_name: info.field_name,
            file_name: info.file_name,
            content_type: info.content_type,
            size,
            data,
            path,
        })
    }
}

fn over(limit: Option<usize>, value: usize) -> bool {
    limit.is_some_and(|max| value > max)
}

fn multipart_error(e: multer::Error) -> ServiceError {
    ServiceError::BadRequest(e.to_string())
}

/// The file-upload stage of one route.
pub struct FilesParser {
    uploader: Arc<Uploader>,
    fields: Vec<FieldSpec>,
}

impl FilesParser {
    pub fn field_specs(&self) -> &[FieldSpec] { &self.fields }

    /// Receives every part. On failure, files already written to disk are
    /// removed before the error is returned.
    async fn parse(&self, exchange: &mut Exchange) -> Result<(), ServiceError> {
        let mut written = Vec::new();
        let outcome = self.receive(exchange, &mut written).await;
        if outcome.is_err() {
            discard(&written).await;
        }
        outcome
    }

    async fn receive(&self, exchange: &mut Exchange, written: &mut Vec<PathBuf>) -> Result<(), ServiceError> {
        let Some(content_type) = exchange.request.header("content-type") else { return Ok(()) };
        let Ok(boundary) = multer::parse_boundary(content_type) else {
            trace!("not a multipart body, skipping uploads");
            return Ok(());
        };

        let limits = &self.uploader.limits;
        let body = exchange.request.body().clone();
        let stream = futures_util::stream::once(async move { Ok::<Bytes, Infallible>(body) });
        let mut multipart = multer::Multipart::new(stream, boundary);

        let mut files: IndexMap<String, Vec<UploadedFile>> = IndexMap::new();
        let mut text_fields = Vec::new();
        let (mut parts, mut file_count) = (0usize, 0usize);

        while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
            parts += 1;
            if over(limits.parts, parts) {
                return Err(ServiceError::PayloadTooLarge { limit: limits.parts.unwrap_or_default() });
            }
            let name = field.name().unwrap_or_default().to_owned();
            if over(limits.field_name_size, name.len()) {
                return Err(ServiceError::BadRequest(format!("field name too long: `{name}`")));
            }

            let Some(file_name) = field.file_name().map(str::to_owned) else {
                let value = field.text().await.map_err(multipart_error)?;
                if over(limits.field_size, value.len()) {
                    return Err(ServiceError::PayloadTooLarge { limit: limits.field_size.unwrap_or_default() });
                }
                text_fields.push((name, value));
                if over(limits.fields, text_fields.len()) {
                    return Err(ServiceError::BadRequest("too many fields".into()));
                }
                continue;
            };

            let spec = self.fields.iter().find(|s| s.name == name);
            let received = files.get(&name).map_or(0, Vec::len);
            match spec {
                Some(spec) if !over(spec.max_count, received + 1) => {}
                _ => return Err(ServiceError::BadRequest(format!("Unexpected field `{name}`"))),
            }
            file_count += 1;
            if over(limits.files, file_count) {
                return Err(ServiceError::BadRequest("too many files".into()));
            }

            let info = FileInfo {
                field_name: name.clone(),
                file_name,
                content_type: field.content_type().map(ToString::to_string),
            };
            if let Some(filter) = &self.uploader.filter {
                if !filter(&exchange.request, &info)? {
                    debug!(field = %info.field_name, file = %info.file_name, "upload rejected by filter");
                    continue;
                }
            }

            let data = field.bytes().await.map_err(multipart_error)?;
            if over(limits.file_size, data.len()) {
                return Err(ServiceError::PayloadTooLarge { limit: limits.file_size.unwrap_or_default() });
            }
            let stored = self.uploader.store(info, data).await?;
            written.extend(stored.path.clone());
            files.entry(name).or_default().push(stored);
        }

        exchange.request.files = Some(files);
        exchange.request.append_form(text_fields);
        Ok(())
    }
}

async fn discard(paths: &[PathBuf]) {
    for path in paths {
        match tokio::fs::remove_file(path).await {
            Ok(()) => trace!(path = %path.display(), "discarded upload"),
            Err(e) => warn!(path = %path.display(), "cannot remove rejected upload: {e}"),
        }
    }
}

impl Middleware for FilesParser {
    fn name(&self) -> &'static str { "files-parser" }

    fn handle<'a>(&'a self, exchange: &'a mut Exchange) -> BoxFuture<'a, Result<Flow, ServiceError>> {
        Box::pin(async move {
            self.parse(exchange).await?;
            Ok(Flow::Next)
        })
    }
}
