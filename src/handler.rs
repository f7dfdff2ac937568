//! tus 1.0.0 协议处理器：创建、查询、分片写入、下载与终止。

use axum::Router;
use axum::body::Body as AxumBody;
use axum::extract::{DefaultBodyLimit, Extension, Path};
use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode, header};
use axum::middleware;
use axum::response::{IntoResponse, Response};
use axum::routing::options;
use futures_util::stream::StreamExt;
use http_body_util::BodyExt;
use httpdate::fmt_http_date;
use std::collections::BTreeMap;
use std::io;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tracing::{debug, info};

use crate::checksum::{Checksum, SUPPORTED_ALGORITHMS};
use crate::error::ApiError;
use crate::http::tus_resumable;
use crate::info::{
    ConcatKind, NewUpload, UploadInfo, UploadLength, parse_metadata_header,
    render_metadata_header,
};
use crate::reader::Served;
use crate::store::UploadStore;

pub const TUS_VERSION: &str = "1.0.0";
pub const TUS_EXTENSIONS: &str =
    "creation,creation-defer-length,termination,concatenation,checksum,expiration";
pub const OFFSET_CONTENT_TYPE: &str = "application/offset+octet-stream";

pub const TUS_RESUMABLE: HeaderName = HeaderName::from_static("tus-resumable");
pub const TUS_VERSION_HEADER: HeaderName = HeaderName::from_static("tus-version");
pub const TUS_EXTENSION: HeaderName = HeaderName::from_static("tus-extension");
pub const TUS_MAX_SIZE: HeaderName = HeaderName::from_static("tus-max-size");
pub const TUS_CHECKSUM_ALGORITHM: HeaderName = HeaderName::from_static("tus-checksum-algorithm");
pub const UPLOAD_OFFSET: HeaderName = HeaderName::from_static("upload-offset");
pub const UPLOAD_LENGTH: HeaderName = HeaderName::from_static("upload-length");
pub const UPLOAD_DEFER_LENGTH: HeaderName = HeaderName::from_static("upload-defer-length");
pub const UPLOAD_METADATA: HeaderName = HeaderName::from_static("upload-metadata");
pub const UPLOAD_CONCAT: HeaderName = HeaderName::from_static("upload-concat");
pub const UPLOAD_CHECKSUM: HeaderName = HeaderName::from_static("upload-checksum");
pub const UPLOAD_EXPIRES: HeaderName = HeaderName::from_static("upload-expires");

/// tus 接口配置。
#[derive(Clone, Debug)]
pub struct TusConfig {
    base_path: String,
    /// 通过 `Upload-Expires` 告知客户端，与清理任务的过期时间一致。
    pub expire_after: Option<Duration>,
}

impl TusConfig {
    pub fn new(base_path: &str, expire_after: Option<Duration>) -> Self {
        let trimmed = base_path.trim().trim_matches('/');
        let base_path = if trimmed.is_empty() {
            "/".to_string()
        } else {
            format!("/{trimmed}")
        };
        Self {
            base_path,
            expire_after,
        }
    }

    pub fn base_path(&self) -> &str {
        &self.base_path
    }

    /// 上传在基础路径下的 URL。
    pub fn upload_url(&self, id: &str) -> String {
        if self.base_path == "/" {
            format!("/{id}")
        } else {
            format!("{}/{id}", self.base_path)
        }
    }

    fn expires_at(&self, info: &UploadInfo) -> Option<SystemTime> {
        let ttl = self.expire_after?;
        Some(SystemTime::from(info.last_activity()) + ttl)
    }
}

/// 构建 tus 路由。
pub fn tus_router(store: Arc<UploadStore>, config: TusConfig) -> Router {
    let collection = config.base_path().to_string();
    let member = config.upload_url("{id}");
    Router::new()
        .route(&collection, options(describe_server).post(create_upload))
        .route(
            &member,
            options(describe_server)
                .head(upload_status)
                .patch(write_upload)
                .get(download_upload)
                .delete(terminate_upload),
        )
        .layer(DefaultBodyLimit::disable())
        .layer(middleware::from_fn(tus_resumable))
        .layer(Extension(store))
        .layer(Extension(Arc::new(config)))
}

/// OPTIONS：声明协议版本与扩展。
pub async fn describe_server(Extension(store): Extension<Arc<UploadStore>>) -> Response {
    let mut headers = HeaderMap::new();
    headers.insert(TUS_VERSION_HEADER, HeaderValue::from_static(TUS_VERSION));
    headers.insert(TUS_EXTENSION, HeaderValue::from_static(TUS_EXTENSIONS));
    headers.insert(
        TUS_CHECKSUM_ALGORITHM,
        HeaderValue::from_static(SUPPORTED_ALGORITHMS),
    );
    if let Some(max_size) = store.config().max_size() {
        headers.insert(TUS_MAX_SIZE, HeaderValue::from(max_size));
    }
    (StatusCode::NO_CONTENT, headers).into_response()
}

/// POST：创建上传；`Upload-Concat: final;...` 时立即合并。
pub async fn create_upload(
    headers: HeaderMap,
    Extension(store): Extension<Arc<UploadStore>>,
    Extension(config): Extension<Arc<TusConfig>>,
) -> Result<Response, ApiError> {
    let concat = parse_concat(header_str(&headers, &UPLOAD_CONCAT)?)?;
    let length = parse_length(&headers)?;
    let metadata = match header_str(&headers, &UPLOAD_METADATA)? {
        Some(value) => parse_metadata_header(value)?,
        None => BTreeMap::new(),
    };

    let info = match concat {
        ConcatKind::Final(partial_ids) => {
            if length.is_some() {
                return Err(ApiError::BadRequest(
                    "final upload must not declare Upload-Length".into(),
                ));
            }
            store.create_final(partial_ids, metadata).await?
        }
        concat => {
            store
                .create(NewUpload {
                    length,
                    metadata,
                    concat,
                })
                .await?
        }
    };

    let location = config.upload_url(&info.id);
    let mut response_headers = upload_headers(&info, &config);
    response_headers.insert(
        header::LOCATION,
        HeaderValue::from_str(&location)
            .map_err(|_| ApiError::Internal("响应头构建失败".into()))?,
    );
    info!(upload_id = info.id, location, "tus upload created");
    Ok((StatusCode::CREATED, response_headers).into_response())
}

/// HEAD：返回当前 offset 与上传属性。
pub async fn upload_status(
    Path(id): Path<String>,
    Extension(store): Extension<Arc<UploadStore>>,
    Extension(config): Extension<Arc<TusConfig>>,
) -> Result<Response, ApiError> {
    let info = store.get_info(&id).await?;
    let mut headers = upload_headers(&info, &config);
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
    Ok((StatusCode::OK, headers).into_response())
}

/// PATCH：在 `Upload-Offset` 处写入请求体。
pub async fn write_upload(
    Path(id): Path<String>,
    headers: HeaderMap,
    Extension(store): Extension<Arc<UploadStore>>,
    Extension(config): Extension<Arc<TusConfig>>,
    body: AxumBody,
) -> Result<Response, ApiError> {
    let content_type = header_str(&headers, &header::CONTENT_TYPE)?.unwrap_or_default();
    let essence = content_type.split(';').next().unwrap_or_default().trim();
    if !essence.eq_ignore_ascii_case(OFFSET_CONTENT_TYPE) {
        return Err(ApiError::UnsupportedMediaType(format!(
            "Content-Type must be {OFFSET_CONTENT_TYPE}"
        )));
    }
    let offset = parse_u64_header(&headers, &UPLOAD_OFFSET)?
        .ok_or_else(|| ApiError::BadRequest("Upload-Offset is required".into()))?;
    let declared_length = parse_u64_header(&headers, &UPLOAD_LENGTH)?;
    let checksum = header_str(&headers, &UPLOAD_CHECKSUM)?
        .map(Checksum::parse_header)
        .transpose()?;

    let lock = store.lock(&id).await?;
    let data = BodyExt::into_data_stream(body).map(|chunk| chunk.map_err(io::Error::other));
    let info = store
        .write_chunk_with_length(&lock, offset, declared_length, data, checksum.as_ref())
        .await?;
    drop(lock);
    debug!(
        upload_id = id,
        offset,
        bytes = info.offset - offset,
        "tus patch applied"
    );

    let mut response_headers = HeaderMap::new();
    response_headers.insert(UPLOAD_OFFSET, HeaderValue::from(info.offset));
    if !info.is_complete()
        && let Some(expires) = config.expire_after.map(|ttl| SystemTime::now() + ttl)
        && let Ok(value) = HeaderValue::from_str(&fmt_http_date(expires))
    {
        response_headers.insert(UPLOAD_EXPIRES, value);
    }
    Ok((StatusCode::NO_CONTENT, response_headers).into_response())
}

/// GET：下载已写入的内容，支持单段 Range。
pub async fn download_upload(
    Path(id): Path<String>,
    request_headers: HeaderMap,
    Extension(store): Extension<Arc<UploadStore>>,
) -> Result<Response, ApiError> {
    let range = request_headers
        .get(header::RANGE)
        .and_then(|value| value.to_str().ok());
    let served = store.serve(&id, range).await?;

    let info = served.info();
    let mut response_headers = HeaderMap::new();
    response_headers.insert(header::CONTENT_TYPE, content_type_for(info));
    response_headers.insert(header::ACCEPT_RANGES, HeaderValue::from_static("bytes"));
    if let Ok(value) = HeaderValue::from_str(&fmt_http_date(SystemTime::from(info.update_time))) {
        response_headers.insert(header::LAST_MODIFIED, value);
    }
    if let Some(value) = info
        .metadata
        .get("filename")
        .and_then(|name| content_disposition(name))
    {
        response_headers.insert(header::CONTENT_DISPOSITION, value);
    }

    match served {
        Served::Full { info, body } => {
            response_headers.insert(header::CONTENT_LENGTH, HeaderValue::from(info.offset));
            debug!(upload_id = id, size = info.offset, "download full upload");
            Ok((
                StatusCode::OK,
                response_headers,
                AxumBody::from_stream(body),
            )
                .into_response())
        }
        Served::Partial {
            info,
            start,
            end,
            body,
        } => {
            let length = end - start + 1;
            response_headers.insert(
                header::CONTENT_RANGE,
                HeaderValue::from_str(&format!("bytes {start}-{end}/{}", info.offset))
                    .map_err(|_| ApiError::Internal("响应头构建失败".into()))?,
            );
            response_headers.insert(header::CONTENT_LENGTH, HeaderValue::from(length));
            debug!(upload_id = id, start, end, length, "download range accepted");
            Ok((
                StatusCode::PARTIAL_CONTENT,
                response_headers,
                AxumBody::from_stream(body),
            )
                .into_response())
        }
        Served::Unsatisfiable { info } => Err(ApiError::RangeNotSatisfiable(info.offset)),
    }
}

/// DELETE：终止上传。
pub async fn terminate_upload(
    Path(id): Path<String>,
    Extension(store): Extension<Arc<UploadStore>>,
) -> Result<StatusCode, ApiError> {
    let lock = store.lock(&id).await?;
    store.terminate(lock).await?;
    Ok(StatusCode::NO_CONTENT)
}

fn upload_headers(info: &UploadInfo, config: &TusConfig) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(UPLOAD_OFFSET, HeaderValue::from(info.offset));
    match info.size {
        Some(size) => {
            headers.insert(UPLOAD_LENGTH, HeaderValue::from(size));
        }
        None if info.size_is_deferred => {
            headers.insert(UPLOAD_DEFER_LENGTH, HeaderValue::from_static("1"));
        }
        None => {}
    }
    if !info.metadata.is_empty()
        && let Ok(value) = HeaderValue::from_str(&render_metadata_header(&info.metadata))
    {
        headers.insert(UPLOAD_METADATA, value);
    }
    if info.is_partial {
        headers.insert(UPLOAD_CONCAT, HeaderValue::from_static("partial"));
    } else if info.is_final {
        let urls = info
            .partial_ids
            .iter()
            .map(|id| config.upload_url(id))
            .collect::<Vec<_>>()
            .join(" ");
        if let Ok(value) = HeaderValue::from_str(&format!("final;{urls}")) {
            headers.insert(UPLOAD_CONCAT, value);
        }
    }
    if !info.is_complete()
        && let Some(expires) = config.expires_at(info)
        && let Ok(value) = HeaderValue::from_str(&fmt_http_date(expires))
    {
        headers.insert(UPLOAD_EXPIRES, value);
    }
    headers
}

fn header_str<'a>(headers: &'a HeaderMap, name: &HeaderName) -> Result<Option<&'a str>, ApiError> {
    headers
        .get(name)
        .map(|value| {
            value
                .to_str()
                .map(str::trim)
                .map_err(|_| ApiError::BadRequest(format!("invalid {name} header")))
        })
        .transpose()
}

fn parse_u64_header(headers: &HeaderMap, name: &HeaderName) -> Result<Option<u64>, ApiError> {
    header_str(headers, name)?
        .map(|value| {
            value
                .parse::<u64>()
                .map_err(|_| ApiError::BadRequest(format!("invalid {name} header")))
        })
        .transpose()
}

fn parse_length(headers: &HeaderMap) -> Result<Option<UploadLength>, ApiError> {
    let length = parse_u64_header(headers, &UPLOAD_LENGTH)?;
    let deferred = match header_str(headers, &UPLOAD_DEFER_LENGTH)? {
        None => false,
        Some("1") => true,
        Some(_) => {
            return Err(ApiError::BadRequest(
                "Upload-Defer-Length must be 1".into(),
            ));
        }
    };
    match (length, deferred) {
        (Some(_), true) => Err(ApiError::BadRequest(
            "Upload-Length and Upload-Defer-Length are exclusive".into(),
        )),
        (Some(size), false) => Ok(Some(UploadLength::Known(size))),
        (None, true) => Ok(Some(UploadLength::Deferred)),
        (None, false) => Ok(None),
    }
}

/// 解析 `partial` 或 `final;<url> <url>`，每个 URL 以上传 ID 结尾。
fn parse_concat(value: Option<&str>) -> Result<ConcatKind, ApiError> {
    let Some(value) = value else {
        return Ok(ConcatKind::None);
    };
    if value == "partial" {
        return Ok(ConcatKind::Partial);
    }
    let Some(urls) = value.strip_prefix("final;") else {
        return Err(ApiError::BadRequest("invalid Upload-Concat header".into()));
    };
    let ids = urls
        .split_whitespace()
        .filter_map(|url| url.trim_end_matches('/').rsplit('/').next())
        .filter(|id| !id.is_empty())
        .map(str::to_string)
        .collect::<Vec<_>>();
    if ids.is_empty() {
        return Err(ApiError::BadRequest(
            "Upload-Concat final lists no uploads".into(),
        ));
    }
    Ok(ConcatKind::Final(ids))
}

fn content_type_for(info: &UploadInfo) -> HeaderValue {
    if let Some(value) = info
        .metadata
        .get("filetype")
        .and_then(|filetype| filetype.parse::<mime_guess::Mime>().ok())
        .and_then(|mime| HeaderValue::from_str(mime.as_ref()).ok())
    {
        return value;
    }
    let Some(name) = info.metadata.get("filename") else {
        return HeaderValue::from_static("application/octet-stream");
    };
    let mime = mime_guess::from_path(name).first_or_octet_stream();
    HeaderValue::from_str(mime.essence_str())
        .unwrap_or_else(|_| HeaderValue::from_static("application/octet-stream"))
}

fn content_disposition(filename: &str) -> Option<HeaderValue> {
    let name = filename.rsplit(['/', '\\']).next().unwrap_or(filename);
    if name.is_empty() {
        return None;
    }
    let fallback: String = name
        .chars()
        .map(|c| {
            if (c.is_ascii_graphic() && c != '"' && c != '\\') || c == ' ' {
                c
            } else {
                '_'
            }
        })
        .collect();
    let mut encoded = String::with_capacity(name.len());
    for byte in name.bytes() {
        if byte.is_ascii_alphanumeric() || b"-._~".contains(&byte) {
            encoded.push(byte as char);
        } else {
            encoded.push_str(&format!("%{byte:02X}"));
        }
    }
    HeaderValue::from_str(&format!(
        "attachment; filename=\"{fallback}\"; filename*=UTF-8''{encoded}"
    ))
    .ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::UPLOAD_ERROR_HEADER;
    use crate::store::UploadConfig;
    use axum::http::{Method, Request};
    use sha2::{Digest, Sha512};
    use tower::ServiceExt;

    const BASE: &str = "/api/v1/files";

    fn app_with(config: UploadConfig) -> Router {
        let store = Arc::new(UploadStore::in_memory(config));
        tus_router(store, TusConfig::new(BASE, Some(Duration::from_secs(3600))))
    }

    fn app() -> Router {
        app_with(UploadConfig::default())
    }

    fn tus(method: Method, uri: &str) -> axum::http::request::Builder {
        Request::builder()
            .method(method)
            .uri(uri)
            .header(TUS_RESUMABLE, TUS_VERSION)
    }

    fn patch(uri: &str, offset: u64, body: &'static [u8]) -> Request<AxumBody> {
        tus(Method::PATCH, uri)
            .header(header::CONTENT_TYPE, OFFSET_CONTENT_TYPE)
            .header(UPLOAD_OFFSET, offset)
            .body(AxumBody::from(body))
            .expect("request")
    }

    async fn send(app: &Router, request: Request<AxumBody>) -> Response {
        app.clone().oneshot(request).await.expect("response")
    }

    fn header_of<'a>(response: &'a Response, name: &HeaderName) -> &'a str {
        response
            .headers()
            .get(name)
            .unwrap_or_else(|| panic!("missing {name}"))
            .to_str()
            .expect("ascii header")
    }

    async fn body_bytes(response: Response) -> Vec<u8> {
        axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body")
            .to_vec()
    }

    async fn create(app: &Router, builder: axum::http::request::Builder) -> String {
        let response = send(app, builder.body(AxumBody::empty()).expect("request")).await;
        assert_eq!(response.status(), StatusCode::CREATED);
        header_of(&response, &header::LOCATION).to_string()
    }

    #[test]
    fn base_path_is_normalized() {
        assert_eq!(TusConfig::new("api/files/", None).upload_url("a"), "/api/files/a");
        assert_eq!(TusConfig::new("/", None).upload_url("a"), "/a");
    }

    #[test]
    fn concat_header_accepts_urls_and_ids() {
        assert_eq!(
            parse_concat(Some("final;/api/v1/files/a http://host/api/v1/files/b/ c")).expect("parse"),
            ConcatKind::Final(vec!["a".into(), "b".into(), "c".into()])
        );
        assert_eq!(parse_concat(Some("partial")).expect("parse"), ConcatKind::Partial);
        assert!(parse_concat(Some("final;")).is_err());
        assert!(parse_concat(Some("whole")).is_err());
    }

    #[tokio::test]
    async fn options_describes_server() {
        let app = app_with(UploadConfig {
            max_size: 1024,
            ..UploadConfig::default()
        });
        let request = Request::builder()
            .method(Method::OPTIONS)
            .uri(BASE)
            .body(AxumBody::empty())
            .expect("request");
        let response = send(&app, request).await;
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        assert_eq!(header_of(&response, &TUS_RESUMABLE), TUS_VERSION);
        assert_eq!(header_of(&response, &TUS_EXTENSION), TUS_EXTENSIONS);
        assert_eq!(header_of(&response, &TUS_MAX_SIZE), "1024");
        assert_eq!(header_of(&response, &TUS_CHECKSUM_ALGORITHM), "sha256,sha512");
    }

    #[tokio::test]
    async fn missing_tus_resumable_is_rejected() {
        let app = app();
        let request = Request::builder()
            .method(Method::POST)
            .uri(BASE)
            .header(UPLOAD_LENGTH, "3")
            .body(AxumBody::empty())
            .expect("request");
        let response = send(&app, request).await;
        assert_eq!(response.status(), StatusCode::PRECONDITION_FAILED);
        assert_eq!(header_of(&response, &TUS_VERSION_HEADER), TUS_VERSION);
    }

    #[tokio::test]
    async fn upload_lifecycle() {
        let app = app();
        let location = create(
            &app,
            tus(Method::POST, BASE)
                .header(UPLOAD_LENGTH, "10")
                .header(UPLOAD_METADATA, "filename bm90ZXMudHh0"),
        )
        .await;
        assert!(location.starts_with("/api/v1/files/"));

        let response = send(&app, tus(Method::HEAD, &location).body(AxumBody::empty()).expect("request")).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(header_of(&response, &UPLOAD_OFFSET), "0");
        assert_eq!(header_of(&response, &UPLOAD_LENGTH), "10");
        assert_eq!(header_of(&response, &UPLOAD_METADATA), "filename bm90ZXMudHh0");
        assert_eq!(header_of(&response, &header::CACHE_CONTROL), "no-store");
        assert!(response.headers().contains_key(UPLOAD_EXPIRES));

        let response = send(&app, patch(&location, 0, b"hello")).await;
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        assert_eq!(header_of(&response, &UPLOAD_OFFSET), "5");

        let response = send(&app, patch(&location, 3, b"xx")).await;
        assert_eq!(response.status(), StatusCode::CONFLICT);
        assert_eq!(header_of(&response, &UPLOAD_ERROR_HEADER), "offset_mismatch");

        let response = send(&app, patch(&location, 5, b"world")).await;
        assert_eq!(header_of(&response, &UPLOAD_OFFSET), "10");

        let request = Request::builder()
            .uri(location.as_str())
            .body(AxumBody::empty())
            .expect("request");
        let response = send(&app, request).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(header_of(&response, &header::CONTENT_TYPE), "text/plain");
        assert!(header_of(&response, &header::CONTENT_DISPOSITION).contains("notes.txt"));
        assert_eq!(body_bytes(response).await, b"helloworld");

        let request = Request::builder()
            .uri(location.as_str())
            .header(header::RANGE, "bytes=2-4")
            .body(AxumBody::empty())
            .expect("request");
        let response = send(&app, request).await;
        assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
        assert_eq!(header_of(&response, &header::CONTENT_RANGE), "bytes 2-4/10");
        assert_eq!(body_bytes(response).await, b"llo");

        let response = send(&app, tus(Method::DELETE, &location).body(AxumBody::empty()).expect("request")).await;
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        let response = send(&app, tus(Method::HEAD, &location).body(AxumBody::empty()).expect("request")).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn patch_requires_offset_content_type() {
        let app = app();
        let location = create(&app, tus(Method::POST, BASE).header(UPLOAD_LENGTH, "3")).await;
        let request = tus(Method::PATCH, &location)
            .header(header::CONTENT_TYPE, "text/plain")
            .header(UPLOAD_OFFSET, "0")
            .body(AxumBody::from("abc"))
            .expect("request");
        let response = send(&app, request).await;
        assert_eq!(response.status(), StatusCode::UNSUPPORTED_MEDIA_TYPE);
    }

    #[tokio::test]
    async fn checksum_mismatch_returns_460() {
        let app = app();
        let location = create(&app, tus(Method::POST, BASE).header(UPLOAD_LENGTH, "3")).await;
        let digest = {
            use base64::Engine as _;
            base64::engine::general_purpose::STANDARD.encode(Sha512::digest(b"abd"))
        };
        let request = tus(Method::PATCH, &location)
            .header(header::CONTENT_TYPE, OFFSET_CONTENT_TYPE)
            .header(UPLOAD_OFFSET, "0")
            .header(UPLOAD_CHECKSUM, format!("sha512 {digest}"))
            .body(AxumBody::from("abc"))
            .expect("request");
        let response = send(&app, request).await;
        assert_eq!(response.status().as_u16(), 460);

        let response = send(&app, tus(Method::HEAD, &location).body(AxumBody::empty()).expect("request")).await;
        assert_eq!(header_of(&response, &UPLOAD_OFFSET), "0");
    }

    #[tokio::test]
    async fn deferred_length_fixed_by_patch() {
        let app = app();
        let location = create(&app, tus(Method::POST, BASE).header(UPLOAD_DEFER_LENGTH, "1")).await;
        let response = send(&app, tus(Method::HEAD, &location).body(AxumBody::empty()).expect("request")).await;
        assert_eq!(header_of(&response, &UPLOAD_DEFER_LENGTH), "1");

        let request = tus(Method::PATCH, &location)
            .header(header::CONTENT_TYPE, OFFSET_CONTENT_TYPE)
            .header(UPLOAD_OFFSET, "0")
            .header(UPLOAD_LENGTH, "3")
            .body(AxumBody::from("abc"))
            .expect("request");
        let response = send(&app, request).await;
        assert_eq!(response.status(), StatusCode::NO_CONTENT);

        let response = send(&app, tus(Method::HEAD, &location).body(AxumBody::empty()).expect("request")).await;
        assert_eq!(header_of(&response, &UPLOAD_LENGTH), "3");
        assert_eq!(header_of(&response, &UPLOAD_OFFSET), "3");
        assert!(!response.headers().contains_key(UPLOAD_DEFER_LENGTH));
    }

    #[tokio::test]
    async fn rejected_patch_keeps_length_deferred() {
        let app = app();
        let location = create(&app, tus(Method::POST, BASE).header(UPLOAD_DEFER_LENGTH, "1")).await;

        let wrong_offset = tus(Method::PATCH, &location)
            .header(header::CONTENT_TYPE, OFFSET_CONTENT_TYPE)
            .header(UPLOAD_OFFSET, "7")
            .header(UPLOAD_LENGTH, "10")
            .body(AxumBody::from("abc"))
            .expect("request");
        let response = send(&app, wrong_offset).await;
        assert_eq!(response.status(), StatusCode::CONFLICT);
        assert_eq!(header_of(&response, &UPLOAD_ERROR_HEADER), "offset_mismatch");

        let too_long = tus(Method::PATCH, &location)
            .header(header::CONTENT_TYPE, OFFSET_CONTENT_TYPE)
            .header(UPLOAD_OFFSET, "0")
            .header(UPLOAD_LENGTH, "2")
            .body(AxumBody::from("abc"))
            .expect("request");
        let response = send(&app, too_long).await;
        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);

        let response = send(&app, tus(Method::HEAD, &location).body(AxumBody::empty()).expect("request")).await;
        assert_eq!(header_of(&response, &UPLOAD_DEFER_LENGTH), "1");
        assert_eq!(header_of(&response, &UPLOAD_OFFSET), "0");
        assert!(!response.headers().contains_key(UPLOAD_LENGTH));
    }

    #[tokio::test]
    async fn oversized_upload_is_rejected() {
        let app = app_with(UploadConfig {
            max_size: 4,
            ..UploadConfig::default()
        });
        let request = tus(Method::POST, BASE)
            .header(UPLOAD_LENGTH, "5")
            .body(AxumBody::empty())
            .expect("request");
        let response = send(&app, request).await;
        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(header_of(&response, &UPLOAD_ERROR_HEADER), "size_exceeded");
    }

    #[tokio::test]
    async fn partial_uploads_concatenate() {
        let app = app();
        let first = create(
            &app,
            tus(Method::POST, BASE)
                .header(UPLOAD_LENGTH, "3")
                .header(UPLOAD_CONCAT, "partial"),
        )
        .await;
        let second = create(
            &app,
            tus(Method::POST, BASE)
                .header(UPLOAD_LENGTH, "2")
                .header(UPLOAD_CONCAT, "partial"),
        )
        .await;
        send(&app, patch(&first, 0, b"abc")).await;
        send(&app, patch(&second, 0, b"de")).await;

        let target = create(
            &app,
            tus(Method::POST, BASE).header(UPLOAD_CONCAT, format!("final;{first} {second}")),
        )
        .await;
        let response = send(&app, tus(Method::HEAD, &target).body(AxumBody::empty()).expect("request")).await;
        assert_eq!(header_of(&response, &UPLOAD_LENGTH), "5");
        assert_eq!(header_of(&response, &UPLOAD_OFFSET), "5");
        assert_eq!(
            header_of(&response, &UPLOAD_CONCAT),
            format!("final;{first} {second}")
        );

        let request = Request::builder()
            .uri(target.as_str())
            .body(AxumBody::empty())
            .expect("request");
        assert_eq!(body_bytes(send(&app, request).await).await, b"abcde");

        let response = send(&app, patch(&target, 5, b"f")).await;
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn concat_with_incomplete_partial_fails() {
        let app = app();
        let first = create(
            &app,
            tus(Method::POST, BASE)
                .header(UPLOAD_LENGTH, "3")
                .header(UPLOAD_CONCAT, "partial"),
        )
        .await;
        let request = tus(Method::POST, BASE)
            .header(UPLOAD_CONCAT, format!("final;{first}"))
            .body(AxumBody::empty())
            .expect("request");
        let response = send(&app, request).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(header_of(&response, &UPLOAD_ERROR_HEADER), "partial_incomplete");
    }
}
