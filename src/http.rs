//! HTTP 辅助工具：CORS、安全头与 tus 版本协商。

use axum::body::Body as AxumBody;
use axum::http::{HeaderMap, HeaderName, HeaderValue, Method, Request, StatusCode, header};
use axum::response::IntoResponse;
use axum::{middleware, response::Response};
use std::net::IpAddr;
use std::time::Duration;
use tower_http::cors::{AllowHeaders, AllowOrigin, CorsLayer};
use tracing::warn;

use crate::error::UPLOAD_ERROR_HEADER;
use crate::handler::{
    TUS_EXTENSION, TUS_MAX_SIZE, TUS_RESUMABLE, TUS_VERSION, TUS_VERSION_HEADER, UPLOAD_CONCAT,
    UPLOAD_DEFER_LENGTH, UPLOAD_EXPIRES, UPLOAD_LENGTH, UPLOAD_METADATA, UPLOAD_OFFSET,
};

/// 构建 CORS Layer（支持逗号分隔的来源列表）。
pub fn build_cors_layer(cors_origins: Option<&str>) -> Option<CorsLayer> {
    let origins = cors_origins?
        .split(',')
        .map(|origin| origin.trim())
        .filter(|origin| !origin.is_empty())
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(origin, "invalid cors origin");
                None
            }
        })
        .collect::<Vec<_>>();

    if origins.is_empty() {
        return None;
    }

    // tus 客户端需要在跨域响应中读取这些头
    let exposed: [HeaderName; 12] = [
        header::LOCATION,
        TUS_RESUMABLE,
        TUS_VERSION_HEADER,
        TUS_EXTENSION,
        TUS_MAX_SIZE,
        UPLOAD_OFFSET,
        UPLOAD_LENGTH,
        UPLOAD_DEFER_LENGTH,
        UPLOAD_METADATA,
        UPLOAD_CONCAT,
        UPLOAD_EXPIRES,
        UPLOAD_ERROR_HEADER,
    ];
    Some(
        CorsLayer::new()
            .allow_origin(AllowOrigin::list(origins))
            .allow_methods([
                Method::GET,
                Method::HEAD,
                Method::POST,
                Method::PATCH,
                Method::DELETE,
                Method::OPTIONS,
            ])
            .allow_headers(AllowHeaders::mirror_request())
            .expose_headers(exposed)
            .max_age(Duration::from_secs(86400)),
    )
}

/// 从 `x-forwarded-for` 解析客户端 IP。
pub fn extract_forwarded_ip(headers: &HeaderMap) -> Option<IpAddr> {
    headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .and_then(|value| value.parse::<IpAddr>().ok())
}

/// 添加基础安全响应头。
pub async fn add_security_headers(
    request: Request<AxumBody>,
    next: middleware::Next,
) -> Result<Response, StatusCode> {
    let mut response = next.run(request).await;
    let headers = response.headers_mut();
    headers.insert(header::X_FRAME_OPTIONS, HeaderValue::from_static("DENY"));
    headers.insert(
        header::X_CONTENT_TYPE_OPTIONS,
        HeaderValue::from_static("nosniff"),
    );
    Ok(response)
}

/// 校验 `Tus-Resumable` 请求头，并在每个响应中声明协议版本。
///
/// OPTIONS 与 GET 不要求该请求头；其他方法版本不符时返回 412。
pub async fn tus_resumable(request: Request<AxumBody>, next: middleware::Next) -> Response {
    let method = request.method();
    let exempt = *method == Method::OPTIONS || *method == Method::GET;
    let accepted = match request.headers().get(TUS_RESUMABLE) {
        Some(value) => value == TUS_VERSION,
        None => exempt,
    };

    let mut response = if accepted {
        next.run(request).await
    } else {
        let mut headers = HeaderMap::new();
        headers.insert(TUS_VERSION_HEADER, HeaderValue::from_static(TUS_VERSION));
        (
            StatusCode::PRECONDITION_FAILED,
            headers,
            "unsupported Tus-Resumable version",
        )
            .into_response()
    };
    response
        .headers_mut()
        .insert(TUS_RESUMABLE, HeaderValue::from_static(TUS_VERSION));
    response
}
