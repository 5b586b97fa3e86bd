use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::{FromRequest, Multipart, Request, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::Router;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::dispatch::{
    Dispatcher, HttpReply, IncomingCall, IngressCredentials, IngressKind, ReplyBody,
};
use crate::envelope::{self, RpcResponse, UploadedFile};
use crate::error::Error;

/// CORS settings for the ingress router, from the `cors.*` config keys.
#[derive(Debug, Clone, Default)]
pub struct CorsSettings {
    pub enabled: bool,
    pub allow_origins: Vec<String>,
}

#[derive(Clone)]
struct IngressState {
    dispatcher: Arc<Dispatcher>,
    body_limit: usize,
}

const DEFAULT_BODY_LIMIT: usize = 8 * 1024 * 1024;

/// Build the two-endpoint envelope router.
pub fn router(dispatcher: Arc<Dispatcher>) -> Router {
    router_with(dispatcher, DEFAULT_BODY_LIMIT, &CorsSettings::default())
}

/// Build the router with an explicit body limit and CORS settings.
pub fn router_with(dispatcher: Arc<Dispatcher>, body_limit: usize, cors: &CorsSettings) -> Router {
    let state = IngressState {
        dispatcher,
        body_limit,
    };

    let mut router = Router::new()
        .route("/api", post(serve_api))
        .route("/openapi", post(serve_openapi))
        .with_state(state)
        .layer(CatchPanicLayer::new())
        .layer(TraceLayer::new_for_http());

    if cors.enabled {
        router = router.layer(cors_layer(&cors.allow_origins));
    }

    router
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    if origins.is_empty() || origins.iter().any(|o| o == "*") {
        layer.allow_origin(Any)
    } else {
        let parsed: Vec<axum::http::HeaderValue> =
            origins.iter().filter_map(|o| o.parse().ok()).collect();
        layer.allow_origin(AllowOrigin::list(parsed))
    }
}

async fn serve_api(State(state): State<IngressState>, req: Request) -> Response {
    serve(state, IngressKind::Api, req).await
}

async fn serve_openapi(State(state): State<IngressState>, req: Request) -> Response {
    serve(state, IngressKind::OpenApi, req).await
}

async fn serve(state: IngressState, ingress: IngressKind, req: Request) -> Response {
    let remote_ip = client_ip(req.headers());

    let credentials = match extract_credentials(ingress, req.headers(), req.uri().query()) {
        Ok(credentials) => credentials,
        Err(err) => return envelope_response(401, &RpcResponse::from_error(&err)),
    };

    let content_type = req
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_string();

    let call = if content_type.starts_with("application/json") {
        match axum::body::to_bytes(req.into_body(), state.body_limit).await {
            Ok(bytes) => match envelope::decode_json(&bytes) {
                Ok(request) => IncomingCall::new(ingress, request),
                Err(err) => return envelope_response(200, &RpcResponse::from_error(&err)),
            },
            Err(err) => {
                let err = Error::validation(format!("failed to read request body: {err}"));
                return envelope_response(200, &RpcResponse::from_error(&err));
            }
        }
    } else if content_type.starts_with("multipart/form-data") {
        match collect_multipart(req).await {
            Ok((fields, files)) => match envelope::decode_multipart(fields, files) {
                Ok((request, bag)) => IncomingCall::new(ingress, request).files(bag),
                Err(err) => return envelope_response(200, &RpcResponse::from_error(&err)),
            },
            Err(err) => return envelope_response(200, &RpcResponse::from_error(&err)),
        }
    } else {
        let err = Error::unsupported_content_type(&content_type);
        return envelope_response(200, &RpcResponse::from_error(&err));
    };

    let reply = state
        .dispatcher
        .dispatch(call.credentials(credentials).remote_ip(remote_ip))
        .await;
    reply_response(reply)
}

/// Collect every multipart part: text fields by name, file parts (those
/// carrying a client file name) into the side channel.
async fn collect_multipart(
    req: Request,
) -> Result<(HashMap<String, Vec<String>>, Vec<UploadedFile>), Error> {
    let mut multipart = Multipart::from_request(req, &())
        .await
        .map_err(|rejection| Error::validation(format!("malformed multipart body: {rejection}")))?;

    let mut text: HashMap<String, Vec<String>> = HashMap::new();
    let mut files: Vec<UploadedFile> = Vec::new();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| Error::validation(format!("multipart read error: {e}")))?
    {
        let name = field.name().unwrap_or("").to_string();
        let file_name = field.file_name().map(|s| s.to_string());
        let content_type = field.content_type().map(|s| s.to_string());

        let data = field
            .bytes()
            .await
            .map_err(|e| Error::validation(format!("failed to read part '{name}': {e}")))?;

        if file_name.is_some() {
            files.push(UploadedFile {
                name,
                file_name,
                content_type,
                data,
            });
        } else {
            let value = String::from_utf8(data.to_vec())
                .map_err(|e| Error::validation(format!("part '{name}' is not UTF-8: {e}")))?;
            text.entry(name).or_default().push(value);
        }
    }

    Ok((text, files))
}

/// Pull transport credentials. `/api` accepts `Authorization: Bearer` or the
/// `?__accessToken=` query parameter; `/openapi` reads the signature headers
/// and never the query string.
fn extract_credentials(
    ingress: IngressKind,
    headers: &HeaderMap,
    query: Option<&str>,
) -> Result<IngressCredentials, Error> {
    match ingress {
        IngressKind::Api => {
            if let Some(value) = headers.get(header::AUTHORIZATION) {
                let value = value
                    .to_str()
                    .map_err(|_| Error::token_invalid("malformed Authorization header"))?;
                let token = value
                    .strip_prefix("Bearer ")
                    .ok_or_else(|| Error::token_invalid("expected Bearer scheme"))?;
                return Ok(IngressCredentials::Token(token.trim().to_string()));
            }
            if let Some(query) = query {
                for (key, value) in form_urlencoded::parse(query.as_bytes()) {
                    if key == "__accessToken" && !value.is_empty() {
                        return Ok(IngressCredentials::Token(value.into_owned()));
                    }
                }
            }
            Ok(IngressCredentials::None)
        }
        IngressKind::OpenApi => {
            let app_id = header_value(headers, "x-app-id");
            let timestamp = header_value(headers, "x-timestamp");
            let nonce = header_value(headers, "x-nonce");
            let signature = header_value(headers, "x-signature");

            match (app_id, timestamp, nonce, signature) {
                (None, None, None, None) => Ok(IngressCredentials::None),
                (Some(app_id), Some(timestamp), Some(nonce), Some(signature)) => {
                    let timestamp: i64 = timestamp
                        .parse()
                        .map_err(|_| Error::signature_invalid())?;
                    Ok(IngressCredentials::Signature {
                        app_id,
                        timestamp,
                        nonce,
                        signature,
                    })
                }
                _ => Err(Error::signature_invalid()),
            }
        }
    }
}

fn header_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
}

fn client_ip(headers: &HeaderMap) -> Option<IpAddr> {
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim);
    let real = headers.get("x-real-ip").and_then(|v| v.to_str().ok());
    forwarded.or(real).and_then(|ip| ip.parse().ok())
}

fn envelope_response(status: u16, response: &RpcResponse) -> Response {
    let status = StatusCode::from_u16(status).unwrap_or(StatusCode::OK);
    (
        status,
        [(header::CONTENT_TYPE, "application/json")],
        response.encode(),
    )
        .into_response()
}

fn reply_response(reply: HttpReply) -> Response {
    match reply.body {
        ReplyBody::Envelope(response) => envelope_response(reply.status, &response),
        ReplyBody::File(payload) => {
            let filename: String = payload
                .filename
                .chars()
                .map(|c| if c == '"' || c.is_control() { '_' } else { c })
                .collect();
            (
                StatusCode::OK,
                [
                    (header::CONTENT_TYPE, payload.content_type),
                    (
                        header::CONTENT_DISPOSITION,
                        format!("attachment; filename=\"{filename}\""),
                    ),
                ],
                Body::from(payload.data),
            )
                .into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bearer_header_wins() {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, "Bearer abc.def".parse().unwrap());
        let creds = extract_credentials(IngressKind::Api, &headers, None).unwrap();
        assert!(matches!(creds, IngressCredentials::Token(t) if t == "abc.def"));
    }

    #[test]
    fn access_token_query_fallback() {
        let headers = HeaderMap::new();
        let creds =
            extract_credentials(IngressKind::Api, &headers, Some("__accessToken=tok123")).unwrap();
        assert!(matches!(creds, IngressCredentials::Token(t) if t == "tok123"));
    }

    #[test]
    fn openapi_ignores_query_token() {
        let headers = HeaderMap::new();
        let creds =
            extract_credentials(IngressKind::OpenApi, &headers, Some("__accessToken=tok123"))
                .unwrap();
        assert!(creds.is_none());
    }

    #[test]
    fn openapi_reads_signature_headers() {
        let mut headers = HeaderMap::new();
        headers.insert("x-app-id", "app1".parse().unwrap());
        headers.insert("x-timestamp", "1700000000".parse().unwrap());
        headers.insert("x-nonce", "n1".parse().unwrap());
        headers.insert("x-signature", "sig".parse().unwrap());
        let creds = extract_credentials(IngressKind::OpenApi, &headers, None).unwrap();
        match creds {
            IngressCredentials::Signature {
                app_id, timestamp, ..
            } => {
                assert_eq!(app_id, "app1");
                assert_eq!(timestamp, 1_700_000_000);
            }
            other => panic!("expected signature credentials, got {other:?}"),
        }
    }

    #[test]
    fn partial_signature_headers_rejected() {
        let mut headers = HeaderMap::new();
        headers.insert("x-app-id", "app1".parse().unwrap());
        let err = extract_credentials(IngressKind::OpenApi, &headers, None).unwrap_err();
        assert_eq!(err.code(), crate::error::code::SIGNATURE_INVALID);
    }

    #[test]
    fn encoded_query_token_is_decoded() {
        let headers = HeaderMap::new();
        let creds = extract_credentials(
            IngressKind::Api,
            &headers,
            Some("__accessToken=a%2Eb%2Ec&other=1"),
        )
        .unwrap();
        assert!(matches!(creds, IngressCredentials::Token(t) if t == "a.b.c"));
    }
}
