//! The gateway service implementing hyper's `Service` trait.
//!
//! [`ProxyService`] runs every request through:
//!
//! 1. Optional basic authentication
//! 2. Method filtering (`GET` and `HEAD` only)
//! 3. Path decoding and `Range` extraction
//! 4. Dispatch to the [`StreamHandler`]
//! 5. Common response headers (`x-request-id`, `Server`)

use std::convert::Infallible;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use http::header::{ALLOW, AUTHORIZATION, HeaderValue, RANGE, SERVER, WWW_AUTHENTICATE};
use http::{Method, Request, Response, StatusCode};
use hyper::service::Service;
use percent_encoding::percent_decode_str;
use s3proxy_auth::BasicAuthAccounts;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::body::ProxyBody;
use crate::handler::{StreamHandler, StreamRequest, error_response};

/// Header carrying the per-request identifier.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

const SERVER_NAME: &str = "s3proxy";

/// The gateway service: authentication and dispatch in front of a [`StreamHandler`].
#[derive(Debug, Clone)]
pub struct ProxyService {
    handler: Arc<StreamHandler>,
    accounts: Option<Arc<BasicAuthAccounts>>,
}

impl ProxyService {
    /// Create a service without authentication.
    #[must_use]
    pub fn new(handler: StreamHandler) -> Self {
        Self {
            handler: Arc::new(handler),
            accounts: None,
        }
    }

    /// Require basic authentication against `accounts`.
    ///
    /// An empty account set leaves authentication disabled.
    #[must_use]
    pub fn with_basic_auth(mut self, accounts: BasicAuthAccounts) -> Self {
        self.accounts = (!accounts.is_empty()).then(|| Arc::new(accounts));
        self
    }

    /// Whether requests must carry basic credentials.
    #[must_use]
    pub fn requires_auth(&self) -> bool {
        self.accounts.is_some()
    }
}

impl<B> Service<Request<B>> for ProxyService
where
    B: Send + 'static,
{
    type Response = Response<ProxyBody>;
    type Error = Infallible;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn call(&self, req: Request<B>) -> Self::Future {
        let handler = Arc::clone(&self.handler);
        let accounts = self.accounts.clone();

        Box::pin(async move {
            let request_id = Uuid::new_v4().to_string();
            let response =
                process_request(req, &handler, accounts.as_deref(), &request_id).await;
            Ok(add_common_headers(response, &request_id))
        })
    }
}

async fn process_request<B>(
    req: Request<B>,
    handler: &StreamHandler,
    accounts: Option<&BasicAuthAccounts>,
    request_id: &str,
) -> Response<ProxyBody> {
    let method = req.method().clone();
    let uri = req.uri().clone();
    debug!(%method, %uri, request_id, "processing request");

    if let Some(accounts) = accounts {
        let header = req
            .headers()
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok());
        match accounts.verify(header) {
            Ok(user) => debug!(user, request_id, "authenticated request"),
            Err(err) => {
                warn!(%uri, error = %err, request_id, "authentication failed");
                return unauthorized_response();
            }
        }
    }

    if method != Method::GET && method != Method::HEAD {
        return method_not_allowed_response();
    }

    let path = percent_decode_str(uri.path())
        .decode_utf8_lossy()
        .into_owned();
    let range_header = req
        .headers()
        .get(RANGE)
        .map(|v| String::from_utf8_lossy(v.as_bytes()).into_owned())
        .unwrap_or_default();
    let request = StreamRequest::new(path, range_header);

    let response = if method == Method::HEAD {
        handler.head(&request, request_id).await
    } else {
        handler.get(&request, request_id).await
    };

    info!(
        %method,
        path = %request.path,
        status = response.status().as_u16(),
        bucket = handler.bucket(),
        request_id,
        "handled request"
    );
    response
}

fn unauthorized_response() -> Response<ProxyBody> {
    let mut response = error_response(StatusCode::UNAUTHORIZED, "Unauthorized".to_owned());
    if let Ok(challenge) = HeaderValue::from_str(&BasicAuthAccounts::challenge()) {
        response.headers_mut().insert(WWW_AUTHENTICATE, challenge);
    }
    response
}

fn method_not_allowed_response() -> Response<ProxyBody> {
    let mut response = error_response(
        StatusCode::METHOD_NOT_ALLOWED,
        "Method Not Allowed".to_owned(),
    );
    response
        .headers_mut()
        .insert(ALLOW, HeaderValue::from_static("GET, HEAD"));
    response
}

/// Add headers common to every response.
fn add_common_headers(mut response: Response<ProxyBody>, request_id: &str) -> Response<ProxyBody> {
    let headers = response.headers_mut();
    if let Ok(hv) = HeaderValue::from_str(request_id) {
        headers.insert(REQUEST_ID_HEADER, hv);
    }
    headers.insert(SERVER, HeaderValue::from_static(SERVER_NAME));
    response
}
