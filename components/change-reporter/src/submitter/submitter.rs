//! Change submission client
//!
//! Owns a single pooled HTTP session bound to the admin server and exposes a
//! fire-and-forget `submit_change(namespace, payload)` API:
//! - the request is dispatched on a background task and the caller returns
//!   immediately,
//! - the outcome (200 or anything else, or a transport failure) is reported
//!   only through the log stream,
//! - there are no retries and no timeout beyond the transport's defaults.
//!
//! Every submission builds its own request URI from the immutable scheme and
//! authority, so back-to-back submissions can never see each other's path.

// Local crates
use crate::{
    helpers::load_config::Settings,
    submitter::models::{SubmissionOutcome, SubmitError, submit_path},
};

// External crates
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::{
    Method, Request, Uri,
    header::{CONTENT_TYPE, HeaderValue},
    http::uri::{Authority, Scheme},
};
use hyper_util::{
    client::legacy::{Client, connect::HttpConnector},
    rt::TokioExecutor,
};
use tokio_util::task::TaskTracker;
use tracing::{Instrument, instrument};

type Session = Client<HttpConnector, Full<Bytes>>;

/// Long-lived connection to the admin server.
#[derive(Debug)]
pub struct ChangeSubmissionClient {
    scheme: Scheme,
    authority: Authority,
    session: Session,
    in_flight: TaskTracker,
}

impl ChangeSubmissionClient {
    /// Bind a client to `http://{host}:{port}`.
    ///
    /// Fails only when host and port do not form a valid URI authority.
    #[instrument(
        name = "change_submission_client::create",
        skip_all,
        level = "debug"
    )]
    pub fn new(settings: &Settings) -> Result<Self, SubmitError> {
        let authority = authority_for(&settings.admin_server_host, settings.admin_server_port);
        let authority: Authority =
            authority
                .parse()
                .map_err(|source| SubmitError::InvalidAuthority {
                    authority: authority.clone(),
                    source,
                })?;

        tracing::debug!("Creating admin server session for http://{authority}");
        let session = Client::builder(TokioExecutor::new()).build_http();

        Ok(Self {
            scheme: Scheme::HTTP,
            authority,
            session,
            in_flight: TaskTracker::new(),
        })
    }

    /// Submit a changeset without waiting for the server.
    ///
    /// Must be called from within the Tokio runtime. Nothing is returned: the
    /// outcome is logged once the response (or a transport error) arrives.
    pub fn submit_change(&self, namespace: &str, payload: impl Into<Bytes>) {
        let payload = payload.into();
        let span = tracing::debug_span!("submit_change", namespace = %namespace);
        let _entered = span.enter();

        tracing::debug!("Submitting change {namespace}:");
        tracing::debug!("{}", String::from_utf8_lossy(&payload));

        let request = match self.build_request(namespace, payload.clone()) {
            Ok(request) => request,
            Err(e) => {
                tracing::error!(
                    error = %e,
                    payload = %String::from_utf8_lossy(&payload),
                    "There was an error submitting changeset {namespace}"
                );
                return;
            }
        };

        let session = self.session.clone();
        let namespace = namespace.to_string();
        self.in_flight.spawn(
            async move {
                match dispatch(&session, request).await {
                    Ok(outcome) => tracing::debug!(
                        status = %outcome.status,
                        body = %String::from_utf8_lossy(&outcome.body),
                        "Submitted change returned code {}",
                        outcome.status.as_u16()
                    ),
                    Err(e) => tracing::error!(
                        error = %e,
                        payload = %String::from_utf8_lossy(&payload),
                        "There was an error submitting changeset {namespace}"
                    ),
                }
            }
            .instrument(span.clone()),
        );
    }

    /// Number of submissions dispatched but not yet completed.
    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    /// Resolve once every submission dispatched so far has completed.
    pub async fn wait_idle(&self) {
        self.in_flight.close();
        self.in_flight.wait().await;
        self.in_flight.reopen();
    }

    fn build_request(
        &self,
        namespace: &str,
        payload: Bytes,
    ) -> Result<Request<Full<Bytes>>, SubmitError> {
        let uri = Uri::builder()
            .scheme(self.scheme.clone())
            .authority(self.authority.clone())
            .path_and_query(submit_path(namespace)?)
            .build()?;

        Ok(Request::builder()
            .method(Method::POST)
            .uri(uri)
            .header(CONTENT_TYPE, HeaderValue::from_static("application/json"))
            .body(Full::new(payload))?)
    }
}

/// Send one request and classify the answer. Anything but 200 is an error.
async fn dispatch(
    session: &Session,
    request: Request<Full<Bytes>>,
) -> Result<SubmissionOutcome, SubmitError> {
    let response = session.request(request).await?;
    let status = response.status();
    let body = response.into_body().collect().await?.to_bytes();

    let outcome = SubmissionOutcome { status, body };
    if outcome.is_success() {
        Ok(outcome)
    } else {
        Err(SubmitError::Status(outcome))
    }
}

/// `host:port`, bracketing bare IPv6 literals.
fn authority_for(host: &str, port: u16) -> String {
    if host.contains(':') && !host.starts_with('[') {
        format!("[{host}]:{port}")
    } else {
        format!("{host}:{port}")
    }
}
