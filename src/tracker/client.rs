use reqwest::blocking::Client;
use reqwest::header::CONTENT_TYPE;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing::{debug, info, instrument};

use crate::tracker::dispatch::{
    DispatchOutcome, Method, Request, Response, RetryPolicy, Transport, TransportError,
    send_with_retry,
};
use crate::tracker::error::{Result, TrackerError};
use crate::tracker::model::{ObjectId, Sheet};

/// Blocking HTTP transport. The bearer token is only attached to requests
/// addressed to the API itself, never to pre-signed download links.
pub struct HttpTransport {
    client: Client,
    api_url: String,
    access_token: String,
}

impl HttpTransport {
    pub fn new(api_url: &str, access_token: &str) -> Result<Self> {
        Ok(Self {
            client: Client::builder().build()?,
            api_url: api_url.trim_end_matches('/').to_string(),
            access_token: access_token.to_string(),
        })
    }
}

impl Transport for HttpTransport {
    fn send(&self, request: &Request) -> std::result::Result<Response, TransportError> {
        let method = match request.method {
            Method::Get => reqwest::Method::GET,
            Method::Put => reqwest::Method::PUT,
            Method::Post => reqwest::Method::POST,
            Method::Delete => reqwest::Method::DELETE,
        };

        let mut builder = self.client.request(method, &request.url);
        if request.url.starts_with(&self.api_url) {
            builder = builder.bearer_auth(&self.access_token);
        }
        if let Some(body) = &request.body {
            builder = builder
                .header(CONTENT_TYPE, "application/json")
                .body(body.clone());
        }

        let response = builder.send().map_err(classify)?;
        let status = response.status().as_u16();
        let body = response.bytes().map_err(classify)?.to_vec();
        Ok(Response { status, body })
    }
}

fn classify(error: reqwest::Error) -> TransportError {
    if error.is_connect() {
        TransportError::Connect(error.to_string())
    } else {
        TransportError::Request(error.to_string())
    }
}

/// File attached to a sheet.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
    pub id: ObjectId,
    pub name: String,
    #[serde(default)]
    pub attachment_type: String,
    #[serde(default)]
    pub created_at: String,
}

#[derive(Deserialize)]
struct AttachmentPage {
    #[serde(default)]
    data: Vec<Attachment>,
}

#[derive(Deserialize)]
struct AttachmentLink {
    url: String,
}

/// Read access to sheets and their attachments.
pub struct SheetClient<'t, T: Transport + ?Sized> {
    transport: &'t T,
    api_url: String,
    policy: RetryPolicy,
}

impl<'t, T: Transport + ?Sized> SheetClient<'t, T> {
    pub fn new(transport: &'t T, api_url: &str, policy: RetryPolicy) -> Self {
        Self {
            transport,
            api_url: api_url.trim_end_matches('/').to_string(),
            policy,
        }
    }

    pub fn sheet_url(&self, sheet_id: ObjectId) -> String {
        format!("{}/sheets/{sheet_id}", self.api_url)
    }

    /// Collection URL that row mutations are sent to.
    pub fn rows_url(&self, sheet_id: ObjectId) -> String {
        format!("{}/rows", self.sheet_url(sheet_id))
    }

    /// Fetches a full sheet snapshot.
    #[instrument(level = "info", skip(self))]
    pub fn get_sheet(&self, sheet_id: ObjectId) -> Result<Sheet> {
        let response = self.get(&self.sheet_url(sheet_id))?;
        info!(status = response.status, "get sheet response");
        match response.status {
            200..=299 => response.json(),
            403 => Err(TrackerError::SheetForbidden(sheet_id)),
            404 => Err(TrackerError::SheetNotFound(sheet_id)),
            status => Err(TrackerError::SheetFetch { sheet_id, status }),
        }
    }

    pub fn list_attachments(&self, sheet_id: ObjectId) -> Result<Vec<Attachment>> {
        let url = format!("{}/attachments", self.sheet_url(sheet_id));
        let page: AttachmentPage = self.get_json(sheet_id, &url)?;
        Ok(page.data)
    }

    /// Downloads the newest file attachment called `file_name`, if any.
    #[instrument(level = "info", skip(self))]
    pub fn latest_attachment(&self, sheet_id: ObjectId, file_name: &str) -> Result<Option<Vec<u8>>> {
        let latest = self
            .list_attachments(sheet_id)?
            .into_iter()
            .filter(|attachment| {
                attachment.attachment_type.eq_ignore_ascii_case("file")
                    && attachment.name == file_name
            })
            .max_by(|lhs, rhs| lhs.created_at.cmp(&rhs.created_at));

        let Some(attachment) = latest else {
            return Ok(None);
        };
        debug!(attachment_id = attachment.id, created_at = %attachment.created_at, "attachment selected");

        let url = format!("{}/attachments/{}", self.sheet_url(sheet_id), attachment.id);
        let link: AttachmentLink = self.get_json(sheet_id, &url)?;
        let response = self.get(&link.url)?;
        if !response.is_success() {
            return Err(TrackerError::SheetFetch {
                sheet_id,
                status: response.status,
            });
        }
        Ok(Some(response.body))
    }

    fn get_json<R: DeserializeOwned>(&self, sheet_id: ObjectId, url: &str) -> Result<R> {
        let response = self.get(url)?;
        if !response.is_success() {
            return Err(TrackerError::SheetFetch {
                sheet_id,
                status: response.status,
            });
        }
        response.json()
    }

    fn get(&self, url: &str) -> Result<Response> {
        match send_with_retry(self.transport, &Request::get(url), &self.policy) {
            DispatchOutcome::Delivered { response, .. } => Ok(response),
            DispatchOutcome::Failed { error, .. } => Err(error.into()),
        }
    }
}
