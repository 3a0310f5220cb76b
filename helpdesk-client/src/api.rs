//! # Snapshot fetcher
//!
//! HTTP access to the ticket backend. [`TicketApi`] is the seam the stores
//! and screens depend on; [`HelpDeskClient`] is the reqwest implementation,
//! which also carries the session endpoints the CLI needs.

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::{
    Client, RequestBuilder, Response, StatusCode,
    cookie::Jar,
    multipart::{Form, Part},
};
use serde::de::DeserializeOwned;
use shared::models::{
    AttachmentUpload, CreateUserRequest, ErrorResponse, LoginRequest, Message, MessageDraft,
    NewTicket, Profile, ProfileUpdate, Ticket, TicketId, TicketPage, TicketQuery, UserId,
    UserPage, UserQuery,
};
use tracing::{debug, warn};
use url::Url;

use crate::error::{ApiError, FetchError, SendError};

/// Read-only filters for one history load. They never apply to pushed
/// messages.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HistoryFilter {
    /// Substring the message text must contain.
    pub message_query: Option<String>,
    /// Substring an attachment name must contain.
    pub attachment_query: Option<String>,
}

impl HistoryFilter {
    /// Query parameters for the non-blank filters.
    #[must_use]
    pub fn query_pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = Vec::new();
        if let Some(query) = self.message_query.as_deref().filter(|q| !q.trim().is_empty()) {
            pairs.push(("messageQuery", query.to_string()));
        }
        if let Some(query) = self
            .attachment_query
            .as_deref()
            .filter(|q| !q.trim().is_empty())
        {
            pairs.push(("attachmentQuery", query.to_string()));
        }
        pairs
    }
}

/// Ticket and message endpoints used by the sync engine.
#[async_trait]
pub trait TicketApi: Send + Sync {
    /// One page of tickets matching `query`.
    async fn fetch_tickets(&self, query: &TicketQuery) -> Result<TicketPage, FetchError>;

    /// A single ticket.
    async fn get_ticket(&self, ticket_id: TicketId) -> Result<Ticket, FetchError>;

    /// Full message history of a ticket, narrowed by `filter`.
    async fn fetch_messages(
        &self,
        ticket_id: TicketId,
        filter: &HistoryFilter,
    ) -> Result<Vec<Message>, FetchError>;

    /// Open a ticket.
    async fn create_ticket(&self, ticket: &NewTicket) -> Result<Ticket, SendError>;

    /// Persist a changed ticket, typically its status.
    async fn update_ticket(&self, ticket: &Ticket) -> Result<Ticket, SendError>;

    /// Post `draft` to a ticket.
    async fn send_message(
        &self,
        ticket_id: TicketId,
        draft: &MessageDraft,
    ) -> Result<Message, SendError>;

    /// Read receipt for the calling session's role.
    async fn mark_viewed(&self, ticket_id: TicketId) -> Result<(), SendError>;
}

/// Cookie-authenticated client for the ticket backend.
#[derive(Clone, Debug)]
pub struct HelpDeskClient {
    base_url: Url,
    client: Client,
    jar: Arc<Jar>,
}

impl HelpDeskClient {
    /// Client with a fresh, empty cookie jar.
    ///
    /// # Errors
    ///
    /// Fails when the underlying HTTP client cannot be built.
    pub fn new(base_url: Url) -> Result<Self, ApiError> {
        Self::with_jar(base_url, Arc::new(Jar::default()))
    }

    /// Client sharing `jar`, typically one restored from disk.
    ///
    /// # Errors
    ///
    /// Fails when the underlying HTTP client cannot be built.
    pub fn with_jar(base_url: Url, jar: Arc<Jar>) -> Result<Self, ApiError> {
        let client = Client::builder()
            .cookie_provider(Arc::clone(&jar))
            .build()
            .map_err(|source| ApiError::Request {
                url: base_url.to_string(),
                source,
            })?;
        Ok(Self {
            base_url,
            client,
            jar,
        })
    }

    /// API root every endpoint is resolved against.
    #[must_use]
    pub const fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Cookie jar holding the session cookie.
    #[must_use]
    pub const fn jar(&self) -> &Arc<Jar> {
        &self.jar
    }

    fn endpoint(&self, path: &str) -> Result<Url, ApiError> {
        self.base_url
            .join(path.trim_start_matches('/'))
            .map_err(|source| ApiError::Endpoint {
                path: path.to_string(),
                source,
            })
    }

    /// Send the request built by `build`; on `401` refresh the session once
    /// and send a freshly built copy.
    async fn send_with_refresh<F>(&self, url: &Url, build: F) -> Result<Response, ApiError>
    where
        F: Fn() -> RequestBuilder + Send + Sync,
    {
        let response = build().send().await.map_err(|source| request_error(url, source))?;
        if response.status() != StatusCode::UNAUTHORIZED {
            return Ok(response);
        }
        drop(response);
        debug!(url = %url, "session expired, refreshing before retry");
        if let Err(err) = self.refresh_session().await {
            warn!(error = %err, "session refresh failed");
        }
        build().send().await.map_err(|source| request_error(url, source))
    }

    /// Extend the session cookie.
    ///
    /// # Errors
    ///
    /// Fails when the backend refuses the refresh.
    pub async fn refresh_session(&self) -> Result<(), ApiError> {
        let url = self.endpoint("auth/refresh")?;
        let response = self
            .client
            .post(url.clone())
            .send()
            .await
            .map_err(|source| request_error(&url, source))?;
        expect_success(&url, response).await?;
        Ok(())
    }

    /// Sign in; the session cookie lands in the jar.
    ///
    /// # Errors
    ///
    /// Fails on bad credentials or an unreachable backend.
    pub async fn login(&self, request: &LoginRequest) -> Result<Profile, ApiError> {
        let url = self.endpoint("auth/login")?;
        let response = self
            .client
            .post(url.clone())
            .json(request)
            .send()
            .await
            .map_err(|source| request_error(&url, source))?;
        decode(&url, response).await
    }

    /// # Errors
    ///
    /// Fails when the backend cannot be reached or rejects the call.
    pub async fn logout(&self) -> Result<(), ApiError> {
        let url = self.endpoint("auth/logout")?;
        let response = self
            .client
            .post(url.clone())
            .send()
            .await
            .map_err(|source| request_error(&url, source))?;
        expect_success(&url, response).await?;
        Ok(())
    }

    /// Whether the stored session is still accepted.
    ///
    /// # Errors
    ///
    /// Fails on transport errors and on statuses other than success and
    /// `401`/`403`.
    pub async fn verify(&self) -> Result<bool, ApiError> {
        let url = self.endpoint("auth/verify")?;
        let response = self
            .send_with_refresh(&url, || self.client.get(url.clone()))
            .await?;
        match response.status() {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Ok(false),
            _ => expect_success(&url, response).await.map(|_| true),
        }
    }

    /// # Errors
    ///
    /// Fails when the backend rejects the update.
    pub async fn update_profile(&self, update: &ProfileUpdate) -> Result<Profile, ApiError> {
        let url = self.endpoint("users")?;
        let response = self
            .send_with_refresh(&url, || self.client.put(url.clone()).json(update))
            .await?;
        decode(&url, response).await
    }

    /// Admin only.
    ///
    /// # Errors
    ///
    /// Fails when the backend rejects the listing.
    pub async fn list_users(&self, query: &UserQuery) -> Result<UserPage, ApiError> {
        let url = self.endpoint("users")?;
        let pairs = query.query_pairs();
        let response = self
            .send_with_refresh(&url, || self.client.get(url.clone()).query(&pairs))
            .await?;
        decode(&url, response).await
    }

    /// Admin only.
    ///
    /// # Errors
    ///
    /// Fails when the backend rejects the new account.
    pub async fn add_user(&self, request: &CreateUserRequest) -> Result<(), ApiError> {
        let url = self.endpoint("users")?;
        let response = self
            .send_with_refresh(&url, || self.client.post(url.clone()).json(request))
            .await?;
        expect_success(&url, response).await?;
        Ok(())
    }

    /// Admin only.
    ///
    /// # Errors
    ///
    /// Fails when the backend rejects the deletion.
    pub async fn delete_user(&self, user_id: UserId) -> Result<(), ApiError> {
        let url = self.endpoint(&format!("users/{user_id}"))?;
        let response = self
            .send_with_refresh(&url, || self.client.delete(url.clone()))
            .await?;
        expect_success(&url, response).await?;
        Ok(())
    }
}

#[async_trait]
impl TicketApi for HelpDeskClient {
    async fn fetch_tickets(&self, query: &TicketQuery) -> Result<TicketPage, FetchError> {
        let url = self.endpoint("tickets")?;
        let pairs = query.query_pairs();
        debug!(page = query.page, size = query.size, "fetching ticket page");
        let response = self
            .send_with_refresh(&url, || self.client.get(url.clone()).query(&pairs))
            .await?;
        Ok(decode(&url, response).await?)
    }

    async fn get_ticket(&self, ticket_id: TicketId) -> Result<Ticket, FetchError> {
        let url = self.endpoint(&format!("tickets/{ticket_id}"))?;
        let response = self
            .send_with_refresh(&url, || self.client.get(url.clone()))
            .await?;
        Ok(decode(&url, response).await?)
    }

    async fn fetch_messages(
        &self,
        ticket_id: TicketId,
        filter: &HistoryFilter,
    ) -> Result<Vec<Message>, FetchError> {
        let url = self.endpoint(&format!("tickets/{ticket_id}/messages"))?;
        let pairs = filter.query_pairs();
        debug!(ticket_id, "fetching message history");
        let response = self
            .send_with_refresh(&url, || self.client.get(url.clone()).query(&pairs))
            .await?;
        Ok(decode(&url, response).await?)
    }

    async fn create_ticket(&self, ticket: &NewTicket) -> Result<Ticket, SendError> {
        let url = self.endpoint("tickets")?;
        let response = self
            .send_with_refresh(&url, || {
                let form = Form::new()
                    .text("header", ticket.header.clone())
                    .text("message", ticket.message.clone())
                    .text("share", ticket.share.to_string());
                self.client
                    .post(url.clone())
                    .multipart(attach_files(form, &ticket.files))
            })
            .await?;
        Ok(decode(&url, response).await?)
    }

    async fn update_ticket(&self, ticket: &Ticket) -> Result<Ticket, SendError> {
        let url = self.endpoint(&format!("tickets/{}", ticket.id))?;
        let response = self
            .send_with_refresh(&url, || self.client.put(url.clone()).json(ticket))
            .await?;
        Ok(decode(&url, response).await?)
    }

    async fn send_message(
        &self,
        ticket_id: TicketId,
        draft: &MessageDraft,
    ) -> Result<Message, SendError> {
        if draft.is_empty() {
            return Err(SendError::EmptyDraft);
        }
        let url = self.endpoint(&format!("tickets/{ticket_id}/messages"))?;
        let response = self
            .send_with_refresh(&url, || {
                let mut form = Form::new().text("message", draft.body.clone());
                if draft.share {
                    form = form.text("share", "true");
                }
                self.client
                    .post(url.clone())
                    .multipart(attach_files(form, &draft.attachments))
            })
            .await?;
        Ok(decode(&url, response).await?)
    }

    async fn mark_viewed(&self, ticket_id: TicketId) -> Result<(), SendError> {
        let url = self.endpoint(&format!("tickets/{ticket_id}/view"))?;
        let response = self
            .send_with_refresh(&url, || self.client.post(url.clone()))
            .await?;
        expect_success(&url, response).await?;
        Ok(())
    }
}

fn request_error(url: &Url, source: reqwest::Error) -> ApiError {
    ApiError::Request {
        url: url.to_string(),
        source,
    }
}

fn attach_files(mut form: Form, files: &[AttachmentUpload]) -> Form {
    for file in files {
        form = form.part("files", file_part(file));
    }
    form
}

/// Multipart part for `file`; the content type falls back to a guess from
/// the file name.
fn file_part(file: &AttachmentUpload) -> Part {
    let mime = file.content_type.clone().unwrap_or_else(|| {
        mime_guess::from_path(&file.file_name)
            .first_or_octet_stream()
            .essence_str()
            .to_string()
    });
    let part = || Part::bytes(file.bytes.clone()).file_name(file.file_name.clone());
    part().mime_str(&mime).unwrap_or_else(|err| {
        warn!(file = %file.file_name, error = %err, "unusable content type, sending without one");
        part()
    })
}

async fn expect_success(url: &Url, response: Response) -> Result<Response, ApiError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(ApiError::Status {
        url: url.to_string(),
        status,
        message: failure_message(status, &body),
    })
}

/// Prefer the backend's `ErrorResponse`, then the raw body, then the
/// status reason.
fn failure_message(status: StatusCode, body: &str) -> String {
    if let Ok(error) = serde_json::from_str::<ErrorResponse>(body) {
        return error.to_string();
    }
    let body = body.trim();
    if body.is_empty() {
        status.canonical_reason().unwrap_or("request failed").to_string()
    } else {
        body.to_string()
    }
}

async fn decode<T: DeserializeOwned>(url: &Url, response: Response) -> Result<T, ApiError> {
    let response = expect_success(url, response).await?;
    let bytes = response
        .bytes()
        .await
        .map_err(|source| request_error(url, source))?;
    serde_json::from_slice(&bytes).map_err(|source| ApiError::Decode {
        url: url.to_string(),
        source,
    })
}
