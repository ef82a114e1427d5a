//! Out-of-band customer-service messages.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::credentials::Credentials;
use crate::error::{GatewayError, GatewayResult};
use crate::platform::PlatformApi;
use crate::types::{CustomerMessage, MiniProgramPage};

/// Remote codes that only concern one recipient (reply window closed, quota
/// for that user reached, not a follower). Expected in bulk sends.
const RECIPIENT_CODES: &[i64] = &[43004, 45015, 45047];

/// Sends customer-service messages on behalf of one tenant.
#[derive(Debug, Clone)]
pub struct CustomerMessenger {
    tenant: String,
    api: Arc<dyn PlatformApi>,
    credentials: Arc<Credentials>,
}

impl CustomerMessenger {
    pub(crate) fn new(
        tenant: impl Into<String>,
        api: Arc<dyn PlatformApi>,
        credentials: Arc<Credentials>,
    ) -> Self {
        Self {
            tenant: tenant.into(),
            api,
            credentials,
        }
    }

    /// Send `message` to every recipient. Returns how many were delivered.
    ///
    /// A failure for one recipient is logged and skipped. Credential errors
    /// abort the batch since every later send would fail the same way.
    pub async fn send<S: AsRef<str>>(
        &self,
        recipients: &[S],
        message: &CustomerMessage,
    ) -> GatewayResult<usize> {
        let token = self.credentials.authorizer_access_token(&self.tenant).await?;

        let mut delivered = 0;
        for recipient in recipients {
            let recipient = recipient.as_ref();
            match self
                .api
                .send_custom_message(&token, recipient, message)
                .await
            {
                Ok(()) => delivered += 1,
                Err(e) if e.is_credential_rejection() => return Err(e),
                Err(GatewayError::Remote { code, message }) if RECIPIENT_CODES.contains(&code) => {
                    debug!(tenant = %self.tenant, recipient = %recipient, code, message = %message, "recipient skipped");
                }
                Err(e) => {
                    warn!(tenant = %self.tenant, recipient = %recipient, error = %e, "customer message failed");
                }
            }
        }
        Ok(delivered)
    }

    /// Send `message` to a single recipient, surfacing its failure.
    pub async fn send_one(&self, recipient: &str, message: &CustomerMessage) -> GatewayResult<()> {
        let token = self.credentials.authorizer_access_token(&self.tenant).await?;
        self.api
            .send_custom_message(&token, recipient, message)
            .await
            .inspect_err(|e| {
                warn!(tenant = %self.tenant, recipient = %recipient, error = %e, "customer message failed");
            })
    }

    pub async fn send_text<S: AsRef<str>>(
        &self,
        recipients: &[S],
        content: &str,
    ) -> GatewayResult<usize> {
        self.send(recipients, &CustomerMessage::text(content)).await
    }

    pub async fn send_mini_program_page<S: AsRef<str>>(
        &self,
        recipients: &[S],
        page: &MiniProgramPage,
    ) -> GatewayResult<usize> {
        self.send(recipients, &CustomerMessage::mini_program_page(page.clone()))
            .await
    }
}

/// Messenger bound to the sender of the current request.
#[derive(Debug, Clone)]
pub struct CustomerResponder {
    openid: String,
    messenger: CustomerMessenger,
}

impl CustomerResponder {
    pub(crate) fn new(openid: impl Into<String>, messenger: CustomerMessenger) -> Self {
        Self {
            openid: openid.into(),
            messenger,
        }
    }

    pub fn openid(&self) -> &str {
        &self.openid
    }

    pub async fn text(&self, content: &str) -> GatewayResult<()> {
        self.messenger
            .send_one(&self.openid, &CustomerMessage::text(content))
            .await
    }

    pub async fn mini_program_page(&self, page: &MiniProgramPage) -> GatewayResult<()> {
        self.messenger
            .send_one(
                &self.openid,
                &CustomerMessage::mini_program_page(page.clone()),
            )
            .await
    }
}
