//! Routing of pushed messages to registered handlers.
//!
//! ```text
//! WebhookRequest ─▶ verify / decrypt ─▶ Envelope ─▶ handlers (in order) ─▶ WebhookReply
//!                         │ fails                         │ none wrote
//!                         ▼                               ▼
//!                    empty reply                     empty reply
//! ```
//!
//! Handlers run one after another on the request's task. A handler error is
//! logged and the chain goes on; [`Flow::Break`] ends it.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::OnceCell;
use tracing::{debug, warn};

use crate::crypto::MessageCrypto;
use crate::customer::CustomerResponder;
use crate::error::{GatewayError, GatewayResult};
use crate::message::{encrypted_payload, Envelope, EventMessage, EventType, MsgType, TextMessage};
use crate::registry::TenantClient;
use crate::reply::{ReplyEncryption, ResponseWriter};
use crate::types::AppInfo;

/// What the chain does after a handler returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    /// Skip every remaining handler for this request.
    Break,
}

pub type HandlerResult = anyhow::Result<Flow>;

#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, ctx: &RequestContext, event: &EventMessage) -> HandlerResult;
}

#[async_trait]
pub trait TextHandler: Send + Sync {
    async fn handle(&self, ctx: &RequestContext, text: &TextMessage) -> HandlerResult;
}

/// Adapter for plain closures.
struct FnHandler<F>(F);

#[async_trait]
impl<F> EventHandler for FnHandler<F>
where
    F: Fn(&RequestContext, &EventMessage) -> HandlerResult + Send + Sync,
{
    async fn handle(&self, ctx: &RequestContext, event: &EventMessage) -> HandlerResult {
        (self.0)(ctx, event)
    }
}

#[async_trait]
impl<F> TextHandler for FnHandler<F>
where
    F: Fn(&RequestContext, &TextMessage) -> HandlerResult + Send + Sync,
{
    async fn handle(&self, ctx: &RequestContext, text: &TextMessage) -> HandlerResult {
        (self.0)(ctx, text)
    }
}

/// Handler table, built once at startup and shared by every request.
#[derive(Default)]
pub struct Dispatcher {
    events: HashMap<EventType, Vec<Arc<dyn EventHandler>>>,
    texts: Vec<Arc<dyn TextHandler>>,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("events", &self.events.keys().collect::<Vec<_>>())
            .field("texts", &self.texts.len())
            .finish()
    }
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `handler` for every push of `event`, after the ones already registered.
    pub fn on_event(mut self, event: EventType, handler: impl EventHandler + 'static) -> Self {
        self.events.entry(event).or_default().push(Arc::new(handler));
        self
    }

    /// Run `handler` for every text message.
    pub fn on_text(mut self, handler: impl TextHandler + 'static) -> Self {
        self.texts.push(Arc::new(handler));
        self
    }

    pub fn on_event_fn<F>(self, event: EventType, handler: F) -> Self
    where
        F: Fn(&RequestContext, &EventMessage) -> HandlerResult + Send + Sync + 'static,
    {
        self.on_event(event, FnHandler(handler))
    }

    pub fn on_text_fn<F>(self, handler: F) -> Self
    where
        F: Fn(&RequestContext, &TextMessage) -> HandlerResult + Send + Sync + 'static,
    {
        self.on_text(FnHandler(handler))
    }

    pub fn handler_count(&self) -> usize {
        self.events.values().map(Vec::len).sum::<usize>() + self.texts.len()
    }

    /// Run the handlers matching the message in `ctx`.
    pub async fn dispatch(&self, ctx: &RequestContext) {
        match ctx.msg_type() {
            MsgType::Event => {
                let Some(event) = ctx.envelope().event() else {
                    return;
                };
                let handlers = self
                    .events
                    .get(&event.event)
                    .map(Vec::as_slice)
                    .unwrap_or_default();
                for (index, handler) in handlers.iter().enumerate() {
                    if settle(ctx, index, handler.handle(ctx, &event).await) == Flow::Break {
                        break;
                    }
                }
            }
            MsgType::Text => {
                let Some(text) = ctx.envelope().text() else {
                    return;
                };
                for (index, handler) in self.texts.iter().enumerate() {
                    if settle(ctx, index, handler.handle(ctx, &text).await) == Flow::Break {
                        break;
                    }
                }
            }
            other => {
                debug!(tenant = %ctx.tenant(), msg_type = %other, "no handlers for message type");
            }
        }
    }

    /// Verify, decrypt and dispatch one push for `client`.
    ///
    /// Never fails: anything wrong with the request yields an empty reply.
    pub(crate) async fn serve(&self, client: &TenantClient, request: &WebhookRequest) -> WebhookReply {
        let crypto = client.crypto();

        if let Some(echostr) = request.query.echostr.as_deref() {
            return handshake(crypto.as_ref(), &request.query, echostr);
        }

        let opened = match open_request(&crypto, &request.query, &request.body) {
            Ok(opened) => opened,
            Err(e) => {
                warn!(tenant = %client.tenant(), error = %e, "push rejected");
                return WebhookReply::empty();
            }
        };
        let envelope = match Envelope::parse(&opened.plaintext) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(tenant = %client.tenant(), error = %e, "push is not a message");
                return WebhookReply::empty();
            }
        };
        debug!(
            tenant = %client.tenant(),
            msg_type = %envelope.msg_type,
            encrypted = opened.encryption.is_some(),
            "push received"
        );

        let writer = ResponseWriter::new(
            envelope.from_user.clone(),
            envelope.to_user.clone(),
            client.clock(),
            opened.encryption,
        );
        let ctx = RequestContext::new(client.clone(), envelope, writer);
        self.dispatch(&ctx).await;
        WebhookReply::new(ctx.into_writer().into_body())
    }
}

fn settle(ctx: &RequestContext, index: usize, outcome: HandlerResult) -> Flow {
    match outcome {
        Ok(flow) => flow,
        Err(e) => {
            warn!(
                tenant = %ctx.tenant(),
                msg_type = %ctx.msg_type(),
                handler = index,
                error = %e,
                "handler failed"
            );
            Flow::Continue
        }
    }
}

/// State visible to the handlers of one request. Dropped with the request.
#[derive(Debug)]
pub struct RequestContext {
    client: TenantClient,
    envelope: Envelope,
    writer: ResponseWriter,
    app_info: OnceCell<Arc<AppInfo>>,
    scratch: Mutex<Map<String, Value>>,
}

impl RequestContext {
    pub(crate) fn new(client: TenantClient, envelope: Envelope, writer: ResponseWriter) -> Self {
        Self {
            client,
            envelope,
            writer,
            app_info: OnceCell::new(),
            scratch: Mutex::new(Map::new()),
        }
    }

    pub fn tenant(&self) -> &str {
        self.client.tenant()
    }

    /// Open id of the user who sent the message.
    pub fn sender(&self) -> &str {
        &self.envelope.from_user
    }

    pub fn msg_type(&self) -> &MsgType {
        &self.envelope.msg_type
    }

    pub fn envelope(&self) -> &Envelope {
        &self.envelope
    }

    pub fn client(&self) -> &TenantClient {
        &self.client
    }

    /// Passive reply to this push.
    pub fn writer(&self) -> &ResponseWriter {
        &self.writer
    }

    /// Out-of-band messages to the sender.
    pub fn customer(&self) -> CustomerResponder {
        CustomerResponder::new(self.envelope.from_user.clone(), self.client.customer())
    }

    /// Tenant metadata, loaded on first use and kept for the request.
    pub async fn app_info(&self) -> GatewayResult<Arc<AppInfo>> {
        self.app_info
            .get_or_try_init(|| async { self.client.app_info().await.map(Arc::new) })
            .await
            .cloned()
    }

    pub fn set(&self, key: impl Into<String>, value: impl Into<Value>) {
        self.scratch().insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.scratch().get(key).cloned()
    }

    pub fn remove(&self, key: &str) -> Option<Value> {
        self.scratch().remove(key)
    }

    pub(crate) fn into_writer(self) -> ResponseWriter {
        self.writer
    }

    fn scratch(&self) -> MutexGuard<'_, Map<String, Value>> {
        self.scratch.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Query parameters the platform appends to every push.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebhookQuery {
    #[serde(default)]
    pub signature: Option<String>,
    #[serde(default)]
    pub timestamp: Option<String>,
    #[serde(default)]
    pub nonce: Option<String>,
    /// Present only on the URL verification handshake.
    #[serde(default)]
    pub echostr: Option<String>,
    #[serde(default)]
    pub encrypt_type: Option<String>,
    #[serde(default)]
    pub msg_signature: Option<String>,
    #[serde(default)]
    pub openid: Option<String>,
}

impl WebhookQuery {
    pub fn is_encrypted(&self) -> bool {
        self.encrypt_type.as_deref() == Some("aes")
    }
}

/// A push as received by the transport.
#[derive(Debug, Clone, Default)]
pub struct WebhookRequest {
    pub query: WebhookQuery,
    pub body: String,
}

/// Body to send back to the platform. Empty means "received, nothing to say".
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WebhookReply {
    pub body: String,
}

impl WebhookReply {
    pub fn new(body: impl Into<String>) -> Self {
        Self { body: body.into() }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.body.is_empty()
    }
}

/// Plaintext of a verified push.
pub(crate) struct Opened {
    pub(crate) plaintext: String,
    /// Set when the push was encrypted; the reply must be too.
    pub(crate) encryption: Option<ReplyEncryption>,
}

pub(crate) fn open_request(
    crypto: &Arc<dyn MessageCrypto>,
    query: &WebhookQuery,
    body: &str,
) -> GatewayResult<Opened> {
    let timestamp = query.timestamp.as_deref().unwrap_or_default();
    let nonce = query.nonce.as_deref().unwrap_or_default();

    if query.is_encrypted() {
        let msg_signature = query
            .msg_signature
            .as_deref()
            .ok_or_else(|| GatewayError::Signature {
                message: "encrypted push without msg_signature".to_string(),
            })?;
        let payload = encrypted_payload(body)?;
        let plaintext = crypto.decrypt_request(msg_signature, timestamp, nonce, &payload)?;
        return Ok(Opened {
            plaintext,
            encryption: Some(ReplyEncryption {
                crypto: Arc::clone(crypto),
                timestamp: timestamp.to_string(),
                nonce: nonce.to_string(),
            }),
        });
    }

    let signature = query.signature.as_deref().unwrap_or_default();
    if !crypto.verify_url_signature(signature, timestamp, nonce) {
        return Err(GatewayError::Signature {
            message: "signature does not match".to_string(),
        });
    }
    Ok(Opened {
        plaintext: body.to_string(),
        encryption: None,
    })
}

/// Answer the URL verification handshake: echo `echostr` when signed.
fn handshake(crypto: &dyn MessageCrypto, query: &WebhookQuery, echostr: &str) -> WebhookReply {
    let signature = query.signature.as_deref().unwrap_or_default();
    let timestamp = query.timestamp.as_deref().unwrap_or_default();
    let nonce = query.nonce.as_deref().unwrap_or_default();
    if crypto.verify_url_signature(signature, timestamp, nonce) {
        WebhookReply::new(echostr)
    } else {
        warn!("verification handshake with bad signature");
        WebhookReply::empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{signature, BizMsgCrypt};

    const KEY: &str = "abcdefghijklmnopqrstuvwxyz0123456789ABCDEFG";

    fn crypto() -> Arc<dyn MessageCrypto> {
        Arc::new(BizMsgCrypt::new("token", KEY, "wxcomp").unwrap())
    }

    fn signed_query() -> WebhookQuery {
        WebhookQuery {
            signature: Some(signature(&["token", "1409659813", "nonce"])),
            timestamp: Some("1409659813".into()),
            nonce: Some("nonce".into()),
            ..Default::default()
        }
    }

    #[test]
    fn test_plain_push_requires_signature() {
        let opened = open_request(&crypto(), &signed_query(), "<xml/>").unwrap();
        assert_eq!(opened.plaintext, "<xml/>");
        assert!(opened.encryption.is_none());

        let mut query = signed_query();
        query.nonce = Some("other".into());
        assert!(matches!(
            open_request(&crypto(), &query, "<xml/>"),
            Err(GatewayError::Signature { .. })
        ));
    }

    #[test]
    fn test_encrypted_push_is_opened() {
        let crypto = crypto();
        let sealed = crypto
            .encrypt_reply("<xml><MsgType>text</MsgType></xml>", "1409659813", "nonce")
            .unwrap();
        let fields = crate::xml::parse_flat(&sealed).unwrap();

        let query = WebhookQuery {
            timestamp: Some("1409659813".into()),
            nonce: Some("nonce".into()),
            encrypt_type: Some("aes".into()),
            msg_signature: Some(fields["MsgSignature"].clone()),
            ..Default::default()
        };
        let body = format!("<xml><Encrypt><![CDATA[{}]]></Encrypt></xml>", fields["Encrypt"]);

        let opened = open_request(&crypto, &query, &body).unwrap();
        assert_eq!(opened.plaintext, "<xml><MsgType>text</MsgType></xml>");
        assert!(opened.encryption.is_some());
    }

    #[test]
    fn test_encrypted_push_without_msg_signature() {
        let query = WebhookQuery {
            encrypt_type: Some("aes".into()),
            ..signed_query()
        };
        assert!(matches!(
            open_request(&crypto(), &query, "<xml><Encrypt>x</Encrypt></xml>"),
            Err(GatewayError::Signature { .. })
        ));
    }

    #[test]
    fn test_handshake_echoes_only_when_signed() {
        let crypto = crypto();
        let reply = handshake(crypto.as_ref(), &signed_query(), "echo-123");
        assert_eq!(reply.body, "echo-123");

        let reply = handshake(crypto.as_ref(), &WebhookQuery::default(), "echo-123");
        assert!(reply.is_empty());
    }

    #[test]
    fn test_query_deserializes_sparse_parameters() {
        let query: WebhookQuery = serde_json::from_value(serde_json::json!({
            "timestamp": "1",
            "encrypt_type": "aes"
        }))
        .unwrap();
        assert!(query.is_encrypted());
        assert_eq!(query.signature, None);
    }
}
