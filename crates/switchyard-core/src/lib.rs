//! Credential lifecycle and webhook dispatch for platform integrators.
//!
//! An integrator acts on behalf of many tenant accounts. This crate keeps
//! the integrator's credentials fresh, onboards and offboards tenants from
//! the platform's authorization notices, and routes encrypted message
//! pushes to registered handlers:
//!
//! - Credential hierarchy with early refresh and single-flight per key
//! - Authorization notices (verify ticket, authorized, unauthorized)
//! - Webhook verification, decryption and handler dispatch
//! - Passive replies and customer-service messages
//! - Reconciliation of local tenants against the platform's tenant list
//! - Follower statistics over long date ranges
//!
//! # Quick Start
//!
//! ```no_run
//! use switchyard_core::{Dispatcher, EventType, Flow, Gateway, GatewayConfig};
//!
//! # async fn example() -> anyhow::Result<()> {
//! let dispatcher = Dispatcher::new().on_event_fn(EventType::Subscribe, |ctx, _event| {
//!     ctx.writer().text("Welcome!")?;
//!     Ok(Flow::Break)
//! });
//!
//! let gateway = Gateway::builder(GatewayConfig::from_env())
//!     .with_dispatcher(dispatcher)
//!     .build()?;
//!
//! let report = gateway.migrate_apps().await?;
//! println!("{} tenants authorized", report.seen);
//! # Ok(())
//! # }
//! ```
//!
//! # Configuration
//!
//! | Environment Variable | Description |
//! |---------------------|-------------|
//! | `SWITCHYARD_COMPONENT_APPID` | Integrator app id |
//! | `SWITCHYARD_COMPONENT_SECRET` | Integrator app secret |
//! | `SWITCHYARD_MESSAGE_TOKEN` | Push signature token |
//! | `SWITCHYARD_AES_KEY` | 43-character push encryption key |
//! | `SWITCHYARD_API_URL` | Platform API base URL (default: `https://api.weixin.qq.com`) |
//! | `SWITCHYARD_LOGIN_URL` | Onboarding login page |
//! | `SWITCHYARD_TIMEOUT` | Request timeout in seconds (default: 10) |
//! | `SWITCHYARD_PAGE_SIZE` | Reconciliation page size (default: 100) |

pub mod clock;
pub mod config;
pub mod credentials;
pub mod crypto;
pub mod customer;
pub mod dispatch;
pub mod error;
pub mod expiring;
pub mod flight;
pub mod gateway;
pub mod message;
pub mod notify;
pub mod platform;
pub mod registry;
pub mod reply;
pub mod stats;
pub mod store;
pub mod types;
mod xml;

// Re-export main types
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::GatewayConfig;
pub use credentials::Credentials;
pub use crypto::{BizMsgCrypt, MessageCrypto};
pub use customer::{CustomerMessenger, CustomerResponder};
pub use dispatch::{
    Dispatcher, EventHandler, Flow, HandlerResult, RequestContext, TextHandler, WebhookQuery,
    WebhookReply, WebhookRequest,
};
pub use error::{GatewayError, GatewayResult};
pub use gateway::{Gateway, GatewayBuilder};
pub use message::{Envelope, EventMessage, EventType, MsgType, TextMessage};
pub use notify::{AuthorizationNotice, NoticeKind};
pub use platform::{AuthType, HttpPlatformApi, LoginOptions, PlatformApi};
pub use registry::{ReconcileReport, TenantClient, TenantRegistry};
pub use reply::{Article, Music, ResponseWriter, Video};
pub use stats::{split_date_range, DateRange, UserStatistics};
pub use store::{AppStore, CredentialStore, KvCredentialStore, KvStore, MemoryAppStore, MemoryKv};
pub use types::{AppInfo, AuthorizationGrant, CustomerMessage, MiniProgramPage};
