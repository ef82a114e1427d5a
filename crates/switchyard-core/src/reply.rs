//! Passive replies to a pushed message.
//!
//! Each request gets one [`ResponseWriter`]. The first successful write
//! fills its slot; every later write fails with
//! [`GatewayError::AlreadyResponded`] and leaves the first reply untouched.

use std::sync::{Arc, Mutex, MutexGuard};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::clock::Clock;
use crate::crypto::MessageCrypto;
use crate::error::{GatewayError, GatewayResult};
use crate::xml::XmlBuilder;

/// Most articles a news reply may carry.
pub const MAX_ARTICLES: usize = 8;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Video {
    pub media_id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Music {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub music_url: String,
    /// High quality stream, preferred on Wi-Fi.
    #[serde(default)]
    pub hq_music_url: String,
    pub thumb_media_id: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Article {
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub pic_url: String,
    pub url: String,
}

/// Parameters for encrypting the reply of an encrypted request.
#[derive(Debug, Clone)]
pub(crate) struct ReplyEncryption {
    pub(crate) crypto: Arc<dyn MessageCrypto>,
    pub(crate) timestamp: String,
    pub(crate) nonce: String,
}

#[derive(Debug)]
struct Sent {
    kind: &'static str,
    body: String,
}

/// Single-slot writer for the reply body of one request.
#[derive(Debug)]
pub struct ResponseWriter {
    /// Recipient (the user who sent the message).
    to_user: String,
    /// Sender (the tenant account).
    from_user: String,
    clock: Arc<dyn Clock>,
    encryption: Option<ReplyEncryption>,
    slot: Mutex<Option<Sent>>,
}

impl ResponseWriter {
    pub(crate) fn new(
        to_user: impl Into<String>,
        from_user: impl Into<String>,
        clock: Arc<dyn Clock>,
        encryption: Option<ReplyEncryption>,
    ) -> Self {
        Self {
            to_user: to_user.into(),
            from_user: from_user.into(),
            clock,
            encryption,
            slot: Mutex::new(None),
        }
    }

    pub fn text(&self, content: &str) -> GatewayResult<()> {
        self.send("text", |xml| {
            xml.cdata("Content", content);
        })
    }

    pub fn image(&self, media_id: &str) -> GatewayResult<()> {
        self.send("image", |xml| {
            xml.open("Image").cdata("MediaId", media_id).close("Image");
        })
    }

    pub fn voice(&self, media_id: &str) -> GatewayResult<()> {
        self.send("voice", |xml| {
            xml.open("Voice").cdata("MediaId", media_id).close("Voice");
        })
    }

    pub fn video(&self, video: &Video) -> GatewayResult<()> {
        self.send("video", |xml| {
            xml.open("Video")
                .cdata("MediaId", &video.media_id)
                .cdata("Title", &video.title)
                .cdata("Description", &video.description)
                .close("Video");
        })
    }

    pub fn music(&self, music: &Music) -> GatewayResult<()> {
        self.send("music", |xml| {
            xml.open("Music")
                .cdata("Title", &music.title)
                .cdata("Description", &music.description)
                .cdata("MusicUrl", &music.music_url)
                .cdata("HQMusicUrl", &music.hq_music_url)
                .cdata("ThumbMediaId", &music.thumb_media_id)
                .close("Music");
        })
    }

    /// News reply with 1 to [`MAX_ARTICLES`] articles.
    pub fn articles(&self, articles: &[Article]) -> GatewayResult<()> {
        if articles.is_empty() || articles.len() > MAX_ARTICLES {
            return Err(GatewayError::protocol(format!(
                "news reply needs 1 to {} articles, got {}",
                MAX_ARTICLES,
                articles.len()
            )));
        }
        self.send("news", |xml| {
            xml.number("ArticleCount", articles.len() as i64);
            xml.open("Articles");
            for article in articles {
                xml.open("item")
                    .cdata("Title", &article.title)
                    .cdata("Description", &article.description)
                    .cdata("PicUrl", &article.pic_url)
                    .cdata("Url", &article.url)
                    .close("item");
            }
            xml.close("Articles");
        })
    }

    /// Whether a reply has been written.
    pub fn is_sent(&self) -> bool {
        self.lock().is_some()
    }

    /// Kind of the reply written so far, if any.
    pub fn sent_kind(&self) -> Option<&'static str> {
        self.lock().as_ref().map(|sent| sent.kind)
    }

    /// The body to put on the wire; empty when nothing was written.
    pub(crate) fn into_body(self) -> String {
        self.slot
            .into_inner()
            .unwrap_or_else(|e| e.into_inner())
            .map(|sent| sent.body)
            .unwrap_or_default()
    }

    fn send(&self, kind: &'static str, content: impl FnOnce(&mut XmlBuilder)) -> GatewayResult<()> {
        let mut slot = self.lock();
        if let Some(sent) = slot.as_ref() {
            return Err(GatewayError::AlreadyResponded {
                previous: sent.kind.to_string(),
            });
        }

        let mut xml = XmlBuilder::new();
        xml.cdata("ToUserName", &self.to_user)
            .cdata("FromUserName", &self.from_user)
            .number("CreateTime", self.clock.now().timestamp())
            .cdata("MsgType", kind);
        content(&mut xml);
        let plain = xml.finish()?;

        let body = match &self.encryption {
            Some(enc) => enc.crypto.encrypt_reply(&plain, &enc.timestamp, &enc.nonce)?,
            None => plain,
        };

        debug!(kind = kind, encrypted = self.encryption.is_some(), "reply written");
        *slot = Some(Sent { kind, body });
        Ok(())
    }

    fn lock(&self) -> MutexGuard<'_, Option<Sent>> {
        self.slot.lock().unwrap_or_else(|e| e.into_inner())
    }
}
