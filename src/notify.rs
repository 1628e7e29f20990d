//! Build notifications over the Telegram Bot API.
//!
//! Delivery is best-effort: callers log a failed send and move on, a
//! notification never decides the outcome of a build.

use crate::config::TelegramConfig;
use crate::error::NotifyError;
use crate::kernel::diagnostics::Diagnosis;
use crate::models::{DeviceProfile, MessagePayload, NotificationMessage, SourceTree, ToolchainSet};
use flate2::write::GzEncoder;
use flate2::Compression;
use futures::future::BoxFuture;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Outbound messaging channel.
pub trait Notifier: Send + Sync {
    fn send_text<'a>(&'a self, text: &'a str) -> BoxFuture<'a, Result<(), NotifyError>>;

    fn send_document<'a>(&'a self, path: &'a Path, caption: &'a str) -> BoxFuture<'a, Result<(), NotifyError>>;

    fn send_sticker<'a>(&'a self, file_id: &'a str) -> BoxFuture<'a, Result<(), NotifyError>>;
}

/// Bot API client posting to `<api_base>/bot<token>/<method>`.
pub struct TelegramNotifier {
    client: reqwest::Client,
    config: TelegramConfig,
}

impl TelegramNotifier {
    pub fn new(config: TelegramConfig) -> Self {
        TelegramNotifier {
            client: reqwest::Client::new(),
            config,
        }
    }

    fn endpoint(&self, method: &str) -> String {
        format!(
            "{}/bot{}/{}",
            self.config.api_base.trim_end_matches('/'),
            self.config.token,
            method
        )
    }

    fn check(method: &str, response: reqwest::Response) -> Result<(), NotifyError> {
        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(NotifyError::Rejected {
                method: method.to_string(),
                status: status.as_u16(),
            })
        }
    }

    async fn post_form(&self, method: &str, params: &[(&str, &str)]) -> Result<(), NotifyError> {
        log::debug!("[Notify] {}", method);
        let response = self.client.post(self.endpoint(method)).form(params).send().await?;
        Self::check(method, response)
    }

    async fn post_document(&self, path: &Path, caption: &str) -> Result<(), NotifyError> {
        let bytes = tokio::fs::read(path).await?;
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "upload".to_string());

        let form = reqwest::multipart::Form::new()
            .text("chat_id", self.config.chat_id.clone())
            .text("caption", caption.to_string())
            .text("parse_mode", "HTML")
            .part("document", reqwest::multipart::Part::bytes(bytes).file_name(file_name));

        log::debug!("[Notify] sendDocument {}", path.display());
        let response = self
            .client
            .post(self.endpoint("sendDocument"))
            .multipart(form)
            .send()
            .await?;
        Self::check("sendDocument", response)
    }

    /// Deliver a prepared message.
    pub async fn dispatch(&self, message: &NotificationMessage) -> Result<(), NotifyError> {
        match &message.payload {
            MessagePayload::Text(text) => {
                self.post_form(
                    "sendMessage",
                    &[
                        ("chat_id", message.chat_id.as_str()),
                        ("text", text.as_str()),
                        ("parse_mode", "HTML"),
                        ("disable_web_page_preview", "true"),
                    ],
                )
                .await
            }
            MessagePayload::Sticker(file_id) => {
                self.post_form(
                    "sendSticker",
                    &[("chat_id", message.chat_id.as_str()), ("sticker", file_id.as_str())],
                )
                .await
            }
            MessagePayload::Document { path, caption } => self.post_document(path, caption).await,
        }
    }

    fn message(&self, payload: MessagePayload) -> NotificationMessage {
        NotificationMessage {
            chat_id: self.config.chat_id.clone(),
            payload,
        }
    }
}

impl Notifier for TelegramNotifier {
    fn send_text<'a>(&'a self, text: &'a str) -> BoxFuture<'a, Result<(), NotifyError>> {
        Box::pin(async move { self.dispatch(&self.message(MessagePayload::Text(text.to_string()))).await })
    }

    fn send_document<'a>(&'a self, path: &'a Path, caption: &'a str) -> BoxFuture<'a, Result<(), NotifyError>> {
        Box::pin(async move {
            let payload = MessagePayload::Document {
                path: path.to_path_buf(),
                caption: caption.to_string(),
            };
            self.dispatch(&self.message(payload)).await
        })
    }

    fn send_sticker<'a>(&'a self, file_id: &'a str) -> BoxFuture<'a, Result<(), NotifyError>> {
        Box::pin(async move { self.dispatch(&self.message(MessagePayload::Sticker(file_id.to_string()))).await })
    }
}

/// Fallback when no bot is configured: messages go to the log.
#[derive(Debug, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn send_text<'a>(&'a self, text: &'a str) -> BoxFuture<'a, Result<(), NotifyError>> {
        log::info!("[Notify] {}", text.replace('\n', " | "));
        Box::pin(async { Ok(()) })
    }

    fn send_document<'a>(&'a self, path: &'a Path, caption: &'a str) -> BoxFuture<'a, Result<(), NotifyError>> {
        log::info!("[Notify] document {} ({})", path.display(), caption.replace('\n', " | "));
        Box::pin(async { Ok(()) })
    }

    fn send_sticker<'a>(&'a self, file_id: &'a str) -> BoxFuture<'a, Result<(), NotifyError>> {
        log::debug!("[Notify] sticker {}", file_id);
        Box::pin(async { Ok(()) })
    }
}

/// Pick the Telegram client when credentials exist, the log otherwise.
pub fn notifier_for(telegram: Option<&TelegramConfig>) -> Box<dyn Notifier> {
    match telegram {
        Some(config) => Box::new(TelegramNotifier::new(config.clone())),
        None => {
            log::info!("[Notify] No bot token configured, notifications go to the log");
            Box::new(LogNotifier)
        }
    }
}

/// Escape text for HTML parse mode.
pub fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;")
}

/// `Xm Ys`
pub fn format_elapsed(elapsed: Duration) -> String {
    let secs = elapsed.as_secs();
    format!("{}m {}s", secs / 60, secs % 60)
}

pub fn start_message(
    profile: &DeviceProfile,
    branch: &str,
    tree: &SourceTree,
    toolchains: &ToolchainSet,
    at: chrono::DateTime<chrono::Local>,
) -> String {
    format!(
        "<b>Build started</b>\n\
         Device: <code>{}</code> ({})\n\
         Branch: <code>{}</code>\n\
         Commit: <code>{}</code>\n\
         Compiler: <code>{}</code>\n\
         Started: {}",
        escape_html(&profile.codename),
        escape_html(&profile.display_name),
        escape_html(branch),
        escape_html(tree.short_sha()),
        escape_html(&toolchains.compiler_identity),
        at.format("%Y-%m-%d %H:%M:%S %Z"),
    )
}

pub fn success_caption(elapsed: Duration, device: &str, short_sha: &str) -> String {
    format!(
        "Build took {} | Device: <code>{}</code> | Commit: <code>{}</code>",
        format_elapsed(elapsed),
        escape_html(device),
        escape_html(short_sha)
    )
}

pub fn failure_message(device: &str, error: &str, diagnosis: Option<&Diagnosis>) -> String {
    let mut text = format!(
        "<b>Build failed</b> for <code>{}</code>\n{}",
        escape_html(device),
        escape_html(error)
    );
    if let Some(diagnosis) = diagnosis {
        text.push_str(&format!(
            "\n\nLikely cause: <b>{}</b>\n{}",
            escape_html(diagnosis.category),
            escape_html(diagnosis.suggestion)
        ));
    }
    text
}

pub fn unsupported_message(device: &str) -> String {
    format!("Device <code>{}</code> is not supported", escape_html(device))
}

/// Gzip `path` next to itself for upload.
pub fn gzip_file(path: &Path) -> io::Result<PathBuf> {
    let mut dest = path.as_os_str().to_os_string();
    dest.push(".gz");
    let dest = PathBuf::from(dest);

    let data = fs::read(path)?;
    let mut encoder = GzEncoder::new(fs::File::create(&dest)?, Compression::default());
    encoder.write_all(&data)?;
    encoder.finish()?;
    Ok(dest)
}
