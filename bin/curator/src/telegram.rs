//! Notification delivery through a Telegram bot.

use std::time::Duration;

use async_trait::async_trait;
use curator::collaborators::Notifier;
use url::Url;

use crate::config::TelegramConfig;

const DEFAULT_API_URL: &str = "https://api.telegram.org";

#[derive(derive_more::Debug)]
pub(crate) struct TelegramNotifier {
    client: reqwest::Client,
    api_url: Url,
    #[debug(skip)]
    bot_token: Option<String>,
    chat_ids: Vec<String>,
}

impl TelegramNotifier {
    pub(crate) fn new(config: &TelegramConfig) -> eyre::Result<Self> {
        let api_url = match &config.api_url {
            Some(url) => url.clone(),
            None => Url::parse(DEFAULT_API_URL)?,
        };
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            client,
            api_url,
            bot_token: config
                .bot_token
                .clone()
                .filter(|token| !token.trim().is_empty()),
            chat_ids: parse_chat_ids(config.admin_ids.as_deref()),
        })
    }

    fn send_message_url(&self, token: &str) -> Result<Url, url::ParseError> {
        self.api_url.join(&format!("./bot{token}/sendMessage"))
    }
}

fn parse_chat_ids(ids: Option<&str>) -> Vec<String> {
    ids.unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map(str::to_string)
        .collect()
}

#[async_trait]
impl Notifier for TelegramNotifier {
    async fn notify(&self, message: &str) {
        let Some(token) = &self.bot_token else {
            tracing::warn!("telegram bot token not configured, notification dropped");
            return;
        };
        if self.chat_ids.is_empty() {
            tracing::warn!("telegram admin ids not configured, notification dropped");
            return;
        }
        let url = match self.send_message_url(token) {
            Ok(url) => url,
            Err(err) => {
                tracing::warn!(%err, "invalid telegram api url");
                return;
            }
        };

        for chat_id in &self.chat_ids {
            let sent = self
                .client
                .get(url.clone())
                .query(&[("chat_id", chat_id.as_str()), ("text", message)])
                .send()
                .await
                .and_then(reqwest::Response::error_for_status);
            // The request url embeds the token.
            if let Err(err) = sent {
                tracing::warn!(%chat_id, err = %err.without_url(), "failed sending telegram message");
            }
        }
    }
}
