//! Slack Web API notifier and Socket Mode listener.

use std::sync::Arc;
use std::time::Duration;

use slack_morphism::errors::SlackClientError;
use slack_morphism::prelude::{
    SlackApiChatPostMessageRequest, SlackApiChatPostMessageResponse, SlackApiChatUpdateRequest,
    SlackApiToken, SlackApiTokenType, SlackApiTokenValue, SlackChannelId, SlackClient,
    SlackClientEventsListenerEnvironment, SlackClientHyperHttpsConnector,
    SlackClientSocketModeConfig, SlackClientSocketModeListener, SlackMessageContent,
    SlackSocketModeListenerCallbacks, SlackTs,
};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::SlackConfig;
use crate::models::DeliveryHandle;
use crate::notifier::{DeliveryTarget, Notifier, NotifyFuture, OutboundMessage};
use crate::slack::{blocks, commands, events, BotState};
use crate::{AppError, Result};

const MAX_ATTEMPTS: u32 = 3;
const INITIAL_RETRY_DELAY: Duration = Duration::from_secs(1);
const MAX_RETRY_DELAY: Duration = Duration::from_secs(30);

type HyperClient = SlackClient<SlackClientHyperHttpsConnector>;

/// Slack-backed [`Notifier`] plus the Socket Mode entry point.
pub struct SlackService {
    client: Arc<HyperClient>,
    bot_token: SlackApiToken,
    app_token: SlackApiToken,
    channel: SlackChannelId,
}

impl SlackService {
    /// Build the HTTPS client and tokens.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Slack` if the HTTPS connector cannot be created.
    pub fn new(config: &SlackConfig) -> Result<Self> {
        let connector = SlackClientHyperHttpsConnector::new()
            .map_err(|err| AppError::Slack(format!("failed to init slack connector: {err}")))?;
        let bot_token = SlackApiToken {
            token_value: SlackApiTokenValue(config.bot_token.clone()),
            cookie: None,
            team_id: None,
            scope: None,
            token_type: Some(SlackApiTokenType::Bot),
        };
        let app_token = SlackApiToken {
            token_value: SlackApiTokenValue(config.app_token.clone()),
            cookie: None,
            team_id: None,
            scope: None,
            token_type: Some(SlackApiTokenType::App),
        };

        Ok(Self {
            client: Arc::new(SlackClient::new(connector)),
            bot_token,
            app_token,
            channel: SlackChannelId(config.channel_id.clone()),
        })
    }

    /// Start the Socket Mode listener. Slash commands, button presses and
    /// thread replies are dispatched with `state` as user state.
    #[must_use]
    pub fn start_socket_mode(
        &self,
        state: Arc<BotState>,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        let listener_env = Arc::new(
            SlackClientEventsListenerEnvironment::new(Arc::clone(&self.client))
                .with_error_handler(|err, _client, _state| {
                    error!(?err, "socket mode error");
                    axum::http::StatusCode::INTERNAL_SERVER_ERROR
                })
                .with_user_state(state),
        );
        let callbacks = SlackSocketModeListenerCallbacks::new()
            .with_hello_events(|event, _client, _state| async move {
                debug!(?event, "socket hello");
            })
            .with_command_events(commands::handle_command)
            .with_interaction_events(events::handle_interaction)
            .with_push_events(events::handle_push_event);
        let config = SlackClientSocketModeConfig {
            max_connections_count: SlackClientSocketModeConfig::DEFAULT_CONNECTIONS_COUNT,
            debug_connections: SlackClientSocketModeConfig::DEFAULT_DEBUG_CONNECTIONS,
            initial_backoff_in_seconds:
                SlackClientSocketModeConfig::DEFAULT_INITIAL_BACKOFF_IN_SECONDS,
            reconnect_timeout_in_seconds:
                SlackClientSocketModeConfig::DEFAULT_RECONNECT_TIMEOUT_IN_SECONDS,
            ping_interval_in_seconds: SlackClientSocketModeConfig::DEFAULT_PING_INTERVAL_IN_SECONDS,
            ping_failure_threshold_times:
                SlackClientSocketModeConfig::DEFAULT_PING_FAILURE_THRESHOLD_TIMES,
        };

        let listener = SlackClientSocketModeListener::new(&config, listener_env, callbacks);
        let app_token = self.app_token.clone();
        tokio::spawn(async move {
            if let Err(error) = listener.listen_for(&app_token).await {
                error!(?error, "socket mode listen failed");
                return;
            }
            info!("socket mode listener connected");

            tokio::select! {
                _ = listener.serve() => info!("socket mode listener exited"),
                () = cancel.cancelled() => {
                    listener.shutdown().await;
                    info!("socket mode listener shut down");
                }
            }
        })
    }

    async fn post_with_retry(
        &self,
        request: &SlackApiChatPostMessageRequest,
    ) -> Result<SlackApiChatPostMessageResponse> {
        let session = self.client.open_session(&self.bot_token);
        let mut backoff = INITIAL_RETRY_DELAY;
        let mut attempt = 1;
        loop {
            match session.chat_post_message(request).await {
                Ok(response) => return Ok(response),
                Err(err) if attempt < MAX_ATTEMPTS => {
                    let delay = match &err {
                        SlackClientError::RateLimitError(rate) => {
                            rate.retry_after.unwrap_or(backoff)
                        }
                        _ => backoff,
                    };
                    warn!(?err, ?delay, attempt, "slack post failed; retrying");
                    sleep(delay).await;
                    backoff = (backoff * 2).min(MAX_RETRY_DELAY);
                    attempt += 1;
                }
                Err(err) => {
                    return Err(AppError::Slack(format!("failed to post message: {err}")));
                }
            }
        }
    }
}

fn content_for(message: &OutboundMessage) -> SlackMessageContent {
    SlackMessageContent::new()
        .with_text(message.text.clone())
        .with_blocks(blocks::render(message))
}

impl Notifier for SlackService {
    fn deliver(
        &self,
        target: DeliveryTarget,
        message: OutboundMessage,
    ) -> NotifyFuture<'_, DeliveryHandle> {
        Box::pin(async move {
            let (channel, thread_ts) = match target {
                DeliveryTarget::Channel => (self.channel.clone(), None),
                DeliveryTarget::Thread(thread) => (
                    SlackChannelId(thread.channel_id),
                    Some(SlackTs(thread.thread_ts)),
                ),
            };
            let mut request = SlackApiChatPostMessageRequest::new(channel, content_for(&message));
            request.thread_ts = thread_ts;

            let response = self.post_with_retry(&request).await?;
            debug!(ts = %response.ts, "slack message posted");
            Ok(DeliveryHandle {
                channel_id: response.channel.to_string(),
                message_ts: response.ts.to_string(),
            })
        })
    }

    fn update(&self, handle: DeliveryHandle, message: OutboundMessage) -> NotifyFuture<'_, ()> {
        Box::pin(async move {
            let request = SlackApiChatUpdateRequest::new(
                SlackChannelId(handle.channel_id),
                content_for(&message),
                SlackTs(handle.message_ts),
            );
            self.client
                .open_session(&self.bot_token)
                .chat_update(&request)
                .await
                .map_err(|err| AppError::Slack(format!("failed to update message: {err}")))?;
            Ok(())
        })
    }
}
