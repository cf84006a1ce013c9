//! Publishing: channel creation, channel edits and messages.

use super::*;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PublishError {
    #[error("Sign in to post")]
    NotSignedIn,
    #[error("A channel needs a name, and the picture must be an http(s) URL")]
    InvalidChannel,
    #[error("Message is empty")]
    EmptyMessage,
    #[error("Channel not found")]
    UnknownChannel,
    #[error("Only the channel owner can edit it")]
    NotOwner,
    #[error("Not connected to any relay")]
    NotConnected,
    #[error("No relay accepted the event")]
    Rejected,
}

/// What the user asked to publish, kept until the signed event is acknowledged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublishIntent {
    CreateChannel {
        fields: ChannelFields,
    },
    UpdateChannel {
        channel_id: String,
        relay_url: String,
        creator: String,
        fields: ChannelFields,
        /// The author's other channels, carried into the replacement record.
        previous: Vec<ChannelMetadata>,
    },
    SendMessage {
        channel_id: String,
        relay_url: String,
        content: String,
        as_note: bool,
    },
}

impl PublishIntent {
    pub fn tag(&self) -> &'static str {
        match self {
            PublishIntent::CreateChannel { .. } => "create_channel",
            PublishIntent::UpdateChannel { .. } => "update_channel",
            PublishIntent::SendMessage { .. } => "send_message",
        }
    }

    pub fn build(&self, author: PublicKey) -> UnsignedEvent {
        match self {
            PublishIntent::CreateChannel { fields } => {
                EventBuilder::new(Kind::ChannelCreation, build_channel_content(fields))
                    .build(author)
            }
            PublishIntent::UpdateChannel {
                channel_id,
                relay_url,
                fields,
                previous,
                ..
            } => {
                let content = build_bundled_metadata_content(channel_id, fields, previous);
                let mut tags = vec![Tag::parse(["e", channel_id.as_str(), relay_url.as_str()])];
                for id in bundled_channel_ids(channel_id, previous) {
                    let url = format!("{CHANNEL_URL_PREFIX}{id}");
                    tags.push(Tag::parse(["r", url.as_str()]));
                }
                let tags: Vec<Tag> = tags.into_iter().filter_map(Result::ok).collect();
                EventBuilder::new(Kind::ChannelMetadata, content)
                    .tags(tags)
                    .build(author)
            }
            PublishIntent::SendMessage {
                channel_id,
                relay_url,
                content,
                as_note,
            } => {
                let (kind, tag) = if *as_note {
                    let url = format!("{CHANNEL_URL_PREFIX}{channel_id}");
                    (Kind::TextNote, Tag::parse(["r", url.as_str()]))
                } else {
                    (
                        Kind::ChannelMessage,
                        Tag::parse(["e", channel_id.as_str(), relay_url.as_str(), "root"]),
                    )
                };
                EventBuilder::new(kind, content.as_str())
                    .tags(tag.ok())
                    .build(author)
            }
        }
    }
}

pub(super) struct PendingPublish {
    intent: PublishIntent,
    event_id: Option<EventId>,
    accepted: bool,
}

impl AppCore {
    pub(super) fn start_publish(&mut self, intent: Result<PublishIntent, PublishError>) {
        let intent = match intent {
            Ok(intent) => intent,
            Err(e) => {
                self.toast(e.to_string());
                return;
            }
        };
        if self.store.pubkey().is_none() {
            self.toast(PublishError::NotSignedIn.to_string());
            return;
        }

        self.next_publish_id = self.next_publish_id.wrapping_add(1);
        let publish_id = self.next_publish_id;
        tracing::info!(publish_id, intent = intent.tag(), "publish_start");
        self.publishes.insert(
            publish_id,
            PendingPublish {
                intent,
                event_id: None,
                accepted: false,
            },
        );
        self.state.busy.publishing = true;

        let mux = self.mux.clone();
        let tx = self.core_sender.clone();
        let wait = self.config.publish_health_wait();
        self.runtime.spawn(async move {
            let connected = mux.wait_until_healthy(1, wait).await;
            let _ = tx.send(CoreMsg::Internal(Box::new(InternalEvent::PublishReady {
                publish_id,
                connected,
            })));
        });
    }

    pub(super) fn handle_publish_ready(&mut self, publish_id: u64, connected: bool) {
        let Some(intent) = self.publishes.get(&publish_id).map(|p| p.intent.clone()) else {
            return;
        };
        if !connected {
            self.finish_publish(publish_id);
            self.toast(PublishError::NotConnected.to_string());
            return;
        }
        let Some(author) = self
            .store
            .pubkey()
            .and_then(|hex| PublicKey::from_hex(hex).ok())
        else {
            self.finish_publish(publish_id);
            self.toast(PublishError::NotSignedIn.to_string());
            return;
        };

        let unsigned = intent.build(author);
        let signer = self.signer.clone();
        let tx = self.core_sender.clone();
        self.runtime.spawn(async move {
            let msg = match signer.sign_event(unsigned).await {
                Ok(event) => InternalEvent::EventSigned {
                    publish_id,
                    intent,
                    event,
                },
                Err(error) => InternalEvent::SignFailed { publish_id, error },
            };
            let _ = tx.send(CoreMsg::Internal(Box::new(msg)));
        });
    }

    pub(super) fn handle_event_signed(
        &mut self,
        publish_id: u64,
        intent: PublishIntent,
        event: Event,
    ) {
        if !self.publishes.contains_key(&publish_id) {
            return;
        }
        if let PublishIntent::UpdateChannel { creator, .. } = &intent {
            if event.pubkey.to_hex() != *creator {
                self.finish_publish(publish_id);
                self.toast(PublishError::NotOwner.to_string());
                return;
            }
        }
        if let Some(pending) = self.publishes.get_mut(&publish_id) {
            pending.event_id = Some(event.id);
        }

        let tx = self.core_sender.clone();
        let sink = PublishSink::new(move |message| {
            let _ = tx.send(CoreMsg::Internal(Box::new(InternalEvent::PublishProgress {
                publish_id,
                message,
            })));
        });
        tracing::info!(publish_id, event_id = %event.id.to_hex(), "publish");
        self.mux.publish(
            event,
            PublishOptions {
                timeout: self.config.publish_timeout(),
            },
            sink,
        );
    }

    pub(super) fn handle_sign_failed(&mut self, publish_id: u64, error: SignerError) {
        if self.publishes.contains_key(&publish_id) {
            tracing::warn!(publish_id, %error, "sign failed");
            self.finish_publish(publish_id);
            self.toast(user_visible_signer_error(&error));
        }
    }

    /// The first acceptance is the success; later acks are ignored.
    pub(super) fn handle_publish_progress(&mut self, publish_id: u64, message: PublishMessage) {
        let Some(pending) = self.publishes.get_mut(&publish_id) else {
            return;
        };
        match message {
            PublishMessage::Result {
                relay_url,
                accepted,
                message,
            } => {
                if !accepted {
                    tracing::debug!(publish_id, relay = %relay_url, %message, "relay rejected event");
                    return;
                }
                if pending.accepted {
                    return;
                }
                pending.accepted = true;
                tracing::info!(publish_id, relay = %relay_url, "publish accepted");
                let intent = pending.intent.clone();
                let event_id = pending.event_id;
                self.on_publish_accepted(&intent, event_id);
            }
            PublishMessage::Complete => {
                let accepted = pending.accepted;
                self.finish_publish(publish_id);
                if !accepted {
                    self.toast(PublishError::Rejected.to_string());
                }
            }
        }
    }

    fn on_publish_accepted(&mut self, intent: &PublishIntent, event_id: Option<EventId>) {
        if let (PublishIntent::CreateChannel { .. }, Some(id)) = (intent, event_id) {
            self.open_channel(&id.to_hex());
        }
    }

    fn finish_publish(&mut self, publish_id: u64) {
        self.publishes.remove(&publish_id);
        if self.publishes.is_empty() {
            self.state.busy.publishing = false;
        }
    }

    // ── Intent construction ─────────────────────────────────────────

    pub(super) fn create_channel_intent(
        &self,
        name: String,
        about: Option<String>,
        picture: Option<String>,
    ) -> Result<PublishIntent, PublishError> {
        let fields = ChannelFields {
            name: Some(name),
            about,
            picture,
            youtube: None,
        }
        .normalized();
        if !fields.is_publishable() {
            return Err(PublishError::InvalidChannel);
        }
        Ok(PublishIntent::CreateChannel { fields })
    }

    pub(super) fn update_channel_intent(
        &self,
        channel_id: &str,
        name: String,
        about: Option<String>,
        picture: Option<String>,
    ) -> Result<PublishIntent, PublishError> {
        let me = self.store.pubkey().ok_or(PublishError::NotSignedIn)?;
        let channel = self.known_channel(channel_id).ok_or(PublishError::UnknownChannel)?;
        if channel.metadata.creator != me {
            return Err(PublishError::NotOwner);
        }
        let fields = ChannelFields {
            name: Some(name),
            about,
            picture,
            youtube: channel.metadata.fields.youtube.clone(),
        }
        .normalized();
        if !fields.is_publishable() {
            return Err(PublishError::InvalidChannel);
        }
        let previous: Vec<ChannelMetadata> = self
            .own_metadata
            .as_ref()
            .map(parse_channel_metadata)
            .unwrap_or_default()
            .into_iter()
            .filter(|m| m.creator == me)
            .collect();
        Ok(PublishIntent::UpdateChannel {
            channel_id: channel_id.to_string(),
            relay_url: channel.relay_url.clone(),
            creator: channel.metadata.creator.clone(),
            fields,
            previous,
        })
    }

    pub(super) fn send_message_intent(
        &self,
        channel_id: &str,
        content: String,
        as_note: bool,
    ) -> Result<PublishIntent, PublishError> {
        if content.trim().is_empty() {
            return Err(PublishError::EmptyMessage);
        }
        if !is_hex_id(channel_id) {
            return Err(PublishError::UnknownChannel);
        }
        let relay_url = self
            .known_channel(channel_id)
            .map(|c| c.relay_url.clone())
            .unwrap_or_default();
        Ok(PublishIntent::SendMessage {
            channel_id: channel_id.to_string(),
            relay_url,
            content,
            as_note,
        })
    }

    /// The channel as the open view or the sidebar knows it.
    fn known_channel(&self, channel_id: &str) -> Option<&Channel> {
        self.channel
            .as_ref()
            .filter(|c| c.channel_id == channel_id)
            .and_then(|c| c.channel.as_ref())
            .or_else(|| self.sidebar.get(channel_id))
    }
}
