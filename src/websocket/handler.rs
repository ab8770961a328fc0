use axum::{
    extract::{
        ws::{Message, WebSocket},
        Path, Query, State, WebSocketUpgrade,
    },
    response::Response,
    Json,
};
use futures::{
    sink::SinkExt,
    stream::{Stream, StreamExt},
};
use serde::{Deserialize, Serialize};
use tokio::{sync::mpsc, task::JoinHandle};
use tokio_stream::{wrappers::BroadcastStream, StreamMap};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::{
    error::{AppError, Result},
    message::message_dto::SendMessageRequest,
    state::AppState,
    websocket::{
        hub::{ChatEvent, DeliveryHub},
        types::{ClientMessage, ServerMessage},
    },
};

pub type WsSender = mpsc::UnboundedSender<ServerMessage>;

type Subscriptions = StreamMap<Uuid, BroadcastStream<ChatEvent>>;

#[derive(Debug, Deserialize)]
pub struct WsParams {
    participant: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct PresenceResponse {
    pub online: Vec<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ParticipantPresence {
    pub participant: String,
    pub online: bool,
}

/// WebSocket upgrade handler
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(params): Query<WsParams>,
) -> Result<Response> {
    let participant = params.participant.trim().to_string();
    if participant.is_empty() {
        return Err(AppError::Validation("participant is required".to_string()));
    }

    Ok(ws.on_upgrade(move |socket| handle_socket(socket, participant, state)))
}

/// Participants with an open WebSocket session
#[utoipa::path(
    get,
    path = "/api/presence",
    tag = "presence",
    responses(
        (status = 200, description = "Online participants", body = PresenceResponse)
    )
)]
pub async fn presence(State(state): State<AppState>) -> Json<PresenceResponse> {
    Json(PresenceResponse {
        online: state.presence.online_participants(),
    })
}

/// Whether one participant has an open WebSocket session
#[utoipa::path(
    get,
    path = "/api/presence/{participant}",
    tag = "presence",
    params(
        ("participant" = String, Path, description = "Buyer or seller ID")
    ),
    responses(
        (status = 200, description = "Participant presence", body = ParticipantPresence)
    )
)]
pub async fn participant_presence(
    State(state): State<AppState>,
    Path(participant): Path<String>,
) -> Json<ParticipantPresence> {
    let online = state.presence.is_online(&participant);
    Json(ParticipantPresence { participant, online })
}

/// Handle individual WebSocket connection
async fn handle_socket(socket: WebSocket, participant: String, state: AppState) {
    let (mut sender, receiver) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<ServerMessage>();

    state.presence.connect(&participant);

    // Spawn task to send messages from channel to WebSocket
    let send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if let Ok(json) = serde_json::to_string(&msg) {
                if sender.send(Message::Text(json)).await.is_err() {
                    break;
                }
            }
        }
    });

    // Spawn task to receive messages from WebSocket
    let session = Session {
        participant: participant.clone(),
        state: state.clone(),
        outbound: tx,
    };
    let recv_task = tokio::spawn(async move { session.run(receiver).await });

    finish_session(send_task, recv_task, &state.hub).await;
    state.presence.disconnect(&participant);

    tracing::info!("WebSocket connection closed for participant {}", participant);
}

/// Waits for either half of a session to end, stops the other half, and then
/// drops the channels its subscriptions left idle.
async fn finish_session(
    mut send_task: JoinHandle<()>,
    mut recv_task: JoinHandle<()>,
    hub: &DeliveryHub,
) {
    let send_finished = tokio::select! {
        _ = &mut send_task => true,
        _ = &mut recv_task => false,
    };
    let remaining = if send_finished { recv_task } else { send_task };

    remaining.abort();
    // The aborted task drops its receivers only once it has been awaited.
    let _ = remaining.await;

    let pruned = hub.prune_idle();
    if pruned > 0 {
        tracing::debug!(pruned, "Dropped idle conversation channels");
    }
}

struct Session {
    participant: String,
    state: AppState,
    outbound: WsSender,
}

impl Session {
    async fn run<S>(self, mut receiver: S)
    where
        S: Stream<Item = std::result::Result<Message, axum::Error>> + Unpin,
    {
        let mut subscriptions = Subscriptions::new();
        let mut presence = BroadcastStream::new(self.state.presence.subscribe());

        loop {
            tokio::select! {
                frame = receiver.next() => match frame {
                    Some(Ok(Message::Text(text))) => {
                        if let Err(e) = self.process_client_message(&text, &mut subscriptions).await {
                            tracing::warn!("Error processing message from {}: {:?}", self.participant, e);
                            self.reply(ServerMessage::Error {
                                message: e.to_string(),
                            });
                        }
                    }
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    Some(Ok(_)) => {}
                },
                Some((conversation_id, event)) = subscriptions.next(), if !subscriptions.is_empty() => {
                    match event {
                        Ok(event) => self.reply(event.into()),
                        Err(e) => {
                            tracing::warn!(
                                %conversation_id,
                                "Participant {} missed events: {:?}",
                                self.participant,
                                e
                            );
                        }
                    }
                }
                Some(Ok(change)) = presence.next() => {
                    if change.participant != self.participant {
                        self.reply(change.into());
                    }
                }
            }
        }

        let joined: Vec<Uuid> = subscriptions.keys().copied().collect();
        drop(subscriptions);
        for conversation_id in joined {
            self.state.hub.prune(conversation_id);
        }
    }

    fn reply(&self, message: ServerMessage) {
        let _ = self.outbound.send(message);
    }

    /// Process incoming client messages
    async fn process_client_message(
        &self,
        text: &str,
        subscriptions: &mut Subscriptions,
    ) -> Result<()> {
        let client_msg: ClientMessage = serde_json::from_str(text)
            .map_err(|e| AppError::BadRequest(format!("Invalid message format: {}", e)))?;

        match client_msg {
            ClientMessage::Join { conversation_id } => {
                let conversation = self
                    .state
                    .conversations
                    .find_by_id(conversation_id)
                    .await?
                    .ok_or(AppError::NotFound("Conversation not found".to_string()))?;

                if !conversation.has_participant(&self.participant) {
                    return Err(AppError::Forbidden(
                        "Not a participant of this conversation".to_string(),
                    ));
                }

                if !subscriptions.contains_key(&conversation_id) {
                    let rx = self.state.hub.subscribe(conversation_id);
                    subscriptions.insert(conversation_id, BroadcastStream::new(rx));
                    tracing::debug!(
                        %conversation_id,
                        subscribers = self.state.hub.subscriber_count(conversation_id),
                        channels = self.state.hub.channel_count(),
                        "Participant {} joined",
                        self.participant
                    );
                }
                self.reply(ServerMessage::Joined { conversation_id });
            }
            ClientMessage::Leave { conversation_id } => {
                if subscriptions.remove(&conversation_id).is_some() {
                    self.state.hub.prune(conversation_id);
                }
                self.reply(ServerMessage::Left { conversation_id });
            }
            ClientMessage::SendMessage {
                conversation_id,
                text,
                image,
            } => {
                // Joined sessions, this one included, get the message through the hub.
                self.state
                    .message_service
                    .send_message(SendMessageRequest {
                        conversation_id: Some(conversation_id),
                        sender: Some(self.participant.clone()),
                        text,
                        image,
                    })
                    .await?;
            }
            ClientMessage::MarkSeen { message_id } => {
                self.state.message_service.mark_seen(message_id).await?;
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::Config;
    use std::{sync::Arc, time::Duration};
    use tokio_stream::wrappers::UnboundedReceiverStream;

    struct Harness {
        session: Session,
        outbound: mpsc::UnboundedReceiver<ServerMessage>,
        conversation_id: Uuid,
    }

    async fn harness(participant: &str) -> Harness {
        let state = AppState::in_memory(Arc::new(Config::default()));
        let (conversation, _) = state.conversations.open("buyer-1", "shop-1").await.unwrap();
        let (tx, rx) = mpsc::unbounded_channel();

        Harness {
            session: Session {
                participant: participant.to_string(),
                state,
                outbound: tx,
            },
            outbound: rx,
            conversation_id: conversation.id,
        }
    }

    fn frame(value: serde_json::Value) -> String {
        value.to_string()
    }

    #[tokio::test]
    async fn participant_can_join_and_leave() {
        let mut h = harness("buyer-1").await;
        let mut subscriptions = Subscriptions::new();

        h.session
            .process_client_message(
                &frame(serde_json::json!({ "type": "join", "conversation_id": h.conversation_id })),
                &mut subscriptions,
            )
            .await
            .unwrap();
        assert!(subscriptions.contains_key(&h.conversation_id));
        assert_eq!(h.session.state.hub.subscriber_count(h.conversation_id), 1);
        assert_eq!(
            h.outbound.recv().await.unwrap(),
            ServerMessage::Joined {
                conversation_id: h.conversation_id
            }
        );

        h.session
            .process_client_message(
                &frame(serde_json::json!({ "type": "leave", "conversation_id": h.conversation_id })),
                &mut subscriptions,
            )
            .await
            .unwrap();
        assert!(subscriptions.is_empty());
        assert_eq!(h.session.state.hub.channel_count(), 0);
    }

    #[tokio::test]
    async fn outsider_cannot_join() {
        let h = harness("intruder").await;
        let mut subscriptions = Subscriptions::new();

        let result = h
            .session
            .process_client_message(
                &frame(serde_json::json!({ "type": "join", "conversation_id": h.conversation_id })),
                &mut subscriptions,
            )
            .await;
        assert!(matches!(result, Err(AppError::Forbidden(_))));
        assert!(subscriptions.is_empty());
    }

    #[tokio::test]
    async fn sent_messages_reach_joined_subscribers() {
        let h = harness("shop-1").await;
        let mut subscriptions = Subscriptions::new();
        let mut buyer_rx = h.session.state.hub.subscribe(h.conversation_id);

        h.session
            .process_client_message(
                &frame(serde_json::json!({
                    "type": "send_message",
                    "conversation_id": h.conversation_id,
                    "text": "your order is on its way"
                })),
                &mut subscriptions,
            )
            .await
            .unwrap();

        match buyer_rx.recv().await.unwrap() {
            ChatEvent::MessageCreated { message } => {
                assert_eq!(message.sender, "shop-1");
                assert_eq!(message.text.as_deref(), Some("your order is on its way"));
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[tokio::test]
    async fn malformed_frames_are_bad_requests() {
        let h = harness("buyer-1").await;
        let mut subscriptions = Subscriptions::new();

        let result = h
            .session
            .process_client_message("not json", &mut subscriptions)
            .await;
        assert!(matches!(result, Err(AppError::BadRequest(_))));
    }

    type Frames = mpsc::UnboundedSender<std::result::Result<Message, axum::Error>>;

    /// Runs the harness session on its own task, fed from the returned sender.
    fn spawn_session(session: Session) -> (Frames, JoinHandle<()>) {
        let (frames, rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(session.run(UnboundedReceiverStream::new(rx)));
        (frames, task)
    }

    fn text_frame(value: serde_json::Value) -> std::result::Result<Message, axum::Error> {
        Ok(Message::Text(frame(value)))
    }

    async fn next_reply(outbound: &mut mpsc::UnboundedReceiver<ServerMessage>) -> ServerMessage {
        tokio::time::timeout(Duration::from_secs(1), outbound.recv())
            .await
            .expect("no reply within a second")
            .expect("session dropped its outbound channel")
    }

    #[tokio::test]
    async fn running_session_forwards_events_and_cleans_up_on_close() {
        let Harness {
            session,
            mut outbound,
            conversation_id,
        } = harness("buyer-1").await;
        let state = session.state.clone();
        let (frames, task) = spawn_session(session);

        frames
            .send(text_frame(serde_json::json!({ "type": "join", "conversation_id": conversation_id })))
            .unwrap();
        assert_eq!(
            next_reply(&mut outbound).await,
            ServerMessage::Joined { conversation_id }
        );

        let sent = state
            .message_service
            .send_message(SendMessageRequest {
                conversation_id: Some(conversation_id),
                sender: Some("shop-1".to_string()),
                text: Some("still available".to_string()),
                image: None,
            })
            .await
            .unwrap();
        assert_eq!(
            next_reply(&mut outbound).await,
            ServerMessage::MessageCreated { message: sent }
        );

        // The session's own presence change is not echoed back.
        state.presence.connect("buyer-1");
        state.presence.connect("shop-1");
        assert_eq!(
            next_reply(&mut outbound).await,
            ServerMessage::Presence {
                participant: "shop-1".to_string(),
                online: true,
            }
        );

        frames.send(Ok(Message::Close(None))).unwrap();
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .expect("session did not stop after close")
            .unwrap();

        assert_eq!(state.hub.channel_count(), 0);
        assert!(outbound.recv().await.is_none());
    }

    #[tokio::test]
    async fn finishing_a_session_prunes_channels_when_the_sender_ends_first() {
        let Harness {
            session,
            mut outbound,
            conversation_id,
        } = harness("shop-1").await;
        let hub = session.state.hub.clone();
        let (frames, recv_task) = spawn_session(session);

        frames
            .send(text_frame(serde_json::json!({ "type": "join", "conversation_id": conversation_id })))
            .unwrap();
        next_reply(&mut outbound).await;
        assert_eq!(hub.subscriber_count(conversation_id), 1);

        // The socket sink failing ends the send half while frames are still open.
        let send_task = tokio::spawn(async {});
        finish_session(send_task, recv_task, &hub).await;

        assert_eq!(hub.channel_count(), 0);
        drop(frames);
    }
}
