//! MQTT binding of the broker contract, over rumqttc
//!
//! Maps the durable-subscription model onto MQTT primitives: the configured
//! client identifier with a persistent session (`clean_session = false`)
//! owns the subscription, client-acknowledge mode is rumqttc's manual-ack
//! mode, and `recover()` requeues locally buffered unacknowledged messages
//! for redelivery on the next receive.

use super::{
    Broker, BrokerError, BrokerMessage, BrokerSession, ConnectOptions, SentMessage,
    TopicPublisher, TopicSubscriber,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rumqttc::{
    AsyncClient, ConnectReturnCode, Event, EventLoop, MqttOptions, Packet, Publish, QoS,
    Transport,
};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use url::Url;
use uuid::Uuid;

/// MQTT implementation of [`Broker`].
#[derive(Debug, Default)]
pub struct MqttBroker;

impl MqttBroker {
    pub fn new() -> Self {
        Self
    }
}

/// Delivered-but-unacknowledged bookkeeping shared between the session and
/// its subscriber. `recover()` moves `pending` back into `requeue`.
#[derive(Default)]
struct RecoverState {
    pending: Vec<(String, Publish)>,
    requeue: VecDeque<(String, Publish)>,
}

fn parse_provider_url(provider_url: &str) -> Result<(String, u16, bool), BrokerError> {
    let url =
        Url::parse(provider_url).map_err(|_| BrokerError::InvalidUrl(provider_url.to_string()))?;

    let tls = match url.scheme() {
        "mqtt" | "tcp" => false,
        "mqtts" | "ssl" => true,
        _ => return Err(BrokerError::InvalidUrl(provider_url.to_string())),
    };

    let host = url
        .host_str()
        .ok_or_else(|| BrokerError::InvalidUrl(provider_url.to_string()))?
        .to_string();
    let port = url.port().unwrap_or(if tls { 8883 } else { 1883 });

    Ok((host, port, tls))
}

fn classify_connack(code: ConnectReturnCode, client_id: &str) -> Result<(), BrokerError> {
    match code {
        ConnectReturnCode::Success => Ok(()),
        ConnectReturnCode::BadClientId => {
            Err(BrokerError::DuplicateClientId(client_id.to_string()))
        }
        other => Err(BrokerError::Transport(format!(
            "connection refused: {other:?}"
        ))),
    }
}

#[async_trait]
impl Broker for MqttBroker {
    async fn connect(&self, options: ConnectOptions) -> Result<Box<dyn BrokerSession>, BrokerError> {
        let (host, port, tls) = parse_provider_url(&options.provider_url)?;

        // A caller-supplied identifier pins a persistent session (the
        // durable subscription); without one each connection gets a unique
        // throwaway identifier and a clean session.
        let (client_id, clean_session) = match &options.client_id {
            Some(id) => (id.clone(), false),
            None => {
                let timestamp = Utc::now().timestamp_millis();
                (format!("durasub-{timestamp}"), true)
            }
        };

        let mut mqtt_options = MqttOptions::new(&client_id, host, port);
        mqtt_options.set_clean_session(clean_session);
        mqtt_options.set_keep_alive(Duration::from_secs(60));
        mqtt_options.set_manual_acks(true);
        if tls {
            mqtt_options.set_transport(Transport::tls_with_default_config());
        }
        if let Some(username) = &options.username {
            mqtt_options.set_credentials(username, options.password.clone().unwrap_or_default());
        }

        let (client, mut event_loop) = AsyncClient::new(mqtt_options, 10);

        // Drive the event loop by hand until CONNACK so connect-time faults
        // are classified before the session is handed out.
        wait_for_connack(&mut event_loop, &client_id).await?;
        debug!("mqtt connection established as '{client_id}'");

        let (incoming_tx, incoming_rx) = mpsc::unbounded_channel();
        let alive = Arc::new(AtomicBool::new(true));
        let pump = spawn_pump(event_loop, incoming_tx, alive.clone());

        Ok(Box::new(MqttSession {
            client,
            incoming: Some(incoming_rx),
            recover: Arc::new(Mutex::new(RecoverState::default())),
            alive,
            pump,
        }))
    }
}

async fn wait_for_connack(event_loop: &mut EventLoop, client_id: &str) -> Result<(), BrokerError> {
    loop {
        match event_loop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(ack))) => return classify_connack(ack.code, client_id),
            Ok(_) => continue,
            Err(e) => return Err(BrokerError::Transport(e.to_string())),
        }
    }
}

/// Forward incoming publishes into the in-process channel that
/// `receive_no_wait` drains. Exits on the first transport error; the dead
/// channel surfaces as a receive-time fault in the loop above.
fn spawn_pump(
    mut event_loop: EventLoop,
    incoming_tx: mpsc::UnboundedSender<Publish>,
    alive: Arc<AtomicBool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match event_loop.poll().await {
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    if incoming_tx.send(publish).is_err() {
                        break;
                    }
                }
                Ok(_) => {}
                Err(e) => {
                    warn!("mqtt event loop terminated: {e}");
                    break;
                }
            }
        }
        alive.store(false, Ordering::SeqCst);
    })
}

struct MqttSession {
    client: AsyncClient,
    incoming: Option<mpsc::UnboundedReceiver<Publish>>,
    recover: Arc<Mutex<RecoverState>>,
    alive: Arc<AtomicBool>,
    pump: JoinHandle<()>,
}

#[async_trait]
impl BrokerSession for MqttSession {
    async fn create_durable_subscriber(
        &mut self,
        topic: &str,
        _subscription: &str,
    ) -> Result<Box<dyn TopicSubscriber>, BrokerError> {
        // The subscription name itself has no MQTT equivalent; durability
        // comes from the persistent session bound to the client identifier.
        let incoming = self.incoming.take().ok_or(BrokerError::Closed)?;
        self.client
            .subscribe(topic, QoS::AtLeastOnce)
            .await
            .map_err(|e| BrokerError::Transport(e.to_string()))?;

        Ok(Box::new(MqttSubscriber {
            client: self.client.clone(),
            incoming,
            recover: self.recover.clone(),
            alive: self.alive.clone(),
        }))
    }

    async fn create_publisher(
        &mut self,
        topic: &str,
    ) -> Result<Box<dyn TopicPublisher>, BrokerError> {
        Ok(Box::new(MqttPublisher {
            client: self.client.clone(),
            topic: topic.to_string(),
            alive: self.alive.clone(),
        }))
    }

    async fn recover(&mut self) -> Result<(), BrokerError> {
        let mut state = self
            .recover
            .lock()
            .map_err(|_| BrokerError::Transport("recover state poisoned".to_string()))?;
        // Redeliver in original order, ahead of anything newly arrived.
        let pending = std::mem::take(&mut state.pending);
        for entry in pending.into_iter().rev() {
            state.requeue.push_front(entry);
        }
        Ok(())
    }

    async fn close(&mut self) {
        let _ = self.client.disconnect().await;
        self.pump.abort();
        self.alive.store(false, Ordering::SeqCst);
    }
}

struct MqttSubscriber {
    client: AsyncClient,
    incoming: mpsc::UnboundedReceiver<Publish>,
    recover: Arc<Mutex<RecoverState>>,
    alive: Arc<AtomicBool>,
}

#[async_trait]
impl TopicSubscriber for MqttSubscriber {
    async fn receive_no_wait(&mut self) -> Result<Option<Box<dyn BrokerMessage>>, BrokerError> {
        // A dead event loop invalidates the local requeue too: redelivering
        // into it would cycle receive/ack-fail/recover forever instead of
        // surfacing the fault to the caller.
        if !self.alive.load(Ordering::SeqCst) {
            return Err(BrokerError::Transport("connection lost".to_string()));
        }

        // Recovered messages are redelivered before new arrivals, keeping
        // their original identifiers.
        let recovered = {
            let mut state = self
                .recover
                .lock()
                .map_err(|_| BrokerError::Transport("recover state poisoned".to_string()))?;
            if let Some((id, publish)) = state.requeue.pop_front() {
                state.pending.push((id.clone(), publish.clone()));
                Some((id, publish))
            } else {
                None
            }
        };
        if let Some((id, publish)) = recovered {
            return Ok(Some(self.wrap(id, publish)));
        }

        match self.incoming.try_recv() {
            Ok(publish) => {
                let id = format!("ID:{}", Uuid::new_v4());
                if let Ok(mut state) = self.recover.lock() {
                    state.pending.push((id.clone(), publish.clone()));
                }
                Ok(Some(self.wrap(id, publish)))
            }
            // The pump may have died between the check above and the recv.
            Err(mpsc::error::TryRecvError::Empty) => {
                if self.alive.load(Ordering::SeqCst) {
                    Ok(None)
                } else {
                    Err(BrokerError::Transport("connection lost".to_string()))
                }
            }
            Err(mpsc::error::TryRecvError::Disconnected) => {
                Err(BrokerError::Transport("connection lost".to_string()))
            }
        }
    }

    async fn close(&mut self) {
        self.incoming.close();
    }
}

impl MqttSubscriber {
    fn wrap(&self, id: String, publish: Publish) -> Box<dyn BrokerMessage> {
        Box::new(MqttMessage {
            id,
            timestamp: Utc::now(),
            publish,
            client: self.client.clone(),
            recover: self.recover.clone(),
        })
    }
}

struct MqttPublisher {
    client: AsyncClient,
    topic: String,
    alive: Arc<AtomicBool>,
}

#[async_trait]
impl TopicPublisher for MqttPublisher {
    async fn publish(&mut self, text: &str) -> Result<SentMessage, BrokerError> {
        if !self.alive.load(Ordering::SeqCst) {
            return Err(BrokerError::Transport("connection lost".to_string()));
        }

        self.client
            .publish(&self.topic, QoS::AtLeastOnce, false, text.as_bytes())
            .await
            .map_err(|e| BrokerError::Transport(e.to_string()))?;

        Ok(SentMessage {
            id: format!("ID:{}", Uuid::new_v4()),
            text: text.to_string(),
            timestamp: Utc::now(),
        })
    }

    async fn close(&mut self) {
        // The underlying connection is owned by the session; nothing to
        // release here.
    }
}

struct MqttMessage {
    id: String,
    timestamp: DateTime<Utc>,
    publish: Publish,
    client: AsyncClient,
    recover: Arc<Mutex<RecoverState>>,
}

#[async_trait]
impl BrokerMessage for MqttMessage {
    fn id(&self) -> &str {
        &self.id
    }

    fn text(&self) -> Option<&str> {
        std::str::from_utf8(&self.publish.payload).ok()
    }

    fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    async fn acknowledge(&mut self) -> Result<(), BrokerError> {
        self.client
            .ack(&self.publish)
            .await
            .map_err(|e| BrokerError::Transport(e.to_string()))?;

        if let Ok(mut state) = self.recover.lock() {
            state.pending.retain(|(id, _)| id != &self.id);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_url_defaults_ports_by_scheme() {
        assert_eq!(
            parse_provider_url("mqtt://broker.local").unwrap(),
            ("broker.local".to_string(), 1883, false)
        );
        assert_eq!(
            parse_provider_url("mqtts://broker.local").unwrap(),
            ("broker.local".to_string(), 8883, true)
        );
        assert_eq!(
            parse_provider_url("tcp://broker.local:7222").unwrap(),
            ("broker.local".to_string(), 7222, false)
        );
    }

    #[test]
    fn provider_url_rejects_unknown_schemes_and_missing_hosts() {
        assert!(matches!(
            parse_provider_url("http://broker.local"),
            Err(BrokerError::InvalidUrl(_))
        ));
        assert!(matches!(
            parse_provider_url("not a url"),
            Err(BrokerError::InvalidUrl(_))
        ));
    }

    #[tokio::test]
    async fn dead_event_loop_fails_receive_instead_of_redelivering() {
        let (client, _event_loop) = AsyncClient::new(MqttOptions::new("t1", "localhost", 1883), 10);
        let (_incoming_tx, incoming) = mpsc::unbounded_channel();

        // One unacknowledged message has been recovered into the requeue.
        let recover = Arc::new(Mutex::new(RecoverState::default()));
        recover
            .lock()
            .unwrap()
            .requeue
            .push_back(("ID:1".to_string(), Publish::new("t", QoS::AtLeastOnce, "m")));

        let mut subscriber = MqttSubscriber {
            client,
            incoming,
            recover: recover.clone(),
            alive: Arc::new(AtomicBool::new(false)),
        };

        // The transport fault wins over local redelivery, so the caller
        // reconnects instead of cycling on the same message.
        let result = subscriber.receive_no_wait().await;
        assert!(matches!(result, Err(BrokerError::Transport(_))));
        assert_eq!(recover.lock().unwrap().requeue.len(), 1);
    }

    #[test]
    fn bad_client_id_classifies_as_duplicate() {
        let err = classify_connack(ConnectReturnCode::BadClientId, "c1").unwrap_err();
        assert!(matches!(err, BrokerError::DuplicateClientId(id) if id == "c1"));
    }

    #[test]
    fn other_refusals_classify_as_transport_errors() {
        assert!(classify_connack(ConnectReturnCode::Success, "c1").is_ok());
        let err = classify_connack(ConnectReturnCode::ServiceUnavailable, "c1").unwrap_err();
        assert!(matches!(err, BrokerError::Transport(_)));
    }
}
