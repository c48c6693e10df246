//! Message bus
//!
//! Pub/sub seam between the detection core and the outside world. The
//! [`MessageBus`] trait is what the orchestrator and health reporter
//! consume; [`MqttBus`] is the production implementation with last-will,
//! automatic reconnect and wildcard subscription dispatch.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use rumqttc::{Client, Event, LastWill, MqttOptions, Packet, QoS};
use tracing::{debug, error, info, warn};

use crate::config::MqttConfig;
use crate::error::{VigilError, VigilResult};

/// Callback invoked with (topic, payload) for each matching message
pub type MessageCallback = Box<dyn Fn(&str, &str) + Send + Sync>;

/// Pub/sub contract consumed by the detection core.
///
/// Publishes are fire-and-forget: QoS 0 messages are never awaited, QoS 1
/// is reserved for retained status messages.
pub trait MessageBus: Send + Sync {
    /// Publish a message. `qos` is 0 or 1.
    fn publish(&self, topic: &str, payload: &str, qos: u8, retain: bool);

    /// Subscribe to topic patterns (`+`/`#` wildcards supported) with a
    /// single callback. Callbacks run on the bus dispatch thread and must
    /// return promptly.
    fn subscribe(&self, patterns: &[String], callback: MessageCallback);

    fn is_connected(&self) -> bool;

    /// Topic prefix for published event messages
    fn prefix(&self) -> &str;
}

/// Check whether a topic matches a subscription pattern.
///
/// `+` matches exactly one segment; `#` matches all remaining segments and
/// must be terminal.
pub fn topic_matches(pattern: &str, topic: &str) -> bool {
    let pat: Vec<&str> = pattern.split('/').collect();
    let top: Vec<&str> = topic.split('/').collect();

    let mut pi = 0;
    for segment in &top {
        if pi >= pat.len() {
            return false;
        }
        match pat[pi] {
            "#" => return true,
            "+" => pi += 1,
            p if p == *segment => pi += 1,
            _ => return false,
        }
    }

    pi == pat.len() || (pi == pat.len() - 1 && pat[pi] == "#")
}

struct Subscriptions {
    entries: Vec<(String, Arc<MessageCallback>)>,
}

/// MQTT-backed bus on rumqttc
pub struct MqttBus {
    client: Client,
    prefix: String,
    connected: Arc<AtomicBool>,
    stopping: Arc<AtomicBool>,
    subs: Arc<Mutex<Subscriptions>>,
    dispatch: Mutex<Option<JoinHandle<()>>>,
}

impl MqttBus {
    /// Create the client and start the dispatch thread. The broker may be
    /// unreachable at this point; the event loop reconnects on its own and
    /// `is_connected` reflects the live state.
    pub fn connect(config: &MqttConfig) -> VigilResult<Self> {
        let client_id = format!("vigil-{}", std::process::id());
        let mut options = MqttOptions::new(client_id, config.broker.clone(), config.port);
        options.set_keep_alive(Duration::from_secs(60));
        options.set_clean_session(true);

        if !config.username.is_empty() {
            options.set_credentials(config.username.clone(), config.password.clone());
        }

        // Broker delivers "offline" if the process dies without disconnecting.
        let will_topic = format!("{}/status", config.topic_prefix);
        options.set_last_will(LastWill::new(
            will_topic,
            "offline",
            QoS::AtLeastOnce,
            true,
        ));

        let (client, mut connection) = Client::new(options, 64);

        let connected = Arc::new(AtomicBool::new(false));
        let stopping = Arc::new(AtomicBool::new(false));
        let subs = Arc::new(Mutex::new(Subscriptions { entries: Vec::new() }));

        let dispatch = {
            let connected = Arc::clone(&connected);
            let stopping = Arc::clone(&stopping);
            let subs = Arc::clone(&subs);
            let resub_client = client.clone();
            let broker = format!("{}:{}", config.broker, config.port);

            std::thread::Builder::new()
                .name("mqtt-dispatch".to_string())
                .spawn(move || {
                    for event in connection.iter() {
                        if stopping.load(Ordering::SeqCst) {
                            break;
                        }
                        match event {
                            Ok(Event::Incoming(Packet::ConnAck(_))) => {
                                info!("MQTT connected to {}", broker);
                                connected.store(true, Ordering::SeqCst);
                                resubscribe(&resub_client, &subs);
                            }
                            Ok(Event::Incoming(Packet::Publish(publish))) => {
                                let topic = publish.topic.clone();
                                let payload = String::from_utf8_lossy(&publish.payload);
                                dispatch_message(&subs, &topic, &payload);
                            }
                            Ok(Event::Incoming(Packet::Disconnect)) => {
                                warn!("MQTT disconnected by broker");
                                connected.store(false, Ordering::SeqCst);
                            }
                            Ok(_) => {}
                            Err(e) => {
                                connected.store(false, Ordering::SeqCst);
                                if stopping.load(Ordering::SeqCst) {
                                    break;
                                }
                                warn!("MQTT connection error: {} (retrying)", e);
                                std::thread::sleep(Duration::from_secs(1));
                            }
                        }
                    }
                    connected.store(false, Ordering::SeqCst);
                    debug!("MQTT dispatch thread exited");
                })
                .map_err(|e| VigilError::Bus(e.to_string()))?
        };

        Ok(Self {
            client,
            prefix: config.topic_prefix.clone(),
            connected,
            stopping,
            subs,
            dispatch: Mutex::new(Some(dispatch)),
        })
    }

    /// Block until the broker has acknowledged the connection, or the
    /// timeout elapses. Returns the final connection state.
    pub fn wait_connected(&self, timeout: Duration) -> bool {
        let deadline = std::time::Instant::now() + timeout;
        while !self.is_connected() && std::time::Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(50));
        }
        self.is_connected()
    }

    /// Publish the retained "offline" status and stop the dispatch thread
    pub fn shutdown(&self) {
        self.publish(&format!("{}/status", self.prefix), "offline", 1, true);
        self.stopping.store(true, Ordering::SeqCst);
        if let Err(e) = self.client.disconnect() {
            debug!("MQTT disconnect error: {}", e);
        }
        let handle = self
            .dispatch
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(handle) = handle {
            let _ = handle.join();
        }
    }
}

fn qos_from(level: u8) -> QoS {
    if level == 0 {
        QoS::AtMostOnce
    } else {
        QoS::AtLeastOnce
    }
}

fn resubscribe(client: &Client, subs: &Mutex<Subscriptions>) {
    let patterns: Vec<String> = {
        let subs = subs.lock().unwrap_or_else(|e| e.into_inner());
        subs.entries.iter().map(|(p, _)| p.clone()).collect()
    };
    for pattern in patterns {
        if let Err(e) = client.try_subscribe(pattern.clone(), QoS::AtLeastOnce) {
            warn!("MQTT re-subscribe to {} failed: {}", pattern, e);
        } else {
            info!("MQTT subscribed to {}", pattern);
        }
    }
}

fn dispatch_message(subs: &Mutex<Subscriptions>, topic: &str, payload: &str) {
    let callback = {
        let subs = subs.lock().unwrap_or_else(|e| e.into_inner());
        subs.entries
            .iter()
            .find(|(pattern, _)| topic_matches(pattern, topic))
            .map(|(_, cb)| Arc::clone(cb))
    };
    // First matching pattern wins; callback runs outside the lock. A
    // panicking callback must not take the dispatch thread down.
    if let Some(callback) = callback {
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            callback(topic, payload)
        }));
        if result.is_err() {
            error!("Subscription callback panicked for {}", topic);
        }
    }
}

impl MessageBus for MqttBus {
    fn publish(&self, topic: &str, payload: &str, qos: u8, retain: bool) {
        if !self.is_connected() {
            return;
        }
        if let Err(e) = self
            .client
            .try_publish(topic, qos_from(qos), retain, payload.as_bytes().to_vec())
        {
            debug!("MQTT publish to {} failed: {}", topic, e);
        }
    }

    fn subscribe(&self, patterns: &[String], callback: MessageCallback) {
        let callback = Arc::new(callback);
        {
            let mut subs = self.subs.lock().unwrap_or_else(|e| e.into_inner());
            for pattern in patterns {
                subs.entries.push((pattern.clone(), Arc::clone(&callback)));
            }
        }
        for pattern in patterns {
            match self.client.try_subscribe(pattern.clone(), QoS::AtLeastOnce) {
                Ok(()) => info!("MQTT subscribed to {}", pattern),
                Err(e) => {
                    // Queued for the ConnAck re-subscribe pass instead.
                    error!("MQTT subscribe to {} failed: {}", pattern, e);
                }
            }
        }
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn prefix(&self) -> &str {
        &self.prefix
    }
}
