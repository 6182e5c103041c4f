//! Broker transport seam and its rumqttc implementation.

use std::future::Future;

use rumqttc::{
    AsyncClient, ConnectReturnCode, Event, EventLoop, MqttOptions, Outgoing, Packet, QoS,
};
use tracing::{debug, trace};

use crate::config::MqttConfig;
use crate::error::TransportError;

/// Request channel capacity between the client handle and its event loop.
const CLIENT_CAPACITY: usize = 10;

/// A broker session the publisher can drive.
///
/// None of these calls is bounded in time; the publisher wraps each one in
/// its own timeout.
pub trait Transport: Send {
    /// Open a fresh session, dropping any previous one.
    fn connect(&mut self) -> impl Future<Output = Result<(), TransportError>> + Send;

    /// Publish and wait until the broker acknowledged per the configured QoS.
    fn publish(
        &mut self,
        topic: &str,
        payload: Vec<u8>,
    ) -> impl Future<Output = Result<(), TransportError>> + Send;

    /// Service the idle session (keepalive, incoming packets).
    ///
    /// Resolves only when the session is lost.
    fn drive(&mut self) -> impl Future<Output = TransportError> + Send;

    /// Close the session gracefully.
    fn disconnect(&mut self) -> impl Future<Output = ()> + Send;
}

struct Session {
    client: AsyncClient,
    eventloop: EventLoop,
}

/// MQTT 3.1.1 transport on rumqttc.
pub struct MqttTransport {
    options: MqttOptions,
    qos: QoS,
    retain: bool,
    session: Option<Session>,
}

impl MqttTransport {
    pub fn new(config: &MqttConfig) -> Self {
        Self {
            options: config.mqtt_options(),
            qos: config.qos(),
            retain: config.retain,
            session: None,
        }
    }

    pub fn is_open(&self) -> bool {
        self.session.is_some()
    }
}

impl Transport for MqttTransport {
    async fn connect(&mut self) -> Result<(), TransportError> {
        self.session = None;

        let (client, mut eventloop) = AsyncClient::new(self.options.clone(), CLIENT_CAPACITY);
        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                    if ack.code != ConnectReturnCode::Success {
                        return Err(TransportError::Refused(format!("{:?}", ack.code)));
                    }
                    debug!(session_present = ack.session_present, "CONNACK received");
                    self.session = Some(Session { client, eventloop });
                    return Ok(());
                }
                Ok(event) => trace!(?event, "MQTT event during handshake"),
                Err(rumqttc::ConnectionError::ConnectionRefused(code)) => {
                    return Err(TransportError::Refused(format!("{:?}", code)));
                }
                Err(e) => return Err(TransportError::Connection(e.to_string())),
            }
        }
    }

    async fn publish(&mut self, topic: &str, payload: Vec<u8>) -> Result<(), TransportError> {
        let qos = self.qos;
        let retain = self.retain;
        let session = self.session.as_mut().ok_or(TransportError::NotConnected)?;

        let result = match session.client.publish(topic, qos, retain, payload).await {
            Ok(()) => wait_for_ack(&mut session.eventloop, qos).await,
            Err(e) => Err(TransportError::Connection(e.to_string())),
        };

        if result.is_err() {
            self.session = None;
        }
        result
    }

    async fn drive(&mut self) -> TransportError {
        let Some(session) = self.session.as_mut() else {
            return std::future::pending().await;
        };

        let error = loop {
            match session.eventloop.poll().await {
                Ok(Event::Incoming(Packet::Disconnect)) => break TransportError::Closed,
                Ok(event) => trace!(?event, "MQTT event"),
                Err(e) => break TransportError::Connection(e.to_string()),
            }
        };

        self.session = None;
        error
    }

    async fn disconnect(&mut self) {
        let Some(mut session) = self.session.take() else {
            return;
        };

        if session.client.disconnect().await.is_err() {
            return;
        }
        // Flush the DISCONNECT packet.
        loop {
            match session.eventloop.poll().await {
                Ok(Event::Outgoing(Outgoing::Disconnect)) | Err(_) => break,
                Ok(_) => {}
            }
        }
    }
}

/// Poll the event loop until the publish just queued is acknowledged.
async fn wait_for_ack(eventloop: &mut EventLoop, qos: QoS) -> Result<(), TransportError> {
    let mut pkid = None;

    loop {
        match eventloop.poll().await {
            Ok(Event::Outgoing(Outgoing::Publish(id))) => {
                if qos == QoS::AtMostOnce {
                    return Ok(());
                }
                pkid = Some(id);
            }
            Ok(Event::Incoming(Packet::PubAck(ack)))
                if qos == QoS::AtLeastOnce && Some(ack.pkid) == pkid =>
            {
                return Ok(());
            }
            Ok(Event::Incoming(Packet::PubComp(comp)))
                if qos == QoS::ExactlyOnce && Some(comp.pkid) == pkid =>
            {
                return Ok(());
            }
            Ok(Event::Incoming(Packet::Disconnect)) => return Err(TransportError::Closed),
            Ok(event) => trace!(?event, "MQTT event while awaiting ack"),
            Err(e) => return Err(TransportError::Connection(e.to_string())),
        }
    }
}
