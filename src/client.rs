//! Live socket session against a Nightscout server
//!
//! Nightscout pushes deltas over socket.io. This client speaks the engine.io
//! v3 websocket transport directly: an open frame with the ping cadence,
//! a socket.io namespace connect, then `42["<event>", <payload>]` frames.
//! Inbound events are decoded into one closed [`InboundMessage`] enum and
//! dispatched in a single place, one batch at a time.

use std::io::ErrorKind;
use std::net::TcpStream;
use std::time::{Duration, Instant};

use chrono::Utc;
use log::{debug, error, info, warn};
use serde_json::{json, Value};
use sha1::{Digest, Sha1};
use tungstenite::stream::MaybeTlsStream;
use tungstenite::{Message, WebSocket};

use crate::config::Config;
use crate::error::NsLinkError;
use crate::interpret::Interpreter;
use crate::store::FactStore;

/// How long a single socket read blocks before the keepalive check runs
const POLL_INTERVAL: Duration = Duration::from_secs(1);
/// Deadline for the open + connect + authorize handshake
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);
/// Ping cadence used when the open frame does not carry one
const DEFAULT_PING_INTERVAL: Duration = Duration::from_secs(25);
/// Hours of history requested at authorization
const HISTORY_HOURS: u32 = 48;

/// The closed set of inbound events this client understands
#[derive(Debug, Clone, PartialEq)]
pub enum InboundMessage {
    DataUpdate(Value),
    Notification(Value),
    Alarm(Value),
    UrgentAlarm(Value),
    Announcement(Value),
}

impl InboundMessage {
    pub fn name(&self) -> &'static str {
        match self {
            InboundMessage::DataUpdate(_) => "dataUpdate",
            InboundMessage::Notification(_) => "notification",
            InboundMessage::Alarm(_) => "alarm",
            InboundMessage::UrgentAlarm(_) => "urgent_alarm",
            InboundMessage::Announcement(_) => "announcement",
        }
    }
}

/// One decoded engine.io/socket.io text frame
#[derive(Debug, Clone, PartialEq)]
enum Frame {
    Open(Value),
    Close,
    Ping,
    Pong,
    Connect,
    Disconnect,
    Event(String, Value),
    Unknown,
}

/// Decode one engine.io text frame
fn decode_frame(text: &str) -> Frame {
    match text.as_bytes().first() {
        Some(b'0') => Frame::Open(serde_json::from_str(&text[1..]).unwrap_or(Value::Null)),
        Some(b'1') => Frame::Close,
        Some(b'2') => Frame::Ping,
        Some(b'3') => Frame::Pong,
        Some(b'4') => match text.as_bytes().get(1) {
            Some(b'0') => Frame::Connect,
            Some(b'1') => Frame::Disconnect,
            Some(b'2') => decode_event(&text[2..]),
            _ => Frame::Unknown,
        },
        _ => Frame::Unknown,
    }
}

/// Decode the `["<event>", <payload>]` body of a socket.io event frame
fn decode_event(body: &str) -> Frame {
    let Ok(Value::Array(items)) = serde_json::from_str::<Value>(body) else {
        return Frame::Unknown;
    };
    let Some(Value::String(name)) = items.first() else {
        return Frame::Unknown;
    };
    let payload = items.get(1).cloned().unwrap_or(Value::Null);
    Frame::Event(name.clone(), payload)
}

/// Map a socket.io event onto the closed inbound set
fn classify_event(name: &str, payload: Value) -> Option<InboundMessage> {
    match name {
        "dataUpdate" => Some(InboundMessage::DataUpdate(payload)),
        "notification" => Some(InboundMessage::Notification(payload)),
        "alarm" => Some(InboundMessage::Alarm(payload)),
        "urgent_alarm" => Some(InboundMessage::UrgentAlarm(payload)),
        "announcement" => Some(InboundMessage::Announcement(payload)),
        _ => {
            debug!("ignoring event {:?}", name);
            None
        }
    }
}

/// Hex sha1 of the API secret, as the authorize handshake expects
pub fn secret_hash(secret: &str) -> String {
    let digest = Sha1::digest(secret.as_bytes());
    let mut hex = String::with_capacity(digest.len() * 2);
    for byte in digest {
        hex.push_str(&format!("{:02x}", byte));
    }
    hex
}

/// An established, authorized live socket session
pub struct Session {
    socket: WebSocket<MaybeTlsStream<TcpStream>>,
    ping_interval: Duration,
    last_ping: Instant,
}

impl Session {
    /// Connect, wait for the namespace handshake and send the authorize event
    pub fn connect(config: &Config) -> Result<Self, NsLinkError> {
        let url = config.socket_url();
        info!("connecting to {}", url);
        let (socket, _response) = tungstenite::connect(url.as_str())?;

        let mut session = Session {
            socket,
            ping_interval: DEFAULT_PING_INTERVAL,
            last_ping: Instant::now(),
        };
        session.set_read_timeout()?;
        session.handshake(config)?;
        info!("connection established");
        Ok(session)
    }

    fn set_read_timeout(&mut self) -> Result<(), NsLinkError> {
        match self.socket.get_ref() {
            MaybeTlsStream::Plain(stream) => stream.set_read_timeout(Some(POLL_INTERVAL))?,
            MaybeTlsStream::Rustls(stream) => stream.sock.set_read_timeout(Some(POLL_INTERVAL))?,
            _ => warn!("unknown stream type, keepalive pings may stall"),
        }
        Ok(())
    }

    /// Wait for the engine.io open and socket.io connect frames, then authorize
    fn handshake(&mut self, config: &Config) -> Result<(), NsLinkError> {
        let deadline = Instant::now() + HANDSHAKE_TIMEOUT;
        let mut open = false;
        let mut connected = false;

        while !(open && connected) {
            if Instant::now() >= deadline {
                return Err(NsLinkError::Handshake(
                    "server did not complete the socket handshake in time".to_string(),
                ));
            }
            match self.read_text()? {
                Some(text) => match decode_frame(&text) {
                    Frame::Open(info) => {
                        if let Some(millis) = info.get("pingInterval").and_then(Value::as_u64) {
                            self.ping_interval = Duration::from_millis(millis);
                        }
                        debug!("open frame, ping interval {:?}", self.ping_interval);
                        open = true;
                    }
                    Frame::Connect => connected = true,
                    Frame::Close | Frame::Disconnect => {
                        return Err(NsLinkError::Handshake(
                            "server closed the socket during the handshake".to_string(),
                        ));
                    }
                    other => debug!("handshake frame ignored: {:?}", other),
                },
                None => continue,
            }
        }

        let secret = match &config.secret {
            Some(secret) => Value::String(secret_hash(secret)),
            None => Value::Null,
        };
        let authorize = json!(["authorize", {
            "client": "nslink",
            "secret": secret,
            "history": HISTORY_HOURS,
        }]);
        self.socket.send(Message::text(format!("42{}", authorize)))?;
        Ok(())
    }

    /// One text frame, `None` on a poll timeout
    fn read_text(&mut self) -> Result<Option<String>, NsLinkError> {
        match self.socket.read() {
            Ok(Message::Text(text)) => Ok(Some(text.to_string())),
            Ok(Message::Ping(payload)) => {
                self.socket.send(Message::Pong(payload))?;
                Ok(None)
            }
            Ok(Message::Close(_)) => Err(NsLinkError::Protocol("socket closed".to_string())),
            Ok(_) => Ok(None),
            Err(tungstenite::Error::Io(err))
                if err.kind() == ErrorKind::WouldBlock || err.kind() == ErrorKind::TimedOut =>
            {
                Ok(None)
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Block until the next understood event arrives.
    ///
    /// Keepalive pings go out between reads; `Ok(None)` means the server
    /// ended the session cleanly.
    pub fn next_message(&mut self) -> Result<Option<InboundMessage>, NsLinkError> {
        loop {
            if self.last_ping.elapsed() >= self.ping_interval {
                self.socket.send(Message::text("2"))?;
                self.last_ping = Instant::now();
            }

            let text = match self.read_text() {
                Ok(Some(text)) => text,
                Ok(None) => continue,
                Err(NsLinkError::Protocol(_)) => {
                    info!("connection lost");
                    return Ok(None);
                }
                Err(err) => return Err(err),
            };

            match decode_frame(&text) {
                Frame::Event(name, payload) => {
                    if let Some(message) = classify_event(&name, payload) {
                        return Ok(Some(message));
                    }
                }
                // A v4 server pings; v3 expects our pings and answers with pongs
                Frame::Ping => self.socket.send(Message::text("3"))?,
                Frame::Pong => {}
                Frame::Close | Frame::Disconnect => {
                    info!("connection lost");
                    return Ok(None);
                }
                other => debug!("frame ignored: {:?}", other),
            }
        }
    }
}

/// Dispatch loop: one inbound message handled to completion at a time.
///
/// Interpretation faults are logged and the session moves on to the next
/// message; only transport errors end the loop.
pub fn run<S: FactStore>(
    session: &mut Session,
    interpreter: &Interpreter<S>,
) -> Result<(), NsLinkError> {
    while let Some(message) = session.next_message()? {
        let now = Utc::now().timestamp_millis();
        debug!("handling {}", message.name());
        let result = match &message {
            InboundMessage::DataUpdate(payload) => interpreter.handle_data_update(payload, now),
            InboundMessage::Notification(payload) => interpreter.handle_notification(payload, now),
            InboundMessage::Alarm(payload) => interpreter.handle_alarm(payload, now),
            InboundMessage::UrgentAlarm(payload) => interpreter.handle_urgent_alarm(payload, now),
            InboundMessage::Announcement(payload) => {
                info!("announcement: {}", payload);
                Ok(())
            }
        };
        if let Err(err) = result {
            error!("failed to interpret {}: {}", message.name(), err);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_open_frame() {
        let frame = decode_frame(r#"0{"sid":"x","pingInterval":25000,"pingTimeout":5000}"#);
        let Frame::Open(info) = frame else {
            panic!("expected an open frame");
        };
        assert_eq!(info["pingInterval"], 25000);
    }

    #[test]
    fn test_decode_control_frames() {
        assert_eq!(decode_frame("2"), Frame::Ping);
        assert_eq!(decode_frame("3"), Frame::Pong);
        assert_eq!(decode_frame("40"), Frame::Connect);
        assert_eq!(decode_frame("41"), Frame::Disconnect);
        assert_eq!(decode_frame(""), Frame::Unknown);
    }

    #[test]
    fn test_decode_event_frame() {
        let frame = decode_frame(r#"42["dataUpdate",{"delta":true,"sgvs":[]}]"#);
        let Frame::Event(name, payload) = frame else {
            panic!("expected an event frame");
        };
        assert_eq!(name, "dataUpdate");
        assert_eq!(payload["delta"], true);
    }

    #[test]
    fn test_decode_event_without_payload() {
        let frame = decode_frame(r#"42["clients"]"#);
        assert_eq!(frame, Frame::Event("clients".to_string(), Value::Null));
    }

    #[test]
    fn test_decode_malformed_event_body() {
        assert_eq!(decode_frame("42{not json"), Frame::Unknown);
        assert_eq!(decode_frame(r#"42[42,"payload"]"#), Frame::Unknown);
    }

    #[test]
    fn test_classify_known_and_unknown_events() {
        let message = classify_event("urgent_alarm", Value::Null).unwrap();
        assert_eq!(message.name(), "urgent_alarm");
        assert!(classify_event("retroUpdate", Value::Null).is_none());
    }

    #[test]
    fn test_secret_hash() {
        assert_eq!(secret_hash("abc"), "a9993e364706816aba3e25717850c26c9cd0d89d");
    }
}
