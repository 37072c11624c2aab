use std::net::UdpSocket;

use anyhow::{Context, Result};
use log::{debug, warn};
use rosc::encoder;
use rosc::{OscBundle, OscMessage, OscPacket, OscTime, OscType};

use crate::systems::tracking::TrackedTouch;

const TUIO_ADDRESS: &str = "/tuio/2Dcur";
const SOURCE_NAME: &str = "HokuyoTouch";

/// OSC "immediately" time tag.
const IMMEDIATE: OscTime = OscTime {
    seconds: 0,
    fractional: 1,
};

/// TUIO 1.1 cursor-profile encoder over UDP. Stateless between frames; a
/// receiver derives liftoffs from ids missing from the next alive list.
pub struct TuioSender {
    socket: UdpSocket,
    host: String,
    port: u16,
    enabled: bool,
}

impl TuioSender {
    pub fn new(host: &str, port: u16) -> Result<Self> {
        let socket = UdpSocket::bind("0.0.0.0:0").context("failed to bind UDP socket")?;
        Ok(TuioSender {
            socket,
            host: String::from(host),
            port,
            enabled: true,
        })
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    pub fn update_target(&mut self, host: &str, port: u16) {
        if self.host != host || self.port != port {
            debug!("TUIO target changed to {}:{}", host, port);
            self.host = String::from(host);
            self.port = port;
        }
    }

    /// Send one `/tuio/2Dcur` bundle: source, alive, one set per touch,
    /// fseq. Send failures are logged and swallowed; the emitter never
    /// faults its caller.
    pub fn send_frame(&self, touches: &[TrackedTouch], frame_seq: i32) {
        if !self.enabled {
            return;
        }

        let mut content = Vec::with_capacity(touches.len() + 3);
        content.push(message(vec![
            OscType::String(String::from("source")),
            OscType::String(String::from(SOURCE_NAME)),
        ]));

        let mut alive = vec![OscType::String(String::from("alive"))];
        alive.extend(touches.iter().map(|t| OscType::Int(t.session_id)));
        content.push(message(alive));

        for touch in touches {
            content.push(message(vec![
                OscType::String(String::from("set")),
                OscType::Int(touch.session_id),
                OscType::Float(touch.normalized.0 as f32),
                OscType::Float(touch.normalized.1 as f32),
                OscType::Float(touch.velocity.0 as f32),
                OscType::Float(touch.velocity.1 as f32),
                // Motion acceleration, unused
                OscType::Float(0.0),
            ]));
        }

        content.push(message(vec![
            OscType::String(String::from("fseq")),
            OscType::Int(frame_seq),
        ]));

        let bundle = OscPacket::Bundle(OscBundle {
            timetag: IMMEDIATE,
            content,
        });
        let buf = match encoder::encode(&bundle) {
            Ok(buf) => buf,
            Err(e) => {
                warn!("Failed to encode TUIO bundle: {:?}", e);
                return;
            }
        };
        if let Err(e) = self.socket.send_to(&buf, (self.host.as_str(), self.port)) {
            debug!("TUIO send to {}:{} failed: {}", self.host, self.port, e);
        }
    }
}

fn message(args: Vec<OscType>) -> OscPacket {
    OscPacket::Message(OscMessage {
        addr: String::from(TUIO_ADDRESS),
        args,
    })
}
