//! A scripted AllOne on a loopback UDP socket.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use orvibo_core::protocol::{encode_header, CommandId, LEARN_CONST, PADDING};
use orvibo_core::HardwareId;
use orvibo_remote::{ConnectionManager, TransportConfig};
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;

pub const MAC: [u8; 6] = [0xAC, 0xCF, 0x23, 0x72, 0x5A, 0x50];
pub const OTHER_MAC: [u8; 6] = [0xAC, 0xCF, 0x23, 0x72, 0x5A, 0x51];

/// How the fake device reacts.
#[derive(Debug, Clone)]
pub struct Behaviour {
    pub answer_subscribe: bool,
    pub answer_emit: bool,
    pub answer_learn: bool,
    /// Send a reply carrying another device's MAC before each real reply.
    pub foreign_reply_first: bool,
    /// Code reported this long after the learn acknowledgement.
    pub learned_code: Option<(Duration, Vec<u8>)>,
    /// Type signature placed in discovery replies.
    pub signature: &'static [u8],
}

impl Default for Behaviour {
    fn default() -> Self {
        Self {
            answer_subscribe: true,
            answer_emit: true,
            answer_learn: true,
            foreign_reply_first: false,
            learned_code: None,
            signature: b"IRD",
        }
    }
}

pub struct FakeDevice {
    pub addr: SocketAddr,
    pub mac: HardwareId,
    received: Arc<Mutex<Vec<Vec<u8>>>>,
    task: JoinHandle<()>,
}

impl FakeDevice {
    pub async fn start(behaviour: Behaviour) -> Self {
        Self::start_on("127.0.0.1:0", MAC, behaviour).await
    }

    pub async fn start_on(bind: &str, mac: [u8; 6], behaviour: Behaviour) -> Self {
        let socket = Arc::new(UdpSocket::bind(bind).await.expect("bind fake device"));
        let addr = socket.local_addr().expect("local addr");
        let received = Arc::new(Mutex::new(Vec::new()));
        let task = tokio::spawn(serve(
            Arc::clone(&socket),
            mac,
            behaviour,
            Arc::clone(&received),
        ));
        Self {
            addr,
            mac: HardwareId::new(mac),
            received,
            task,
        }
    }

    /// Packets received so far with the given command.
    pub fn received(&self, command: CommandId) -> Vec<Vec<u8>> {
        self.received
            .lock()
            .unwrap()
            .iter()
            .filter(|p| p.len() >= 6 && p[4..6] == command.bytes())
            .cloned()
            .collect()
    }
}

impl Drop for FakeDevice {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn serve(
    socket: Arc<UdpSocket>,
    mac: [u8; 6],
    behaviour: Behaviour,
    received: Arc<Mutex<Vec<Vec<u8>>>>,
) {
    let mut buf = vec![0u8; 2048];
    loop {
        let Ok((len, from)) = socket.recv_from(&mut buf).await else {
            return;
        };
        let packet = buf[..len].to_vec();
        received.lock().unwrap().push(packet.clone());

        let command = CommandId::try_from([packet[4], packet[5]]).ok();
        let reply = match command {
            Some(CommandId::Discovery) => Some(discovery_reply(mac, behaviour.signature, 1)),
            Some(CommandId::Subscribe) if behaviour.answer_subscribe => Some(subscribe_reply(mac)),
            Some(CommandId::EmitIr) if behaviour.answer_emit => Some(emit_reply(mac)),
            Some(CommandId::LearnIr) if behaviour.answer_learn => Some(learn_ack(mac)),
            _ => None,
        };
        let Some(reply) = reply else { continue };

        if behaviour.foreign_reply_first && command != Some(CommandId::Discovery) {
            let foreign = match command {
                Some(CommandId::Subscribe) => subscribe_reply(OTHER_MAC),
                Some(CommandId::EmitIr) => emit_reply(OTHER_MAC),
                _ => learn_ack(OTHER_MAC),
            };
            let _ = socket.send_to(&foreign, from).await;
        }
        let _ = socket.send_to(&reply, from).await;

        if command == Some(CommandId::LearnIr) {
            if let Some((delay, code)) = behaviour.learned_code.clone() {
                let socket = Arc::clone(&socket);
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    let _ = socket.send_to(&learn_capture(mac, &code), from).await;
                });
            }
        }
    }
}

// ── Reply builders ────────────────────────────────────────────────────────────

fn mac_body(mac: [u8; 6], tail: &[u8]) -> Vec<u8> {
    let mut body = mac.to_vec();
    body.extend_from_slice(&PADDING);
    body.extend_from_slice(tail);
    body
}

pub fn discovery_reply(mac: [u8; 6], signature: &[u8], clock: u32) -> Vec<u8> {
    let mut body = vec![0u8; 35];
    body[1..7].copy_from_slice(&mac);
    body[13..13 + signature.len()].copy_from_slice(signature);
    body[31..35].copy_from_slice(&clock.to_le_bytes());
    encode_header(CommandId::Discovery, &body).unwrap()
}

pub fn subscribe_reply(mac: [u8; 6]) -> Vec<u8> {
    encode_header(CommandId::Subscribe, &mac_body(mac, &[0, 0, 0, 0, 0, 0])).unwrap()
}

pub fn emit_reply(mac: [u8; 6]) -> Vec<u8> {
    encode_header(CommandId::EmitIr, &mac_body(mac, &[0x65, 0, 0, 0])).unwrap()
}

pub fn learn_ack(mac: [u8; 6]) -> Vec<u8> {
    encode_header(CommandId::LearnIr, &mac_body(mac, &LEARN_CONST)).unwrap()
}

/// Learn report whose bytes from offset 26 on are `code`.
pub fn learn_capture(mac: [u8; 6], code: &[u8]) -> Vec<u8> {
    let mut tail = vec![0u8; 8];
    tail.extend_from_slice(code);
    encode_header(CommandId::LearnIr, &mac_body(mac, &tail)).unwrap()
}

/// A connection manager bound to an ephemeral loopback port.
pub fn loopback_manager() -> Arc<ConnectionManager> {
    Arc::new(ConnectionManager::new(TransportConfig {
        bind_address: "127.0.0.1:0".parse().unwrap(),
        allow_broadcast: false,
        queue_capacity: 16,
    }))
}
