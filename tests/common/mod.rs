#![allow(dead_code)]

use ecu_bridge::ecu::frame::RawFrame;
use ecu_bridge::prelude::*;

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;

pub const ECU_ID: &str = "216000001234";

pub fn common_setup() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn settings() -> ClientSettings {
    ClientSettings {
        connect_timeout: Duration::from_secs(1),
        read_timeout: Duration::from_millis(300),
        reopen_delay: Duration::ZERO,
        max_attempts: 3,
    }
}

// Frames {{{
/// Wrap `body` in header and terminator; the length field is filled in.
pub fn frame(code: &str, body: &[u8]) -> Vec<u8> {
    let total = 13 + body.len() + 4;
    let mut r = b"APS11".to_vec();
    r.extend_from_slice(format!("{:04}", total - 1).as_bytes());
    r.extend_from_slice(code.as_bytes());
    r.extend_from_slice(body);
    r.extend_from_slice(b"END\n");
    r
}

pub fn device_info_frame(lifetime: u32, inverter_count: u16) -> Vec<u8> {
    let mut b = Vec::new();
    b.extend_from_slice(ECU_ID.as_bytes());
    b.extend_from_slice(&[0, 0]);
    b.extend_from_slice(&lifetime.to_be_bytes());
    b.extend_from_slice(&500u32.to_be_bytes());
    b.extend_from_slice(&50u32.to_be_bytes());
    b.extend_from_slice(&[0; 7]);
    b.extend_from_slice(&inverter_count.to_be_bytes());
    b.extend_from_slice(&inverter_count.to_be_bytes());
    b.extend_from_slice(&[0, 0]);
    b.extend_from_slice(b"014ECU_R_1.2.13.0");
    b.extend_from_slice(b"009Etc/GMT-8");
    b.extend_from_slice(&[0; 15]);
    frame("0001", &b)
}

pub fn inverter_record(uid: [u8; 6], fields: &[u16]) -> Vec<u8> {
    let mut r = uid.to_vec();
    r.push(1);
    r.extend_from_slice(&[0, 0]);
    r.extend_from_slice(&500u16.to_be_bytes());
    r.extend_from_slice(&130u16.to_be_bytes());
    for f in fields {
        r.extend_from_slice(&f.to_be_bytes());
    }
    r
}

pub fn inverter_frame(records: &[Vec<u8>]) -> Vec<u8> {
    let mut b = b"0001".to_vec();
    b.extend_from_slice(&(records.len() as u16).to_be_bytes());
    b.extend_from_slice(&[0x20, 0x23, 0x10, 0x18, 0x13, 0x45, 0x09]);
    for r in records {
        b.extend_from_slice(r);
    }
    frame("0002", &b)
}

pub fn signal_frame(entries: &[([u8; 6], u8)]) -> Vec<u8> {
    let mut b = vec![0u8; 2];
    for (uid, strength) in entries {
        b.extend_from_slice(uid);
        b.push(*strength);
    }
    frame("0030", &b)
}

pub const YC600_UID: [u8; 6] = [0x40, 0x20, 0x12, 0x34, 0x56, 0x78];
pub const QS1_UID: [u8; 6] = [0x80, 0x10, 0x00, 0x00, 0x00, 0x01];

/// One YC600 and one QS1, with signal for the YC600 only.
pub fn happy_frames() -> [Vec<u8>; 3] {
    [
        device_info_frame(10000, 2),
        inverter_frame(&[
            inverter_record(YC600_UID, &[100, 230, 98, 231]),
            inverter_record(QS1_UID, &[10, 240, 20, 30, 40]),
        ]),
        signal_frame(&[(YC600_UID, 204)]),
    ]
}
// }}}

// ScriptedTransport {{{
#[derive(Clone, Debug)]
pub enum Reply {
    Frame(Vec<u8>),
    Timeout,
    Closed,
}

/// In-memory transport answering each `read_frame` with the next scripted
/// reply. Running out of replies behaves like a timeout.
#[derive(Debug, Default)]
pub struct ScriptedTransport {
    replies: VecDeque<Reply>,
    open: bool,
    /// 1-based numbers of the `open` calls that are refused
    pub refuse_opens: Vec<usize>,
    pub opens: usize,
    pub closes: usize,
    pub sent: Vec<Vec<u8>>,
}

impl ScriptedTransport {
    pub fn new(replies: impl IntoIterator<Item = Reply>) -> Self {
        Self {
            replies: replies.into_iter().collect(),
            ..Default::default()
        }
    }

    pub fn frames(frames: impl IntoIterator<Item = Vec<u8>>) -> Self {
        Self::new(frames.into_iter().map(Reply::Frame))
    }

    pub fn push(&mut self, reply: Reply) {
        self.replies.push_back(reply);
    }

    pub fn remaining(&self) -> usize {
        self.replies.len()
    }

    pub fn sent_commands(&self) -> Vec<String> {
        self.sent
            .iter()
            .map(|s| String::from_utf8_lossy(s).into_owned())
            .collect()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn open(&mut self) -> Result<(), ProtocolError> {
        self.opens += 1;
        if self.refuse_opens.contains(&self.opens) {
            return Err(ProtocolError::Connection {
                addr: "scripted".to_string(),
                reason: "refused".to_string(),
            });
        }
        self.open = true;
        Ok(())
    }

    async fn close(&mut self) {
        if self.open {
            self.closes += 1;
        }
        self.open = false;
    }

    fn is_open(&self) -> bool {
        self.open
    }

    fn reopen_delay(&self) -> Duration {
        Duration::ZERO
    }

    async fn send(&mut self, bytes: &[u8]) -> Result<(), ProtocolError> {
        if !self.open {
            return Err(ProtocolError::Connection {
                addr: "scripted".to_string(),
                reason: "not connected".to_string(),
            });
        }
        self.sent.push(bytes.to_vec());
        Ok(())
    }

    async fn read_frame(&mut self, timeout: Duration) -> Result<RawFrame, ProtocolError> {
        match self.replies.pop_front() {
            Some(Reply::Frame(bytes)) => Ok(RawFrame::new(bytes)),
            Some(Reply::Closed) => Err(ProtocolError::ConnectionClosed { partial_bytes: 0 }),
            Some(Reply::Timeout) | None => Err(ProtocolError::FrameTimeout {
                partial_bytes: 0,
                timeout,
            }),
        }
    }
}

pub fn scripted_client(transport: ScriptedTransport) -> EcuClient<ScriptedTransport> {
    EcuClient::with_transport(transport, settings())
}
// }}}

// MockEcu {{{
/// TCP server on 127.0.0.1 that answers each command by its 13-byte prefix.
///
/// Commands listed in `ignore_once` get no answer the first time they
/// arrive, so the client times out and has to reconnect.
pub struct MockEcu {
    addr: SocketAddr,
    connections: Arc<AtomicUsize>,
    requests: Arc<Mutex<Vec<String>>>,
}

impl MockEcu {
    pub async fn start(frames: [Vec<u8>; 3], ignore_once: &[&str]) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let [device_info, inverter_data, signal] = frames;
        let responses: Arc<HashMap<&'static str, Vec<u8>>> = Arc::new(
            [
                ("APS1100160001", device_info),
                ("APS1100280002", inverter_data),
                ("APS1100280030", signal),
            ]
            .into_iter()
            .collect(),
        );
        let ignore: Arc<Mutex<Vec<String>>> =
            Arc::new(Mutex::new(ignore_once.iter().map(|s| s.to_string()).collect()));

        let connections = Arc::new(AtomicUsize::new(0));
        let requests = Arc::new(Mutex::new(Vec::new()));

        {
            let connections = connections.clone();
            let requests = requests.clone();
            tokio::spawn(async move {
                while let Ok((stream, _)) = listener.accept().await {
                    connections.fetch_add(1, Ordering::SeqCst);
                    let responses = responses.clone();
                    let ignore = ignore.clone();
                    let requests = requests.clone();

                    tokio::spawn(async move {
                        let (reader, mut writer) = stream.into_split();
                        let mut reader = BufReader::new(reader);
                        let mut line = Vec::new();

                        loop {
                            line.clear();
                            match reader.read_until(b'\n', &mut line).await {
                                Ok(0) | Err(_) => break,
                                Ok(_) => {}
                            }
                            let request = String::from_utf8_lossy(&line).into_owned();
                            requests.lock().unwrap().push(request.clone());

                            let prefix = request.get(..13).unwrap_or("");
                            let skip = {
                                let mut ignore = ignore.lock().unwrap();
                                match ignore.iter().position(|p| p == prefix) {
                                    Some(i) => {
                                        ignore.remove(i);
                                        true
                                    }
                                    None => false,
                                }
                            };
                            if skip {
                                continue;
                            }

                            if let Some(response) = responses.get(prefix) {
                                if writer.write_all(response).await.is_err() {
                                    break;
                                }
                            }
                        }
                    });
                }
            });
        }

        Self {
            addr,
            connections,
            requests,
        }
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }
}
// }}}
