//! LAN discovery: multicast an inquiry, collect receiver beacons, maintain the peer table.

use std::collections::HashMap;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use bluepoint_core::wire::{decode_frame, encode_frame};
use bluepoint_core::{Discovery, DiscoveryError, Message, Peer, PeerId, PROTOCOL_VERSION};
use tokio::net::UdpSocket;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

const MULTICAST_GROUP: Ipv4Addr = Ipv4Addr::new(239, 255, 60, 61);

struct PeerState {
    peer: Peer,
    last_seen: Instant,
}

type PeerTable = Arc<Mutex<HashMap<PeerId, PeerState>>>;

pub struct LanDiscovery {
    socket: Arc<UdpSocket>,
    peers: PeerTable,
    group: SocketAddr,
    inquiry_window: Duration,
    peer_timeout: Duration,
    recv_task: JoinHandle<()>,
}

impl LanDiscovery {
    /// Join the discovery group on `port` and start listening for beacons.
    pub async fn bind(
        port: u16,
        inquiry_window: Duration,
        peer_timeout: Duration,
    ) -> std::io::Result<Self> {
        let socket = Arc::new(make_multicast_socket(port)?);
        let peers: PeerTable = Arc::new(Mutex::new(HashMap::new()));
        let recv_task = tokio::spawn(recv_loop(socket.clone(), peers.clone()));
        info!(port, group = %MULTICAST_GROUP, "discovery listening");
        Ok(Self {
            socket,
            peers,
            group: SocketAddr::from((MULTICAST_GROUP, port)),
            inquiry_window,
            peer_timeout,
            recv_task,
        })
    }
}

impl Drop for LanDiscovery {
    fn drop(&mut self) {
        self.recv_task.abort();
    }
}

#[async_trait]
impl Discovery for LanDiscovery {
    async fn discover(&self) -> Result<Vec<Peer>, DiscoveryError> {
        let inquiry = encode_frame(&Message::Inquiry {
            protocol_version: PROTOCOL_VERSION,
        })
        .map_err(|e| DiscoveryError::Unavailable(e.to_string()))?;
        self.socket.send_to(&inquiry, self.group).await?;
        tokio::time::sleep(self.inquiry_window).await;

        let peers = {
            let mut table = self.peers.lock().await;
            snapshot(&mut table, Instant::now(), self.peer_timeout)
        };
        info!(
            peers = ?peers.iter().map(|p| p.name.as_str()).collect::<Vec<_>>(),
            "discovery round"
        );
        Ok(peers)
    }
}

fn make_multicast_socket(port: u16) -> std::io::Result<UdpSocket> {
    let std_sock = std::net::UdpSocket::bind((Ipv4Addr::UNSPECIFIED, port))?;
    std_sock.join_multicast_v4(&MULTICAST_GROUP, &Ipv4Addr::UNSPECIFIED)?;
    std_sock.set_multicast_ttl_v4(1)?;
    std_sock.set_nonblocking(true)?;
    UdpSocket::from_std(std_sock)
}

async fn recv_loop(socket: Arc<UdpSocket>, peers: PeerTable) {
    let mut buf = vec![0u8; 65536];
    loop {
        let (n, from) = match socket.recv_from(&mut buf).await {
            Ok(r) => r,
            Err(e) => {
                warn!(error = %e, "discovery receive failed");
                tokio::time::sleep(Duration::from_secs(1)).await;
                continue;
            }
        };
        let Ok((msg, _)) = decode_frame(&buf[..n]) else {
            continue;
        };
        // Our own inquiries loop back through the group and are dropped here.
        let Some(peer) = peer_from_beacon(msg, from) else {
            continue;
        };
        let mut table = peers.lock().await;
        if !table.contains_key(&peer.id) {
            debug!(peer = %peer.id, name = %peer.name, addr = %from, "peer appeared");
        }
        table.insert(
            peer.id.clone(),
            PeerState {
                peer,
                last_seen: Instant::now(),
            },
        );
    }
}

fn peer_from_beacon(msg: Message, from: SocketAddr) -> Option<Peer> {
    match msg {
        Message::Beacon {
            protocol_version,
            device_id,
            name,
            device_class,
            push_port,
        } if protocol_version == PROTOCOL_VERSION && !device_id.is_empty() => Some(Peer {
            id: PeerId::new(device_id),
            name,
            device_class,
            channel: push_port,
            host: from.ip(),
        }),
        _ => None,
    }
}

/// Drop peers silent for `timeout`, return the rest ordered by ID.
fn snapshot(table: &mut HashMap<PeerId, PeerState>, now: Instant, timeout: Duration) -> Vec<Peer> {
    table.retain(|_, s| now.duration_since(s.last_seen) < timeout);
    let mut peers: Vec<Peer> = table.values().map(|s| s.peer.clone()).collect();
    peers.sort_by(|a, b| a.id.cmp(&b.id));
    peers
}
