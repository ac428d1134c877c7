// Copyright (c) 2026 Divachain
// Licensed under the Apache License, Version 2.0

#![forbid(unsafe_code)]
#![allow(missing_docs)]

//! P2P overlay (libp2p): persistent identity + one gossipsub topic.
//!
//! The transport is deliberately dumb: it moves opaque envelope frames.
//! - Outbound: frame bytes -> gossipsub publish
//! - Inbound: gossipsub message -> frame bytes -> inbound channel
//! All authentication, replay suppression, and addressing live in the
//! envelope layer (`core::router`); the overlay stays an untrusted flood.
//! Known validator endpoints are (re-)dialed on the morph interval so the
//! mesh tracks the on-chain registry.

use crate::monitoring::metrics::Metrics;
use std::{fs, path::Path, sync::Arc, time::Duration};

use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use libp2p::{
    core::upgrade,
    gossipsub::{self, IdentTopic, MessageAuthenticity},
    identify, identity, noise, ping,
    swarm::{NetworkBehaviour, Swarm, SwarmEvent},
    tcp, yamux, Multiaddr, PeerId, Transport,
};

use libp2p::futures::StreamExt;
use libp2p::swarm::Config as SwarmConfig;

const GOSSIP_TOPIC: &str = "divachain/overlay/v1";
const IDENTITY_FILE: &str = "p2p_identity.key";

/// Events emitted by the overlay.
#[derive(Clone, Debug)]
pub enum P2pEvent {
    /// Peer connected.
    PeerConnected(Vec<u8>),
    /// Peer disconnected.
    PeerDisconnected(Vec<u8>),
}

/// Receiver of overlay events.
pub type EventRx = mpsc::Receiver<P2pEvent>;

#[derive(Debug, Error)]
pub enum P2pError {
    #[error("io")]
    Io,
    #[error("config")]
    Config,
    #[error("overlay identity")]
    Identity,
}

/// Load the persistent overlay keypair from `path_state`, generating and
/// persisting a fresh one on first start. The overlay identity is distinct
/// from the wallet key; losing it only changes the node's PeerId.
fn load_or_create_identity(path_state: &Path) -> Result<(PeerId, identity::Keypair), P2pError> {
    fs::create_dir_all(path_state).map_err(|_| P2pError::Io)?;
    let path = path_state.join(IDENTITY_FILE);

    if path.exists() {
        let bytes = fs::read(&path).map_err(|_| P2pError::Io)?;
        let keys = identity::Keypair::from_protobuf_encoding(&bytes)
            .map_err(|_| P2pError::Identity)?;
        let peer_id = PeerId::from(keys.public());
        return Ok((peer_id, keys));
    }

    let keys = identity::Keypair::generate_ed25519();
    let bytes = keys
        .to_protobuf_encoding()
        .map_err(|_| P2pError::Identity)?;

    // tmp + rename so a crash never leaves a truncated key file behind
    let tmp = path_state.join(format!("{IDENTITY_FILE}.tmp"));
    fs::write(&tmp, &bytes).map_err(|_| P2pError::Io)?;
    fs::rename(&tmp, &path).map_err(|_| P2pError::Io)?;

    let peer_id = PeerId::from(keys.public());
    Ok((peer_id, keys))
}

/// Runtime configuration for the overlay.
#[derive(Clone, Debug)]
pub struct P2pConfig {
    /// Listen address, `host:port`.
    pub listen_addr: String,
    /// Directory for the persistent overlay identity.
    pub path_state: String,
    /// Validator endpoints to dial, `host:port` each.
    pub dial: Vec<String>,
    /// Interval for re-dialing known endpoints.
    pub morph_interval: Duration,
}

/// Handle to interact with the overlay.
pub struct P2pNode {
    inbound_rx: mpsc::Receiver<Vec<u8>>,
    outbound_tx: mpsc::Sender<Vec<u8>>,
}

impl P2pNode {
    /// Inbound envelope frames.
    pub fn inbound(&mut self) -> &mut mpsc::Receiver<Vec<u8>> {
        &mut self.inbound_rx
    }

    /// Take the inbound receiver out of the handle.
    pub fn into_inbound(self) -> mpsc::Receiver<Vec<u8>> {
        self.inbound_rx
    }

    /// Outbound channel for publishing envelope frames.
    pub fn outbound(&self) -> mpsc::Sender<Vec<u8>> {
        self.outbound_tx.clone()
    }
}

#[derive(Debug)]
enum BehaviourEvent {
    Gossipsub(gossipsub::Event),
    Identify(()),
    Ping(()),
}
impl From<gossipsub::Event> for BehaviourEvent {
    fn from(e: gossipsub::Event) -> Self {
        Self::Gossipsub(e)
    }
}
impl From<identify::Event> for BehaviourEvent {
    fn from(_e: identify::Event) -> Self {
        Self::Identify(())
    }
}
impl From<ping::Event> for BehaviourEvent {
    fn from(_e: ping::Event) -> Self {
        Self::Ping(())
    }
}

#[derive(NetworkBehaviour)]
#[behaviour(to_swarm = "BehaviourEvent")]
struct Behaviour {
    gossipsub: gossipsub::Behaviour,
    identify: identify::Behaviour,
    ping: ping::Behaviour,
}

fn endpoint_to_multiaddr(endpoint: &str) -> Option<Multiaddr> {
    let (host, port) = endpoint.rsplit_once(':')?;
    let port: u16 = port.parse().ok()?;
    let addr = if host.parse::<std::net::Ipv4Addr>().is_ok() {
        format!("/ip4/{host}/tcp/{port}")
    } else {
        format!("/dns4/{host}/tcp/{port}")
    };
    addr.parse().ok()
}

/// Spawn the overlay task.
pub fn spawn_p2p(
    cfg: P2pConfig,
    metrics: Arc<Metrics>,
) -> Result<(P2pNode, EventRx, tokio::task::JoinHandle<()>), P2pError> {
    let (local_peer_id, id_keys) = load_or_create_identity(Path::new(&cfg.path_state))?;

    let listen: Multiaddr = endpoint_to_multiaddr(&cfg.listen_addr).ok_or(P2pError::Config)?;

    // Channels
    let (in_tx, in_rx) = mpsc::channel::<Vec<u8>>(1024);
    let (out_tx, mut out_rx) = mpsc::channel::<Vec<u8>>(1024);
    let (ev_tx, ev_rx) = mpsc::channel::<P2pEvent>(128);

    let dial = cfg.dial.clone();
    let morph_interval = cfg.morph_interval.max(Duration::from_secs(1));

    // Spawn swarm loop
    let join = tokio::spawn(async move {
        // --- Transport (TCP + Noise + Yamux) ---
        let noise_keys = match noise::Config::new(&id_keys) {
            Ok(v) => v,
            Err(_) => {
                warn!("failed to build noise config");
                return;
            }
        };

        let transport = tcp::tokio::Transport::new(tcp::Config::default().nodelay(true))
            .upgrade(upgrade::Version::V1)
            .authenticate(noise_keys)
            .multiplex(yamux::Config::default())
            .boxed();

        // --- Gossipsub ---
        let gcfg = gossipsub::ConfigBuilder::default()
            .validation_mode(gossipsub::ValidationMode::Permissive)
            .heartbeat_interval(Duration::from_secs(1))
            .build()
            .unwrap_or_else(|_| gossipsub::Config::default());

        let mut gossipsub = match gossipsub::Behaviour::new(
            MessageAuthenticity::Signed(id_keys.clone()),
            gcfg,
        ) {
            Ok(v) => v,
            Err(_) => {
                warn!("failed to create gossipsub behaviour");
                return;
            }
        };

        let topic = IdentTopic::new(GOSSIP_TOPIC);
        if let Err(e) = gossipsub.subscribe(&topic) {
            warn!(err = ?e, "failed to subscribe topic");
        }

        // Identify + Ping
        let identify = identify::Behaviour::new(identify::Config::new(
            "divachain/1.0.0".to_string(),
            id_keys.public(),
        ));

        let ping = ping::Behaviour::new(
            ping::Config::new()
                .with_interval(Duration::from_secs(10))
                .with_timeout(Duration::from_secs(20)),
        );

        let behaviour = Behaviour {
            gossipsub,
            identify,
            ping,
        };

        let mut swarm = Swarm::new(
            transport,
            behaviour,
            local_peer_id,
            SwarmConfig::with_tokio_executor(),
        );

        if let Err(e) = swarm.listen_on(listen) {
            warn!(err = ?e, "listen_on failed");
            return;
        }

        let dial_round = |swarm: &mut Swarm<Behaviour>| {
            for endpoint in dial.iter().map(|x| x.trim()).filter(|x| !x.is_empty()) {
                match endpoint_to_multiaddr(endpoint) {
                    Some(ma) => {
                        if let Err(e) = swarm.dial(ma) {
                            debug!(peer = %endpoint, err = ?e, "dial failed");
                        }
                    }
                    None => warn!(peer = %endpoint, "bad endpoint; skipping"),
                }
            }
        };
        dial_round(&mut swarm);

        info!(%local_peer_id, topic = GOSSIP_TOPIC, "overlay loop started");

        metrics.p2p_peers.set(0);

        let mut morph = tokio::time::interval(morph_interval);
        morph.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                maybe_frame = out_rx.recv() => {
                    match maybe_frame {
                        Some(frame) => {
                            if let Err(e) = swarm.behaviour_mut().gossipsub.publish(topic.clone(), frame) {
                                debug!(err = ?e, "gossipsub publish failed");
                            }
                        }
                        None => {
                            warn!("outbound channel closed; stopping overlay task");
                            break;
                        }
                    }
                }

                _ = morph.tick() => {
                    dial_round(&mut swarm);
                }

                ev = swarm.select_next_some() => {
                    match ev {
                        SwarmEvent::NewListenAddr { address, .. } => {
                            info!(addr = %address, "listening");
                        }

                        SwarmEvent::ConnectionEstablished { peer_id, .. } => {
                            metrics.p2p_peers.inc();
                            let _ = ev_tx.send(P2pEvent::PeerConnected(peer_id.to_bytes())).await;
                            info!(%peer_id, "peer connected");
                        }

                        SwarmEvent::ConnectionClosed { peer_id, .. } => {
                            metrics.p2p_peers.dec();
                            let _ = ev_tx.send(P2pEvent::PeerDisconnected(peer_id.to_bytes())).await;
                            info!(%peer_id, "peer disconnected");
                        }

                        SwarmEvent::Behaviour(BehaviourEvent::Gossipsub(gossipsub::Event::Message { message, .. })) => {
                            // envelope admission happens in the core; just forward
                            if in_tx.send(message.data).await.is_err() {
                                warn!("inbound channel closed; stopping overlay task");
                                break;
                            }
                        }

                        SwarmEvent::Behaviour(BehaviourEvent::Identify(_)) => {}
                        SwarmEvent::Behaviour(BehaviourEvent::Ping(_)) => {}

                        _ => {}
                    }
                }
            }
        }
    });

    Ok((
        P2pNode {
            inbound_rx: in_rx,
            outbound_tx: out_tx,
        },
        ev_rx,
        join,
    ))
}
