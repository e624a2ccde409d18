//! Pluggable media seams: channel endpoints, flow control, and congestion
//! control. The lifecycle core consumes these through supplier functions held
//! in the context; the stock implementations here are deliberately small —
//! wire protocol behavior lives with the hot-path components, not the
//! bootstrap layer.

use std::io;
use std::net::{SocketAddr, ToSocketAddrs, UdpSocket};
use std::sync::Arc;

/// Strategy governing how far ahead of its receivers a sender may run.
pub trait FlowControl: Send {
    /// Sender position limit before any status message has arrived
    fn initial_position_limit(&self, initial_window_length: i64) -> i64 {
        initial_window_length
    }

    /// Fold one receiver's status message into the sender position limit,
    /// returning the new limit.
    fn on_status_message(&mut self, position: i64, window_length: i64) -> i64;

    /// Whether a local spy subscription counts as a live receiver
    fn spies_simulate_connection(&self) -> bool {
        false
    }
}

/// Stock flow control: the sender may run to the fastest receiver's window.
pub struct MaxFlowControl {
    position_limit: i64,
    spies_simulate_connection: bool,
}

impl MaxFlowControl {
    /// Create a max-position flow control
    pub fn new(spies_simulate_connection: bool) -> MaxFlowControl {
        MaxFlowControl {
            position_limit: 0,
            spies_simulate_connection,
        }
    }
}

impl FlowControl for MaxFlowControl {
    fn on_status_message(&mut self, position: i64, window_length: i64) -> i64 {
        self.position_limit = ::std::cmp::max(self.position_limit, position + window_length);
        self.position_limit
    }

    fn spies_simulate_connection(&self) -> bool {
        self.spies_simulate_connection
    }
}

/// Strategy governing the receiver window advertised back to senders.
pub trait CongestionControl: Send {
    /// Window advertised before any loss feedback exists
    fn initial_window_length(&self) -> i32;

    /// Window to advertise right now
    fn current_window_length(&self) -> i32;

    /// Observe a completed rebuild; `loss_occurred` reports whether the
    /// rebuild needed a retransmit.
    fn on_rebuild(&mut self, loss_occurred: bool);
}

/// Stock congestion control: a fixed window regardless of loss.
pub struct StaticWindowCongestionControl {
    window_length: i32,
}

impl StaticWindowCongestionControl {
    /// Create a fixed-window congestion control
    pub fn new(window_length: i32) -> StaticWindowCongestionControl {
        StaticWindowCongestionControl { window_length }
    }
}

impl CongestionControl for StaticWindowCongestionControl {
    fn initial_window_length(&self) -> i32 {
        self.window_length
    }

    fn current_window_length(&self) -> i32 {
        self.window_length
    }

    fn on_rebuild(&mut self, _loss_occurred: bool) {}
}

/// Egress endpoint bound to one channel.
pub trait SendChannelEndpoint: Send {
    /// Channel URI this endpoint serves
    fn channel(&self) -> &str;

    /// Send a datagram to the channel's endpoint address
    fn send(&mut self, payload: &[u8]) -> io::Result<usize>;
}

/// Ingress endpoint bound to one channel.
pub trait ReceiveChannelEndpoint: Send {
    /// Channel URI this endpoint serves
    fn channel(&self) -> &str;

    /// Non-blocking poll for one datagram into `buffer`
    fn poll(&mut self, buffer: &mut [u8]) -> io::Result<Option<(usize, SocketAddr)>>;
}

/// Produces a flow control instance per publication
pub type FlowControlSupplier = Arc<dyn Fn() -> Box<dyn FlowControl> + Send + Sync>;

/// Produces a flow control instance for a specific channel URI; the driver
/// composes one from the unicast and multicast suppliers
pub type ChannelFlowControlSupplier = Arc<dyn Fn(&str) -> Box<dyn FlowControl> + Send + Sync>;

/// Whether a channel URI names a multicast group
pub fn is_multicast_channel(channel: &str) -> bool {
    parse_udp_channel(channel)
        .map(|address| address.ip().is_multicast())
        .unwrap_or(false)
}

/// Compose the per-channel flow control supplier from the configured unicast
/// and multicast suppliers
pub fn channel_flow_control_supplier(
    unicast: FlowControlSupplier,
    multicast: FlowControlSupplier,
) -> ChannelFlowControlSupplier {
    Arc::new(move |channel: &str| {
        if is_multicast_channel(channel) {
            multicast()
        } else {
            unicast()
        }
    })
}

/// Produces a congestion control instance per image
pub type CongestionControlSupplier = Arc<dyn Fn(i32) -> Box<dyn CongestionControl> + Send + Sync>;

/// Produces a send endpoint for a channel URI
pub type SendChannelEndpointSupplier =
    Arc<dyn Fn(&str) -> io::Result<Box<dyn SendChannelEndpoint>> + Send + Sync>;

/// Produces a receive endpoint for a channel URI
pub type ReceiveChannelEndpointSupplier =
    Arc<dyn Fn(&str) -> io::Result<Box<dyn ReceiveChannelEndpoint>> + Send + Sync>;

/// Resolve the `host:port` part of a `udp://host:port` channel URI
pub fn parse_udp_channel(channel: &str) -> io::Result<SocketAddr> {
    let endpoint = channel.strip_prefix("udp://").ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("channel is not a udp URI: {}", channel),
        )
    })?;

    endpoint
        .to_socket_addrs()?
        .next()
        .ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::AddrNotAvailable,
                format!("channel endpoint did not resolve: {}", channel),
            )
        })
}

struct UdpSendChannelEndpoint {
    channel: String,
    socket: UdpSocket,
    endpoint: SocketAddr,
}

impl SendChannelEndpoint for UdpSendChannelEndpoint {
    fn channel(&self) -> &str {
        &self.channel
    }

    fn send(&mut self, payload: &[u8]) -> io::Result<usize> {
        self.socket.send_to(payload, self.endpoint)
    }
}

struct UdpReceiveChannelEndpoint {
    channel: String,
    socket: UdpSocket,
}

impl ReceiveChannelEndpoint for UdpReceiveChannelEndpoint {
    fn channel(&self) -> &str {
        &self.channel
    }

    fn poll(&mut self, buffer: &mut [u8]) -> io::Result<Option<(usize, SocketAddr)>> {
        match self.socket.recv_from(buffer) {
            Ok((length, source)) => Ok(Some((length, source))),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(None),
            Err(e) => Err(e),
        }
    }
}

/// Stock supplier producing UDP send endpoints
pub fn udp_send_channel_endpoint_supplier() -> SendChannelEndpointSupplier {
    Arc::new(|channel: &str| {
        let endpoint = parse_udp_channel(channel)?;
        let bind_address: SocketAddr = if endpoint.is_ipv4() {
            "0.0.0.0:0".parse().unwrap()
        } else {
            "[::]:0".parse().unwrap()
        };
        let socket = UdpSocket::bind(bind_address)?;
        socket.set_nonblocking(true)?;
        Ok(Box::new(UdpSendChannelEndpoint {
            channel: channel.to_string(),
            socket,
            endpoint,
        }) as Box<dyn SendChannelEndpoint>)
    })
}

/// Stock supplier producing UDP receive endpoints bound to the channel address
pub fn udp_receive_channel_endpoint_supplier() -> ReceiveChannelEndpointSupplier {
    Arc::new(|channel: &str| {
        let endpoint = parse_udp_channel(channel)?;
        let socket = UdpSocket::bind(endpoint)?;
        socket.set_nonblocking(true)?;
        Ok(Box::new(UdpReceiveChannelEndpoint {
            channel: channel.to_string(),
            socket,
        }) as Box<dyn ReceiveChannelEndpoint>)
    })
}
