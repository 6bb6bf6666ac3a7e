//! Networking: link seam, WebSocket transport, wire protocol, mic uplink.

pub mod link;
pub mod protocol;
pub mod transport;
pub mod uplink;

pub use link::{HostLink, LinkError, LinkEvent, NetworkConfig, NetworkLink};
pub use protocol::{parse_command, Command, DeviceEvent, ProtocolError};
pub use transport::{
    FrameHandler, InboundFrame, ServerConfig, Transport, TransportError, TransportEvent,
    TransportState,
};
pub use uplink::{Uplink, UplinkStats};
