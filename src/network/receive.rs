//! Per-connection receive loop

use crate::config::DecodeErrorPolicy;
use crate::network::connection_table::PeerLink;
use crate::network::peer_network::PeerNetwork;
use crate::protocol::EnvelopeReader;
use log::{debug, info, warn};
use std::io::BufReader;
use std::net::TcpStream;
use std::sync::Arc;

/// Why a receive loop stopped
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum LoopExit {
    /// Peer closed the stream cleanly
    Closed,
    /// Corrupt frame under the close policy
    DecodeError(String),
    /// Read failed (reset, local shutdown, ...)
    Io(String),
}

/// Read envelopes from `stream` until it ends, handing each to `network`.
///
/// On exit the link is closed and removed from the table, unless a newer
/// link has already replaced it under the same address.
pub(crate) fn run(network: PeerNetwork, link: Arc<PeerLink>, stream: TcpStream) {
    let peer = link.address().to_string();
    let exit = read_loop(&network, &link, stream);

    match &exit {
        LoopExit::Closed => info!("Peer {peer} closed the connection"),
        LoopExit::DecodeError(e) => warn!("Closing {peer} after corrupt frame: {e}"),
        LoopExit::Io(e) => debug!("Connection to {peer} ended: {e}"),
    }

    network.release(&link);
}

fn read_loop(network: &PeerNetwork, link: &PeerLink, stream: TcpStream) -> LoopExit {
    let peer = link.address();
    let settings = network.settings();
    let mut reader =
        EnvelopeReader::with_max_frame_len(BufReader::new(stream), settings.max_frame_len);

    loop {
        match reader.read_envelope() {
            Ok(Some(envelope)) => network.handle_envelope(envelope, link),
            Ok(None) => return LoopExit::Closed,
            Err(e) if e.is_recoverable_decode() => {
                network.stats_handle().record_decode_error();
                match settings.decode_errors {
                    DecodeErrorPolicy::Skip => {
                        warn!("Skipping corrupt frame from {peer}: {e}");
                        continue;
                    }
                    DecodeErrorPolicy::Close => return LoopExit::DecodeError(e.to_string()),
                }
            }
            Err(e) => return LoopExit::Io(e.to_string()),
        }
    }
}
