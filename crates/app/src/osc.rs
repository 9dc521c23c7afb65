//! Minimal OSC-over-UDP sender for the renderer.
//!
//! Each live source becomes one `/source/{n}/xyz ,fff` message per frame,
//! where `n` is the 1-based renderer index.

use std::net::{SocketAddr, UdpSocket};

use glam::DVec3;
use spatial_motion_core::{PositionFrame, SourceId, Transport, TransportError};

pub struct OscUdpTransport {
    socket: UdpSocket,
    target: SocketAddr,
    buffer: Vec<u8>,
}

impl OscUdpTransport {
    pub fn connect(target: SocketAddr) -> std::io::Result<Self> {
        let local = if target.is_ipv4() { "0.0.0.0:0" } else { "[::]:0" };
        let socket = UdpSocket::bind(local)?;
        socket.set_nonblocking(true)?;
        Ok(Self {
            socket,
            target,
            buffer: Vec::with_capacity(64),
        })
    }
}

impl Transport for OscUdpTransport {
    /// Sends every source even if an earlier send failed; reports the first
    /// failure.
    fn publish(&mut self, frame: &PositionFrame) -> Result<(), TransportError> {
        let mut first_error = None;
        for (id, position) in frame.iter() {
            encode_xyz(&mut self.buffer, id, position);
            if let Err(err) = self.socket.send_to(&self.buffer, self.target) {
                first_error.get_or_insert(err);
            }
        }
        match first_error {
            Some(err) => Err(TransportError::Io(err)),
            None => Ok(()),
        }
    }
}

fn push_padded(buffer: &mut Vec<u8>, text: &str) {
    buffer.extend_from_slice(text.as_bytes());
    buffer.push(0);
    while buffer.len() % 4 != 0 {
        buffer.push(0);
    }
}

pub fn encode_xyz(buffer: &mut Vec<u8>, id: SourceId, position: DVec3) {
    buffer.clear();
    push_padded(buffer, &format!("/source/{}/xyz", u64::from(id.0) + 1));
    push_padded(buffer, ",fff");
    for value in position.to_array() {
        buffer.extend_from_slice(&(value as f32).to_be_bytes());
    }
}
