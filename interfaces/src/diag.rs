//! Diagnostic UDP Publisher
//!
//! Lossy monitoring taps feeding a local visualiser over loopback UDP. The
//! wire format is interleaved little-endian f32 IQ with the first payload
//! byte carrying the channel index (clobbering the first sample); the
//! spectrogram variant zeroes that byte and selects the socket by channel.
//! Both formats are consumed by an external tool and must stay byte-exact.
//! Send failures are ignored.

use std::net::{Ipv4Addr, SocketAddr, UdpSocket};

use num_complex::Complex32;

/// Default visualiser ports: IQ stream, spectrogram channel 0, channel 1
pub const DIAG_PORTS: [u16; 3] = [8888, 9999, 7777];

/// Owned diagnostic sockets, passed to the stages that publish
pub struct DiagnosticSink {
    socket: UdpSocket,
    dests: [SocketAddr; 3],
}

impl DiagnosticSink {
    /// Bind a sink towards the default visualiser ports
    pub fn new() -> std::io::Result<Self> {
        Self::with_ports(DIAG_PORTS)
    }

    /// Bind a sink towards specific loopback ports
    pub fn with_ports(ports: [u16; 3]) -> std::io::Result<Self> {
        let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))?;
        let dests = ports.map(|p| SocketAddr::from((Ipv4Addr::LOCALHOST, p)));
        Ok(Self { socket, dests })
    }

    fn payload(samples: &[Complex32], first_byte: u8) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(samples.len() * 8);
        for s in samples {
            bytes.extend_from_slice(&s.re.to_le_bytes());
            bytes.extend_from_slice(&s.im.to_le_bytes());
        }
        if !bytes.is_empty() {
            bytes[0] = first_byte;
        }
        bytes
    }

    /// Publish a channel's IQ trace; the channel index rides in byte 0
    pub fn publish(&self, chan: usize, samples: &[Complex32]) {
        let bytes = Self::payload(samples, chan as u8);
        let _ = self.socket.send_to(&bytes, self.dests[0]);
    }

    /// Publish a spectrogram trace on the per-channel port
    pub fn spectro(&self, chan: usize, samples: &[Complex32]) {
        let bytes = Self::payload(samples, 0);
        let dest = if chan == 0 { self.dests[1] } else { self.dests[2] };
        let _ = self.socket.send_to(&bytes, dest);
    }
}
