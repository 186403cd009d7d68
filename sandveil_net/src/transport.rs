// Non-blocking packet transport over TCP.
//
// Provides a simple wire format for whole packets: a 4-byte big-endian
// length prefix followed by the packet bytes (a concatenation of protocol
// messages). Both sides poll once per game tick, so every socket runs in
// non-blocking mode:
// - `PacketChannel::recv_packets` drains whatever the OS has buffered into
//   a receive accumulator and peels off complete frames.
// - `PacketChannel::send_packet` writes as much as the socket accepts and
//   keeps the rest in a transmit backlog, flushed by later calls.
//
// A `MAX_PACKET_SIZE` guard protects against unbounded allocation from a
// malformed or malicious length prefix. The largest legitimate packet is a
// full sync tick, well under 32 KiB.

use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream, ToSocketAddrs};

/// Maximum allowed packet size. A full broadcast prefix plus a house
/// suffix tops out below 20 KiB; anything bigger is a protocol fault.
pub const MAX_PACKET_SIZE: usize = 32 * 1024;

/// One non-blocking TCP connection carrying length-prefixed packets.
#[derive(Debug)]
pub struct PacketChannel {
    stream: TcpStream,
    rx: Vec<u8>,
    tx: VecDeque<u8>,
    closed: bool,
}

impl PacketChannel {
    /// Wrap an accepted or connected stream. Switches it to non-blocking
    /// mode and disables Nagle so small per-tick packets go out promptly.
    pub fn new(stream: TcpStream) -> io::Result<PacketChannel> {
        stream.set_nonblocking(true)?;
        stream.set_nodelay(true)?;
        Ok(PacketChannel {
            stream,
            rx: Vec::new(),
            tx: VecDeque::new(),
            closed: false,
        })
    }

    /// Connect to a remote address and wrap the resulting stream.
    pub fn connect<A: ToSocketAddrs>(addr: A) -> io::Result<PacketChannel> {
        PacketChannel::new(TcpStream::connect(addr)?)
    }

    pub fn peer_addr(&self) -> io::Result<SocketAddr> {
        self.stream.peer_addr()
    }

    /// True once the remote side has closed or the connection failed.
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Queue one packet for sending and push as many backlog bytes as the
    /// socket will take right now.
    pub fn send_packet(&mut self, packet: &[u8]) -> io::Result<()> {
        if packet.len() > MAX_PACKET_SIZE {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("packet too large: {} bytes (max {MAX_PACKET_SIZE})", packet.len()),
            ));
        }
        #[expect(clippy::cast_possible_truncation)]
        let len_bytes = (packet.len() as u32).to_be_bytes();
        self.tx.extend(len_bytes);
        self.tx.extend(packet);
        self.flush()
    }

    /// Push backlog bytes until the socket would block or the backlog is
    /// empty. Called every tick so a slow reader cannot stall the loop.
    pub fn flush(&mut self) -> io::Result<()> {
        while !self.tx.is_empty() {
            let (head, _) = self.tx.as_slices();
            match self.stream.write(head) {
                Ok(0) => {
                    self.closed = true;
                    return Err(io::ErrorKind::WriteZero.into());
                }
                Ok(n) => {
                    self.tx.drain(..n);
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => {
                    self.closed = true;
                    return Err(e);
                }
            }
        }
        Ok(())
    }

    /// Drain readable bytes from the socket and return every complete
    /// packet received so far, in arrival order. Marks the channel closed
    /// on EOF or a hard error; already-complete packets are still
    /// returned so no data is lost at shutdown.
    pub fn recv_packets(&mut self) -> Vec<Vec<u8>> {
        let mut chunk = [0u8; 4096];
        loop {
            match self.stream.read(&mut chunk) {
                Ok(0) => {
                    self.closed = true;
                    break;
                }
                Ok(n) => self.rx.extend_from_slice(&chunk[..n]),
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(_) => {
                    self.closed = true;
                    break;
                }
            }
        }

        let mut packets = Vec::new();
        loop {
            if self.rx.len() < 4 {
                break;
            }
            let mut len_bytes = [0u8; 4];
            len_bytes.copy_from_slice(&self.rx[..4]);
            let len = u32::from_be_bytes(len_bytes) as usize;
            if len > MAX_PACKET_SIZE {
                // Framing is unrecoverable past a bogus length.
                self.closed = true;
                self.rx.clear();
                break;
            }
            if self.rx.len() < 4 + len {
                break;
            }
            packets.push(self.rx[4..4 + len].to_vec());
            self.rx.drain(..4 + len);
        }
        packets
    }
}

/// Non-blocking TCP listener producing `PacketChannel`s.
pub struct Listener {
    listener: TcpListener,
}

impl Listener {
    pub fn bind(port: u16) -> io::Result<Listener> {
        let listener = TcpListener::bind(("0.0.0.0", port))?;
        listener.set_nonblocking(true)?;
        Ok(Listener { listener })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept every connection currently pending, without blocking.
    pub fn accept_pending(&mut self) -> Vec<(PacketChannel, SocketAddr)> {
        let mut accepted = Vec::new();
        loop {
            match self.listener.accept() {
                Ok((stream, addr)) => match PacketChannel::new(stream) {
                    Ok(channel) => accepted.push((channel, addr)),
                    Err(e) => log::warn!("dropping connection from {addr}: {e}"),
                },
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) => {
                    log::warn!("accept failed: {e}");
                    break;
                }
            }
        }
        accepted
    }
}
