use std::collections::HashMap;
use std::io;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4, ToSocketAddrs, UdpSocket};
use std::time::Duration;

use bitflags::bitflags;

use super::connection::ConnectionId;
use super::driver::{Driver, DriverContext, Received, SendStatus};
use super::error::NetError;
use super::hostcache::HostCacheEntry;
use super::stats::DatagramStats;
use crate::msg::{MessageBuffer, MessageReader};
use crate::protocol::{MAX_DATAGRAM, NET_MAXMESSAGE};

pub const HEADER_SIZE: usize = 8;
pub const DATAGRAM_SIZE: usize = MAX_DATAGRAM + HEADER_SIZE;
pub const NET_PROTOCOL_VERSION: u8 = 3;
pub const GAME_NAME: &str = "QUAKE";

const RESEND_INTERVAL: f64 = 1.0;
const DUPLICATE_CONNECT_WINDOW: f64 = 2.0;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct NetFlags: u32 {
        const DATA = 0x0001_0000;
        const ACK = 0x0002_0000;
        const NAK = 0x0004_0000;
        const EOM = 0x0008_0000;
        const UNRELIABLE = 0x0010_0000;
        const CTL = 0x8000_0000;
    }
}

pub const LENGTH_MASK: u32 = 0x0000_ffff;

/// Control request and reply codes.
pub mod ccreq {
    pub const CONNECT: u8 = 0x01;
    pub const SERVER_INFO: u8 = 0x02;
}

pub mod ccrep {
    pub const ACCEPT: u8 = 0x81;
    pub const REJECT: u8 = 0x82;
    pub const SERVER_INFO: u8 = 0x83;
}

fn encode_header(flags: NetFlags, length: usize, sequence: u32, packet: &mut Vec<u8>) {
    let word = flags.bits() | (length as u32 & LENGTH_MASK);
    packet.extend_from_slice(&word.to_be_bytes());
    packet.extend_from_slice(&sequence.to_be_bytes());
}

fn decode_word(bytes: &[u8]) -> Option<(NetFlags, usize)> {
    let word = u32::from_be_bytes(bytes.get(..4)?.try_into().ok()?);
    Some((
        NetFlags::from_bits_retain(word & !LENGTH_MASK),
        (word & LENGTH_MASK) as usize,
    ))
}

/// Builds a control packet. The first four bytes are patched with the
/// big-endian CTL word once the body is written.
fn control_packet(
    build: impl FnOnce(&mut MessageBuffer) -> Result<(), crate::msg::MsgError>,
) -> Result<Vec<u8>, NetError> {
    let mut message = MessageBuffer::new(MAX_DATAGRAM);
    message.write_long(0)?;
    build(&mut message)?;
    let mut packet = message.as_slice().to_vec();
    let word = NetFlags::CTL.bits() | (packet.len() as u32 & LENGTH_MASK);
    packet[..4].copy_from_slice(&word.to_be_bytes());
    Ok(packet)
}

/// Returns the command byte reader positioned after a valid CTL word.
fn open_control(packet: &[u8]) -> Option<MessageReader<'_>> {
    let (flags, length) = decode_word(packet)?;
    if flags != NetFlags::CTL || length != packet.len() {
        return None;
    }
    let mut reader = MessageReader::new(packet);
    reader.read_long();
    Some(reader)
}

fn open_socket(port: u16) -> io::Result<UdpSocket> {
    let socket = UdpSocket::bind(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, port))?;
    socket.set_nonblocking(true)?;
    Ok(socket)
}

/// Reads one packet; `None` when nothing is waiting.
fn read_packet(socket: &UdpSocket, buf: &mut [u8]) -> io::Result<Option<(usize, SocketAddr)>> {
    loop {
        match socket.recv_from(buf) {
            Ok(result) => return Ok(Some(result)),
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(None),
            Err(ref e) if e.kind() == io::ErrorKind::ConnectionReset => continue,
            Err(e) => return Err(e),
        }
    }
}

fn write_packet(socket: &UdpSocket, packet: &[u8], addr: SocketAddr) -> io::Result<()> {
    match socket.send_to(packet, addr) {
        Ok(_) => Ok(()),
        Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => Ok(()),
        Err(e) => Err(e),
    }
}

/// Resolves "host" or "host:port" to an IPv4 address.
fn resolve(host: &str, default_port: u16) -> Option<SocketAddr> {
    let with_port = if host.contains(':') {
        host.to_string()
    } else {
        format!("{host}:{default_port}")
    };
    with_port
        .to_socket_addrs()
        .ok()?
        .find(|addr| addr.is_ipv4())
}

/// 0 when address and port match, 1 when only the host matches, -1 otherwise.
fn compare_addr(a: &SocketAddr, b: &SocketAddr) -> i32 {
    if a.ip() != b.ip() {
        -1
    } else if a.port() != b.port() {
        1
    } else {
        0
    }
}

#[derive(Debug)]
struct Link {
    socket: UdpSocket,
    remote: SocketAddr,
}

/// Sequenced reliable and unreliable messages over UDP.
#[derive(Debug, Default)]
pub struct DatagramDriver {
    initialized: bool,
    control: Option<UdpSocket>,
    accept: Option<UdpSocket>,
    links: HashMap<ConnectionId, Link>,
    stats: DatagramStats,
    packet: Vec<u8>,
}

impl DatagramDriver {
    pub fn new() -> Self {
        Self {
            packet: vec![0u8; NET_MAXMESSAGE],
            ..Default::default()
        }
    }

    pub fn stats(&self) -> &DatagramStats {
        &self.stats
    }

    /// Address clients should use to reach this host's listening socket.
    pub fn listen_addr(&self) -> Option<SocketAddr> {
        self.accept.as_ref().and_then(|s| s.local_addr().ok())
    }

    /// Sends the next fragment of the pending reliable message.
    fn send_fragment(
        &mut self,
        ctx: &mut DriverContext<'_>,
        id: ConnectionId,
        resend: bool,
    ) -> Result<SendStatus, NetError> {
        let Some(link) = self.links.get(&id) else {
            return Ok(SendStatus::Dead);
        };
        let Some(connection) = ctx.pool.get_mut(id) else {
            return Ok(SendStatus::Dead);
        };

        let (data_len, eom) = if connection.send_message.len() <= MAX_DATAGRAM {
            (connection.send_message.len(), NetFlags::EOM)
        } else {
            (MAX_DATAGRAM, NetFlags::empty())
        };

        let sequence = if resend {
            connection.send_sequence.wrapping_sub(1)
        } else {
            let sequence = connection.send_sequence;
            connection.send_sequence = connection.send_sequence.wrapping_add(1);
            sequence
        };
        connection.send_next = false;

        let mut packet = Vec::with_capacity(HEADER_SIZE + data_len);
        encode_header(NetFlags::DATA | eom, HEADER_SIZE + data_len, sequence, &mut packet);
        packet.extend_from_slice(&connection.send_message[..data_len]);

        if let Err(err) = write_packet(&link.socket, &packet, link.remote) {
            log::warn!("datagram write to {} failed: {err}", link.remote);
            return Ok(SendStatus::Dead);
        }
        connection.last_send_time = ctx.net_time;
        if resend {
            self.stats.packets_resent += 1;
        } else {
            self.stats.packets_sent += 1;
        }
        Ok(SendStatus::Sent)
    }

    fn reply(&self, socket: &UdpSocket, packet: &[u8], addr: SocketAddr) {
        if let Err(err) = write_packet(socket, packet, addr) {
            log::debug!("control reply to {addr} failed: {err}");
        }
    }

    fn server_info_reply(&self, ctx: &DriverContext<'_>) -> Result<Option<Vec<u8>>, NetError> {
        let Some(server) = ctx.local_server else {
            return Ok(None);
        };
        let address = self
            .listen_addr()
            .map(|a| a.to_string())
            .unwrap_or_default();
        let users = ctx.server_connections().min(u8::MAX as usize) as u8;
        control_packet(|m| {
            m.write_byte(ccrep::SERVER_INFO)?;
            m.write_string(&address)?;
            m.write_string(&server.hostname)?;
            m.write_string(&server.map)?;
            m.write_byte(users)?;
            m.write_byte(server.max_users)?;
            m.write_byte(NET_PROTOCOL_VERSION)
        })
        .map(Some)
    }

    fn reject(&self, socket: &UdpSocket, addr: SocketAddr, reason: &str) -> Result<(), NetError> {
        let packet = control_packet(|m| {
            m.write_byte(ccrep::REJECT)?;
            m.write_string(reason)
        })?;
        self.reply(socket, &packet, addr);
        Ok(())
    }

    fn accept_packet(port: u16) -> Result<Vec<u8>, NetError> {
        control_packet(|m| {
            m.write_byte(ccrep::ACCEPT)?;
            m.write_long(port as i32)
        })
    }

    fn handshake(
        &mut self,
        ctx: &mut DriverContext<'_>,
        socket: &UdpSocket,
        server: SocketAddr,
    ) -> Result<Option<SocketAddr>, NetError> {
        let request = control_packet(|m| {
            m.write_byte(ccreq::CONNECT)?;
            m.write_string(GAME_NAME)?;
            m.write_byte(NET_PROTOCOL_VERSION)
        })?;

        let mut buf = vec![0u8; NET_MAXMESSAGE];
        let mut reply: Option<usize> = None;
        for attempt in 0..ctx.config.connect_attempts {
            write_packet(socket, &request, server)?;
            let start = ctx.refresh_time();
            while reply.is_none() && ctx.refresh_time() - start < ctx.config.connect_attempt_secs {
                match read_packet(socket, &mut buf)? {
                    Some((len, from)) if compare_addr(&from, &server) == 0 => {
                        if open_control(&buf[..len]).is_some() {
                            reply = Some(len);
                        }
                    }
                    Some(_) => {}
                    None => ctx.clock.sleep(Duration::from_millis(5)),
                }
            }
            if reply.is_some() {
                break;
            }
            if attempt + 1 < ctx.config.connect_attempts {
                log::info!("still trying...");
            }
        }

        let Some(len) = reply else {
            log::warn!("no response from {server}");
            return Ok(None);
        };
        let Some(mut reader) = open_control(&buf[..len]) else {
            return Ok(None);
        };
        match reader.read_byte() {
            code if code == ccrep::REJECT as i32 => {
                log::warn!("connection rejected: {}", reader.read_string().trim_end());
                Ok(None)
            }
            code if code == ccrep::ACCEPT as i32 => {
                let port = reader.read_long();
                if reader.bad_read() || !(1..=u16::MAX as i32).contains(&port) {
                    log::warn!("bad accept from {server}");
                    return Ok(None);
                }
                Ok(Some(SocketAddr::new(server.ip(), port as u16)))
            }
            _ => {
                log::warn!("bad response from {server}");
                Ok(None)
            }
        }
    }

    /// Handles one control packet that arrived on the listening socket.
    fn handle_control(
        &mut self,
        ctx: &mut DriverContext<'_>,
        len: usize,
        from: SocketAddr,
    ) -> Result<Option<ConnectionId>, NetError> {
        let packet = self.packet[..len].to_vec();
        let Some(mut reader) = open_control(&packet) else {
            return Ok(None);
        };
        let command = reader.read_byte();

        if command == ccreq::SERVER_INFO as i32 {
            if reader.read_string() != GAME_NAME {
                return Ok(None);
            }
            if let Some(reply) = self.server_info_reply(ctx)?
                && let Some(socket) = &self.accept
            {
                self.reply(socket, &reply, from);
            }
            return Ok(None);
        }

        if command != ccreq::CONNECT as i32 || reader.read_string() != GAME_NAME {
            return Ok(None);
        }
        let Some(accept) = self.accept.take() else {
            return Ok(None);
        };
        let result = self.accept_client(ctx, &accept, &mut reader, from);
        self.accept = Some(accept);
        result
    }

    fn accept_client(
        &mut self,
        ctx: &mut DriverContext<'_>,
        accept: &UdpSocket,
        reader: &mut MessageReader<'_>,
        from: SocketAddr,
    ) -> Result<Option<ConnectionId>, NetError> {
        if reader.read_byte() != NET_PROTOCOL_VERSION as i32 {
            self.reject(accept, from, "Incompatible version.\n")?;
            return Ok(None);
        }

        let existing: Vec<ConnectionId> = ctx
            .pool
            .active()
            .filter(|id| {
                ctx.pool
                    .get(*id)
                    .is_some_and(|c| c.driver == ctx.driver_index)
            })
            .collect();
        for id in existing {
            let Some(link) = self.links.get(&id) else {
                continue;
            };
            match compare_addr(&from, &link.remote) {
                -1 => continue,
                0 if ctx
                    .pool
                    .get(id)
                    .is_some_and(|c| ctx.net_time - c.connect_time < DUPLICATE_CONNECT_WINDOW) =>
                {
                    let port = link.socket.local_addr()?.port();
                    self.reply(accept, &Self::accept_packet(port)?, from);
                    return Ok(None);
                }
                _ => {
                    // Coming back after a crash; drop the old connection and
                    // let the retry get through.
                    log::info!("dropping stale connection {id} from {from}");
                    self.close(ctx, id);
                    ctx.pool.release(id);
                    return Ok(None);
                }
            }
        }

        if ctx.server_connections() >= ctx.max_clients {
            self.reject(accept, from, "Server is full.\n")?;
            return Ok(None);
        }
        let Some(id) = ctx
            .pool
            .allocate(&from.to_string(), ctx.driver_index, ctx.net_time)
        else {
            self.reject(accept, from, "Server is full.\n")?;
            return Ok(None);
        };

        let socket = match open_socket(0) {
            Ok(socket) => socket,
            Err(err) => {
                log::warn!("could not open a socket for {from}: {err}");
                ctx.pool.release(id);
                return Ok(None);
            }
        };
        let port = socket.local_addr()?.port();
        self.links.insert(
            id,
            Link {
                socket,
                remote: from,
            },
        );
        self.reply(accept, &Self::accept_packet(port)?, from);
        log::info!("accepted {from} as {id}");
        Ok(Some(id))
    }
}

impl Driver for DatagramDriver {
    fn name(&self) -> &'static str {
        "Datagram"
    }

    fn init(&mut self, ctx: &mut DriverContext<'_>) -> bool {
        if !ctx.config.enable_datagram {
            return false;
        }
        match open_socket(0) {
            Ok(socket) => {
                if let Err(err) = socket.set_broadcast(true) {
                    log::debug!("broadcast unavailable: {err}");
                }
                self.control = Some(socket);
                self.initialized = true;
                true
            }
            Err(err) => {
                log::warn!("UDP unavailable: {err}");
                false
            }
        }
    }

    fn initialized(&self) -> bool {
        self.initialized
    }

    fn listen(&mut self, ctx: &mut DriverContext<'_>, enable: bool) -> Result<(), NetError> {
        if !enable {
            if self.accept.take().is_some() {
                log::info!("stopped listening");
            }
            return Ok(());
        }
        if self.accept.is_some() {
            return Ok(());
        }
        let socket = open_socket(ctx.hostport)?;
        log::info!("listening on {}", socket.local_addr()?);
        self.accept = Some(socket);
        Ok(())
    }

    fn search_for_hosts(&mut self, ctx: &mut DriverContext<'_>, xmit: bool) {
        let Some(control) = self.control.take() else {
            return;
        };

        if xmit {
            let request = control_packet(|m| {
                m.write_byte(ccreq::SERVER_INFO)?;
                m.write_string(GAME_NAME)?;
                m.write_byte(NET_PROTOCOL_VERSION)
            });
            let broadcast = SocketAddr::from((Ipv4Addr::BROADCAST, ctx.hostport));
            match request {
                Ok(request) => {
                    if let Err(err) = write_packet(&control, &request, broadcast) {
                        log::debug!("broadcast failed: {err}");
                    }
                }
                Err(err) => log::warn!("could not build server query: {err}"),
            }
        }

        let own_port = self.listen_addr().map(|a| a.port());
        let mut buf = vec![0u8; NET_MAXMESSAGE];
        while let Ok(Some((len, from))) = read_packet(&control, &mut buf) {
            if own_port == Some(from.port()) || ctx.host_cache.is_full() {
                continue;
            }
            let Some(mut reader) = open_control(&buf[..len]) else {
                continue;
            };
            if reader.read_byte() != ccrep::SERVER_INFO as i32 {
                continue;
            }
            let _advertised = reader.read_string();
            let cname = from.to_string();
            if ctx.host_cache.contains_address(&cname) {
                continue;
            }
            let mut name = reader.read_string();
            let map = reader.read_string();
            let users = reader.read_byte().max(0) as u8;
            let max_users = reader.read_byte().max(0) as u8;
            if reader.read_byte() != NET_PROTOCOL_VERSION as i32 {
                name.insert(0, '*');
            }
            if reader.bad_read() {
                continue;
            }
            ctx.host_cache.add(HostCacheEntry {
                name,
                map,
                users,
                max_users,
                driver: ctx.driver_index,
                cname,
            });
        }
        self.control = Some(control);
    }

    fn connect(
        &mut self,
        ctx: &mut DriverContext<'_>,
        host: &str,
    ) -> Result<Option<ConnectionId>, NetError> {
        let Some(server) = resolve(host, ctx.hostport) else {
            return Ok(None);
        };

        let socket = open_socket(0)?;
        let Some(id) = ctx
            .pool
            .allocate(&server.to_string(), ctx.driver_index, ctx.net_time)
        else {
            return Err(NetError::NoFreeConnection);
        };

        log::info!("trying {server}...");
        let remote = match self.handshake(ctx, &socket, server) {
            Ok(Some(remote)) => remote,
            Ok(None) => {
                ctx.pool.release(id);
                return Ok(None);
            }
            Err(err) => {
                ctx.pool.release(id);
                return Err(err);
            }
        };

        log::info!("connection accepted by {server}");
        let now = ctx.refresh_time();
        if let Some(connection) = ctx.pool.get_mut(id) {
            connection.last_message_time = now;
        }
        self.links.insert(id, Link { socket, remote });
        Ok(Some(id))
    }

    fn check_new_connections(
        &mut self,
        ctx: &mut DriverContext<'_>,
    ) -> Result<Option<ConnectionId>, NetError> {
        let Some(accept) = &self.accept else {
            return Ok(None);
        };
        let mut packet = std::mem::take(&mut self.packet);
        packet.resize(NET_MAXMESSAGE, 0);
        let read = read_packet(accept, &mut packet);
        self.packet = packet;

        match read? {
            Some((len, from)) if len >= 4 => self.handle_control(ctx, len, from),
            _ => Ok(None),
        }
    }

    fn get_message(
        &mut self,
        ctx: &mut DriverContext<'_>,
        id: ConnectionId,
    ) -> Result<Received, NetError> {
        let Some(connection) = ctx.pool.get(id) else {
            return Ok(Received::Dead);
        };
        if !connection.can_send && ctx.net_time - connection.last_send_time > RESEND_INTERVAL {
            self.send_fragment(ctx, id, true)?;
        }

        let Some(link) = self.links.get(&id) else {
            return Ok(Received::Dead);
        };
        let mut buf = [0u8; DATAGRAM_SIZE];
        let mut received = Received::Nothing;

        loop {
            let (len, from) = match read_packet(&link.socket, &mut buf) {
                Ok(Some(packet)) => packet,
                Ok(None) => break,
                Err(err) => {
                    log::warn!("read error on {id}: {err}");
                    return Ok(Received::Dead);
                }
            };
            if from != link.remote {
                continue;
            }
            if len < HEADER_SIZE {
                self.stats.short_packets += 1;
                continue;
            }
            let Some((flags, length)) = decode_word(&buf) else {
                continue;
            };
            if flags.contains(NetFlags::CTL) {
                continue;
            }
            let length = length.clamp(HEADER_SIZE, len);
            let sequence = u32::from_be_bytes([buf[4], buf[5], buf[6], buf[7]]);
            let payload = &buf[HEADER_SIZE..length];
            self.stats.packets_received += 1;

            let Some(connection) = ctx.pool.get_mut(id) else {
                return Ok(Received::Dead);
            };

            if flags.contains(NetFlags::UNRELIABLE) {
                if sequence < connection.unreliable_receive_sequence {
                    log::debug!("got a stale datagram");
                    break;
                }
                if sequence != connection.unreliable_receive_sequence {
                    let count = sequence - connection.unreliable_receive_sequence;
                    self.stats.dropped_datagrams += count as u64;
                    log::debug!("dropped {count} datagram(s)");
                }
                connection.unreliable_receive_sequence = sequence.wrapping_add(1);
                ctx.net_message.clear();
                ctx.net_message.write(payload)?;
                received = Received::Unreliable;
                break;
            }

            if flags.contains(NetFlags::ACK) {
                if sequence != connection.send_sequence.wrapping_sub(1) {
                    log::debug!("stale ACK received");
                    continue;
                }
                if sequence == connection.ack_sequence {
                    connection.ack_sequence = connection.ack_sequence.wrapping_add(1);
                    if connection.ack_sequence != connection.send_sequence {
                        log::debug!("ack sequencing error");
                    }
                } else {
                    log::debug!("duplicate ACK received");
                    continue;
                }
                if connection.send_message.len() > MAX_DATAGRAM {
                    connection.send_message.drain(..MAX_DATAGRAM);
                    connection.send_next = true;
                } else {
                    connection.send_message.clear();
                    connection.can_send = true;
                }
                continue;
            }

            if flags.contains(NetFlags::DATA) {
                let mut ack = Vec::with_capacity(HEADER_SIZE);
                encode_header(NetFlags::ACK, HEADER_SIZE, sequence, &mut ack);
                if let Err(err) = write_packet(&link.socket, &ack, from) {
                    log::debug!("ack to {from} failed: {err}");
                }

                if sequence != connection.receive_sequence {
                    self.stats.received_duplicates += 1;
                    continue;
                }
                connection.receive_sequence = connection.receive_sequence.wrapping_add(1);

                if connection.receive_message.len() + payload.len() > NET_MAXMESSAGE {
                    return Err(NetError::MessageTooLarge(
                        connection.receive_message.len() + payload.len(),
                    ));
                }
                if flags.contains(NetFlags::EOM) {
                    ctx.net_message.clear();
                    ctx.net_message.write(&connection.receive_message)?;
                    ctx.net_message.write(payload)?;
                    connection.receive_message.clear();
                    received = Received::Reliable;
                    break;
                }
                connection.receive_message.extend_from_slice(payload);
            }
        }

        if ctx.pool.get(id).is_some_and(|c| c.send_next) {
            self.send_fragment(ctx, id, false)?;
        }
        Ok(received)
    }

    fn send_message(
        &mut self,
        ctx: &mut DriverContext<'_>,
        id: ConnectionId,
        data: &[u8],
    ) -> Result<SendStatus, NetError> {
        if data.len() > NET_MAXMESSAGE {
            return Err(NetError::MessageTooLarge(data.len()));
        }
        let Some(connection) = ctx.pool.get_mut(id) else {
            return Ok(SendStatus::Dead);
        };
        if !connection.can_send {
            log::warn!("reliable send on {id} while a message is in flight");
            return Ok(SendStatus::Rejected);
        }
        connection.send_message.clear();
        connection.send_message.extend_from_slice(data);
        connection.can_send = false;
        self.send_fragment(ctx, id, false)
    }

    fn send_unreliable_message(
        &mut self,
        ctx: &mut DriverContext<'_>,
        id: ConnectionId,
        data: &[u8],
    ) -> Result<SendStatus, NetError> {
        if data.len() > MAX_DATAGRAM {
            return Err(NetError::MessageTooLarge(data.len()));
        }
        let Some(link) = self.links.get(&id) else {
            return Ok(SendStatus::Dead);
        };
        let Some(connection) = ctx.pool.get_mut(id) else {
            return Ok(SendStatus::Dead);
        };

        let mut packet = Vec::with_capacity(HEADER_SIZE + data.len());
        encode_header(
            NetFlags::UNRELIABLE,
            HEADER_SIZE + data.len(),
            connection.unreliable_send_sequence,
            &mut packet,
        );
        packet.extend_from_slice(data);
        connection.unreliable_send_sequence = connection.unreliable_send_sequence.wrapping_add(1);

        if let Err(err) = write_packet(&link.socket, &packet, link.remote) {
            log::warn!("datagram write to {} failed: {err}", link.remote);
            return Ok(SendStatus::Dead);
        }
        self.stats.packets_sent += 1;
        Ok(SendStatus::Sent)
    }

    fn can_send_message(
        &mut self,
        ctx: &mut DriverContext<'_>,
        id: ConnectionId,
    ) -> Result<bool, NetError> {
        if ctx.pool.get(id).is_some_and(|c| c.send_next) {
            self.send_fragment(ctx, id, false)?;
        }
        Ok(ctx.pool.get(id).is_some_and(|c| c.can_send))
    }

    fn close(&mut self, _ctx: &mut DriverContext<'_>, id: ConnectionId) {
        self.links.remove(&id);
    }

    fn shutdown(&mut self, _ctx: &mut DriverContext<'_>) {
        self.links.clear();
        self.accept = None;
        self.control = None;
        self.initialized = false;
    }

    fn log_stats(&self) {
        self.stats.log_summary();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_layout() {
        let mut packet = Vec::new();
        encode_header(NetFlags::DATA | NetFlags::EOM, 12, 7, &mut packet);
        assert_eq!(packet, vec![0x00, 0x09, 0x00, 0x0c, 0, 0, 0, 7]);

        let (flags, length) = decode_word(&packet).unwrap();
        assert_eq!(flags, NetFlags::DATA | NetFlags::EOM);
        assert_eq!(length, 12);
    }

    #[test]
    fn test_control_packet_length_word() {
        let packet = control_packet(|m| {
            m.write_byte(ccreq::CONNECT)?;
            m.write_string(GAME_NAME)?;
            m.write_byte(NET_PROTOCOL_VERSION)
        })
        .unwrap();
        assert_eq!(packet.len(), 4 + 1 + 6 + 1);
        assert_eq!(packet[0], 0x80);
        assert_eq!(packet[3] as usize, packet.len());

        let mut reader = open_control(&packet).unwrap();
        assert_eq!(reader.read_byte(), ccreq::CONNECT as i32);
        assert_eq!(reader.read_string(), GAME_NAME);
        assert_eq!(reader.read_byte(), NET_PROTOCOL_VERSION as i32);
    }

    #[test]
    fn test_control_rejects_truncated() {
        let mut packet = control_packet(|m| m.write_byte(ccreq::SERVER_INFO)).unwrap();
        packet.push(0);
        assert!(open_control(&packet).is_none());
    }

    #[test]
    fn test_compare_addr() {
        let a: SocketAddr = "127.0.0.1:26000".parse().unwrap();
        let b: SocketAddr = "127.0.0.1:26001".parse().unwrap();
        let c: SocketAddr = "10.0.0.1:26000".parse().unwrap();
        assert_eq!(compare_addr(&a, &a), 0);
        assert_eq!(compare_addr(&a, &b), 1);
        assert_eq!(compare_addr(&a, &c), -1);
    }

    #[test]
    fn test_resolve_adds_default_port() {
        let addr = resolve("127.0.0.1", 26000).unwrap();
        assert_eq!(addr.port(), 26000);
        assert_eq!(resolve("127.0.0.1:27500", 26000).unwrap().port(), 27500);
    }
}
