use super::connection::{Connection, ConnectionId};
use super::driver::{Driver, DriverContext, Received, SendStatus};
use super::error::NetError;
use super::hostcache::HostCacheEntry;
use crate::protocol::NET_MAXMESSAGE;

/// Address the loopback driver answers to.
pub const LOCAL_ADDRESS: &str = "local";

const TAG_RELIABLE: u8 = 1;
const TAG_UNRELIABLE: u8 = 2;
const FRAME_HEADER: usize = 4;

fn align4(n: usize) -> usize {
    (n + 3) & !3
}

/// Appends `[tag, len_lo, len_hi, pad, payload]` and pads the queue to a
/// four byte boundary.
fn push_frame(queue: &mut Vec<u8>, tag: u8, data: &[u8]) {
    queue.push(tag);
    queue.extend_from_slice(&(data.len() as u16).to_le_bytes());
    queue.push(0);
    queue.extend_from_slice(data);
    let aligned = align4(queue.len());
    queue.resize(aligned, 0);
}

/// In-process transport pairing one client connection with one server
/// connection.
#[derive(Debug, Default)]
pub struct LoopbackDriver {
    initialized: bool,
    client: Option<ConnectionId>,
    server: Option<ConnectionId>,
    connect_pending: bool,
}

impl LoopbackDriver {
    pub fn new() -> Self {
        Self::default()
    }

    fn reset(connection: &mut Connection) {
        connection.reset_buffers();
        connection.send_sequence = 0;
        connection.ack_sequence = 0;
        connection.receive_sequence = 0;
        connection.unreliable_send_sequence = 0;
        connection.unreliable_receive_sequence = 0;
    }

    fn live_slot(
        ctx: &mut DriverContext<'_>,
        slot: Option<ConnectionId>,
        address: &str,
    ) -> Result<ConnectionId, NetError> {
        if let Some(id) = slot
            && let Some(connection) = ctx.pool.get_mut(id)
        {
            Self::reset(connection);
            return Ok(id);
        }
        ctx.pool
            .allocate(address, ctx.driver_index, ctx.net_time)
            .ok_or(NetError::NoFreeConnection)
    }

    fn send_frame(
        ctx: &mut DriverContext<'_>,
        id: ConnectionId,
        tag: u8,
        data: &[u8],
    ) -> Result<SendStatus, NetError> {
        let Some(peer) = ctx.pool.get(id).and_then(|c| c.peer) else {
            return Ok(SendStatus::Dead);
        };
        let Some((sender, receiver)) = ctx.pool.pair_mut(id, peer) else {
            return Ok(SendStatus::Dead);
        };

        let pending = receiver.receive_message.len();
        if pending + data.len() + FRAME_HEADER > NET_MAXMESSAGE {
            if tag == TAG_RELIABLE {
                return Err(NetError::LoopbackOverflow {
                    pending,
                    length: data.len(),
                    max: NET_MAXMESSAGE,
                });
            }
            return Ok(SendStatus::Rejected);
        }

        push_frame(&mut receiver.receive_message, tag, data);
        if tag == TAG_RELIABLE {
            sender.can_send = false;
            sender.send_sequence = sender.send_sequence.wrapping_add(1);
        } else {
            sender.unreliable_send_sequence = sender.unreliable_send_sequence.wrapping_add(1);
        }
        Ok(SendStatus::Sent)
    }
}

impl Driver for LoopbackDriver {
    fn name(&self) -> &'static str {
        "Loopback"
    }

    fn init(&mut self, _ctx: &mut DriverContext<'_>) -> bool {
        self.initialized = true;
        true
    }

    fn initialized(&self) -> bool {
        self.initialized
    }

    fn listen(&mut self, _ctx: &mut DriverContext<'_>, _enable: bool) -> Result<(), NetError> {
        Ok(())
    }

    fn search_for_hosts(&mut self, ctx: &mut DriverContext<'_>, _xmit: bool) {
        let Some(server) = ctx.local_server else {
            return;
        };
        let name = if server.hostname == "UNNAMED" {
            LOCAL_ADDRESS.to_string()
        } else {
            server.hostname.clone()
        };
        let users = ctx.server_connections().min(u8::MAX as usize) as u8;
        let entry = HostCacheEntry {
            name,
            map: server.map.clone(),
            users,
            max_users: server.max_users,
            driver: ctx.driver_index,
            cname: LOCAL_ADDRESS.to_string(),
        };
        if !ctx.host_cache.contains_address(LOCAL_ADDRESS) {
            ctx.host_cache.add(entry);
        }
    }

    fn connect(
        &mut self,
        ctx: &mut DriverContext<'_>,
        host: &str,
    ) -> Result<Option<ConnectionId>, NetError> {
        if host != LOCAL_ADDRESS {
            return Ok(None);
        }

        self.connect_pending = true;

        let client = Self::live_slot(ctx, self.client, "localhost")?;
        self.client = Some(client);
        let server = match Self::live_slot(ctx, self.server, "LOCAL") {
            Ok(server) => server,
            Err(err) => {
                ctx.pool.release(client);
                self.client = None;
                self.connect_pending = false;
                return Err(err);
            }
        };
        self.server = Some(server);

        if let Some((c, s)) = ctx.pool.pair_mut(client, server) {
            c.peer = Some(server);
            s.peer = Some(client);
            s.server_side = true;
        }
        Ok(Some(client))
    }

    fn check_new_connections(
        &mut self,
        ctx: &mut DriverContext<'_>,
    ) -> Result<Option<ConnectionId>, NetError> {
        if !self.connect_pending {
            return Ok(None);
        }
        self.connect_pending = false;

        let Some(server) = self.server else {
            return Ok(None);
        };
        let Some(connection) = ctx.pool.get_mut(server) else {
            return Ok(None);
        };
        connection.send_message.clear();
        connection.receive_message.clear();
        connection.can_send = true;
        Ok(Some(server))
    }

    fn get_message(
        &mut self,
        ctx: &mut DriverContext<'_>,
        id: ConnectionId,
    ) -> Result<Received, NetError> {
        let Some(connection) = ctx.pool.get_mut(id) else {
            return Ok(Received::Dead);
        };
        if connection.receive_message.len() < FRAME_HEADER {
            return Ok(Received::Nothing);
        }

        let queue = &connection.receive_message;
        let tag = queue[0];
        let length = u16::from_le_bytes([queue[1], queue[2]]) as usize;
        let end = (FRAME_HEADER + length).min(queue.len());
        ctx.net_message.clear();
        ctx.net_message.write(&queue[FRAME_HEADER..end])?;

        let consumed = align4(FRAME_HEADER + length).min(connection.receive_message.len());
        connection.receive_message.drain(..consumed);

        let received = if tag == TAG_RELIABLE {
            connection.receive_sequence = connection.receive_sequence.wrapping_add(1);
            Received::Reliable
        } else {
            connection.unreliable_receive_sequence =
                connection.unreliable_receive_sequence.wrapping_add(1);
            Received::Unreliable
        };

        let peer = connection.peer;
        if received == Received::Reliable
            && let Some(sender) = peer.and_then(|p| ctx.pool.get_mut(p))
        {
            sender.can_send = true;
            sender.ack_sequence = sender.send_sequence;
        }
        Ok(received)
    }

    fn send_message(
        &mut self,
        ctx: &mut DriverContext<'_>,
        id: ConnectionId,
        data: &[u8],
    ) -> Result<SendStatus, NetError> {
        Self::send_frame(ctx, id, TAG_RELIABLE, data)
    }

    fn send_unreliable_message(
        &mut self,
        ctx: &mut DriverContext<'_>,
        id: ConnectionId,
        data: &[u8],
    ) -> Result<SendStatus, NetError> {
        Self::send_frame(ctx, id, TAG_UNRELIABLE, data)
    }

    fn can_send_message(
        &mut self,
        ctx: &mut DriverContext<'_>,
        id: ConnectionId,
    ) -> Result<bool, NetError> {
        Ok(ctx
            .pool
            .get(id)
            .is_some_and(|c| c.peer.is_some() && c.can_send))
    }

    fn close(&mut self, ctx: &mut DriverContext<'_>, id: ConnectionId) {
        if let Some(connection) = ctx.pool.get_mut(id) {
            let peer = connection.peer.take();
            connection.reset_buffers();
            if let Some(other) = peer.and_then(|p| ctx.pool.get_mut(p)) {
                other.peer = None;
            }
        }
        if self.client == Some(id) {
            self.client = None;
        } else if self.server == Some(id) {
            self.server = None;
        }
    }

    fn shutdown(&mut self, _ctx: &mut DriverContext<'_>) {
        self.initialized = false;
        self.connect_pending = false;
    }

    fn is_local(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frames_are_aligned() {
        let mut queue = Vec::new();
        push_frame(&mut queue, TAG_RELIABLE, b"abcde");
        assert_eq!(queue.len(), 12);
        assert_eq!(&queue[..4], &[1, 5, 0, 0]);
        push_frame(&mut queue, TAG_UNRELIABLE, b"");
        assert_eq!(queue.len(), 16);
        assert_eq!(queue[12], TAG_UNRELIABLE);
    }

    #[test]
    fn test_align4() {
        assert_eq!(align4(0), 0);
        assert_eq!(align4(1), 4);
        assert_eq!(align4(4), 4);
        assert_eq!(align4(9), 12);
    }
}
