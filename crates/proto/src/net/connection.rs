use crate::protocol::NET_MAXMESSAGE;

/// Handle into the connection pool. Stale handles (slot freed and reused)
/// resolve to nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId {
    index: u32,
    generation: u32,
}

impl ConnectionId {
    pub fn index(&self) -> usize {
        self.index as usize
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}.{}", self.index, self.generation)
    }
}

#[derive(Debug)]
pub struct Connection {
    pub address: String,
    pub driver: usize,
    pub disconnected: bool,
    pub can_send: bool,
    pub send_next: bool,
    /// Accepted by a listening driver rather than opened by `connect`.
    pub server_side: bool,
    /// Stable identity used by the call log.
    pub session_id: i64,
    pub connect_time: f64,
    pub last_message_time: f64,
    pub last_send_time: f64,
    pub ack_sequence: u32,
    pub send_sequence: u32,
    pub unreliable_send_sequence: u32,
    pub receive_sequence: u32,
    pub unreliable_receive_sequence: u32,
    pub send_message: Vec<u8>,
    pub receive_message: Vec<u8>,
    /// Loopback partner.
    pub peer: Option<ConnectionId>,
}

impl Connection {
    fn new(address: &str, driver: usize, session_id: i64, now: f64) -> Self {
        Self {
            address: address.to_string(),
            driver,
            disconnected: false,
            can_send: true,
            send_next: false,
            server_side: false,
            session_id,
            connect_time: now,
            last_message_time: now,
            last_send_time: 0.0,
            ack_sequence: 0,
            send_sequence: 0,
            unreliable_send_sequence: 0,
            receive_sequence: 0,
            unreliable_receive_sequence: 0,
            send_message: Vec::with_capacity(NET_MAXMESSAGE),
            receive_message: Vec::with_capacity(NET_MAXMESSAGE),
            peer: None,
        }
    }

    pub fn is_timed_out(&self, now: f64, timeout: f64) -> bool {
        now - self.last_message_time > timeout
    }

    pub fn touch(&mut self, now: f64) {
        self.last_message_time = now;
    }

    /// Clears buffered traffic and reopens the send gate.
    pub fn reset_buffers(&mut self) {
        self.send_message.clear();
        self.receive_message.clear();
        self.can_send = true;
        self.send_next = false;
    }

    pub fn sequences_consistent(&self) -> bool {
        self.ack_sequence <= self.send_sequence
    }
}

#[derive(Debug, Default)]
struct Slot {
    generation: u32,
    connection: Option<Connection>,
}

/// Fixed-size arena of connections with a free list and an active list.
#[derive(Debug)]
pub struct ConnectionPool {
    slots: Vec<Slot>,
    free: Vec<u32>,
    active: Vec<ConnectionId>,
    next_session: i64,
}

impl ConnectionPool {
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: (0..capacity).map(|_| Slot::default()).collect(),
            free: (0..capacity as u32).rev().collect(),
            active: Vec::with_capacity(capacity),
            next_session: 1,
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    pub fn free_count(&self) -> usize {
        self.free.len()
    }

    pub fn allocate(&mut self, address: &str, driver: usize, now: f64) -> Option<ConnectionId> {
        let index = self.free.pop()?;
        let slot = &mut self.slots[index as usize];
        slot.generation = slot.generation.wrapping_add(1);

        let session_id = self.next_session;
        self.next_session += 1;
        slot.connection = Some(Connection::new(address, driver, session_id, now));

        let id = ConnectionId {
            index,
            generation: slot.generation,
        };
        self.active.push(id);
        Some(id)
    }

    pub fn release(&mut self, id: ConnectionId) -> Option<Connection> {
        let slot = self.slots.get_mut(id.index())?;
        if slot.generation != id.generation {
            return None;
        }
        let connection = slot.connection.take()?;
        self.active.retain(|active| *active != id);
        self.free.push(id.index);
        Some(connection)
    }

    pub fn contains(&self, id: ConnectionId) -> bool {
        self.get(id).is_some()
    }

    pub fn get(&self, id: ConnectionId) -> Option<&Connection> {
        self.slots
            .get(id.index())
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.connection.as_ref())
    }

    pub fn get_mut(&mut self, id: ConnectionId) -> Option<&mut Connection> {
        self.slots
            .get_mut(id.index())
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.connection.as_mut())
    }

    /// Mutable access to two distinct connections at once.
    pub fn pair_mut(
        &mut self,
        a: ConnectionId,
        b: ConnectionId,
    ) -> Option<(&mut Connection, &mut Connection)> {
        if a.index == b.index {
            return None;
        }
        self.get(a)?;
        self.get(b)?;

        let (low, high, swapped) = if a.index < b.index {
            (a.index(), b.index(), false)
        } else {
            (b.index(), a.index(), true)
        };
        let (head, tail) = self.slots.split_at_mut(high);
        let first = head[low].connection.as_mut()?;
        let second = tail[0].connection.as_mut()?;
        if swapped {
            Some((second, first))
        } else {
            Some((first, second))
        }
    }

    pub fn active(&self) -> impl Iterator<Item = ConnectionId> + '_ {
        self.active.iter().copied()
    }

    pub fn find_by_session(&self, session_id: i64) -> Option<ConnectionId> {
        self.active()
            .find(|id| self.get(*id).is_some_and(|c| c.session_id == session_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allocate_until_full() {
        let mut pool = ConnectionPool::new(2);
        let a = pool.allocate("a", 0, 0.0).unwrap();
        let b = pool.allocate("b", 0, 0.0).unwrap();
        assert!(pool.allocate("c", 0, 0.0).is_none());
        assert_eq!(pool.active_count(), 2);

        pool.release(a).unwrap();
        assert_eq!(pool.free_count(), 1);
        assert!(pool.get(b).is_some());
    }

    #[test]
    fn test_stale_handle_after_reuse() {
        let mut pool = ConnectionPool::new(1);
        let first = pool.allocate("first", 0, 0.0).unwrap();
        pool.release(first);
        let second = pool.allocate("second", 0, 1.0).unwrap();

        assert_eq!(first.index(), second.index());
        assert!(pool.get(first).is_none());
        assert_eq!(pool.get(second).unwrap().address, "second");
        assert!(pool.release(first).is_none());
    }

    #[test]
    fn test_pair_mut_order() {
        let mut pool = ConnectionPool::new(3);
        let a = pool.allocate("a", 0, 0.0).unwrap();
        let b = pool.allocate("b", 0, 0.0).unwrap();

        let (x, y) = pool.pair_mut(b, a).unwrap();
        assert_eq!(x.address, "b");
        assert_eq!(y.address, "a");
        assert!(pool.pair_mut(a, a).is_none());
    }

    #[test]
    fn test_timeout_uses_strict_comparison() {
        let mut pool = ConnectionPool::new(1);
        let id = pool.allocate("x", 1, 0.0).unwrap();
        let conn = pool.get_mut(id).unwrap();
        assert!(!conn.is_timed_out(300.0, 300.0));
        assert!(conn.is_timed_out(301.0, 300.0));
        conn.touch(301.0);
        assert!(!conn.is_timed_out(301.0, 300.0));
    }

    #[test]
    fn test_session_ids_are_unique() {
        let mut pool = ConnectionPool::new(2);
        let a = pool.allocate("a", 0, 0.0).unwrap();
        let b = pool.allocate("b", 0, 0.0).unwrap();
        let sa = pool.get(a).unwrap().session_id;
        let sb = pool.get(b).unwrap().session_id;
        assert_ne!(sa, sb);
        assert_eq!(pool.find_by_session(sb), Some(b));
    }
}
