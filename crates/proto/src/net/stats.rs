/// Message counters kept by the manager. Loopback traffic is not counted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NetStats {
    pub messages_sent: u64,
    pub messages_received: u64,
    pub unreliable_messages_sent: u64,
    pub unreliable_messages_received: u64,
}

/// Datagram-level counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DatagramStats {
    pub packets_sent: u64,
    pub packets_resent: u64,
    pub packets_received: u64,
    pub received_duplicates: u64,
    pub short_packets: u64,
    pub dropped_datagrams: u64,
}

impl NetStats {
    pub fn log_summary(&self) {
        log::info!("unreliable messages sent   = {}", self.unreliable_messages_sent);
        log::info!("unreliable messages recv   = {}", self.unreliable_messages_received);
        log::info!("reliable messages sent     = {}", self.messages_sent);
        log::info!("reliable messages received = {}", self.messages_received);
    }
}

impl DatagramStats {
    pub fn log_summary(&self) {
        log::info!("packetsSent          = {}", self.packets_sent);
        log::info!("packetsReSent        = {}", self.packets_resent);
        log::info!("packetsReceived      = {}", self.packets_received);
        log::info!("receivedDuplicates   = {}", self.received_duplicates);
        log::info!("shortPacketCount     = {}", self.short_packets);
        log::info!("droppedDatagrams     = {}", self.dropped_datagrams);
    }
}
