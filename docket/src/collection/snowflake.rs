use chrono::Utc;
use log::info;
use parking_lot::Mutex;
use rand::rngs::OsRng;
use rand::Rng;

/// Snowflake-style id generator: 41 bits of milliseconds since a fixed
/// epoch, 10 bits of node id, 12 bits of per-millisecond sequence.
///
/// Ids are unique within a process and roughly timestamp-ordered, which
/// keeps freshly inserted records clustered at the tail of the record store.
pub struct SnowflakeIdGenerator {
    node_id: u64,
    state: Mutex<GeneratorState>,
    sequence_bits: u64,
    sequence_mask: u64,
    timestamp_left_shift: u64,
    epoch: u64,
}

struct GeneratorState {
    sequence: u64,
    last_timestamp: u64,
}

fn current_millis() -> u64 {
    Utc::now().timestamp_millis().max(0) as u64
}

impl SnowflakeIdGenerator {
    pub fn new() -> Self {
        let node_id_bits = 10;
        let sequence_bits = 12;
        let max_node_id = (1u64 << node_id_bits) - 1;
        let sequence_mask = (1u64 << sequence_bits) - 1;
        let timestamp_left_shift = sequence_bits + node_id_bits;
        let epoch = 1288834974657;

        let node_id = OsRng.gen_range(1..=max_node_id);
        info!("Initialized id generator with node id: {}", node_id);

        SnowflakeIdGenerator {
            node_id,
            state: Mutex::new(GeneratorState {
                sequence: 0,
                last_timestamp: 0,
            }),
            sequence_bits,
            sequence_mask,
            timestamp_left_shift,
            epoch,
        }
    }

    pub fn get_id(&self) -> u64 {
        let mut state = self.state.lock();

        let mut timestamp = current_millis();
        // clock moved backwards: stick to the last timestamp and burn
        // sequence numbers until it catches up
        if timestamp < state.last_timestamp {
            timestamp = state.last_timestamp;
        }

        if timestamp == state.last_timestamp {
            state.sequence = (state.sequence + 1) & self.sequence_mask;
            if state.sequence == 0 {
                // sequence exhausted within this millisecond
                while timestamp <= state.last_timestamp {
                    timestamp = current_millis();
                }
            }
        } else {
            state.sequence = 0;
        }
        state.last_timestamp = timestamp;

        ((timestamp - self.epoch) << self.timestamp_left_shift)
            | (self.node_id << self.sequence_bits)
            | state.sequence
    }
}

impl Default for SnowflakeIdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generates_unique_ids() {
        let generator = SnowflakeIdGenerator::new();
        let mut ids = Vec::new();
        for _ in 0..1000 {
            ids.push(generator.get_id());
        }

        let mut unique_ids = ids.clone();
        unique_ids.sort();
        unique_ids.dedup();
        assert_eq!(ids.len(), unique_ids.len());
    }

    #[test]
    fn ids_are_monotonic() {
        let generator = SnowflakeIdGenerator::new();
        let first = generator.get_id();
        let second = generator.get_id();
        assert!(second > first);
    }

    #[test]
    fn concurrent_generation_stays_unique() {
        use std::sync::Arc;
        use std::thread;

        let generator = Arc::new(SnowflakeIdGenerator::new());
        let mut handles = vec![];

        for _ in 0..8 {
            let generator = Arc::clone(&generator);
            handles.push(thread::spawn(move || {
                (0..500).map(|_| generator.get_id()).collect::<Vec<_>>()
            }));
        }

        let mut all_ids = Vec::new();
        for handle in handles {
            all_ids.extend(handle.join().unwrap());
        }

        let mut unique_ids = all_ids.clone();
        unique_ids.sort();
        unique_ids.dedup();
        assert_eq!(all_ids.len(), unique_ids.len());
    }

    #[test]
    fn node_id_is_embedded() {
        let generator = SnowflakeIdGenerator::new();
        let id = generator.get_id();
        let node_id = (id >> generator.sequence_bits) & ((1 << 10) - 1);
        assert_eq!(node_id, generator.node_id);
    }
}
