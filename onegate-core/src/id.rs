use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

/// Custom epoch: 2020-01-01T00:00:00Z, milliseconds.
const EPOCH_MS: u64 = 1_577_836_800_000;
const NODE_BITS: u64 = 10;
const SEQUENCE_BITS: u64 = 12;
const MAX_NODE: u64 = (1 << NODE_BITS) - 1;
const MAX_SEQUENCE: u64 = (1 << SEQUENCE_BITS) - 1;

/// Snowflake-style id generator: 41-bit timestamp, 10-bit node, 12-bit
/// sequence. The node (shard) id comes from the `NODE_ID` environment
/// variable when constructed through [`from_env`](IdGenerator::from_env).
///
/// Clonable handle; all clones share one sequence state.
#[derive(Clone)]
pub struct IdGenerator {
    inner: std::sync::Arc<Mutex<GeneratorState>>,
    node: u64,
}

struct GeneratorState {
    last_ms: u64,
    sequence: u64,
}

impl IdGenerator {
    pub fn new(node: u64) -> Self {
        Self {
            inner: std::sync::Arc::new(Mutex::new(GeneratorState {
                last_ms: 0,
                sequence: 0,
            })),
            node: node & MAX_NODE,
        }
    }

    /// Shard id from `NODE_ID`, defaulting to 0.
    pub fn from_env() -> Self {
        let node = std::env::var("NODE_ID")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(0);
        Self::new(node)
    }

    pub fn node(&self) -> u64 {
        self.node
    }

    pub fn next_id(&self) -> i64 {
        let mut state = self.inner.lock().expect("id generator mutex poisoned");
        let mut now = current_ms();

        if now == state.last_ms {
            state.sequence = (state.sequence + 1) & MAX_SEQUENCE;
            if state.sequence == 0 {
                // Sequence exhausted within this millisecond; spin to the next.
                while now <= state.last_ms {
                    now = current_ms();
                }
            }
        } else {
            state.sequence = 0;
        }
        state.last_ms = now;

        let timestamp = now.saturating_sub(EPOCH_MS);
        ((timestamp << (NODE_BITS + SEQUENCE_BITS)) | (self.node << SEQUENCE_BITS) | state.sequence)
            as i64
    }
}

fn current_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
