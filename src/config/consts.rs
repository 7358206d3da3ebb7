// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

use std::time::Duration;

/// Default capacity of a buffer port's raw queue
pub const DEFAULT_RAW_QUEUE_CAPACITY: usize = 10_000;
/// Maximum number of buffer ports registered with one broker at a time
pub const DEFAULT_MAX_BUFFER_PORTS: usize = 10_000;

/// Poll interval used by workers for retrieval and submission
pub const DEFAULT_WORKER_POLL_TIMEOUT: Duration = Duration::from_millis(200);
/// Thread count used when hardware concurrency cannot be determined
pub const FALLBACK_THREADS: usize = 4;

/// Width of every fixed-size header field on the wire
pub const COMMAND_LENGTH: usize = 64;
/// Chunk size for reading result bodies
pub const READ_BUFFER_SIZE: usize = 16_384;
/// Largest payload a peer may announce in a size header
pub const DEFAULT_MAX_PAYLOAD_SIZE: usize = 64 * 1024 * 1024;

pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 10_000;
/// Sleep the server asks of a client when no work is available
pub const DEFAULT_IDLE: Duration = Duration::from_millis(100);
/// How long a server session waits on the broker per attempt
pub const DEFAULT_BROKER_TIMEOUT: Duration = Duration::from_millis(50);
/// Additional broker attempts before a session answers idle
pub const DEFAULT_BROKER_RETRIEVE_RETRIES: u32 = 1;

/// Idle answers in a row a client tolerates (0 = unlimited)
pub const DEFAULT_MAX_STALLS: u32 = 10;
/// Connection attempts per transfer (0 = unlimited)
pub const DEFAULT_MAX_CONNECTION_ATTEMPTS: u32 = 10;
/// First delay between connection attempts, doubled after each failure
pub const INITIAL_CONNECT_BACKOFF: Duration = Duration::from_millis(10);

/// Resubmission rounds for items that did not come back
pub const DEFAULT_MAX_RESUBMISSIONS: u32 = 5;
/// Multiplier on the estimated return time of an iteration
pub const DEFAULT_WAIT_FACTOR: f64 = 2.0;
/// Share of returned items that ends waiting early (0 = wait for all)
pub const DEFAULT_MIN_PARTIAL_RETURN_PERCENTAGE: u16 = 0;

/// Hardware concurrency, falling back to [`FALLBACK_THREADS`].
pub fn default_concurrency() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(FALLBACK_THREADS)
}
