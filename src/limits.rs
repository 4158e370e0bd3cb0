/// Max seats per batch booking or hold request.
pub const MAX_BATCH_SIZE: usize = 10;

/// Max booking ids in one confirm/release request.
pub const MAX_IDS_PER_REQUEST: usize = 100;

/// Seat numbers are short labels like "12A".
pub const MAX_SEAT_NUMBER_LEN: usize = 16;

/// Train numbers and names.
pub const MAX_TRAIN_LABEL_LEN: usize = 128;

/// Buffered commits between the engine and the WAL writer task.
pub const WAL_CHANNEL_CAPACITY: usize = 4096;
