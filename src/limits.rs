// Hard caps guarding memory and log growth. Policy values live in `config`.

pub const MAX_ROOMS: usize = 10_000;
pub const MAX_BOOKINGS_PER_ROOM: usize = 50_000;
pub const MAX_RULES_PER_ROOM: usize = 512;
pub const MAX_MAINTENANCE_PER_ROOM: usize = 4_096;
pub const MAX_DOCUMENTS_PER_BOOKING: usize = 16;
pub const MAX_FACILITIES_PER_BATCH: usize = 100;

pub const MAX_NAME_LEN: usize = 255;
pub const MAX_TEXT_LEN: usize = 2_000;

/// Upper bound for `ROOMBOOK_MAX_RANGE_DAYS`.
pub const MAX_RANGE_DAYS_CAP: u32 = 366;

/// Extra ULID characters tried when a booking code collides.
pub const MAX_CODE_ATTEMPTS: usize = 8;
