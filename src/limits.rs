//! Hard input limits. Everything a remote caller can size is capped here.

/// Max booking requests tracked per tenant.
pub const MAX_REQUESTS_PER_TENANT: usize = 100_000;

/// Max live schedule events per tenant.
pub const MAX_SCHEDULE_EVENTS_PER_TENANT: usize = 500_000;

/// Max candidate slots on a single request.
pub const MAX_CANDIDATES_PER_REQUEST: usize = 16;

/// Max eligible staff polled on a single request.
pub const MAX_ELIGIBLE_STAFF: usize = 64;

/// Max GMs on a single schedule event.
pub const MAX_GMS_PER_EVENT: usize = 16;

pub const MAX_CUSTOMER_REF_LEN: usize = 256;
pub const MAX_NOTES_LEN: usize = 2_000;
pub const MAX_REASON_LEN: usize = 2_000;
pub const MAX_LABEL_LEN: usize = 256;

/// Widest occupancy query window, in days.
pub const MAX_QUERY_WINDOW_DAYS: i64 = 366;

pub const MAX_TENANTS: usize = 1_000;
pub const MAX_TENANT_NAME_LEN: usize = 256;
