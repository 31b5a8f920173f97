/// `outcome` values on the `stream_session` span and in `SessionTrace`.
/// Keep these stable; dashboards and log queries key on them.
pub const OUTCOME_COMPLETED: &str = "completed";
pub const OUTCOME_CANCELLED: &str = "cancelled";
pub const OUTCOME_FAILED: &str = "failed";
