use std::fmt;

/// Error details kept per run; the count keeps growing past this.
const MAX_ERROR_DETAILS: usize = 10;

/// Longest single error description stored in `error_details`.
const MAX_ERROR_LEN: usize = 200;

/// Tally of one reconciliation run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncResult {
    pub new: usize,
    pub updated: usize,
    pub deactivated: usize,
    pub reactivated: usize,
    pub unchanged: usize,
    pub errors: usize,
    pub error_details: Vec<String>,
}

impl SyncResult {
    /// Files from the listing that were matched or created.
    pub fn total_processed(&self) -> usize {
        self.new + self.updated + self.unchanged + self.reactivated
    }

    pub fn has_changes(&self) -> bool {
        self.new + self.updated + self.deactivated + self.reactivated > 0
    }

    pub fn record_error(&mut self, file_name: &str, error: &anyhow::Error) {
        self.errors += 1;
        if self.error_details.len() < MAX_ERROR_DETAILS {
            let mut detail = format!("{}: {:#}", file_name, error);
            if detail.len() > MAX_ERROR_LEN {
                let mut cut = MAX_ERROR_LEN;
                while !detail.is_char_boundary(cut) {
                    cut -= 1;
                }
                detail.truncate(cut);
                detail.push_str("...");
            }
            self.error_details.push(detail);
        }
    }
}

impl fmt::Display for SyncResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} new, {} updated, {} unchanged, {} reactivated, {} deactivated, {} errors",
            self.new, self.updated, self.unchanged, self.reactivated, self.deactivated, self.errors
        )
    }
}
