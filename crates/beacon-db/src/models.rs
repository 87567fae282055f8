/// Database-only row types. Display rows live in beacon-types; these carry
/// columns that never leave the server.
use beacon_types::models::PreviousStatus;

pub struct UserRow {
    pub id: String,
    pub username: String,
    pub password: String,
    pub role: String,
    pub created_at: String,
}

/// A row after a committed mutation, with its soft-delete state before it.
#[derive(Debug, Clone)]
pub struct Mutated<R> {
    pub row: R,
    pub previous_status: PreviousStatus,
    /// False when a guard or an empty change left the row as it was.
    pub applied: bool,
}

/// Result of a bulk operation. Hard deletes only report the removed ids.
#[derive(Debug, Clone)]
pub enum BulkOutcome<R> {
    Updated(Vec<Mutated<R>>),
    Removed(Vec<(String, PreviousStatus)>),
}

impl<R> BulkOutcome<R> {
    pub fn affected(&self) -> usize {
        match self {
            Self::Updated(rows) => rows.len(),
            Self::Removed(ids) => ids.len(),
        }
    }
}
