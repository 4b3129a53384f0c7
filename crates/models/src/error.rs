/// Domain error taxonomy shared by the storage layer and the API surface.
///
/// Every variant except `Database` maps to a stable, user-facing error code;
/// storage-level failures are kept opaque and logged at the edge.
#[derive(Debug, thiserror::Error)]
pub enum DomainError {
    #[error("purchase would exceed the per-user ticket limit")]
    QuotaExceeded,

    #[error("only {available} ticket(s) left, {requested} requested")]
    InsufficientAvailability { requested: i64, available: i64 },

    #[error("competition is not open for entries")]
    CompetitionNotSellable,

    #[error("skill question answered incorrectly")]
    IncorrectAnswer,

    #[error("reservation has expired or is no longer valid")]
    ReservationExpiredOrStale,

    #[error("a winner has already been drawn")]
    AlreadyDrawn,

    #[error("competition is not eligible for a draw")]
    NotEligibleForDraw,

    #[error("win has already been claimed")]
    AlreadyClaimed,

    #[error("competition already has a winner")]
    AlreadyWon,

    #[error("operation is not valid in the current state")]
    InvalidStateTransition,

    #[error("paid amount does not match the reservation")]
    PaymentMismatch,

    #[error("invalid input: {0}")]
    InvalidInput(&'static str),

    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("not authorized")]
    Unauthorized,

    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

pub type Result<T> = std::result::Result<T, DomainError>;

impl DomainError {
    /// Stable machine-readable code surfaced in API responses and logs.
    pub fn code(&self) -> &'static str {
        match self {
            DomainError::QuotaExceeded => "quota_exceeded",
            DomainError::InsufficientAvailability { .. } => "insufficient_availability",
            DomainError::CompetitionNotSellable => "competition_not_sellable",
            DomainError::IncorrectAnswer => "incorrect_answer",
            DomainError::ReservationExpiredOrStale => "reservation_expired",
            DomainError::AlreadyDrawn => "already_drawn",
            DomainError::NotEligibleForDraw => "not_eligible_for_draw",
            DomainError::AlreadyClaimed => "already_claimed",
            DomainError::AlreadyWon => "already_won",
            DomainError::InvalidStateTransition => "invalid_state",
            DomainError::PaymentMismatch => "payment_mismatch",
            DomainError::InvalidInput(_) => "invalid_input",
            DomainError::NotFound(_) => "not_found",
            DomainError::Unauthorized => "unauthorized",
            DomainError::Database(_) => "internal",
        }
    }

    /// True when the underlying cause is a unique-constraint conflict, used
    /// to translate constraint races into their domain meaning.
    pub fn is_unique_violation(&self) -> bool {
        match self {
            DomainError::Database(sqlx::Error::Database(db)) => {
                db.kind() == sqlx::error::ErrorKind::UniqueViolation
            }
            _ => false,
        }
    }
}
