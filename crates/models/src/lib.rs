use serde::{Deserialize, Serialize};
use sqlx::FromRow;

mod error;

pub use error::{DomainError, Result};

// --- Status enums (persisted as TEXT) ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CompetitionStatus {
    Draft,
    Upcoming,
    Active,
    SoldOut,
    Drawing,
    Completed,
    Cancelled,
}

impl CompetitionStatus {
    /// Entries may only be reserved or purchased while ACTIVE.
    pub fn is_sellable(self) -> bool {
        matches!(self, CompetitionStatus::Active)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            CompetitionStatus::Draft => "DRAFT",
            CompetitionStatus::Upcoming => "UPCOMING",
            CompetitionStatus::Active => "ACTIVE",
            CompetitionStatus::SoldOut => "SOLD_OUT",
            CompetitionStatus::Drawing => "DRAWING",
            CompetitionStatus::Completed => "COMPLETED",
            CompetitionStatus::Cancelled => "CANCELLED",
        }
    }
}

impl std::fmt::Display for CompetitionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TicketStatus {
    Available,
    Reserved,
    Sold,
    FreeEntry,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentStatus {
    Pending,
    Succeeded,
    Refunded,
}

/// Actor role carried by the session token. Not persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Admin,
    SuperAdmin,
}

impl Role {
    pub fn is_admin(self) -> bool {
        matches!(self, Role::Admin | Role::SuperAdmin)
    }
}

// --- Rows ---

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Competition {
    pub id: i64,
    pub slug: String,
    pub title: String,
    pub description: Option<String>,
    pub status: CompetitionStatus,
    pub total_tickets: i64,
    pub ticket_price: i64, // pence
    pub max_tickets_per_user: i64,
    pub draw_date: String,
    pub actual_draw_date: Option<String>,
    pub winning_ticket_number: Option<i64>,
    pub question: String,
    pub question_choices: String, // JSON, see `choices()`
    pub created_at: String,
    pub updated_at: String,
}

impl Competition {
    pub fn choices(&self) -> Result<Vec<QuestionChoice>> {
        serde_json::from_str(&self.question_choices)
            .map_err(|_| DomainError::NotFound("question choices"))
    }

    /// Case-insensitive check of a skill-question answer against the one
    /// choice flagged correct.
    pub fn check_answer(&self, answer: &str) -> bool {
        self.choices()
            .map(|choices| {
                choices
                    .iter()
                    .any(|c| c.correct && c.label.trim().eq_ignore_ascii_case(answer.trim()))
            })
            .unwrap_or(false)
    }
}

/// One option of the legally required skill question. Exactly one per
/// competition should carry `correct = true`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuestionChoice {
    pub label: String,
    #[serde(default)]
    pub correct: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Ticket {
    pub competition_id: i64,
    pub ticket_number: i64,
    pub status: TicketStatus,
    pub user_id: Option<String>,
    pub order_id: Option<i64>,
    pub reserved_until: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Order {
    pub id: i64,
    pub competition_id: i64,
    pub user_id: String,
    pub ticket_count: i64,
    pub bonus_ticket_count: i64,
    pub total_amount: i64, // pence
    pub payment_status: PaymentStatus,
    pub payment_ref: String,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Win {
    pub id: i64,
    pub competition_id: i64,
    pub user_id: String,
    pub ticket_number: i64,
    pub claimed_at: Option<String>,
    pub shipped_at: Option<String>,
    pub delivered_at: Option<String>,
    pub tracking_number: Option<String>,
    pub tracking_url: Option<String>,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct AuditEntry {
    pub id: i64,
    pub action: String,
    pub entity: String,
    pub entity_id: String,
    pub actor_user_id: Option<String>,
    pub metadata: String, // serialized AuditDetail
    pub created_at: String,
}

// --- Audit metadata ---

/// Structured audit payload, one variant per privileged action. Serialized
/// into `audit_log.metadata` with the variant name as the `action` tag.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum AuditDetail {
    CompetitionActivated {
        ticket_count: i64,
    },
    FreeEntryGranted {
        ticket_number: i64,
        user_id: String,
    },
    OrderCompleted {
        order_id: i64,
        payment_ref: String,
        ticket_count: i64,
        bonus_ticket_count: i64,
    },
    DrawExecuted {
        method: String,
        entry_count: i64,
        ticket_number: i64,
        winner_user_id: String,
    },
    WinClaimed {
        win_id: i64,
    },
    WinVoided {
        win_id: i64,
        ticket_number: i64,
        reason: String,
    },
    CompetitionCancelled {
        reason: String,
        order_count: i64,
    },
    StatusChanged {
        from: CompetitionStatus,
        to: CompetitionStatus,
    },
}

impl AuditDetail {
    pub fn action(&self) -> &'static str {
        match self {
            AuditDetail::CompetitionActivated { .. } => "competition_activated",
            AuditDetail::FreeEntryGranted { .. } => "free_entry_granted",
            AuditDetail::OrderCompleted { .. } => "order_completed",
            AuditDetail::DrawExecuted { .. } => "draw_executed",
            AuditDetail::WinClaimed { .. } => "win_claimed",
            AuditDetail::WinVoided { .. } => "win_voided",
            AuditDetail::CompetitionCancelled { .. } => "competition_cancelled",
            AuditDetail::StatusChanged { .. } => "status_changed",
        }
    }
}

// --- Bonus tiers ---

/// Free extra tickets granted at a paid-quantity threshold. Business
/// configuration, not an invariant; the active table lives in config.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct BonusTier {
    pub min_quantity: i64,
    pub bonus: i64,
}

/// Bonus ticket count for a paid quantity: the largest threshold at or
/// below `quantity` wins. Tiers need not be sorted.
pub fn bonus_for(tiers: &[BonusTier], quantity: i64) -> i64 {
    tiers
        .iter()
        .filter(|t| t.min_quantity <= quantity)
        .max_by_key(|t| t.min_quantity)
        .map(|t| t.bonus)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn default_tiers() -> Vec<BonusTier> {
        vec![
            BonusTier { min_quantity: 10, bonus: 1 },
            BonusTier { min_quantity: 15, bonus: 2 },
            BonusTier { min_quantity: 20, bonus: 3 },
            BonusTier { min_quantity: 50, bonus: 5 },
        ]
    }

    #[test]
    fn bonus_tier_boundaries() {
        let tiers = default_tiers();
        assert_eq!(bonus_for(&tiers, 1), 0);
        assert_eq!(bonus_for(&tiers, 9), 0);
        assert_eq!(bonus_for(&tiers, 10), 1);
        assert_eq!(bonus_for(&tiers, 14), 1);
        assert_eq!(bonus_for(&tiers, 15), 2);
        assert_eq!(bonus_for(&tiers, 49), 3);
        assert_eq!(bonus_for(&tiers, 50), 5);
        assert_eq!(bonus_for(&tiers, 120), 5);
    }

    #[test]
    fn bonus_tiers_unsorted_input() {
        let mut tiers = default_tiers();
        tiers.reverse();
        assert_eq!(bonus_for(&tiers, 20), 3);
    }

    #[test]
    fn answer_check_is_case_insensitive() {
        let comp = Competition {
            id: 1,
            slug: "rolex-datejust".into(),
            title: "Rolex Datejust 41".into(),
            description: None,
            status: CompetitionStatus::Active,
            total_tickets: 100,
            ticket_price: 499,
            max_tickets_per_user: 50,
            draw_date: "2025-09-01 20:00:00".into(),
            actual_draw_date: None,
            winning_ticket_number: None,
            question: "What is the capital of the United Kingdom?".into(),
            question_choices: r#"[
                {"label": "London", "correct": true},
                {"label": "Paris"},
                {"label": "Madrid"}
            ]"#
            .into(),
            created_at: "2025-08-01 09:00:00".into(),
            updated_at: "2025-08-01 09:00:00".into(),
        };
        assert!(comp.check_answer("london"));
        assert!(comp.check_answer(" LONDON "));
        assert!(!comp.check_answer("Paris"));
        assert!(!comp.check_answer(""));
    }

    #[test]
    fn audit_detail_round_trips_with_action_tag() {
        let detail = AuditDetail::DrawExecuted {
            method: "os_csprng_mod".into(),
            entry_count: 4,
            ticket_number: 7,
            winner_user_id: "user-9".into(),
        };
        let json = serde_json::to_string(&detail).unwrap();
        assert!(json.contains(r#""action":"draw_executed""#));
        let back: AuditDetail = serde_json::from_str(&json).unwrap();
        assert_eq!(back.action(), detail.action());
    }
}
