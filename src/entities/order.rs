use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

/// Purchase record. `order_number` is assigned once at creation and never
/// reassigned; item snapshots live in `order_items`. Exactly one of
/// {`user_id`, `guest_token`} is set (service-enforced), guest orders also
/// carry a denormalized contact snapshot.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize, ToSchema)]
#[sea_orm(table_name = "orders")]
#[schema(as = Order)]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    #[sea_orm(unique)]
    pub order_number: String,
    #[sea_orm(nullable)]
    pub user_id: Option<Uuid>,
    #[sea_orm(nullable)]
    pub guest_token: Option<String>,
    #[sea_orm(nullable)]
    pub guest_name: Option<String>,
    #[sea_orm(nullable)]
    pub guest_email: Option<String>,
    #[sea_orm(nullable)]
    pub guest_phone: Option<String>,
    pub status: FulfillmentStatus,
    pub payment_status: PaymentStatus,
    pub payment_method: PaymentMethod,
    #[sea_orm(column_type = "Decimal(Some((19, 4)))")]
    pub total_amount: Decimal,
    pub currency: String,
    pub shipping_region: String,
    #[sea_orm(column_type = "Json", nullable)]
    pub shipping_address: Option<Json>,
    #[sea_orm(column_type = "Decimal(Some((19, 4)))")]
    pub shipping_fee: Decimal,
    #[sea_orm(column_type = "Decimal(Some((19, 4)))")]
    pub shipping_fee_before_discount: Decimal,
    pub shipping_discount_applied: bool,
    #[sea_orm(column_type = "Decimal(Some((19, 4)))")]
    pub shipping_discount_percentage: Decimal,
    #[sea_orm(column_type = "Decimal(Some((19, 4)))")]
    pub shipping_discount_amount: Decimal,
    #[sea_orm(nullable)]
    pub payment_reference: Option<String>,
    #[sea_orm(nullable)]
    pub transaction_id: Option<String>,
    #[sea_orm(nullable)]
    pub paid_at: Option<DateTime<Utc>>,
    #[sea_orm(nullable)]
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub version: i32,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::order_item::Entity")]
    OrderItems,
    #[sea_orm(
        belongs_to = "super::user::Entity",
        from = "Column::UserId",
        to = "super::user::Column::Id"
    )]
    User,
}

impl Related<super::order_item::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::OrderItems.def()
    }
}

impl Related<super::user::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::User.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

/// Fulfillment lifecycle. Transitions form an explicit directed graph; every
/// caller, admin included, goes through [`FulfillmentStatus::can_transition_to`].
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    ToSchema,
    EnumIter,
    DeriveActiveEnum,
    strum::Display,
    strum::EnumString,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(20))")]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum FulfillmentStatus {
    #[sea_orm(string_value = "pending")]
    Pending,
    #[sea_orm(string_value = "processing")]
    Processing,
    #[sea_orm(string_value = "shipped")]
    Shipped,
    #[sea_orm(string_value = "delivered")]
    Delivered,
    #[sea_orm(string_value = "cancelled")]
    Cancelled,
    #[sea_orm(string_value = "refunded")]
    Refunded,
}

impl FulfillmentStatus {
    /// States reachable from `self` in one step. Self-transitions are not
    /// listed; callers treat them as no-ops.
    pub fn allowed_next(self) -> &'static [FulfillmentStatus] {
        use FulfillmentStatus::*;
        match self {
            Pending => &[Processing, Cancelled],
            Processing => &[Shipped, Cancelled],
            Shipped => &[Delivered, Cancelled],
            Delivered => &[Refunded],
            Cancelled => &[Refunded],
            Refunded => &[],
        }
    }

    pub fn can_transition_to(self, next: FulfillmentStatus) -> bool {
        self == next || self.allowed_next().contains(&next)
    }

    /// Whether a customer may still cancel from this state.
    pub fn user_cancellable(self) -> bool {
        matches!(self, FulfillmentStatus::Pending | FulfillmentStatus::Processing)
    }

    pub fn is_terminal(self) -> bool {
        self.allowed_next().is_empty()
    }
}

/// Payment settlement state, independent axis from fulfillment.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    ToSchema,
    EnumIter,
    DeriveActiveEnum,
    strum::Display,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(20))")]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum PaymentStatus {
    #[sea_orm(string_value = "pending")]
    Pending,
    #[sea_orm(string_value = "paid")]
    Paid,
    #[sea_orm(string_value = "failed")]
    Failed,
    #[sea_orm(string_value = "refunded")]
    Refunded,
}

/// Accepted payment instruments, fixed enumeration.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    ToSchema,
    EnumIter,
    DeriveActiveEnum,
    strum::Display,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(20))")]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum PaymentMethod {
    #[sea_orm(string_value = "credit_card")]
    CreditCard,
    #[sea_orm(string_value = "paypal")]
    Paypal,
    #[sea_orm(string_value = "cash_on_delivery")]
    CashOnDelivery,
    #[sea_orm(string_value = "stripe")]
    Stripe,
    #[sea_orm(string_value = "paystack")]
    Paystack,
    #[sea_orm(string_value = "whatsapp")]
    Whatsapp,
    #[sea_orm(string_value = "other")]
    Other,
}

#[cfg(test)]
mod tests {
    use super::FulfillmentStatus::*;
    use super::*;
    use test_case::test_case;

    #[test]
    fn happy_path_is_fully_connected() {
        assert!(Pending.can_transition_to(Processing));
        assert!(Processing.can_transition_to(Shipped));
        assert!(Shipped.can_transition_to(Delivered));
        assert!(Delivered.can_transition_to(Refunded));
    }

    #[test]
    fn cancellation_edges() {
        assert!(Pending.can_transition_to(Cancelled));
        assert!(Processing.can_transition_to(Cancelled));
        assert!(Shipped.can_transition_to(Cancelled));
        assert!(!Delivered.can_transition_to(Cancelled));
        assert!(Cancelled.can_transition_to(Refunded));
    }

    #[test]
    fn no_way_back_from_terminal_states() {
        for next in [Pending, Processing, Shipped, Delivered, Cancelled] {
            assert!(!Refunded.can_transition_to(next), "refunded -> {next}");
        }
        assert!(Refunded.is_terminal());
        assert!(!Delivered.is_terminal());
    }

    #[test_case(Pending, Shipped ; "pending cannot skip to shipped")]
    #[test_case(Pending, Delivered ; "pending cannot skip to delivered")]
    #[test_case(Processing, Delivered ; "processing cannot skip to delivered")]
    #[test_case(Shipped, Processing ; "shipped cannot move back to processing")]
    fn forward_skips_are_rejected(from: FulfillmentStatus, to: FulfillmentStatus) {
        assert!(!from.can_transition_to(to));
    }

    #[test]
    fn self_transition_is_always_accepted() {
        use sea_orm::Iterable;
        for status in FulfillmentStatus::iter() {
            assert!(status.can_transition_to(status));
        }
    }

    #[test]
    fn user_cancellation_window() {
        assert!(Pending.user_cancellable());
        assert!(Processing.user_cancellable());
        assert!(!Shipped.user_cancellable());
        assert!(!Delivered.user_cancellable());
        assert!(!Cancelled.user_cancellable());
    }

    #[test]
    fn status_strings_match_storage_values() {
        assert_eq!(Pending.to_string(), "pending");
        assert_eq!(Cancelled.to_string(), "cancelled");
        assert_eq!("shipped".parse::<FulfillmentStatus>().unwrap(), Shipped);
    }
}
