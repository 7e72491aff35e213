pub mod carts;
pub mod catalog;
pub mod notifications;
pub mod orders;
pub mod payments;
pub mod shipping;

/// Field validators shared by the request DTOs in this module.
pub(crate) mod validators {
    use rust_decimal::Decimal;
    use validator::ValidationError;

    pub(crate) fn validate_decimal_min_zero(value: &Decimal) -> Result<(), ValidationError> {
        if value.is_sign_negative() {
            let mut err = ValidationError::new("min_zero");
            err.message = Some("must be zero or greater".into());
            return Err(err);
        }
        Ok(())
    }

    pub(crate) fn validate_percentage(value: &Decimal) -> Result<(), ValidationError> {
        if value.is_sign_negative() || *value > Decimal::from(100) {
            let mut err = ValidationError::new("percentage");
            err.message = Some("must be between 0 and 100".into());
            return Err(err);
        }
        Ok(())
    }
}
