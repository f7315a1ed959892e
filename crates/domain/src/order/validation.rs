//! Semantic checks applied after the payload has been parsed.
//!
//! Violations of the schema reject the message. Inconsistencies in the
//! payment breakdown are reported as warnings and stored as-is.

use super::Order;

/// A non-fatal inconsistency found in an otherwise valid order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationWarning {
    /// `amount` differs from `delivery_cost + goods_total + custom_fee`.
    AmountMismatch { amount: i64, expected: i64 },
}

impl ValidationWarning {
    /// Returns a stable snake_case name.
    pub fn as_str(&self) -> &'static str {
        match self {
            ValidationWarning::AmountMismatch { .. } => "amount_mismatch",
        }
    }
}

impl std::fmt::Display for ValidationWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValidationWarning::AmountMismatch { amount, expected } => write!(
                f,
                "payment amount {amount} does not match delivery_cost + goods_total + custom_fee = {expected}"
            ),
        }
    }
}

/// Checks the invariants serde cannot express.
///
/// Returns the reason of the first violation found.
pub(crate) fn check_schema(order: &Order) -> Result<(), String> {
    if order.order_uid.is_blank() {
        return Err("order_uid must not be blank".to_string());
    }

    if order.items.is_empty() {
        return Err("items must not be empty".to_string());
    }

    // PostgreSQL text columns cannot hold U+0000.
    if let Some(field) = text_fields(order).find(|(_, value)| value.contains('\0')) {
        return Err(format!("{} must not contain NUL characters", field.0));
    }

    let payment = &order.payment;
    for (field, value) in [
        ("payment.amount", payment.amount),
        ("payment.delivery_cost", payment.delivery_cost),
        ("payment.goods_total", payment.goods_total),
        ("payment.custom_fee", payment.custom_fee),
    ] {
        if value < 0 {
            return Err(format!("{field} must be non-negative, got {value}"));
        }
    }

    for (index, item) in order.items.iter().enumerate() {
        if !(0..=100).contains(&item.sale) {
            return Err(format!(
                "items[{index}].sale must be within 0..=100, got {}",
                item.sale
            ));
        }
        if item.price < 0 || item.total_price < 0 {
            return Err(format!("items[{index}] prices must be non-negative"));
        }
    }

    Ok(())
}

/// Every text field of the aggregate with its path.
fn text_fields(order: &Order) -> impl Iterator<Item = (String, &str)> {
    let delivery = &order.delivery;
    let payment = &order.payment;
    let top = [
        ("order_uid", order.order_uid.as_str()),
        ("track_number", order.track_number.as_str()),
        ("entry", order.entry.as_str()),
        ("locale", order.locale.as_str()),
        ("internal_signature", order.internal_signature.as_str()),
        ("customer_id", order.customer_id.as_str()),
        ("delivery_service", order.delivery_service.as_str()),
        ("shardkey", order.shardkey.as_str()),
        ("oof_shard", order.oof_shard.as_str()),
        ("delivery.name", delivery.name.as_str()),
        ("delivery.phone", delivery.phone.as_str()),
        ("delivery.zip", delivery.zip.as_str()),
        ("delivery.city", delivery.city.as_str()),
        ("delivery.address", delivery.address.as_str()),
        ("delivery.region", delivery.region.as_str()),
        ("delivery.email", delivery.email.as_str()),
        ("payment.transaction", payment.transaction.as_str()),
        ("payment.request_id", payment.request_id.as_str()),
        ("payment.currency", payment.currency.as_str()),
        ("payment.provider", payment.provider.as_str()),
        ("payment.bank", payment.bank.as_str()),
    ];

    let items = order.items.iter().enumerate().flat_map(|(index, item)| {
        [
            ("track_number", item.track_number.as_str()),
            ("rid", item.rid.as_str()),
            ("name", item.name.as_str()),
            ("size", item.size.as_str()),
            ("brand", item.brand.as_str()),
        ]
        .into_iter()
        .map(move |(field, value)| (format!("items[{index}].{field}"), value))
    });

    top.into_iter()
        .map(|(field, value)| (field.to_string(), value))
        .chain(items)
}

/// Collects warnings for inconsistencies that do not reject the order.
pub(crate) fn consistency_warnings(order: &Order) -> Vec<ValidationWarning> {
    let mut warnings = Vec::new();

    if !order.payment.is_consistent() {
        warnings.push(ValidationWarning::AmountMismatch {
            amount: order.payment.amount,
            expected: order.payment.expected_amount(),
        });
    }

    warnings
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn amount_mismatch_display() {
        let warning = ValidationWarning::AmountMismatch {
            amount: 100,
            expected: 90,
        };
        assert_eq!(warning.as_str(), "amount_mismatch");
        assert!(warning.to_string().contains("= 90"));
    }

    #[test]
    fn text_fields_cover_every_string_column() {
        let order: Order =
            serde_json::from_slice(include_bytes!("../../../../fixtures/model.json")).unwrap();

        let fields: Vec<String> = text_fields(&order).map(|(field, _)| field).collect();
        assert_eq!(fields.len(), 21 + 5 * order.items.len());
        assert!(fields.contains(&"delivery.email".to_string()));
        assert!(fields.contains(&"items[0].rid".to_string()));
    }

    #[test]
    fn nul_in_any_text_field_fails_the_schema() {
        let mut order: Order =
            serde_json::from_slice(include_bytes!("../../../../fixtures/model.json")).unwrap();
        assert!(check_schema(&order).is_ok());

        order.payment.bank = "al\0pha".to_string();
        let reason = check_schema(&order).unwrap_err();
        assert_eq!(reason, "payment.bank must not contain NUL characters");
    }
}
