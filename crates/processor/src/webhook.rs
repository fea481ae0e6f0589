//! Decoding of verified processor notifications into [`ConfirmedCharge`]s.

use chrono::{TimeZone, Utc};
use relay_core::normalize::normalize_email;
use relay_core::types::ConfirmedCharge;
use relay_core::{RelayError, RelayResult};
use serde::Deserialize;
use std::collections::HashMap;

/// Event type that triggers the post-purchase pipeline.
pub const CHARGE_SUCCEEDED: &str = "payment_intent.succeeded";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    ChargeSucceeded {
        event_id: String,
        charge: ConfirmedCharge,
    },
    /// A succeeded charge this relay did not create (no email or product on it).
    Unattributed {
        event_id: String,
        charge_id: String,
        reason: &'static str,
    },
    Ignored {
        event_id: String,
        event_type: String,
    },
}

#[derive(Deserialize)]
struct Envelope {
    id: String,
    #[serde(rename = "type")]
    event_type: String,
    data: EnvelopeData,
}

#[derive(Deserialize)]
struct EnvelopeData {
    object: serde_json::Value,
}

#[derive(Deserialize)]
struct IntentObject {
    id: String,
    #[serde(default)]
    amount: i64,
    #[serde(default)]
    amount_received: Option<i64>,
    #[serde(default)]
    currency: String,
    #[serde(default)]
    customer: Option<String>,
    #[serde(default)]
    created: i64,
    #[serde(default)]
    receipt_email: Option<String>,
    #[serde(default)]
    metadata: HashMap<String, String>,
    #[serde(default)]
    shipping: Option<ShippingObject>,
}

#[derive(Deserialize)]
struct ShippingObject {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    phone: Option<String>,
}

/// Decode a verified notification body.
pub fn parse_notification(body: &[u8]) -> RelayResult<Notification> {
    let envelope: Envelope = serde_json::from_slice(body)
        .map_err(|e| RelayError::InvalidInput(format!("malformed notification: {e}")))?;

    if envelope.event_type != CHARGE_SUCCEEDED {
        return Ok(Notification::Ignored {
            event_id: envelope.id,
            event_type: envelope.event_type,
        });
    }

    let intent: IntentObject = serde_json::from_value(envelope.data.object)
        .map_err(|e| RelayError::InvalidInput(format!("malformed payment intent: {e}")))?;

    let unattributed = |reason| Notification::Unattributed {
        event_id: envelope.id.clone(),
        charge_id: intent.id.clone(),
        reason,
    };

    let Some(email) = intent
        .metadata
        .get("email")
        .or(intent.receipt_email.as_ref())
        .map(|e| normalize_email(e))
        .filter(|e| !e.is_empty())
    else {
        return Ok(unattributed("no email on charge"));
    };
    let Some(product_id) = intent.metadata.get("product_id").cloned() else {
        return Ok(unattributed("no product on charge"));
    };
    let Some(identity_ref) = intent.customer.clone() else {
        return Ok(unattributed("no customer on charge"));
    };
    let Some(occurred_at) = Utc.timestamp_opt(intent.created, 0).single() else {
        return Ok(unattributed("invalid charge timestamp"));
    };

    let (customer_name, phone) = match &intent.shipping {
        Some(shipping) => (shipping.name.clone(), shipping.phone.clone()),
        None => (None, None),
    };

    let charge = ConfirmedCharge {
        charge_id: intent.id.clone(),
        email,
        amount_minor_units: intent.amount_received.unwrap_or(intent.amount),
        currency: intent.currency.clone(),
        product_id,
        product_name: intent.metadata.get("product_name").cloned(),
        is_upsell: intent.metadata.get("is_upsell").is_some_and(|v| v == "true"),
        category_tag: intent.metadata.get("category_tag").cloned(),
        identity_ref,
        occurred_at,
        customer_name: customer_name.or_else(|| intent.metadata.get("customer_name").cloned()),
        phone,
    };

    Ok(Notification::ChargeSucceeded {
        event_id: envelope.id.clone(),
        charge,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn envelope(event_type: &str, object: serde_json::Value) -> Vec<u8> {
        serde_json::to_vec(&json!({
            "id": "evt_1",
            "type": event_type,
            "created": 1_760_000_100,
            "data": { "object": object }
        }))
        .unwrap()
    }

    #[test]
    fn test_parse_succeeded_intent() {
        let body = envelope(
            CHARGE_SUCCEEDED,
            json!({
                "id": "pi_1",
                "amount": 4700,
                "amount_received": 4700,
                "currency": "usd",
                "customer": "cus_1",
                "created": 1_760_000_000,
                "metadata": {
                    "email": " A@X.com ",
                    "product_id": "prod_main",
                    "product_name": "Main Course",
                    "is_upsell": "false"
                }
            }),
        );

        match parse_notification(&body).unwrap() {
            Notification::ChargeSucceeded { event_id, charge } => {
                assert_eq!(event_id, "evt_1");
                assert_eq!(charge.charge_id, "pi_1");
                assert_eq!(charge.email, "a@x.com");
                assert_eq!(charge.amount_minor_units, 4700);
                assert_eq!(charge.identity_ref, "cus_1");
                assert!(!charge.is_upsell);
                assert_eq!(charge.occurred_at.timestamp(), 1_760_000_000);
            }
            other => panic!("unexpected notification: {other:?}"),
        }
    }

    #[test]
    fn test_upsell_with_category_tag() {
        let body = envelope(
            CHARGE_SUCCEEDED,
            json!({
                "id": "pi_2",
                "amount": 19700,
                "currency": "usd",
                "customer": "cus_1",
                "created": 1_760_000_000,
                "receipt_email": "a@x.com",
                "metadata": { "product_id": "prod_coach", "is_upsell": "true", "category_tag": "Coaching Buyer" }
            }),
        );

        let Notification::ChargeSucceeded { charge, .. } = parse_notification(&body).unwrap() else {
            panic!("expected a charge");
        };
        assert!(charge.is_upsell);
        assert_eq!(charge.category_tag.as_deref(), Some("Coaching Buyer"));
        assert_eq!(charge.email, "a@x.com");
    }

    #[test]
    fn test_other_event_types_ignored() {
        let body = envelope("charge.refunded", json!({ "id": "ch_1" }));
        assert!(matches!(
            parse_notification(&body).unwrap(),
            Notification::Ignored { .. }
        ));
    }

    #[test]
    fn test_charge_without_email_is_unattributed() {
        let body = envelope(
            CHARGE_SUCCEEDED,
            json!({ "id": "pi_3", "amount": 100, "customer": "cus_1", "created": 1, "metadata": { "product_id": "p" } }),
        );
        assert!(matches!(
            parse_notification(&body).unwrap(),
            Notification::Unattributed { reason: "no email on charge", .. }
        ));
    }

    #[test]
    fn test_malformed_body_is_invalid_input() {
        let err = parse_notification(b"not json").unwrap_err();
        assert!(matches!(err, RelayError::InvalidInput(_)));
    }
}
