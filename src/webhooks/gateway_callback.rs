use std::collections::BTreeMap;

use strum::AsRefStr;

use crate::errors::ServiceError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, AsRefStr)]
#[strum(serialize_all = "snake_case")]
pub enum CallbackStatus {
    Success,
    Pending,
    Failed,
}

impl CallbackStatus {
    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "1" => Some(Self::Success),
            "2" => Some(Self::Pending),
            "3" => Some(Self::Failed),
            _ => None,
        }
    }
}

/// Bill-status notification posted by the payment gateway, parsed once at
/// the HTTP boundary.
#[derive(Debug, Clone)]
pub struct GatewayCallback {
    pub bill_code: String,
    pub order_number: String,
    /// Status code exactly as received; the signature covers this string.
    pub status_code: String,
    pub status: CallbackStatus,
    pub signature: String,
    pub transaction_id: Option<String>,
    pub raw_fields: BTreeMap<String, String>,
}

impl GatewayCallback {
    pub fn from_form(fields: BTreeMap<String, String>) -> Result<Self, ServiceError> {
        let required = |name: &str| -> Result<String, ServiceError> {
            fields
                .get(name)
                .map(|v| v.trim())
                .filter(|v| !v.is_empty())
                .map(str::to_string)
                .ok_or_else(|| {
                    ServiceError::ValidationError(format!("callback is missing `{}`", name))
                })
        };

        let bill_code = required("billcode")?;
        let order_number = required("order_id")?;
        let status_code = required("status")?;
        let signature = required("signature")?;
        let status = CallbackStatus::from_code(&status_code).ok_or_else(|| {
            ServiceError::ValidationError(format!("unknown callback status `{}`", status_code))
        })?;
        let transaction_id = fields
            .get("transaction_id")
            .filter(|v| !v.trim().is_empty())
            .cloned();

        Ok(Self {
            bill_code,
            order_number,
            status_code,
            status,
            signature,
            transaction_id,
            raw_fields: fields,
        })
    }

    /// Payload for logs, without the signature.
    pub fn loggable_payload(&self) -> String {
        redacted_payload(&self.raw_fields)
    }
}

/// `key=value&...` rendering of callback fields with the signature removed.
pub fn redacted_payload(fields: &BTreeMap<String, String>) -> String {
    fields
        .iter()
        .filter(|(key, _)| key.as_str() != "signature")
        .map(|(key, value)| format!("{key}={value}"))
        .collect::<Vec<_>>()
        .join("&")
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn form(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn malformed_payload_is_logged_without_signature() {
        let fields = form(&[
            ("billcode", "gcbhict9"),
            ("signature", "deadbeef"),
            ("status", "1"),
        ]);
        assert_eq!(redacted_payload(&fields), "billcode=gcbhict9&status=1");
    }

    #[test]
    fn parses_a_complete_callback() {
        let callback = GatewayCallback::from_form(form(&[
            ("billcode", "k8x2mq"),
            ("order_id", "PA0001070724"),
            ("status", "1"),
            ("signature", "abc"),
            ("transaction_id", "TP123"),
            ("refno", "R1"),
        ]))
        .unwrap();

        assert_eq!(callback.status, CallbackStatus::Success);
        assert_eq!(callback.transaction_id.as_deref(), Some("TP123"));
        assert_eq!(
            callback.loggable_payload(),
            "billcode=k8x2mq&order_id=PA0001070724&refno=R1&status=1&transaction_id=TP123"
        );
    }

    #[test]
    fn missing_or_blank_fields_are_rejected() {
        let err = GatewayCallback::from_form(form(&[
            ("billcode", "k8x2mq"),
            ("order_id", " "),
            ("status", "1"),
            ("signature", "abc"),
        ]))
        .unwrap_err();
        assert_matches!(err, ServiceError::ValidationError(msg) if msg.contains("order_id"));
    }

    #[test]
    fn unknown_status_codes_are_rejected() {
        let err = GatewayCallback::from_form(form(&[
            ("billcode", "k8x2mq"),
            ("order_id", "PA0001070724"),
            ("status", "9"),
            ("signature", "abc"),
        ]))
        .unwrap_err();
        assert_matches!(err, ServiceError::ValidationError(_));
    }
}
