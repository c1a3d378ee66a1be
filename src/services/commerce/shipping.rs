use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use utoipa::ToSchema;
use validator::Validate;

const NOTE_PREFIX: &str = "ship_";

/// Buyer's checkout form, frozen onto the order at materialization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate, ToSchema)]
pub struct ShippingSnapshot {
    #[validate(email)]
    pub email: String,
    #[validate(length(min = 1, max = 100))]
    pub first_name: String,
    #[validate(length(min = 1, max = 100))]
    pub last_name: String,
    #[validate(length(min = 5, max = 200))]
    pub address: String,
    #[validate(length(max = 100))]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub apartment: Option<String>,
    #[validate(length(min = 1, max = 100))]
    pub city: String,
    #[validate(length(min = 1, max = 100))]
    pub state: String,
    #[validate(length(min = 6, max = 10))]
    pub pin_code: String,
    #[validate(length(min = 10, max = 15))]
    pub phone: String,
}

impl ShippingSnapshot {
    /// Flattens the snapshot into gateway note entries (`ship_<field>`).
    pub fn to_notes(&self) -> BTreeMap<String, String> {
        let mut fields = vec![
            ("email", self.email.clone()),
            ("first_name", self.first_name.clone()),
            ("last_name", self.last_name.clone()),
            ("address", self.address.clone()),
            ("city", self.city.clone()),
            ("state", self.state.clone()),
            ("pin_code", self.pin_code.clone()),
            ("phone", self.phone.clone()),
        ];
        if let Some(apartment) = &self.apartment {
            fields.push(("apartment", apartment.clone()));
        }

        fields
            .into_iter()
            .map(|(k, v)| (format!("{}{}", NOTE_PREFIX, k), v))
            .collect()
    }

    /// Rebuilds a snapshot from gateway notes. `None` if a required field is
    /// missing.
    pub fn from_notes<'a, I>(notes: I) -> Option<Self>
    where
        I: IntoIterator<Item = (&'a String, &'a String)>,
    {
        let fields: BTreeMap<&str, &str> = notes
            .into_iter()
            .filter_map(|(k, v)| k.strip_prefix(NOTE_PREFIX).map(|k| (k, v.as_str())))
            .collect();
        let get = |key: &str| fields.get(key).map(|v| v.to_string());

        Some(Self {
            email: get("email")?,
            first_name: get("first_name")?,
            last_name: get("last_name")?,
            address: get("address")?,
            apartment: get("apartment").filter(|a| !a.is_empty()),
            city: get("city")?,
            state: get("state")?,
            pin_code: get("pin_code")?,
            phone: get("phone")?,
        })
    }
}

#[cfg(test)]
pub(crate) fn sample() -> ShippingSnapshot {
    ShippingSnapshot {
        email: "asha@example.com".into(),
        first_name: "Asha".into(),
        last_name: "Rao".into(),
        address: "12 MG Road".into(),
        apartment: None,
        city: "Bengaluru".into(),
        state: "Karnataka".into(),
        pin_code: "560001".into(),
        phone: "9876543210".into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn valid_snapshot_passes() {
        assert!(sample().validate().is_ok());
    }

    #[test]
    fn short_fields_are_rejected() {
        let mut s = sample();
        s.address = "x".into();
        s.pin_code = "123".into();
        s.phone = "12345".into();
        let errors = s.validate().unwrap_err();
        let fields = errors.field_errors();
        assert!(fields.contains_key("address"));
        assert!(fields.contains_key("pin_code"));
        assert!(fields.contains_key("phone"));
    }

    #[test]
    fn bad_email_is_rejected() {
        let mut s = sample();
        s.email = "not-an-email".into();
        assert!(s.validate().is_err());
    }

    #[test]
    fn notes_survive_unrelated_keys() {
        let mut s = sample();
        s.apartment = Some("Flat 4B".into());

        let mut notes: HashMap<String, String> = s.to_notes().into_iter().collect();
        notes.insert("cart_id".into(), "whatever".into());

        assert_eq!(ShippingSnapshot::from_notes(&notes), Some(s));
    }

    #[test]
    fn missing_required_note_yields_none() {
        let mut notes = sample().to_notes();
        notes.remove("ship_city");
        assert_eq!(ShippingSnapshot::from_notes(&notes), None);
    }
}
