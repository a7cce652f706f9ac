/// Stores an optional chrono timestamp as a native bson datetime so range
/// queries compare instants rather than strings.
pub mod optional_bson_datetime {
    use chrono::{DateTime, Utc};
    use mongodb::bson;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S>(value: &Option<DateTime<Utc>>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        value
            .map(bson::DateTime::from_chrono)
            .serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = Option::<bson::DateTime>::deserialize(deserializer)?;
        Ok(value.map(|datetime| datetime.to_chrono()))
    }
}

/// Reduces a phone number to its digits so `+1 (555) 010-0000` and
/// `15550100000` name the same contact.
pub fn normalize_phone(phone: &str) -> String {
    phone.chars().filter(|c| c.is_ascii_digit()).collect()
}

pub fn normalize_email(email: &str) -> String {
    email.trim().to_ascii_lowercase()
}
