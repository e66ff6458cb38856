use std::time::{Duration, SystemTime};

use mongodb::bson::{DateTime, Document, doc};
use serde::{Deserialize, Serialize};

/// One key-value record; MongoDB's TTL monitor removes it once `expires_at` has passed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordDocument {
    #[serde(rename = "_id")]
    pub key: String,
    pub value: String,
    pub expires_at: DateTime,
}

impl RecordDocument {
    pub fn new(key: String, value: String, ttl: Duration) -> Self {
        Self {
            key,
            value,
            expires_at: expiry_after(ttl),
        }
    }
}

pub fn expiry_after(ttl: Duration) -> DateTime {
    DateTime::from_system_time(SystemTime::now() + ttl)
}

/// `expires_at` condition keeping records that have not expired yet. The TTL monitor only
/// sweeps periodically, so expired documents can still be present.
pub fn live_only() -> Document {
    doc! { "$gt": DateTime::now() }
}

pub fn expired_only() -> Document {
    doc! { "$lte": DateTime::now() }
}
