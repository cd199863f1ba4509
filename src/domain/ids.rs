//! Newtype identifiers. Kept as thin `String` wrappers so an ISIN can never
//! be passed where an order-id or transaction-id is expected by accident.

use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! string_id {
    ($name:ident) => {
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(pub String);

        impl $name {
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }
    };
}

string_id!(Isin);
string_id!(OrderId);
string_id!(TransactionId);
string_id!(BucketId);
string_id!(Currency);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn isin_display_roundtrip() {
        let isin = Isin::from("US0378331005");
        assert_eq!(isin.to_string(), "US0378331005");
        assert_eq!(isin.as_str(), "US0378331005");
    }

    #[test]
    fn distinct_id_types_do_not_coerce() {
        let order = OrderId::from("ORD-1");
        let tx = TransactionId::from("ORD-1");
        // Same textual value, but distinct types - this is the point.
        assert_eq!(order.as_str(), tx.as_str());
    }
}
