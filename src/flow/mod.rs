pub mod credits;

pub use credits::{decode_credits, encode_credits, CreditLedger, CREDIT_VALUE_LEN};
