pub mod chain;
pub mod fulfillment;
pub mod router;
