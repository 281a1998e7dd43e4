pub mod purchase_verifications;
pub mod subscriptions;
pub mod trials;
