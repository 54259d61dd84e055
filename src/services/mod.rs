pub mod checkout;
pub mod reconciler;
pub mod store;
pub mod subscription;
