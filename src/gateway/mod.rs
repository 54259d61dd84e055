pub mod client;
pub mod daraja;
pub mod error;
pub mod replay;
pub mod signature;
pub mod types;
