pub mod nonce_pruner;
