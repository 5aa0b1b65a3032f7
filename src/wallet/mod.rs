// Wallet: building spends for a key

mod tx_builder;

pub use tx_builder::TransactionBuilder;
