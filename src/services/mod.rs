// Cart and pricing
pub mod commerce;

// Order lifecycle
pub mod orders;
pub mod order_status;

// Checkout safeguards
pub mod duplicates;
pub mod payments;
