//! Names shared with the participating services.
//!
//! Workflow types, states and source names are plain strings agreed between
//! services; these constants cover the ones the orchestrator itself relies on.

/// Order intake: validate user, reserve product, charge payment.
pub const ORDER_PROCESS: &str = "order_process";

/// Undo of a paid order: release stock, refund, cancel.
pub const ORDER_CANCEL_PROCESS: &str = "order_cancel_process";

/// Bank ledger registration of a new user.
pub const BANK_REGISTRATION: &str = "bank_registration";

pub const STATE_ORDER_CREATED: &str = "order_created";
pub const STATE_ORDER_CANCEL: &str = "order_cancel";
pub const STATE_BANK_REGIS_CREATED: &str = "bank_regis_created";
pub const STATE_USER_VALIDATION_SUCCESS: &str = "user_validation_success";
pub const STATE_PRODUCT_RESERVATION_SUCCESS: &str = "product_reservation_success";
pub const STATE_PRODUCT_RESERVATION_FAILED: &str = "product_reservation_failed";
pub const STATE_PAYMENT_SUCCESS: &str = "payment_success";

/// State of a product reservation re-driven with a corrected quantity.
pub const STATE_PRODUCT_RETRY: &str = "product_retry";

pub const SOURCE_ORDER: &str = "order-svc";
pub const SOURCE_USER: &str = "user-svc";
pub const SOURCE_PRODUCT: &str = "product-svc";
pub const SOURCE_PAYMENT: &str = "payment-svc";
pub const SOURCE_BANK: &str = "bank-svc";
