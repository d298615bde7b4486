pub mod payment;

pub use payment::{PaymentStatus, PaymentTransaction, StateTransition, TransitionError};
