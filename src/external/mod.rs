pub mod gateway;

pub use gateway::{ChargeInitiation, ChargeOutcome, ChargeStatus, HttpGateway, PaymentGateway};
