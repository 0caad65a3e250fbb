pub mod motor;

pub use motor::LedcMotor;
