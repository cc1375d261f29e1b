pub mod builder;
pub mod week;
