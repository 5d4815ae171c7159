pub mod api;
pub mod heygen;
