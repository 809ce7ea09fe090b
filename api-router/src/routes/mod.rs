pub mod health;
pub mod index;
pub mod liveness;
pub mod run;
