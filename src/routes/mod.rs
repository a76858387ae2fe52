pub mod dealers;
pub mod health;
pub mod permissions;
pub mod resolve;
pub mod roles;
