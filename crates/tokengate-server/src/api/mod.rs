pub mod auth;
pub mod health;
pub mod helpers;
pub mod keys;
pub mod userinfo;
