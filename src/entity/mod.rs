pub mod application;
pub mod education;
pub mod experience;
pub mod opportunity;
pub mod profile;
pub mod user;
