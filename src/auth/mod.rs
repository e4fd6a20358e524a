pub mod csrf;
pub(crate) mod extractors;
pub mod password;
