pub mod inspect;
pub mod migrate;
