//! `SeaORM` entities for the relational wallet schema.

pub mod item;
pub mod tag;
pub mod wallet;
