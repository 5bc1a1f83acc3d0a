pub mod apply;
pub mod create;
pub mod delete;
pub mod get;
pub mod plan;
pub mod validate;
