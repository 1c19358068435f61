pub mod logs;
pub mod timestamps;
