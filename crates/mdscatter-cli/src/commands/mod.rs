pub mod atoms;
pub mod data;
pub mod info;
pub mod list;
pub mod run;
