pub mod archive;
pub mod config;
pub mod domain;
pub mod error;
pub mod layout;
pub mod manifest;
pub mod normalize;
pub mod output;
pub mod paired;
pub mod pipeline;
pub mod table;
pub mod unify;
pub mod vocabulary;
