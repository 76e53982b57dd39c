pub mod account;
pub mod backend;
pub mod cache;
pub mod config;
pub mod controller;
pub mod daemon;
pub mod domain;
pub mod mail;
pub mod store;
