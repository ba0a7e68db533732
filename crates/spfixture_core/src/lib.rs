pub mod action;
pub mod admin;
pub mod auth;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod folders;
pub mod remote;
pub mod resolver;
pub mod rest;

#[cfg(test)]
mod fake;
